//! Pricing provider
//!
//! Resolves USD cost for token usage from two sources, merged at load time:
//! a cached LiteLLM catalog (when present and fresh) and the embedded table.
//! Unknown models fall back to a defaulted rate card with one debug log.
//! Cost is always computed on read; nothing caches derived costs.

pub mod cache;
pub mod embedded;
pub mod litellm;

use crate::models::TokenUsage;
use anyhow::Result;
pub use embedded::ModelPricing;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Model-keyed rate provider.
pub struct PricingProvider {
    cache_dir: PathBuf,
    catalog: RwLock<HashMap<String, ModelPricing>>,
}

impl PricingProvider {
    /// Load catalog from disk cache (if fresh) merged over nothing; the
    /// embedded table is consulted at lookup time so it never goes stale.
    pub fn load(cache_dir: &Path) -> Self {
        let catalog = match cache::load_cached_pricing(cache_dir) {
            Ok(Some(models)) => models,
            Ok(None) => HashMap::new(),
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring unreadable pricing cache");
                HashMap::new()
            }
        };

        Self {
            cache_dir: cache_dir.to_path_buf(),
            catalog: RwLock::new(catalog),
        }
    }

    /// Rates for a model: fetched catalog, then embedded table, then the
    /// default card.
    pub fn rates_for(&self, model: &str) -> ModelPricing {
        if let Some(p) = self.catalog.read().get(model) {
            return *p;
        }
        if let Some(p) = embedded::lookup(model) {
            return p;
        }
        tracing::debug!(model, "No pricing for model, using default table");
        ModelPricing::default_table()
    }

    /// USD cost of a usage record under `model`'s rates.
    pub fn cost(&self, model: &str, usage: &TokenUsage) -> f64 {
        let rates = self.rates_for(model);
        cost_with(
            &rates,
            usage.input_tokens,
            usage.output_tokens,
            usage.cache_creation_input_tokens,
            usage.cache_read_input_tokens,
        )
    }

    /// USD cost from explicit per-kind counts.
    pub fn cost_of(
        &self,
        model: &str,
        input: u64,
        output: u64,
        cache_creation: u64,
        cache_read: u64,
    ) -> f64 {
        let rates = self.rates_for(model);
        cost_with(&rates, input, output, cache_creation, cache_read)
    }

    /// Refresh the catalog from LiteLLM and persist it. Explicitly invoked,
    /// never on the hot path.
    pub async fn update_from_litellm(&self) -> Result<usize> {
        let fetched = litellm::fetch_litellm_pricing().await?;
        let count = fetched.len();
        cache::save_pricing_cache(&self.cache_dir, litellm::LITELLM_PRICING_URL, fetched.clone())?;
        *self.catalog.write() = fetched;
        Ok(count)
    }
}

fn cost_with(
    rates: &ModelPricing,
    input: u64,
    output: u64,
    cache_creation: u64,
    cache_read: u64,
) -> f64 {
    (input as f64 / 1e6) * rates.input
        + (output as f64 / 1e6) * rates.output
        + (cache_creation as f64 / 1e6) * rates.cache_creation
        + (cache_read as f64 / 1e6) * rates.cache_read
}
