//! Pricing cache management
//!
//! Stores a fetched catalog in `<cacheDir>/pricing/litellm.json` with TTL.
//! The cache is owned by this collaborator; nothing on the hot path writes
//! here.

use super::embedded::ModelPricing;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Cache expiration duration (7 days)
const CACHE_TTL_DAYS: i64 = 7;

/// On-disk catalog document.
#[derive(Debug, Serialize, Deserialize)]
pub struct CachedPricing {
    pub last_updated: DateTime<Utc>,
    pub source: String,
    pub models: HashMap<String, ModelPricing>,
}

/// Catalog file path under the configured cache dir.
pub fn catalog_path(cache_dir: &Path) -> PathBuf {
    cache_dir.join("pricing").join("litellm.json")
}

/// Load the cached catalog if present and fresh.
pub fn load_cached_pricing(cache_dir: &Path) -> Result<Option<HashMap<String, ModelPricing>>> {
    let path = catalog_path(cache_dir);

    if !path.exists() {
        tracing::debug!("No pricing cache found at {}", path.display());
        return Ok(None);
    }

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read pricing cache: {}", path.display()))?;

    let cached: CachedPricing = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse pricing cache: {}", path.display()))?;

    let age = Utc::now().signed_duration_since(cached.last_updated);
    if age.num_days() > CACHE_TTL_DAYS {
        tracing::info!(
            "Pricing cache expired ({} days old, TTL: {} days)",
            age.num_days(),
            CACHE_TTL_DAYS
        );
        return Ok(None);
    }

    tracing::debug!(
        "Loaded {} model prices from cache ({} days old)",
        cached.models.len(),
        age.num_days()
    );

    Ok(Some(cached.models))
}

/// Save a fetched catalog.
pub fn save_pricing_cache(
    cache_dir: &Path,
    source: &str,
    models: HashMap<String, ModelPricing>,
) -> Result<()> {
    let path = catalog_path(cache_dir);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create pricing dir: {}", parent.display()))?;
    }

    let cached = CachedPricing {
        last_updated: Utc::now(),
        source: source.to_string(),
        models,
    };

    let json =
        serde_json::to_string_pretty(&cached).context("Failed to serialize pricing cache")?;
    std::fs::write(&path, json)
        .with_context(|| format!("Failed to write pricing cache: {}", path.display()))?;

    tracing::info!("Saved {} model prices to cache", cached.models.len());
    Ok(())
}
