//! LiteLLM catalog fetch
//!
//! Optional, offline-capable: invoked only by the explicit `update-pricing`
//! command, never on the analyzer's hot path.

use super::embedded::ModelPricing;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;

pub const LITELLM_PRICING_URL: &str =
    "https://raw.githubusercontent.com/BerriAI/litellm/main/model_prices_and_context_window.json";

/// Raw per-token rates as published by LiteLLM.
#[derive(Debug, Deserialize)]
struct LiteLlmEntry {
    #[serde(default)]
    input_cost_per_token: Option<f64>,
    #[serde(default)]
    output_cost_per_token: Option<f64>,
    #[serde(default)]
    cache_creation_input_token_cost: Option<f64>,
    #[serde(default)]
    cache_read_input_token_cost: Option<f64>,
}

/// Fetch the catalog and keep the Claude entries, converted to USD per
/// million tokens.
pub async fn fetch_litellm_pricing() -> Result<HashMap<String, ModelPricing>> {
    let response = reqwest::get(LITELLM_PRICING_URL)
        .await
        .context("Failed to fetch LiteLLM pricing catalog")?;

    let raw: HashMap<String, serde_json::Value> = response
        .json()
        .await
        .context("Failed to decode LiteLLM pricing catalog")?;

    let mut models = HashMap::new();
    for (name, value) in raw {
        if !name.contains("claude") {
            continue;
        }
        let Ok(entry) = serde_json::from_value::<LiteLlmEntry>(value) else {
            continue;
        };
        let (Some(input), Some(output)) = (entry.input_cost_per_token, entry.output_cost_per_token)
        else {
            continue;
        };

        models.insert(
            name,
            ModelPricing {
                input: input * 1e6,
                output: output * 1e6,
                cache_creation: entry
                    .cache_creation_input_token_cost
                    .map(|c| c * 1e6)
                    .unwrap_or(input * 1e6 * 1.25),
                cache_read: entry
                    .cache_read_input_token_cost
                    .map(|c| c * 1e6)
                    .unwrap_or(input * 1e6 * 0.1),
            },
        );
    }

    tracing::info!("Fetched {} Claude model prices from LiteLLM", models.len());
    Ok(models)
}
