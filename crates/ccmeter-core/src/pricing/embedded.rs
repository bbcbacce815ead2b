//! Embedded pricing table
//!
//! Static rates for known Claude models, used when no fetched catalog is
//! cached on disk. All figures are USD per million tokens for each of the
//! four token kinds.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Pricing for one model, USD per million tokens.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelPricing {
    pub input: f64,
    pub output: f64,
    pub cache_creation: f64,
    pub cache_read: f64,
}

impl ModelPricing {
    /// Fallback rates for unrecognized models.
    pub const fn default_table() -> Self {
        Self {
            input: 3.0,
            output: 15.0,
            cache_creation: 3.75,
            cache_read: 0.3,
        }
    }
}

/// Embedded rates keyed by model-id fragments; lookup matches by substring
/// so dated ids like `claude-sonnet-4-5-20250929` resolve.
pub static MODEL_PRICING: Lazy<HashMap<&'static str, ModelPricing>> = Lazy::new(|| {
    let mut m = HashMap::new();

    let opus = ModelPricing {
        input: 15.0,
        output: 75.0,
        cache_creation: 18.75,
        cache_read: 1.5,
    };
    m.insert("opus", opus);

    let sonnet = ModelPricing {
        input: 3.0,
        output: 15.0,
        cache_creation: 3.75,
        cache_read: 0.3,
    };
    m.insert("sonnet", sonnet);

    let haiku = ModelPricing {
        input: 1.0,
        output: 5.0,
        cache_creation: 1.25,
        cache_read: 0.1,
    };
    m.insert("haiku", haiku);

    m
});

/// Resolve embedded pricing for a model id, `None` when unrecognized.
pub fn lookup(model: &str) -> Option<ModelPricing> {
    let lowered = model.to_ascii_lowercase();
    MODEL_PRICING
        .iter()
        .find(|(fragment, _)| lowered.contains(*fragment))
        .map(|(_, pricing)| *pricing)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_matches_dated_ids() {
        let p = lookup("claude-sonnet-4-5-20250929").unwrap();
        assert_eq!(p.input, 3.0);
        assert_eq!(p.output, 15.0);
    }

    #[test]
    fn test_lookup_unknown_model() {
        assert!(lookup("totally-new-model").is_none());
    }

    #[test]
    fn test_default_table_rates() {
        let d = ModelPricing::default_table();
        assert_eq!(
            (d.input, d.output, d.cache_creation, d.cache_read),
            (3.0, 15.0, 3.75, 0.3)
        );
    }
}
