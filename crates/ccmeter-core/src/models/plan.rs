//! Subscription plan limits
//!
//! Plans bound the metrics calculator's burn-rate and projection math. The
//! token figures are per five-hour window and are community estimates, not
//! contractual values.

use serde::{Deserialize, Serialize};

/// Limits for one rate-limit window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_limit: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_limit: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_limit: Option<u64>,
}

impl Plan {
    /// Resolve a named plan. `custom_limit_tokens` overrides the token limit
    /// when non-zero, and is the only limit of the `custom` plan.
    pub fn named(name: &str, custom_limit_tokens: u64) -> Self {
        let mut plan = match name {
            "pro" => Plan {
                token_limit: Some(19_000),
                cost_limit: Some(18.0),
                message_limit: Some(250),
            },
            "max5" => Plan {
                token_limit: Some(88_000),
                cost_limit: Some(35.0),
                message_limit: Some(1_000),
            },
            "max20" => Plan {
                token_limit: Some(220_000),
                cost_limit: Some(140.0),
                message_limit: Some(2_000),
            },
            _ => Plan::default(),
        };
        if custom_limit_tokens > 0 {
            plan.token_limit = Some(custom_limit_tokens);
        }
        plan
    }

    pub fn has_any_limit(&self) -> bool {
        self.token_limit.is_some() || self.cost_limit.is_some() || self.message_limit.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_named_plans() {
        assert_eq!(Plan::named("pro", 0).token_limit, Some(19_000));
        assert_eq!(Plan::named("max20", 0).message_limit, Some(2_000));
        assert!(!Plan::named("custom", 0).has_any_limit());
    }

    #[test]
    fn test_custom_tokens_override() {
        let plan = Plan::named("pro", 50_000);
        assert_eq!(plan.token_limit, Some(50_000));
        // custom plan picks up the override as its only limit
        let plan = Plan::named("custom", 1_000_000);
        assert_eq!(plan.token_limit, Some(1_000_000));
        assert_eq!(plan.cost_limit, None);
    }
}
