//! Session metrics
//!
//! Fills in cost, burn-rate, and depletion projections on detected
//! sessions. Burn rate is utilization: the observed per-window rate divided
//! by the rate that would exactly exhaust the binding plan limit over one
//! full window.

use crate::clock::Clock;
use crate::models::{Plan, Projection, Session, WINDOW_SECS};
use crate::pricing::PricingProvider;
use std::sync::Arc;

const WINDOW_MINUTES: f64 = WINDOW_SECS as f64 / 60.0;

pub struct MetricsCalculator {
    pricing: Arc<PricingProvider>,
    plan: Plan,
    clock: Arc<dyn Clock>,
}

impl MetricsCalculator {
    pub fn new(pricing: Arc<PricingProvider>, plan: Plan, clock: Arc<dyn Clock>) -> Self {
        Self {
            pricing,
            plan,
            clock,
        }
    }

    /// Compute costs, rates and projection for one session in place.
    pub fn finalize(&self, session: &mut Session) {
        let now = self.clock.now_unix();

        // costs, on read, per model
        let mut total_cost = 0.0;
        for (model, stats) in session.model_distribution.iter_mut() {
            let cost = self.pricing.cost_of(
                model,
                stats.totals.input_tokens,
                stats.totals.output_tokens,
                stats.totals.cache_creation_tokens,
                stats.totals.cache_read_tokens,
            );
            stats.totals.total_cost = cost;
            total_cost += cost;
        }
        session.totals.total_cost = total_cost;

        // blended rate spreads cost over projects and hour buckets
        let blended = if session.totals.total_tokens > 0 {
            total_cost / session.totals.total_tokens as f64
        } else {
            0.0
        };
        for stats in session.projects.values_mut() {
            stats.totals.total_cost = stats.totals.total_tokens as f64 * blended;
        }
        session.hourly.sort_by_key(|h| h.hour);
        for bucket in session.hourly.iter_mut() {
            bucket.cost = bucket.tokens as f64 * blended;
        }

        let elapsed_minutes = session.elapsed_minutes(now) as f64;
        session.metrics.tokens_per_minute = session.totals.total_tokens as f64 / elapsed_minutes;
        session.metrics.cost_per_minute = total_cost / elapsed_minutes;
        session.metrics.cost_per_hour = session.metrics.cost_per_minute * 60.0;
        session.metrics.burn_rate = self.utilization(session);

        session.projection = if session.is_active {
            Some(self.project(session, now))
        } else {
            None
        };
    }

    /// Observed rate over the rate that would just exhaust the binding
    /// limit in one window. Token limit binds when present, else cost,
    /// else zero.
    fn utilization(&self, session: &Session) -> f64 {
        if let Some(token_limit) = self.plan.token_limit {
            if token_limit > 0 {
                let expected_per_minute = token_limit as f64 / WINDOW_MINUTES;
                return session.metrics.tokens_per_minute / expected_per_minute;
            }
        }
        if let Some(cost_limit) = self.plan.cost_limit {
            if cost_limit > 0.0 {
                let expected_per_minute = cost_limit / WINDOW_MINUTES;
                return session.metrics.cost_per_minute / expected_per_minute;
            }
        }
        0.0
    }

    /// Predicted depletion, capped at the session's reset time. The binding
    /// dimension is whichever of tokens/cost depletes first; with no
    /// consumption at all the prediction is the reset itself.
    fn project(&self, session: &Session, now: i64) -> Projection {
        let reset = session.reset_time.unwrap_or(session.end_time);

        let token_rate_per_sec = session.metrics.tokens_per_minute / 60.0;
        let cost_rate_per_sec = session.metrics.cost_per_minute / 60.0;

        let token_depletion = self.plan.token_limit.and_then(|limit| {
            if token_rate_per_sec > 0.0 {
                let remaining = limit.saturating_sub(session.totals.total_tokens) as f64;
                Some(remaining / token_rate_per_sec)
            } else {
                None
            }
        });
        let cost_depletion = self.plan.cost_limit.and_then(|limit| {
            if cost_rate_per_sec > 0.0 {
                let remaining = (limit - session.totals.total_cost).max(0.0);
                Some(remaining / cost_rate_per_sec)
            } else {
                None
            }
        });

        let predicted_end_time = match (token_depletion, cost_depletion) {
            (Some(t), Some(c)) => now + t.min(c) as i64,
            (Some(t), None) => now + t as i64,
            (None, Some(c)) => now + c as i64,
            (None, None) => reset,
        }
        .min(reset);

        let horizon = (predicted_end_time - now).max(0) as f64;
        Projection {
            predicted_end_time,
            projected_tokens: session.totals.total_tokens
                + (token_rate_per_sec * horizon) as u64,
            projected_cost: session.totals.total_cost + cost_rate_per_sec * horizon,
        }
    }
}
