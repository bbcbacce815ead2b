//! Derived session models
//!
//! A [`Session`] is one detected five-hour window with its assigned activity
//! rolled up per project and per model, plus the metrics the calculator
//! fills in afterwards.

use crate::models::record::{ConversationRecord, TokenUsage};
use crate::models::window::{WindowSource, WINDOW_SECS};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// One log on the merged cross-project timeline.
///
/// Sessions parsed since boot contribute one entry per raw record. Sessions
/// hydrated from the file cache keep no raw records; they contribute entries
/// synthesized from their hourly cells' entry bounds, with the cell's tokens
/// attached to the leading entry. Records are shared immutably out of the
/// memory cache; the detector never mutates them.
#[derive(Debug, Clone)]
pub struct TimelineEntry {
    pub timestamp: i64,
    pub project_name: String,
    pub session_id: String,
    pub model: String,
    /// Usage to account for this entry. For raw records this is the record's
    /// own usage (deduplicated downstream by request id); for synthesized
    /// entries it is the pre-deduplicated cell total.
    pub usage: TokenUsage,
    pub message_count: u64,
    /// Request id for downstream dedup; `None` on synthesized entries.
    pub request_id: Option<String>,
    pub record: Option<Arc<ConversationRecord>>,
}

/// Token/cost/message rollup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageTotals {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_creation_tokens: u64,
    pub cache_read_tokens: u64,
    pub total_tokens: u64,
    pub total_cost: f64,
    pub message_count: u64,
}

impl UsageTotals {
    pub fn add_tokens(&mut self, input: u64, output: u64, cache_creation: u64, cache_read: u64) {
        self.input_tokens += input;
        self.output_tokens += output;
        self.cache_creation_tokens += cache_creation;
        self.cache_read_tokens += cache_read;
        self.total_tokens += input + output + cache_creation + cache_read;
    }
}

/// Per-project activity within a session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectStats {
    pub totals: UsageTotals,
    pub first_entry_time: Option<i64>,
    pub last_entry_time: Option<i64>,
}

/// Per-model activity within a session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelStats {
    pub totals: UsageTotals,
}

/// Window provenance carried on the session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowInfo {
    pub start_time: Option<i64>,
    pub is_detected: bool,
    pub source: WindowSource,
    pub priority: u8,
}

/// Rates filled in by the metrics calculator.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetrics {
    pub tokens_per_minute: f64,
    pub cost_per_hour: f64,
    pub cost_per_minute: f64,
    pub burn_rate: f64,
}

/// Depletion forecast for an active session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Projection {
    pub predicted_end_time: i64,
    pub projected_tokens: u64,
    pub projected_cost: f64,
}

/// Per-hour activity within a session, for sparkline-style display.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionHour {
    pub hour: i64,
    pub tokens: u64,
    pub cost: f64,
}

/// One detected five-hour window with its assigned activity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub start_time: i64,
    pub end_time: i64,
    pub is_active: bool,
    pub is_gap: bool,
    pub is_limit_reached: bool,
    pub projects: HashMap<String, ProjectStats>,
    pub model_distribution: HashMap<String, ModelStats>,
    pub totals: UsageTotals,
    pub window: WindowInfo,
    pub hourly: Vec<SessionHour>,
    pub metrics: SessionMetrics,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub projection: Option<Projection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reset_time: Option<i64>,
    /// First assigned log, Unix seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_entry_time: Option<i64>,
    /// Last assigned log, Unix seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_entry_time: Option<i64>,
}

impl Session {
    /// New empty session over a window; callers assign activity afterwards.
    pub fn over_window(start_time: i64, source: WindowSource) -> Self {
        let start = Utc
            .timestamp_opt(start_time, 0)
            .single()
            .unwrap_or_else(Utc::now);
        Self {
            id: start.to_rfc3339(),
            start_time,
            end_time: start_time + WINDOW_SECS,
            is_active: false,
            is_gap: false,
            is_limit_reached: false,
            projects: HashMap::new(),
            model_distribution: HashMap::new(),
            totals: UsageTotals::default(),
            window: WindowInfo {
                start_time: Some(start_time),
                is_detected: true,
                source,
                priority: source.priority(),
            },
            hourly: Vec::new(),
            metrics: SessionMetrics::default(),
            projection: None,
            reset_time: None,
            first_entry_time: None,
            last_entry_time: None,
        }
    }

    pub fn contains(&self, ts: i64) -> bool {
        self.start_time <= ts && ts < self.end_time
    }

    pub fn overlaps(&self, start: i64, end: i64) -> bool {
        self.start_time < end && start < self.end_time
    }

    pub fn start(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.start_time, 0)
            .single()
            .unwrap_or_else(Utc::now)
    }

    /// Minutes elapsed inside the window as of `now`, at least 1.
    pub fn elapsed_minutes(&self, now: i64) -> i64 {
        let effective = now.min(self.end_time).max(self.start_time);
        ((effective - self.start_time) / 60).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_span_and_boundaries() {
        let s = Session::over_window(3_600, WindowSource::ContinuousActivity);
        assert_eq!(s.end_time - s.start_time, WINDOW_SECS);
        assert!(s.contains(3_600));
        assert!(s.contains(3_600 + WINDOW_SECS - 1));
        assert!(!s.contains(3_600 + WINDOW_SECS));
    }

    #[test]
    fn test_elapsed_minutes_clamped() {
        let s = Session::over_window(0, WindowSource::Gap);
        assert_eq!(s.elapsed_minutes(0), 1);
        assert_eq!(s.elapsed_minutes(600), 10);
        // past the window end: capped at the full window
        assert_eq!(s.elapsed_minutes(WINDOW_SECS * 4), WINDOW_SECS / 60);
    }

    #[test]
    fn test_totals_add_tokens() {
        let mut t = UsageTotals::default();
        t.add_tokens(10, 20, 5, 1);
        t.add_tokens(1, 2, 0, 0);
        assert_eq!(t.total_tokens, 39);
        assert_eq!(t.input_tokens, 11);
    }
}
