//! Five-hour window models
//!
//! A window is a fixed `[start, end)` interval of [`WINDOW_SECS`] seconds.
//! Its `source` records the derivation path and controls priority during
//! conflict resolution in the detector.

use serde::{Deserialize, Serialize};

/// Length of one rate-limit window: five hours.
pub const WINDOW_SECS: i64 = 18_000;

/// Seconds in one hour; hour-aligned sources start on these boundaries.
pub const HOUR_SECS: i64 = 3_600;

/// Derivation path of a window's boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowSource {
    LimitMessage,
    Gap,
    FirstMessage,
    ContinuousActivity,
    HistoryLimit,
    HistoryAccount,
}

impl WindowSource {
    /// Admission priority; higher wins on overlap.
    pub fn priority(&self) -> u8 {
        match self {
            WindowSource::HistoryLimit => 10,
            WindowSource::LimitMessage => 9,
            WindowSource::ContinuousActivity => 8,
            WindowSource::HistoryAccount => 7,
            WindowSource::Gap => 5,
            WindowSource::FirstMessage => 3,
        }
    }

    /// Hour-aligned sources always start on a 3600-second boundary.
    pub fn is_hour_aligned(&self) -> bool {
        matches!(
            self,
            WindowSource::ContinuousActivity | WindowSource::Gap | WindowSource::FirstMessage
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WindowSource::LimitMessage => "limit_message",
            WindowSource::Gap => "gap",
            WindowSource::FirstMessage => "first_message",
            WindowSource::ContinuousActivity => "continuous_activity",
            WindowSource::HistoryLimit => "history_limit",
            WindowSource::HistoryAccount => "history_account",
        }
    }
}

impl std::fmt::Display for WindowSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted window boundary observation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowRecord {
    pub start_time: i64,
    pub end_time: i64,
    pub source: WindowSource,
    pub is_limit_reached: bool,
    #[serde(default)]
    pub is_account_level: bool,
    pub first_seen: i64,
    pub last_seen: i64,
}

impl WindowRecord {
    pub fn overlaps(&self, start: i64, end: i64) -> bool {
        self.start_time < end && start < self.end_time
    }

    /// Stable identity for the history document map.
    pub fn key(&self) -> String {
        format!("{}:{}", self.start_time, self.source)
    }
}

/// A window proposal emitted by one detection strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowCandidate {
    pub start_time: i64,
    pub end_time: i64,
    pub source: WindowSource,
    pub priority: u8,
    pub is_limit: bool,
}

impl WindowCandidate {
    pub fn new(start_time: i64, source: WindowSource) -> Self {
        Self {
            start_time,
            end_time: start_time + WINDOW_SECS,
            source,
            priority: source.priority(),
            is_limit: matches!(
                source,
                WindowSource::LimitMessage | WindowSource::HistoryLimit
            ),
        }
    }

    pub fn overlaps(&self, other: &WindowCandidate) -> bool {
        self.start_time < other.end_time && other.start_time < self.end_time
    }

    pub fn contains(&self, ts: i64) -> bool {
        self.start_time <= ts && ts < self.end_time
    }
}

/// Prior detection outcome cached per session for reuse across refreshes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowDetectionInfo {
    pub window_start_time: i64,
    pub source: WindowSource,
    pub detected_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_entry_time: Option<i64>,
}
