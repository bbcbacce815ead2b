//! Persistent window-boundary history
//!
//! Remembers observed five-hour windows across runs so future detections
//! re-anchor on known boundaries. Stored as a single versioned JSON document
//! under the cache directory; retention drops records one day past their
//! end.

use crate::clock::Clock;
use crate::error::CoreError;
use crate::models::{CachedLimitInfo, WindowRecord, WindowSource, WINDOW_SECS};
use chrono::{NaiveDate, TimeZone};
use chrono_tz::Tz;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

/// Records are retained until one day past their end.
const RETENTION_SECS: i64 = 86_400;

const HISTORY_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct HistoryDocument {
    version: u32,
    windows: Vec<WindowRecord>,
}

/// Persistent store of observed/learned window boundaries.
pub struct WindowHistory {
    path: PathBuf,
    tz: Tz,
    clock: Arc<dyn Clock>,
    windows: RwLock<HashMap<String, WindowRecord>>,
}

impl WindowHistory {
    /// Load the history document if present; unreadable documents start an
    /// empty history rather than failing.
    pub fn load(path: PathBuf, tz: Tz, clock: Arc<dyn Clock>) -> Self {
        let mut windows = HashMap::new();

        match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<HistoryDocument>(&content) {
                Ok(doc) => {
                    let now = clock.now_unix();
                    for record in doc.windows {
                        if record.end_time + RETENTION_SECS >= now {
                            windows.insert(record.key(), record);
                        }
                    }
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Unreadable window history, starting empty");
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read window history");
            }
        }

        Self {
            path,
            tz,
            clock,
            windows: RwLock::new(windows),
        }
    }

    /// Derive limit-message windows from markers seen in the last day of
    /// logs, adding any not already present. Returns the count added.
    pub fn load_historical_limit_windows(&self, limits: &[CachedLimitInfo]) -> usize {
        let now = self.clock.now_unix();
        let mut added = 0;
        let mut windows = self.windows.write();

        for limit in limits {
            if limit.timestamp < now - RETENTION_SECS {
                continue;
            }
            let Some(reset) = limit.reset_time else {
                continue;
            };

            let record = WindowRecord {
                start_time: reset - WINDOW_SECS,
                end_time: reset,
                source: WindowSource::LimitMessage,
                is_limit_reached: true,
                is_account_level: false,
                first_seen: now,
                last_seen: now,
            };

            match windows.get_mut(&record.key()) {
                Some(existing) => existing.last_seen = now,
                None => {
                    windows.insert(record.key(), record);
                    added += 1;
                }
            }
        }

        if added > 0 {
            debug!(added, "Learned limit windows from recent logs");
        }
        added
    }

    /// Records marked account-level.
    pub fn account_level_windows(&self) -> Vec<WindowRecord> {
        self.windows
            .read()
            .values()
            .filter(|r| r.is_account_level)
            .cloned()
            .collect()
    }

    /// Limit-reached `limit_message` records, the highest-priority window
    /// source.
    pub fn limit_windows(&self) -> Vec<WindowRecord> {
        self.windows
            .read()
            .values()
            .filter(|r| r.is_limit_reached && r.source == WindowSource::LimitMessage)
            .cloned()
            .collect()
    }

    pub fn all_windows(&self) -> Vec<WindowRecord> {
        self.windows.read().values().cloned().collect()
    }

    /// Validate a proposed window against the clock and existing same-day
    /// limit records.
    ///
    /// The proposal is clamped to `[now - 1 day, now + 5 hours]`; an overlap
    /// with a same-day `limit_message` record pushes the start to that
    /// record's end, preserving the five-hour span. A push that crosses into
    /// a different calendar day (in the configured timezone) rejects the
    /// proposal. Returns `(start, end, unchanged)`.
    pub fn validate_new_window(
        &self,
        proposed_start: i64,
        proposed_end: i64,
    ) -> Option<(i64, i64, bool)> {
        let now = self.clock.now_unix();

        let mut start = proposed_start.max(now - RETENTION_SECS);
        if start > now {
            start = now;
        }
        let mut end = start + WINDOW_SECS;

        // day anchoring applies to conflict shifts, not the clock clamp
        let anchor_day = self.civil_day(start);
        {
            let windows = self.windows.read();
            let mut conflicts: Vec<&WindowRecord> = windows
                .values()
                .filter(|r| {
                    r.source == WindowSource::LimitMessage
                        && r.start_time != proposed_start
                        && self.civil_day(r.start_time) == anchor_day
                })
                .collect();
            conflicts.sort_by_key(|r| r.start_time);

            for record in conflicts {
                if record.overlaps(start, end) {
                    start = record.end_time;
                    end = start + WINDOW_SECS;
                }
            }
        }

        if self.civil_day(start) != anchor_day {
            return None;
        }

        let unchanged = start == proposed_start && end == proposed_end;
        Some((start, end, unchanged))
    }

    /// Insert or refresh a record.
    pub fn upsert(&self, mut record: WindowRecord) {
        let now = self.clock.now_unix();
        let mut windows = self.windows.write();
        match windows.get_mut(&record.key()) {
            Some(existing) => {
                existing.last_seen = now;
                existing.is_limit_reached |= record.is_limit_reached;
            }
            None => {
                record.first_seen = now;
                record.last_seen = now;
                windows.insert(record.key(), record);
            }
        }
    }

    /// Collapse overlapping limit windows into one account-level record:
    /// limits observed from different sessions over the same span are one
    /// account-wide event.
    pub fn merge_account_windows(&self) -> usize {
        let mut windows = self.windows.write();
        let mut limit_records: Vec<WindowRecord> = windows
            .values()
            .filter(|r| r.source == WindowSource::LimitMessage && r.is_limit_reached)
            .cloned()
            .collect();
        limit_records.sort_by_key(|r| r.start_time);

        let mut merged = 0;
        for pair in limit_records.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            if !a.overlaps(b.start_time, b.end_time) {
                continue;
            }
            // keep the earlier span as the account-level window
            let account = WindowRecord {
                start_time: a.start_time,
                end_time: a.end_time,
                source: WindowSource::HistoryAccount,
                is_limit_reached: true,
                is_account_level: true,
                first_seen: a.first_seen.min(b.first_seen),
                last_seen: a.last_seen.max(b.last_seen),
            };
            windows.remove(&b.key());
            windows.insert(account.key(), account);
            merged += 1;
        }
        merged
    }

    /// Retention sweep; returns the number of records dropped.
    pub fn clean_old_windows(&self) -> usize {
        let now = self.clock.now_unix();
        let mut windows = self.windows.write();
        let before = windows.len();
        windows.retain(|_, r| r.end_time + RETENTION_SECS >= now);
        before - windows.len()
    }

    /// Drop every record that is neither limit-reached nor account-level.
    pub fn clear_non_limit_windows(&self) {
        self.windows
            .write()
            .retain(|_, r| r.is_limit_reached || r.is_account_level);
    }

    /// Persist the document, enforcing retention on the way out.
    pub fn save(&self) -> Result<(), CoreError> {
        self.clean_old_windows();

        let mut records: Vec<WindowRecord> = self.windows.read().values().cloned().collect();
        records.sort_by_key(|r| r.start_time);

        let doc = HistoryDocument {
            version: HISTORY_VERSION,
            windows: records,
        };

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| CoreError::FileWrite {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        let json = serde_json::to_string_pretty(&doc).map_err(|e| CoreError::JsonParse {
            path: self.path.clone(),
            message: "serialize window history".to_string(),
            source: e,
        })?;
        std::fs::write(&self.path, json).map_err(|e| CoreError::FileWrite {
            path: self.path.clone(),
            source: e,
        })?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.windows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn civil_day(&self, ts: i64) -> NaiveDate {
        self.tz
            .timestamp_opt(ts, 0)
            .single()
            .map(|dt| dt.date_naive())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use std::path::Path;

    fn history_at(dir: &Path, now: i64) -> WindowHistory {
        WindowHistory::load(
            dir.join("window_history.json"),
            chrono_tz::UTC,
            FixedClock::at(now),
        )
    }

    fn limit_at(ts: i64, reset: i64) -> CachedLimitInfo {
        CachedLimitInfo {
            kind: "limit_reached".to_string(),
            timestamp: ts,
            reset_time: Some(reset),
            content: format!("limit reached|{reset}"),
            model: None,
        }
    }

    #[test]
    fn test_learn_limit_windows_dedups() {
        let dir = tempfile::tempdir().unwrap();
        let now = 1_700_000_000;
        let history = history_at(dir.path(), now);

        let limits = vec![
            limit_at(now - 3_600, now + 1_800),
            limit_at(now - 3_000, now + 1_800), // same reset, same window
            limit_at(now - 2 * 86_400, now - 86_400 - 3_600), // too old
        ];
        assert_eq!(history.load_historical_limit_windows(&limits), 1);
        assert_eq!(history.load_historical_limit_windows(&limits), 0);

        let windows = history.limit_windows();
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].end_time - windows[0].start_time, WINDOW_SECS);
    }

    #[test]
    fn test_save_load_round_trip_with_retention() {
        let dir = tempfile::tempdir().unwrap();
        let now = 1_700_000_000;
        let history = history_at(dir.path(), now);

        history.upsert(WindowRecord {
            start_time: now - 7_200,
            end_time: now - 7_200 + WINDOW_SECS,
            source: WindowSource::LimitMessage,
            is_limit_reached: true,
            is_account_level: false,
            first_seen: 0,
            last_seen: 0,
        });
        history.upsert(WindowRecord {
            start_time: now - 3 * 86_400,
            end_time: now - 3 * 86_400 + WINDOW_SECS,
            source: WindowSource::Gap,
            is_limit_reached: false,
            is_account_level: false,
            first_seen: 0,
            last_seen: 0,
        });

        history.save().unwrap();

        let reloaded = history_at(dir.path(), now);
        // the 3-day-old gap record fell to retention on save
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded.limit_windows().len(), 1);
    }

    #[test]
    fn test_validate_clamps_to_recent_past() {
        let dir = tempfile::tempdir().unwrap();
        let now = 1_700_000_000;
        let history = history_at(dir.path(), now);

        let ancient = now - 5 * 86_400;
        let (start, end, unchanged) = history
            .validate_new_window(ancient, ancient + WINDOW_SECS)
            .unwrap();
        assert_eq!(start, now - 86_400);
        assert_eq!(end - start, WINDOW_SECS);
        assert!(!unchanged);
    }

    #[test]
    fn test_validate_shifts_past_same_day_limit_record() {
        let dir = tempfile::tempdir().unwrap();
        // noon UTC so the same-day shift stays within the civil day
        let now = 1_700_000_000 / 86_400 * 86_400 + 12 * 3_600;
        let history = history_at(dir.path(), now);

        let existing_start = now - 4 * 3_600;
        history.upsert(WindowRecord {
            start_time: existing_start,
            end_time: existing_start + WINDOW_SECS,
            source: WindowSource::LimitMessage,
            is_limit_reached: true,
            is_account_level: false,
            first_seen: 0,
            last_seen: 0,
        });

        // proposal overlapping the existing record
        let proposed = existing_start + 3_600;
        let (start, end, unchanged) = history
            .validate_new_window(proposed, proposed + WINDOW_SECS)
            .unwrap();
        assert_eq!(start, existing_start + WINDOW_SECS);
        assert_eq!(end - start, WINDOW_SECS);
        assert!(!unchanged);
    }

    #[test]
    fn test_validate_rejects_cross_day_shift() {
        let dir = tempfile::tempdir().unwrap();
        // 23:00 UTC: pushing past an existing window crosses midnight
        let midnight = 1_700_006_400 / 86_400 * 86_400;
        let now = midnight + 23 * 3_600;
        let history = history_at(dir.path(), now);

        let existing_start = now - 3_600;
        history.upsert(WindowRecord {
            start_time: existing_start,
            end_time: existing_start + WINDOW_SECS,
            source: WindowSource::LimitMessage,
            is_limit_reached: true,
            is_account_level: false,
            first_seen: 0,
            last_seen: 0,
        });

        let proposed = now - 1_800;
        assert!(history
            .validate_new_window(proposed, proposed + WINDOW_SECS)
            .is_none());
    }

    #[test]
    fn test_validate_accepts_clean_proposal_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let now = 1_700_000_000;
        let history = history_at(dir.path(), now);

        let proposed = now - 3_600;
        let (start, end, unchanged) = history
            .validate_new_window(proposed, proposed + WINDOW_SECS)
            .unwrap();
        assert_eq!((start, end), (proposed, proposed + WINDOW_SECS));
        assert!(unchanged);
    }

    #[test]
    fn test_merge_account_windows() {
        let dir = tempfile::tempdir().unwrap();
        let now = 1_700_000_000;
        let history = history_at(dir.path(), now);

        for start in [now - 10_000, now - 8_000] {
            history.upsert(WindowRecord {
                start_time: start,
                end_time: start + WINDOW_SECS,
                source: WindowSource::LimitMessage,
                is_limit_reached: true,
                is_account_level: false,
                first_seen: 0,
                last_seen: 0,
            });
        }

        assert_eq!(history.merge_account_windows(), 1);
        assert_eq!(history.account_level_windows().len(), 1);
        assert_eq!(history.limit_windows().len(), 1);
    }

    #[test]
    fn test_clear_non_limit_windows() {
        let dir = tempfile::tempdir().unwrap();
        let now = 1_700_000_000;
        let history = history_at(dir.path(), now);

        history.upsert(WindowRecord {
            start_time: now - 7_200,
            end_time: now - 7_200 + WINDOW_SECS,
            source: WindowSource::Gap,
            is_limit_reached: false,
            is_account_level: false,
            first_seen: 0,
            last_seen: 0,
        });
        history.upsert(WindowRecord {
            start_time: now - 20_000,
            end_time: now - 20_000 + WINDOW_SECS,
            source: WindowSource::LimitMessage,
            is_limit_reached: true,
            is_account_level: false,
            first_seen: 0,
            last_seen: 0,
        });

        history.clear_non_limit_windows();
        assert_eq!(history.len(), 1);
    }
}
