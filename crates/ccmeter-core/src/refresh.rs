//! Refresh control
//!
//! Serializes re-detection behind a single mutex and publishes the result
//! through the state manager. Incremental refreshes rebuild only the
//! sessions whose window overlaps the changed files' activity; everything
//! else is retained untouched.

use crate::cache::MemoryCache;
use crate::clock::Clock;
use crate::detector::{DetectInput, SessionDetector};
use crate::metrics::MetricsCalculator;
use crate::models::{MonitorConfig, Session, WindowCandidate};
use crate::state::StateManager;
use crate::window_history::WindowHistory;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

pub struct RefreshController {
    memory: Arc<MemoryCache>,
    history: Arc<WindowHistory>,
    state: Arc<StateManager>,
    detector: SessionDetector,
    metrics: MetricsCalculator,
    config: MonitorConfig,
    clock: Arc<dyn Clock>,
    /// One refresh at a time; concurrent requests wait, they do not fail.
    refresh_lock: Mutex<()>,
}

impl RefreshController {
    pub fn new(
        memory: Arc<MemoryCache>,
        history: Arc<WindowHistory>,
        state: Arc<StateManager>,
        metrics: MetricsCalculator,
        config: MonitorConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            memory,
            history,
            state,
            detector: SessionDetector::new(),
            metrics,
            config,
            clock,
            refresh_lock: Mutex::new(()),
        }
    }

    /// Periodic-refresh entry point: incremental when enabled and a changed
    /// set is known, full otherwise.
    pub async fn refresh_data(&self, changed_ids: &[String]) -> Vec<Session> {
        if self.config.enable_incremental_detection && !changed_ids.is_empty() {
            self.refresh_incremental(changed_ids).await
        } else {
            self.refresh_full().await
        }
    }

    /// Full detection over the unbounded global timeline; publishes and
    /// returns the new slice.
    pub async fn refresh_full(&self) -> Vec<Session> {
        let _guard = self.refresh_lock.lock().await;
        let sessions = self.full_detect();
        self.state.set_sessions(sessions.clone());
        sessions
    }

    /// Incremental detection for the given changed transcripts; publishes
    /// and returns the new slice. Falls back to full detection when nothing
    /// overlaps or incremental mode is disabled.
    pub async fn refresh_incremental(&self, changed_ids: &[String]) -> Vec<Session> {
        let _guard = self.refresh_lock.lock().await;
        let sessions = if self.config.enable_incremental_detection {
            self.incremental_detect(changed_ids)
        } else {
            self.full_detect()
        };
        self.state.set_sessions(sessions.clone());
        sessions
    }

    fn full_detect(&self) -> Vec<Session> {
        let now = self.clock.now_unix();

        // full detection rebuilds speculative windows from scratch; only
        // limit-backed history survives as an anchor
        self.history.clear_non_limit_windows();
        let limits = self.memory.all_limit_messages();
        self.history.load_historical_limit_windows(&limits);
        self.history.merge_account_windows();

        let timeline = self.memory.global_timeline(0);
        let cached_info = self.memory.cached_window_info();

        let outcome = self.detector.detect(&DetectInput {
            timeline: &timeline,
            limits: &limits,
            history: &self.history,
            cached_info: &cached_info,
            now,
        });

        for (session_id, info) in outcome.cache_back {
            self.memory.update_window_info(&session_id, info);
        }

        let mut sessions = outcome.sessions;
        for session in sessions.iter_mut() {
            self.metrics.finalize(session);
        }
        debug!(sessions = sessions.len(), "Full detection complete");
        sessions
    }

    /// Rebuild only sessions overlapping the changed files' activity span.
    fn incremental_detect(&self, changed_ids: &[String]) -> Vec<Session> {
        let current = self.state.current_sessions();
        if current.is_empty() || self.history.is_empty() {
            return self.full_detect();
        }

        // activity span across the changed transcripts
        let mut span: Option<(i64, i64)> = None;
        for id in changed_ids {
            let Some(logs) = self.memory.logs_for_file(id) else {
                continue;
            };
            for record in logs.iter() {
                let Some(ts) = record.unix() else { continue };
                span = Some(match span {
                    None => (ts, ts),
                    Some((lo, hi)) => (lo.min(ts), hi.max(ts)),
                });
            }
        }
        let Some((lo, hi)) = span else {
            return self.full_detect();
        };

        let overlapping: Vec<usize> = current
            .iter()
            .enumerate()
            .filter(|(_, s)| s.overlaps(lo, hi + 1))
            .map(|(i, _)| i)
            .collect();
        if overlapping.is_empty() {
            return self.full_detect();
        }

        let now = self.clock.now_unix();
        let limits = self.memory.all_limit_messages();
        let timeline = self.memory.global_timeline(0);
        let cached_info = self.memory.cached_window_info();
        let input = DetectInput {
            timeline: &timeline,
            limits: &limits,
            history: &self.history,
            cached_info: &cached_info,
            now,
        };

        let mut sessions = Vec::with_capacity(current.len());
        for (index, session) in current.iter().enumerate() {
            if overlapping.contains(&index) {
                // re-assign logs from the fresh timeline into the same window
                let window = WindowCandidate {
                    start_time: session.start_time,
                    end_time: session.end_time,
                    source: session.window.source,
                    priority: session.window.priority,
                    is_limit: session.is_limit_reached,
                };
                let (mut rebuilt, _contributors) = self.detector.build_session(&window, &input);
                rebuilt.is_gap = session.is_gap;
                self.metrics.finalize(&mut rebuilt);
                sessions.push(rebuilt);
            } else {
                sessions.push(session.as_ref().clone());
            }
        }

        debug!(
            rebuilt = overlapping.len(),
            retained = sessions.len() - overlapping.len(),
            "Incremental detection complete"
        );
        sessions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::models::{
        AggregatedData, ConversationRecord, MessagePayload, Plan, RecordKind, TokenUsage,
        WindowSource, CACHE_SCHEMA_VERSION,
    };
    use crate::pricing::PricingProvider;
    use chrono::{TimeZone, Utc};

    struct Fixture {
        controller: RefreshController,
        memory: Arc<MemoryCache>,
        history: Arc<WindowHistory>,
        state: Arc<StateManager>,
        _dirs: (tempfile::TempDir, tempfile::TempDir),
    }

    fn fixture(now: i64) -> Fixture {
        let cache_dir = tempfile::tempdir().unwrap();
        let history_dir = tempfile::tempdir().unwrap();
        let clock = FixedClock::at(now);
        let memory = Arc::new(MemoryCache::new(clock.clone()));
        let history = Arc::new(WindowHistory::load(
            history_dir.path().join("window_history.json"),
            chrono_tz::UTC,
            clock.clone(),
        ));
        let state = Arc::new(StateManager::new(clock.clone()));
        let metrics = MetricsCalculator::new(
            Arc::new(PricingProvider::load(cache_dir.path())),
            Plan::default(),
            clock.clone(),
        );
        let controller = RefreshController::new(
            Arc::clone(&memory),
            Arc::clone(&history),
            Arc::clone(&state),
            metrics,
            MonitorConfig {
                enable_incremental_detection: true,
                ..Default::default()
            },
            clock,
        );
        Fixture {
            controller,
            memory,
            history,
            state,
            _dirs: (cache_dir, history_dir),
        }
    }

    fn record(ts: i64, request: &str, tokens: u64) -> ConversationRecord {
        ConversationRecord {
            timestamp: Utc.timestamp_opt(ts, 0).single(),
            kind: RecordKind::Assistant,
            request_id: Some(request.to_string()),
            session_id: Some("s1".to_string()),
            message: Some(MessagePayload {
                id: Some(format!("m-{request}")),
                model: Some("claude-sonnet-4-5".to_string()),
                usage: Some(TokenUsage {
                    input_tokens: tokens,
                    ..Default::default()
                }),
                content: None,
            }),
            content: None,
        }
    }

    fn insert_session(memory: &MemoryCache, id: &str, records: Vec<ConversationRecord>) {
        let data = Arc::new(AggregatedData {
            version: CACHE_SCHEMA_VERSION,
            session_id: id.to_string(),
            file_path: format!("/data/proj/{id}.jsonl").into(),
            project_name: "proj".to_string(),
            hourly_stats: vec![],
            file_meta: Default::default(),
            limit_messages: vec![],
        });
        memory.set(id, data, Some(Arc::new(records)));
    }

    #[tokio::test]
    async fn test_full_refresh_publishes_sessions() {
        let base = 1_700_000_000 / 3_600 * 3_600;
        let fx = fixture(base + 3_600);
        insert_session(
            &fx.memory,
            "s1",
            vec![record(base + 60, "r1", 100), record(base + 120, "r2", 50)],
        );

        let sessions = fx.controller.refresh_full().await;
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].totals.input_tokens, 150);
        assert_eq!(fx.state.current_sessions().len(), 1);
    }

    #[tokio::test]
    async fn test_incremental_preserves_unaffected_sessions() {
        let window = crate::models::WINDOW_SECS;
        let base = 1_700_000_000 / 3_600 * 3_600;
        // two back-to-back windows: A fed by transcript s1, B by s2
        let fx = fixture(base + window + 3_600);
        // non-overlapping history record so incremental mode engages
        fx.history.upsert(crate::models::WindowRecord {
            start_time: base - 16 * 3_600,
            end_time: base - 16 * 3_600 + window,
            source: WindowSource::LimitMessage,
            is_limit_reached: true,
            is_account_level: false,
            first_seen: 0,
            last_seen: 0,
        });
        insert_session(&fx.memory, "s1", vec![record(base + 600, "r1", 100)]);
        insert_session(&fx.memory, "s2", vec![record(base + window + 600, "r2", 10)]);

        let first = fx.controller.refresh_full().await;
        let a_before = first
            .iter()
            .find(|s| s.start_time == base)
            .expect("window A")
            .clone();

        // new activity lands only in transcript s2, inside window B
        insert_session(
            &fx.memory,
            "s2",
            vec![
                record(base + window + 600, "r2", 10),
                record(base + window + 2_400, "r3", 40),
            ],
        );
        let second = fx
            .controller
            .refresh_incremental(&["s2".to_string()])
            .await;

        assert_eq!(second.len(), first.len());
        // A unchanged field-for-field
        let a_after = second.iter().find(|s| s.start_time == base).unwrap();
        assert_eq!(a_after.totals, a_before.totals);
        assert_eq!(a_after.window.source, a_before.window.source);
        // B rebuilt with the new request
        let b_after = second
            .iter()
            .find(|s| s.start_time == base + window)
            .unwrap();
        assert_eq!(b_after.totals.input_tokens, 50);
        assert_eq!(b_after.totals.message_count, 2);
    }

    #[tokio::test]
    async fn test_incremental_without_state_falls_back_to_full() {
        let base = 1_700_000_000 / 3_600 * 3_600;
        let fx = fixture(base + 3_600);
        insert_session(&fx.memory, "s1", vec![record(base + 60, "r1", 100)]);

        let sessions = fx
            .controller
            .refresh_incremental(&["s1".to_string()])
            .await;
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].totals.input_tokens, 100);
    }

    #[tokio::test]
    async fn test_refresh_data_goes_full_without_changes() {
        let base = 1_700_000_000 / 3_600 * 3_600;
        let fx = fixture(base + 3_600);
        insert_session(&fx.memory, "s1", vec![record(base + 60, "r1", 100)]);

        let sessions = fx.controller.refresh_data(&[]).await;
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].totals.input_tokens, 100);
    }

    #[tokio::test]
    async fn test_empty_refresh_keeps_display() {
        let base = 1_700_000_000 / 3_600 * 3_600;
        let fx = fixture(base + 3_600);
        insert_session(&fx.memory, "s1", vec![record(base + 60, "r1", 100)]);
        fx.controller.refresh_full().await;

        // all data gone: detection returns nothing, display survives
        fx.memory.delete("s1");
        fx.controller.refresh_full().await;
        assert_eq!(fx.state.sessions_for_display().len(), 1);
    }
}
