//! Five-hour window detection
//!
//! Partitions the global activity timeline into fixed five-hour windows.
//! Six candidate sources each propose windows with a declared priority;
//! candidates are admitted greedily, priority first, into a disjoint set.
//! Admitted windows then receive every timeline log falling inside their
//! half-open interval. New sources are added by appending a value
//! implementing [`CandidateSource`].

use crate::models::{
    CachedLimitInfo, ModelStats, Session, SessionHour, TimelineEntry, TokenUsage,
    WindowCandidate, WindowDetectionInfo, WindowSource, WINDOW_SECS,
};
use crate::window_history::WindowHistory;
use std::collections::HashMap;
use tracing::debug;

const HOUR: i64 = 3_600;

/// Everything one detection pass reads.
pub struct DetectInput<'a> {
    pub timeline: &'a [TimelineEntry],
    /// Current limit markers across all cached sessions, ascending by time.
    pub limits: &'a [CachedLimitInfo],
    pub history: &'a WindowHistory,
    /// Prior per-session outcomes; cache-back skips unchanged entries.
    pub cached_info: &'a HashMap<String, WindowDetectionInfo>,
    pub now: i64,
}

/// Detection result: finished sessions plus the window info to cache back
/// per contributing transcript.
pub struct DetectOutcome {
    pub sessions: Vec<Session>,
    pub cache_back: Vec<(String, WindowDetectionInfo)>,
}

/// One window-boundary proposal strategy.
pub trait CandidateSource: Send + Sync {
    fn name(&self) -> &'static str;
    fn priority(&self) -> u8;
    fn detect(&self, input: &DetectInput<'_>) -> Vec<WindowCandidate>;
}

/// Windows already learned from limit markers in past runs.
struct HistoryLimitSource;

impl CandidateSource for HistoryLimitSource {
    fn name(&self) -> &'static str {
        "history_limit"
    }

    fn priority(&self) -> u8 {
        WindowSource::HistoryLimit.priority()
    }

    fn detect(&self, input: &DetectInput<'_>) -> Vec<WindowCandidate> {
        input
            .history
            .limit_windows()
            .into_iter()
            .map(|r| WindowCandidate {
                start_time: r.start_time,
                end_time: r.start_time + WINDOW_SECS,
                source: WindowSource::HistoryLimit,
                priority: WindowSource::HistoryLimit.priority(),
                is_limit: true,
            })
            .collect()
    }
}

/// Windows anchored on reset timestamps in current limit markers.
struct LimitMessageSource;

impl CandidateSource for LimitMessageSource {
    fn name(&self) -> &'static str {
        "limit_message"
    }

    fn priority(&self) -> u8 {
        WindowSource::LimitMessage.priority()
    }

    fn detect(&self, input: &DetectInput<'_>) -> Vec<WindowCandidate> {
        let mut candidates = Vec::new();
        for limit in input.limits {
            let Some(reset) = limit.reset_time else {
                continue;
            };
            let proposed_start = reset - WINDOW_SECS;
            // the history store arbitrates against same-day records
            let Some((start, _end, _unchanged)) =
                input.history.validate_new_window(proposed_start, reset)
            else {
                continue;
            };
            candidates.push(WindowCandidate {
                start_time: start,
                end_time: start + WINDOW_SECS,
                source: WindowSource::LimitMessage,
                priority: WindowSource::LimitMessage.priority(),
                is_limit: true,
            });
        }
        candidates
    }
}

/// Hour-aligned back-to-back windows over the observed activity span.
struct ContinuousActivitySource;

impl CandidateSource for ContinuousActivitySource {
    fn name(&self) -> &'static str {
        "continuous_activity"
    }

    fn priority(&self) -> u8 {
        WindowSource::ContinuousActivity.priority()
    }

    fn detect(&self, input: &DetectInput<'_>) -> Vec<WindowCandidate> {
        let (Some(first), Some(last)) = (input.timeline.first(), input.timeline.last()) else {
            return Vec::new();
        };

        let mut candidates = Vec::new();
        let mut start = first.timestamp / HOUR * HOUR;
        while start <= last.timestamp {
            let end = start + WINDOW_SECS;
            let has_activity = input
                .timeline
                .iter()
                .any(|e| start <= e.timestamp && e.timestamp < end);
            if has_activity {
                candidates.push(WindowCandidate::new(start, WindowSource::ContinuousActivity));
            }
            start = end;
        }
        candidates
    }
}

/// Account-level windows learned from history.
struct HistoryAccountSource;

impl CandidateSource for HistoryAccountSource {
    fn name(&self) -> &'static str {
        "history_account"
    }

    fn priority(&self) -> u8 {
        WindowSource::HistoryAccount.priority()
    }

    fn detect(&self, input: &DetectInput<'_>) -> Vec<WindowCandidate> {
        input
            .history
            .account_level_windows()
            .into_iter()
            .map(|r| WindowCandidate {
                start_time: r.start_time,
                end_time: r.start_time + WINDOW_SECS,
                source: WindowSource::HistoryAccount,
                priority: WindowSource::HistoryAccount.priority(),
                is_limit: r.is_limit_reached,
            })
            .collect()
    }
}

/// A fresh window wherever activity resumes after a five-hour silence.
struct GapSource;

impl CandidateSource for GapSource {
    fn name(&self) -> &'static str {
        "gap"
    }

    fn priority(&self) -> u8 {
        WindowSource::Gap.priority()
    }

    fn detect(&self, input: &DetectInput<'_>) -> Vec<WindowCandidate> {
        let mut candidates = Vec::new();
        for pair in input.timeline.windows(2) {
            let (before, after) = (&pair[0], &pair[1]);
            if after.timestamp - before.timestamp >= WINDOW_SECS {
                candidates.push(WindowCandidate::new(
                    after.timestamp / HOUR * HOUR,
                    WindowSource::Gap,
                ));
            }
        }
        candidates
    }
}

/// Fallback window covering the very first observed activity.
struct FirstMessageSource;

impl CandidateSource for FirstMessageSource {
    fn name(&self) -> &'static str {
        "first_message"
    }

    fn priority(&self) -> u8 {
        WindowSource::FirstMessage.priority()
    }

    fn detect(&self, input: &DetectInput<'_>) -> Vec<WindowCandidate> {
        input
            .timeline
            .first()
            .map(|first| {
                vec![WindowCandidate::new(
                    first.timestamp / HOUR * HOUR,
                    WindowSource::FirstMessage,
                )]
            })
            .unwrap_or_default()
    }
}

/// Per-request accumulator used during log assignment.
struct RequestRollup {
    project: String,
    model: String,
    usage: TokenUsage,
    first_ts: i64,
}

/// Multi-strategy window detector.
pub struct SessionDetector {
    sources: Vec<Box<dyn CandidateSource>>,
}

impl Default for SessionDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionDetector {
    pub fn new() -> Self {
        Self {
            sources: vec![
                Box::new(HistoryLimitSource),
                Box::new(LimitMessageSource),
                Box::new(ContinuousActivitySource),
                Box::new(HistoryAccountSource),
                Box::new(GapSource),
                Box::new(FirstMessageSource),
            ],
        }
    }

    /// Run one full detection pass. Metrics are left unfilled.
    pub fn detect(&self, input: &DetectInput<'_>) -> DetectOutcome {
        let admitted = self.admit(self.collect(input));
        self.finalize(input, admitted)
    }

    /// Collect candidates from every source.
    fn collect(&self, input: &DetectInput<'_>) -> Vec<WindowCandidate> {
        let mut candidates = Vec::new();
        for source in &self.sources {
            let mut found = source.detect(input);
            debug!(source = source.name(), count = found.len(), "Collected window candidates");
            candidates.append(&mut found);
        }
        candidates
    }

    /// Greedy disjoint admission: priority descending, then start ascending.
    /// A higher-priority overlap discards the lower candidate outright.
    fn admit(&self, mut candidates: Vec<WindowCandidate>) -> Vec<WindowCandidate> {
        candidates.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.start_time.cmp(&b.start_time))
        });

        let mut admitted: Vec<WindowCandidate> = Vec::new();
        for candidate in candidates {
            if admitted.iter().all(|w| !w.overlaps(&candidate)) {
                admitted.push(candidate);
            }
        }

        admitted.sort_by_key(|w| w.start_time);
        admitted
    }

    /// Assign logs to admitted windows and build sessions.
    fn finalize(&self, input: &DetectInput<'_>, admitted: Vec<WindowCandidate>) -> DetectOutcome {
        let mut sessions = Vec::new();
        let mut cache_back = Vec::new();

        for window in admitted {
            let (session, contributors) = self.build_session(&window, input);

            if contributors.is_empty() && window.source == WindowSource::ContinuousActivity {
                // generated to cover potential activity that a higher-priority
                // window took instead
                continue;
            }

            // cache back freshly derived (non-history) windows
            if matches!(
                window.source,
                WindowSource::LimitMessage | WindowSource::Gap | WindowSource::FirstMessage
            ) && window.end_time <= input.now + WINDOW_SECS
            {
                let info = WindowDetectionInfo {
                    window_start_time: window.start_time,
                    source: window.source,
                    detected_at: input.now,
                    first_entry_time: session.first_entry_time,
                };
                for id in &contributors {
                    let stale = input
                        .cached_info
                        .get(id)
                        .map(|prior| {
                            prior.window_start_time != info.window_start_time
                                || prior.source != info.source
                        })
                        .unwrap_or(true);
                    if stale {
                        cache_back.push((id.clone(), info.clone()));
                    }
                }
            }

            sessions.push(session);
        }

        DetectOutcome {
            sessions,
            cache_back,
        }
    }

    /// Build one session over a fixed window by assigning timeline logs into
    /// its half-open interval. Also used by incremental re-detection to
    /// rebuild an existing window in place. Returns the session plus the
    /// transcript ids that contributed logs.
    pub fn build_session(
        &self,
        window: &WindowCandidate,
        input: &DetectInput<'_>,
    ) -> (Session, Vec<String>) {
        let assigned: Vec<&TimelineEntry> = input
            .timeline
            .iter()
            .filter(|e| window.contains(e.timestamp))
            .collect();

        let mut session = Session::over_window(window.start_time, window.source);
        session.is_active = window.contains(input.now);

        self.accumulate(&mut session, &assigned);

        // limit markers landing inside the window
        for limit in input.limits {
            if window.contains(limit.timestamp) {
                session.is_limit_reached = true;
                if let Some(reset) = limit.reset_time {
                    session.reset_time = Some(reset);
                }
            }
        }
        if window.is_limit {
            session.is_limit_reached = true;
            session.reset_time.get_or_insert(window.end_time);
        }

        let mut contributors: Vec<String> =
            assigned.iter().map(|e| e.session_id.clone()).collect();
        contributors.sort_unstable();
        contributors.dedup();

        (session, contributors)
    }

    /// Roll assigned entries into the session, deduplicating request-id
    /// streams by per-kind maxima; synthesized entries accumulate as-is.
    fn accumulate(&self, session: &mut Session, assigned: &[&TimelineEntry]) {
        let mut requests: HashMap<&str, RequestRollup> = HashMap::new();

        for entry in assigned {
            session.first_entry_time = Some(
                session
                    .first_entry_time
                    .map_or(entry.timestamp, |t| t.min(entry.timestamp)),
            );
            session.last_entry_time = Some(
                session
                    .last_entry_time
                    .map_or(entry.timestamp, |t| t.max(entry.timestamp)),
            );

            match entry.request_id.as_deref() {
                Some(request_id) => {
                    let rollup = requests.entry(request_id).or_insert_with(|| RequestRollup {
                        project: entry.project_name.clone(),
                        model: entry.model.clone(),
                        usage: TokenUsage::default(),
                        first_ts: entry.timestamp,
                    });
                    rollup.usage = rollup.usage.max_by_kind(&entry.usage);
                    rollup.first_ts = rollup.first_ts.min(entry.timestamp);
                }
                None => {
                    self.fold(
                        session,
                        &entry.project_name,
                        &entry.model,
                        &entry.usage,
                        entry.message_count,
                        entry.timestamp,
                    );
                }
            }

            // project presence even for zero-usage entries
            let project = session.projects.entry(entry.project_name.clone()).or_default();
            project.first_entry_time = Some(
                project
                    .first_entry_time
                    .map_or(entry.timestamp, |t| t.min(entry.timestamp)),
            );
            project.last_entry_time = Some(
                project
                    .last_entry_time
                    .map_or(entry.timestamp, |t| t.max(entry.timestamp)),
            );
        }

        let mut rollups: Vec<RequestRollup> = requests.into_values().collect();
        rollups.sort_by_key(|r| r.first_ts);
        for rollup in rollups {
            let (project, model, usage, first_ts) =
                (rollup.project, rollup.model, rollup.usage, rollup.first_ts);
            self.fold(session, &project, &model, &usage, 1, first_ts);
        }

        session.hourly.sort_by_key(|h| h.hour);
    }

    fn fold(
        &self,
        session: &mut Session,
        project: &str,
        model: &str,
        usage: &TokenUsage,
        message_count: u64,
        ts: i64,
    ) {
        let (input, output, creation, read) = (
            usage.input_tokens,
            usage.output_tokens,
            usage.cache_creation_input_tokens,
            usage.cache_read_input_tokens,
        );

        session.totals.add_tokens(input, output, creation, read);
        session.totals.message_count += message_count;

        let project_stats = session.projects.entry(project.to_string()).or_default();
        project_stats.totals.add_tokens(input, output, creation, read);
        project_stats.totals.message_count += message_count;

        if usage.total() > 0 || message_count > 0 {
            let model_stats = session
                .model_distribution
                .entry(model.to_string())
                .or_insert_with(ModelStats::default);
            model_stats.totals.add_tokens(input, output, creation, read);
            model_stats.totals.message_count += message_count;
        }

        if usage.total() > 0 {
            let hour = ts / HOUR * HOUR;
            match session.hourly.iter_mut().find(|h| h.hour == hour) {
                Some(bucket) => bucket.tokens += usage.total(),
                None => session.hourly.push(SessionHour {
                    hour,
                    tokens: usage.total(),
                    cost: 0.0,
                }),
            }
        }
    }
}
