//! Scan -> validate -> parse-or-hydrate pipeline
//!
//! Routes every discovered transcript either through cache hydration (when
//! its cached document still validates) or through the parser/aggregator
//! into both cache tiers.

use crate::cache::{FileCache, MemoryCache};
use crate::clock::Clock;
use crate::limits::LimitRegistry;
use crate::models::{
    AggregatedData, MonitorConfig, TimelineMode, CACHE_SCHEMA_VERSION,
};
use crate::parser::Parser;
use crate::scanner::{scan_transcripts, session_id_of};
use crate::{aggregator, fingerprint::FileInfo};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

/// 48-hour lookback of `TimelineMode::Recent`.
const RECENT_WINDOW_SECS: i64 = 48 * 3_600;

/// Outcome counters of one load pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoadSummary {
    pub scanned: usize,
    pub cache_hits: usize,
    pub parsed: usize,
    pub failed: usize,
}

pub struct DataLoader {
    config: MonitorConfig,
    parser: Arc<Parser>,
    file_cache: Arc<FileCache>,
    memory: Arc<MemoryCache>,
    limits: LimitRegistry,
    clock: Arc<dyn Clock>,
}

impl DataLoader {
    pub fn new(
        config: MonitorConfig,
        parser: Arc<Parser>,
        file_cache: Arc<FileCache>,
        memory: Arc<MemoryCache>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            parser,
            file_cache,
            memory,
            limits: LimitRegistry::new(),
            clock,
        }
    }

    /// Discover transcripts, bounded by the configured timeline mode.
    pub fn scan_recent_files(&self) -> Vec<PathBuf> {
        let all = scan_transcripts(&self.config.data_dir);
        let cutoff = match self.config.timeline_mode {
            TimelineMode::Full => None,
            TimelineMode::Recent => Some(self.clock.now_unix() - RECENT_WINDOW_SECS),
            TimelineMode::Optimized => {
                if self.config.data_retention_hours == 0 {
                    None
                } else {
                    Some(
                        self.clock.now_unix()
                            - self.config.data_retention_hours as i64 * 3_600,
                    )
                }
            }
        };

        match cutoff {
            None => all,
            Some(cutoff) => all
                .into_iter()
                .filter(|p| {
                    FileInfo::stat(p)
                        .map(|info| info.mod_time > cutoff)
                        .unwrap_or(false)
                })
                .collect(),
        }
    }

    /// Full load: scan, then route each transcript.
    pub async fn load_all(&self) -> LoadSummary {
        let paths = self.scan_recent_files();
        self.load(paths).await
    }

    /// Batch-validate the given transcripts against the file cache, hydrate
    /// hits into the memory cache, and parse the rest.
    pub async fn load(&self, paths: Vec<PathBuf>) -> LoadSummary {
        let mut summary = LoadSummary {
            scanned: paths.len(),
            ..Default::default()
        };

        let session_ids: Vec<String> = paths.iter().map(|p| session_id_of(p)).collect();
        let outcomes = self.file_cache.batch_validate(&session_ids).await;

        let mut to_parse = Vec::new();
        for (path, session_id) in paths.into_iter().zip(session_ids.into_iter()) {
            let valid = outcomes.get(&session_id).map(|o| o.valid).unwrap_or(false);
            if valid {
                let lookup = self.file_cache.get(&session_id).await;
                if let Some(data) = lookup.data {
                    self.memory.set_clean(&session_id, data);
                    summary.cache_hits += 1;
                    continue;
                }
                // validated a moment ago but gone now: reparse
            }
            if let Some(outcome) = outcomes.get(&session_id) {
                debug!(session_id, reason = ?outcome.miss_reason, "Cache miss");
            }
            to_parse.push(path);
        }

        let mut rx = Arc::clone(&self.parser).parse_files(to_parse);
        while let Some(parsed) = rx.recv().await {
            match parsed.records {
                Ok(records) => {
                    let session_id = session_id_of(&parsed.path);
                    let project_name = aggregator::extract_project_name(&parsed.path);
                    let hourly = aggregator::aggregate_records(&records, &project_name);
                    let limit_messages: Vec<_> = self
                        .limits
                        .scan_records(&records)
                        .iter()
                        .map(|l| l.to_cached())
                        .collect();

                    let data = AggregatedData {
                        version: CACHE_SCHEMA_VERSION,
                        session_id: session_id.clone(),
                        file_path: parsed.path.clone(),
                        project_name,
                        hourly_stats: hourly,
                        // stamped from the live file inside `set`
                        file_meta: Default::default(),
                        limit_messages,
                    };

                    match self.file_cache.set(&session_id, data).await {
                        Ok(stored) => {
                            self.memory.set(&session_id, stored, Some(records));
                            summary.parsed += 1;
                        }
                        Err(e) => {
                            warn!(session_id, error = %e, "Failed to persist cache document");
                            summary.failed += 1;
                        }
                    }
                }
                Err(e) => {
                    warn!(path = %parsed.path.display(), error = %e, "Failed to parse transcript");
                    summary.failed += 1;
                }
            }
        }

        debug!(?summary, "Load pass complete");
        summary
    }

    /// Paths whose session is absent from the memory cache or still dirty.
    pub fn identify_changed_files(&self, paths: &[PathBuf]) -> Vec<PathBuf> {
        paths
            .iter()
            .filter(|p| {
                let session_id = session_id_of(p);
                !self.memory.contains(&session_id) || self.memory.is_dirty(&session_id)
            })
            .cloned()
            .collect()
    }
}
