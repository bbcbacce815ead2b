//! Monitor orchestration
//!
//! Wires the loader, caches, refresh controller and watcher into one
//! cooperative loop: a data-refresh tick drives full re-detection, file
//! events drive incremental loads and re-detection, and a persist tick
//! flushes dirty cache entries and the window history. Shutdown drains the
//! loop and attempts a final persist.

use crate::cache::{FileCache, MemoryCache};
use crate::clock::{Clock, SystemClock};
use crate::error::CoreError;
use crate::event::{DataEvent, EventBus};
use crate::loader::DataLoader;
use crate::metrics::MetricsCalculator;
use crate::models::{MonitorConfig, Plan};
use crate::parser::Parser;
use crate::pricing::PricingProvider;
use crate::refresh::RefreshController;
use crate::scanner::session_id_of;
use crate::state::StateManager;
use crate::watcher::{FileOp, FileWatcher, WatcherConfig};
use crate::window_history::WindowHistory;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Cadence of the dirty-entry/window-history persist tick.
const PERSIST_INTERVAL: Duration = Duration::from_secs(60);

/// Top-level handle owning every core component.
pub struct Monitor {
    config: MonitorConfig,
    clock: Arc<dyn Clock>,
    bus: EventBus,
    pricing: Arc<PricingProvider>,
    file_cache: Arc<FileCache>,
    memory: Arc<MemoryCache>,
    history: Arc<WindowHistory>,
    loader: DataLoader,
    refresh: RefreshController,
    state: Arc<StateManager>,
}

impl std::fmt::Debug for Monitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Monitor").finish_non_exhaustive()
    }
}

impl Monitor {
    /// Build a monitor over validated configuration with the wall clock.
    pub fn new(config: MonitorConfig) -> Result<Arc<Self>, CoreError> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Build with an injected clock (tests pin `now` through this).
    pub fn with_clock(
        config: MonitorConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Arc<Self>, CoreError> {
        config.validate()?;
        let tz = config.resolve_timezone()?;
        let concurrency = config.effective_concurrency();

        let pricing = Arc::new(PricingProvider::load(&config.cache_dir));
        let parser = Arc::new(Parser::new(concurrency));
        let file_cache = Arc::new(FileCache::new(
            config.cache_dir.clone(),
            Arc::clone(&clock),
            concurrency,
        ));
        let memory = Arc::new(MemoryCache::new(Arc::clone(&clock)));
        let history = Arc::new(WindowHistory::load(
            config.cache_dir.join("window_history.json"),
            tz,
            Arc::clone(&clock),
        ));
        let state = Arc::new(StateManager::new(Arc::clone(&clock)));

        let plan = Plan::named(&config.plan, config.custom_limit_tokens);
        let metrics = MetricsCalculator::new(Arc::clone(&pricing), plan, Arc::clone(&clock));

        let loader = DataLoader::new(
            config.clone(),
            parser,
            Arc::clone(&file_cache),
            Arc::clone(&memory),
            Arc::clone(&clock),
        );
        let refresh = RefreshController::new(
            Arc::clone(&memory),
            Arc::clone(&history),
            Arc::clone(&state),
            metrics,
            config.clone(),
            Arc::clone(&clock),
        );

        Ok(Arc::new(Self {
            config,
            clock,
            bus: EventBus::default_capacity(),
            pricing,
            file_cache,
            memory,
            history,
            loader,
            refresh,
            state,
        }))
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn state(&self) -> &Arc<StateManager> {
        &self.state
    }

    pub fn memory(&self) -> &Arc<MemoryCache> {
        &self.memory
    }

    pub fn pricing(&self) -> &Arc<PricingProvider> {
        &self.pricing
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Preload the disk cache, load every transcript, and run the first
    /// detection. Called once before entering the loop (or the batch
    /// reporter's single pass).
    pub async fn bootstrap(&self) -> crate::loader::LoadSummary {
        let preloaded = Arc::clone(&self.file_cache).preload().await;
        debug!(preloaded, "File cache preloaded");

        let summary = self.loader.load_all().await;
        let sessions = self.refresh.refresh_full().await;
        info!(
            scanned = summary.scanned,
            cache_hits = summary.cache_hits,
            parsed = summary.parsed,
            sessions = sessions.len(),
            "Initial load complete"
        );
        self.bus.publish(DataEvent::RefreshCompleted {
            full: true,
            sessions: sessions.len(),
        });
        summary
    }

    /// Run the orchestration loop until `shutdown` flips to true.
    ///
    /// Multiplexes the data-refresh tick, the persist tick and the watcher
    /// stream; each arm is serialized behind the refresh mutex where it
    /// re-detects.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let watcher = match FileWatcher::start(
            std::slice::from_ref(&self.config.data_dir),
            WatcherConfig::default(),
        ) {
            Ok((watcher, rx)) => Some((watcher, rx)),
            Err(e) => {
                warn!(error = %e, "File watcher unavailable, relying on periodic refresh");
                self.bus.publish(DataEvent::WatcherError(e.to_string()));
                None
            }
        };
        let (watcher, mut file_events) = match watcher {
            Some((w, rx)) => (Some(w), rx),
            None => {
                let (_tx, rx) = tokio::sync::mpsc::channel(1);
                (None, rx)
            }
        };

        let mut refresh_tick = tokio::time::interval(self.config.data_refresh_interval);
        refresh_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut persist_tick = tokio::time::interval(PERSIST_INTERVAL);
        persist_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = refresh_tick.tick() => {
                    let paths = self.loader.scan_recent_files();
                    let changed_ids: Vec<String> = self
                        .loader
                        .identify_changed_files(&paths)
                        .iter()
                        .map(|p| session_id_of(p))
                        .collect();
                    self.loader.load(paths).await;
                    let sessions = self.refresh.refresh_data(&changed_ids).await;
                    self.bus.publish(DataEvent::RefreshCompleted {
                        full: changed_ids.is_empty(),
                        sessions: sessions.len(),
                    });
                }
                _ = persist_tick.tick() => {
                    let persisted = self.persist_dirty().await;
                    if persisted > 0 {
                        self.bus.publish(DataEvent::CachePersisted(persisted));
                    }
                    if let Err(e) = self.history.save() {
                        warn!(error = %e, "Failed to save window history");
                    }
                }
                Some(event) = file_events.recv() => {
                    let session_id = session_id_of(&event.path);
                    debug!(session_id, op = ?event.op, "Transcript changed");

                    let sessions = match event.op {
                        FileOp::Remove => {
                            self.memory.delete(&session_id);
                            self.refresh.refresh_full().await
                        }
                        _ => {
                            // cache validation decides hydrate vs reparse
                            self.loader.load(vec![event.path.clone()]).await;
                            self.refresh.refresh_incremental(&[session_id.clone()]).await
                        }
                    };
                    self.bus.publish(DataEvent::SessionFileChanged(session_id));
                    self.bus.publish(DataEvent::RefreshCompleted {
                        full: matches!(event.op, FileOp::Remove),
                        sessions: sessions.len(),
                    });
                }
                changed = shutdown.changed() => {
                    // a dropped sender also ends the loop
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        if let Some(watcher) = watcher {
            watcher.stop().await;
        }
        self.shutdown_flush().await;
        info!("Monitor loop drained");
    }

    /// Persist dirty memory entries back through the file cache.
    pub async fn persist_dirty(&self) -> usize {
        let dirty = self.memory.dirty_entries();
        if dirty.is_empty() {
            return 0;
        }

        let mut persisted = Vec::new();
        for (session_id, data) in dirty {
            match self.file_cache.set(&session_id, (*data).clone()).await {
                Ok(_) => persisted.push(session_id),
                Err(e) => warn!(session_id, error = %e, "Failed to persist cache entry"),
            }
        }
        self.memory.mark_persisted(&persisted);
        persisted.len()
    }

    /// Final persist attempted on every exit path.
    pub async fn shutdown_flush(&self) {
        let persisted = self.persist_dirty().await;
        if let Err(e) = self.history.save() {
            warn!(error = %e, "Failed to save window history on shutdown");
        }
        debug!(persisted, "Shutdown flush complete");
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::fingerprint::FileInfo;
    use std::io::Write;

    fn write_transcript(dir: &std::path::Path, name: &str, lines: &[String]) {
        let mut file = std::fs::File::create(dir.join(name)).unwrap();
        for line in lines {
            writeln!(file, "{}", line).unwrap();
        }
    }

    fn assistant_line(ts: &str, request: &str, tokens: u64) -> String {
        format!(
            r#"{{"type":"assistant","timestamp":"{ts}","requestId":"{request}","sessionId":"s","message":{{"id":"m-{request}","model":"claude-sonnet-4-5","usage":{{"input_tokens":{tokens},"output_tokens":5}}}}}}"#
        )
    }

    #[tokio::test]
    async fn test_bootstrap_detects_sessions_end_to_end() {
        let data_dir = tempfile::tempdir().unwrap();
        let cache_dir = tempfile::tempdir().unwrap();
        write_transcript(
            data_dir.path(),
            "s1.jsonl",
            &[
                assistant_line("2024-01-15T10:05:00Z", "r1", 100),
                assistant_line("2024-01-15T10:45:00Z", "r2", 200),
            ],
        );

        let mtime = FileInfo::stat(&data_dir.path().join("s1.jsonl"))
            .unwrap()
            .mod_time;
        let config = MonitorConfig {
            data_dir: data_dir.path().to_path_buf(),
            cache_dir: cache_dir.path().to_path_buf(),
            timeline_mode: crate::models::TimelineMode::Full,
            ..Default::default()
        };
        let monitor = Monitor::with_clock(config, FixedClock::at(mtime + 60)).unwrap();

        let summary = monitor.bootstrap().await;
        assert_eq!(summary.parsed, 1);

        let sessions = monitor.state().sessions_for_display();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].totals.input_tokens, 300);
        assert_eq!(sessions[0].totals.message_count, 2);
    }

    #[tokio::test]
    async fn test_invalid_config_is_fatal() {
        let config = MonitorConfig {
            data_dir: "/nonexistent/ccmeter-data".into(),
            ..Default::default()
        };
        let err = Monitor::new(config).unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_persist_dirty_flushes_and_clears_flags() {
        let data_dir = tempfile::tempdir().unwrap();
        let cache_dir = tempfile::tempdir().unwrap();
        write_transcript(
            data_dir.path(),
            "s1.jsonl",
            &[assistant_line("2024-01-15T10:05:00Z", "r1", 100)],
        );

        let mtime = FileInfo::stat(&data_dir.path().join("s1.jsonl"))
            .unwrap()
            .mod_time;
        let config = MonitorConfig {
            data_dir: data_dir.path().to_path_buf(),
            cache_dir: cache_dir.path().to_path_buf(),
            timeline_mode: crate::models::TimelineMode::Full,
            ..Default::default()
        };
        let monitor = Monitor::with_clock(config, FixedClock::at(mtime + 60)).unwrap();
        monitor.bootstrap().await;

        assert_eq!(monitor.persist_dirty().await, 1);
        assert_eq!(monitor.persist_dirty().await, 0);
        assert!(cache_dir.path().join("s1.json").exists());
    }

    #[tokio::test]
    async fn test_shutdown_flush_writes_window_history() {
        let data_dir = tempfile::tempdir().unwrap();
        let cache_dir = tempfile::tempdir().unwrap();
        write_transcript(
            data_dir.path(),
            "s1.jsonl",
            &[assistant_line("2024-01-15T10:05:00Z", "r1", 100)],
        );

        let mtime = FileInfo::stat(&data_dir.path().join("s1.jsonl"))
            .unwrap()
            .mod_time;
        let config = MonitorConfig {
            data_dir: data_dir.path().to_path_buf(),
            cache_dir: cache_dir.path().to_path_buf(),
            timeline_mode: crate::models::TimelineMode::Full,
            ..Default::default()
        };
        let monitor = Monitor::with_clock(config, FixedClock::at(mtime + 60)).unwrap();
        monitor.bootstrap().await;
        monitor.shutdown_flush().await;

        assert!(cache_dir.path().join("window_history.json").exists());
    }
}
