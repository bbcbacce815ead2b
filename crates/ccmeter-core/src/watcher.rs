//! Filesystem change notification
//!
//! Wraps notify into an asynchronous stream of transcript [`FileEvent`]s.
//! Rapid write bursts to one path are coalesced within a debounce window so
//! a streaming transcript append becomes one event.

use crate::error::CoreError;
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace};

/// What happened to a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOp {
    Create,
    Write,
    Remove,
    Rename,
}

/// One coalesced filesystem event on a transcript file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEvent {
    pub path: PathBuf,
    pub op: FileOp,
}

/// Configuration for the file watcher
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Per-path coalescing window.
    pub debounce: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(500),
        }
    }
}

/// File watcher monitoring transcript roots.
pub struct FileWatcher {
    /// Notify watcher instance; kept alive for the watch duration.
    _watcher: RecommendedWatcher,
    shutdown_tx: mpsc::Sender<()>,
}

impl FileWatcher {
    /// Watch `roots` recursively, returning the debounced event stream.
    pub fn start(
        roots: &[PathBuf],
        config: WatcherConfig,
    ) -> Result<(Self, mpsc::Receiver<FileEvent>), CoreError> {
        let (raw_tx, mut raw_rx) = mpsc::channel::<notify::Result<Event>>(256);
        let (event_tx, event_rx) = mpsc::channel::<FileEvent>(256);
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let mut watcher = RecommendedWatcher::new(
            move |res| {
                let _ = raw_tx.blocking_send(res);
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )
        .map_err(|e| CoreError::Watch {
            message: "failed to create watcher".to_string(),
            source: Some(e),
        })?;

        for root in roots {
            watcher
                .watch(root, RecursiveMode::Recursive)
                .map_err(|e| CoreError::Watch {
                    message: format!("failed to watch {}", root.display()),
                    source: Some(e),
                })?;
            debug!(path = %root.display(), "Watching path");
        }
        info!(roots = roots.len(), "File watcher started");

        let debounce = config.debounce;
        tokio::spawn(async move {
            let mut last_emitted: HashMap<PathBuf, Instant> = HashMap::new();

            loop {
                tokio::select! {
                    Some(result) = raw_rx.recv() => {
                        match result {
                            Ok(event) => {
                                for file_event in translate(&event) {
                                    let now = Instant::now();
                                    if let Some(last) = last_emitted.get(&file_event.path) {
                                        if now.duration_since(*last) < debounce
                                            && file_event.op == FileOp::Write
                                        {
                                            trace!(path = %file_event.path.display(), "Debouncing event");
                                            continue;
                                        }
                                    }
                                    last_emitted.insert(file_event.path.clone(), now);
                                    if event_tx.send(file_event).await.is_err() {
                                        return;
                                    }
                                }
                            }
                            Err(e) => {
                                error!(error = %e, "File watcher error");
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("File watcher shutting down");
                        return;
                    }
                }
            }
        });

        Ok((
            Self {
                _watcher: watcher,
                shutdown_tx,
            },
            event_rx,
        ))
    }

    /// Stop the watcher's event task.
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

/// Translate a raw notify event into transcript file events.
fn translate(event: &Event) -> Vec<FileEvent> {
    let op = match event.kind {
        EventKind::Create(_) => FileOp::Create,
        EventKind::Modify(notify::event::ModifyKind::Name(_)) => FileOp::Rename,
        EventKind::Modify(_) => FileOp::Write,
        EventKind::Remove(_) => FileOp::Remove,
        _ => return Vec::new(),
    };

    event
        .paths
        .iter()
        .filter(|p| is_transcript(p))
        .map(|p| FileEvent {
            path: p.clone(),
            op,
        })
        .collect()
}

fn is_transcript(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("jsonl"))
        .unwrap_or(false)
}
