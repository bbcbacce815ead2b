//! Application state and key handling for the live view.

use ccmeter_core::event::DataEvent;
use ccmeter_core::models::Session;
use ccmeter_core::Monitor;
use crossterm::event::{KeyCode, KeyModifiers};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Sort order for the session table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortMode {
    #[default]
    StartTime,
    Tokens,
    Cost,
}

impl SortMode {
    pub fn next(self) -> Self {
        match self {
            SortMode::StartTime => SortMode::Tokens,
            SortMode::Tokens => SortMode::Cost,
            SortMode::Cost => SortMode::StartTime,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SortMode::StartTime => "start",
            SortMode::Tokens => "tokens",
            SortMode::Cost => "cost",
        }
    }
}

/// Live view state.
pub struct App {
    monitor: Arc<Monitor>,
    events: broadcast::Receiver<DataEvent>,
    pub sessions: Vec<Arc<Session>>,
    pub selected: usize,
    pub sort: SortMode,
    pub paused: bool,
    pub should_quit: bool,
    pub status: String,
}

impl App {
    pub fn new(monitor: Arc<Monitor>) -> Self {
        let events = monitor.event_bus().subscribe();
        let sessions = monitor.state().sessions_for_display();
        let mut app = Self {
            monitor,
            events,
            sessions,
            selected: 0,
            sort: SortMode::default(),
            paused: false,
            should_quit: false,
            status: "loading".to_string(),
        };
        app.sort_sessions();
        app
    }

    pub fn ui_refresh_rate(&self) -> Duration {
        self.monitor.config().ui_refresh_rate
    }

    pub fn now_unix(&self) -> i64 {
        self.monitor.clock().now_unix()
    }

    pub fn plan_name(&self) -> &str {
        &self.monitor.config().plan
    }

    /// Drain pending data events; refresh the slice unless paused.
    pub fn poll_events(&mut self) {
        let mut refreshed = false;
        while let Ok(event) = self.events.try_recv() {
            match event {
                DataEvent::RefreshCompleted { full, sessions } => {
                    refreshed = true;
                    self.status = format!(
                        "{} refresh, {} sessions",
                        if full { "full" } else { "incremental" },
                        sessions
                    );
                }
                DataEvent::SessionFileChanged(id) => {
                    self.status = format!("activity in {id}");
                }
                DataEvent::CachePersisted(count) => {
                    self.status = format!("persisted {count} entries");
                }
                DataEvent::WatcherError(message) => {
                    self.status = format!("watcher error: {message}");
                }
            }
        }

        if refreshed && !self.paused {
            self.reload_sessions();
        }
    }

    fn reload_sessions(&mut self) {
        self.sessions = self.monitor.state().sessions_for_display();
        self.sort_sessions();
        if self.selected >= self.sessions.len() {
            self.selected = self.sessions.len().saturating_sub(1);
        }
    }

    fn sort_sessions(&mut self) {
        match self.sort {
            SortMode::StartTime => self.sessions.sort_by_key(|s| s.start_time),
            SortMode::Tokens => self
                .sessions
                .sort_by(|a, b| b.totals.total_tokens.cmp(&a.totals.total_tokens)),
            SortMode::Cost => self.sessions.sort_by(|a, b| {
                b.totals
                    .total_cost
                    .partial_cmp(&a.totals.total_cost)
                    .unwrap_or(std::cmp::Ordering::Equal)
            }),
        }
    }

    /// Handle one key press; returns true when consumed.
    pub fn handle_key(&mut self, code: KeyCode, modifiers: KeyModifiers) -> bool {
        match (code, modifiers) {
            (KeyCode::Char('q'), _) | (KeyCode::Esc, _) => {
                self.should_quit = true;
                true
            }
            (KeyCode::Char('c'), KeyModifiers::CONTROL) => {
                self.should_quit = true;
                true
            }
            (KeyCode::Char('p'), _) => {
                self.paused = !self.paused;
                self.status = if self.paused {
                    "paused".to_string()
                } else {
                    self.reload_sessions();
                    "resumed".to_string()
                };
                true
            }
            (KeyCode::Char('s'), _) => {
                self.sort = self.sort.next();
                self.sort_sessions();
                true
            }
            (KeyCode::Up, _) | (KeyCode::Char('k'), _) => {
                self.selected = self.selected.saturating_sub(1);
                true
            }
            (KeyCode::Down, _) | (KeyCode::Char('j'), _) => {
                if self.selected + 1 < self.sessions.len() {
                    self.selected += 1;
                }
                true
            }
            _ => false,
        }
    }

    /// The session under the cursor.
    pub fn selected_session(&self) -> Option<&Arc<Session>> {
        self.sessions.get(self.selected)
    }

    /// The currently active session, if any.
    pub fn active_session(&self) -> Option<&Arc<Session>> {
        self.sessions.iter().find(|s| s.is_active)
    }
}
