//! Published session state
//!
//! Holds the session slice the UI reads, swapped atomically on refresh.
//! An empty refresh result after data has been published is treated as
//! transient, so the display never blinks to empty.

use crate::clock::Clock;
use crate::models::Session;
use parking_lot::RwLock;
use std::sync::Arc;

#[derive(Default)]
struct Inner {
    sessions: Vec<Arc<Session>>,
    previous: Vec<Arc<Session>>,
    has_published: bool,
    last_data_update: i64,
}

/// Thread-safe holder of the published session slice.
pub struct StateManager {
    inner: RwLock<Inner>,
    clock: Arc<dyn Clock>,
}

impl StateManager {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            clock,
        }
    }

    /// Publish a new slice.
    ///
    /// An empty slice is retained only before any data has been published;
    /// afterwards an empty refresh is a transient condition and the current
    /// slice stays. Readers see either the old or the new slice, never a
    /// mix.
    pub fn set_sessions(&self, new: Vec<Session>) {
        let mut inner = self.inner.write();

        if new.is_empty()
            && inner.has_published
            && (!inner.sessions.is_empty() || !inner.previous.is_empty())
        {
            inner.last_data_update = self.clock.now_unix();
            return;
        }

        inner.previous = std::mem::take(&mut inner.sessions);
        inner.sessions = new.into_iter().map(Arc::new).collect();
        inner.has_published = true;
        inner.last_data_update = self.clock.now_unix();
    }

    /// The slice to render: active if non-empty, else the previous one.
    pub fn sessions_for_display(&self) -> Vec<Arc<Session>> {
        let inner = self.inner.read();
        if !inner.sessions.is_empty() {
            inner.sessions.clone()
        } else {
            inner.previous.clone()
        }
    }

    /// The active slice, regardless of emptiness.
    pub fn current_sessions(&self) -> Vec<Arc<Session>> {
        self.inner.read().sessions.clone()
    }

    pub fn last_data_update(&self) -> i64 {
        self.inner.read().last_data_update
    }

    pub fn has_published(&self) -> bool {
        self.inner.read().has_published
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::models::WindowSource;

    fn session(start: i64) -> Session {
        Session::over_window(start, WindowSource::ContinuousActivity)
    }

    #[test]
    fn test_initial_empty_publish_is_accepted() {
        let state = StateManager::new(FixedClock::at(100));
        state.set_sessions(vec![]);
        assert!(state.has_published());
        assert!(state.sessions_for_display().is_empty());
    }

    #[test]
    fn test_display_never_regresses_to_empty() {
        let clock = FixedClock::at(100);
        let state = StateManager::new(clock.clone());
        state.set_sessions(vec![session(0)]);
        assert_eq!(state.sessions_for_display().len(), 1);

        // transient empty refresh: current slice retained
        clock.advance(10);
        state.set_sessions(vec![]);
        assert_eq!(state.sessions_for_display().len(), 1);
        assert_eq!(state.current_sessions().len(), 1);
        assert_eq!(state.last_data_update(), 110);
    }

    #[test]
    fn test_swap_moves_current_to_previous() {
        let state = StateManager::new(FixedClock::at(100));
        state.set_sessions(vec![session(0)]);
        state.set_sessions(vec![session(18_000), session(36_000)]);

        assert_eq!(state.current_sessions().len(), 2);
        assert_eq!(state.sessions_for_display().len(), 2);
    }

    #[test]
    fn test_display_falls_back_to_previous() {
        let state = StateManager::new(FixedClock::at(100));
        state.set_sessions(vec![session(0)]);
        // a second publish with content, then a transient empty
        state.set_sessions(vec![session(18_000)]);
        state.set_sessions(vec![]);
        let display = state.sessions_for_display();
        assert_eq!(display.len(), 1);
        assert_eq!(display[0].start_time, 18_000);
    }
}
