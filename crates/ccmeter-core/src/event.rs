//! Event bus for ccmeter using tokio::broadcast
//!
//! Provides a publish-subscribe mechanism for refresh and watcher updates.
//! The TUI subscribes for redraw triggers; the batch reporter ignores it.

use tokio::sync::broadcast;

/// Events emitted by the data layer
#[derive(Debug, Clone)]
pub enum DataEvent {
    /// A transcript file changed on disk (session id = filename stem)
    SessionFileChanged(String),
    /// A refresh finished and a new session slice was published
    RefreshCompleted { full: bool, sessions: usize },
    /// Dirty cache entries were persisted
    CachePersisted(usize),
    /// Watcher encountered an error
    WatcherError(String),
}

/// Event bus for broadcasting data events
///
/// Uses tokio::broadcast for multi-consumer support.
pub struct EventBus {
    sender: broadcast::Sender<DataEvent>,
}

impl EventBus {
    /// Create a new event bus with specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Create with default capacity (256 events)
    pub fn default_capacity() -> Self {
        Self::new(256)
    }

    /// Publish an event to all subscribers
    pub fn publish(&self, event: DataEvent) {
        // Ignore send errors (no subscribers)
        let _ = self.sender.send(event);
    }

    /// Subscribe to receive events
    pub fn subscribe(&self) -> broadcast::Receiver<DataEvent> {
        self.sender.subscribe()
    }

    /// Get current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::default_capacity()
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_event_bus_publish_subscribe() {
        let bus = EventBus::default_capacity();
        let mut rx = bus.subscribe();

        bus.publish(DataEvent::SessionFileChanged("abc".to_string()));
        bus.publish(DataEvent::RefreshCompleted {
            full: true,
            sessions: 3,
        });

        let event1 = rx.recv().await.unwrap();
        assert!(matches!(event1, DataEvent::SessionFileChanged(id) if id == "abc"));

        let event2 = rx.recv().await.unwrap();
        assert!(matches!(
            event2,
            DataEvent::RefreshCompleted {
                full: true,
                sessions: 3
            }
        ));
    }

    #[test]
    fn test_event_bus_no_subscribers_ok() {
        let bus = EventBus::default_capacity();
        bus.publish(DataEvent::CachePersisted(1));
    }
}
