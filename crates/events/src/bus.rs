//! Event bus abstraction for decoupled event emission.
//!
//! The orchestrator only ever talks to `dyn EventBus`, so it can be driven
//! from tests, a headless CLI, or a UI bridge without changes.

use crate::ScanEvent;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;

/// Trait for emitting events to subscribers.
///
/// Implementations must not block: `emit` is called from the session actor
/// and from the audio writer task.
pub trait EventBus: Send + Sync {
    fn emit(&self, event: ScanEvent);
}

/// Type alias for shared event bus reference.
pub type EventBusRef = Arc<dyn EventBus>;

/// In-memory event bus for testing.
///
/// Captures all emitted events for later inspection.
#[derive(Default)]
pub struct InMemoryEventBus {
    events: Mutex<Vec<ScanEvent>>,
}

impl InMemoryEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ScanEvent>> {
        self.events.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn events(&self) -> Vec<ScanEvent> {
        self.lock().clone()
    }

    /// Get events published on a specific topic.
    pub fn events_for(&self, topic: &str) -> Vec<ScanEvent> {
        self.lock()
            .iter()
            .filter(|e| e.topic() == topic)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl EventBus for InMemoryEventBus {
    fn emit(&self, event: ScanEvent) {
        self.lock().push(event);
    }
}

/// Forwards events into an unbounded channel.
///
/// Used when a consumer wants to `await` events as they arrive.
#[derive(Clone)]
pub struct ChannelEventBus {
    tx: mpsc::UnboundedSender<ScanEvent>,
}

impl ChannelEventBus {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ScanEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventBus for ChannelEventBus {
    fn emit(&self, event: ScanEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("event receiver dropped");
        }
    }
}

/// No-op event bus that discards all events.
pub struct NullEventBus;

impl EventBus for NullEventBus {
    fn emit(&self, _event: ScanEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{event_names, StatusKind};

    #[test]
    fn test_in_memory_event_bus() {
        let bus = InMemoryEventBus::new();

        bus.emit(ScanEvent::Paused);
        bus.emit(ScanEvent::status(StatusKind::Started, None));
        bus.emit(ScanEvent::Resumed);
        bus.emit(ScanEvent::Paused);

        assert_eq!(bus.len(), 4);
        assert_eq!(bus.events_for(event_names::PAUSED).len(), 2);
        assert_eq!(bus.events_for(event_names::STATUS).len(), 1);
        assert_eq!(bus.events_for(event_names::EXPORTED).len(), 0);

        bus.clear();
        assert!(bus.is_empty());
    }

    #[tokio::test]
    async fn test_channel_event_bus_preserves_order() {
        let (bus, mut rx) = ChannelEventBus::new();
        bus.emit(ScanEvent::Paused);
        bus.emit(ScanEvent::Resumed);

        assert_eq!(rx.recv().await, Some(ScanEvent::Paused));
        assert_eq!(rx.recv().await, Some(ScanEvent::Resumed));
    }

    #[test]
    fn test_channel_event_bus_tolerates_dropped_receiver() {
        let (bus, rx) = ChannelEventBus::new();
        drop(rx);
        bus.emit(ScanEvent::Paused);
    }

    #[test]
    fn test_null_event_bus() {
        NullEventBus.emit(ScanEvent::Paused);
    }
}
