//! Broadcast channel for filter change events.

use tokio::sync::broadcast;

use crate::filters::ChangeEvent;

const DEFAULT_CAPACITY: usize = 256;

/// Owned event topic. Publishers and subscribers share it by reference;
/// nothing is registered globally.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ChangeEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn publish(&self, event: ChangeEvent) {
        tracing::debug!(
            kind = %event.kind,
            filter_id = %event.filter_id,
            revision = event.revision,
            subscribers = self.tx.receiver_count(),
            "Publishing filter change event"
        );
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
