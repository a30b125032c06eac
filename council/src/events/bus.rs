//! Broadcast fan-out for turn events.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::trace;

use super::CouncilEvent;

pub const EVENT_CAPACITY: usize = 256;

pub type SharedEventBus = Arc<EventBus>;

/// Fan-out over a tokio broadcast channel. Publishing with no subscribers
/// is a no-op, and a slow subscriber lags without blocking the pipeline.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CouncilEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(EVENT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CouncilEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: CouncilEvent) {
        trace!(turn_id = %event.turn_id, "publishing event");
        let _ = self.sender.send(event);
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
