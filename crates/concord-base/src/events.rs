//! Lifecycle events of a base.

use tokio::sync::broadcast;

/// Capacity of the event channel. Slow subscribers see `Lagged`.
const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BaseEvent {
    /// A drain changed the linearized or applied state.
    Update,
    /// The apply callback interrupted a batch. The base no longer advances.
    Interrupt { reason: Option<String> },
    /// A fatal error halted the base.
    Error { message: String },
    Writable,
    Unwritable,
    IsIndexer,
    IsNonIndexer,
    /// A checkpoint was adopted.
    FastForward { from: u64, to: u64 },
    /// Something went wrong that did not stop the base.
    Warning { message: String },
}

#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<BaseEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BaseEvent> {
        self.sender.subscribe()
    }

    /// Whether anyone is listening.
    pub fn has_observers(&self) -> bool {
        self.sender.receiver_count() > 0
    }

    pub fn emit(&self, event: BaseEvent) {
        tracing::trace!(?event, "event");
        // No subscriber is not an error.
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
