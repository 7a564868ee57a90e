//! Flush events
//!
//! Every `EntityManager` owns one broadcast channel. Events are advisory:
//! the result of `flush()` is still returned to its callers, and an event
//! sent while nobody is subscribed is dropped.

use crate::core::UowError;
use crate::flusher::FlushReport;
use tokio::sync::broadcast;

/// How a transactional flush handled an oversized batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowDecision {
    /// The whole batch was handed to the fallback flusher
    Fallback,
    /// The batch was applied as sequential transactions
    Chunk,
}

#[derive(Debug, Clone)]
pub enum FlushEvent {
    /// A flush cycle succeeded and tracked state advanced
    Flushed(FlushReport),

    /// A flush cycle failed; carries the error returned to callers
    Error(UowError),

    /// A transactional flush exceeded its item limit and took `decision`
    LimitExceeded {
        attempted: usize,
        limit: usize,
        decision: OverflowDecision,
    },
}

impl FlushEvent {
    /// Get the event type name
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Flushed(_) => "flushed",
            Self::Error(_) => "error",
            Self::LimitExceeded { .. } => "limitExceeded",
        }
    }
}

/// Sending half of a manager's event channel.
#[derive(Debug, Clone)]
pub struct FlushEvents {
    sender: broadcast::Sender<FlushEvent>,
}

impl FlushEvents {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FlushEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: FlushEvent) {
        // No receivers is not an error
        let _ = self.sender.send(event);
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
