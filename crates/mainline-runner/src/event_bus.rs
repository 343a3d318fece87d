//! Broadcast-based event bus for pipeline observability.
//!
//! Wraps `tokio::sync::broadcast` so multiple consumers (logger, notifier
//! sinks, future dashboards) each receive their own copy of every event.
//! Slow consumers are dropped gracefully via the channel's lag mechanism.

use mainline_core::event::{EventKind, PipelineEvent};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Default channel capacity — large enough to buffer bursts of merge
/// output without back-pressuring the pipeline, small enough to bound memory.
const DEFAULT_CAPACITY: usize = 4096;

/// Central event bus for pipeline observability.
///
/// Clone-friendly via internal `Arc`. All clones share the same underlying
/// broadcast channel — calling `emit()` on any clone delivers to all
/// subscribers created from any clone.
#[derive(Clone)]
pub struct EventBus {
    tx: Arc<broadcast::Sender<PipelineEvent>>,
}

impl EventBus {
    /// Create a new event bus with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a new event bus with a specific capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx: Arc::new(tx) }
    }

    /// Emit an event to all subscribers.
    ///
    /// If no subscribers exist, the event is silently dropped.
    /// This is intentional — the bus should never block the pipeline.
    pub fn emit(&self, kind: EventKind) {
        let event = PipelineEvent::new(kind);
        // Ignore SendError (means no active receivers — that's fine)
        let _ = self.tx.send(event);
    }

    /// Subscribe to receive pipeline events.
    ///
    /// Each subscriber gets its own independent stream. If a subscriber
    /// falls behind by more than `capacity` events, it will receive a
    /// `RecvError::Lagged` on the next recv — the missed events are lost
    /// for that subscriber but the pipeline is never blocked.
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.tx.subscribe()
    }

    /// Number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
