//! Synchronous publish/subscribe with a broadcast feed.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::RwLock;

use tokio::sync::broadcast;
use tracing::error;

use super::types::{Event, EventEnvelope};

/// A registered event consumer.
///
/// Handlers run synchronously on the publisher's task; slow work must be
/// offloaded by the handler itself.
pub trait EventHandler: Send + Sync {
    /// Event types this handler wants, or `None` for a wildcard subscription.
    fn event_types(&self) -> Option<Vec<&'static str>>;

    /// Handle one event. Errors are logged and never reach the publisher.
    fn handle(&self, envelope: &EventEnvelope) -> Result<(), Box<dyn std::error::Error>>;
}

/// The process-wide event bus.
///
/// Cheap to share behind an `Arc`. Publication fans out to every matching
/// registered handler and to the broadcast feed that backs the WebSocket
/// channel.
pub struct EventBus {
    handlers: RwLock<Vec<Box<dyn EventHandler>>>,
    feed: broadcast::Sender<EventEnvelope>,
}

impl EventBus {
    pub fn new(feed_capacity: usize) -> Self {
        let (feed, _) = broadcast::channel(feed_capacity);
        Self {
            handlers: RwLock::new(Vec::new()),
            feed,
        }
    }

    /// Register a handler. Intended for composition time; registration after
    /// publishing has started is safe but unsynchronized with in-flight
    /// publishes.
    pub fn register(&self, handler: Box<dyn EventHandler>) {
        self.handlers.write().unwrap().push(handler);
    }

    /// Subscribe to the raw envelope feed (used by the WebSocket forwarder).
    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.feed.subscribe()
    }

    /// Publish an event to all subscribers.
    ///
    /// Handler errors and panics are contained here; publishers never observe
    /// them.
    pub fn publish(&self, event: Event) {
        let envelope = EventEnvelope::new(event);

        // No receivers is fine.
        let _ = self.feed.send(envelope.clone());

        let handlers = self.handlers.read().unwrap();
        for handler in handlers.iter() {
            let wants = match handler.event_types() {
                None => true,
                Some(types) => types.contains(&envelope.event.event_type()),
            };
            if !wants {
                continue;
            }
            let outcome = catch_unwind(AssertUnwindSafe(|| handler.handle(&envelope)));
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(
                        event = envelope.event.event_type(),
                        error = %e,
                        "event handler failed"
                    );
                }
                Err(_) => {
                    error!(
                        event = envelope.event.event_type(),
                        "event handler panicked"
                    );
                }
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
