//! Fan-out of applied events to other subscribers.
//!
//! Publishing is fire-and-forget from the actor's point of view: a slow or
//! absent subscriber never delays command processing.

use tokio::sync::broadcast;

use crate::event::ThingEvent;

/// Capacity of the default broadcast channel.
///
/// A subscriber that falls behind by more than this many events receives
/// [`broadcast::error::RecvError::Lagged`] and skips to the newest event.
pub const DEFAULT_PUBLISH_CAPACITY: usize = 1024;

/// Sink for events that were persisted and applied.
pub trait EventPublisher: Send + Sync + 'static {
    /// Hand `event` to the bus. Must not block.
    ///
    /// # Arguments
    ///
    /// * `topic` - Event-type prefix the event is published under.
    /// * `event` - The applied event.
    /// * `require_ack` - Whether the bus should confirm delivery to its
    ///   subscribers; the actor never waits for that confirmation.
    fn publish(&self, topic: &str, event: &ThingEvent, require_ack: bool);
}

/// One published event as seen by a subscriber.
#[derive(Debug, Clone, PartialEq)]
pub struct Publication {
    pub topic: String,
    pub event: ThingEvent,
    pub require_ack: bool,
}

/// In-process publisher backed by a `tokio` broadcast channel.
#[derive(Debug, Clone)]
pub struct BroadcastPublisher {
    tx: broadcast::Sender<Publication>,
}

impl BroadcastPublisher {
    /// Create a publisher whose channel buffers `capacity` events.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Receive every event published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Publication> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastPublisher {
    fn default() -> Self {
        Self::new(DEFAULT_PUBLISH_CAPACITY)
    }
}

impl EventPublisher for BroadcastPublisher {
    fn publish(&self, topic: &str, event: &ThingEvent, require_ack: bool) {
        let publication = Publication {
            topic: topic.to_owned(),
            event: event.clone(),
            require_ack,
        };
        // Only fails when nobody is subscribed.
        if self.tx.send(publication).is_err() {
            tracing::trace!(
                thing_id = %event.thing_id,
                revision = event.revision,
                "no subscribers for published event"
            );
        }
    }
}
