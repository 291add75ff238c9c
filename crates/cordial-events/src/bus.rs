//! Broadcast bus for domain events.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{trace, warn};

use crate::event::GatewayEvent;
use crate::subscriber::SubscriberRegistry;

/// Default channel capacity for the event bus.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Fan-out of [`GatewayEvent`]s to async receivers and sync subscribers.
///
/// Clones share the channel and the subscriber registry.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Arc<GatewayEvent>>,
    registry: Arc<SubscriberRegistry>,
    capacity: usize,
}

impl EventBus {
    /// Create a bus with the default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a bus with the given capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            registry: Arc::new(SubscriberRegistry::new()),
            capacity,
        }
    }

    /// Publish an event.
    ///
    /// Async receivers are fed first, then synchronous subscribers run
    /// inline. Returns the number of async receivers reached.
    pub fn publish(&self, event: GatewayEvent) -> usize {
        let event = Arc::new(event);
        let event_type = event.event_type();

        let count = self.sender.send(Arc::clone(&event)).unwrap_or(0);
        trace!(event_type, receiver_count = count, "Event published");

        self.registry.notify(&event);
        count
    }

    /// Receive every event published from now on.
    #[must_use]
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
            types: None,
        }
    }

    /// Receive only events whose [`event_type`](GatewayEvent::event_type)
    /// is in `types`.
    #[must_use]
    pub fn subscribe_types(&self, types: &[&'static str]) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
            types: Some(types.to_vec()),
        }
    }

    /// The synchronous subscriber registry.
    #[must_use]
    pub fn registry(&self) -> &SubscriberRegistry {
        &self.registry
    }

    /// Async receivers plus synchronous subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender
            .receiver_count()
            .saturating_add(self.registry.len())
    }

    /// Channel capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Async end of an [`EventBus`].
pub struct EventReceiver {
    receiver: broadcast::Receiver<Arc<GatewayEvent>>,
    types: Option<Vec<&'static str>>,
}

impl EventReceiver {
    fn matches(&self, event: &GatewayEvent) -> bool {
        self.types
            .as_ref()
            .is_none_or(|types| types.contains(&event.event_type()))
    }

    /// Wait for the next matching event.
    ///
    /// Returns `None` once every bus clone is dropped. A lagging receiver
    /// logs the number of skipped events and keeps going.
    pub async fn recv(&mut self) -> Option<Arc<GatewayEvent>> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if self.matches(&event) => return Some(event),
                Ok(_) => {},
                Err(broadcast::error::RecvError::Lagged(count)) => {
                    warn!(skipped = count, "Event receiver lagged, events dropped");
                },
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Take the next matching event if one is queued.
    pub fn try_recv(&mut self) -> Option<Arc<GatewayEvent>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) if self.matches(&event) => return Some(event),
                Ok(_) => {},
                Err(broadcast::error::TryRecvError::Lagged(count)) => {
                    warn!(skipped = count, "Event receiver lagged, events dropped");
                },
                Err(
                    broadcast::error::TryRecvError::Empty | broadcast::error::TryRecvError::Closed,
                ) => return None,
            }
        }
    }
}
