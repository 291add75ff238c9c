//! Synchronous event subscribers.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::event::GatewayEvent;

/// Predicate deciding whether a subscriber sees an event.
pub type EventFilter = Box<dyn Fn(&GatewayEvent) -> bool + Send + Sync>;

/// Callback-style listener.
///
/// `on_event` runs on the gateway's inbound task, so it must return
/// quickly. Use an [`EventReceiver`](crate::EventReceiver) for slow work.
pub trait EventSubscriber: Send + Sync {
    /// Called for every accepted event.
    fn on_event(&self, event: &GatewayEvent);

    /// Return `false` to skip an event. Accepts everything by default.
    fn accepts(&self, event: &GatewayEvent) -> bool {
        let _ = event;
        true
    }

    /// Name used in logs.
    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        "anonymous"
    }
}

/// Handle returned by [`SubscriberRegistry::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(Uuid);

type Subscribers = HashMap<SubscriberId, Arc<dyn EventSubscriber>>;

/// Registry of synchronous subscribers, shared by every clone of a bus.
#[derive(Default)]
pub struct SubscriberRegistry {
    subscribers: RwLock<Subscribers>,
}

impl std::fmt::Debug for SubscriberRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriberRegistry")
            .field("subscriber_count", &self.len())
            .finish()
    }
}

impl SubscriberRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Subscribers> {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Subscribers> {
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a subscriber.
    pub fn register(&self, subscriber: Arc<dyn EventSubscriber>) -> SubscriberId {
        let id = SubscriberId(Uuid::new_v4());
        debug!(subscriber_name = %subscriber.name(), "Subscriber registered");
        self.write().insert(id, subscriber);
        id
    }

    /// Remove a subscriber. Returns `true` if it was registered.
    pub fn unregister(&self, id: SubscriberId) -> bool {
        self.write().remove(&id).is_some()
    }

    /// Deliver an event to every accepting subscriber.
    ///
    /// The subscriber list is copied before delivery, so a subscriber may
    /// register or unregister others from inside `on_event`. A panicking
    /// subscriber is logged and does not affect the rest.
    pub fn notify(&self, event: &GatewayEvent) {
        let snapshot: Vec<(SubscriberId, Arc<dyn EventSubscriber>)> = self
            .read()
            .iter()
            .map(|(id, sub)| (*id, Arc::clone(sub)))
            .collect();

        for (id, subscriber) in snapshot {
            if !subscriber.accepts(event) {
                continue;
            }
            trace!(
                subscriber_name = %subscriber.name(),
                event_type = event.event_type(),
                "Notifying subscriber"
            );

            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                subscriber.on_event(event);
            }));
            if result.is_err() {
                warn!(
                    subscriber_id = ?id,
                    subscriber_name = %subscriber.name(),
                    event_type = event.event_type(),
                    "Subscriber panicked"
                );
            }
        }
    }

    /// Number of registered subscribers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// `true` if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

/// Closure-backed subscriber with an optional filter.
pub struct FilterSubscriber<F>
where
    F: Fn(&GatewayEvent) + Send + Sync,
{
    name: String,
    filter: Option<EventFilter>,
    handler: F,
}

impl<F> FilterSubscriber<F>
where
    F: Fn(&GatewayEvent) + Send + Sync,
{
    /// Create a subscriber that sees every event.
    pub fn new(name: impl Into<String>, handler: F) -> Self {
        Self {
            name: name.into(),
            filter: None,
            handler,
        }
    }

    /// Only deliver events for which `filter` returns `true`.
    #[must_use]
    pub fn with_filter(mut self, filter: impl Fn(&GatewayEvent) -> bool + Send + Sync + 'static) -> Self {
        self.filter = Some(Box::new(filter));
        self
    }
}

impl<F> EventSubscriber for FilterSubscriber<F>
where
    F: Fn(&GatewayEvent) + Send + Sync,
{
    fn on_event(&self, event: &GatewayEvent) {
        (self.handler)(event);
    }

    fn accepts(&self, event: &GatewayEvent) -> bool {
        self.filter.as_ref().is_none_or(|f| f(event))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::event::EventMetadata;

    fn ready() -> GatewayEvent {
        GatewayEvent::Ready {
            metadata: EventMetadata::new("test"),
        }
    }

    fn resumed() -> GatewayEvent {
        GatewayEvent::Resumed {
            metadata: EventMetadata::new("test"),
        }
    }

    #[test]
    fn register_notify_unregister() {
        let registry = SubscriberRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let id = registry.register(Arc::new(FilterSubscriber::new("count", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })));

        registry.notify(&ready());
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        assert!(registry.unregister(id));
        registry.notify(&ready());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn filter_skips_rejected_events() {
        let registry = SubscriberRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        registry.register(Arc::new(
            FilterSubscriber::new("resumed-only", move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .with_filter(|e| e.event_type() == "resumed"),
        ));

        registry.notify(&ready());
        registry.notify(&resumed());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_subscriber_does_not_block_others() {
        let registry = SubscriberRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);

        registry.register(Arc::new(FilterSubscriber::new("boom", |_| panic!("boom"))));
        registry.register(Arc::new(FilterSubscriber::new("ok", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })));

        registry.notify(&ready());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn subscriber_may_register_during_notify() {
        struct Spawner {
            registry: Arc<SubscriberRegistry>,
        }
        impl EventSubscriber for Spawner {
            fn on_event(&self, _event: &GatewayEvent) {
                self.registry
                    .register(Arc::new(FilterSubscriber::new("late", |_| {})));
            }
        }

        let registry = Arc::new(SubscriberRegistry::new());
        registry.register(Arc::new(Spawner {
            registry: Arc::clone(&registry),
        }));

        registry.notify(&ready());
        assert_eq!(registry.len(), 2);
    }
}
