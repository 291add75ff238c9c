//! Cordial Events - domain events published by the gateway client.
//!
//! The gateway turns raw dispatch envelopes into [`GatewayEvent`]s and
//! publishes them on an [`EventBus`]. There are two ways to listen:
//!
//! 1. **Async receivers**: `bus.subscribe()` returns an [`EventReceiver`].
//! 2. **Synchronous subscribers**: implement [`EventSubscriber`] and
//!    register it with `bus.registry()`.
//!
//! ```rust
//! use cordial_events::{EventBus, EventMetadata, GatewayEvent};
//!
//! # async fn example() {
//! let bus = EventBus::new();
//! let mut receiver = bus.subscribe();
//!
//! bus.publish(GatewayEvent::Ready {
//!     metadata: EventMetadata::new("gateway"),
//! });
//!
//! let event = receiver.recv().await.unwrap();
//! assert_eq!(event.event_type(), "ready");
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod bus;
mod event;
mod subscriber;

pub use bus::{DEFAULT_CHANNEL_CAPACITY, EventBus, EventReceiver};
pub use event::{ChannelRef, EventMetadata, GatewayEvent};
pub use subscriber::{EventFilter, EventSubscriber, FilterSubscriber, SubscriberId, SubscriberRegistry};
