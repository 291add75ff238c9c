//! Cordial Gateway - a stateful client for a real-time gateway protocol.
//!
//! The client authenticates over HTTP, opens a `WebSocket`, identifies or
//! resumes a session, keeps it alive with heartbeats, and turns dispatch
//! envelopes into registry updates and [`cordial_events::GatewayEvent`]s.
//! Dropped connections are resumed when possible and re-identified when
//! not; voice channels and audio handlers survive both.
//!
//! # Architecture
//!
//! ```text
//! GatewayClient (inbound loop, reconnect policy)
//! ├── connection   transport + single writer task
//! ├── codec        zlib binary frames → text
//! └── Dispatcher
//!     ├── session     identify/resume, cold start, event cache
//!     ├── heartbeat   cancellable keep-alive task
//!     ├── audio       voice signaling and reconnect replay
//!     └── handlers    EventKind → EventHandler → EntityRegistry + EventBus
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use cordial_gateway::{GatewayClient, GatewayConfig};
//!
//! # async fn example() -> cordial_gateway::GatewayResult<()> {
//! let client = GatewayClient::builder(GatewayConfig::new("token"))
//!     .login()
//!     .await?;
//! let handle = client.handle();
//! let mut events = handle.bus().subscribe();
//!
//! tokio::spawn(client.run());
//! while let Some(event) = events.recv().await {
//!     println!("{}", event.event_type());
//! }
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod protocol;

mod audio;
mod backoff;
mod bootstrap;
mod client;
mod codec;
mod config;
mod connection;
mod context;
mod dispatch;
mod error;
mod handlers;
mod heartbeat;
mod registry;
mod session;

pub use audio::{AudioConnectionState, AudioManager, AudioReceiveHandler, AudioSendHandler};
pub use backoff::Backoff;
pub use bootstrap::{Bootstrap, HttpBootstrap};
pub use client::{ClientBuilder, ClientHandle, GatewayClient};
pub use codec::{InboundFrame, inflate, normalize};
pub use config::{GatewayConfig, ShardInfo};
pub use connection::{Outbound, OutboundFrame};
pub use context::GatewayContext;
pub use dispatch::RawInterceptor;
pub use error::{GatewayError, GatewayResult};
pub use handlers::{EventHandler, EventKind, HandlerContext, HandlerTable};
pub use protocol::GatewayPayload;
pub use registry::{
    EntityRegistry, Guild, Member, PrivateChannel, Role, TextChannel, User, VoiceChannel,
};
pub use session::{SequenceTracker, SessionPhase};
