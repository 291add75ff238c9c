//! Client lifecycle: login, the inbound loop, teardown and reconnection.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use cordial_events::{ChannelRef, EventBus, EventMetadata, GatewayEvent};
use futures::StreamExt;
use futures::stream::SplitStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::audio::AudioManager;
use crate::bootstrap::{Bootstrap, HttpBootstrap};
use crate::codec::InboundFrame;
use crate::config::GatewayConfig;
use crate::connection::{GatewayConnection, WsStream, spawn_writer};
use crate::context::GatewayContext;
use crate::dispatch::{Dispatcher, RawInterceptor};
use crate::error::GatewayResult;
use crate::handlers::{EventHandler, EventKind, HandlerTable};
use crate::protocol::{GatewayPayload, NORMAL_CLOSURE};
use crate::registry::EntityRegistry;
use crate::session::SessionPhase;

/// How long the writer gets to flush queued frames on teardown.
const WRITER_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

// ── Builder ──────────────────────────────────────────────────

/// Configures and logs in a [`GatewayClient`].
pub struct ClientBuilder {
    config: GatewayConfig,
    bus: Option<EventBus>,
    bootstrap: Option<Arc<dyn Bootstrap>>,
    handlers: HandlerTable,
    interceptor: Option<Arc<dyn RawInterceptor>>,
}

impl ClientBuilder {
    /// Start from `config` with the default handlers.
    #[must_use]
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config,
            bus: None,
            bootstrap: None,
            handlers: HandlerTable::with_defaults(),
            interceptor: None,
        }
    }

    /// Publish domain events on `bus` instead of a fresh one.
    #[must_use]
    pub fn event_bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Replace the HTTP bootstrap requester.
    #[must_use]
    pub fn bootstrap(mut self, bootstrap: impl Bootstrap + 'static) -> Self {
        self.bootstrap = Some(Arc::new(bootstrap));
        self
    }

    /// Install or replace the handler for one dispatch type.
    #[must_use]
    pub fn handler(mut self, kind: EventKind, handler: impl EventHandler + 'static) -> Self {
        self.handlers.register(kind, handler);
        self
    }

    /// Replace the whole handler table.
    #[must_use]
    pub fn handlers(mut self, handlers: HandlerTable) -> Self {
        self.handlers = handlers;
        self
    }

    /// See every envelope before dispatch.
    #[must_use]
    pub fn interceptor(mut self, interceptor: impl RawInterceptor + 'static) -> Self {
        self.interceptor = Some(Arc::new(interceptor));
        self
    }

    /// Validate the configuration and token, discover the endpoint and
    /// open the first connection.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidArgument`](crate::GatewayError::InvalidArgument)
    /// for bad configuration, [`InvalidToken`](crate::GatewayError::InvalidToken)
    /// for a rejected token, [`GatewayUnavailable`](crate::GatewayError::GatewayUnavailable)
    /// when the endpoint cannot be found, and transport errors from the
    /// first connection attempt.
    pub async fn login(self) -> GatewayResult<GatewayClient> {
        self.config.validate()?;

        let bootstrap = match self.bootstrap {
            Some(bootstrap) => bootstrap,
            None => Arc::new(HttpBootstrap::new(
                &self.config.api_url,
                self.config.proxy.as_deref(),
            )?),
        };
        bootstrap.validate_token(&self.config.token).await?;
        let endpoint = bootstrap.gateway_url(&self.config.token).await?;
        info!(endpoint, "Logging in");

        let shared = Arc::new(Shared {
            should_reconnect: AtomicBool::new(self.config.auto_reconnect),
            cancel: CancellationToken::new(),
            shutdown_channels: Mutex::new(Vec::new()),
        });
        let ctx = GatewayContext::new(self.config, self.bus.unwrap_or_default());
        let dispatcher = Dispatcher::new(
            ctx,
            self.handlers,
            self.interceptor,
            shared.cancel.child_token(),
        );

        let mut client = GatewayClient {
            dispatcher,
            endpoint,
            shared,
            connection: None,
        };
        client.connect().await?;
        Ok(client)
    }
}

impl std::fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("config", &self.config)
            .field("handlers", &self.handlers)
            .field("has_interceptor", &self.interceptor.is_some())
            .finish_non_exhaustive()
    }
}

// ── Client ───────────────────────────────────────────────────

#[derive(Debug)]
struct Shared {
    should_reconnect: AtomicBool,
    cancel: CancellationToken,
    shutdown_channels: Mutex<Vec<ChannelRef>>,
}

impl Shared {
    fn should_reconnect(&self) -> bool {
        self.should_reconnect.load(Ordering::SeqCst) && !self.cancel.is_cancelled()
    }
}

struct LiveConnection {
    reader: SplitStream<WsStream>,
    writer: JoinHandle<()>,
    closed_by_client: Arc<AtomicBool>,
}

/// Why a connection ended.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct CloseInfo {
    closed_by_server: bool,
    code: Option<u16>,
    reason: Option<String>,
}

/// A logged-in gateway client. Drive it with [`run`](Self::run).
pub struct GatewayClient {
    dispatcher: Dispatcher,
    endpoint: String,
    shared: Arc<Shared>,
    connection: Option<LiveConnection>,
}

impl GatewayClient {
    /// Start building a client.
    #[must_use]
    pub fn builder(config: GatewayConfig) -> ClientBuilder {
        ClientBuilder::new(config)
    }

    /// A handle for controlling the client from other tasks.
    #[must_use]
    pub fn handle(&self) -> ClientHandle {
        ClientHandle {
            ctx: self.dispatcher.context().clone(),
            shared: Arc::clone(&self.shared),
        }
    }

    /// Shared client state.
    #[must_use]
    pub fn context(&self) -> &GatewayContext {
        self.dispatcher.context()
    }

    /// Current session phase.
    #[must_use]
    pub fn phase(&self) -> SessionPhase {
        self.dispatcher.phase()
    }

    /// Process frames until shutdown, reconnecting as configured.
    ///
    /// # Errors
    ///
    /// Currently always returns `Ok(())`; connection failures after login
    /// are handled by reconnecting.
    pub async fn run(mut self) -> GatewayResult<()> {
        loop {
            let close = self.read_until_closed().await;
            self.teardown().await;
            self.dispatcher.on_disconnected();

            if !self.shared.should_reconnect() {
                self.publish_shutdown();
                return Ok(());
            }

            let channels = self.dispatcher.snapshot_voice();
            warn!(
                code = ?close.code,
                reason = ?close.reason,
                closed_by_server = close.closed_by_server,
                "Disconnected from gateway"
            );
            self.dispatcher.context().publish(GatewayEvent::Disconnected {
                metadata: EventMetadata::new("gateway"),
                closed_by_server: close.closed_by_server,
                close_code: close.code,
                reason: close.reason,
                channels,
            });

            if !self.reconnect().await {
                self.publish_shutdown();
                return Ok(());
            }
        }
    }

    async fn connect(&mut self) -> GatewayResult<()> {
        self.dispatcher.begin_connect();
        let proxy = self.dispatcher.context().config.proxy.clone();
        let connection = GatewayConnection::open(&self.endpoint, proxy.as_deref()).await?;
        let (sink, reader) = connection.into_parts();

        let (tx, rx) = mpsc::unbounded_channel();
        let closed_by_client = Arc::new(AtomicBool::new(false));
        let writer = spawn_writer(sink, rx, Arc::clone(&closed_by_client));
        self.dispatcher.context().outbound.attach(tx);
        self.connection = Some(LiveConnection {
            reader,
            writer,
            closed_by_client,
        });

        self.dispatcher.on_connected()?;
        info!("Connected to gateway");
        Ok(())
    }

    async fn read_until_closed(&mut self) -> CloseInfo {
        let Some(conn) = self.connection.as_mut() else {
            return CloseInfo::default();
        };

        loop {
            tokio::select! {
                biased;
                () = self.shared.cancel.cancelled() => {
                    debug!("Inbound loop cancelled");
                    return CloseInfo {
                        closed_by_server: false,
                        code: Some(NORMAL_CLOSURE),
                        reason: None,
                    };
                }
                msg = conn.reader.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        self.dispatcher.handle_frame(InboundFrame::Text(text.as_str().to_owned()));
                    },
                    Some(Ok(Message::Binary(bytes))) => {
                        self.dispatcher.handle_frame(InboundFrame::Binary(bytes.to_vec()));
                    },
                    Some(Ok(Message::Close(frame))) => {
                        let by_client = conn.closed_by_client.load(Ordering::SeqCst);
                        return CloseInfo {
                            closed_by_server: !by_client,
                            code: frame.as_ref().map(|f| f.code.into()),
                            reason: frame
                                .as_ref()
                                .map(|f| f.reason.as_str().to_string())
                                .filter(|r| !r.is_empty()),
                        };
                    },
                    Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {},
                    Some(Err(e)) => {
                        warn!(error = %e, "Gateway transport error");
                        return CloseInfo {
                            closed_by_server: false,
                            code: None,
                            reason: Some(e.to_string()),
                        };
                    },
                    None => {
                        return CloseInfo {
                            closed_by_server: !conn.closed_by_client.load(Ordering::SeqCst),
                            code: None,
                            reason: None,
                        };
                    },
                },
            }
        }
    }

    /// Detach the outbound queue, give the writer a bounded time to flush,
    /// then drop the connection.
    async fn teardown(&mut self) {
        self.dispatcher.context().outbound.detach();
        if let Some(LiveConnection {
            reader, mut writer, ..
        }) = self.connection.take()
        {
            drop(reader);
            if tokio::time::timeout(WRITER_FLUSH_TIMEOUT, &mut writer)
                .await
                .is_err()
            {
                debug!("Writer did not flush in time, aborting");
                writer.abort();
            }
        }
    }

    /// Retry until connected or told to stop. Returns `false` when stopped.
    async fn reconnect(&mut self) -> bool {
        let cancel = self.shared.cancel.clone();
        loop {
            if !self.shared.should_reconnect() {
                return false;
            }

            let delay = self.dispatcher.backoff().current();
            warn!(delay_secs = delay.as_secs(), "Attempting to reconnect");
            tokio::select! {
                biased;
                () = cancel.cancelled() => return false,
                () = tokio::time::sleep(delay) => {},
            }

            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => return false,
                result = self.connect() => result,
            };
            match result {
                Ok(()) => {
                    self.dispatcher.backoff().reset();
                    return true;
                },
                Err(e) => {
                    self.connection = None;
                    self.dispatcher.context().outbound.detach();
                    let next = self.dispatcher.backoff().fail();
                    warn!(error = %e, next_delay_secs = next.as_secs(), "Reconnect failed");
                },
            }
        }
    }

    fn publish_shutdown(&mut self) {
        self.dispatcher.stop_heartbeat();
        let recorded = std::mem::take(
            &mut *self
                .shared
                .shutdown_channels
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        let channels = if recorded.is_empty() {
            self.dispatcher.active_voice()
        } else {
            recorded
        };
        info!("Gateway client shut down");
        self.dispatcher.context().publish(GatewayEvent::Shutdown {
            metadata: EventMetadata::new("gateway"),
            channels,
        });
    }
}

impl std::fmt::Debug for GatewayClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayClient")
            .field("endpoint", &self.endpoint)
            .field("phase", &self.dispatcher.phase())
            .field("connected", &self.connection.is_some())
            .finish_non_exhaustive()
    }
}

// ── Handle ───────────────────────────────────────────────────

/// Cloneable control surface for a running [`GatewayClient`].
#[derive(Debug, Clone)]
pub struct ClientHandle {
    ctx: GatewayContext,
    shared: Arc<Shared>,
}

impl ClientHandle {
    /// Leave voice, disable reconnect, close the transport with 1000 and
    /// stop the heartbeat and any pending backoff wait.
    pub fn shutdown(&self) {
        info!("Shutdown requested");
        let mut channels = Vec::new();
        for manager in self.ctx.registry.audio_managers() {
            if let Some(channel) = manager.active_channel() {
                channels.push(ChannelRef::new(manager.guild_id(), channel));
                if let Err(e) = manager.close_audio_connection() {
                    debug!(guild_id = manager.guild_id(), error = %e, "Could not leave voice");
                }
            }
        }
        channels.sort_by(|a, b| a.guild_id.cmp(&b.guild_id));
        *self
            .shared
            .shutdown_channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = channels;

        self.shared.should_reconnect.store(false, Ordering::SeqCst);
        if let Err(e) = self.ctx.outbound.close(NORMAL_CLOSURE) {
            debug!(error = %e, "No transport to close");
        }
        self.shared.cancel.cancel();
    }

    /// Whether shutdown was requested.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }

    /// Enable or disable reconnecting after an unexpected disconnect.
    pub fn set_auto_reconnect(&self, enabled: bool) {
        self.shared.should_reconnect.store(enabled, Ordering::SeqCst);
    }

    /// Whether the client will reconnect after an unexpected disconnect.
    #[must_use]
    pub fn auto_reconnect(&self) -> bool {
        self.shared.should_reconnect()
    }

    /// Whether a transport is currently attached.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.ctx.outbound.is_attached()
    }

    /// The entity registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<EntityRegistry> {
        &self.ctx.registry
    }

    /// The domain event bus.
    #[must_use]
    pub fn bus(&self) -> &EventBus {
        &self.ctx.bus
    }

    /// Audio manager for a guild.
    ///
    /// # Errors
    ///
    /// See [`GatewayContext::audio_manager`].
    pub fn audio_manager(&self, guild_id: &str) -> GatewayResult<Arc<AudioManager>> {
        self.ctx.audio_manager(guild_id)
    }

    /// Queue a raw payload on the current connection.
    ///
    /// # Errors
    ///
    /// Returns [`NotConnected`](crate::GatewayError::NotConnected) between
    /// connections.
    pub fn send(&self, payload: GatewayPayload) -> GatewayResult<()> {
        self.ctx.outbound.send(payload)
    }
}
