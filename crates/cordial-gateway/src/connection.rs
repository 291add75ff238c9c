//! Transport adapter: opens the `WebSocket`, optionally through an HTTP
//! `CONNECT` tunnel, and owns the single writer task.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures::stream::{SplitSink, SplitStream};
use futures::{Sink, SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, client_async_tls, connect_async};
use tracing::{debug, trace, warn};
use url::Url;

use crate::error::{GatewayError, GatewayResult};
use crate::protocol::GatewayPayload;

/// `WebSocket` stream type for both direct and tunnelled connections.
pub(crate) type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Upper bound on the proxy's `CONNECT` response head.
const MAX_PROXY_HEAD: usize = 8 * 1024;

/// A freshly opened transport.
pub(crate) struct GatewayConnection {
    writer: SplitSink<WsStream, Message>,
    reader: SplitStream<WsStream>,
}

impl GatewayConnection {
    /// Open a `ws://` or `wss://` endpoint, tunnelling through `proxy`
    /// when one is configured. Does not retry.
    pub(crate) async fn open(endpoint: &str, proxy: Option<&str>) -> GatewayResult<Self> {
        let ws = match proxy {
            Some(proxy) => {
                let stream = open_tunnel(endpoint, proxy).await?;
                let (ws, _response) = client_async_tls(endpoint, stream).await?;
                ws
            },
            None => {
                let (ws, _response) = connect_async(endpoint).await?;
                ws
            },
        };
        debug!(endpoint, proxied = proxy.is_some(), "Gateway transport open");

        let (writer, reader) = ws.split();
        Ok(Self { writer, reader })
    }

    /// Split into the write half (for the writer task) and the read half.
    pub(crate) fn into_parts(self) -> (SplitSink<WsStream, Message>, SplitStream<WsStream>) {
        (self.writer, self.reader)
    }
}

/// Establish a raw TCP tunnel to the endpoint's host through an HTTP proxy.
async fn open_tunnel(endpoint: &str, proxy: &str) -> GatewayResult<TcpStream> {
    let target = Url::parse(endpoint)
        .map_err(|e| GatewayError::InvalidArgument(format!("invalid endpoint {endpoint}: {e}")))?;
    let host = target
        .host_str()
        .ok_or_else(|| GatewayError::InvalidArgument(format!("endpoint has no host: {endpoint}")))?;
    let port = target
        .port_or_known_default()
        .ok_or_else(|| GatewayError::InvalidArgument(format!("endpoint has no port: {endpoint}")))?;

    let proxy_url = Url::parse(proxy)
        .map_err(|e| GatewayError::Proxy(format!("invalid proxy url {proxy}: {e}")))?;
    if proxy_url.scheme() != "http" {
        return Err(GatewayError::Proxy(format!(
            "unsupported proxy scheme: {}",
            proxy_url.scheme()
        )));
    }
    let proxy_host = proxy_url
        .host_str()
        .ok_or_else(|| GatewayError::Proxy(format!("proxy url has no host: {proxy}")))?;
    let proxy_port = proxy_url.port_or_known_default().unwrap_or(80);

    let mut stream = TcpStream::connect((proxy_host, proxy_port)).await?;
    let request = format!("CONNECT {host}:{port} HTTP/1.1\r\nHost: {host}:{port}\r\n\r\n");
    stream.write_all(request.as_bytes()).await?;

    let head = read_response_head(&mut stream).await?;
    let status = head
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .unwrap_or_default();
    if status != "200" {
        return Err(GatewayError::Proxy(format!(
            "proxy refused tunnel to {host}:{port} with status {status:?}"
        )));
    }

    debug!(proxy_host, proxy_port, host, port, "Proxy tunnel established");
    Ok(stream)
}

/// Read up to and including the blank line ending the response head.
///
/// Reads one byte at a time so nothing after the head is consumed.
async fn read_response_head(stream: &mut TcpStream) -> GatewayResult<String> {
    let mut head = Vec::with_capacity(128);
    let mut byte = [0u8; 1];

    while !head.ends_with(b"\r\n\r\n") {
        if head.len() >= MAX_PROXY_HEAD {
            return Err(GatewayError::Proxy("CONNECT response head too large".into()));
        }
        if stream.read(&mut byte).await? == 0 {
            return Err(GatewayError::Proxy(
                "proxy closed the connection during CONNECT".into(),
            ));
        }
        head.extend_from_slice(&byte);
    }

    Ok(String::from_utf8_lossy(&head).into_owned())
}

// ── Writer ───────────────────────────────────────────────────

/// A frame queued for the writer task.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundFrame {
    /// JSON envelope sent as a text frame.
    Payload(GatewayPayload),
    /// Close frame with the given code; the writer stops after sending it.
    Close(u16),
}

/// Spawn the task that serializes every outbound frame onto `sink`.
///
/// The task exits when the channel closes or after a close frame. A close
/// sent from here sets `closed_by_client` so the reader can attribute the
/// disconnect.
pub(crate) fn spawn_writer<S>(
    mut sink: S,
    mut rx: mpsc::UnboundedReceiver<OutboundFrame>,
    closed_by_client: Arc<AtomicBool>,
) -> JoinHandle<()>
where
    S: Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            match frame {
                OutboundFrame::Payload(payload) => {
                    let json = match serde_json::to_string(&payload) {
                        Ok(json) => json,
                        Err(e) => {
                            warn!(op = payload.op, error = %e, "Failed to encode outbound payload");
                            continue;
                        },
                    };
                    trace!("<- {json}");
                    if let Err(e) = sink.send(Message::Text(json.into())).await {
                        debug!(error = %e, "Gateway writer stopped");
                        break;
                    }
                },
                OutboundFrame::Close(code) => {
                    closed_by_client.store(true, Ordering::SeqCst);
                    let frame = CloseFrame {
                        code: code.into(),
                        reason: "closing".into(),
                    };
                    trace!(code, "<- close");
                    if let Err(e) = sink.send(Message::Close(Some(frame))).await {
                        debug!(error = %e, "Failed to send close frame");
                    }
                    break;
                },
            }
        }
        if let Err(e) = sink.close().await {
            debug!(error = %e, "Failed to close gateway sink");
        }
    })
}

// ── Outbound handle ──────────────────────────────────────────

/// Cloneable handle for queueing frames on the current connection.
///
/// Detached between connections; sends while detached fail with
/// [`GatewayError::NotConnected`].
#[derive(Clone, Default)]
pub struct Outbound {
    sender: Arc<Mutex<Option<mpsc::UnboundedSender<OutboundFrame>>>>,
}

impl Outbound {
    /// Create a detached handle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Route frames to a new writer channel.
    pub(crate) fn attach(&self, tx: mpsc::UnboundedSender<OutboundFrame>) {
        *self.sender.lock().unwrap_or_else(PoisonError::into_inner) = Some(tx);
    }

    /// Drop the writer channel so the writer drains and exits.
    pub(crate) fn detach(&self) {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    /// Whether a connection is currently attached.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }

    /// Queue a payload.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::NotConnected`] when no writer is attached.
    pub fn send(&self, payload: GatewayPayload) -> GatewayResult<()> {
        self.push(OutboundFrame::Payload(payload))
    }

    /// Queue a close frame.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::NotConnected`] when no writer is attached.
    pub fn close(&self, code: u16) -> GatewayResult<()> {
        self.push(OutboundFrame::Close(code))
    }

    fn push(&self, frame: OutboundFrame) -> GatewayResult<()> {
        let guard = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        let tx = guard.as_ref().ok_or(GatewayError::NotConnected)?;
        tx.send(frame).map_err(|_| GatewayError::NotConnected)
    }
}

impl std::fmt::Debug for Outbound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Outbound")
            .field("attached", &self.is_attached())
            .finish()
    }
}
