//! In-process gateway server and fixtures for end-to-end tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cordial_events::{EventReceiver, GatewayEvent};
use cordial_gateway::{Bootstrap, GatewayConfig, GatewayResult};
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::{WebSocketStream, accept_async};

const STEP_TIMEOUT: Duration = Duration::from_secs(5);

/// A listening fake gateway.
pub struct FakeGateway {
    listener: TcpListener,
    pub url: String,
}

impl FakeGateway {
    pub async fn bind() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/?encoding=json&v=4", listener.local_addr().unwrap());
        Self { listener, url }
    }

    pub async fn accept(&self) -> ServerConn {
        let (stream, _) = tokio::time::timeout(STEP_TIMEOUT, self.listener.accept())
            .await
            .expect("client did not connect")
            .unwrap();
        ServerConn {
            ws: accept_async(stream).await.unwrap(),
        }
    }

    /// Accept with no deadline, for tests running on a paused clock.
    pub async fn accept_without_deadline(&self) -> ServerConn {
        let (stream, _) = self.listener.accept().await.unwrap();
        ServerConn {
            ws: accept_async(stream).await.unwrap(),
        }
    }

    /// Accept one TCP connection and hang up before the upgrade. Returns
    /// the (possibly paused) clock reading at the moment it arrived.
    pub async fn refuse_next(&self) -> Instant {
        let (stream, _) = self.listener.accept().await.unwrap();
        let at = Instant::now();
        drop(stream);
        at
    }
}

/// Server side of one client connection.
pub struct ServerConn {
    ws: WebSocketStream<TcpStream>,
}

impl ServerConn {
    pub async fn send_json(&mut self, value: Value) {
        self.ws.send(Message::Text(value.to_string().into())).await.unwrap();
    }

    pub async fn send_binary(&mut self, bytes: Vec<u8>) {
        self.ws.send(Message::Binary(bytes.into())).await.unwrap();
    }

    pub async fn dispatch(&mut self, t: &str, s: u64, d: Value) {
        self.send_json(json!({"op": 0, "t": t, "s": s, "d": d})).await;
    }

    /// Next text frame as JSON.
    pub async fn recv_payload(&mut self) -> Value {
        loop {
            let msg = tokio::time::timeout(STEP_TIMEOUT, self.ws.next())
                .await
                .expect("timed out waiting for a frame")
                .expect("connection ended")
                .unwrap();
            match msg {
                Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
                Message::Close(frame) => panic!("unexpected close: {frame:?}"),
                _ => {},
            }
        }
    }

    /// Next payload with opcode `op`, skipping heartbeats unless asked for.
    pub async fn expect_op(&mut self, op: u64) -> Value {
        loop {
            let payload = self.recv_payload().await;
            let got = payload["op"].as_u64().unwrap();
            if got == op {
                return payload;
            }
            assert_eq!(got, 1, "expected op {op}, got {payload}");
        }
    }

    /// Wait for the client's close frame and return its code.
    pub async fn expect_close(&mut self) -> Option<u16> {
        loop {
            let next = tokio::time::timeout(STEP_TIMEOUT, self.ws.next())
                .await
                .expect("timed out waiting for close");
            match next {
                Some(Ok(Message::Close(frame))) => return frame.map(|f| f.code.into()),
                Some(Ok(_)) => {},
                Some(Err(_)) | None => return None,
            }
        }
    }

    pub async fn close(&mut self, code: u16) {
        let frame = CloseFrame {
            code: code.into(),
            reason: "server closing".into(),
        };
        let _ = self.ws.close(Some(frame)).await;
    }

    /// HELLO followed by READY with no unavailable guilds.
    pub async fn hello_and_ready(&mut self, session_id: &str, s: u64) {
        self.send_json(json!({"op": 10, "d": {"heartbeat_interval": 30000}}))
            .await;
        self.dispatch(
            "READY",
            s,
            json!({
                "session_id": session_id,
                "heartbeat_interval": 30000,
                "user": {"id": "me", "username": "cordial"},
                "guilds": [],
                "private_channels": [],
            }),
        )
        .await;
    }
}

/// Bootstrap that points at the fake gateway without any HTTP.
pub struct StaticBootstrap(pub String);

#[async_trait]
impl Bootstrap for StaticBootstrap {
    async fn validate_token(&self, _token: &str) -> GatewayResult<()> {
        Ok(())
    }

    async fn gateway_url(&self, _token: &str) -> GatewayResult<String> {
        Ok(self.0.clone())
    }
}

/// Config with a short backoff so reconnects happen quickly.
pub fn config() -> GatewayConfig {
    let mut config = GatewayConfig::new("test-token");
    config.backoff_floor = Duration::from_millis(20);
    config.backoff_ceiling = Duration::from_millis(200);
    config
}

/// Wait for the next event of type `event_type`, skipping others.
pub async fn next_event(rx: &mut EventReceiver, event_type: &str) -> Arc<GatewayEvent> {
    loop {
        let event = tokio::time::timeout(STEP_TIMEOUT, rx.recv())
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for {event_type}"))
            .expect("event bus closed");
        if event.event_type() == event_type {
            return event;
        }
    }
}

/// Like [`next_event`] but without a deadline, for paused-clock tests.
pub async fn wait_for_event(rx: &mut EventReceiver, event_type: &str) -> Arc<GatewayEvent> {
    loop {
        let event = rx.recv().await.expect("event bus closed");
        if event.event_type() == event_type {
            return event;
        }
    }
}
