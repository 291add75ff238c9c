//! Gateway wire format: opcodes, the envelope, and outbound payload builders.
//!
//! Dispatch bodies stay as opaque `serde_json::Value`; only the fields the
//! session logic needs are modelled.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::config::GatewayConfig;

// ── Opcodes ──────────────────────────────────────────────────

/// Gateway opcodes.
pub mod opcode {
    /// Event dispatch (receive only).
    pub const DISPATCH: u8 = 0;
    /// Heartbeat (bidirectional).
    pub const HEARTBEAT: u8 = 1;
    /// Identify (send only).
    pub const IDENTIFY: u8 = 2;
    /// Voice state update (send only).
    pub const VOICE_STATE_UPDATE: u8 = 4;
    /// Resume (send only).
    pub const RESUME: u8 = 6;
    /// Server requests reconnect (receive only).
    pub const RECONNECT: u8 = 7;
    /// Request guild members (send only).
    pub const REQUEST_GUILD_MEMBERS: u8 = 8;
    /// Invalid session (receive only).
    pub const INVALID_SESSION: u8 = 9;
    /// Hello, carries the heartbeat interval (receive only).
    pub const HELLO: u8 = 10;
    /// Heartbeat ACK (receive only).
    pub const HEARTBEAT_ACK: u8 = 11;
}

/// Protocol version sent in identify and appended to the endpoint.
pub const GATEWAY_VERSION: u8 = 4;

/// Close code used for every client-initiated close.
pub const NORMAL_CLOSURE: u16 = 1000;

// ── Wire Types ───────────────────────────────────────────────

/// The envelope every frame carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayPayload {
    /// Opcode.
    pub op: u8,
    /// Opcode-dependent body.
    #[serde(default)]
    pub d: Option<Value>,
    /// Sequence number (dispatch only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s: Option<u64>,
    /// Event type (dispatch only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,
}

impl GatewayPayload {
    /// Build a non-dispatch payload.
    #[must_use]
    pub fn new(op: u8, d: Value) -> Self {
        Self {
            op,
            d: Some(d),
            s: None,
            t: None,
        }
    }

    /// Build a dispatch envelope (used by tests and interceptors).
    #[must_use]
    pub fn dispatch(event_type: impl Into<String>, sequence: u64, d: Value) -> Self {
        Self {
            op: opcode::DISPATCH,
            d: Some(d),
            s: Some(sequence),
            t: Some(event_type.into()),
        }
    }

    /// The body, or `null` when absent.
    #[must_use]
    pub fn data(&self) -> &Value {
        self.d.as_ref().unwrap_or(&Value::Null)
    }
}

/// Hello body (`op=10`).
#[derive(Debug, Deserialize)]
pub(crate) struct HelloPayload {
    /// Heartbeat interval in milliseconds.
    pub(crate) heartbeat_interval: u64,
}

/// Fields of the READY body the session needs.
#[derive(Debug, Deserialize)]
pub(crate) struct ReadyPayload {
    /// Session id for later resumes.
    pub(crate) session_id: String,
    /// Heartbeat interval in milliseconds.
    #[serde(default)]
    pub(crate) heartbeat_interval: Option<u64>,
    /// Guilds, possibly only `{id, unavailable}` stubs.
    #[serde(default)]
    pub(crate) guilds: Vec<GuildStub>,
}

/// A guild entry in READY.
#[derive(Debug, Deserialize)]
pub(crate) struct GuildStub {
    /// Guild id.
    pub(crate) id: String,
    /// `true` when the full object will follow in a GUILD_CREATE.
    #[serde(default)]
    pub(crate) unavailable: bool,
}

/// Fields of the RESUMED body the session needs.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct ResumedPayload {
    /// Heartbeat interval in milliseconds.
    #[serde(default)]
    pub(crate) heartbeat_interval: Option<u64>,
}

/// Response body of `GET {api}/gateway`.
#[derive(Debug, Deserialize)]
pub(crate) struct GatewayUrlResponse {
    /// Base endpoint.
    pub(crate) url: String,
}

// ── Outbound Payloads ────────────────────────────────────────

/// Build an Identify payload (`op=2`).
#[must_use]
pub fn build_identify(config: &GatewayConfig) -> GatewayPayload {
    let mut d = json!({
        "token": config.token,
        "properties": {
            "$os": std::env::consts::OS,
            "$browser": config.client_name,
            "$device": "",
            "$referring_domain": "",
            "$referrer": "",
        },
        "v": GATEWAY_VERSION,
        "large_threshold": config.large_threshold,
        "compress": config.compress,
    });
    if let Some(shard) = config.shard {
        d["shard"] = json!([shard.index, shard.count]);
    }
    GatewayPayload::new(opcode::IDENTIFY, d)
}

/// Build a Resume payload (`op=6`).
#[must_use]
pub fn build_resume(token: &str, session_id: &str, sequence: Option<u64>) -> GatewayPayload {
    GatewayPayload::new(
        opcode::RESUME,
        json!({
            "session_id": session_id,
            "token": token,
            "seq": sequence,
        }),
    )
}

/// Build a Heartbeat payload (`op=1`).
#[must_use]
pub fn build_heartbeat(sequence: Option<u64>) -> GatewayPayload {
    GatewayPayload {
        op: opcode::HEARTBEAT,
        d: Some(sequence.map_or(Value::Null, Value::from)),
        s: None,
        t: None,
    }
}

/// Build a Voice State Update (`op=4`). `None` leaves voice in the guild.
#[must_use]
pub fn build_voice_state(guild_id: &str, channel_id: Option<&str>) -> GatewayPayload {
    GatewayPayload::new(
        opcode::VOICE_STATE_UPDATE,
        json!({
            "guild_id": guild_id,
            "channel_id": channel_id,
            "self_mute": false,
            "self_deaf": false,
        }),
    )
}

/// Build a Request Guild Members payload (`op=8`) for the full member list.
#[must_use]
pub fn build_request_guild_members(guild_id: &str) -> GatewayPayload {
    GatewayPayload::new(
        opcode::REQUEST_GUILD_MEMBERS,
        json!({
            "guild_id": guild_id,
            "query": "",
            "limit": 0,
        }),
    )
}
