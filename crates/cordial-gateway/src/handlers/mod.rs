//! Named dispatch handlers and the table that routes to them.
//!
//! Every dispatch type the client understands is an [`EventKind`]. The
//! [`HandlerTable`] maps kinds to [`EventHandler`]s; the defaults keep the
//! [`EntityRegistry`](crate::registry::EntityRegistry) current and publish
//! domain events, and any entry can be replaced.

mod channel;
mod guild;
mod message;
mod user;
mod voice;

use std::collections::HashMap;
use std::sync::Arc;

use cordial_events::{EventMetadata, GatewayEvent};
use serde_json::Value;

use crate::context::GatewayContext;
use crate::error::{GatewayError, GatewayResult};

pub(crate) use guild::announcement_event;

// ── Event kinds ──────────────────────────────────────────────

macro_rules! event_kinds {
    ($($variant:ident => $name:literal),+ $(,)?) => {
        /// Dispatch types understood by the client.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum EventKind {
            $(
                #[doc = concat!("`", $name, "`")]
                $variant,
            )+
        }

        impl EventKind {
            /// Every kind, in declaration order.
            pub const ALL: &'static [EventKind] = &[$(EventKind::$variant),+];

            /// Look up a dispatch type string.
            #[must_use]
            pub fn from_type(event_type: &str) -> Option<Self> {
                match event_type {
                    $($name => Some(Self::$variant),)+
                    _ => None,
                }
            }

            /// The wire name.
            #[must_use]
            pub fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $name,)+
                }
            }
        }
    };
}

event_kinds! {
    Ready => "READY",
    Resumed => "RESUMED",
    GuildCreate => "GUILD_CREATE",
    GuildUpdate => "GUILD_UPDATE",
    GuildDelete => "GUILD_DELETE",
    GuildMembersChunk => "GUILD_MEMBERS_CHUNK",
    GuildMemberAdd => "GUILD_MEMBER_ADD",
    GuildMemberUpdate => "GUILD_MEMBER_UPDATE",
    GuildMemberRemove => "GUILD_MEMBER_REMOVE",
    GuildBanAdd => "GUILD_BAN_ADD",
    GuildBanRemove => "GUILD_BAN_REMOVE",
    GuildRoleCreate => "GUILD_ROLE_CREATE",
    GuildRoleUpdate => "GUILD_ROLE_UPDATE",
    GuildRoleDelete => "GUILD_ROLE_DELETE",
    ChannelCreate => "CHANNEL_CREATE",
    ChannelUpdate => "CHANNEL_UPDATE",
    ChannelDelete => "CHANNEL_DELETE",
    MessageCreate => "MESSAGE_CREATE",
    MessageUpdate => "MESSAGE_UPDATE",
    MessageEmbed => "MESSAGE_EMBED",
    MessageDelete => "MESSAGE_DELETE",
    PresenceUpdate => "PRESENCE_UPDATE",
    PresenceReplace => "PRESENCE_REPLACE",
    TypingStart => "TYPING_START",
    UserUpdate => "USER_UPDATE",
    VoiceStateUpdate => "VOICE_STATE_UPDATE",
    VoiceServerUpdate => "VOICE_SERVER_UPDATE",
    MessageAck => "MESSAGE_ACK",
    UserGuildSettingsUpdate => "USER_GUILD_SETTINGS_UPDATE",
}

impl EventKind {
    /// Dispatches processed immediately even while a cold start is running.
    ///
    /// GUILD_DELETE is included so a guild that goes away mid-load stops
    /// gating the cold start.
    #[must_use]
    pub fn is_cold_start_exempt(self) -> bool {
        matches!(
            self,
            Self::Ready
                | Self::Resumed
                | Self::GuildCreate
                | Self::GuildMembersChunk
                | Self::GuildDelete
        )
    }

    /// Dispatches the client receives but deliberately does nothing with.
    #[must_use]
    pub fn is_ignored(self) -> bool {
        matches!(self, Self::MessageAck | Self::UserGuildSettingsUpdate)
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Handler trait ────────────────────────────────────────────

/// What a handler sees besides the event body.
#[derive(Debug)]
pub struct HandlerContext<'a> {
    /// Shared client state.
    pub gateway: &'a GatewayContext,
    /// Dispatch type being handled.
    pub kind: EventKind,
    /// Sequence number of the envelope.
    pub sequence: Option<u64>,
    /// `true` while the session is still loading guilds after READY.
    pub cold_start: bool,
}

impl HandlerContext<'_> {
    /// Metadata for an event published by this handler.
    #[must_use]
    pub fn metadata(&self) -> EventMetadata {
        EventMetadata::new(self.kind.as_str()).with_sequence(self.sequence)
    }

    /// Publish a domain event.
    pub fn publish(&self, event: GatewayEvent) {
        self.gateway.publish(event);
    }
}

/// Processes one dispatch body.
pub trait EventHandler: Send + Sync {
    /// Handle `data`, the `d` field of the envelope.
    ///
    /// # Errors
    ///
    /// Any error is logged by the dispatcher with the raw envelope and
    /// does not affect later envelopes.
    fn handle(&self, ctx: &HandlerContext<'_>, data: &Value) -> GatewayResult<()>;
}

impl<F> EventHandler for F
where
    F: Fn(&HandlerContext<'_>, &Value) -> GatewayResult<()> + Send + Sync,
{
    fn handle(&self, ctx: &HandlerContext<'_>, data: &Value) -> GatewayResult<()> {
        self(ctx, data)
    }
}

// ── Handler table ────────────────────────────────────────────

/// Routes each [`EventKind`] to its handler.
#[derive(Clone)]
pub struct HandlerTable {
    handlers: HashMap<EventKind, Arc<dyn EventHandler>>,
}

impl HandlerTable {
    /// A table with no handlers.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// The built-in handlers for every kind that carries state.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut table = Self::empty();
        table
            .register(EventKind::Ready, guild::ready)
            .register(EventKind::GuildCreate, guild::guild_create)
            .register(EventKind::GuildUpdate, guild::guild_update)
            .register(EventKind::GuildDelete, guild::guild_delete)
            .register(EventKind::GuildMembersChunk, guild::members_chunk)
            .register(EventKind::GuildMemberAdd, guild::member_add)
            .register(EventKind::GuildMemberUpdate, guild::member_update)
            .register(EventKind::GuildMemberRemove, guild::member_remove)
            .register(EventKind::GuildBanAdd, guild::ban_add)
            .register(EventKind::GuildBanRemove, guild::ban_remove)
            .register(EventKind::GuildRoleCreate, guild::role_create)
            .register(EventKind::GuildRoleUpdate, guild::role_update)
            .register(EventKind::GuildRoleDelete, guild::role_delete)
            .register(EventKind::ChannelCreate, channel::channel_create)
            .register(EventKind::ChannelUpdate, channel::channel_update)
            .register(EventKind::ChannelDelete, channel::channel_delete)
            .register(EventKind::MessageCreate, message::message_create)
            .register(EventKind::MessageUpdate, message::message_update)
            .register(EventKind::MessageEmbed, message::message_embed)
            .register(EventKind::MessageDelete, message::message_delete)
            .register(EventKind::PresenceUpdate, user::presence_update)
            .register(EventKind::TypingStart, user::typing_start)
            .register(EventKind::UserUpdate, user::user_update)
            .register(EventKind::VoiceStateUpdate, voice::voice_state_update)
            .register(EventKind::VoiceServerUpdate, voice::voice_server_update);
        table
    }

    /// Install or replace the handler for `kind`.
    pub fn register(&mut self, kind: EventKind, handler: impl EventHandler + 'static) -> &mut Self {
        self.handlers.insert(kind, Arc::new(handler));
        self
    }

    /// Handler for `kind`, if one is installed.
    #[must_use]
    pub fn get(&self, kind: EventKind) -> Option<&Arc<dyn EventHandler>> {
        self.handlers.get(&kind)
    }

    /// Number of installed handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no handler is installed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl Default for HandlerTable {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl std::fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<&str> = self.handlers.keys().map(|k| k.as_str()).collect();
        kinds.sort_unstable();
        f.debug_struct("HandlerTable").field("kinds", &kinds).finish()
    }
}

// ── Body helpers ─────────────────────────────────────────────

/// A string field that must be present.
pub(crate) fn required_str<'a>(data: &'a Value, key: &str) -> GatewayResult<&'a str> {
    data.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| GatewayError::Protocol(format!("missing string field `{key}`")))
}

/// A string field that may be absent or null.
pub(crate) fn optional_str(data: &Value, key: &str) -> Option<String> {
    data.get(key).and_then(Value::as_str).map(str::to_string)
}

/// `{"user": {"id": ...}}`, the shape most member events use.
pub(crate) fn nested_user_id<'a>(data: &'a Value) -> GatewayResult<&'a str> {
    data.get("user")
        .and_then(|u| u.get("id"))
        .and_then(Value::as_str)
        .ok_or_else(|| GatewayError::Protocol("missing `user.id`".into()))
}

#[cfg(test)]
pub(crate) mod test_support {
    use cordial_events::EventBus;

    use super::*;
    use crate::config::GatewayConfig;

    pub(crate) fn gateway() -> GatewayContext {
        GatewayContext::new(GatewayConfig::new("t"), EventBus::new())
    }

    pub(crate) fn run(gateway: &GatewayContext, kind: EventKind, data: &Value) -> GatewayResult<()> {
        let table = HandlerTable::with_defaults();
        let ctx = HandlerContext {
            gateway,
            kind,
            sequence: Some(1),
            cold_start: false,
        };
        table
            .get(kind)
            .ok_or_else(|| GatewayError::Protocol(format!("no handler for {kind}")))?
            .handle(&ctx, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_round_trips_wire_name() {
        for kind in EventKind::ALL {
            assert_eq!(EventKind::from_type(kind.as_str()), Some(*kind));
        }
        assert_eq!(EventKind::from_type("NOT_A_THING"), None);
    }

    #[test]
    fn exempt_and_ignored_kinds() {
        assert!(EventKind::GuildMembersChunk.is_cold_start_exempt());
        assert!(EventKind::GuildDelete.is_cold_start_exempt());
        assert!(!EventKind::MessageCreate.is_cold_start_exempt());
        assert!(EventKind::MessageAck.is_ignored());
        assert!(EventKind::UserGuildSettingsUpdate.is_ignored());
        assert!(!EventKind::TypingStart.is_ignored());
    }

    #[test]
    fn defaults_cover_stateful_kinds() {
        let table = HandlerTable::with_defaults();
        assert!(table.get(EventKind::MessageCreate).is_some());
        assert!(table.get(EventKind::Ready).is_some());
        assert!(table.get(EventKind::MessageAck).is_none());
        assert!(table.get(EventKind::PresenceReplace).is_none());
    }

    #[test]
    fn closures_can_replace_entries() {
        let mut table = HandlerTable::empty();
        table.register(EventKind::TypingStart, |_: &HandlerContext<'_>, _: &Value| {
            Err(GatewayError::Protocol("custom".into()))
        });
        assert_eq!(table.len(), 1);

        let gateway = test_support::gateway();
        let ctx = HandlerContext {
            gateway: &gateway,
            kind: EventKind::TypingStart,
            sequence: None,
            cold_start: false,
        };
        let result = table
            .get(EventKind::TypingStart)
            .unwrap()
            .handle(&ctx, &Value::Null);
        assert!(matches!(result, Err(GatewayError::Protocol(msg)) if msg == "custom"));
    }

    #[test]
    fn required_str_reports_missing_field() {
        let data = serde_json::json!({"id": "1"});
        assert_eq!(required_str(&data, "id").unwrap(), "1");
        assert!(matches!(
            required_str(&data, "guild_id"),
            Err(GatewayError::Protocol(_))
        ));
    }
}
