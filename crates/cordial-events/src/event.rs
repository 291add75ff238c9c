//! Domain event types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Metadata attached to every event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Unique event identifier.
    pub event_id: Uuid,
    /// When the event was created.
    pub timestamp: DateTime<Utc>,
    /// Gateway sequence number of the envelope that caused the event.
    pub sequence: Option<u64>,
    /// Component that generated the event.
    pub source: String,
}

impl EventMetadata {
    /// Create new event metadata.
    #[must_use]
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            sequence: None,
            source: source.into(),
        }
    }

    /// Attach the gateway sequence number.
    #[must_use]
    pub fn with_sequence(mut self, sequence: Option<u64>) -> Self {
        self.sequence = sequence;
        self
    }
}

impl Default for EventMetadata {
    fn default() -> Self {
        Self::new("unknown")
    }
}

/// A voice channel inside a guild.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelRef {
    /// Owning guild.
    pub guild_id: String,
    /// Voice channel.
    pub channel_id: String,
}

impl ChannelRef {
    /// Create a channel reference.
    #[must_use]
    pub fn new(guild_id: impl Into<String>, channel_id: impl Into<String>) -> Self {
        Self {
            guild_id: guild_id.into(),
            channel_id: channel_id.into(),
        }
    }
}

/// Everything the gateway client reports to listeners.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayEvent {
    // ── Session lifecycle ────────────────────────────────────
    /// First cold start of the process finished; every guild is loaded.
    Ready {
        /// Event metadata.
        metadata: EventMetadata,
    },
    /// A later cold start (after invalidation or a failed resume) finished.
    Reconnected {
        /// Event metadata.
        metadata: EventMetadata,
    },
    /// The previous session was resumed.
    Resumed {
        /// Event metadata.
        metadata: EventMetadata,
    },
    /// The transport dropped and a reconnect is about to start.
    Disconnected {
        /// Event metadata.
        metadata: EventMetadata,
        /// `true` if the server sent the close frame.
        closed_by_server: bool,
        /// Close code, when one was received.
        close_code: Option<u16>,
        /// Close reason, when one was received.
        reason: Option<String>,
        /// Voice channels that will be rejoined once the session is back.
        channels: Vec<ChannelRef>,
    },
    /// The client was shut down and will not reconnect.
    Shutdown {
        /// Event metadata.
        metadata: EventMetadata,
        /// Voice channels that were open at shutdown.
        channels: Vec<ChannelRef>,
    },

    // ── Guilds ───────────────────────────────────────────────
    /// A guild from READY finished loading.
    GuildAvailable {
        /// Event metadata.
        metadata: EventMetadata,
        /// Guild id.
        guild_id: String,
    },
    /// The client joined a new guild.
    GuildJoined {
        /// Event metadata.
        metadata: EventMetadata,
        /// Guild id.
        guild_id: String,
    },
    /// Guild settings changed.
    GuildUpdated {
        /// Event metadata.
        metadata: EventMetadata,
        /// Guild id.
        guild_id: String,
    },
    /// The client left a guild, or the guild became unavailable.
    GuildLeft {
        /// Event metadata.
        metadata: EventMetadata,
        /// Guild id.
        guild_id: String,
        /// `true` for an outage rather than a removal.
        unavailable: bool,
    },
    /// A member-chunk batch for a large guild was applied.
    MembersChunkLoaded {
        /// Event metadata.
        metadata: EventMetadata,
        /// Guild id.
        guild_id: String,
        /// Members in this chunk.
        count: usize,
    },

    // ── Members and roles ────────────────────────────────────
    /// A user joined a guild.
    MemberJoined {
        /// Event metadata.
        metadata: EventMetadata,
        /// Guild id.
        guild_id: String,
        /// User id.
        user_id: String,
    },
    /// A member's roles or nickname changed.
    MemberUpdated {
        /// Event metadata.
        metadata: EventMetadata,
        /// Guild id.
        guild_id: String,
        /// User id.
        user_id: String,
    },
    /// A user left a guild.
    MemberLeft {
        /// Event metadata.
        metadata: EventMetadata,
        /// Guild id.
        guild_id: String,
        /// User id.
        user_id: String,
    },
    /// A user was banned.
    MemberBanned {
        /// Event metadata.
        metadata: EventMetadata,
        /// Guild id.
        guild_id: String,
        /// User id.
        user_id: String,
    },
    /// A ban was lifted.
    MemberUnbanned {
        /// Event metadata.
        metadata: EventMetadata,
        /// Guild id.
        guild_id: String,
        /// User id.
        user_id: String,
    },
    /// A role was created.
    RoleCreated {
        /// Event metadata.
        metadata: EventMetadata,
        /// Guild id.
        guild_id: String,
        /// Role id.
        role_id: String,
    },
    /// A role changed.
    RoleUpdated {
        /// Event metadata.
        metadata: EventMetadata,
        /// Guild id.
        guild_id: String,
        /// Role id.
        role_id: String,
    },
    /// A role was deleted.
    RoleDeleted {
        /// Event metadata.
        metadata: EventMetadata,
        /// Guild id.
        guild_id: String,
        /// Role id.
        role_id: String,
    },

    // ── Channels ─────────────────────────────────────────────
    /// A channel was created.
    ChannelCreated {
        /// Event metadata.
        metadata: EventMetadata,
        /// Channel id.
        channel_id: String,
        /// Owning guild, absent for private channels.
        guild_id: Option<String>,
    },
    /// A channel changed.
    ChannelUpdated {
        /// Event metadata.
        metadata: EventMetadata,
        /// Channel id.
        channel_id: String,
        /// Owning guild.
        guild_id: Option<String>,
    },
    /// A channel was deleted.
    ChannelDeleted {
        /// Event metadata.
        metadata: EventMetadata,
        /// Channel id.
        channel_id: String,
        /// Owning guild.
        guild_id: Option<String>,
    },

    // ── Messages ─────────────────────────────────────────────
    /// A message was posted.
    MessageReceived {
        /// Event metadata.
        metadata: EventMetadata,
        /// Message id.
        message_id: String,
        /// Channel id.
        channel_id: String,
        /// Author's user id.
        author_id: String,
        /// Text content.
        content: String,
    },
    /// A message was edited.
    MessageUpdated {
        /// Event metadata.
        metadata: EventMetadata,
        /// Message id.
        message_id: String,
        /// Channel id.
        channel_id: String,
        /// New text content.
        content: String,
    },
    /// Embeds were attached to an existing message.
    MessageEmbedded {
        /// Event metadata.
        metadata: EventMetadata,
        /// Message id.
        message_id: String,
        /// Channel id.
        channel_id: String,
        /// Raw embed objects.
        embeds: Vec<Value>,
    },
    /// A message was deleted.
    MessageDeleted {
        /// Event metadata.
        metadata: EventMetadata,
        /// Message id.
        message_id: String,
        /// Channel id.
        channel_id: String,
    },

    // ── Users ────────────────────────────────────────────────
    /// A user's presence changed.
    PresenceUpdated {
        /// Event metadata.
        metadata: EventMetadata,
        /// User id.
        user_id: String,
        /// Guild the presence was reported for.
        guild_id: Option<String>,
        /// New status (`online`, `idle`, ...).
        status: Option<String>,
    },
    /// A user started typing.
    UserTyping {
        /// Event metadata.
        metadata: EventMetadata,
        /// User id.
        user_id: String,
        /// Channel id.
        channel_id: String,
    },
    /// The client's own user changed.
    SelfUpdated {
        /// Event metadata.
        metadata: EventMetadata,
        /// User id.
        user_id: String,
    },

    // ── Voice signaling ──────────────────────────────────────
    /// A user's voice state changed.
    VoiceStateUpdated {
        /// Event metadata.
        metadata: EventMetadata,
        /// User id.
        user_id: String,
        /// Guild id.
        guild_id: Option<String>,
        /// New voice channel, absent when the user left voice.
        channel_id: Option<String>,
    },
    /// The voice server for a guild was assigned.
    VoiceServerUpdated {
        /// Event metadata.
        metadata: EventMetadata,
        /// Guild id.
        guild_id: String,
        /// Voice server endpoint.
        endpoint: Option<String>,
    },
}

impl GatewayEvent {
    /// Stable snake-case name of the event.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Ready { .. } => "ready",
            Self::Reconnected { .. } => "reconnected",
            Self::Resumed { .. } => "resumed",
            Self::Disconnected { .. } => "disconnected",
            Self::Shutdown { .. } => "shutdown",
            Self::GuildAvailable { .. } => "guild_available",
            Self::GuildJoined { .. } => "guild_joined",
            Self::GuildUpdated { .. } => "guild_updated",
            Self::GuildLeft { .. } => "guild_left",
            Self::MembersChunkLoaded { .. } => "members_chunk_loaded",
            Self::MemberJoined { .. } => "member_joined",
            Self::MemberUpdated { .. } => "member_updated",
            Self::MemberLeft { .. } => "member_left",
            Self::MemberBanned { .. } => "member_banned",
            Self::MemberUnbanned { .. } => "member_unbanned",
            Self::RoleCreated { .. } => "role_created",
            Self::RoleUpdated { .. } => "role_updated",
            Self::RoleDeleted { .. } => "role_deleted",
            Self::ChannelCreated { .. } => "channel_created",
            Self::ChannelUpdated { .. } => "channel_updated",
            Self::ChannelDeleted { .. } => "channel_deleted",
            Self::MessageReceived { .. } => "message_received",
            Self::MessageUpdated { .. } => "message_updated",
            Self::MessageEmbedded { .. } => "message_embedded",
            Self::MessageDeleted { .. } => "message_deleted",
            Self::PresenceUpdated { .. } => "presence_updated",
            Self::UserTyping { .. } => "user_typing",
            Self::SelfUpdated { .. } => "self_updated",
            Self::VoiceStateUpdated { .. } => "voice_state_updated",
            Self::VoiceServerUpdated { .. } => "voice_server_updated",
        }
    }

    /// Metadata of any variant.
    #[must_use]
    pub fn metadata(&self) -> &EventMetadata {
        match self {
            Self::Ready { metadata }
            | Self::Reconnected { metadata }
            | Self::Resumed { metadata }
            | Self::Disconnected { metadata, .. }
            | Self::Shutdown { metadata, .. }
            | Self::GuildAvailable { metadata, .. }
            | Self::GuildJoined { metadata, .. }
            | Self::GuildUpdated { metadata, .. }
            | Self::GuildLeft { metadata, .. }
            | Self::MembersChunkLoaded { metadata, .. }
            | Self::MemberJoined { metadata, .. }
            | Self::MemberUpdated { metadata, .. }
            | Self::MemberLeft { metadata, .. }
            | Self::MemberBanned { metadata, .. }
            | Self::MemberUnbanned { metadata, .. }
            | Self::RoleCreated { metadata, .. }
            | Self::RoleUpdated { metadata, .. }
            | Self::RoleDeleted { metadata, .. }
            | Self::ChannelCreated { metadata, .. }
            | Self::ChannelUpdated { metadata, .. }
            | Self::ChannelDeleted { metadata, .. }
            | Self::MessageReceived { metadata, .. }
            | Self::MessageUpdated { metadata, .. }
            | Self::MessageEmbedded { metadata, .. }
            | Self::MessageDeleted { metadata, .. }
            | Self::PresenceUpdated { metadata, .. }
            | Self::UserTyping { metadata, .. }
            | Self::SelfUpdated { metadata, .. }
            | Self::VoiceStateUpdated { metadata, .. }
            | Self::VoiceServerUpdated { metadata, .. } => metadata,
        }
    }

    /// `true` for session lifecycle events.
    #[must_use]
    pub fn is_lifecycle(&self) -> bool {
        matches!(
            self,
            Self::Ready { .. }
                | Self::Reconnected { .. }
                | Self::Resumed { .. }
                | Self::Disconnected { .. }
                | Self::Shutdown { .. }
        )
    }
}
