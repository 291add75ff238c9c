//! Entity registry: the client's view of guilds, channels and users.
//!
//! Maps are concurrent so listeners can read while the inbound task writes.
//! Every public accessor returns owned snapshots.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::audio::AudioManager;
use crate::protocol::GatewayPayload;

// ── Entities ─────────────────────────────────────────────────

/// A user account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct User {
    /// User id.
    pub id: String,
    /// Account name.
    pub username: String,
    /// Four-digit discriminator.
    pub discriminator: String,
    /// Avatar hash.
    pub avatar: Option<String>,
    /// Bot account flag.
    pub bot: bool,
    /// Last known presence status.
    #[serde(skip)]
    pub status: Option<String>,
}

/// A guild role.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Role {
    /// Role id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// RGB color.
    pub color: u32,
    /// Sort position.
    pub position: i64,
    /// Permission bits.
    pub permissions: u64,
}

/// A guild membership.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Member {
    /// Member's user id.
    pub user_id: String,
    /// Guild nickname.
    pub nick: Option<String>,
    /// Assigned role ids.
    pub roles: Vec<String>,
}

/// A guild and its membership.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Guild {
    /// Guild id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Owner's user id.
    pub owner_id: Option<String>,
    /// Guild is in an outage.
    pub unavailable: bool,
    /// Member count announced by the server.
    pub member_count: u64,
    /// Loaded members keyed by user id.
    pub members: HashMap<String, Member>,
    /// Roles keyed by role id.
    pub roles: HashMap<String, Role>,
    /// Banned user ids seen this session.
    pub bans: HashSet<String>,
    /// Voice states: user id to voice channel id.
    pub voice_states: HashMap<String, String>,
}

/// A guild text channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextChannel {
    /// Channel id.
    pub id: String,
    /// Owning guild.
    pub guild_id: String,
    /// Display name.
    pub name: String,
    /// Channel topic.
    pub topic: Option<String>,
    /// Sort position.
    pub position: i64,
}

/// A guild voice channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VoiceChannel {
    /// Channel id.
    pub id: String,
    /// Owning guild.
    pub guild_id: String,
    /// Display name.
    pub name: String,
    /// Sort position.
    pub position: i64,
}

/// A direct-message channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrivateChannel {
    /// Channel id.
    pub id: String,
    /// The other participant.
    pub recipient_id: String,
}

/// What to announce once a locked guild finishes loading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum GuildAnnouncement {
    /// The guild was known (READY stub or outage).
    Available,
    /// The guild is new to the client.
    Joined,
}

// ── Guild locks ──────────────────────────────────────────────

/// Member chunks are capped at this size; a smaller chunk is the last.
pub(crate) const MEMBER_CHUNK_LIMIT: usize = 1000;

#[derive(Debug)]
struct GuildLock {
    expected: u64,
    loaded: u64,
    finished: bool,
    announcement: GuildAnnouncement,
    queued: Vec<GatewayPayload>,
}

/// A guild whose members finished loading, with its queued envelopes.
#[derive(Debug)]
pub(crate) struct ReleasedGuild {
    pub(crate) guild_id: String,
    pub(crate) announcement: GuildAnnouncement,
    pub(crate) queued: Vec<GatewayPayload>,
}

/// Large guilds waiting on member chunks.
#[derive(Debug, Default)]
pub(crate) struct GuildLockTable {
    locks: HashMap<String, GuildLock>,
}

impl GuildLockTable {
    pub(crate) fn lock(
        &mut self,
        guild_id: &str,
        expected: u64,
        loaded: u64,
        announcement: GuildAnnouncement,
    ) {
        self.locks.insert(
            guild_id.to_string(),
            GuildLock {
                expected,
                loaded,
                finished: false,
                announcement,
                queued: Vec::new(),
            },
        );
    }

    pub(crate) fn is_locked(&self, guild_id: &str) -> bool {
        self.locks.contains_key(guild_id)
    }

    /// Queue an envelope behind the lock. Returns it back if the guild is
    /// not locked.
    pub(crate) fn queue(
        &mut self,
        guild_id: &str,
        payload: GatewayPayload,
    ) -> Result<(), GatewayPayload> {
        match self.locks.get_mut(guild_id) {
            Some(lock) => {
                lock.queued.push(payload);
                Ok(())
            },
            None => Err(payload),
        }
    }

    pub(crate) fn record_chunk(&mut self, guild_id: &str, count: usize) {
        if let Some(lock) = self.locks.get_mut(guild_id) {
            lock.loaded = lock
                .loaded
                .saturating_add(u64::try_from(count).unwrap_or(u64::MAX));
            if count < MEMBER_CHUNK_LIMIT {
                lock.finished = true;
            }
        }
    }

    /// Remove and return every lock whose members are all loaded.
    pub(crate) fn drain_released(&mut self) -> Vec<ReleasedGuild> {
        let done: Vec<String> = self
            .locks
            .iter()
            .filter(|(_, lock)| lock.finished || lock.loaded >= lock.expected)
            .map(|(id, _)| id.clone())
            .collect();

        done.into_iter()
            .filter_map(|id| {
                self.locks.remove(&id).map(|lock| ReleasedGuild {
                    guild_id: id,
                    announcement: lock.announcement,
                    queued: lock.queued,
                })
            })
            .collect()
    }

    /// Drop a lock and whatever was queued behind it. Returns how many
    /// envelopes were discarded, or `None` if the guild was not locked.
    pub(crate) fn remove(&mut self, guild_id: &str) -> Option<usize> {
        self.locks.remove(guild_id).map(|lock| lock.queued.len())
    }

    pub(crate) fn locked_ids(&self) -> Vec<String> {
        self.locks.keys().cloned().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.locks.len()
    }

    pub(crate) fn clear(&mut self) {
        self.locks.clear();
    }
}

// ── Registry ─────────────────────────────────────────────────

/// Concurrent store of everything the gateway has told the client.
#[derive(Debug, Default)]
pub struct EntityRegistry {
    guilds: DashMap<String, Guild>,
    text_channels: DashMap<String, TextChannel>,
    voice_channels: DashMap<String, VoiceChannel>,
    users: DashMap<String, User>,
    private_channels: DashMap<String, PrivateChannel>,
    offline_private_channels: DashMap<String, String>,
    audio_managers: DashMap<String, Arc<AudioManager>>,
    self_user: RwLock<Option<User>>,
    guild_locks: Mutex<GuildLockTable>,
}

impl EntityRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every entity, audio manager and guild lock. The client's own
    /// user survives.
    pub fn clear(&self) {
        self.guilds.clear();
        self.text_channels.clear();
        self.voice_channels.clear();
        self.users.clear();
        self.private_channels.clear();
        self.offline_private_channels.clear();
        self.audio_managers.clear();
        self.locks().clear();
    }

    // -- guilds --

    /// Look up a guild.
    #[must_use]
    pub fn guild(&self, id: &str) -> Option<Guild> {
        self.guilds.get(id).map(|g| g.value().clone())
    }

    /// Snapshot of every guild.
    #[must_use]
    pub fn guilds(&self) -> Vec<Guild> {
        self.guilds.iter().map(|g| g.value().clone()).collect()
    }

    /// Number of known guilds.
    #[must_use]
    pub fn guild_count(&self) -> usize {
        self.guilds.len()
    }

    pub(crate) fn insert_guild(&self, guild: Guild) {
        self.guilds.insert(guild.id.clone(), guild);
    }

    /// Apply `f` to a guild in place.
    pub(crate) fn update_guild<R>(&self, id: &str, f: impl FnOnce(&mut Guild) -> R) -> Option<R> {
        self.guilds.get_mut(id).map(|mut g| f(g.value_mut()))
    }

    /// Remove a guild with its channels and audio manager.
    pub(crate) fn remove_guild(&self, id: &str) -> Option<Guild> {
        self.text_channels.retain(|_, c| c.guild_id != id);
        self.voice_channels.retain(|_, c| c.guild_id != id);
        self.audio_managers.remove(id);
        self.guilds.remove(id).map(|(_, g)| g)
    }

    // -- channels --

    /// Look up a text channel.
    #[must_use]
    pub fn text_channel(&self, id: &str) -> Option<TextChannel> {
        self.text_channels.get(id).map(|c| c.value().clone())
    }

    /// Snapshot of every text channel.
    #[must_use]
    pub fn text_channels(&self) -> Vec<TextChannel> {
        self.text_channels.iter().map(|c| c.value().clone()).collect()
    }

    /// Look up a voice channel.
    #[must_use]
    pub fn voice_channel(&self, id: &str) -> Option<VoiceChannel> {
        self.voice_channels.get(id).map(|c| c.value().clone())
    }

    /// Snapshot of every voice channel.
    #[must_use]
    pub fn voice_channels(&self) -> Vec<VoiceChannel> {
        self.voice_channels.iter().map(|c| c.value().clone()).collect()
    }

    pub(crate) fn insert_text_channel(&self, channel: TextChannel) {
        self.text_channels.insert(channel.id.clone(), channel);
    }

    pub(crate) fn insert_voice_channel(&self, channel: VoiceChannel) {
        self.voice_channels.insert(channel.id.clone(), channel);
    }

    /// Remove a channel of any kind; returns the owning guild if known.
    pub(crate) fn remove_channel(&self, id: &str) -> Option<Option<String>> {
        if let Some((_, c)) = self.text_channels.remove(id) {
            return Some(Some(c.guild_id));
        }
        if let Some((_, c)) = self.voice_channels.remove(id) {
            return Some(Some(c.guild_id));
        }
        if let Some((_, c)) = self.private_channels.remove(id) {
            self.offline_private_channels.remove(&c.recipient_id);
            return Some(None);
        }
        None
    }

    // -- users --

    /// Look up a user.
    #[must_use]
    pub fn user(&self, id: &str) -> Option<User> {
        self.users.get(id).map(|u| u.value().clone())
    }

    /// Snapshot of every user.
    #[must_use]
    pub fn users(&self) -> Vec<User> {
        self.users.iter().map(|u| u.value().clone()).collect()
    }

    /// Insert or refresh a user, keeping its known presence.
    pub(crate) fn upsert_user(&self, mut user: User) {
        if let Some(existing) = self.users.get(&user.id) {
            user.status = user.status.or_else(|| existing.status.clone());
        }
        self.users.insert(user.id.clone(), user);
    }

    pub(crate) fn update_user<R>(&self, id: &str, f: impl FnOnce(&mut User) -> R) -> Option<R> {
        self.users.get_mut(id).map(|mut u| f(u.value_mut()))
    }

    /// The client's own user, from READY.
    #[must_use]
    pub fn self_user(&self) -> Option<User> {
        self.self_user
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn set_self_user(&self, user: User) {
        *self.self_user.write().unwrap_or_else(PoisonError::into_inner) = Some(user);
    }

    // -- private channels --

    /// Look up a private channel.
    #[must_use]
    pub fn private_channel(&self, id: &str) -> Option<PrivateChannel> {
        self.private_channels.get(id).map(|c| c.value().clone())
    }

    /// Snapshot of every private channel.
    #[must_use]
    pub fn private_channels(&self) -> Vec<PrivateChannel> {
        self.private_channels.iter().map(|c| c.value().clone()).collect()
    }

    /// Private channel id with a user who shares no guild with the client.
    #[must_use]
    pub fn offline_private_channel(&self, user_id: &str) -> Option<String> {
        self.offline_private_channels
            .get(user_id)
            .map(|c| c.value().clone())
    }

    pub(crate) fn insert_private_channel(&self, channel: PrivateChannel) {
        if !self.users.contains_key(&channel.recipient_id) {
            self.offline_private_channels
                .insert(channel.recipient_id.clone(), channel.id.clone());
        }
        self.private_channels.insert(channel.id.clone(), channel);
    }

    // -- audio --

    /// Audio manager for a guild, if one was created.
    #[must_use]
    pub fn audio_manager(&self, guild_id: &str) -> Option<Arc<AudioManager>> {
        self.audio_managers.get(guild_id).map(|m| Arc::clone(m.value()))
    }

    /// Snapshot of every audio manager.
    #[must_use]
    pub fn audio_managers(&self) -> Vec<Arc<AudioManager>> {
        self.audio_managers
            .iter()
            .map(|m| Arc::clone(m.value()))
            .collect()
    }

    pub(crate) fn audio_manager_or_insert_with(
        &self,
        guild_id: &str,
        create: impl FnOnce() -> AudioManager,
    ) -> Arc<AudioManager> {
        Arc::clone(
            self.audio_managers
                .entry(guild_id.to_string())
                .or_insert_with(|| Arc::new(create()))
                .value(),
        )
    }

    // -- guild locks --

    pub(crate) fn locks(&self) -> MutexGuard<'_, GuildLockTable> {
        self.guild_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

// ── Parsing ──────────────────────────────────────────────────

/// Kind of a channel object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ChannelKind {
    Text,
    Voice,
    Private,
    Other,
}

/// Read the channel kind, accepting both string and numeric `type` fields.
pub(crate) fn channel_kind(channel: &Value) -> ChannelKind {
    if channel.get("is_private").and_then(Value::as_bool) == Some(true) {
        return ChannelKind::Private;
    }
    match channel.get("type") {
        Some(Value::String(s)) => match s.as_str() {
            "text" => ChannelKind::Text,
            "voice" => ChannelKind::Voice,
            _ => ChannelKind::Other,
        },
        Some(Value::Number(n)) => match n.as_u64() {
            Some(0) => ChannelKind::Text,
            Some(1) => ChannelKind::Private,
            Some(2) => ChannelKind::Voice,
            _ => ChannelKind::Other,
        },
        _ => ChannelKind::Other,
    }
}

fn str_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_string)
}

pub(crate) fn parse_text_channel(channel: &Value, guild_id: &str) -> Option<TextChannel> {
    Some(TextChannel {
        id: str_field(channel, "id")?,
        guild_id: str_field(channel, "guild_id").unwrap_or_else(|| guild_id.to_string()),
        name: str_field(channel, "name").unwrap_or_default(),
        topic: str_field(channel, "topic"),
        position: channel.get("position").and_then(Value::as_i64).unwrap_or(0),
    })
}

pub(crate) fn parse_voice_channel(channel: &Value, guild_id: &str) -> Option<VoiceChannel> {
    Some(VoiceChannel {
        id: str_field(channel, "id")?,
        guild_id: str_field(channel, "guild_id").unwrap_or_else(|| guild_id.to_string()),
        name: str_field(channel, "name").unwrap_or_default(),
        position: channel.get("position").and_then(Value::as_i64).unwrap_or(0),
    })
}

pub(crate) fn parse_private_channel(channel: &Value) -> Option<PrivateChannel> {
    let recipient = channel
        .get("recipient")
        .or_else(|| channel.get("recipients").and_then(|r| r.get(0)))?;
    Some(PrivateChannel {
        id: str_field(channel, "id")?,
        recipient_id: str_field(recipient, "id")?,
    })
}

pub(crate) fn parse_member(member: &Value) -> Option<(Member, User)> {
    let user: User = serde_json::from_value(member.get("user")?.clone()).ok()?;
    let roles = member
        .get("roles")
        .and_then(Value::as_array)
        .map(|roles| {
            roles
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    Some((
        Member {
            user_id: user.id.clone(),
            nick: str_field(member, "nick"),
            roles,
        },
        user,
    ))
}
