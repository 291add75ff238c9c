//! Voice-channel signaling and its recovery across reconnects.
//!
//! No media is carried here. An [`AudioManager`] tracks which voice channel
//! a guild is joined to and holds the application's audio handlers; the
//! [`AudioReconnectTracker`] carries both across a transport drop or a
//! session invalidation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use cordial_events::ChannelRef;
use tracing::{debug, info, warn};

use crate::connection::Outbound;
use crate::context::GatewayContext;
use crate::error::{GatewayError, GatewayResult};
use crate::protocol;
use crate::registry::{EntityRegistry, VoiceChannel};

/// Supplies outgoing audio to a media transport.
pub trait AudioSendHandler: Send + Sync {
    /// Whether a frame is ready.
    fn can_provide(&self) -> bool;

    /// Next 20ms Opus or PCM frame.
    fn provide_frame(&self) -> Option<Vec<u8>>;
}

/// Consumes incoming audio from a media transport.
pub trait AudioReceiveHandler: Send + Sync {
    /// Whether this handler wants audio at all.
    fn can_receive(&self) -> bool {
        true
    }

    /// Handle one decoded frame from `user_id`.
    fn handle_frame(&self, user_id: &str, pcm: &[i16]);
}

/// Signaling state of one guild's voice connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioConnectionState {
    /// Not in voice.
    Disconnected,
    /// Join sent, waiting for the voice server.
    Connecting(String),
    /// Voice server assigned.
    Connected(String),
    /// The server moved the client out of voice without being asked.
    UnexpectedlyDisconnected(String),
}

impl AudioConnectionState {
    /// Channel id for every state except [`Disconnected`](Self::Disconnected).
    #[must_use]
    pub fn channel_id(&self) -> Option<&str> {
        match self {
            Self::Disconnected => None,
            Self::Connecting(id) | Self::Connected(id) | Self::UnexpectedlyDisconnected(id) => {
                Some(id)
            },
        }
    }
}

/// Per-guild voice signaling and handler storage.
pub struct AudioManager {
    guild_id: String,
    outbound: Outbound,
    state: Mutex<AudioConnectionState>,
    send_handler: Mutex<Option<Arc<dyn AudioSendHandler>>>,
    receive_handler: Mutex<Option<Arc<dyn AudioReceiveHandler>>>,
}

impl AudioManager {
    pub(crate) fn new(guild_id: impl Into<String>, outbound: Outbound) -> Self {
        Self {
            guild_id: guild_id.into(),
            outbound,
            state: Mutex::new(AudioConnectionState::Disconnected),
            send_handler: Mutex::new(None),
            receive_handler: Mutex::new(None),
        }
    }

    /// Guild this manager belongs to.
    #[must_use]
    pub fn guild_id(&self) -> &str {
        &self.guild_id
    }

    /// Current signaling state.
    #[must_use]
    pub fn state(&self) -> AudioConnectionState {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Channel the manager is connected, connecting or was unexpectedly
    /// disconnected from.
    #[must_use]
    pub fn active_channel(&self) -> Option<String> {
        self.state().channel_id().map(str::to_string)
    }

    /// Ask the gateway to join `channel`.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::InvalidArgument`] if the channel belongs to
    /// another guild, or [`GatewayError::NotConnected`] without a transport.
    pub fn open_audio_connection(&self, channel: &VoiceChannel) -> GatewayResult<()> {
        if channel.guild_id != self.guild_id {
            return Err(GatewayError::InvalidArgument(format!(
                "voice channel {} belongs to guild {}, not {}",
                channel.id, channel.guild_id, self.guild_id
            )));
        }
        self.outbound.send(protocol::build_voice_state(
            &self.guild_id,
            Some(&channel.id),
        ))?;
        self.set_state(AudioConnectionState::Connecting(channel.id.clone()));
        debug!(guild_id = %self.guild_id, channel_id = %channel.id, "Opening audio connection");
        Ok(())
    }

    /// Leave voice in this guild.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::NotConnected`] without a transport.
    pub fn close_audio_connection(&self) -> GatewayResult<()> {
        self.outbound
            .send(protocol::build_voice_state(&self.guild_id, None))?;
        self.set_state(AudioConnectionState::Disconnected);
        debug!(guild_id = %self.guild_id, "Closed audio connection");
        Ok(())
    }

    /// Connecting → Connected. Returns whether the state changed.
    pub(crate) fn mark_connected(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if let AudioConnectionState::Connecting(channel) = &*state {
            *state = AudioConnectionState::Connected(channel.clone());
            true
        } else {
            false
        }
    }

    /// Connected → UnexpectedlyDisconnected. Returns whether the state changed.
    pub(crate) fn mark_unexpectedly_disconnected(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if let AudioConnectionState::Connected(channel) = &*state {
            *state = AudioConnectionState::UnexpectedlyDisconnected(channel.clone());
            true
        } else {
            false
        }
    }

    pub(crate) fn mark_disconnected(&self) {
        self.set_state(AudioConnectionState::Disconnected);
    }

    fn set_state(&self, next: AudioConnectionState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = next;
    }

    /// Install or remove the send handler.
    pub fn set_send_handler(&self, handler: Option<Arc<dyn AudioSendHandler>>) {
        *self
            .send_handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = handler;
    }

    /// Current send handler.
    #[must_use]
    pub fn send_handler(&self) -> Option<Arc<dyn AudioSendHandler>> {
        self.send_handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Install or remove the receive handler.
    pub fn set_receive_handler(&self, handler: Option<Arc<dyn AudioReceiveHandler>>) {
        *self
            .receive_handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = handler;
    }

    /// Current receive handler.
    #[must_use]
    pub fn receive_handler(&self) -> Option<Arc<dyn AudioReceiveHandler>> {
        self.receive_handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn handlers(&self) -> PreservedHandlers {
        PreservedHandlers {
            send: self.send_handler(),
            receive: self.receive_handler(),
        }
    }

    fn install(&self, handlers: &PreservedHandlers) {
        if let Some(send) = &handlers.send {
            self.set_send_handler(Some(Arc::clone(send)));
        }
        if let Some(receive) = &handlers.receive {
            self.set_receive_handler(Some(Arc::clone(receive)));
        }
    }
}

impl std::fmt::Debug for AudioManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioManager")
            .field("guild_id", &self.guild_id)
            .field("state", &self.state())
            .field("has_send_handler", &self.send_handler().is_some())
            .field("has_receive_handler", &self.receive_handler().is_some())
            .finish_non_exhaustive()
    }
}

// ── Reconnect tracking ───────────────────────────────────────

#[derive(Clone, Default)]
struct PreservedHandlers {
    send: Option<Arc<dyn AudioSendHandler>>,
    receive: Option<Arc<dyn AudioReceiveHandler>>,
}

impl PreservedHandlers {
    fn is_empty(&self) -> bool {
        self.send.is_none() && self.receive.is_none()
    }
}

/// A voice channel to rejoin once the session is usable again.
#[derive(Clone)]
pub(crate) struct PendingVoiceConnection {
    guild_id: String,
    channel_id: String,
    handlers: PreservedHandlers,
}

impl std::fmt::Debug for PendingVoiceConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingVoiceConnection")
            .field("guild_id", &self.guild_id)
            .field("channel_id", &self.channel_id)
            .finish_non_exhaustive()
    }
}

/// Carries voice connections and audio handlers across reconnects.
#[derive(Default)]
pub(crate) struct AudioReconnectTracker {
    pending: HashMap<String, PendingVoiceConnection>,
    preserved: HashMap<String, PreservedHandlers>,
}

impl AudioReconnectTracker {
    /// Record every guild with an active voice channel. At most one entry
    /// per guild; a later snapshot overwrites an earlier one.
    pub(crate) fn snapshot(&mut self, registry: &EntityRegistry) -> Vec<ChannelRef> {
        for manager in registry.audio_managers() {
            if let Some(channel_id) = manager.active_channel() {
                self.pending.insert(
                    manager.guild_id().to_string(),
                    PendingVoiceConnection {
                        guild_id: manager.guild_id().to_string(),
                        channel_id,
                        handlers: manager.handlers(),
                    },
                );
            }
        }
        self.pending_channels()
    }

    /// Capture handlers (and active channels) before the audio managers
    /// are discarded.
    pub(crate) fn preserve_handlers(&mut self, registry: &EntityRegistry) {
        self.snapshot(registry);
        for manager in registry.audio_managers() {
            let handlers = manager.handlers();
            if !handlers.is_empty() {
                self.preserved
                    .insert(manager.guild_id().to_string(), handlers);
            }
        }
        debug!(
            preserved = self.preserved.len(),
            pending = self.pending.len(),
            "Preserved audio state"
        );
    }

    /// Reattach preserved handlers to fresh audio managers.
    pub(crate) fn restore_handlers(&mut self, ctx: &GatewayContext) {
        for (guild_id, handlers) in self.preserved.drain() {
            match ctx.audio_manager(&guild_id) {
                Ok(manager) => manager.install(&handlers),
                Err(e) => {
                    warn!(guild_id, error = %e, "Dropping audio handlers for unresolved guild");
                },
            }
        }
    }

    /// Send a leave for every pending guild, then rejoin every pending
    /// channel that still resolves. The pending set is cleared either way.
    /// Returns how many joins were sent.
    pub(crate) fn replay(&mut self, ctx: &GatewayContext) -> usize {
        if self.pending.is_empty() {
            return 0;
        }

        let mut pending: Vec<PendingVoiceConnection> =
            self.pending.drain().map(|(_, p)| p).collect();
        pending.sort_by(|a, b| a.guild_id.cmp(&b.guild_id));

        for p in &pending {
            if let Err(e) = ctx
                .outbound
                .send(protocol::build_voice_state(&p.guild_id, None))
            {
                warn!(guild_id = %p.guild_id, error = %e, "Failed to send voice leave");
            }
        }

        let mut joined = 0usize;
        for p in pending {
            let Some(channel) = ctx
                .registry
                .voice_channel(&p.channel_id)
                .filter(|c| c.guild_id == p.guild_id)
            else {
                warn!(
                    guild_id = %p.guild_id,
                    channel_id = %p.channel_id,
                    "Voice channel no longer resolves, not rejoining"
                );
                continue;
            };
            let manager = match ctx.audio_manager(&p.guild_id) {
                Ok(manager) => manager,
                Err(e) => {
                    warn!(guild_id = %p.guild_id, error = %e, "Guild no longer resolves, not rejoining");
                    continue;
                },
            };
            manager.install(&p.handlers);
            match manager.open_audio_connection(&channel) {
                Ok(()) => joined = joined.saturating_add(1),
                Err(e) => {
                    warn!(guild_id = %p.guild_id, channel_id = %p.channel_id, error = %e, "Voice rejoin failed");
                },
            }
        }

        info!(joined, "Replayed voice connections");
        joined
    }

    pub(crate) fn pending_channels(&self) -> Vec<ChannelRef> {
        let mut channels: Vec<ChannelRef> = self
            .pending
            .values()
            .map(|p| ChannelRef::new(p.guild_id.clone(), p.channel_id.clone()))
            .collect();
        channels.sort_by(|a, b| a.guild_id.cmp(&b.guild_id));
        channels
    }

    pub(crate) fn pending_len(&self) -> usize {
        self.pending.len()
    }
}
