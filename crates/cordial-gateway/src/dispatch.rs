//! Inbound envelope routing.
//!
//! The dispatcher runs on the inbound task and owns the session state, the
//! heartbeat scheduler and the audio reconnect tracker, so every state
//! transition happens in frame order.

use std::sync::Arc;
use std::time::Duration;

use cordial_events::{ChannelRef, EventMetadata, GatewayEvent};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::audio::AudioReconnectTracker;
use crate::backoff::Backoff;
use crate::codec::{self, InboundFrame};
use crate::context::GatewayContext;
use crate::error::GatewayResult;
use crate::handlers::{EventKind, HandlerContext, HandlerTable, announcement_event};
use crate::heartbeat::HeartbeatScheduler;
use crate::protocol::{
    self, GatewayPayload, HelloPayload, NORMAL_CLOSURE, ReadyPayload, ResumedPayload, opcode,
};
use crate::session::{SessionPhase, SessionState};

/// Sees every parsed envelope before the dispatcher does.
pub trait RawInterceptor: Send + Sync {
    /// Return `true` to consume the envelope.
    fn intercept(&self, payload: &GatewayPayload) -> bool;
}

impl<F> RawInterceptor for F
where
    F: Fn(&GatewayPayload) -> bool + Send + Sync,
{
    fn intercept(&self, payload: &GatewayPayload) -> bool {
        self(payload)
    }
}

pub(crate) struct Dispatcher {
    ctx: GatewayContext,
    session: SessionState,
    heartbeat: HeartbeatScheduler,
    audio: AudioReconnectTracker,
    handlers: HandlerTable,
    interceptor: Option<Arc<dyn RawInterceptor>>,
}

impl Dispatcher {
    pub(crate) fn new(
        ctx: GatewayContext,
        handlers: HandlerTable,
        interceptor: Option<Arc<dyn RawInterceptor>>,
        cancel: CancellationToken,
    ) -> Self {
        let backoff = Backoff::new(ctx.config.backoff_floor, ctx.config.backoff_ceiling);
        Self {
            ctx,
            session: SessionState::new(backoff),
            heartbeat: HeartbeatScheduler::new(cancel),
            audio: AudioReconnectTracker::default(),
            handlers,
            interceptor,
        }
    }

    pub(crate) fn context(&self) -> &GatewayContext {
        &self.ctx
    }

    pub(crate) fn phase(&self) -> SessionPhase {
        self.session.phase()
    }

    pub(crate) fn backoff(&mut self) -> &mut Backoff {
        &mut self.session.backoff
    }

    // ── Connection lifecycle ─────────────────────────────────

    pub(crate) fn begin_connect(&mut self) {
        self.session.begin_connect();
    }

    /// Send Identify or Resume on a freshly attached transport.
    pub(crate) fn on_connected(&mut self) -> GatewayResult<()> {
        let handshake = self.session.handshake(&self.ctx.config);
        self.ctx.outbound.send(handshake)
    }

    /// Transport lost. Session state is kept so the next connection resumes,
    /// including a cold start that had not finished loading.
    pub(crate) fn on_disconnected(&mut self) {
        self.heartbeat.stop();
        if self.session.is_loading() {
            debug!(
                pending = self.session.pending_guild_count(),
                cached = self.session.cached_len(),
                "Disconnected while loading, will resume"
            );
        }
        self.session.on_disconnected();
    }

    /// Record active voice channels for rejoining later.
    pub(crate) fn snapshot_voice(&mut self) -> Vec<ChannelRef> {
        self.audio.snapshot(&self.ctx.registry)
    }

    /// Voice channels active right now, without recording them.
    pub(crate) fn active_voice(&self) -> Vec<ChannelRef> {
        let mut channels: Vec<ChannelRef> = self
            .ctx
            .registry
            .audio_managers()
            .iter()
            .filter_map(|m| {
                m.active_channel()
                    .map(|c| ChannelRef::new(m.guild_id(), c))
            })
            .collect();
        channels.sort_by(|a, b| a.guild_id.cmp(&b.guild_id));
        channels
    }

    pub(crate) fn stop_heartbeat(&mut self) {
        self.heartbeat.stop();
    }

    // ── Inbound ──────────────────────────────────────────────

    /// Decode one frame and route it. Errors are logged and contained.
    pub(crate) fn handle_frame(&mut self, frame: InboundFrame) {
        match codec::normalize(frame) {
            Ok(text) => self.handle_text(&text),
            Err(e) => warn!(error = %e, "Dropping undecodable frame"),
        }
    }

    pub(crate) fn handle_text(&mut self, text: &str) {
        trace!("-> {text}");
        match serde_json::from_str::<GatewayPayload>(text) {
            Ok(payload) => self.handle_payload(payload),
            Err(e) => warn!(error = %e, raw = text, "Failed to decode envelope"),
        }
    }

    pub(crate) fn handle_payload(&mut self, payload: GatewayPayload) {
        if let Some(sequence) = payload.s {
            self.session.sequence().observe(sequence);
        }

        if let Some(interceptor) = &self.interceptor
            && interceptor.intercept(&payload)
        {
            trace!(op = payload.op, "Envelope consumed by interceptor");
            return;
        }

        match payload.op {
            opcode::DISPATCH => self.dispatch(payload),
            opcode::HEARTBEAT => {
                let beat = protocol::build_heartbeat(self.session.sequence().get());
                if let Err(e) = self.ctx.outbound.send(beat) {
                    warn!(error = %e, "Failed to answer heartbeat request");
                }
            },
            opcode::RECONNECT => {
                info!("Server requested reconnect");
                if let Err(e) = self.ctx.outbound.close(NORMAL_CLOSURE) {
                    warn!(error = %e, "Failed to close for reconnect");
                }
            },
            opcode::INVALID_SESSION => self.invalidate(),
            opcode::HELLO => {
                match serde_json::from_value::<HelloPayload>(payload.data().clone()) {
                    Ok(hello) => {
                        debug!(interval_ms = hello.heartbeat_interval, "HELLO");
                        self.session
                            .set_hello_interval(Duration::from_millis(hello.heartbeat_interval));
                    },
                    Err(e) => warn!(error = %e, "Malformed HELLO"),
                }
            },
            opcode::HEARTBEAT_ACK => trace!("Heartbeat ACK"),
            other => debug!(op = other, "Ignoring unhandled opcode"),
        }
    }

    fn dispatch(&mut self, payload: GatewayPayload) {
        let Some(event_type) = payload.t.as_deref() else {
            warn!(seq = ?payload.s, "Dispatch without event type");
            return;
        };
        let Some(kind) = EventKind::from_type(event_type) else {
            debug!(event_type, "Ignoring unknown dispatch type");
            return;
        };
        if kind.is_ignored() {
            return;
        }

        if self.session.should_buffer(kind) {
            trace!(event_type, cached = self.session.cached_len(), "Caching during cold start");
            self.session.cache(payload);
            return;
        }

        // Guild lifecycle envelopes are never queued behind a guild lock.
        let payload = if kind.is_cold_start_exempt() {
            payload
        } else {
            match guild_scope(&payload) {
                Some(guild_id) => match self.ctx.registry.locks().queue(&guild_id, payload) {
                    Ok(()) => {
                        trace!(event_type = kind.as_str(), guild_id, "Queued behind guild lock");
                        return;
                    },
                    Err(payload) => payload,
                },
                None => payload,
            }
        };

        self.route(kind, &payload);
    }

    fn route(&mut self, kind: EventKind, payload: &GatewayPayload) {
        let data = payload.data();
        match kind {
            EventKind::Ready => self.on_ready(payload),
            EventKind::Resumed => self.on_resumed(payload),
            EventKind::PresenceReplace => {
                for presence in data.as_array().map_or(&[][..], Vec::as_slice) {
                    self.run_handler(EventKind::PresenceUpdate, payload, presence);
                }
            },
            EventKind::MessageUpdate if data.get("author").is_none() => {
                self.run_handler(EventKind::MessageEmbed, payload, data);
            },
            EventKind::VoiceServerUpdate if !self.ctx.config.audio_enabled => {
                debug!("Ignoring VOICE_SERVER_UPDATE, audio disabled");
            },
            _ => self.run_handler(kind, payload, data),
        }

        match kind {
            EventKind::GuildCreate | EventKind::GuildMembersChunk => {
                self.after_guild_progress(kind, data);
            },
            EventKind::GuildDelete => self.after_guild_departure(data),
            _ => {},
        }
    }

    fn run_handler(&self, kind: EventKind, payload: &GatewayPayload, data: &Value) {
        let Some(handler) = self.handlers.get(kind) else {
            trace!(event_type = kind.as_str(), "No handler installed");
            return;
        };
        let ctx = HandlerContext {
            gateway: &self.ctx,
            kind,
            sequence: payload.s,
            cold_start: self.session.is_loading(),
        };
        if let Err(e) = handler.handle(&ctx, data) {
            let raw = serde_json::to_string(payload).unwrap_or_default();
            warn!(event_type = kind.as_str(), error = %e, raw, "Handler failed");
        }
    }

    // ── Session transitions ──────────────────────────────────

    fn on_ready(&mut self, payload: &GatewayPayload) {
        self.run_handler(EventKind::Ready, payload, payload.data());

        let ready = match serde_json::from_value::<ReadyPayload>(payload.data().clone()) {
            Ok(ready) => ready,
            Err(e) => {
                warn!(error = %e, "Malformed READY");
                return;
            },
        };

        let mut pending: Vec<String> = ready
            .guilds
            .iter()
            .filter(|g| g.unavailable)
            .map(|g| g.id.clone())
            .collect();
        pending.extend(self.ctx.registry.locks().locked_ids());

        info!(
            guilds = ready.guilds.len(),
            pending = pending.len(),
            "Session ready, loading guilds"
        );
        self.session.on_ready(ready.session_id, pending);
        self.start_heartbeat(ready.heartbeat_interval);
        self.maybe_complete_cold_start();
    }

    fn on_resumed(&mut self, payload: &GatewayPayload) {
        let resumed: ResumedPayload =
            serde_json::from_value(payload.data().clone()).unwrap_or_default();

        let loading = self.session.on_resumed();
        self.start_heartbeat(resumed.heartbeat_interval);
        if loading {
            info!(
                pending = self.session.pending_guild_count(),
                "Session resumed mid load, continuing cold start"
            );
            self.maybe_complete_cold_start();
            return;
        }
        self.audio.replay(&self.ctx);

        info!(seq = ?self.session.sequence().get(), "Session resumed");
        self.ctx.publish(GatewayEvent::Resumed {
            metadata: EventMetadata::new("gateway").with_sequence(payload.s),
        });
    }

    fn invalidate(&mut self) {
        warn!("Session invalidated, re-identifying");
        self.audio.preserve_handlers(&self.ctx.registry);
        self.ctx.registry.clear();
        self.session.invalidate();

        let identify = self.session.handshake(&self.ctx.config);
        if let Err(e) = self.ctx.outbound.send(identify) {
            warn!(error = %e, "Failed to send identify after invalidation");
        }
    }

    fn start_heartbeat(&mut self, interval_ms: Option<u64>) {
        let interval = interval_ms
            .map(Duration::from_millis)
            .or_else(|| self.session.hello_interval());
        match interval {
            Some(interval) => self.heartbeat.start(
                interval,
                Arc::clone(self.session.sequence()),
                self.ctx.outbound.clone(),
            ),
            None => warn!("No heartbeat interval known, heartbeat not started"),
        }
    }

    fn after_guild_progress(&mut self, kind: EventKind, data: &Value) {
        let released = self.ctx.registry.locks().drain_released();
        let cold_start = self.session.is_loading();

        for guild in released {
            debug!(guild_id = guild.guild_id, queued = guild.queued.len(), "Guild members loaded");
            self.session.guild_arrived(&guild.guild_id);
            if !cold_start {
                self.ctx.publish(announcement_event(
                    EventMetadata::new(kind.as_str()),
                    &guild.guild_id,
                    guild.announcement,
                ));
            }
            for queued in guild.queued {
                self.dispatch(queued);
            }
        }

        if kind == EventKind::GuildCreate
            && data.get("unavailable").and_then(Value::as_bool) != Some(true)
            && let Some(id) = data.get("id").and_then(Value::as_str)
            && !self.ctx.registry.locks().is_locked(id)
        {
            self.session.guild_arrived(id);
        }

        trace!(pending = self.session.pending_guild_count(), "Guild progress");
        self.maybe_complete_cold_start();
    }

    /// A departed guild no longer holds up loading.
    fn after_guild_departure(&mut self, data: &Value) {
        if let Some(id) = data.get("id").and_then(Value::as_str) {
            self.session.guild_arrived(id);
        }
        trace!(pending = self.session.pending_guild_count(), "Guild departed");
        self.maybe_complete_cold_start();
    }

    fn maybe_complete_cold_start(&mut self) {
        if !self.session.cold_start_ready() {
            return;
        }

        let completion = self.session.complete_cold_start();
        let metadata = EventMetadata::new("gateway").with_sequence(self.session.sequence().get());
        self.audio.restore_handlers(&self.ctx);
        self.audio.replay(&self.ctx);
        if completion.first {
            info!(guilds = self.ctx.registry.guild_count(), "Fully loaded");
            self.ctx.publish(GatewayEvent::Ready { metadata });
        } else {
            info!(guilds = self.ctx.registry.guild_count(), "Guilds reloaded after reconnect");
            self.ctx.publish(GatewayEvent::Reconnected { metadata });
        }

        debug!(cached = completion.cached.len(), "Replaying cached events");
        for payload in completion.cached {
            self.dispatch(payload);
        }
    }
}

/// Guild an envelope belongs to, for guild-lock queueing.
fn guild_scope(payload: &GatewayPayload) -> Option<String> {
    payload
        .data()
        .get("guild_id")
        .and_then(Value::as_str)
        .map(str::to_string)
}
