//! Session state machine: identify vs. resume, cold start, invalidation.
//!
//! Owned by the dispatcher and mutated only from the inbound task, so none
//! of this needs locking except the sequence counter, which the heartbeat
//! task reads.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tracing::debug;

use crate::backoff::Backoff;
use crate::config::GatewayConfig;
use crate::handlers::EventKind;
use crate::protocol::{self, GatewayPayload};

/// Where the session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// No transport.
    Disconnected,
    /// Transport opening.
    Connecting,
    /// Identify sent, waiting for READY.
    Identifying,
    /// Resume sent, waiting for RESUMED.
    Resuming,
    /// READY received, waiting for unavailable guilds to arrive.
    ColdStart,
    /// Fully usable.
    Ready,
}

/// Last sequence number seen, shared with the heartbeat task.
#[derive(Debug, Default)]
pub struct SequenceTracker {
    last: Mutex<Option<u64>>,
}

impl SequenceTracker {
    /// Record a sequence number. Never moves backwards.
    pub fn observe(&self, sequence: u64) {
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        if last.is_none_or(|current| sequence > current) {
            *last = Some(sequence);
        }
    }

    /// The highest sequence number seen so far.
    #[must_use]
    pub fn get(&self) -> Option<u64> {
        *self.last.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Forget the sequence (session invalidated).
    pub fn reset(&self) {
        *self.last.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

/// Envelopes held back until cold start completes.
#[derive(Debug, Default)]
pub(crate) struct EventCache {
    queue: VecDeque<GatewayPayload>,
}

impl EventCache {
    pub(crate) fn push(&mut self, payload: GatewayPayload) {
        self.queue.push_back(payload);
    }

    /// Take everything in arrival order, leaving the cache empty.
    pub(crate) fn drain(&mut self) -> Vec<GatewayPayload> {
        std::mem::take(&mut self.queue).into()
    }

    pub(crate) fn len(&self) -> usize {
        self.queue.len()
    }

    pub(crate) fn clear(&mut self) {
        self.queue.clear();
    }
}

/// Result of finishing a cold start.
#[derive(Debug)]
pub(crate) struct ColdStartCompletion {
    /// First cold start since the client was built.
    pub(crate) first: bool,
    /// Envelopes cached during the cold start, in arrival order.
    pub(crate) cached: Vec<GatewayPayload>,
}

/// Session bookkeeping for one client.
#[derive(Debug)]
pub(crate) struct SessionState {
    phase: SessionPhase,
    session_id: Option<String>,
    sequence: Arc<SequenceTracker>,
    first_init: bool,
    loading: bool,
    pending_guilds: HashSet<String>,
    cache: EventCache,
    hello_interval: Option<Duration>,
    pub(crate) backoff: Backoff,
}

impl SessionState {
    pub(crate) fn new(backoff: Backoff) -> Self {
        Self {
            phase: SessionPhase::Disconnected,
            session_id: None,
            sequence: Arc::new(SequenceTracker::default()),
            first_init: true,
            loading: true,
            pending_guilds: HashSet::new(),
            cache: EventCache::default(),
            hello_interval: None,
            backoff,
        }
    }

    pub(crate) fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub(crate) fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub(crate) fn sequence(&self) -> &Arc<SequenceTracker> {
        &self.sequence
    }

    pub(crate) fn begin_connect(&mut self) {
        self.phase = SessionPhase::Connecting;
        self.hello_interval = None;
    }

    /// Build the first frame for a fresh transport: Resume when a session
    /// id is held, Identify otherwise.
    pub(crate) fn handshake(&mut self, config: &GatewayConfig) -> GatewayPayload {
        match &self.session_id {
            Some(session_id) => {
                self.phase = SessionPhase::Resuming;
                debug!(session_id, seq = ?self.sequence.get(), "Resuming session");
                protocol::build_resume(&config.token, session_id, self.sequence.get())
            },
            None => {
                self.phase = SessionPhase::Identifying;
                self.loading = true;
                debug!("Identifying new session");
                protocol::build_identify(config)
            },
        }
    }

    /// Whether the session has not finished its cold start yet. Survives
    /// transport drops, so a resumed session keeps loading.
    pub(crate) fn is_loading(&self) -> bool {
        self.loading
    }

    /// Whether a dispatch of this kind must wait for cold start to finish.
    pub(crate) fn should_buffer(&self, kind: EventKind) -> bool {
        self.loading && !kind.is_cold_start_exempt()
    }

    pub(crate) fn cache(&mut self, payload: GatewayPayload) {
        self.cache.push(payload);
    }

    pub(crate) fn cached_len(&self) -> usize {
        self.cache.len()
    }

    pub(crate) fn on_ready(
        &mut self,
        session_id: String,
        pending: impl IntoIterator<Item = String>,
    ) {
        self.session_id = Some(session_id);
        self.phase = SessionPhase::ColdStart;
        self.loading = true;
        self.pending_guilds = pending.into_iter().collect();
    }

    pub(crate) fn guild_arrived(&mut self, guild_id: &str) {
        self.pending_guilds.remove(guild_id);
    }

    pub(crate) fn pending_guild_count(&self) -> usize {
        self.pending_guilds.len()
    }

    pub(crate) fn cold_start_ready(&self) -> bool {
        self.loading && self.phase == SessionPhase::ColdStart && self.pending_guilds.is_empty()
    }

    /// Leave cold start. The cache is emptied exactly once, here.
    pub(crate) fn complete_cold_start(&mut self) -> ColdStartCompletion {
        self.phase = SessionPhase::Ready;
        self.loading = false;
        self.backoff.reset();
        let first = std::mem::replace(&mut self.first_init, false);
        ColdStartCompletion {
            first,
            cached: self.cache.drain(),
        }
    }

    /// RESUMED received. Returns `true` when the resumed session had not
    /// finished loading, in which case it goes back to cold start.
    pub(crate) fn on_resumed(&mut self) -> bool {
        self.backoff.reset();
        if self.loading {
            self.phase = SessionPhase::ColdStart;
        } else {
            self.phase = SessionPhase::Ready;
        }
        self.loading
    }

    /// Drop the session; the next handshake identifies.
    pub(crate) fn invalidate(&mut self) {
        self.session_id = None;
        self.sequence.reset();
        self.pending_guilds.clear();
        self.cache.clear();
        self.loading = true;
        self.phase = SessionPhase::Identifying;
    }

    /// Transport lost. The session id, sequence and any unfinished cold
    /// start are kept so the next connection resumes.
    pub(crate) fn on_disconnected(&mut self) {
        self.phase = SessionPhase::Disconnected;
    }

    pub(crate) fn set_hello_interval(&mut self, interval: Duration) {
        self.hello_interval = Some(interval);
    }

    pub(crate) fn hello_interval(&self) -> Option<Duration> {
        self.hello_interval
    }
}
