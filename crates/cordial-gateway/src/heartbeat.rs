//! Heartbeat task: keeps the session alive at the server-supplied interval.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::connection::Outbound;
use crate::protocol;
use crate::session::SequenceTracker;

/// Smallest interval the scheduler will run at.
const MIN_INTERVAL: Duration = Duration::from_millis(100);

/// Owns at most one running heartbeat loop.
///
/// Each loop gets a child of the client's cancellation token, so a client
/// shutdown stops it even if [`stop`](Self::stop) is never called.
#[derive(Debug)]
pub(crate) struct HeartbeatScheduler {
    parent: CancellationToken,
    current: Option<(CancellationToken, JoinHandle<()>)>,
}

impl HeartbeatScheduler {
    pub(crate) fn new(parent: CancellationToken) -> Self {
        Self {
            parent,
            current: None,
        }
    }

    /// Start a loop, replacing any loop already running.
    pub(crate) fn start(
        &mut self,
        interval: Duration,
        sequence: Arc<SequenceTracker>,
        outbound: Outbound,
    ) {
        self.stop();

        let interval = if interval < MIN_INTERVAL {
            warn!(?interval, "Heartbeat interval too small, clamping");
            MIN_INTERVAL
        } else {
            interval
        };

        let cancel = self.parent.child_token();
        let handle = tokio::spawn(run_heartbeat(interval, sequence, outbound, cancel.clone()));
        debug!(interval_ms = interval.as_millis(), "Heartbeat started");
        self.current = Some((cancel, handle));
    }

    /// Cancel the running loop, if any.
    pub(crate) fn stop(&mut self) {
        if let Some((cancel, handle)) = self.current.take() {
            cancel.cancel();
            handle.abort();
            debug!("Heartbeat stopped");
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.current
            .as_ref()
            .is_some_and(|(cancel, handle)| !cancel.is_cancelled() && !handle.is_finished())
    }
}

impl Drop for HeartbeatScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_heartbeat(
    interval: Duration,
    sequence: Arc<SequenceTracker>,
    outbound: Outbound,
    cancel: CancellationToken,
) {
    loop {
        let seq = sequence.get();
        if outbound.send(protocol::build_heartbeat(seq)).is_err() {
            debug!("Outbound channel gone, heartbeat exiting");
            return;
        }
        debug!(seq = ?seq, "Sent heartbeat");

        tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            () = tokio::time::sleep(interval) => {},
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;
    use crate::connection::OutboundFrame;
    use crate::protocol::opcode;

    fn attached() -> (Outbound, mpsc::UnboundedReceiver<OutboundFrame>) {
        let outbound = Outbound::new();
        let (tx, rx) = mpsc::unbounded_channel();
        outbound.attach(tx);
        (outbound, rx)
    }

    fn heartbeat_seq(frame: OutboundFrame) -> Option<u64> {
        match frame {
            OutboundFrame::Payload(p) if p.op == opcode::HEARTBEAT => p.data().as_u64(),
            other => panic!("expected heartbeat, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn sends_immediately_then_every_interval() {
        let (outbound, mut rx) = attached();
        let sequence = Arc::new(SequenceTracker::default());
        sequence.observe(4);

        let mut scheduler = HeartbeatScheduler::new(CancellationToken::new());
        scheduler.start(Duration::from_secs(40), Arc::clone(&sequence), outbound);

        assert_eq!(heartbeat_seq(rx.recv().await.unwrap()), Some(4));

        sequence.observe(9);
        tokio::time::advance(Duration::from_secs(40)).await;
        assert_eq!(heartbeat_seq(rx.recv().await.unwrap()), Some(9));
        assert!(scheduler.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn restart_replaces_previous_loop() {
        let (outbound, mut rx) = attached();
        let sequence = Arc::new(SequenceTracker::default());
        let mut scheduler = HeartbeatScheduler::new(CancellationToken::new());

        scheduler.start(Duration::from_secs(10), Arc::clone(&sequence), outbound.clone());
        rx.recv().await.unwrap();
        scheduler.start(Duration::from_secs(30), Arc::clone(&sequence), outbound);
        rx.recv().await.unwrap();

        // Only the second loop should fire at 30s; the first would have
        // fired three times by then.
        tokio::time::advance(Duration::from_secs(30)).await;
        rx.recv().await.unwrap();
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn parent_cancellation_stops_loop() {
        let (outbound, mut rx) = attached();
        let parent = CancellationToken::new();
        let mut scheduler = HeartbeatScheduler::new(parent.clone());
        scheduler.start(
            Duration::from_secs(5),
            Arc::new(SequenceTracker::default()),
            outbound,
        );
        rx.recv().await.unwrap();

        parent.cancel();
        assert!(!scheduler.is_running());
        tokio::time::advance(Duration::from_secs(20)).await;
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn exits_when_outbound_detached() {
        let outbound = Outbound::new();
        let mut scheduler = HeartbeatScheduler::new(CancellationToken::new());
        scheduler.start(
            Duration::from_secs(5),
            Arc::new(SequenceTracker::default()),
            outbound,
        );
        let (_, handle) = scheduler.current.take().unwrap();
        handle.await.unwrap();
    }
}
