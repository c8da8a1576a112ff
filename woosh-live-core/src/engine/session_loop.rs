//! The single writer of a live session.
//!
//! One task owns the playback scheduler, the capture pipeline, and the
//! session handle. It consumes session events and playback-ended notices in
//! arrival order, so the scheduler's clock and active set need no lock.
//!
//! Every exit path (cancel, remote close, transport failure, fatal decode)
//! goes through the same teardown: interrupt playback, stop capture, close
//! the session, drop the output device.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::{capture::CapturePipeline, status::StatusHub};
use crate::{
    error::{LiveError, Result},
    ipc::events::LiveStatus,
    playback::{HandleId, PlaybackScheduler},
    session::{protocol::ServerEvent, LiveSession, SessionEvent},
};

/// Session counters, reset at every `start_session`.
#[derive(Default)]
pub struct LiveDiagnostics {
    pub frames_captured: AtomicU64,
    pub frames_rejected: AtomicU64,
    pub chunks_received: AtomicU64,
    pub chunks_scheduled: AtomicU64,
    pub chunks_malformed: AtomicU64,
    pub interruptions: AtomicU64,
    pub turns: AtomicU64,
    /// Owned by the current session's driver.
    frames_sent: Mutex<Arc<AtomicU64>>,
}

impl LiveDiagnostics {
    pub fn reset(&self) {
        self.frames_captured.store(0, Ordering::Relaxed);
        self.frames_rejected.store(0, Ordering::Relaxed);
        self.chunks_received.store(0, Ordering::Relaxed);
        self.chunks_scheduled.store(0, Ordering::Relaxed);
        self.chunks_malformed.store(0, Ordering::Relaxed);
        self.interruptions.store(0, Ordering::Relaxed);
        self.turns.store(0, Ordering::Relaxed);
        *self.frames_sent.lock() = Arc::new(AtomicU64::new(0));
    }

    pub(crate) fn track_frames_sent(&self, counter: Arc<AtomicU64>) {
        *self.frames_sent.lock() = counter;
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            frames_captured: self.frames_captured.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.lock().load(Ordering::Relaxed),
            frames_rejected: self.frames_rejected.load(Ordering::Relaxed),
            chunks_received: self.chunks_received.load(Ordering::Relaxed),
            chunks_scheduled: self.chunks_scheduled.load(Ordering::Relaxed),
            chunks_malformed: self.chunks_malformed.load(Ordering::Relaxed),
            interruptions: self.interruptions.load(Ordering::Relaxed),
            turns: self.turns.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsSnapshot {
    pub frames_captured: u64,
    pub frames_sent: u64,
    pub frames_rejected: u64,
    pub chunks_received: u64,
    pub chunks_scheduled: u64,
    pub chunks_malformed: u64,
    pub interruptions: u64,
    pub turns: u64,
}

/// Why the loop stopped.
enum Exit {
    Cancelled,
    RemoteClosed,
    Failed(LiveError),
}

pub(crate) struct SessionLoop {
    pub(crate) session: LiveSession,
    pub(crate) capture: CapturePipeline,
    pub(crate) scheduler: PlaybackScheduler,
    pub(crate) events: mpsc::UnboundedReceiver<SessionEvent>,
    pub(crate) ended: mpsc::UnboundedReceiver<HandleId>,
    pub(crate) cancel: CancellationToken,
    pub(crate) status: Arc<StatusHub>,
    pub(crate) diagnostics: Arc<LiveDiagnostics>,
    /// Completed on open, or with the reason the session never opened.
    pub(crate) ready: Option<oneshot::Sender<Result<()>>>,
}

impl SessionLoop {
    pub(crate) async fn run(mut self) {
        let exit = loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break Exit::Cancelled,
                Some(handle) = self.ended.recv() => {
                    if self.scheduler.handle_ended(handle) {
                        debug!("assistant finished speaking");
                        self.status.set_speaking(false);
                    }
                }
                event = self.events.recv() => match event {
                    Some(SessionEvent::Open) => {
                        self.status.set(LiveStatus::Connected, None);
                        if let Some(ready) = self.ready.take() {
                            let _ = ready.send(Ok(()));
                        }
                    }
                    Some(SessionEvent::Message(event)) => {
                        if let Err(e) = self.on_server_event(event) {
                            break Exit::Failed(e);
                        }
                    }
                    Some(SessionEvent::Error(e)) => break Exit::Failed(e),
                    Some(SessionEvent::Closed) | None => break Exit::RemoteClosed,
                },
            }
        };

        self.teardown().await;

        let opened = self.ready.is_none();
        let failure = match exit {
            Exit::Cancelled => {
                info!("live session stopped");
                self.status.set(LiveStatus::Idle, None);
                LiveError::Connection("session stopped before it opened".into())
            }
            Exit::RemoteClosed if opened => {
                info!("live session ended by the service");
                self.status.set(LiveStatus::Idle, None);
                return;
            }
            Exit::RemoteClosed => {
                let e = LiveError::Connection("session closed before it opened".into());
                self.status.set(LiveStatus::Error, Some(e.to_string()));
                e
            }
            Exit::Failed(e) => {
                error!("live session failed: {e}");
                self.status.set(LiveStatus::Error, Some(e.to_string()));
                e
            }
        };
        if let Some(ready) = self.ready.take() {
            let _ = ready.send(Err(failure));
        }
    }

    /// Audio first, then the interruption, then the turn boundary.
    fn on_server_event(&mut self, event: ServerEvent) -> Result<()> {
        if let Some(chunk) = event.audio {
            self.diagnostics.chunks_received.fetch_add(1, Ordering::Relaxed);
            let turn = chunk.turn;
            match self.scheduler.enqueue(chunk)? {
                Some(seg) => {
                    self.diagnostics.chunks_scheduled.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        turn,
                        handle = seg.handle.0,
                        start = seg.start,
                        duration = seg.duration,
                        "speech chunk scheduled"
                    );
                }
                None => {
                    self.diagnostics.chunks_malformed.fetch_add(1, Ordering::Relaxed);
                }
            }
            self.status.set_speaking(self.scheduler.is_speaking());
        }

        if event.interrupted {
            let stopped = self.scheduler.interrupt();
            self.diagnostics.interruptions.fetch_add(1, Ordering::Relaxed);
            info!(stopped, "assistant interrupted by the user");
            self.status.set_speaking(false);
        }

        if event.turn_complete {
            let turns = self.diagnostics.turns.fetch_add(1, Ordering::Relaxed) + 1;
            debug!(turns, "model turn complete");
        }
        Ok(())
    }

    async fn teardown(&mut self) {
        let stopped = self.scheduler.interrupt();
        self.status.set_speaking(false);
        self.capture.shutdown().await;
        self.session.close();
        self.session.closed().await;
        debug!(stopped, "session resources released");
    }
}
