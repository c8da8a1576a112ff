//! Streaming session client.
//!
//! ## States
//!
//! ```text
//! Idle ─open()─► Opening ─setupComplete─► Open ─close()─► Closing ─► Closed
//!                   │                       │
//!                   └──── transport error ──┴──────────────────────► Failed
//! ```
//!
//! One driver task owns the connection. It sends the setup message, waits
//! for the acknowledgment, then dispatches inbound server messages until the
//! session is closed or the transport fails. Outbound frames are forwarded by
//! a separate writer task, so a stalled transport writer never holds back
//! inbound speech or interruptions.
//! Exactly one of `on_close` / `on_error` fires, and it is always the last
//! callback.
//!
//! Audio frames handed to [`LiveSession::send_audio_frame`] before the
//! handshake completes wait in the same FIFO queue as later ones, so the
//! remote side sees every frame in capture order.

pub mod protocol;
pub mod transport;
pub mod websocket;

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::{
    buffering::frame::AudioFrame,
    error::{LiveError, Result},
};
use protocol::{
    ClientMessage, Content, GenerationConfig, Modality, ServerEvent, Setup, SpeechConfig,
};
use transport::{Connection, LiveTransport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Idle,
    Opening,
    Open,
    Closing,
    Closed,
    Failed,
}

/// Receives session callbacks on the driver task, in order.
pub trait SessionHandler: Send + 'static {
    fn on_open(&mut self);
    fn on_message(&mut self, event: ServerEvent);
    fn on_close(&mut self);
    fn on_error(&mut self, error: LiveError);
}

/// Callbacks flattened into a queue item.
#[derive(Debug)]
pub enum SessionEvent {
    Open,
    Message(ServerEvent),
    Closed,
    Error(LiveError),
}

impl SessionHandler for mpsc::UnboundedSender<SessionEvent> {
    fn on_open(&mut self) {
        let _ = self.send(SessionEvent::Open);
    }

    fn on_message(&mut self, event: ServerEvent) {
        let _ = self.send(SessionEvent::Message(event));
    }

    fn on_close(&mut self) {
        let _ = self.send(SessionEvent::Closed);
    }

    fn on_error(&mut self, error: LiveError) {
        let _ = self.send(SessionEvent::Error(error));
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Model id, with or without the `models/` prefix.
    pub model: String,
    pub voice: String,
    pub system_instruction: Option<String>,
    /// Upper bound on connect plus setup acknowledgment.
    pub connect_timeout: Duration,
}

impl SessionConfig {
    pub fn setup_message(&self) -> ClientMessage {
        let model = if self.model.starts_with("models/") {
            self.model.clone()
        } else {
            format!("models/{}", self.model)
        };
        ClientMessage::Setup(Setup {
            model,
            generation_config: GenerationConfig {
                response_modalities: vec![Modality::Audio],
                speech_config: Some(SpeechConfig::prebuilt(self.voice.clone())),
            },
            system_instruction: self.system_instruction.as_deref().map(Content::text),
        })
    }
}

/// Cloneable handle for pushing frames into a session from another thread.
#[derive(Clone)]
pub struct FrameSender {
    state: Arc<Mutex<ConnectionState>>,
    tx: mpsc::UnboundedSender<AudioFrame>,
}

impl FrameSender {
    /// Queue a frame for sending. Never blocks.
    ///
    /// # Errors
    /// `LiveError::NotOpen` once the session is closing, closed, or failed.
    /// The frame is dropped.
    pub fn send(&self, frame: AudioFrame) -> Result<()> {
        match *self.state.lock() {
            ConnectionState::Opening | ConnectionState::Open => {
                self.tx.send(frame).map_err(|_| LiveError::NotOpen)
            }
            _ => Err(LiveError::NotOpen),
        }
    }
}

pub struct LiveSession {
    state: Arc<Mutex<ConnectionState>>,
    frames: FrameSender,
    frames_sent: Arc<AtomicU64>,
    cancel: CancellationToken,
    done_rx: watch::Receiver<bool>,
}

impl LiveSession {
    /// Start connecting. Returns immediately in `Opening`; progress is
    /// reported through `handler`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open(
        transport: Arc<dyn LiveTransport>,
        config: SessionConfig,
        handler: impl SessionHandler,
    ) -> Self {
        let state = Arc::new(Mutex::new(ConnectionState::Opening));
        let (tx, frames_rx) = mpsc::unbounded_channel();
        let frames_sent = Arc::new(AtomicU64::new(0));
        let cancel = CancellationToken::new();
        let (done_tx, done_rx) = watch::channel(false);

        let driver = Driver {
            state: Arc::clone(&state),
            frames_sent: Arc::clone(&frames_sent),
            cancel: cancel.clone(),
            handler: Box::new(handler),
        };
        tokio::spawn(async move {
            driver.run(transport, config, frames_rx).await;
            let _ = done_tx.send(true);
        });

        Self {
            frames: FrameSender {
                state: Arc::clone(&state),
                tx,
            },
            state,
            frames_sent,
            cancel,
            done_rx,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// See [`FrameSender::send`].
    pub fn send_audio_frame(&self, frame: AudioFrame) -> Result<()> {
        self.frames.send(frame)
    }

    pub fn frame_sender(&self) -> FrameSender {
        self.frames.clone()
    }

    /// Frames written to the transport so far.
    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::Relaxed)
    }

    pub(crate) fn frames_sent_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.frames_sent)
    }

    /// Request a graceful close. Safe to call any number of times, in any
    /// state. Does not wait; see [`LiveSession::closed`].
    pub fn close(&self) {
        {
            let mut state = self.state.lock();
            if matches!(*state, ConnectionState::Opening | ConnectionState::Open) {
                *state = ConnectionState::Closing;
                info!("closing live session");
            }
        }
        self.cancel.cancel();
    }

    /// Resolves once the driver has delivered its terminal callback.
    pub async fn closed(&self) {
        let mut rx = self.done_rx.clone();
        let _ = rx.wait_for(|done| *done).await;
    }
}

impl Drop for LiveSession {
    fn drop(&mut self) {
        self.close();
    }
}

struct Driver {
    state: Arc<Mutex<ConnectionState>>,
    frames_sent: Arc<AtomicU64>,
    cancel: CancellationToken,
    handler: Box<dyn SessionHandler>,
}

impl Driver {
    async fn run(
        mut self,
        transport: Arc<dyn LiveTransport>,
        config: SessionConfig,
        frames_rx: mpsc::UnboundedReceiver<AudioFrame>,
    ) {
        // `drive` drops the frame queue; anything still queued goes nowhere.
        let outcome = self.drive(transport.as_ref(), &config, frames_rx).await;

        match outcome {
            Ok(()) => {
                *self.state.lock() = ConnectionState::Closed;
                info!(frames_sent = self.frames_sent.load(Ordering::Relaxed), "live session closed");
                self.handler.on_close();
            }
            Err(e) => {
                *self.state.lock() = ConnectionState::Failed;
                warn!("live session failed: {e}");
                self.handler.on_error(e);
            }
        }
    }

    async fn drive(
        &mut self,
        transport: &dyn LiveTransport,
        config: &SessionConfig,
        frames_rx: mpsc::UnboundedReceiver<AudioFrame>,
    ) -> Result<()> {
        let timeout = config.connect_timeout;
        let handshake = tokio::time::timeout(timeout, handshake(transport, config));

        let conn = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                debug!("session closed during handshake");
                return Ok(());
            }
            res = handshake => match res {
                Ok(conn) => conn?,
                Err(_) => {
                    return Err(LiveError::Connection(format!(
                        "no setup acknowledgment within {}s",
                        timeout.as_secs_f32()
                    )))
                }
            },
        };

        {
            let mut state = self.state.lock();
            if *state != ConnectionState::Opening {
                return Ok(());
            }
            *state = ConnectionState::Open;
        }
        info!("live session open");
        self.handler.on_open();

        let Connection {
            outbound,
            mut inbound,
        } = conn;
        let writer_stop = self.cancel.child_token();
        let mut writer = tokio::spawn(forward_frames(
            frames_rx,
            outbound,
            Arc::clone(&self.frames_sent),
            writer_stop.clone(),
        ));
        let mut writer_done = false;

        let mut turn = 0u64;
        let outcome = loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break Ok(()),
                msg = inbound.recv() => match msg {
                    Some(Ok(msg)) => {
                        if let Some(go_away) = msg.go_away {
                            warn!(time_left = ?go_away.time_left, "live service is about to disconnect");
                        }
                        if let Some(content) = msg.server_content {
                            let event = content.into_event(turn);
                            if event.turn_complete {
                                turn += 1;
                            }
                            self.handler.on_message(event);
                        }
                    }
                    Some(Err(e)) => break Err(e),
                    None => {
                        info!("live service closed the session");
                        break Ok(());
                    }
                },
                res = &mut writer, if !writer_done => {
                    writer_done = true;
                    match res {
                        // Every frame sender is gone; inbound keeps flowing.
                        Ok(Ok(())) => debug!("frame queue closed"),
                        Ok(Err(e)) => break Err(e),
                        Err(e) => {
                            break Err(LiveError::Connection(format!("frame writer task failed: {e}")))
                        }
                    }
                }
            }
        };

        writer_stop.cancel();
        if !writer_done {
            let _ = writer.await;
        }
        outcome
    }
}

/// Drain the frame queue into the transport, in order, until stopped.
async fn forward_frames(
    mut frames: mpsc::UnboundedReceiver<AudioFrame>,
    outbound: mpsc::Sender<ClientMessage>,
    sent: Arc<AtomicU64>,
    stop: CancellationToken,
) -> Result<()> {
    loop {
        let frame = tokio::select! {
            biased;
            _ = stop.cancelled() => return Ok(()),
            frame = frames.recv() => match frame {
                Some(frame) => frame,
                None => return Ok(()),
            },
        };
        tokio::select! {
            biased;
            _ = stop.cancelled() => return Ok(()),
            res = outbound.send(ClientMessage::audio(&frame)) => {
                res.map_err(|_| LiveError::Connection("transport writer closed".into()))?;
            }
        }
        sent.fetch_add(1, Ordering::Relaxed);
        trace!(seq = frame.seq(), samples = frame.len(), "frame sent");
    }
}

async fn handshake(transport: &dyn LiveTransport, config: &SessionConfig) -> Result<Connection> {
    let mut conn = transport.connect().await?;
    conn.outbound
        .send(config.setup_message())
        .await
        .map_err(|_| LiveError::Connection("transport closed before setup".into()))?;

    loop {
        match conn.inbound.recv().await {
            Some(Ok(msg)) if msg.setup_complete.is_some() => return Ok(conn),
            Some(Ok(_)) => debug!("ignoring server message received before setup acknowledgment"),
            Some(Err(e)) => return Err(e),
            None => {
                return Err(LiveError::Connection(
                    "connection closed before setup acknowledgment".into(),
                ))
            }
        }
    }
}
