//! `LiveAssistant`: top-level lifecycle controller.
//!
//! ## Lifecycle
//!
//! ```text
//! LiveAssistant::new()
//!     └─► start_session(persona)   status = Connecting
//!           output device → session (setup sent) → capture → session loop
//!           └─► setupComplete      status = Connected   (Speaking while audio plays)
//!               └─► stop_session() status = Idle
//! ```
//!
//! Any failure on the way in or during the session sets `Error` with a
//! detail string and releases everything acquired so far. Nothing retries.
//! `stop_session()` is idempotent and always ends in `Idle`.
//!
//! ## Threading
//!
//! The capture stream lives on its own framing thread, the cpal output on
//! its own render thread. Everything else (session events, scheduling,
//! ended notices) is handled by one spawned task, [`session_loop`].

pub mod capture;
pub mod persona;
pub mod session_loop;
mod status;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    audio::{output::OutputDevice, CaptureBackend},
    error::{LiveError, Result},
    ipc::events::{LiveStatus, LiveStatusEvent},
    playback::{DecodeParams, PlaybackScheduler},
    session::{transport::LiveTransport, LiveSession, SessionConfig},
};
use capture::{CaptureConfig, CapturePipeline, FrameSink};
use persona::Persona;
use session_loop::{DiagnosticsSnapshot, LiveDiagnostics, SessionLoop};
use status::StatusHub;

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-native-audio-preview-09-2025";
pub const DEFAULT_VOICE: &str = "Kore";

/// Configuration for `LiveAssistant`.
#[derive(Debug, Clone)]
pub struct LiveConfig {
    /// Rate of outbound frames (Hz). Default: 16000.
    pub input_sample_rate: u32,
    /// Samples per outbound frame. Default: 4096 (256 ms at 16 kHz).
    pub frame_size: usize,
    /// Rate assumed for inbound speech that declares none. Default: 24000.
    pub output_sample_rate: u32,
    /// Interleaved channels in inbound speech. Default: 1.
    pub output_channels: u16,
    pub model: String,
    /// Prebuilt voice name. Default: `Kore`.
    pub voice: String,
    /// Connect plus setup acknowledgment. Default: 15 s.
    pub connect_timeout: Duration,
    /// Capture device name; `None` picks the system default.
    pub preferred_input_device: Option<String>,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            input_sample_rate: 16_000,
            frame_size: 4096,
            output_sample_rate: 24_000,
            output_channels: 1,
            model: DEFAULT_MODEL.to_string(),
            voice: DEFAULT_VOICE.to_string(),
            connect_timeout: Duration::from_secs(15),
            preferred_input_device: None,
        }
    }
}

/// Opens the output device for one session. Called on a blocking thread.
pub trait OutputFactory: Send + Sync + 'static {
    fn open(&self) -> Result<Arc<dyn OutputDevice>>;
}

impl<F> OutputFactory for F
where
    F: Fn() -> Result<Arc<dyn OutputDevice>> + Send + Sync + 'static,
{
    fn open(&self) -> Result<Arc<dyn OutputDevice>> {
        self()
    }
}

struct ActiveSession {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// The live voice assistant.
///
/// `Send + Sync`; share it behind an `Arc` between the host's UI handlers.
pub struct LiveAssistant {
    config: LiveConfig,
    capture: Arc<dyn CaptureBackend>,
    transport: Arc<dyn LiveTransport>,
    output: Arc<dyn OutputFactory>,
    status: Arc<StatusHub>,
    diagnostics: Arc<LiveDiagnostics>,
    /// Serializes start/stop.
    active: Mutex<Option<ActiveSession>>,
    /// Parent of every session's cancel token.
    shutdown: CancellationToken,
}

impl LiveAssistant {
    pub fn new(
        config: LiveConfig,
        capture: Arc<dyn CaptureBackend>,
        transport: Arc<dyn LiveTransport>,
        output: Arc<dyn OutputFactory>,
    ) -> Self {
        Self {
            config,
            capture,
            transport,
            output,
            status: Arc::new(StatusHub::new()),
            diagnostics: Arc::new(LiveDiagnostics::default()),
            active: Mutex::new(None),
            shutdown: CancellationToken::new(),
        }
    }

    /// Microphone and speakers through cpal.
    #[cfg(feature = "audio-cpal")]
    pub fn with_default_devices(config: LiveConfig, transport: Arc<dyn LiveTransport>) -> Self {
        use crate::audio::{cpal_output::CpalOutput, CpalCapture};

        let capture = Arc::new(CpalCapture::new(config.preferred_input_device.clone()));
        let output = Arc::new(|| -> Result<Arc<dyn OutputDevice>> {
            Ok(Arc::new(CpalOutput::open()?))
        });
        Self::new(config, capture, transport, output)
    }

    pub fn config(&self) -> &LiveConfig {
        &self.config
    }

    /// Start a live session and wait until it is open.
    ///
    /// # Errors
    /// - `LiveError::AlreadyRunning` if a session is active.
    /// - Device errors from the output factory or the capture backend.
    /// - `Connection` / `Protocol` when the session fails or closes before
    ///   it opens, including the handshake timeout.
    pub async fn start_session(&self, persona: Persona) -> Result<()> {
        let ready_rx = {
            let mut active = self.active.lock().await;
            if active.as_ref().is_some_and(|a| !a.task.is_finished()) {
                return Err(LiveError::AlreadyRunning);
            }
            if let Some(done) = active.take() {
                let _ = done.task.await;
            }

            self.diagnostics.reset();
            self.status.set(LiveStatus::Connecting, None);
            info!(role = ?persona.role, model = self.config.model.as_str(), "starting live session");

            let (session_loop, ready_rx) = self.open_resources(&persona).await?;
            let cancel = session_loop.cancel.clone();
            let task = tokio::spawn(session_loop.run());
            *active = Some(ActiveSession { cancel, task });
            ready_rx
        };

        match ready_rx.await {
            Ok(result) => result,
            Err(_) => Err(LiveError::Other(anyhow::anyhow!(
                "session loop exited without reporting"
            ))),
        }
    }

    /// Output, session, capture. On failure, whatever was opened is
    /// released and the status is `Error`.
    async fn open_resources(
        &self,
        persona: &Persona,
    ) -> Result<(SessionLoop, oneshot::Receiver<Result<()>>)> {
        let factory = Arc::clone(&self.output);
        let device = match tokio::task::spawn_blocking(move || factory.open()).await {
            Ok(Ok(device)) => device,
            Ok(Err(e)) => return Err(self.fail(e)),
            Err(e) => {
                return Err(self.fail(LiveError::Other(anyhow::anyhow!(
                    "output open task failed: {e}"
                ))))
            }
        };

        let (event_tx, events) = mpsc::unbounded_channel();
        let session = LiveSession::open(
            Arc::clone(&self.transport),
            SessionConfig {
                model: self.config.model.clone(),
                voice: self.config.voice.clone(),
                system_instruction: Some(persona.system_instruction()),
                connect_timeout: self.config.connect_timeout,
            },
            event_tx,
        );
        self.diagnostics.track_frames_sent(session.frames_sent_counter());

        let frames = session.frame_sender();
        let diagnostics = Arc::clone(&self.diagnostics);
        let sink: FrameSink = Box::new(move |frame| {
            diagnostics
                .frames_captured
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            if frames.send(frame).is_err() {
                diagnostics
                    .frames_rejected
                    .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            }
        });
        let capture = match CapturePipeline::start(
            Arc::clone(&self.capture),
            CaptureConfig {
                target_sample_rate: self.config.input_sample_rate,
                frame_size: self.config.frame_size,
            },
            sink,
        )
        .await
        {
            Ok(c) => c,
            Err(e) => {
                session.close();
                return Err(self.fail(e));
            }
        };

        let (ended_tx, ended) = mpsc::unbounded_channel();
        let scheduler = PlaybackScheduler::new(
            device,
            DecodeParams {
                sample_rate: self.config.output_sample_rate,
                channels: self.config.output_channels,
            },
            ended_tx,
        );

        let (ready_tx, ready_rx) = oneshot::channel();
        let session_loop = SessionLoop {
            session,
            capture,
            scheduler,
            events,
            ended,
            cancel: self.shutdown.child_token(),
            status: Arc::clone(&self.status),
            diagnostics: Arc::clone(&self.diagnostics),
            ready: Some(ready_tx),
        };
        Ok((session_loop, ready_rx))
    }

    /// Stop the current session, if any, and wait for its teardown.
    /// Always ends in `Idle`.
    pub async fn stop_session(&self) {
        let active = self.active.lock().await.take();
        if let Some(active) = active {
            info!("stopping live session");
            active.cancel.cancel();
            if let Err(e) = active.task.await {
                warn!("session loop ended abnormally: {e}");
            }
        }
        self.status.set(LiveStatus::Idle, None);
    }

    /// Current status, with `Speaking` projected from playback.
    pub fn status(&self) -> LiveStatus {
        self.status.status()
    }

    /// Subscribe to live status change events.
    pub fn subscribe_status(&self) -> broadcast::Receiver<LiveStatusEvent> {
        self.status.subscribe()
    }

    /// Snapshot of session counters for observability.
    pub fn diagnostics_snapshot(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }

    fn fail(&self, e: LiveError) -> LiveError {
        error!("live session failed to start: {e}");
        self.status.set(LiveStatus::Error, Some(e.to_string()));
        e
    }
}

impl Drop for LiveAssistant {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_live_service() {
        let c = LiveConfig::default();
        assert_eq!(c.input_sample_rate, 16_000);
        assert_eq!(c.frame_size, 4096);
        assert_eq!(c.output_sample_rate, 24_000);
        assert_eq!(c.output_channels, 1);
        assert_eq!(c.voice, "Kore");
        assert_eq!(c.connect_timeout, Duration::from_secs(15));
        assert!(c.preferred_input_device.is_none());
    }
}
