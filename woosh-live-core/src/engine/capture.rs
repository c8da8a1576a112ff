//! Microphone → fixed-size PCM frames.
//!
//! ```text
//! CaptureBackend callback ─► SPSC ring ─► framing thread
//!                                           │ resample device rate → 16 kHz
//!                                           │ Framer (4096 samples)
//!                                           ▼
//!                                         FrameSink (non-blocking)
//! ```
//!
//! The device stream is opened, drained, and dropped on the framing thread,
//! so a `!Send` stream never crosses threads.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::{
    audio::{resample::RateConverter, CaptureBackend},
    buffering::{create_audio_ring, frame::AudioFrame, frame::Framer, AudioConsumer, Consumer},
    error::{LiveError, Result},
};

/// Samples drained from the ring per iteration (20 ms at 48 kHz).
const DRAIN_CHUNK: usize = 960;

/// Sleep when the ring is empty.
const EMPTY_SLEEP: Duration = Duration::from_millis(5);

/// Receives every completed frame, on the framing thread. Must not block.
pub type FrameSink = Box<dyn FnMut(AudioFrame) + Send + 'static>;

#[derive(Debug, Clone, Copy)]
pub struct CaptureConfig {
    /// Rate of the frames handed to the sink.
    pub target_sample_rate: u32,
    /// Samples per frame.
    pub frame_size: usize,
}

/// A running capture. Dropping it releases the microphone.
pub struct CapturePipeline {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    device_sample_rate: u32,
}

impl CapturePipeline {
    /// Open the capture device and start framing.
    ///
    /// Resolves once the device is open or has failed to open.
    ///
    /// # Errors
    /// Whatever the backend reports (`PermissionDenied`, `DeviceUnavailable`,
    /// `AudioStream`), or `AudioStream` when the resampler rejects the
    /// device rate.
    pub async fn start(
        backend: Arc<dyn CaptureBackend>,
        config: CaptureConfig,
        sink: FrameSink,
    ) -> Result<Self> {
        if config.frame_size == 0 || config.target_sample_rate == 0 {
            return Err(LiveError::AudioStream(format!(
                "invalid capture config: {config:?}"
            )));
        }

        let running = Arc::new(AtomicBool::new(true));
        let (open_tx, open_rx) = oneshot::channel::<Result<u32>>();
        let thread_running = Arc::clone(&running);

        let thread = thread::Builder::new()
            .name("woosh-capture".into())
            .spawn(move || {
                let (producer, consumer) = create_audio_ring();
                let stream = match backend.open(producer, Arc::clone(&thread_running)) {
                    Ok(s) => s,
                    Err(e) => {
                        thread_running.store(false, Ordering::SeqCst);
                        let _ = open_tx.send(Err(e));
                        return;
                    }
                };

                let device_rate = stream.sample_rate();
                let resampler =
                    match RateConverter::new(device_rate, config.target_sample_rate, DRAIN_CHUNK) {
                        Ok(r) => r,
                        Err(e) => {
                            thread_running.store(false, Ordering::SeqCst);
                            let _ = open_tx.send(Err(LiveError::AudioStream(e.to_string())));
                            return;
                        }
                    };
                let _ = open_tx.send(Ok(device_rate));

                let framer = Framer::new(config.frame_size, config.target_sample_rate);
                run_framing(consumer, resampler, framer, &thread_running, sink);

                // Stream drops here, releasing the device on this thread.
                drop(stream);
                info!("capture stream released");
            })?;

        match open_rx.await {
            Ok(Ok(device_sample_rate)) => {
                info!(
                    device_sample_rate,
                    target_sample_rate = config.target_sample_rate,
                    frame_size = config.frame_size,
                    "capture started"
                );
                Ok(Self {
                    running,
                    thread: Some(thread),
                    device_sample_rate,
                })
            }
            Ok(Err(e)) => {
                join_off_runtime(thread).await;
                Err(e)
            }
            Err(_) => {
                join_off_runtime(thread).await;
                Err(LiveError::AudioStream(
                    "capture thread exited before opening the device".into(),
                ))
            }
        }
    }

    pub fn device_sample_rate(&self) -> u32 {
        self.device_sample_rate
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stop framing and release the device. Idempotent.
    ///
    /// Blocks for at most one drain interval plus the device release; async
    /// callers use [`CapturePipeline::shutdown`].
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(t) = self.thread.take() {
            if t.join().is_err() {
                error!("capture thread panicked");
            }
        }
    }

    /// [`CapturePipeline::stop`] with the join moved to the blocking pool.
    pub async fn shutdown(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(t) = self.thread.take() {
            join_off_runtime(t).await;
        }
    }
}

async fn join_off_runtime(thread: JoinHandle<()>) {
    match tokio::task::spawn_blocking(move || thread.join()).await {
        Ok(Ok(())) => {}
        Ok(Err(_)) => error!("capture thread panicked"),
        Err(e) => error!("capture join task failed: {e}"),
    }
}

impl Drop for CapturePipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_framing(
    mut consumer: AudioConsumer,
    mut resampler: RateConverter,
    mut framer: Framer,
    running: &AtomicBool,
    mut sink: FrameSink,
) {
    if !resampler.is_passthrough() {
        debug!("capture resampling enabled");
    }
    let mut raw = vec![0f32; DRAIN_CHUNK];
    let mut frames = 0u64;

    while running.load(Ordering::Relaxed) {
        let n = consumer.pop_slice(&mut raw);
        if n == 0 {
            thread::sleep(EMPTY_SLEEP);
            continue;
        }

        let resampled = resampler.process(&raw[..n]);
        if resampled.is_empty() {
            continue;
        }
        for frame in framer.push(&resampled) {
            frames += 1;
            sink(frame);
        }
    }

    if framer.pending_len() > 0 {
        warn!(
            samples = framer.pending_len(),
            "discarding partial frame at capture stop"
        );
        framer.clear();
    }
    info!(frames, "framing stopped");
}
