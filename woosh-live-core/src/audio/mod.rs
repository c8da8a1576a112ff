//! Audio device backends.
//!
//! # Capture constraints
//!
//! The cpal input callback runs on an OS audio thread at elevated priority.
//! It must not allocate after warm-up, block on a lock, or do I/O. It
//! down-mixes to mono and writes into the SPSC ring producer, whose
//! `push_slice` is lock-free.
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms (COM on Windows, CoreAudio on
//! macOS). A [`CaptureStream`] is therefore opened, driven, and dropped on
//! the one blocking thread that `engine::capture` spawns for it. Output
//! streams get their own thread inside [`cpal_output::CpalOutput`].

pub mod device;
pub mod output;
pub mod resample;

#[cfg(feature = "audio-cpal")]
pub mod cpal_output;

use std::sync::{atomic::AtomicBool, Arc};

use crate::{buffering::AudioProducer, error::Result};

#[cfg(feature = "audio-cpal")]
use crate::error::LiveError;

/// A live capture stream. Dropping it releases the input device.
///
/// Not `Send`: create and drop it on the same thread.
pub trait CaptureStream {
    /// Native sample rate the device delivers, in Hz.
    fn sample_rate(&self) -> u32;
}

/// Capture device boundary.
///
/// `open` is called on the capture thread. The returned stream pushes mono
/// f32 samples into `producer` for as long as `running` is true and the
/// stream is alive.
pub trait CaptureBackend: Send + Sync + 'static {
    /// # Errors
    /// `PermissionDenied` when the user refused microphone access,
    /// `DeviceUnavailable` when no capture device exists, `AudioStream`
    /// for any other device failure.
    fn open(
        &self,
        producer: AudioProducer,
        running: Arc<AtomicBool>,
    ) -> Result<Box<dyn CaptureStream>>;
}

/// Microphone capture through cpal.
#[derive(Debug, Clone, Default)]
pub struct CpalCapture {
    preferred_device: Option<String>,
}

impl CpalCapture {
    /// Use `preferred_device` when present, else the system default input,
    /// else the first input device found.
    pub fn new(preferred_device: Option<String>) -> Self {
        Self { preferred_device }
    }
}

#[cfg(feature = "audio-cpal")]
struct CpalCaptureStream {
    _stream: cpal::Stream,
    sample_rate: u32,
}

#[cfg(feature = "audio-cpal")]
impl CaptureStream for CpalCaptureStream {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

#[cfg(feature = "audio-cpal")]
impl CaptureBackend for CpalCapture {
    fn open(
        &self,
        producer: AudioProducer,
        running: Arc<AtomicBool>,
    ) -> Result<Box<dyn CaptureStream>> {
        use cpal::{
            traits::{DeviceTrait, HostTrait, StreamTrait},
            SampleFormat, StreamConfig,
        };
        use tracing::{info, warn};

        let host = cpal::default_host();
        let mut selected = None;

        if let Some(preferred) = self.preferred_device.as_deref() {
            match host.input_devices() {
                Ok(mut devices) => {
                    selected = devices
                        .find(|d| d.name().map(|n| n == preferred).unwrap_or(false));
                    if selected.is_none() {
                        warn!(preferred, "preferred input device not found, falling back");
                    }
                }
                Err(e) => warn!("failed to list input devices while resolving preference: {e}"),
            }
        }

        let device = match selected.or_else(|| host.default_input_device()) {
            Some(d) => d,
            None => host
                .input_devices()
                .map_err(|e| classify_device_error(&e.to_string()))?
                .next()
                .ok_or_else(|| LiveError::DeviceUnavailable("no input device found".into()))?,
        };

        info!(
            device = device.name().unwrap_or_default().as_str(),
            "opening input device"
        );

        let supported = device
            .default_input_config()
            .map_err(|e| classify_device_error(&e.to_string()))?;
        let sample_rate = supported.sample_rate().0;
        let channels = supported.channels();
        info!(sample_rate, channels, "capture config selected");

        let config = StreamConfig {
            channels,
            sample_rate: supported.sample_rate(),
            buffer_size: cpal::BufferSize::Default,
        };

        let stream = match supported.sample_format() {
            SampleFormat::F32 => {
                build_mono_input::<f32, _>(&device, &config, producer, running, |s| s)
            }
            SampleFormat::I16 => build_mono_input::<i16, _>(&device, &config, producer, running, |s| {
                s as f32 / 32768.0
            }),
            SampleFormat::U16 => build_mono_input::<u16, _>(&device, &config, producer, running, |s| {
                (s as f32 - 32768.0) / 32768.0
            }),
            SampleFormat::U8 => build_mono_input::<u8, _>(&device, &config, producer, running, |s| {
                (s as f32 - 128.0) / 128.0
            }),
            fmt => {
                return Err(LiveError::AudioStream(format!(
                    "unsupported sample format: {fmt:?}"
                )))
            }
        }
        .map_err(|e| match e {
            cpal::BuildStreamError::DeviceNotAvailable => {
                LiveError::DeviceUnavailable("input device disappeared".into())
            }
            other => classify_device_error(&other.to_string()),
        })?;

        stream
            .play()
            .map_err(|e| classify_device_error(&e.to_string()))?;

        Ok(Box::new(CpalCaptureStream {
            _stream: stream,
            sample_rate,
        }))
    }
}

/// Build an input stream that averages interleaved channels into mono.
#[cfg(feature = "audio-cpal")]
fn build_mono_input<T, F>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut producer: AudioProducer,
    running: Arc<AtomicBool>,
    to_f32: F,
) -> std::result::Result<cpal::Stream, cpal::BuildStreamError>
where
    T: cpal::SizedSample,
    F: Fn(T) -> f32 + Send + 'static,
{
    use crate::buffering::Producer;
    use cpal::traits::DeviceTrait;
    use std::sync::atomic::Ordering;
    use tracing::{error, warn};

    let ch = config.channels.max(1) as usize;
    let mut mix_buf: Vec<f32> = Vec::new();

    device.build_input_stream(
        config,
        move |data: &[T], _info| {
            if !running.load(Ordering::Relaxed) {
                return;
            }
            let frames = data.len() / ch;
            mix_buf.resize(frames, 0.0);
            for (f, out) in mix_buf.iter_mut().enumerate() {
                let base = f * ch;
                let mut sum = 0f32;
                for c in 0..ch {
                    sum += to_f32(data[base + c]);
                }
                *out = sum / ch as f32;
            }
            let written = producer.push_slice(&mix_buf);
            if written < mix_buf.len() {
                warn!("capture ring full: dropped {} samples", mix_buf.len() - written);
            }
        },
        |err| error!("capture stream error: {err}"),
        None,
    )
}

/// Map a backend error message to the error taxonomy. Backends report
/// refused microphone access only through their message text.
#[cfg(feature = "audio-cpal")]
fn classify_device_error(message: &str) -> LiveError {
    let lowered = message.to_ascii_lowercase();
    if ["permission", "denied", "not authorized", "unauthorized"]
        .iter()
        .any(|k| lowered.contains(k))
    {
        LiveError::PermissionDenied
    } else if lowered.contains("not available") || lowered.contains("no such device") {
        LiveError::DeviceUnavailable(message.to_string())
    } else {
        LiveError::AudioStream(message.to_string())
    }
}

/// Stub when the `audio-cpal` feature is disabled.
#[cfg(not(feature = "audio-cpal"))]
impl CaptureBackend for CpalCapture {
    fn open(
        &self,
        _producer: AudioProducer,
        _running: Arc<AtomicBool>,
    ) -> Result<Box<dyn CaptureStream>> {
        Err(crate::error::LiveError::DeviceUnavailable(
            "compiled without audio-cpal feature".into(),
        ))
    }
}
