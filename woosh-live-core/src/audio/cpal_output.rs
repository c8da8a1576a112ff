//! Speaker output through cpal: a small additive mixer on a dedicated thread.
//!
//! The device clock is `frames rendered / device rate`. Every started
//! source becomes a voice pinned to an absolute frame offset on that clock.
//! The render callback sums the voices that overlap the current buffer and
//! retires the ones that have played out.
//!
//! `on_ended` callbacks run on the audio thread while the mixer lock is
//! held, so they must be cheap and must not touch the mixer. In exchange,
//! once `stop()` returns, that source's callback can no longer fire.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use std::thread::{self, JoinHandle};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{bounded, Sender};
use parking_lot::Mutex;
use tracing::{error, info, warn};

use super::{
    output::{validate_segment, EndedCallback, OutputDevice, SegmentSource},
    resample::RateConverter,
};
use crate::{
    buffering::segment::DecodedAudioSegment,
    error::{LiveError, Result},
};

/// rubato chunk size used when converting a segment to the device rate.
const SEGMENT_RESAMPLE_CHUNK: usize = 1024;

struct Voice {
    id: u64,
    start_frame: u64,
    samples: Vec<f32>,
    on_ended: Option<EndedCallback>,
}

#[derive(Default)]
struct Mixer {
    voices: Vec<Voice>,
}

impl Mixer {
    /// Sum the overlapping part of every voice into `out`, which covers
    /// frames `[base, base + out.len())`. Voices that finish inside the
    /// window are removed and their callbacks fired.
    fn render(&mut self, base: u64, out: &mut [f32]) {
        out.iter_mut().for_each(|s| *s = 0.0);
        let window_end = base + out.len() as u64;

        for voice in &self.voices {
            let v_end = voice.start_frame + voice.samples.len() as u64;
            let from = voice.start_frame.max(base);
            let to = v_end.min(window_end);
            for frame in from..to {
                out[(frame - base) as usize] += voice.samples[(frame - voice.start_frame) as usize];
            }
        }

        let mut i = 0;
        while i < self.voices.len() {
            let v = &self.voices[i];
            if v.start_frame + v.samples.len() as u64 <= window_end {
                let mut done = self.voices.swap_remove(i);
                if let Some(cb) = done.on_ended.take() {
                    cb();
                }
            } else {
                i += 1;
            }
        }
    }
}

/// Default output device, opened for the lifetime of one live session.
pub struct CpalOutput {
    mixer: Arc<Mutex<Mixer>>,
    frames_rendered: Arc<AtomicU64>,
    sample_rate: u32,
    next_id: AtomicU64,
    shutdown_tx: Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl CpalOutput {
    /// Open the default output device and start rendering silence.
    ///
    /// Blocks until the stream is playing or has failed.
    pub fn open() -> Result<Self> {
        let mixer = Arc::new(Mutex::new(Mixer::default()));
        let frames_rendered = Arc::new(AtomicU64::new(0));
        let (open_tx, open_rx) = bounded::<Result<u32>>(1);
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);

        let thread_mixer = Arc::clone(&mixer);
        let thread_frames = Arc::clone(&frames_rendered);

        // The stream is !Send, so it lives and dies on this thread.
        let thread = thread::Builder::new()
            .name("woosh-output".into())
            .spawn(move || {
                let stream = match build_stream(thread_mixer, thread_frames) {
                    Ok((stream, rate)) => {
                        let _ = open_tx.send(Ok(rate));
                        stream
                    }
                    Err(e) => {
                        let _ = open_tx.send(Err(e));
                        return;
                    }
                };
                let _ = shutdown_rx.recv();
                drop(stream);
                info!("output stream released");
            })
            .map_err(LiveError::Io)?;

        let sample_rate = match open_rx.recv() {
            Ok(Ok(rate)) => rate,
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(e);
            }
            Err(_) => {
                return Err(LiveError::AudioStream(
                    "output thread exited before opening the device".into(),
                ))
            }
        };

        Ok(Self {
            mixer,
            frames_rendered,
            sample_rate,
            next_id: AtomicU64::new(0),
            shutdown_tx,
            thread: Some(thread),
        })
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        self.mixer.lock().voices.clear();
        let _ = self.shutdown_tx.try_send(());
        if let Some(t) = self.thread.take() {
            if t.join().is_err() {
                warn!("output thread panicked during shutdown");
            }
        }
    }
}

fn build_stream(
    mixer: Arc<Mutex<Mixer>>,
    frames_rendered: Arc<AtomicU64>,
) -> Result<(cpal::Stream, u32)> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| LiveError::DeviceUnavailable("no output device found".into()))?;

    info!(
        device = device.name().unwrap_or_default().as_str(),
        "opening output device"
    );

    let supported = device
        .default_output_config()
        .map_err(|e| LiveError::DeviceUnavailable(e.to_string()))?;
    let sample_rate = supported.sample_rate().0;
    let channels = supported.channels() as usize;
    let config = supported.config();
    info!(sample_rate, channels, "output config selected");

    let stream = match supported.sample_format() {
        cpal::SampleFormat::F32 => {
            build_output::<f32>(&device, &config, channels, mixer, frames_rendered)
        }
        cpal::SampleFormat::I16 => {
            build_output::<i16>(&device, &config, channels, mixer, frames_rendered)
        }
        cpal::SampleFormat::U16 => {
            build_output::<u16>(&device, &config, channels, mixer, frames_rendered)
        }
        fmt => {
            return Err(LiveError::DecodeUnsupported(format!(
                "unsupported output sample format: {fmt:?}"
            )))
        }
    }
    .map_err(|e| LiveError::AudioStream(e.to_string()))?;

    stream
        .play()
        .map_err(|e| LiveError::AudioStream(e.to_string()))?;
    Ok((stream, sample_rate))
}

fn build_output<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    channels: usize,
    mixer: Arc<Mutex<Mixer>>,
    frames_rendered: Arc<AtomicU64>,
) -> std::result::Result<cpal::Stream, cpal::BuildStreamError>
where
    T: cpal::SizedSample + cpal::FromSample<f32>,
{
    let ch = channels.max(1);
    let mut mix_buf: Vec<f32> = Vec::new();

    device.build_output_stream(
        config,
        move |data: &mut [T], _info| {
            let frames = data.len() / ch;
            mix_buf.resize(frames, 0.0);
            let base = frames_rendered.load(Ordering::Acquire);
            // Contention is limited to schedule/stop calls, which hold the lock briefly.
            mixer.lock().render(base, &mut mix_buf);
            for (frame, value) in data.chunks_mut(ch).zip(mix_buf.iter()) {
                let s = T::from_sample(value.clamp(-1.0, 1.0));
                frame.iter_mut().for_each(|out| *out = s);
            }
            frames_rendered.store(base + frames as u64, Ordering::Release);
        },
        |err| error!("output stream error: {err}"),
        None,
    )
}

impl OutputDevice for CpalOutput {
    fn current_time(&self) -> f64 {
        self.frames_rendered.load(Ordering::Acquire) as f64 / self.sample_rate as f64
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn create_source(&self, segment: DecodedAudioSegment) -> Result<Box<dyn SegmentSource>> {
        validate_segment(&segment)?;
        let duration = segment.duration();
        let mono = segment.to_mono();
        let samples = RateConverter::new(segment.sample_rate, self.sample_rate, SEGMENT_RESAMPLE_CHUNK)
            .map_err(|e| LiveError::DecodeUnsupported(e.to_string()))?
            .convert_all(&mono, segment.sample_rate, self.sample_rate);

        Ok(Box::new(CpalSource {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            mixer: Arc::clone(&self.mixer),
            frames_rendered: Arc::clone(&self.frames_rendered),
            device_rate: self.sample_rate,
            samples: Some(samples),
            duration,
        }))
    }
}

struct CpalSource {
    id: u64,
    mixer: Arc<Mutex<Mixer>>,
    frames_rendered: Arc<AtomicU64>,
    device_rate: u32,
    /// Moved into the mixer on `start`.
    samples: Option<Vec<f32>>,
    duration: f64,
}

impl SegmentSource for CpalSource {
    fn start(&mut self, at: f64, on_ended: EndedCallback) -> Result<()> {
        let samples = self
            .samples
            .take()
            .ok_or_else(|| LiveError::AudioStream("source already started".into()))?;
        let requested = (at * self.device_rate as f64).round().max(0.0) as u64;

        let mut mixer = self.mixer.lock();
        // Never start inside audio that has already been rendered.
        let start_frame = requested.max(self.frames_rendered.load(Ordering::Acquire));
        mixer.voices.push(Voice {
            id: self.id,
            start_frame,
            samples,
            on_ended: Some(on_ended),
        });
        Ok(())
    }

    fn stop(&mut self) {
        self.mixer.lock().voices.retain(|v| v.id != self.id);
    }

    fn duration(&self) -> f64 {
        self.duration
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn mixer_places_voices_on_absolute_frames() {
        let mut mixer = Mixer::default();
        let ended = Arc::new(AtomicUsize::new(0));
        let e = Arc::clone(&ended);
        mixer.voices.push(Voice {
            id: 0,
            start_frame: 2,
            samples: vec![0.5; 4],
            on_ended: Some(Box::new(move || {
                e.fetch_add(1, Ordering::SeqCst);
            })),
        });

        let mut out = vec![0.0; 4];
        mixer.render(0, &mut out);
        assert_eq!(out, vec![0.0, 0.0, 0.5, 0.5]);
        assert_eq!(ended.load(Ordering::SeqCst), 0);

        mixer.render(4, &mut out);
        assert_eq!(out, vec![0.5, 0.5, 0.0, 0.0]);
        assert_eq!(ended.load(Ordering::SeqCst), 1);
        assert!(mixer.voices.is_empty());
    }

    #[test]
    fn overlapping_voices_sum() {
        let mut mixer = Mixer::default();
        for id in 0..2 {
            mixer.voices.push(Voice {
                id,
                start_frame: 0,
                samples: vec![0.25; 2],
                on_ended: None,
            });
        }
        let mut out = vec![0.0; 2];
        mixer.render(0, &mut out);
        assert_eq!(out, vec![0.5, 0.5]);
    }
}
