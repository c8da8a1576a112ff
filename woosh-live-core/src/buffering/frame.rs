//! Outbound audio frames and the fixed-window framer.

use crate::codec::{float_to_pcm16, pcm16_to_bytes, pcm_mime_type};

/// A fixed-length block of mono i16 samples, immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    samples: Vec<i16>,
    sample_rate: u32,
    /// Position of this frame in capture order, starting at 0.
    seq: u64,
}

impl AudioFrame {
    pub fn new(samples: Vec<i16>, sample_rate: u32, seq: u64) -> Self {
        Self {
            samples,
            sample_rate,
            seq,
        }
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Frame duration in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Little-endian PCM bytes plus the matching MIME tag.
    pub fn to_pcm_bytes(&self) -> (Vec<u8>, String) {
        (pcm16_to_bytes(&self.samples), pcm_mime_type(self.sample_rate))
    }
}

/// Accumulates resampled f32 audio and emits one `AudioFrame` per full window.
///
/// Samples that do not fill a window stay buffered for the next `push`.
#[derive(Debug)]
pub struct Framer {
    frame_size: usize,
    sample_rate: u32,
    pending: Vec<f32>,
    next_seq: u64,
}

impl Framer {
    /// # Panics
    /// Panics if `frame_size` is zero.
    pub fn new(frame_size: usize, sample_rate: u32) -> Self {
        assert!(frame_size > 0, "frame size must be non-zero");
        Self {
            frame_size,
            sample_rate,
            pending: Vec::with_capacity(frame_size * 2),
            next_seq: 0,
        }
    }

    pub fn push(&mut self, samples: &[f32]) -> Vec<AudioFrame> {
        self.pending.extend_from_slice(samples);

        let mut frames = Vec::new();
        while self.pending.len() >= self.frame_size {
            let window: Vec<f32> = self.pending.drain(..self.frame_size).collect();
            frames.push(AudioFrame::new(
                float_to_pcm16(&window),
                self.sample_rate,
                self.next_seq,
            ));
            self.next_seq += 1;
        }
        frames
    }

    /// Samples waiting for the next full window.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Drop the partial window (used when capture stops).
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emits_fixed_size_frames_and_carries_remainder() {
        let mut framer = Framer::new(4096, 16_000);
        assert!(framer.push(&vec![0.1; 3000]).is_empty());
        assert_eq!(framer.pending_len(), 3000);

        let frames = framer.push(&vec![0.1; 6000]);
        assert_eq!(frames.len(), 2);
        assert!(frames.iter().all(|f| f.len() == 4096));
        assert_eq!(frames[0].seq(), 0);
        assert_eq!(frames[1].seq(), 1);
        assert_eq!(framer.pending_len(), 9000 - 2 * 4096);
    }

    #[test]
    fn frame_samples_are_pcm16() {
        let mut framer = Framer::new(4, 16_000);
        let frames = framer.push(&[0.0, 0.5, -0.5, 1.0]);
        assert_eq!(frames[0].samples(), &[0, 16384, -16384, 32767]);

        let (bytes, mime) = frames[0].to_pcm_bytes();
        assert_eq!(bytes.len(), 8);
        assert_eq!(mime, "audio/pcm;rate=16000");
    }

    #[test]
    fn frame_duration_matches_rate() {
        let frame = AudioFrame::new(vec![0; 4096], 16_000, 0);
        assert!((frame.duration_secs() - 0.256).abs() < 1e-9);
    }
}
