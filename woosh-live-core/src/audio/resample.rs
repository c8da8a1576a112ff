//! Sample-rate conversion using a rubato `FastFixedIn` resampler.
//!
//! Two directions need it: the microphone (device rate, commonly 48 kHz)
//! down to the 16 kHz the live service expects, and synthesized speech
//! (24 kHz) up to whatever rate the output device runs at.
//!
//! When both rates match, `RateConverter` is a passthrough and no rubato
//! session is created.
//!
//! ```ignore
//! let mut rc = RateConverter::new(48_000, 16_000, 960)?;
//! let out = rc.process(&raw_samples); // Vec<f32> at 16 kHz
//! ```

use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::error;

use crate::error::{LiveError, Result};

/// Converts f32 mono audio from one fixed sample rate to another.
pub struct RateConverter {
    /// `None` when input rate == output rate.
    resampler: Option<FastFixedIn<f32>>,
    /// Holds partial input chunks between calls.
    input_buf: Vec<f32>,
    chunk_size: usize,
    /// Pre-allocated output buffer: `[1][output_frames_max]`.
    output_buf: Vec<Vec<f32>>,
}

impl RateConverter {
    /// # Errors
    /// `LiveError::AudioStream` if either rate is zero or rubato rejects the ratio.
    pub fn new(input_rate: u32, output_rate: u32, chunk_size: usize) -> Result<Self> {
        if input_rate == 0 || output_rate == 0 {
            return Err(LiveError::AudioStream(format!(
                "invalid resample rates {input_rate} -> {output_rate}"
            )));
        }
        if input_rate == output_rate {
            return Ok(Self {
                resampler: None,
                input_buf: Vec::new(),
                chunk_size,
                output_buf: Vec::new(),
            });
        }

        let ratio = output_rate as f64 / input_rate as f64;
        let resampler = FastFixedIn::<f32>::new(ratio, 1.0, PolynomialDegree::Cubic, chunk_size, 1)
            .map_err(|e| LiveError::AudioStream(format!("resampler init: {e}")))?;
        let output_buf = vec![vec![0f32; resampler.output_frames_max()]; 1];

        tracing::debug!(input_rate, output_rate, chunk_size, "resampling enabled");

        Ok(Self {
            resampler: Some(resampler),
            input_buf: Vec::new(),
            chunk_size,
            output_buf,
        })
    }

    /// Feed samples, returning whatever full chunks produced (may be empty).
    /// Any remainder is kept for the next call.
    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        let Some(ref mut resampler) = self.resampler else {
            return samples.to_vec();
        };

        self.input_buf.extend_from_slice(samples);
        let mut result = Vec::new();

        while self.input_buf.len() >= self.chunk_size {
            let input_slice = &self.input_buf[..self.chunk_size];
            match resampler.process_into_buffer(&[input_slice], &mut self.output_buf, None) {
                Ok((_consumed, produced)) => {
                    result.extend_from_slice(&self.output_buf[0][..produced]);
                }
                Err(e) => error!("resampler process error: {e}"),
            }
            self.input_buf.drain(..self.chunk_size);
        }

        result
    }

    /// Push out the buffered tail, zero-padded to a full chunk by rubato.
    pub fn flush(&mut self) -> Vec<f32> {
        let Some(ref mut resampler) = self.resampler else {
            return Vec::new();
        };
        if self.input_buf.is_empty() {
            return Vec::new();
        }

        let tail = std::mem::take(&mut self.input_buf);
        let wave_in = [tail.as_slice()];
        match resampler.process_partial_into_buffer(Some(&wave_in[..]), &mut self.output_buf, None) {
            Ok((_consumed, produced)) => self.output_buf[0][..produced].to_vec(),
            Err(e) => {
                error!("resampler flush error: {e}");
                Vec::new()
            }
        }
    }

    /// Convert one complete buffer. The result is trimmed to the exact
    /// expected length so segment durations stay faithful.
    pub fn convert_all(&mut self, samples: &[f32], input_rate: u32, output_rate: u32) -> Vec<f32> {
        if self.is_passthrough() {
            return samples.to_vec();
        }
        let expected =
            (samples.len() as u64 * output_rate as u64 / input_rate.max(1) as u64) as usize;
        let mut out = self.process(samples);
        out.extend(self.flush());
        out.resize(expected, 0.0);
        out
    }

    /// Returns `true` when both rates match and no resampling occurs.
    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passthrough_identity() {
        let mut rc = RateConverter::new(16_000, 16_000, 960).unwrap();
        assert!(rc.is_passthrough());
        let samples: Vec<f32> = (0..480).map(|i| i as f32 * 0.001).collect();
        assert_eq!(rc.process(&samples), samples);
        assert!(rc.flush().is_empty());
    }

    #[test]
    fn ratio_48k_to_16k_correct_length() {
        let mut rc = RateConverter::new(48_000, 16_000, 960).unwrap();
        let out = rc.process(&[0.0f32; 960]);
        assert!(
            (out.len() as isize - 320).unsigned_abs() <= 10,
            "output len={} expected≈320",
            out.len()
        );
    }

    #[test]
    fn partial_chunks_accumulate() {
        let mut rc = RateConverter::new(48_000, 16_000, 960).unwrap();
        assert!(rc.process(&[0.0f32; 500]).is_empty());
        assert!(!rc.process(&[0.0f32; 500]).is_empty());
    }

    #[test]
    fn convert_all_keeps_duration() {
        let mut rc = RateConverter::new(24_000, 48_000, 1024).unwrap();
        let out = rc.convert_all(&vec![0.1f32; 24_000], 24_000, 48_000);
        assert_eq!(out.len(), 48_000);
    }

    #[test]
    fn zero_rate_is_rejected() {
        assert!(RateConverter::new(0, 16_000, 960).is_err());
    }
}
