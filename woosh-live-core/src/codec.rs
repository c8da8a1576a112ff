//! PCM and transport codec.
//!
//! The live service speaks little-endian signed 16-bit PCM, carried as
//! base64 text inside JSON. Everything here is pure and allocation is the
//! caller's only cost.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

use crate::{
    buffering::segment::DecodedAudioSegment,
    error::{LiveError, Result},
};

/// Full-scale divisor for i16 <-> f32 conversion.
const PCM16_SCALE: f32 = 32768.0;

/// Convert f32 samples in `[-1.0, 1.0]` to i16, rounding and saturating.
pub fn float_to_pcm16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| {
            if s.is_nan() {
                return 0;
            }
            (s * PCM16_SCALE)
                .round()
                .clamp(i16::MIN as f32, i16::MAX as f32) as i16
        })
        .collect()
}

/// Serialize i16 samples as little-endian bytes.
pub fn pcm16_to_bytes(samples: &[i16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for s in samples {
        out.extend_from_slice(&s.to_le_bytes());
    }
    out
}

/// Decode interleaved little-endian i16 bytes into per-channel f32 buffers.
///
/// Sample `i` goes to channel `i % channels`.
///
/// # Errors
/// `LiveError::MalformedAudio` when `channels` is zero or the byte length
/// is not a whole number of frames.
pub fn pcm16_to_float(bytes: &[u8], sample_rate: u32, channels: u16) -> Result<DecodedAudioSegment> {
    if channels == 0 {
        return Err(LiveError::MalformedAudio("channel count is zero".into()));
    }
    let frame_bytes = 2 * channels as usize;
    if bytes.len() % frame_bytes != 0 {
        return Err(LiveError::MalformedAudio(format!(
            "{} bytes is not a multiple of {} ({} channel(s) of i16)",
            bytes.len(),
            frame_bytes,
            channels
        )));
    }

    let ch = channels as usize;
    let frames = bytes.len() / frame_bytes;
    let mut data = vec![Vec::with_capacity(frames); ch];
    for (idx, pair) in bytes.chunks_exact(2).enumerate() {
        let v = i16::from_le_bytes([pair[0], pair[1]]);
        data[idx % ch].push(v as f32 / PCM16_SCALE);
    }

    Ok(DecodedAudioSegment::new(data, sample_rate))
}

/// Encode raw bytes as text-safe base64 (standard alphabet, padded).
pub fn encode_transport(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

/// Inverse of [`encode_transport`].
pub fn decode_transport(text: &str) -> Result<Vec<u8>> {
    BASE64
        .decode(text.trim())
        .map_err(|e| LiveError::MalformedAudio(format!("base64: {e}")))
}

/// MIME tag for raw PCM at `rate` Hz, e.g. `audio/pcm;rate=16000`.
pub fn pcm_mime_type(rate: u32) -> String {
    format!("audio/pcm;rate={rate}")
}

/// Extract the `rate=` parameter from a PCM MIME tag.
pub fn parse_pcm_rate(mime: &str) -> Option<u32> {
    let mut parts = mime.split(';');
    let kind = parts.next()?.trim();
    if !kind.eq_ignore_ascii_case("audio/pcm") && !kind.eq_ignore_ascii_case("audio/l16") {
        return None;
    }
    parts.find_map(|p| {
        let (key, value) = p.split_once('=')?;
        if key.trim().eq_ignore_ascii_case("rate") {
            value.trim().parse().ok()
        } else {
            None
        }
    })
}
