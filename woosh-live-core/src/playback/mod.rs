//! Gapless, strictly ordered playback of inbound speech.
//!
//! ## Per chunk
//!
//! ```text
//! 1. decode bytes -> DecodedAudioSegment        (MalformedAudio: drop, continue)
//! 2. device.create_source(seg)                 (DecodeUnsupported: fatal)
//! 3. start = max(output_clock, device now); source.start(start)
//! 4. output_clock = start + duration
//! 5. handle -> active set; speaking = true
//! ```
//!
//! Each chunk is decoded and scheduled completely before the next one is
//! looked at, so arrival order is playback order.
//!
//! ## Interruption
//!
//! `interrupt()` force-stops every active source, clears the set, resets the
//! clock to zero (the next segment resynchronizes to "now"), and drops
//! `speaking`. Natural-completion notices for handles that are no longer
//! active are ignored.
//!
//! The scheduler is single-writer: only the session loop calls into it.
//! Ended notifications come back from the audio thread as [`HandleId`]s on
//! the channel given to [`PlaybackScheduler::new`].

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::{
    audio::output::{OutputDevice, SegmentSource},
    buffering::segment::DecodedAudioSegment,
    codec::pcm16_to_float,
    error::{LiveError, Result},
};

/// Identifies one scheduled segment for the lifetime of a scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(pub u64);

/// Raw synthesized speech from the live service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundAudioChunk {
    pub data: Vec<u8>,
    /// Sample rate declared by the sender, if any.
    pub sample_rate: Option<u32>,
    /// Model turn this chunk belongs to.
    pub turn: u64,
}

/// What the scheduler committed for one chunk.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledSegment {
    pub handle: HandleId,
    pub start: f64,
    pub duration: f64,
    pub turn: u64,
}

/// Decode parameters for inbound chunks.
#[derive(Debug, Clone, Copy)]
pub struct DecodeParams {
    /// Used when a chunk does not declare its own rate.
    pub sample_rate: u32,
    pub channels: u16,
}

impl Default for DecodeParams {
    fn default() -> Self {
        Self {
            sample_rate: 24_000,
            channels: 1,
        }
    }
}

pub struct PlaybackScheduler {
    device: Arc<dyn OutputDevice>,
    params: DecodeParams,
    output_clock: f64,
    active: HashMap<HandleId, Box<dyn SegmentSource>>,
    next_handle: u64,
    ended_tx: mpsc::UnboundedSender<HandleId>,
}

impl PlaybackScheduler {
    pub fn new(
        device: Arc<dyn OutputDevice>,
        params: DecodeParams,
        ended_tx: mpsc::UnboundedSender<HandleId>,
    ) -> Self {
        Self {
            device,
            params,
            output_clock: 0.0,
            active: HashMap::new(),
            next_handle: 0,
            ended_tx,
        }
    }

    /// Decode and schedule one chunk.
    ///
    /// Returns `Ok(None)` when the chunk was malformed and dropped.
    ///
    /// # Errors
    /// `LiveError::DecodeUnsupported` (or another device error) when the
    /// output device cannot play the segment. Playback cannot continue.
    pub fn enqueue(&mut self, chunk: InboundAudioChunk) -> Result<Option<ScheduledSegment>> {
        let rate = chunk.sample_rate.unwrap_or(self.params.sample_rate);
        let segment = match pcm16_to_float(&chunk.data, rate, self.params.channels) {
            Ok(seg) => seg,
            Err(e @ LiveError::MalformedAudio(_)) => {
                warn!(turn = chunk.turn, bytes = chunk.data.len(), "dropping inbound chunk: {e}");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        if segment.is_empty() {
            trace!(turn = chunk.turn, "ignoring empty inbound chunk");
            return Ok(None);
        }
        self.schedule(segment, chunk.turn).map(Some)
    }

    /// Schedule an already decoded segment.
    pub fn schedule(&mut self, segment: DecodedAudioSegment, turn: u64) -> Result<ScheduledSegment> {
        let duration = segment.duration();
        // Building the source may take a while (resampling); read the clock after.
        let mut source = self.device.create_source(segment)?;

        let now = self.device.current_time();
        let start = self.output_clock.max(now);
        if self.output_clock > 0.0 && now > self.output_clock {
            debug!(gap_secs = now - self.output_clock, "playback fell behind, resynchronizing");
        }

        let handle = HandleId(self.next_handle);
        self.next_handle += 1;
        let ended_tx = self.ended_tx.clone();
        source.start(
            start,
            Box::new(move || {
                let _ = ended_tx.send(handle);
            }),
        )?;

        self.output_clock = start + duration;
        self.active.insert(handle, source);
        trace!(handle = handle.0, start, duration, clock = self.output_clock, "segment scheduled");

        Ok(ScheduledSegment {
            handle,
            start,
            duration,
            turn,
        })
    }

    /// Handle a natural-completion notice.
    ///
    /// Returns `true` when this notice emptied the active set, meaning the
    /// assistant just stopped speaking.
    pub fn handle_ended(&mut self, handle: HandleId) -> bool {
        if self.active.remove(&handle).is_none() {
            trace!(handle = handle.0, "ignoring ended notice for inactive handle");
            return false;
        }
        self.active.is_empty()
    }

    /// Stop and discard everything that is queued or playing.
    ///
    /// Returns the number of sources stopped.
    pub fn interrupt(&mut self) -> usize {
        let stopped = self.active.len();
        for (_, mut source) in self.active.drain() {
            source.stop();
        }
        self.output_clock = 0.0;
        debug!(stopped, "playback interrupted");
        stopped
    }

    pub fn output_clock(&self) -> f64 {
        self.output_clock
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn is_speaking(&self) -> bool {
        !self.active.is_empty()
    }
}

impl Drop for PlaybackScheduler {
    fn drop(&mut self) {
        for (_, mut source) in self.active.drain() {
            source.stop();
        }
    }
}
