//! Output device boundary.
//!
//! An [`OutputDevice`] owns a monotonic playback timeline in seconds. Each
//! decoded segment becomes a [`SegmentSource`] that can be started at an
//! absolute time on that timeline and force-stopped. The `on_ended`
//! callback given to `start` fires at most once, and only when the source
//! plays to its end. `stop()` suppresses it.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::{
    buffering::segment::DecodedAudioSegment,
    error::{LiveError, Result},
};

/// Natural-completion callback for one source.
pub type EndedCallback = Box<dyn FnOnce() + Send + 'static>;

/// One playable segment on an output device.
pub trait SegmentSource: Send {
    /// Schedule playback to begin at device time `at` (seconds).
    fn start(&mut self, at: f64, on_ended: EndedCallback) -> Result<()>;

    /// Stop immediately. Idempotent; `on_ended` will not fire afterwards.
    fn stop(&mut self);

    /// Playback duration in seconds.
    fn duration(&self) -> f64;
}

/// A playback device with its own clock.
pub trait OutputDevice: Send + Sync {
    /// Current position of the device timeline in seconds.
    fn current_time(&self) -> f64;

    fn sample_rate(&self) -> u32;

    /// Build a source for `segment`.
    ///
    /// # Errors
    /// `LiveError::DecodeUnsupported` when the device cannot hold a buffer
    /// with these parameters.
    fn create_source(&self, segment: DecodedAudioSegment) -> Result<Box<dyn SegmentSource>>;
}

/// Shared parameter check for `create_source` implementations.
pub(crate) fn validate_segment(segment: &DecodedAudioSegment) -> Result<()> {
    if segment.sample_rate == 0 {
        return Err(LiveError::DecodeUnsupported("sample rate is zero".into()));
    }
    if segment.channel_count() == 0 {
        return Err(LiveError::DecodeUnsupported("segment has no channels".into()));
    }
    if segment.channels.iter().any(|c| c.len() != segment.frames()) {
        return Err(LiveError::DecodeUnsupported(
            "channels have different lengths".into(),
        ));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Virtual output
// ---------------------------------------------------------------------------

/// Record of one source started on a [`VirtualOutput`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlayedSegment {
    pub start: f64,
    pub duration: f64,
    pub stopped: bool,
    pub ended: bool,
}

struct PendingEnd {
    index: usize,
    end: f64,
    on_ended: EndedCallback,
}

#[derive(Default)]
struct VirtualState {
    now: f64,
    played: Vec<PlayedSegment>,
    pending: Vec<PendingEnd>,
}

/// Output device with a manually driven clock and no audio hardware.
///
/// Time only moves when [`VirtualOutput::advance_to`] is called, which also
/// fires `on_ended` for every source that finished by then, in end-time
/// order. Clones share the same timeline.
#[derive(Clone)]
pub struct VirtualOutput {
    sample_rate: u32,
    state: Arc<Mutex<VirtualState>>,
}

impl VirtualOutput {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            state: Arc::new(Mutex::new(VirtualState::default())),
        }
    }

    /// Move the clock forward to `t`. Earlier values are ignored.
    pub fn advance_to(&self, t: f64) {
        let finished = {
            let mut state = self.state.lock();
            if t > state.now {
                state.now = t;
            }
            let now = state.now;
            let mut finished = Vec::new();
            let mut i = 0;
            while i < state.pending.len() {
                if state.pending[i].end <= now {
                    let entry = state.pending.swap_remove(i);
                    state.played[entry.index].ended = true;
                    finished.push(entry);
                } else {
                    i += 1;
                }
            }
            finished.sort_by(|a, b| a.end.total_cmp(&b.end));
            finished
        };
        // Callbacks run outside the lock so they may call back into the device.
        for entry in finished {
            (entry.on_ended)();
        }
    }

    /// Everything started so far, in start-call order.
    pub fn played(&self) -> Vec<PlayedSegment> {
        self.state.lock().played.clone()
    }

    /// Sources started but neither ended nor stopped.
    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }
}

impl OutputDevice for VirtualOutput {
    fn current_time(&self) -> f64 {
        self.state.lock().now
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn create_source(&self, segment: DecodedAudioSegment) -> Result<Box<dyn SegmentSource>> {
        validate_segment(&segment)?;
        Ok(Box::new(VirtualSource {
            state: Arc::clone(&self.state),
            duration: segment.duration(),
            index: None,
        }))
    }
}

struct VirtualSource {
    state: Arc<Mutex<VirtualState>>,
    duration: f64,
    /// Position in `played` once started.
    index: Option<usize>,
}

impl SegmentSource for VirtualSource {
    fn start(&mut self, at: f64, on_ended: EndedCallback) -> Result<()> {
        if self.index.is_some() {
            return Err(LiveError::AudioStream("source already started".into()));
        }
        let mut state = self.state.lock();
        let index = state.played.len();
        state.played.push(PlayedSegment {
            start: at,
            duration: self.duration,
            stopped: false,
            ended: false,
        });
        state.pending.push(PendingEnd {
            index,
            end: at + self.duration,
            on_ended,
        });
        self.index = Some(index);
        Ok(())
    }

    fn stop(&mut self) {
        let Some(index) = self.index else {
            return;
        };
        let mut state = self.state.lock();
        if let Some(pos) = state.pending.iter().position(|p| p.index == index) {
            state.pending.swap_remove(pos);
            state.played[index].stopped = true;
        }
    }

    fn duration(&self) -> f64 {
        self.duration
    }
}
