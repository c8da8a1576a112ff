//! Audio buffering between the real-time callbacks and the async side.
//!
//! The capture callback pushes mono f32 into a `ringbuf::HeapRb<f32>`
//! with a wait-free `push_slice`. The framing thread drains it, and
//! `frame::Framer` cuts the drained audio into fixed-size frames.

pub mod frame;
pub mod segment;

use ringbuf::{traits::Split, HeapRb};

pub use ringbuf::traits::{Consumer, Producer};

/// Producer half, held by the capture callback thread.
pub type AudioProducer = ringbuf::HeapProd<f32>;

/// Consumer half, held by the framing thread.
pub type AudioConsumer = ringbuf::HeapCons<f32>;

/// 2^18 = 262 144 f32 samples, about 5.4 s at 48 kHz. The framing thread
/// drains every few milliseconds, so this only fills if it stalls.
pub const RING_CAPACITY: usize = 1 << 18;

/// Create a matched producer/consumer pair backed by a heap-allocated ring buffer.
pub fn create_audio_ring() -> (AudioProducer, AudioConsumer) {
    HeapRb::<f32>::new(RING_CAPACITY).split()
}
