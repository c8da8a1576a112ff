//! # woosh-live-core
//!
//! Real-time bidirectional audio session manager for the Woosh Cafe live
//! voice assistant.
//!
//! ## Architecture
//!
//! ```text
//! Microphone → CaptureBackend → SPSC ring → framing thread (16 kHz, 4096)
//!                                                 │ AudioFrame
//!                                                 ▼
//!                                  LiveSession driver ──► LiveTransport ──► service
//!                                                 │ ServerEvent
//!                                                 ▼
//!                         session loop ─► PlaybackScheduler ─► OutputDevice
//! ```
//!
//! The capture callback never allocates or blocks. Inbound speech is decoded
//! and scheduled one chunk at a time on a single task, back to back on the
//! output clock.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod buffering;
pub mod codec;
pub mod engine;
pub mod error;
pub mod ipc;
pub mod playback;
pub mod session;

// Convenience re-exports for downstream crates
pub use audio::{
    device::{list_input_devices, list_output_devices, DeviceDirection, DeviceInfo},
    output::{OutputDevice, SegmentSource, VirtualOutput},
    CaptureBackend, CaptureStream, CpalCapture,
};
pub use engine::{
    persona::{Persona, Role},
    session_loop::DiagnosticsSnapshot,
    LiveAssistant, LiveConfig, OutputFactory,
};
pub use error::{LiveError, Result};
pub use ipc::events::{LiveStatus, LiveStatusEvent};
pub use session::{
    transport::{LiveTransport, LoopbackTransport},
    websocket::WebSocketTransport,
    ConnectionState, LiveSession, SessionConfig, SessionEvent, SessionHandler,
};

#[cfg(feature = "audio-cpal")]
pub use audio::cpal_output::CpalOutput;
