//! Event types a host forwards to its UI.
//!
//! All types derive `serde::Serialize` + `serde::Deserialize` so a host can
//! relay them as JSON without mapping.

pub mod events;
