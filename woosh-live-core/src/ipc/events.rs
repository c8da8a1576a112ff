//! Status events broadcast by `LiveAssistant`.

use serde::{Deserialize, Serialize};

/// Emitted whenever the projected assistant status changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveStatusEvent {
    pub status: LiveStatus,
    /// Human-readable detail, set for `Error`.
    pub detail: Option<String>,
}

/// User-facing state of the live assistant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LiveStatus {
    /// No session. Start is allowed.
    #[default]
    Idle,
    /// Devices opening, handshake in flight.
    Connecting,
    /// Session open and listening.
    Connected,
    /// Connected and synthesized speech is queued or playing.
    Speaking,
    /// Last session failed. Start is allowed again.
    Error,
}

impl LiveStatus {
    /// Whether a session currently holds the microphone.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            LiveStatus::Connecting | LiveStatus::Connected | LiveStatus::Speaking
        )
    }
}

impl std::fmt::Display for LiveStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LiveStatus::Idle => "idle",
            LiveStatus::Connecting => "connecting",
            LiveStatus::Connected => "connected",
            LiveStatus::Speaking => "speaking",
            LiveStatus::Error => "error",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_event_serializes_with_lowercase_status() {
        let event = LiveStatusEvent {
            status: LiveStatus::Error,
            detail: Some("microphone access was denied".into()),
        };

        let json = serde_json::to_value(&event).expect("serialize status event");
        assert_eq!(json["status"], "error");
        assert_eq!(json["detail"], "microphone access was denied");

        let round_trip: LiveStatusEvent =
            serde_json::from_value(json).expect("deserialize status event");
        assert_eq!(round_trip, event);
    }

    #[test]
    fn status_rejects_non_lowercase_values() {
        assert!(serde_json::from_str::<LiveStatus>(r#""Speaking""#).is_err());
        assert_eq!(
            serde_json::from_str::<LiveStatus>(r#""speaking""#).unwrap(),
            LiveStatus::Speaking
        );
    }

    #[test]
    fn only_session_states_are_active() {
        assert!(!LiveStatus::Idle.is_active());
        assert!(!LiveStatus::Error.is_active());
        assert!(LiveStatus::Speaking.is_active());
        assert_eq!(LiveStatus::Connecting.to_string(), "connecting");
    }
}
