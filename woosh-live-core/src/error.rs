use thiserror::Error;

/// All errors produced by woosh-live-core.
#[derive(Debug, Error)]
pub enum LiveError {
    #[error("microphone access was denied")]
    PermissionDenied,

    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("malformed audio: {0}")]
    MalformedAudio(String),

    #[error("output device cannot play this audio: {0}")]
    DecodeUnsupported(String),

    #[error("session is not open")]
    NotOpen,

    #[error("a live session is already running")]
    AlreadyRunning,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl LiveError {
    /// Device- and connection-level failures end the session and must be
    /// shown to the user. Single-chunk decode failures never are.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, LiveError::MalformedAudio(_) | LiveError::NotOpen)
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for LiveError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        LiveError::Connection(err.to_string())
    }
}

impl From<url::ParseError> for LiveError {
    fn from(err: url::ParseError) -> Self {
        LiveError::Connection(format!("invalid endpoint: {err}"))
    }
}

pub type Result<T> = std::result::Result<T, LiveError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_audio_is_recoverable() {
        assert!(!LiveError::MalformedAudio("odd length".into()).is_fatal());
        assert!(LiveError::DecodeUnsupported("0 Hz".into()).is_fatal());
        assert!(LiveError::PermissionDenied.is_fatal());
    }
}
