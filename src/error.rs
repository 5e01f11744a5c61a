//! Error types for the conversation client

use thiserror::Error;

/// Result type alias for conversation operations
pub type Result<T> = std::result::Result<T, LingoError>;

/// Errors that can occur in the voice conversation client
#[derive(Error, Debug)]
pub enum LingoError {
    #[error("Microphone permission denied: {0}")]
    PermissionDenied(String),

    #[error("Audio device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Malformed audio payload: {0}")]
    MalformedPayload(String),

    #[error("Invalid audio format: {0}")]
    InvalidAudioFormat(String),

    #[error("A session is already active")]
    AlreadyActive,

    #[error("Session error: {0}")]
    Session(String),

    #[error("Connection failed: {0}")]
    ConnectFailure(String),

    #[error("Audio playback error: {0}")]
    Playback(String),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

/// Classify a device-layer error message: OS permission refusals surface as
/// backend-specific errors with no dedicated variant, so match on the text.
fn classify_device_error(message: String) -> LingoError {
    let lower = message.to_ascii_lowercase();
    if lower.contains("permission") || lower.contains("denied") {
        LingoError::PermissionDenied(message)
    } else {
        LingoError::DeviceUnavailable(message)
    }
}

impl From<cpal::DevicesError> for LingoError {
    fn from(err: cpal::DevicesError) -> Self {
        classify_device_error(err.to_string())
    }
}

impl From<cpal::DefaultStreamConfigError> for LingoError {
    fn from(err: cpal::DefaultStreamConfigError) -> Self {
        match err {
            cpal::DefaultStreamConfigError::StreamTypeNotSupported => {
                LingoError::InvalidAudioFormat(err.to_string())
            }
            other => classify_device_error(other.to_string()),
        }
    }
}

impl From<cpal::BuildStreamError> for LingoError {
    fn from(err: cpal::BuildStreamError) -> Self {
        match err {
            cpal::BuildStreamError::StreamConfigNotSupported => {
                LingoError::InvalidAudioFormat(err.to_string())
            }
            other => classify_device_error(other.to_string()),
        }
    }
}

impl From<cpal::PlayStreamError> for LingoError {
    fn from(err: cpal::PlayStreamError) -> Self {
        classify_device_error(err.to_string())
    }
}
