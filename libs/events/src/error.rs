//! Error types for message handling.

use thiserror::Error;

/// Errors that can occur when decoding or validating messages.
#[derive(Debug, Error, Clone)]
pub enum EventError {
    /// The message type does not match its payload.
    #[error("unknown message type: {0}")]
    UnknownMessageType(String),

    /// The message version is not supported.
    #[error("unsupported message version: {message_type} v{version}")]
    UnsupportedVersion { message_type: String, version: i32 },

    /// The message payload is invalid.
    #[error("invalid message payload: {0}")]
    InvalidPayload(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for EventError {
    fn from(err: serde_json::Error) -> Self {
        EventError::Serialization(err.to_string())
    }
}
