//! Error types for the protocol crate.

use thiserror::Error;

/// Reasons a `connect` request is refused before any SSH work starts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// No host (or an empty one) was supplied.
    #[error("host is required")]
    MissingHost,

    /// No username (or an empty one) was supplied.
    #[error("username is required")]
    MissingUsername,

    /// Neither a password nor a private key was supplied.
    #[error("password or private key is required")]
    MissingCredential,

    /// Both a password and a private key were supplied.
    #[error("supply either a password or a private key, not both")]
    AmbiguousCredential,

    /// Zero, out of range, or not a number.
    #[error("port must be between 1 and 65535")]
    InvalidPort,

    /// An initial terminal size was given with a zero dimension.
    #[error("terminal rows and cols must be positive")]
    InvalidTerminalSize,
}

/// Protocol error type covering all possible failure modes.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Failed to serialize an outbound message.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// An inbound frame was not a well-formed client message.
    #[error("malformed message: {0}")]
    Deserialization(String),

    /// The message parsed but its payload was rejected.
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_eof() || err.is_syntax() {
            ProtocolError::Deserialization(err.to_string())
        } else {
            ProtocolError::Serialization(err.to_string())
        }
    }
}
