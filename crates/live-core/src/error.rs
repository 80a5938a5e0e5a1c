//! Error types for live protocol primitives

use thiserror::Error;

/// Result type alias for protocol operations
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Channel name cannot be used as a topic segment
    #[error("invalid channel: {0}")]
    InvalidChannel(String),

    /// Client id cannot be used as a topic segment
    #[error("invalid client id: {0}")]
    InvalidClientId(String),

    /// Inbound topic is not one of the session's receiver topics
    #[error("unexpected topic: {0}")]
    InvalidTopic(String),

    /// Serialization error
    #[error("encode error: {0}")]
    EncodeError(String),

    /// Payload is not UTF-8 JSON
    #[error("decode error: {0}")]
    DecodeError(String),
}

