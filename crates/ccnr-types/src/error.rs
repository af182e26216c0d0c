use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid hex string: {0}")]
    InvalidHex(String),

    #[error("invalid byte length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("invalid name {uri:?}: {reason}")]
    InvalidName { uri: String, reason: String },

    #[error("unknown content type: {0}")]
    UnknownContentType(String),

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),
}
