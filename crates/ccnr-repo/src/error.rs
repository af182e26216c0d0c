use ccnr_store::StoreError;
use thiserror::Error;

/// Errors from decoding a stored path segment back into a name component.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("invalid base64 in segment {segment:?}: {reason}")]
    InvalidBase64 { segment: String, reason: String },

    #[error("malformed escape in segment {segment:?} at offset {offset}")]
    InvalidEscape { segment: String, offset: usize },

    #[error("path {0:?} is not absolute")]
    RelativePath(String),
}

/// Errors surfaced by the repository engine.
#[derive(Debug, Error)]
pub enum RepoError {
    /// The name or interest was rejected before touching the store.
    #[error("invalid input: {0}")]
    Input(String),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// A node's stored properties do not describe a well-formed object.
    #[error("metadata error at {path}: {reason}")]
    Metadata { path: String, reason: String },

    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    /// The store rejected registering or removing an observer.
    #[error("subscription error on {path}: {source}")]
    Subscription {
        path: String,
        #[source]
        source: StoreError,
    },

    #[error("configuration error: {0}")]
    Config(String),
}

pub type RepoResult<T> = Result<T, RepoError>;
