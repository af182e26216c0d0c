/// Errors from store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No node or property exists at the path.
    #[error("path not found: {0}")]
    PathNotFound(String),

    /// The node handle refers to a node that has been removed.
    #[error("stale node handle: {0}")]
    StaleNode(u64),

    /// The name or path violates the store's grammar or a node constraint.
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    /// Another session holds the node checked out.
    #[error("lock conflict on {path}: checked out by session {owner}")]
    LockConflict { path: String, owner: u64 },

    /// The node is versionable and checked in (read-only).
    #[error("version error: {0} is checked in")]
    Version(String),

    /// The property exists but holds a different value type.
    #[error("value format error: {0}")]
    ValueFormat(String),

    /// The query statement could not be compiled.
    #[error("invalid query {statement:?}: {reason}")]
    InvalidQuery { statement: String, reason: String },

    /// The store does not support the requested capability.
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// No observer is registered under this id.
    #[error("unknown observer: {0}")]
    UnknownObserver(u64),

    /// The session has logged out.
    #[error("session {0} is closed")]
    SessionClosed(u64),

    /// I/O error while streaming a binary value.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal failure, e.g. a poisoned lock.
    #[error("internal store error: {0}")]
    Internal(String),
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
