//! Error types for the MSI sync engine
//!
//! Stage failures never escape the stage boundary; these types exist so that
//! collaborators can report *what* went wrong and the stages can log it.

use thiserror::Error;

/// Result type alias for sync operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the sync engine
#[derive(Error, Debug)]
pub enum Error {
    /// Network or HTTP failure while talking to the remote service
    #[error("Transport error: {0}")]
    Transport(String),

    /// Malformed remote response or bundled snapshot
    #[error("Decode error: {0}")]
    Decode(String),

    /// Local persistence failure
    #[error("Store error: {0}")]
    Store(String),

    /// The background-task facility rejected a request
    #[error("Scheduling error: {0}")]
    Scheduling(#[from] SchedulingError),

    /// Expected early exit; not a real failure
    #[error("Operation cancelled")]
    Cancelled,

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Missing bundle resource, source or record
    #[error("Not found: {0}")]
    NotFound(String),

    /// Filesystem errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

/// Reasons the background-task facility can refuse a schedule request
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulingError {
    /// The task identifier is not registered or background refresh is disabled
    #[error("not permitted to schedule {0}")]
    NotPermitted(String),

    /// The facility already holds its maximum number of pending requests
    #[error("too many pending requests (limit {0})")]
    TooManyPending(usize),

    /// The facility is shut down or not available on this platform
    #[error("background scheduler unavailable")]
    Unavailable,

    /// Any other rejection
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a decode error
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    /// Create a store error
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a "not found" error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Whether this error is the cancellation outcome rather than a failure
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}
