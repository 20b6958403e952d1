//! Error taxonomy for remote reads and sync passes.

use thiserror::Error;

/// Failure of a single remote store call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    /// The file or directory does not exist (HTTP 404).
    #[error("not found: {0}")]
    NotFound(String),
    /// The remote refused the request because of its rate limit (HTTP 403/429).
    #[error("rate limited: {0}")]
    RateLimited(String),
    /// Network failure, timeout, or an unexpected response.
    #[error("unreachable: {0}")]
    Unreachable(String),
}

/// Failure of a whole sync pass.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
    /// The remote store could not be reached; nothing was published.
    #[error("remote store unreachable: {0}")]
    Unreachable(String),
    /// Every category was skipped, so there is no snapshot to publish.
    #[error("no category could be read ({0} skipped)")]
    NoCategories(usize),
    /// Persisting the rendered index failed.
    #[error("failed to write {path}: {message}")]
    WriteFailure { path: String, message: String },
    /// The coordinator has shut down.
    #[error("sync coordinator stopped")]
    Stopped,
}

impl From<RemoteError> for SyncError {
    fn from(err: RemoteError) -> Self {
        SyncError::Unreachable(err.to_string())
    }
}
