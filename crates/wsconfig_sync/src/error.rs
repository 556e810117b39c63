//! Error types for the sync engine.

use thiserror::Error;
use wsconfig_diff::DiffError;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Opaque error returned by a [`DeltaFetcher`](crate::DeltaFetcher).
pub type FetchError = Box<dyn std::error::Error + Send + Sync>;

/// Errors that can occur during sync operations.
///
/// Every poll-time variant is handled the same way by the poller: the
/// watermark stays put and the poll is retried with backoff.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The fetch collaborator failed.
    #[error("failed to get updated workspace configs: {0}")]
    Fetch(#[source] FetchError),

    /// The delta could not be reconciled with the cache.
    #[error("failed to reconcile workspace configs: {0}")]
    Diff(#[from] DiffError),

    /// A caller-supplied handler rejected the delta.
    #[error("failed to handle workspace configs: {0}")]
    Handler(String),

    /// Configuration values are out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The poller did not stop in time.
    #[error("operation timed out")]
    Timeout,

    /// The poller task ended abnormally.
    #[error("poller task failed: {0}")]
    Task(String),
}

impl SyncError {
    /// Wraps a collaborator error.
    pub fn fetch(error: impl Into<FetchError>) -> Self {
        Self::Fetch(error.into())
    }

    /// Creates a handler error.
    pub fn handler(message: impl Into<String>) -> Self {
        Self::Handler(message.into())
    }

    /// Creates a configuration error.
    pub(crate) fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }
}
