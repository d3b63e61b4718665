//! Error types for the durable store and the sync engine.

use tablesync_protocol::ProtocolError;
use tablesync_storage::StorageError;
use thiserror::Error;

/// Result type for durable store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type for engine operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors raised by the durable store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The byte store failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// A record could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Another process holds the store directory.
    #[error("store is locked by another process: {0}")]
    Locked(String),

    /// The journal holds data that cannot be replayed.
    #[error("store corrupted: {0}")]
    Corrupted(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Storage(StorageError::Io(err))
    }
}

/// Errors that can occur during local edits and sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Durable I/O failed; the attempted operation was not applied.
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    /// Network or transport error.
    #[error("network error: {message}")]
    Network {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The authority sent something the client cannot use.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The authority refused a push.
    #[error("server rejected push: {0}")]
    ServerRejected(String),

    /// An edit or import was rejected before anything changed.
    #[error("validation error: {0}")]
    Validation(#[from] ProtocolError),

    /// Sync was cancelled.
    #[error("sync cancelled")]
    Cancelled,

    /// No authority address has been configured.
    #[error("sync is not configured: {0}")]
    NotConfigured(String),
}

impl SyncError {
    /// Creates a retryable network error.
    pub fn network_retryable(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable network error.
    pub fn network_fatal(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::Network { retryable: true, .. })
    }

    /// Returns true for network failures of either kind.
    pub fn is_network(&self) -> bool {
        matches!(self, SyncError::Network { .. })
    }
}
