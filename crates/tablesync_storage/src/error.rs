//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Attempted to read beyond the end of storage.
    #[error("read beyond end of storage: offset {offset}, len {len}, size {size}")]
    ReadPastEnd {
        /// The requested read offset.
        offset: u64,
        /// The requested read length.
        len: usize,
        /// The current storage size.
        size: u64,
    },

    /// Attempted to grow the store through `truncate`.
    #[error("cannot truncate to {requested} bytes, store holds {size}")]
    InvalidTruncate {
        /// The requested size.
        requested: u64,
        /// The current size.
        size: u64,
    },

    /// The stored bytes are unusable.
    #[error("storage corrupted: {0}")]
    Corrupted(String),

    /// A write was refused by an injected fault.
    #[error("injected write failure")]
    InjectedFailure,
}

impl StorageError {
    /// Returns true if the error came from a fault injected by a test backend.
    pub fn is_injected(&self) -> bool {
        matches!(self, StorageError::InjectedFailure)
    }
}
