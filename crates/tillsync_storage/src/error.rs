//! Error types for storage backends.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors raised by a storage backend.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Attempted to read beyond the end of the log.
    #[error("read beyond end of storage: offset {offset}, len {len}, size {size}")]
    ReadPastEnd {
        /// The requested read offset.
        offset: u64,
        /// The requested read length.
        len: usize,
        /// The current log size.
        size: u64,
    },

    /// Requested truncation would grow the log.
    #[error("cannot truncate to {requested} bytes, log is only {size} bytes")]
    TruncateBeyondEnd {
        /// Requested new size.
        requested: u64,
        /// Current size.
        size: u64,
    },
}
