//! Error types for the entity store.
//!
//! These never cross the public read/write API of [`crate::EntityStore`]:
//! the store logs them and degrades instead. They surface from lower-level
//! helpers (log scanning, directory handling, legacy migration).

use std::io;
use thiserror::Error;

/// Result type for store internals.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised inside the entity store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] tillsync_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A record body could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),

    /// The record log is damaged.
    #[error("log corruption at offset {offset}: {message}")]
    LogCorruption {
        /// Offset of the damaged record.
        offset: u64,
        /// Description of the damage.
        message: String,
    },

    /// A record failed its checksum.
    #[error("checksum mismatch at offset {offset}: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Offset of the record.
        offset: u64,
        /// Stored checksum.
        expected: u32,
        /// Computed checksum.
        actual: u32,
    },

    /// Another process holds the store directory.
    #[error("store locked: another process has exclusive access")]
    Locked,

    /// The store is degraded or not initialized.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The store path is unusable.
    #[error("invalid store path: {0}")]
    InvalidPath(String),

    /// Legacy queue migration failed.
    #[error("legacy migration failed: {0}")]
    Migration(String),
}

impl StoreError {
    /// Creates a log corruption error.
    pub fn corruption(offset: u64, message: impl Into<String>) -> Self {
        Self::LogCorruption {
            offset,
            message: message.into(),
        }
    }

    /// Creates a codec error from any displayable error.
    pub fn codec(err: impl std::fmt::Display) -> Self {
        Self::Codec(err.to_string())
    }
}
