//! Storage backend trait definition.

use crate::error::StorageResult;

/// An append-only byte log used by the entity store.
///
/// The store owns the record framing; a backend only moves bytes.
///
/// # Invariants
///
/// - `append` returns the offset where the data begins
/// - `read_at` returns exactly the bytes previously appended at that offset
/// - after `sync` returns, appended data survives process termination
/// - `replace_contents` is all-or-nothing: a crash leaves either the old or
///   the new contents, never a mix
pub trait StorageBackend: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::ReadPastEnd`] if the range is not
    /// fully inside the log, or an I/O error.
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Appends data to the end of the log, returning its offset.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Pushes buffered writes to the operating system.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    fn flush(&mut self) -> StorageResult<()>;

    /// Returns the current size of the log in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> StorageResult<u64>;

    /// Makes all data and metadata durable.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync fails.
    fn sync(&mut self) -> StorageResult<()>;

    /// Drops everything after `new_size`.
    ///
    /// Used to cut off a torn record at the tail of the log.
    ///
    /// # Errors
    ///
    /// Returns an error if `new_size` exceeds the current size or the
    /// truncation fails.
    fn truncate(&mut self, new_size: u64) -> StorageResult<()>;

    /// Atomically replaces the whole log with `data`.
    ///
    /// Used by compaction to swap in a rewritten log.
    ///
    /// # Errors
    ///
    /// Returns an error if the new contents cannot be written.
    fn replace_contents(&mut self, data: &[u8]) -> StorageResult<()>;
}
