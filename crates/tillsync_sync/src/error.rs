//! Error types for sync operations.

use thiserror::Error;
use tillsync_store::EntityType;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
///
/// Conflicts and exhausted retries are states recorded on entities, not
/// errors; a sync pass reports them through its counts.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// No adapter is registered for the entity type.
    #[error("no sync adapter registered for {0}")]
    AdapterMissing(EntityType),

    /// The remote service does not know the record.
    #[error("{entity_type} {id} not found on remote")]
    NotFound {
        /// Entity type.
        entity_type: EntityType,
        /// Entity id.
        id: String,
    },

    /// The remote call failed.
    #[error("remote error: {message}")]
    Remote {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// An adapter call exceeded the configured timeout.
    #[error("adapter call timed out")]
    Timeout,

    /// The entity is not in the local store.
    #[error("{entity_type} {id} not found in local store")]
    EntityNotFound {
        /// Entity type.
        entity_type: EntityType,
        /// Entity id.
        id: String,
    },

    /// Resolution was requested for an entity that is not in conflict.
    #[error("{entity_type} {id} is not in conflict")]
    NotInConflict {
        /// Entity type.
        entity_type: EntityType,
        /// Entity id.
        id: String,
    },

    /// A sync pass panicked and was abandoned.
    #[error("sync pass for {entity_type} aborted: {message}")]
    PassAborted {
        /// Entity type of the pass.
        entity_type: EntityType,
        /// Panic message.
        message: String,
    },

    /// The local store rejected the write.
    #[error("entity store unavailable: {0}")]
    StoreUnavailable(String),

    /// The monitor is no longer running.
    #[error("sync monitor channel closed")]
    ChannelClosed,
}

impl SyncError {
    /// Creates a retryable remote error.
    pub fn remote(message: impl Into<String>) -> Self {
        Self::Remote {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable remote error.
    pub fn remote_fatal(message: impl Into<String>) -> Self {
        Self::Remote {
            message: message.into(),
            retryable: false,
        }
    }

    /// Creates a not-found error.
    pub fn not_found(entity_type: EntityType, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type,
            id: id.into(),
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Remote { retryable, .. } => *retryable,
            SyncError::Timeout => true,
            _ => false,
        }
    }

    /// Returns true if the remote reported the record missing.
    pub fn is_not_found(&self) -> bool {
        matches!(self, SyncError::NotFound { .. })
    }
}
