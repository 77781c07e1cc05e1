//! Data model shared by the store and the sync orchestrator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Domain category of a synchronizable record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    /// Catalog products.
    Product,
    /// Customer accounts.
    Customer,
    /// Completed sales.
    Sale,
    /// Printed or emailed receipts.
    Receipt,
    /// Invoices issued to customers.
    Invoice,
    /// Product categories.
    Category,
    /// Suppliers.
    Supplier,
    /// Stock levels.
    Inventory,
}

impl EntityType {
    /// Every entity type, in declaration order.
    pub const ALL: [EntityType; 8] = [
        EntityType::Product,
        EntityType::Customer,
        EntityType::Sale,
        EntityType::Receipt,
        EntityType::Invoice,
        EntityType::Category,
        EntityType::Supplier,
        EntityType::Inventory,
    ];

    /// Returns the lowercase name used in logs and on the command line.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            EntityType::Product => "product",
            EntityType::Customer => "customer",
            EntityType::Sale => "sale",
            EntityType::Receipt => "receipt",
            EntityType::Invoice => "invoice",
            EntityType::Category => "category",
            EntityType::Supplier => "supplier",
            EntityType::Inventory => "inventory",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown entity type: {s}"))
    }
}

/// Sync state of a stored entity.
///
/// ```text
/// pending --success--> synced
/// pending --failure--> failed
/// failed  --retry----> pending | synced | conflict | failed
/// pending|failed --remote ahead--> conflict
/// conflict --resolve--> synced
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// Locally mutated, not yet confirmed by the server.
    Pending,
    /// Confirmed by a server round trip.
    Synced,
    /// Local and remote versions diverged; needs manual resolution.
    Conflict,
    /// Last attempt failed (retryable until the retry limit is hit).
    Failed,
}

impl SyncStatus {
    /// Every status, in declaration order.
    pub const ALL: [SyncStatus; 4] = [
        SyncStatus::Pending,
        SyncStatus::Synced,
        SyncStatus::Conflict,
        SyncStatus::Failed,
    ];

    /// Returns the lowercase name of the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Synced => "synced",
            SyncStatus::Conflict => "conflict",
            SyncStatus::Failed => "failed",
        }
    }

    /// Returns true if a sync pass picks up entities in this state.
    #[must_use]
    pub const fn needs_sync(self) -> bool {
        matches!(self, SyncStatus::Pending | SyncStatus::Failed)
    }

    /// Returns true if the orchestrator may move an entity from `self` to `next`.
    ///
    /// Local mutations are not bound by this: any record becomes `Pending`
    /// when the application edits it.
    #[must_use]
    pub const fn can_transition_to(self, next: SyncStatus) -> bool {
        match (self, next) {
            (SyncStatus::Pending, _) => true,
            (SyncStatus::Failed, _) => true,
            (SyncStatus::Conflict, SyncStatus::Synced | SyncStatus::Conflict) => true,
            (SyncStatus::Synced, SyncStatus::Synced) => true,
            _ => false,
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SyncStatus::ALL
            .into_iter()
            .find(|st| st.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown sync status: {s}"))
    }
}

/// Remote operation a queued mutation stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PendingOperation {
    /// The server has never seen this record.
    Create,
    /// The server holds an older version.
    Update,
    /// The record should be deleted remotely.
    Delete,
}

impl PendingOperation {
    /// Returns the lowercase name of the operation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            PendingOperation::Create => "create",
            PendingOperation::Update => "update",
            PendingOperation::Delete => "delete",
        }
    }
}

impl fmt::Display for PendingOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A record held by the entity store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEntity {
    /// Domain category.
    pub entity_type: EntityType,
    /// Identifier, unique within `entity_type`.
    pub id: String,
    /// Opaque domain document.
    pub payload: Value,
    /// Current sync state.
    pub sync_status: SyncStatus,
    /// Remote operation tag assigned when the mutation was queued.
    #[serde(default)]
    pub operation: Option<PendingOperation>,
    /// Delete-intent marker.
    #[serde(default)]
    pub deleted: bool,
    /// Incremented on every local mutation.
    pub local_version: u64,
    /// Last server version known locally.
    pub remote_version: u64,
    /// Time of the last change to this record.
    pub last_modified: DateTime<Utc>,
    /// Message of the last failed attempt.
    #[serde(default)]
    pub last_error: Option<String>,
}

impl StoredEntity {
    /// Returns the operation a sync pass should perform for this entity.
    ///
    /// The tag written with the mutation wins. Untagged records (for example
    /// ones drained from a legacy queue) fall back to the deletion marker,
    /// then to `remote_version == 0` meaning create.
    #[must_use]
    pub fn intended_operation(&self) -> PendingOperation {
        if let Some(op) = self.operation {
            return op;
        }
        if self.deleted {
            PendingOperation::Delete
        } else if self.remote_version == 0 {
            PendingOperation::Create
        } else {
            PendingOperation::Update
        }
    }

    /// Returns the `(type, id)` key of this entity.
    #[must_use]
    pub fn key(&self) -> EntityKey {
        (self.entity_type, self.id.clone())
    }
}

/// Unique key of a stored entity.
pub type EntityKey = (EntityType, String);

/// Cached per-type sync summary. Derived, not authoritative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMetadata {
    /// Entity type this summary describes.
    pub entity_type: EntityType,
    /// Completion time of the last sync pass.
    pub last_sync_timestamp: Option<DateTime<Utc>>,
    /// Entities of this type in `pending` state.
    pub pending_count: usize,
}

/// Number of entities per sync status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    /// Entities in `pending`.
    pub pending: usize,
    /// Entities in `synced`.
    pub synced: usize,
    /// Entities in `conflict`.
    pub conflict: usize,
    /// Entities in `failed`.
    pub failed: usize,
}

impl StatusCounts {
    /// Returns the count for one status.
    #[must_use]
    pub const fn get(&self, status: SyncStatus) -> usize {
        match status {
            SyncStatus::Pending => self.pending,
            SyncStatus::Synced => self.synced,
            SyncStatus::Conflict => self.conflict,
            SyncStatus::Failed => self.failed,
        }
    }

    /// Increments the count for one status.
    pub fn add(&mut self, status: SyncStatus) {
        match status {
            SyncStatus::Pending => self.pending += 1,
            SyncStatus::Synced => self.synced += 1,
            SyncStatus::Conflict => self.conflict += 1,
            SyncStatus::Failed => self.failed += 1,
        }
    }

    /// Total number of entities counted.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.pending + self.synced + self.conflict + self.failed
    }

    /// Iterates over `(status, count)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (SyncStatus, usize)> + '_ {
        SyncStatus::ALL.into_iter().map(move |s| (s, self.get(s)))
    }
}

/// What the orchestrator learned from a round trip, applied through
/// [`crate::EntityStore::apply_sync_outcome`].
#[derive(Debug, Clone, PartialEq)]
pub struct SyncOutcome {
    /// New status.
    pub status: SyncStatus,
    /// New remote version, if it changed.
    pub remote_version: Option<u64>,
    /// Error message to record (cleared when `None`).
    pub error: Option<String>,
    /// Replacement payload (remote copy accepted verbatim).
    pub payload: Option<Value>,
}

impl SyncOutcome {
    /// A confirmed round trip.
    #[must_use]
    pub fn synced(remote_version: u64) -> Self {
        Self {
            status: SyncStatus::Synced,
            remote_version: Some(remote_version),
            error: None,
            payload: None,
        }
    }

    /// A failed attempt.
    #[must_use]
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: SyncStatus::Failed,
            remote_version: None,
            error: Some(error.into()),
            payload: None,
        }
    }

    /// A detected version conflict.
    #[must_use]
    pub fn conflict() -> Self {
        Self {
            status: SyncStatus::Conflict,
            remote_version: None,
            error: None,
            payload: None,
        }
    }

    /// Replaces the local payload along with the status change.
    #[must_use]
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }
}
