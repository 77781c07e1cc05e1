//! One-time migration of the legacy offline queue.
//!
//! Older till builds kept unsynced mutations in an ad hoc queue outside the
//! entity store. On startup that queue is drained into the store once; a
//! completion marker in the store log makes later runs a no-op.

use crate::error::{StoreError, StoreResult};
use crate::store::EntityStore;
use crate::types::{EntityType, PendingOperation, SyncStatus};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// A mutation waiting in the legacy queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegacyMutation {
    /// Entity type.
    pub entity_type: EntityType,
    /// Entity id.
    pub id: String,
    /// Domain document (ignored for deletes).
    #[serde(default)]
    pub payload: Value,
    /// Operation, when the legacy writer recorded one.
    #[serde(default)]
    pub operation: Option<PendingOperation>,
    /// Last server version the legacy writer knew of.
    #[serde(default)]
    pub remote_version: u64,
}

/// Source of legacy mutations.
pub trait LegacyQueue {
    /// Returns every queued mutation, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue cannot be read.
    fn drain(&mut self) -> StoreResult<Vec<LegacyMutation>>;

    /// Discards the queue after its contents were migrated.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue cannot be removed.
    fn acknowledge(&mut self) -> StoreResult<()>;
}

/// Legacy queue persisted as a JSON array file.
#[derive(Debug, Clone)]
pub struct JsonFileQueue {
    path: PathBuf,
}

impl JsonFileQueue {
    /// Creates a queue reader for `path`. A missing file is an empty queue.
    #[must_use]
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl LegacyQueue for JsonFileQueue {
    fn drain(&mut self) -> StoreResult<Vec<LegacyMutation>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let data = fs::read(&self.path)?;
        serde_json::from_slice(&data)
            .map_err(|e| StoreError::Migration(format!("{}: {e}", self.path.display())))
    }

    fn acknowledge(&mut self) -> StoreResult<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Summary of a legacy migration run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Mutations written into the store.
    pub migrated: usize,
    /// Mutations dropped because the store already had the entity pending.
    pub skipped: usize,
    /// True if the migration had already completed before this run.
    pub already_done: bool,
}

/// Drains `queue` into `store`, once.
///
/// Entities the store already tracks with unsynced local changes are left
/// alone; the store copy is newer than anything in the legacy queue.
///
/// # Errors
///
/// Returns an error if the queue cannot be read, or if the store is degraded
/// (the queue is then left in place for a later attempt).
pub fn migrate_legacy_queue(
    store: &EntityStore,
    queue: &mut dyn LegacyQueue,
) -> StoreResult<MigrationReport> {
    if let Some(at) = store.legacy_migrated_at() {
        debug!(%at, "legacy queue already migrated");
        return Ok(MigrationReport {
            already_done: true,
            ..MigrationReport::default()
        });
    }
    if let Some(reason) = store.degraded_reason() {
        return Err(StoreError::Unavailable(reason));
    }

    let mut report = MigrationReport::default();
    for mutation in queue.drain()? {
        let existing = store.get_entity(mutation.entity_type, &mutation.id);
        if existing
            .as_ref()
            .is_some_and(|e| e.sync_status != SyncStatus::Synced)
        {
            debug!(
                entity_type = %mutation.entity_type,
                id = %mutation.id,
                "store already holds unsynced changes, skipping legacy entry"
            );
            report.skipped += 1;
            continue;
        }

        let is_delete = mutation.operation == Some(PendingOperation::Delete);
        let written = if is_delete && existing.is_some() {
            store.queue_deletion(mutation.entity_type, &mutation.id)
        } else {
            store.store_entity_with_operation(
                mutation.entity_type,
                &mutation.id,
                mutation.payload,
                SyncStatus::Pending,
                mutation.remote_version,
                mutation.operation,
            )
        };

        if written.is_none() {
            return Err(StoreError::Migration(format!(
                "could not store legacy entry {}/{}",
                mutation.entity_type, mutation.id
            )));
        }
        report.migrated += 1;
    }

    if !store.mark_legacy_migrated(Utc::now()) {
        return Err(StoreError::Migration("could not persist completion marker".into()));
    }
    if let Err(e) = queue.acknowledge() {
        warn!(error = %e, "migrated legacy queue could not be removed");
    }

    info!(
        migrated = report.migrated,
        skipped = report.skipped,
        "legacy queue migrated"
    );
    Ok(report)
}
