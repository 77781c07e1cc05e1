//! The entity store.

use crate::config::StoreConfig;
use crate::dir::StoreDir;
use crate::error::{StoreError, StoreResult};
use crate::log::{encode_record, scan_log, LogRecord, MetaEntry};
use crate::types::{
    EntityKey, EntityType, PendingOperation, StatusCounts, StoredEntity, SyncMetadata,
    SyncOutcome, SyncStatus,
};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use tillsync_storage::{FileBackend, InMemoryBackend, StorageBackend};
use tracing::{debug, info, warn};

enum Medium {
    Uninitialized(Option<Box<dyn StorageBackend>>),
    Ready {
        backend: Box<dyn StorageBackend>,
        _dir: Option<StoreDir>,
    },
    Degraded(String),
}

#[derive(Default)]
struct Index {
    entities: BTreeMap<EntityKey, StoredEntity>,
    last_sync: HashMap<EntityType, DateTime<Utc>>,
    legacy_migrated: Option<DateTime<Utc>>,
}

impl Index {
    fn apply(&mut self, record: LogRecord) {
        match record {
            LogRecord::Put(entity) => {
                self.entities.insert(entity.key(), entity);
            }
            LogRecord::Remove { entity_type, id } => {
                self.entities.remove(&(entity_type, id));
            }
            LogRecord::ClearType(entity_type) => {
                self.entities.retain(|(t, _), _| *t != entity_type);
            }
            LogRecord::ClearAll => self.entities.clear(),
            LogRecord::Meta(MetaEntry::LastSync { entity_type, at }) => {
                self.last_sync.insert(entity_type, at);
            }
            LogRecord::Meta(MetaEntry::LegacyMigrated { at }) => {
                self.legacy_migrated = Some(at);
            }
        }
    }

    fn of_type(&self, entity_type: EntityType) -> impl Iterator<Item = &StoredEntity> + '_ {
        self.entities
            .range((entity_type, String::new())..)
            .take_while(move |((t, _), _)| *t == entity_type)
            .map(|(_, entity)| entity)
    }

    /// Records needed to rebuild this index from scratch.
    fn snapshot_records(&self) -> Vec<LogRecord> {
        let mut records: Vec<LogRecord> = self
            .entities
            .values()
            .cloned()
            .map(LogRecord::Put)
            .collect();
        let mut synced: Vec<_> = self.last_sync.iter().collect();
        synced.sort_by_key(|(t, _)| **t);
        records.extend(synced.into_iter().map(|(t, at)| {
            LogRecord::Meta(MetaEntry::LastSync {
                entity_type: *t,
                at: *at,
            })
        }));
        if let Some(at) = self.legacy_migrated {
            records.push(LogRecord::Meta(MetaEntry::LegacyMigrated { at }));
        }
        records
    }
}

struct Inner {
    medium: Medium,
    index: Index,
}

/// Size of the log before and after [`EntityStore::compact`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactionStats {
    /// Log size before compaction.
    pub bytes_before: u64,
    /// Log size after compaction.
    pub bytes_after: u64,
    /// Records written to the compacted log.
    pub records: usize,
}

/// Durable key-value store of entities keyed by `(entity type, id)`.
///
/// Every mutation is appended to a framed record log and applied to an
/// in-memory index; reads are served from the index. The store never
/// surfaces storage errors: if its directory cannot be opened, is locked by
/// another process, or the log cannot be read, it enters **degraded mode**
/// where reads return empty results and writes are no-ops returning
/// `None`/`false`/`0`.
///
/// # Example
///
/// ```rust
/// use serde_json::json;
/// use tillsync_store::{EntityStore, EntityType, SyncStatus};
///
/// let store = EntityStore::in_memory();
/// let saved = store
///     .store_entity(EntityType::Product, "P1", json!({"name": "Latte"}), SyncStatus::Pending, 0)
///     .unwrap();
/// assert_eq!(saved.local_version, 1);
/// assert_eq!(store.get_total_pending_count(), 1);
/// ```
pub struct EntityStore {
    config: StoreConfig,
    inner: RwLock<Inner>,
}

impl EntityStore {
    /// Creates an uninitialized store. The first call to [`Self::init`] (or
    /// any other operation) opens the medium.
    #[must_use]
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            inner: RwLock::new(Inner {
                medium: Medium::Uninitialized(None),
                index: Index::default(),
            }),
        }
    }

    /// Creates and initializes a store.
    #[must_use]
    pub fn open(config: StoreConfig) -> Self {
        let store = Self::new(config);
        store.init();
        store
    }

    /// Opens a store that keeps everything in memory.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::open(StoreConfig::in_memory())
    }

    /// Opens a store over an existing backend, replaying whatever it holds.
    #[must_use]
    pub fn with_backend(backend: Box<dyn StorageBackend>) -> Self {
        let store = Self {
            config: StoreConfig::in_memory(),
            inner: RwLock::new(Inner {
                medium: Medium::Uninitialized(Some(backend)),
                index: Index::default(),
            }),
        };
        store.init();
        store
    }

    /// Opens the storage medium and replays the log.
    ///
    /// Idempotent: once the store is ready or degraded, further calls do
    /// nothing. Never fails; failures switch the store to degraded mode.
    pub fn init(&self) {
        if !matches!(self.inner.read().medium, Medium::Uninitialized(_)) {
            return;
        }

        let mut inner = self.inner.write();
        let preset = match &mut inner.medium {
            Medium::Uninitialized(preset) => preset.take(),
            _ => return,
        };

        match self.open_medium(preset) {
            Ok((medium, index)) => {
                info!(
                    entities = index.entities.len(),
                    durable = self.config.path.is_some(),
                    "entity store ready"
                );
                inner.medium = medium;
                inner.index = index;
            }
            Err(e) => {
                warn!(error = %e, "entity store unavailable, running degraded");
                inner.medium = Medium::Degraded(e.to_string());
                inner.index = Index::default();
            }
        }
    }

    fn open_medium(
        &self,
        preset: Option<Box<dyn StorageBackend>>,
    ) -> StoreResult<(Medium, Index)> {
        let (mut backend, dir): (Box<dyn StorageBackend>, Option<StoreDir>) =
            match (preset, &self.config.path) {
                (Some(backend), _) => (backend, None),
                (None, None) => (Box::new(InMemoryBackend::new()), None),
                (None, Some(path)) => {
                    let dir = StoreDir::open(path, self.config.create_if_missing)?;
                    let backend = FileBackend::open(&dir.log_path())?;
                    (Box::new(backend), Some(dir))
                }
            };

        let scan = scan_log(backend.as_ref())?;
        if scan.is_torn_tail() {
            warn!(
                discarded = scan.total_len - scan.valid_len,
                "truncating torn record at log tail"
            );
            backend.truncate(scan.valid_len)?;
        }

        let mut index = Index::default();
        for (_, record) in scan.records {
            index.apply(record);
        }

        if let Some(damage) = &scan.damage {
            // Keep the damaged bytes before anything is rewritten.
            let preserved = match &dir {
                Some(dir) => Some(dir.preserve_log()?),
                None => None,
            };
            warn!(
                error = %damage,
                recovered = scan.recovered,
                skipped_bytes = scan.skipped_bytes,
                preserved = ?preserved,
                "damaged log records, rewriting log from readable records"
            );
            rewrite_log(backend.as_mut(), &index.snapshot_records())?;
        }

        Ok((Medium::Ready { backend, _dir: dir }, index))
    }

    /// Returns true if the store is running without a storage medium.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.init();
        matches!(self.inner.read().medium, Medium::Degraded(_))
    }

    /// Returns why the store is degraded, if it is.
    #[must_use]
    pub fn degraded_reason(&self) -> Option<String> {
        self.init();
        match &self.inner.read().medium {
            Medium::Degraded(reason) => Some(reason.clone()),
            _ => None,
        }
    }

    /// Appends `record` to the log and applies it to the index.
    fn commit(&self, inner: &mut Inner, record: LogRecord) -> StoreResult<()> {
        let backend = match &mut inner.medium {
            Medium::Ready { backend, .. } => backend,
            Medium::Degraded(reason) => return Err(StoreError::Unavailable(reason.clone())),
            Medium::Uninitialized(_) => {
                return Err(StoreError::Unavailable("not initialized".into()))
            }
        };

        let bytes = encode_record(&record)?;
        let size_before = backend.size()?;
        if let Err(e) = backend.append(&bytes) {
            // Drop any partial frame so later appends stay readable.
            if let Err(rollback) = backend.truncate(size_before) {
                warn!(
                    error = %rollback,
                    "could not drop partial record after failed append, running degraded"
                );
                inner.medium = Medium::Degraded(format!("log rollback failed: {rollback}"));
            }
            return Err(e.into());
        }
        if self.config.sync_on_write {
            backend.sync()?;
        }

        inner.index.apply(record);
        Ok(())
    }

    /// Commits a batch of records, logging instead of failing.
    fn commit_all(&self, inner: &mut Inner, records: Vec<LogRecord>) -> bool {
        for record in records {
            if let Err(e) = self.commit(inner, record) {
                self.report_write_failure(&e);
                return false;
            }
        }
        true
    }

    fn report_write_failure(&self, error: &StoreError) {
        match error {
            StoreError::Unavailable(_) => debug!(error = %error, "write skipped"),
            _ => warn!(error = %error, "write to entity store failed"),
        }
    }

    fn write_entity(&self, inner: &mut Inner, entity: StoredEntity) -> Option<StoredEntity> {
        match self.commit(inner, LogRecord::Put(entity.clone())) {
            Ok(()) => Some(entity),
            Err(e) => {
                self.report_write_failure(&e);
                None
            }
        }
    }

    // ------------------------------------------------------------------
    // Local mutations
    // ------------------------------------------------------------------

    /// Stores a local mutation of an entity.
    ///
    /// The local version is bumped (new records start at 1). When `status`
    /// is anything but `Synced` the mutation is tagged with the remote
    /// operation it stands for: create if `remote_version == 0`, update
    /// otherwise.
    ///
    /// Returns the stored entity, or `None` if the store is degraded or the
    /// write failed.
    pub fn store_entity(
        &self,
        entity_type: EntityType,
        id: &str,
        payload: Value,
        status: SyncStatus,
        remote_version: u64,
    ) -> Option<StoredEntity> {
        self.store_entity_with_operation(entity_type, id, payload, status, remote_version, None)
    }

    /// Like [`Self::store_entity`], with an explicit operation tag.
    pub fn store_entity_with_operation(
        &self,
        entity_type: EntityType,
        id: &str,
        payload: Value,
        status: SyncStatus,
        remote_version: u64,
        operation: Option<PendingOperation>,
    ) -> Option<StoredEntity> {
        self.init();
        let mut inner = self.inner.write();

        let local_version = inner
            .index
            .entities
            .get(&(entity_type, id.to_string()))
            .map_or(1, |existing| existing.local_version + 1);

        let operation = match status {
            SyncStatus::Synced => None,
            _ => Some(operation.unwrap_or(if remote_version == 0 {
                PendingOperation::Create
            } else {
                PendingOperation::Update
            })),
        };

        let entity = StoredEntity {
            entity_type,
            id: id.to_string(),
            payload,
            sync_status: status,
            operation,
            deleted: operation == Some(PendingOperation::Delete),
            local_version,
            remote_version,
            last_modified: Utc::now(),
            last_error: None,
        };

        debug!(
            entity_type = %entity_type,
            id,
            status = %status,
            local_version,
            "stored local mutation"
        );
        self.write_entity(&mut inner, entity)
    }

    /// Queues a delete-intent for an entity.
    ///
    /// The record stays in the store, marked deleted and pending, until a
    /// sync pass confirms the remote delete. Unknown ids get a tombstone so
    /// records that only exist remotely can be deleted too.
    pub fn queue_deletion(&self, entity_type: EntityType, id: &str) -> Option<StoredEntity> {
        self.init();
        let mut inner = self.inner.write();

        let entity = match inner.index.entities.get(&(entity_type, id.to_string())) {
            Some(existing) => StoredEntity {
                sync_status: SyncStatus::Pending,
                operation: Some(PendingOperation::Delete),
                deleted: true,
                local_version: existing.local_version + 1,
                last_modified: Utc::now(),
                last_error: None,
                ..existing.clone()
            },
            None => StoredEntity {
                entity_type,
                id: id.to_string(),
                payload: Value::Null,
                sync_status: SyncStatus::Pending,
                operation: Some(PendingOperation::Delete),
                deleted: true,
                local_version: 1,
                remote_version: 0,
                last_modified: Utc::now(),
                last_error: None,
            },
        };

        debug!(entity_type = %entity_type, id, "queued deletion");
        self.write_entity(&mut inner, entity)
    }

    // ------------------------------------------------------------------
    // Orchestrator updates
    // ------------------------------------------------------------------

    /// Records the result of a sync round trip.
    ///
    /// `expected_local_version` is the local version the orchestrator read
    /// when it snapshotted the entity. If a local edit landed since then, a
    /// success does not mark the newer edit synced: the entity stays
    /// pending, only the confirmed remote version is recorded, and a
    /// confirmed create turns the pending tag into an update.
    ///
    /// Returns `None` if the entity no longer exists or the write failed.
    pub fn apply_sync_outcome(
        &self,
        entity_type: EntityType,
        id: &str,
        expected_local_version: u64,
        outcome: SyncOutcome,
    ) -> Option<StoredEntity> {
        self.init();
        let mut inner = self.inner.write();
        let current = inner
            .index
            .entities
            .get(&(entity_type, id.to_string()))?
            .clone();

        let raced = current.local_version != expected_local_version;
        let mut next = current.clone();
        if let Some(remote_version) = outcome.remote_version {
            next.remote_version = remote_version;
        }

        if raced && outcome.status == SyncStatus::Synced {
            debug!(
                entity_type = %entity_type,
                id,
                expected_local_version,
                local_version = current.local_version,
                "local edit raced the sync pass, keeping it pending"
            );
            if next.operation == Some(PendingOperation::Create) {
                next.operation = Some(PendingOperation::Update);
            }
        } else {
            if !current.sync_status.can_transition_to(outcome.status) {
                warn!(
                    entity_type = %entity_type,
                    id,
                    from = %current.sync_status,
                    to = %outcome.status,
                    "unexpected sync status transition"
                );
            }
            next.sync_status = outcome.status;
            next.last_error = outcome.error;
            if outcome.status == SyncStatus::Synced {
                next.operation = None;
            }
            if let Some(payload) = outcome.payload {
                next.payload = payload;
                next.deleted = false;
            }
        }
        next.last_modified = Utc::now();

        self.write_entity(&mut inner, next)
    }

    /// Puts an entity back into `pending`, clearing its last error.
    ///
    /// This is the external reset for entities that exhausted their retries.
    pub fn requeue(&self, entity_type: EntityType, id: &str) -> Option<StoredEntity> {
        self.init();
        let mut inner = self.inner.write();
        let mut entity = inner
            .index
            .entities
            .get(&(entity_type, id.to_string()))?
            .clone();

        entity.sync_status = SyncStatus::Pending;
        entity.last_error = None;
        if entity.operation.is_none() {
            entity.operation = Some(entity.intended_operation());
        }
        entity.last_modified = Utc::now();
        self.write_entity(&mut inner, entity)
    }

    /// Records the completion time of a sync pass.
    pub fn record_sync_time(&self, entity_type: EntityType, at: DateTime<Utc>) -> bool {
        self.init();
        let mut inner = self.inner.write();
        let record = LogRecord::Meta(MetaEntry::LastSync { entity_type, at });
        self.commit_all(&mut inner, vec![record])
    }

    /// Updates the sync time held in memory without appending to the log.
    ///
    /// For passes that changed nothing. The time reaches the log with the
    /// next [`Self::record_sync_time`] or [`Self::compact`].
    pub fn note_sync_time(&self, entity_type: EntityType, at: DateTime<Utc>) -> bool {
        self.init();
        let mut inner = self.inner.write();
        if !matches!(inner.medium, Medium::Ready { .. }) {
            return false;
        }
        inner.index.last_sync.insert(entity_type, at);
        true
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Returns one entity.
    #[must_use]
    pub fn get_entity(&self, entity_type: EntityType, id: &str) -> Option<StoredEntity> {
        self.init();
        self.inner
            .read()
            .index
            .entities
            .get(&(entity_type, id.to_string()))
            .cloned()
    }

    /// Lists entities of a type, optionally filtered by status, in id order.
    #[must_use]
    pub fn list_entities(
        &self,
        entity_type: EntityType,
        status: Option<SyncStatus>,
    ) -> Vec<StoredEntity> {
        self.init();
        self.inner
            .read()
            .index
            .of_type(entity_type)
            .filter(|e| status.map_or(true, |s| e.sync_status == s))
            .cloned()
            .collect()
    }

    /// Snapshot of the entities a sync pass should process: every `pending`
    /// or `failed` entity of the type, in id order.
    #[must_use]
    pub fn sync_candidates(&self, entity_type: EntityType) -> Vec<StoredEntity> {
        self.init();
        self.inner
            .read()
            .index
            .of_type(entity_type)
            .filter(|e| e.sync_status.needs_sync())
            .cloned()
            .collect()
    }

    /// Returns the cached sync summary of a type.
    #[must_use]
    pub fn get_metadata(&self, entity_type: EntityType) -> SyncMetadata {
        self.init();
        let inner = self.inner.read();
        SyncMetadata {
            entity_type,
            last_sync_timestamp: inner.index.last_sync.get(&entity_type).copied(),
            pending_count: inner
                .index
                .of_type(entity_type)
                .filter(|e| e.sync_status == SyncStatus::Pending)
                .count(),
        }
    }

    /// Counts entities of every type by status.
    #[must_use]
    pub fn get_status_counts(&self) -> StatusCounts {
        self.init();
        let mut counts = StatusCounts::default();
        for entity in self.inner.read().index.entities.values() {
            counts.add(entity.sync_status);
        }
        counts
    }

    /// Counts entities of one type by status.
    #[must_use]
    pub fn get_status_counts_for(&self, entity_type: EntityType) -> StatusCounts {
        self.init();
        let mut counts = StatusCounts::default();
        for entity in self.inner.read().index.of_type(entity_type) {
            counts.add(entity.sync_status);
        }
        counts
    }

    /// Number of `pending` entities across all types.
    #[must_use]
    pub fn get_total_pending_count(&self) -> usize {
        self.get_status_counts().pending
    }

    /// Total number of stored entities.
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.init();
        self.inner.read().index.entities.len()
    }

    /// When the legacy queue was drained, if it was.
    #[must_use]
    pub fn legacy_migrated_at(&self) -> Option<DateTime<Utc>> {
        self.init();
        self.inner.read().index.legacy_migrated
    }

    /// Persists the legacy-migration completion marker.
    pub fn mark_legacy_migrated(&self, at: DateTime<Utc>) -> bool {
        self.init();
        let mut inner = self.inner.write();
        let record = LogRecord::Meta(MetaEntry::LegacyMigrated { at });
        self.commit_all(&mut inner, vec![record])
    }

    /// Current size of the record log in bytes (0 when degraded).
    #[must_use]
    pub fn log_size(&self) -> u64 {
        self.init();
        match &self.inner.read().medium {
            Medium::Ready { backend, .. } => backend.size().unwrap_or(0),
            _ => 0,
        }
    }

    // ------------------------------------------------------------------
    // Removal and maintenance
    // ------------------------------------------------------------------

    /// Removes every entity of a type. Returns how many were removed.
    pub fn clear_entity(&self, entity_type: EntityType) -> usize {
        self.init();
        let mut inner = self.inner.write();
        let count = inner.index.of_type(entity_type).count();
        if !self.commit_all(&mut inner, vec![LogRecord::ClearType(entity_type)]) {
            return 0;
        }
        info!(entity_type = %entity_type, removed = count, "cleared entity type");
        count
    }

    /// Removes every entity. Returns how many were removed.
    pub fn clear_all(&self) -> usize {
        self.init();
        let mut inner = self.inner.write();
        let count = inner.index.entities.len();
        if !self.commit_all(&mut inner, vec![LogRecord::ClearAll]) {
            return 0;
        }
        info!(removed = count, "cleared all entities");
        count
    }

    /// Drops delete-intents the server has confirmed, optionally limited to
    /// one type. Returns how many were removed.
    pub fn purge_deleted(&self, entity_type: Option<EntityType>) -> usize {
        self.init();
        let mut inner = self.inner.write();
        let records: Vec<LogRecord> = inner
            .index
            .entities
            .values()
            .filter(|e| entity_type.map_or(true, |t| e.entity_type == t))
            .filter(|e| e.deleted && e.sync_status == SyncStatus::Synced)
            .map(|e| LogRecord::Remove {
                entity_type: e.entity_type,
                id: e.id.clone(),
            })
            .collect();

        let count = records.len();
        if !self.commit_all(&mut inner, records) {
            return 0;
        }
        count
    }

    /// Rewrites the log so it holds only the live state.
    ///
    /// Returns `None` when degraded or if the rewrite failed; the old log is
    /// left untouched in that case.
    pub fn compact(&self) -> Option<CompactionStats> {
        self.init();
        let mut inner = self.inner.write();
        let records = inner.index.snapshot_records();

        let Medium::Ready { backend, .. } = &mut inner.medium else {
            return None;
        };

        let result = rewrite_log(backend.as_mut(), &records);

        match result {
            Ok(stats) => {
                info!(
                    bytes_before = stats.bytes_before,
                    bytes_after = stats.bytes_after,
                    records = stats.records,
                    "compacted entity log"
                );
                Some(stats)
            }
            Err(e) => {
                warn!(error = %e, "log compaction failed");
                None
            }
        }
    }
}

fn rewrite_log(
    backend: &mut dyn StorageBackend,
    records: &[LogRecord],
) -> StoreResult<CompactionStats> {
    let bytes_before = backend.size()?;
    let mut data = Vec::new();
    for record in records {
        data.extend_from_slice(&encode_record(record)?);
    }
    backend.replace_contents(&data)?;
    Ok(CompactionStats {
        bytes_before,
        bytes_after: data.len() as u64,
        records: records.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::io;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    fn product(store: &EntityStore, id: &str) -> StoredEntity {
        store
            .store_entity(
                EntityType::Product,
                id,
                json!({"name": id}),
                SyncStatus::Pending,
                0,
            )
            .unwrap()
    }

    #[test]
    fn new_record_starts_at_version_one_as_create() {
        let store = EntityStore::in_memory();
        let p1 = product(&store, "P1");

        assert_eq!(p1.local_version, 1);
        assert_eq!(p1.remote_version, 0);
        assert_eq!(p1.sync_status, SyncStatus::Pending);
        assert_eq!(p1.operation, Some(PendingOperation::Create));
    }

    #[test]
    fn local_edits_bump_local_version() {
        let store = EntityStore::in_memory();
        product(&store, "P1");
        let edited = store
            .store_entity(
                EntityType::Product,
                "P1",
                json!({"name": "renamed"}),
                SyncStatus::Pending,
                3,
            )
            .unwrap();

        assert_eq!(edited.local_version, 2);
        assert_eq!(edited.operation, Some(PendingOperation::Update));
        assert_eq!(store.entity_count(), 1);
    }

    #[test]
    fn synced_writes_carry_no_operation() {
        let store = EntityStore::in_memory();
        let fetched = store
            .store_entity(EntityType::Category, "C1", json!({}), SyncStatus::Synced, 5)
            .unwrap();
        assert_eq!(fetched.operation, None);
    }

    #[test]
    fn list_is_scoped_to_type_and_status() {
        let store = EntityStore::in_memory();
        product(&store, "P2");
        product(&store, "P1");
        store.store_entity(EntityType::Sale, "S1", json!({}), SyncStatus::Synced, 1);

        let products = store.list_entities(EntityType::Product, None);
        let ids: Vec<_> = products.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, ["P1", "P2"]);

        assert!(store
            .list_entities(EntityType::Sale, Some(SyncStatus::Pending))
            .is_empty());
        assert_eq!(
            store
                .list_entities(EntityType::Sale, Some(SyncStatus::Synced))
                .len(),
            1
        );
    }

    #[test]
    fn queue_deletion_marks_delete_intent() {
        let store = EntityStore::in_memory();
        product(&store, "P1");
        store.apply_sync_outcome(EntityType::Product, "P1", 1, SyncOutcome::synced(1));

        let deleted = store.queue_deletion(EntityType::Product, "P1").unwrap();
        assert!(deleted.deleted);
        assert_eq!(deleted.sync_status, SyncStatus::Pending);
        assert_eq!(deleted.intended_operation(), PendingOperation::Delete);
        assert_eq!(deleted.remote_version, 1);
        assert_eq!(deleted.local_version, 2);

        let tombstone = store.queue_deletion(EntityType::Receipt, "R-404").unwrap();
        assert_eq!(tombstone.payload, Value::Null);
        assert_eq!(tombstone.intended_operation(), PendingOperation::Delete);
    }

    #[test]
    fn sync_outcome_respects_racing_edit() {
        let store = EntityStore::in_memory();
        let snapshot = product(&store, "P1");
        product(&store, "P1");

        let after = store
            .apply_sync_outcome(
                EntityType::Product,
                "P1",
                snapshot.local_version,
                SyncOutcome::synced(1),
            )
            .unwrap();
        assert_eq!(after.sync_status, SyncStatus::Pending);
        assert_eq!(after.remote_version, 1);
        assert_eq!(after.operation, Some(PendingOperation::Update));
    }

    #[test]
    fn failure_outcome_records_error() {
        let store = EntityStore::in_memory();
        product(&store, "P1");
        let failed = store
            .apply_sync_outcome(EntityType::Product, "P1", 1, SyncOutcome::failed("503"))
            .unwrap();
        assert_eq!(failed.sync_status, SyncStatus::Failed);
        assert_eq!(failed.last_error.as_deref(), Some("503"));
        assert_eq!(failed.operation, Some(PendingOperation::Create));

        let requeued = store.requeue(EntityType::Product, "P1").unwrap();
        assert_eq!(requeued.sync_status, SyncStatus::Pending);
        assert!(requeued.last_error.is_none());
    }

    #[test]
    fn counts_and_metadata() {
        let store = EntityStore::in_memory();
        product(&store, "P1");
        product(&store, "P2");
        store.store_entity(EntityType::Sale, "S1", json!({}), SyncStatus::Pending, 0);
        store.apply_sync_outcome(EntityType::Product, "P2", 1, SyncOutcome::conflict());

        let counts = store.get_status_counts();
        assert_eq!(counts.pending, 2);
        assert_eq!(counts.conflict, 1);
        assert_eq!(store.get_total_pending_count(), 2);
        assert_eq!(store.get_status_counts_for(EntityType::Sale).pending, 1);

        let meta = store.get_metadata(EntityType::Product);
        assert_eq!(meta.pending_count, 1);
        assert!(meta.last_sync_timestamp.is_none());

        let now = Utc::now();
        assert!(store.record_sync_time(EntityType::Product, now));
        assert_eq!(
            store.get_metadata(EntityType::Product).last_sync_timestamp,
            Some(now)
        );
    }

    #[test]
    fn clear_entity_and_clear_all() {
        let store = EntityStore::in_memory();
        product(&store, "P1");
        product(&store, "P2");
        store.store_entity(EntityType::Invoice, "I1", json!({}), SyncStatus::Pending, 0);

        assert_eq!(store.clear_entity(EntityType::Product), 2);
        assert!(store.list_entities(EntityType::Product, None).is_empty());
        assert_eq!(store.entity_count(), 1);

        assert_eq!(store.clear_all(), 1);
        assert_eq!(store.entity_count(), 0);
    }

    #[test]
    fn purge_removes_only_confirmed_deletes() {
        let store = EntityStore::in_memory();
        product(&store, "P1");
        product(&store, "P2");
        store.queue_deletion(EntityType::Product, "P1");
        store.queue_deletion(EntityType::Product, "P2");
        store.apply_sync_outcome(EntityType::Product, "P1", 2, SyncOutcome::synced(0));

        assert_eq!(store.purge_deleted(None), 1);
        assert!(store.get_entity(EntityType::Product, "P1").is_none());
        assert!(store.get_entity(EntityType::Product, "P2").is_some());
    }

    #[test]
    fn init_is_idempotent() {
        let store = EntityStore::new(StoreConfig::in_memory());
        store.init();
        product(&store, "P1");
        store.init();
        store.init();
        assert_eq!(store.entity_count(), 1);
        assert!(!store.is_degraded());
    }

    #[test]
    fn noted_sync_time_stays_out_of_the_log() {
        let store = EntityStore::in_memory();
        let at = Utc::now();
        for _ in 0..100 {
            assert!(store.note_sync_time(EntityType::Sale, at));
        }
        assert_eq!(store.log_size(), 0);
        assert_eq!(store.get_metadata(EntityType::Sale).last_sync_timestamp, Some(at));

        let stats = store.compact().unwrap();
        assert_eq!(stats.records, 1);
    }

    /// Wraps an in-memory log with switchable append and truncate failures.
    #[derive(Clone, Default)]
    struct FaultyBackend {
        data: Arc<Mutex<Vec<u8>>>,
        fail_append: Arc<AtomicBool>,
        fail_truncate: Arc<AtomicBool>,
        syncs: Arc<AtomicUsize>,
    }

    impl StorageBackend for FaultyBackend {
        fn read_at(&self, offset: u64, len: usize) -> tillsync_storage::StorageResult<Vec<u8>> {
            let data = self.data.lock();
            let start = offset as usize;
            Ok(data[start..start + len].to_vec())
        }

        fn append(&mut self, bytes: &[u8]) -> tillsync_storage::StorageResult<u64> {
            let mut data = self.data.lock();
            let offset = data.len() as u64;
            if self.fail_append.load(Ordering::SeqCst) {
                // Half the frame reaches the medium before the error.
                data.extend_from_slice(&bytes[..bytes.len() / 2]);
                return Err(io::Error::other("disk full").into());
            }
            data.extend_from_slice(bytes);
            Ok(offset)
        }

        fn flush(&mut self) -> tillsync_storage::StorageResult<()> {
            Ok(())
        }

        fn size(&self) -> tillsync_storage::StorageResult<u64> {
            Ok(self.data.lock().len() as u64)
        }

        fn sync(&mut self) -> tillsync_storage::StorageResult<()> {
            self.syncs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn truncate(&mut self, new_size: u64) -> tillsync_storage::StorageResult<()> {
            if self.fail_truncate.load(Ordering::SeqCst) {
                return Err(io::Error::other("read-only medium").into());
            }
            self.data.lock().truncate(new_size as usize);
            Ok(())
        }

        fn replace_contents(&mut self, bytes: &[u8]) -> tillsync_storage::StorageResult<()> {
            *self.data.lock() = bytes.to_vec();
            Ok(())
        }
    }

    #[test]
    fn every_write_is_synced() {
        let backend = FaultyBackend::default();
        let store = EntityStore::with_backend(Box::new(backend.clone()));
        product(&store, "P1");
        store.queue_deletion(EntityType::Product, "P1");
        assert_eq!(backend.syncs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn failed_append_is_rolled_back() {
        let backend = FaultyBackend::default();
        let store = EntityStore::with_backend(Box::new(backend.clone()));
        product(&store, "P1");
        let size = store.log_size();

        backend.fail_append.store(true, Ordering::SeqCst);
        assert!(store.store_entity(EntityType::Product, "P2", json!({}), SyncStatus::Pending, 0).is_none());
        assert_eq!(store.log_size(), size);
        assert!(!store.is_degraded());

        backend.fail_append.store(false, Ordering::SeqCst);
        product(&store, "P3");
        let reopened = EntityStore::with_backend(Box::new(backend));
        assert_eq!(reopened.entity_count(), 2);
    }

    #[test]
    fn failed_rollback_degrades_the_store() {
        let backend = FaultyBackend::default();
        let store = EntityStore::with_backend(Box::new(backend.clone()));
        product(&store, "P1");

        backend.fail_append.store(true, Ordering::SeqCst);
        backend.fail_truncate.store(true, Ordering::SeqCst);
        assert!(store.store_entity(EntityType::Product, "P2", json!({}), SyncStatus::Pending, 0).is_none());

        assert!(store.is_degraded());
        let len_after_failure = backend.data.lock().len();
        backend.fail_append.store(false, Ordering::SeqCst);
        assert!(store.store_entity(EntityType::Product, "P3", json!({}), SyncStatus::Pending, 0).is_none());
        assert_eq!(backend.data.lock().len(), len_after_failure);
    }

    #[test]
    fn compaction_keeps_live_state_only() {
        let store = EntityStore::with_backend(Box::new(InMemoryBackend::new()));
        product(&store, "P1");
        product(&store, "P1");
        store.queue_deletion(EntityType::Product, "P1");

        let stats = store.compact().unwrap();
        assert_eq!(stats.records, 1);
        assert!(stats.bytes_after < stats.bytes_before);
        assert_eq!(store.log_size(), stats.bytes_after);
        assert_eq!(
            store.get_entity(EntityType::Product, "P1").unwrap().local_version,
            3
        );
    }
}
