//! The sync orchestrator.
//!
//! A pass over one entity type works on a snapshot of its `pending` and
//! `failed` entities, in id order. For each entity:
//!
//! 1. entities that used up their attempts are marked failed, no call made
//! 2. the intended operation is read from the entity
//! 3. updates first look up the remote version; a newer remote version
//!    marks the entity `conflict` and nothing is sent
//! 4. the create, update or delete is dispatched and the outcome recorded
//!
//! A failure on one entity never aborts the pass, and a failure on one
//! entity type never aborts [`SyncManager::sync_all`]. A pass that panics
//! is abandoned with [`SyncError::PassAborted`].
//!
//! Retry counters live only while their entity is `failed`. Each pass drops
//! the counters of entities that were edited, cleared or purged since.
//!
//! The sync time reaches the log only when a pass changed something.

use crate::adapter::{AdapterRegistry, SyncAdapter};
use crate::config::SyncConfig;
use crate::conflict::{ConflictRecord, ConflictResolution};
use crate::error::{SyncError, SyncResult};
use crate::retry::{RetryTable, MAX_RETRIES_EXCEEDED};
use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tillsync_store::{
    EntityStore, EntityType, PendingOperation, StoredEntity, SyncOutcome, SyncStatus,
};
use tracing::{debug, info, warn};

/// Counts for one pass over one entity type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncPassResult {
    /// Entity type synced.
    pub entity_type: EntityType,
    /// Entities confirmed by the remote.
    pub synced: usize,
    /// Entities that failed, including those past their retry limit.
    pub failed: usize,
    /// Entities found in conflict.
    pub conflicts: usize,
    /// Wall time of the pass.
    pub duration_ms: u64,
}

impl SyncPassResult {
    /// A zero-valued result.
    pub fn empty(entity_type: EntityType) -> Self {
        Self {
            entity_type,
            synced: 0,
            failed: 0,
            conflicts: 0,
            duration_ms: 0,
        }
    }

    /// Entities the pass looked at.
    pub fn processed(&self) -> usize {
        self.synced + self.failed + self.conflicts
    }
}

/// Cumulative orchestrator statistics.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Passes completed.
    pub passes_completed: u64,
    /// Entities confirmed by the remote.
    pub entities_synced: u64,
    /// Failed entity attempts.
    pub entities_failed: u64,
    /// Conflicts detected.
    pub conflicts_detected: u64,
    /// Conflicts resolved.
    pub conflicts_resolved: u64,
    /// When the last pass completed.
    pub last_pass_at: Option<DateTime<Utc>>,
    /// Last adapter error.
    pub last_error: Option<String>,
}

/// Notifications published by the orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// A pass over an entity type started.
    PassStarted {
        /// Entity type.
        entity_type: EntityType,
    },
    /// A pass over an entity type completed.
    PassCompleted(SyncPassResult),
    /// The remote moved ahead of a locally edited entity.
    ConflictDetected {
        /// Entity type.
        entity_type: EntityType,
        /// Entity id.
        id: String,
        /// Remote version the local edit was based on.
        local_remote_version: u64,
        /// Version reported by the remote.
        remote_version: u64,
    },
    /// An entity used up its attempts and will not be sent again until
    /// reset.
    RetriesExhausted {
        /// Entity type.
        entity_type: EntityType,
        /// Entity id.
        id: String,
        /// Failed attempts.
        attempts: u32,
    },
}

type Listener = Arc<dyn Fn(&SyncEvent) + Send + Sync>;

enum ItemOutcome {
    Synced,
    Failed,
    Conflict,
    /// Out of attempts and already marked so; nothing written.
    Held,
}

/// Runs sync passes between the entity store and the registered adapters.
///
/// Passes over the same entity type never overlap: each type has its own
/// async lock, held for the whole pass and during conflict resolution.
/// Passes over different types may run concurrently.
pub struct SyncManager {
    store: Arc<EntityStore>,
    config: SyncConfig,
    registry: RwLock<AdapterRegistry>,
    retries: Mutex<RetryTable>,
    pass_locks: Mutex<HashMap<EntityType, Arc<tokio::sync::Mutex<()>>>>,
    stats: RwLock<SyncStats>,
    listeners: RwLock<Vec<Listener>>,
}

impl SyncManager {
    /// Creates an orchestrator over `store`.
    pub fn new(store: Arc<EntityStore>, config: SyncConfig) -> Self {
        Self {
            store,
            config,
            registry: RwLock::new(AdapterRegistry::new()),
            retries: Mutex::new(RetryTable::new()),
            pass_locks: Mutex::new(HashMap::new()),
            stats: RwLock::new(SyncStats::default()),
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// The store this orchestrator syncs.
    pub fn store(&self) -> &Arc<EntityStore> {
        &self.store
    }

    /// The configuration in use.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Binds an adapter to an entity type, replacing any earlier binding.
    ///
    /// Returns true if a binding was replaced.
    pub fn register_adapter(&self, entity_type: EntityType, adapter: Arc<dyn SyncAdapter>) -> bool {
        let replaced = self.registry.write().register(entity_type, adapter);
        if replaced {
            debug!(entity_type = %entity_type, "replaced sync adapter");
        }
        replaced
    }

    /// Entity types with a registered adapter.
    pub fn registered_types(&self) -> Vec<EntityType> {
        self.registry.read().entity_types()
    }

    /// Registers an observer for orchestrator events.
    ///
    /// Listeners run synchronously on the task that produced the event and
    /// must not block.
    pub fn subscribe<F>(&self, listener: F)
    where
        F: Fn(&SyncEvent) + Send + Sync + 'static,
    {
        self.listeners.write().push(Arc::new(listener));
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Failed attempts recorded for an entity.
    pub fn retry_attempts(&self, entity_type: EntityType, id: &str) -> u32 {
        self.retries.lock().attempts(&(entity_type, id.to_string()))
    }

    /// Backoff before an entity should be retried, or `None` if it has no
    /// failures or has run out of attempts.
    pub fn next_retry_delay(&self, entity_type: EntityType, id: &str) -> Option<Duration> {
        self.retries
            .lock()
            .next_delay(&(entity_type, id.to_string()), &self.config.retry)
    }

    /// Smallest backoff among all entities still eligible for a retry.
    pub fn next_retry_due(&self) -> Option<Duration> {
        self.retries.lock().earliest_delay(&self.config.retry)
    }

    /// Clears an entity's retry counter and puts it back into `pending`.
    ///
    /// This is the only way out of the terminal failed state. Waits for a
    /// running pass over the type to finish. Returns false if the entity is
    /// not in the store.
    pub async fn reset_retries(&self, entity_type: EntityType, id: &str) -> bool {
        let lock = self.pass_lock(entity_type);
        let _pass = lock.lock().await;

        self.retries.lock().clear(&(entity_type, id.to_string()));
        let requeued = self.store.requeue(entity_type, id).is_some();
        if requeued {
            info!(entity_type = %entity_type, id, "retries reset");
        }
        requeued
    }

    /// Runs one pass over an entity type.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::AdapterMissing`] if no adapter is registered and
    /// [`SyncError::PassAborted`] if the pass panicked. Per-entity failures
    /// are counted in the result, never returned.
    pub async fn sync_entity(&self, entity_type: EntityType) -> SyncResult<SyncPassResult> {
        let adapter = self.adapter(entity_type)?;
        match AssertUnwindSafe(self.run_pass(entity_type, adapter.as_ref()))
            .catch_unwind()
            .await
        {
            Ok(result) => Ok(result),
            Err(panic) => {
                let err = SyncError::PassAborted {
                    entity_type,
                    message: panic_message(panic.as_ref()),
                };
                warn!(entity_type = %entity_type, error = %err, "sync pass panicked");
                self.stats.write().last_error = Some(err.to_string());
                Err(err)
            }
        }
    }

    async fn run_pass(&self, entity_type: EntityType, adapter: &dyn SyncAdapter) -> SyncPassResult {
        let lock = self.pass_lock(entity_type);
        let _pass = lock.lock().await;

        let started = Instant::now();
        self.emit(&SyncEvent::PassStarted { entity_type });

        let candidates = self.store.sync_candidates(entity_type);
        debug!(entity_type = %entity_type, candidates = candidates.len(), "sync pass started");

        let failed: HashSet<_> = candidates
            .iter()
            .filter(|entity| entity.sync_status == SyncStatus::Failed)
            .map(StoredEntity::key)
            .collect();
        let dropped = self
            .retries
            .lock()
            .retain_type(entity_type, |key| failed.contains(key));
        if dropped > 0 {
            debug!(entity_type = %entity_type, dropped, "dropped stale retry counters");
        }

        let mut result = SyncPassResult::empty(entity_type);
        let mut changed = false;
        for entity in &candidates {
            let outcome = self.sync_item(adapter, entity).await;
            changed |= !matches!(outcome, ItemOutcome::Held);
            match outcome {
                ItemOutcome::Synced => result.synced += 1,
                ItemOutcome::Failed | ItemOutcome::Held => result.failed += 1,
                ItemOutcome::Conflict => result.conflicts += 1,
            }
        }
        result.duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let now = Utc::now();
        if changed {
            self.store.record_sync_time(entity_type, now);
        } else {
            self.store.note_sync_time(entity_type, now);
        }
        {
            let mut stats = self.stats.write();
            stats.passes_completed += 1;
            stats.entities_synced += result.synced as u64;
            stats.entities_failed += result.failed as u64;
            stats.conflicts_detected += result.conflicts as u64;
            stats.last_pass_at = Some(now);
        }

        if result.processed() > 0 {
            info!(
                entity_type = %entity_type,
                synced = result.synced,
                failed = result.failed,
                conflicts = result.conflicts,
                duration_ms = result.duration_ms,
                "sync pass completed"
            );
        }
        self.emit(&SyncEvent::PassCompleted(result.clone()));
        result
    }

    /// Runs a pass over every registered type that currently takes part in
    /// sync, one after another.
    ///
    /// A type whose pass errors yields a zero-valued result and the
    /// remaining types are still synced.
    pub async fn sync_all(&self) -> Vec<SyncPassResult> {
        let entries = self.registry.read().entries();
        let mut results = Vec::with_capacity(entries.len());

        for (entity_type, adapter) in entries {
            if !adapter.can_sync_offline() {
                debug!(entity_type = %entity_type, "sync disabled for type, skipping");
                continue;
            }
            match self.sync_entity(entity_type).await {
                Ok(result) => results.push(result),
                Err(e) => {
                    warn!(entity_type = %entity_type, error = %e, "sync pass failed");
                    self.stats.write().last_error = Some(e.to_string());
                    results.push(SyncPassResult::empty(entity_type));
                }
            }
        }
        results
    }

    /// Settles a conflicted entity.
    ///
    /// `KeepLocal` pushes the local payload with an update. `KeepRemote`
    /// sends nothing; when `remote_data` is given it replaces the local
    /// payload as is. Either way the entity ends `synced` and its retry
    /// counter is cleared.
    ///
    /// # Errors
    ///
    /// Fails if no adapter is registered, the entity is unknown or not in
    /// conflict, or the update for `KeepLocal` fails. The entity then stays
    /// in conflict.
    pub async fn resolve_conflict(
        &self,
        entity_type: EntityType,
        id: &str,
        resolution: ConflictResolution,
        remote_data: Option<Value>,
    ) -> SyncResult<StoredEntity> {
        let adapter = self.adapter(entity_type)?;
        let lock = self.pass_lock(entity_type);
        let _pass = lock.lock().await;

        let entity = self
            .store
            .get_entity(entity_type, id)
            .ok_or_else(|| SyncError::EntityNotFound {
                entity_type,
                id: id.to_string(),
            })?;
        if entity.sync_status != SyncStatus::Conflict {
            return Err(SyncError::NotInConflict {
                entity_type,
                id: id.to_string(),
            });
        }

        // Best effort: the stored version stands in if the lookup fails.
        let remote_version = match self.call(adapter.get_remote_version(id)).await {
            Ok(version) => version,
            Err(e) => {
                debug!(entity_type = %entity_type, id, error = %e, "remote version lookup failed");
                entity.remote_version
            }
        };

        let outcome = match resolution {
            ConflictResolution::KeepLocal => {
                self.call(adapter.update(id, &entity.payload)).await?;
                SyncOutcome::synced(remote_version.max(entity.remote_version) + 1)
            }
            ConflictResolution::KeepRemote => {
                let outcome = SyncOutcome::synced(remote_version);
                match remote_data {
                    Some(data) => outcome.with_payload(data),
                    None => outcome,
                }
            }
        };

        self.retries.lock().clear(&entity.key());
        let resolved = self
            .store
            .apply_sync_outcome(entity_type, id, entity.local_version, outcome)
            .ok_or_else(|| self.store_failure(entity_type, id))?;

        self.stats.write().conflicts_resolved += 1;
        info!(entity_type = %entity_type, id, resolution = %resolution, "conflict resolved");
        Ok(resolved)
    }

    /// Lists conflicted entities of a type.
    ///
    /// Remote records are fetched once and attached where their id matches;
    /// a failed fetch yields records without remote data.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::AdapterMissing`] if no adapter is registered.
    pub async fn list_conflicts(&self, entity_type: EntityType) -> SyncResult<Vec<ConflictRecord>> {
        let adapter = self.adapter(entity_type)?;
        let conflicts = self
            .store
            .list_entities(entity_type, Some(SyncStatus::Conflict));
        if conflicts.is_empty() {
            return Ok(Vec::new());
        }

        let mut remote: HashMap<String, Value> = match self.call(adapter.fetch_all()).await {
            Ok(records) => records
                .into_iter()
                .filter_map(|record| adapter.record_id(&record).map(|id| (id, record)))
                .collect(),
            Err(e) => {
                debug!(entity_type = %entity_type, error = %e, "remote fetch failed, listing local side only");
                HashMap::new()
            }
        };

        Ok(conflicts
            .iter()
            .map(|entity| ConflictRecord::from_entity(entity).with_remote(remote.remove(&entity.id)))
            .collect())
    }

    // ------------------------------------------------------------------
    // Pass internals
    // ------------------------------------------------------------------

    async fn sync_item(&self, adapter: &dyn SyncAdapter, entity: &StoredEntity) -> ItemOutcome {
        let key = entity.key();
        let (entity_type, id) = (entity.entity_type, entity.id.as_str());

        let exhausted = self.retries.lock().is_exhausted(&key, &self.config.retry);
        if exhausted {
            if entity.sync_status == SyncStatus::Failed
                && entity.last_error.as_deref() == Some(MAX_RETRIES_EXCEEDED)
            {
                return ItemOutcome::Held;
            }
            debug!(entity_type = %entity_type, id, "retry limit reached, not sending");
            self.record(entity, SyncOutcome::failed(MAX_RETRIES_EXCEEDED));
            return ItemOutcome::Failed;
        }

        let mut operation = entity.intended_operation();
        if operation == PendingOperation::Update {
            match self.call(adapter.get_remote_version(id)).await {
                Ok(remote_version) if remote_version > entity.remote_version => {
                    return self.mark_conflict(entity, remote_version);
                }
                Ok(_) => {}
                Err(e) if e.is_not_found() => {
                    debug!(entity_type = %entity_type, id, "not on remote, creating instead");
                    operation = PendingOperation::Create;
                }
                Err(e) => return self.record_failure(entity, &e),
            }
        }

        let dispatched = match operation {
            PendingOperation::Create => self
                .call(adapter.create(&entity.payload))
                .await
                .map(|_| entity.remote_version.max(1)),
            PendingOperation::Update => self
                .call(adapter.update(id, &entity.payload))
                .await
                .map(|_| entity.remote_version + 1),
            PendingOperation::Delete => match self.call(adapter.delete(id)).await {
                Err(e) if e.is_not_found() => Ok(entity.remote_version),
                other => other.map(|()| entity.remote_version),
            },
        };

        match dispatched {
            Ok(remote_version) => {
                self.retries.lock().clear(&key);
                self.record(entity, SyncOutcome::synced(remote_version));
                debug!(entity_type = %entity_type, id, ?operation, remote_version, "synced");
                ItemOutcome::Synced
            }
            Err(e) => self.record_failure(entity, &e),
        }
    }

    fn mark_conflict(&self, entity: &StoredEntity, remote_version: u64) -> ItemOutcome {
        info!(
            entity_type = %entity.entity_type,
            id = %entity.id,
            local = entity.remote_version,
            remote = remote_version,
            "remote version ahead, conflict recorded"
        );
        self.record(entity, SyncOutcome::conflict());
        self.emit(&SyncEvent::ConflictDetected {
            entity_type: entity.entity_type,
            id: entity.id.clone(),
            local_remote_version: entity.remote_version,
            remote_version,
        });
        ItemOutcome::Conflict
    }

    fn record_failure(&self, entity: &StoredEntity, error: &SyncError) -> ItemOutcome {
        let attempts = self.retries.lock().record_failure(&entity.key());
        self.record(entity, SyncOutcome::failed(error.to_string()));
        self.stats.write().last_error = Some(error.to_string());

        if attempts >= self.config.retry.max_attempts {
            warn!(
                entity_type = %entity.entity_type,
                id = %entity.id,
                attempts,
                error = %error,
                "sync failed, no attempts left"
            );
            self.emit(&SyncEvent::RetriesExhausted {
                entity_type: entity.entity_type,
                id: entity.id.clone(),
                attempts,
            });
        } else {
            debug!(
                entity_type = %entity.entity_type,
                id = %entity.id,
                attempts,
                retryable = error.is_retryable(),
                error = %error,
                "sync failed"
            );
        }
        ItemOutcome::Failed
    }

    fn record(&self, entity: &StoredEntity, outcome: SyncOutcome) {
        let applied = self.store.apply_sync_outcome(
            entity.entity_type,
            &entity.id,
            entity.local_version,
            outcome,
        );
        if applied.is_none() {
            debug!(entity_type = %entity.entity_type, id = %entity.id, "sync outcome not recorded");
        }
    }

    async fn call<T, F>(&self, call: F) -> SyncResult<T>
    where
        F: Future<Output = SyncResult<T>>,
    {
        match self.config.call_timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| SyncError::Timeout)?,
            None => call.await,
        }
    }

    fn adapter(&self, entity_type: EntityType) -> SyncResult<Arc<dyn SyncAdapter>> {
        self.registry
            .read()
            .get(entity_type)
            .ok_or(SyncError::AdapterMissing(entity_type))
    }

    fn pass_lock(&self, entity_type: EntityType) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(self.pass_locks.lock().entry(entity_type).or_default())
    }

    fn store_failure(&self, entity_type: EntityType, id: &str) -> SyncError {
        match self.store.degraded_reason() {
            Some(reason) => SyncError::StoreUnavailable(reason),
            None => SyncError::EntityNotFound {
                entity_type,
                id: id.to_string(),
            },
        }
    }

    fn emit(&self, event: &SyncEvent) {
        let listeners = self.listeners.read().clone();
        for listener in listeners {
            listener(event);
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl std::fmt::Debug for SyncManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncManager")
            .field("config", &self.config)
            .field("registry", &*self.registry.read())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockAdapter, MockOp};
    use serde_json::json;

    fn setup(entity_type: EntityType) -> (Arc<EntityStore>, Arc<MockAdapter>, SyncManager) {
        let store = Arc::new(EntityStore::in_memory());
        let adapter = Arc::new(MockAdapter::new(entity_type));
        let manager = SyncManager::new(Arc::clone(&store), SyncConfig::default());
        manager.register_adapter(entity_type, adapter.clone());
        (store, adapter, manager)
    }

    #[tokio::test]
    async fn unregistered_type_fails_fast() {
        let (_, _, manager) = setup(EntityType::Product);
        let err = manager.sync_entity(EntityType::Sale).await.unwrap_err();
        assert_eq!(err, SyncError::AdapterMissing(EntityType::Sale));
    }

    #[tokio::test]
    async fn empty_pass_records_sync_time() {
        let (store, _, manager) = setup(EntityType::Product);
        let result = manager.sync_entity(EntityType::Product).await.unwrap();
        assert_eq!(result.processed(), 0);
        assert!(store.get_metadata(EntityType::Product).last_sync_timestamp.is_some());
        assert_eq!(manager.stats().passes_completed, 1);
    }

    #[tokio::test]
    async fn update_missing_remotely_becomes_create() {
        let (store, adapter, manager) = setup(EntityType::Customer);
        store.store_entity(
            EntityType::Customer,
            "C1",
            json!({"id": "C1", "name": "Ada"}),
            SyncStatus::Pending,
            5,
        );

        let result = manager.sync_entity(EntityType::Customer).await.unwrap();
        assert_eq!(result.synced, 1);
        assert_eq!(adapter.call_count(MockOp::Create), 1);
        assert_eq!(adapter.call_count(MockOp::Update), 0);

        let entity = store.get_entity(EntityType::Customer, "C1").unwrap();
        assert_eq!(entity.remote_version, 5);
        assert_eq!(entity.sync_status, SyncStatus::Synced);
    }

    #[tokio::test]
    async fn failed_lookup_counts_as_failure() {
        let (store, adapter, manager) = setup(EntityType::Customer);
        store.store_entity(EntityType::Customer, "C1", json!({}), SyncStatus::Pending, 2);
        adapter.fail(MockOp::GetRemoteVersion, SyncError::remote("gateway timeout"));

        let result = manager.sync_entity(EntityType::Customer).await.unwrap();
        assert_eq!(result.failed, 1);
        assert_eq!(adapter.call_count(MockOp::Update), 0);
        assert_eq!(manager.retry_attempts(EntityType::Customer, "C1"), 1);
    }

    #[tokio::test]
    async fn delete_keeps_remote_version() {
        let (store, adapter, manager) = setup(EntityType::Category);
        store.store_entity(EntityType::Category, "K1", json!({}), SyncStatus::Synced, 4);
        store.queue_deletion(EntityType::Category, "K1");

        let result = manager.sync_entity(EntityType::Category).await.unwrap();
        assert_eq!(result.synced, 1);
        assert_eq!(adapter.call_count(MockOp::Delete), 1);
        assert_eq!(adapter.call_count(MockOp::GetRemoteVersion), 0);

        let entity = store.get_entity(EntityType::Category, "K1").unwrap();
        assert!(entity.deleted);
        assert_eq!(entity.remote_version, 4);
        assert_eq!(entity.sync_status, SyncStatus::Synced);
        assert_eq!(store.purge_deleted(Some(EntityType::Category)), 1);
    }

    #[tokio::test]
    async fn listeners_see_pass_events() {
        let (store, _, manager) = setup(EntityType::Product);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        manager.subscribe(move |event| sink.lock().push(event.clone()));

        store.store_entity(EntityType::Product, "P1", json!({"id": "P1"}), SyncStatus::Pending, 0);
        manager.sync_entity(EntityType::Product).await.unwrap();

        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(
            seen[0],
            SyncEvent::PassStarted {
                entity_type: EntityType::Product
            }
        );
        assert!(matches!(&seen[1], SyncEvent::PassCompleted(r) if r.synced == 1));
    }

    #[test]
    fn panic_messages_are_extracted() {
        let payload: Box<dyn Any + Send> = Box::new("static message");
        assert_eq!(panic_message(payload.as_ref()), "static message");
        let payload: Box<dyn Any + Send> = Box::new(format!("code {}", 7));
        assert_eq!(panic_message(payload.as_ref()), "code 7");
        let payload: Box<dyn Any + Send> = Box::new(42_u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }

    #[tokio::test]
    async fn resolve_requires_conflict() {
        let (store, _, manager) = setup(EntityType::Product);
        store.store_entity(EntityType::Product, "P1", json!({}), SyncStatus::Pending, 0);

        let err = manager
            .resolve_conflict(EntityType::Product, "P1", ConflictResolution::KeepLocal, None)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::NotInConflict { .. }));

        let err = manager
            .resolve_conflict(EntityType::Product, "P404", ConflictResolution::KeepRemote, None)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::EntityNotFound { .. }));
    }
}
