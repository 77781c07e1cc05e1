//! Scriptable in-memory adapter for tests.

use crate::adapter::SyncAdapter;
use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tillsync_store::EntityType;

/// Adapter operations, for scripting failures and counting calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    /// `fetch_all`.
    FetchAll,
    /// `create`.
    Create,
    /// `update`.
    Update,
    /// `delete`.
    Delete,
    /// `get_remote_version`.
    GetRemoteVersion,
}

/// A recorded adapter call.
#[derive(Debug, Clone, PartialEq)]
pub struct MockCall {
    /// Operation invoked.
    pub op: MockOp,
    /// Record id, for operations that take one.
    pub id: Option<String>,
    /// Payload sent, for create and update.
    pub payload: Option<Value>,
}

/// An in-memory remote for one entity type.
///
/// Behaves like a small server: created records get version 1, each update
/// bumps the version, deletes are idempotent. Failures and latency can be
/// scripted per operation.
#[derive(Debug)]
pub struct MockAdapter {
    entity_type: EntityType,
    records: Mutex<BTreeMap<String, Value>>,
    versions: Mutex<HashMap<String, u64>>,
    failures: Mutex<HashMap<MockOp, SyncError>>,
    calls: Mutex<Vec<MockCall>>,
    latency: Mutex<Option<Duration>>,
    can_sync_offline: AtomicBool,
}

impl MockAdapter {
    /// Creates an empty mock remote.
    pub fn new(entity_type: EntityType) -> Self {
        Self {
            entity_type,
            records: Mutex::new(BTreeMap::new()),
            versions: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            latency: Mutex::new(None),
            can_sync_offline: AtomicBool::new(true),
        }
    }

    /// Seeds a remote record at a version.
    pub fn insert_remote(&self, id: &str, record: Value, version: u64) {
        self.records.lock().insert(id.to_string(), record);
        self.versions.lock().insert(id.to_string(), version);
    }

    /// Sets the remote version of a record, as if another device edited it.
    pub fn set_remote_version(&self, id: &str, version: u64) {
        self.versions.lock().insert(id.to_string(), version);
    }

    /// Makes every call of `op` fail with `error` until cleared.
    pub fn fail(&self, op: MockOp, error: SyncError) {
        self.failures.lock().insert(op, error);
    }

    /// Clears a scripted failure.
    pub fn succeed(&self, op: MockOp) {
        self.failures.lock().remove(&op);
    }

    /// Delays every call by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock() = latency;
    }

    /// Sets whether the type takes part in sync passes.
    pub fn set_can_sync_offline(&self, value: bool) {
        self.can_sync_offline.store(value, Ordering::SeqCst);
    }

    /// Every call made so far.
    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().clone()
    }

    /// Number of calls of one operation.
    pub fn call_count(&self, op: MockOp) -> usize {
        self.calls.lock().iter().filter(|c| c.op == op).count()
    }

    /// Current remote record.
    pub fn remote_record(&self, id: &str) -> Option<Value> {
        self.records.lock().get(id).cloned()
    }

    /// Current remote version.
    pub fn remote_version(&self, id: &str) -> Option<u64> {
        self.versions.lock().get(id).copied()
    }

    async fn enter(&self, op: MockOp, id: Option<&str>, payload: Option<&Value>) -> SyncResult<()> {
        self.calls.lock().push(MockCall {
            op,
            id: id.map(str::to_string),
            payload: payload.cloned(),
        });
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        let failure = self.failures.lock().get(&op).cloned();
        match failure {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl SyncAdapter for MockAdapter {
    async fn fetch_all(&self) -> SyncResult<Vec<Value>> {
        self.enter(MockOp::FetchAll, None, None).await?;
        Ok(self.records.lock().values().cloned().collect())
    }

    async fn create(&self, payload: &Value) -> SyncResult<Value> {
        self.enter(MockOp::Create, None, Some(payload)).await?;
        if let Some(id) = self.record_id(payload) {
            self.records.lock().insert(id.clone(), payload.clone());
            self.versions.lock().insert(id, 1);
        }
        Ok(payload.clone())
    }

    async fn update(&self, id: &str, payload: &Value) -> SyncResult<Value> {
        self.enter(MockOp::Update, Some(id), Some(payload)).await?;
        self.records.lock().insert(id.to_string(), payload.clone());
        *self.versions.lock().entry(id.to_string()).or_insert(0) += 1;
        Ok(payload.clone())
    }

    async fn delete(&self, id: &str) -> SyncResult<()> {
        self.enter(MockOp::Delete, Some(id), None).await?;
        self.records.lock().remove(id);
        self.versions.lock().remove(id);
        Ok(())
    }

    async fn get_remote_version(&self, id: &str) -> SyncResult<u64> {
        self.enter(MockOp::GetRemoteVersion, Some(id), None).await?;
        self.remote_version(id)
            .ok_or_else(|| SyncError::not_found(self.entity_type, id))
    }

    fn can_sync_offline(&self) -> bool {
        self.can_sync_offline.load(Ordering::SeqCst)
    }
}
