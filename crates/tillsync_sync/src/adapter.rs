//! Sync adapter contract and registry.

use crate::error::SyncResult;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tillsync_store::{EntityType, StoredEntity};

/// Binds one entity type to its remote service.
///
/// Implemented per business domain. The orchestrator only relies on the
/// semantics below, never on the shape of remote records.
#[async_trait]
pub trait SyncAdapter: Send + Sync {
    /// Fetches every remote record of the type.
    async fn fetch_all(&self) -> SyncResult<Vec<Value>>;

    /// Creates a record remotely, returning the created record.
    async fn create(&self, payload: &Value) -> SyncResult<Value>;

    /// Replaces a remote record, returning the updated record.
    async fn update(&self, id: &str, payload: &Value) -> SyncResult<Value>;

    /// Deletes a remote record. Deleting a record that is already gone must
    /// succeed.
    async fn delete(&self, id: &str) -> SyncResult<()>;

    /// Looks up the remote version of a record.
    ///
    /// Returns [`crate::SyncError::NotFound`] if the remote does not know it.
    async fn get_remote_version(&self, id: &str) -> SyncResult<u64>;

    /// Compares a local entity with a remote record.
    fn detect_conflict(&self, _local: &StoredEntity, _remote: &Value) -> bool {
        false
    }

    /// Whether the type currently takes part in sync passes.
    fn can_sync_offline(&self) -> bool {
        true
    }

    /// Extracts the id of a remote record, used to pair remote records with
    /// local conflicts.
    fn record_id(&self, record: &Value) -> Option<String> {
        match record.get("id")? {
            Value::String(id) => Some(id.clone()),
            Value::Number(id) => Some(id.to_string()),
            _ => None,
        }
    }
}

/// Adapters keyed by entity type.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: BTreeMap<EntityType, Arc<dyn SyncAdapter>>,
}

impl AdapterRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `adapter` to `entity_type`, replacing any earlier binding.
    ///
    /// Returns true if a binding was replaced.
    pub fn register(&mut self, entity_type: EntityType, adapter: Arc<dyn SyncAdapter>) -> bool {
        self.adapters.insert(entity_type, adapter).is_some()
    }

    /// Returns the adapter for a type.
    pub fn get(&self, entity_type: EntityType) -> Option<Arc<dyn SyncAdapter>> {
        self.adapters.get(&entity_type).cloned()
    }

    /// Registered types, in declaration order.
    pub fn entity_types(&self) -> Vec<EntityType> {
        self.adapters.keys().copied().collect()
    }

    /// Registered `(type, adapter)` pairs, in declaration order.
    pub fn entries(&self) -> Vec<(EntityType, Arc<dyn SyncAdapter>)> {
        self.adapters
            .iter()
            .map(|(t, adapter)| (*t, Arc::clone(adapter)))
            .collect()
    }

    /// Number of registered adapters.
    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    /// Returns true if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("entity_types", &self.entity_types())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MockAdapter;
    use serde_json::json;

    #[test]
    fn register_overwrites() {
        let mut registry = AdapterRegistry::new();
        assert!(registry.is_empty());

        assert!(!registry.register(EntityType::Sale, Arc::new(MockAdapter::new(EntityType::Sale))));
        assert!(registry.register(EntityType::Sale, Arc::new(MockAdapter::new(EntityType::Sale))));
        assert_eq!(registry.len(), 1);
        assert!(registry.get(EntityType::Sale).is_some());
        assert!(registry.get(EntityType::Product).is_none());
    }

    #[test]
    fn entity_types_are_ordered() {
        let mut registry = AdapterRegistry::new();
        for t in [EntityType::Invoice, EntityType::Product, EntityType::Sale] {
            registry.register(t, Arc::new(MockAdapter::new(t)));
        }
        assert_eq!(
            registry.entity_types(),
            vec![EntityType::Product, EntityType::Sale, EntityType::Invoice]
        );
    }

    #[test]
    fn default_record_id() {
        let adapter = MockAdapter::new(EntityType::Product);
        assert_eq!(adapter.record_id(&json!({"id": "P1"})), Some("P1".into()));
        assert_eq!(adapter.record_id(&json!({"id": 42})), Some("42".into()));
        assert_eq!(adapter.record_id(&json!({"name": "Tea"})), None);
    }
}
