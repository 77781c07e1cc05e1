//! Per-entity retry bookkeeping.

use crate::config::RetryConfig;
use std::collections::HashMap;
use std::time::Duration;
use tillsync_store::{EntityKey, EntityType};

/// Failure reason recorded on entities that ran out of attempts.
pub const MAX_RETRIES_EXCEEDED: &str = "Max retries exceeded";

/// Consecutive failed attempts per `(entity type, id)`.
///
/// Lives in memory only; a restart gives every failed entity a fresh set
/// of attempts.
#[derive(Debug, Default)]
pub struct RetryTable {
    attempts: HashMap<EntityKey, u32>,
}

impl RetryTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Failed attempts recorded for a key.
    pub fn attempts(&self, key: &EntityKey) -> u32 {
        self.attempts.get(key).copied().unwrap_or(0)
    }

    /// Records one more failure, returning the new count.
    pub fn record_failure(&mut self, key: &EntityKey) -> u32 {
        let count = self.attempts.entry(key.clone()).or_insert(0);
        *count = count.saturating_add(1);
        *count
    }

    /// Forgets a key. Returns true if it had failures recorded.
    pub fn clear(&mut self, key: &EntityKey) -> bool {
        self.attempts.remove(key).is_some()
    }

    /// Keeps only the counters of `entity_type` accepted by `keep`; other
    /// types are untouched. Returns how many counters were dropped.
    pub fn retain_type<F>(&mut self, entity_type: EntityType, mut keep: F) -> usize
    where
        F: FnMut(&EntityKey) -> bool,
    {
        let before = self.attempts.len();
        self.attempts
            .retain(|key, _| key.0 != entity_type || keep(key));
        before - self.attempts.len()
    }

    /// Returns true once a key reached the attempt limit.
    pub fn is_exhausted(&self, key: &EntityKey, config: &RetryConfig) -> bool {
        self.attempts(key) >= config.max_attempts
    }

    /// Backoff before the next attempt, or `None` if the key has no failures
    /// or is exhausted.
    pub fn next_delay(&self, key: &EntityKey, config: &RetryConfig) -> Option<Duration> {
        match self.attempts(key) {
            0 => None,
            n if n >= config.max_attempts => None,
            n => Some(config.delay_for_attempt(n)),
        }
    }

    /// Smallest backoff among keys that still have attempts left.
    pub fn earliest_delay(&self, config: &RetryConfig) -> Option<Duration> {
        self.attempts
            .keys()
            .filter_map(|key| self.next_delay(key, config))
            .min()
    }

    /// Number of keys with failures recorded.
    pub fn len(&self) -> usize {
        self.attempts.len()
    }

    /// Returns true if no failures are recorded.
    pub fn is_empty(&self) -> bool {
        self.attempts.is_empty()
    }
}
