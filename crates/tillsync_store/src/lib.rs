//! # tillsync store
//!
//! Durable, offline-first entity store for the tillsync core.
//!
//! The store holds every synchronizable record of the till (products,
//! customers, sales, receipts, invoices, ...) together with its sync
//! metadata: status, local and remote versions, the pending remote
//! operation and the last error.
//!
//! ## Guarantees
//!
//! - `(entity type, id)` is a unique key
//! - every local mutation bumps `local_version` and leaves the record
//!   `pending` until a round trip confirms it
//! - nothing is removed implicitly: only [`EntityStore::clear_entity`],
//!   [`EntityStore::clear_all`] and [`EntityStore::purge_deleted`] drop records
//! - storage failures never reach the caller; the store degrades instead

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod dir;
mod error;
pub mod log;
mod migration;
mod store;
mod types;

pub use config::StoreConfig;
pub use dir::StoreDir;
pub use error::{StoreError, StoreResult};
pub use migration::{migrate_legacy_queue, JsonFileQueue, LegacyMutation, LegacyQueue, MigrationReport};
pub use store::{CompactionStats, EntityStore};
pub use types::{
    EntityKey, EntityType, PendingOperation, StatusCounts, StoredEntity, SyncMetadata,
    SyncOutcome, SyncStatus,
};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
