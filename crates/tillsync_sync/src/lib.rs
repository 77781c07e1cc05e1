//! # tillsync sync
//!
//! Reconciles the local entity store with remote services across
//! intermittent connectivity.
//!
//! This crate provides:
//! - the [`SyncAdapter`] contract each business domain implements
//! - [`SyncManager`], which runs sync passes with conflict detection and
//!   bounded retries
//! - [`ConnectivityMonitor`], which decides when passes run
//! - [`MockAdapter`], an in-memory remote for tests
//!
//! ## Sync status state machine
//!
//! ```text
//! pending --success--> synced
//! pending --failure--> failed
//! failed  --retry----> pending | synced | conflict
//! failed  --attempts >= max--> failed (until reset)
//! pending | failed --remote ahead--> conflict
//! conflict --resolve(local | remote)--> synced
//! ```
//!
//! ## Key Invariants
//!
//! - At most one pass per entity type is in flight
//! - An entity is never marked synced for a local edit the remote has not
//!   seen
//! - An update is never sent when the remote version moved ahead
//! - Nothing is dropped implicitly: failed and conflicted entities stay
//!   until resolved or cleared

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod adapter;
mod config;
mod conflict;
mod error;
mod manager;
mod mock;
mod monitor;
mod retry;

pub use adapter::{AdapterRegistry, SyncAdapter};
pub use config::{RetryConfig, SyncConfig};
pub use conflict::{ConflictRecord, ConflictResolution};
pub use error::{SyncError, SyncResult};
pub use manager::{SyncEvent, SyncManager, SyncPassResult, SyncStats};
pub use mock::{MockAdapter, MockCall, MockOp};
pub use monitor::{
    bootstrap, Connectivity, ConnectivityHandle, ConnectivityMonitor, MonitorCommand,
    SyncRequester,
};
pub use retry::{RetryTable, MAX_RETRIES_EXCEEDED};
