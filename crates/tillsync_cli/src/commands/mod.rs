//! CLI command implementations.

pub mod clear;
pub mod compact;
pub mod dump_log;
pub mod inspect;
pub mod list;

use std::path::Path;
use tillsync_store::{EntityStore, StoreConfig};

/// Opens an existing store, failing instead of running degraded.
pub fn open_store(path: &Path) -> Result<EntityStore, Box<dyn std::error::Error>> {
    let store = EntityStore::open(StoreConfig::at(path).create_if_missing(false));
    match store.degraded_reason() {
        Some(reason) => Err(format!("Cannot open store at {}: {reason}", path.display()).into()),
        None => Ok(store),
    }
}

/// Formats a byte count for humans.
pub fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} bytes", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
