//! Clear command implementation.

use super::open_store;
use std::path::Path;
use tillsync_store::{EntityStore, EntityType};

/// What to remove.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Every entity of one type.
    Type(EntityType),
    /// Every entity.
    All,
}

/// Runs the clear command.
pub fn run(path: &Path, scope: Scope) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store(path)?;
    let unsynced = unsynced_in_scope(&store, scope);
    let removed = clear(&store, scope);

    match scope {
        Scope::Type(entity_type) => println!("Removed {} {} entities", removed, entity_type),
        Scope::All => println!("Removed {} entities", removed),
    }
    if unsynced > 0 {
        println!("Warning: {} of them had not been synced", unsynced);
    }

    Ok(())
}

fn clear(store: &EntityStore, scope: Scope) -> usize {
    match scope {
        Scope::Type(entity_type) => store.clear_entity(entity_type),
        Scope::All => store.clear_all(),
    }
}

fn unsynced_in_scope(store: &EntityStore, scope: Scope) -> usize {
    let counts = match scope {
        Scope::Type(entity_type) => store.get_status_counts_for(entity_type),
        Scope::All => store.get_status_counts(),
    };
    counts.total() - counts.synced
}
