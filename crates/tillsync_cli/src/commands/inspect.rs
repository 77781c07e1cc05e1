//! Inspect command implementation.

use super::{format_size, open_store};
use serde::Serialize;
use std::path::Path;
use tillsync_store::{EntityStore, EntityType, StatusCounts};

/// Store inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Store path.
    pub path: String,
    /// Log size in bytes.
    pub log_size: u64,
    /// Number of stored entities.
    pub entity_count: usize,
    /// Counts across all types.
    pub totals: StatusCounts,
    /// Per-type summaries, for types that have entities or were synced.
    pub types: Vec<TypeSummary>,
    /// When the legacy queue was migrated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub legacy_migrated_at: Option<String>,
}

/// Summary of one entity type.
#[derive(Debug, Serialize)]
pub struct TypeSummary {
    /// Entity type.
    pub entity_type: EntityType,
    /// Counts by status.
    pub counts: StatusCounts,
    /// Last completed sync pass.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sync: Option<String>,
}

/// Runs the inspect command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store(path)?;
    let result = inspect(&store, path);

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

fn inspect(store: &EntityStore, path: &Path) -> InspectResult {
    let types = EntityType::ALL
        .into_iter()
        .filter_map(|entity_type| {
            let counts = store.get_status_counts_for(entity_type);
            let last_sync = store.get_metadata(entity_type).last_sync_timestamp;
            (counts.total() > 0 || last_sync.is_some()).then(|| TypeSummary {
                entity_type,
                counts,
                last_sync: last_sync.map(|at| at.to_rfc3339()),
            })
        })
        .collect();

    InspectResult {
        path: path.display().to_string(),
        log_size: store.log_size(),
        entity_count: store.entity_count(),
        totals: store.get_status_counts(),
        types,
        legacy_migrated_at: store.legacy_migrated_at().map(|at| at.to_rfc3339()),
    }
}

fn print_text_output(result: &InspectResult) {
    println!("tillsync Store Inspection");
    println!("=========================");
    println!();
    println!("Path:     {}", result.path);
    println!("Log size: {}", format_size(result.log_size));
    if let Some(at) = &result.legacy_migrated_at {
        println!("Legacy queue migrated: {}", at);
    }
    println!();
    println!("Entities: {}", result.entity_count);
    for (status, count) in result.totals.iter() {
        println!("  {:<9} {}", status.as_str(), count);
    }

    if !result.types.is_empty() {
        println!();
        println!("By type:");
        for summary in &result.types {
            println!(
                "  {:<10} pending {:<5} synced {:<5} conflict {:<5} failed {:<5} last sync {}",
                summary.entity_type.as_str(),
                summary.counts.pending,
                summary.counts.synced,
                summary.counts.conflict,
                summary.counts.failed,
                summary.last_sync.as_deref().unwrap_or("never"),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tillsync_store::SyncStatus;

    #[test]
    fn summarizes_types_with_entities() {
        let store = EntityStore::in_memory();
        store.store_entity(EntityType::Product, "P1", json!({}), SyncStatus::Pending, 0);
        store.store_entity(EntityType::Product, "P2", json!({}), SyncStatus::Synced, 1);
        store.store_entity(EntityType::Sale, "S1", json!({}), SyncStatus::Pending, 0);

        let result = inspect(&store, Path::new("/tmp/till"));
        assert_eq!(result.entity_count, 3);
        assert_eq!(result.totals.pending, 2);
        assert_eq!(result.types.len(), 2);
        assert_eq!(result.types[0].entity_type, EntityType::Product);
        assert_eq!(result.types[0].counts.synced, 1);
        assert!(result.types[0].last_sync.is_none());
    }
}
