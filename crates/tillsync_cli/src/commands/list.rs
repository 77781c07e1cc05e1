//! List command implementation.

use super::open_store;
use std::path::Path;
use tillsync_store::{EntityType, StoredEntity, SyncStatus};

/// Runs the list command.
pub fn run(
    path: &Path,
    entity_type: EntityType,
    status: Option<SyncStatus>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store(path)?;
    let entities = store.list_entities(entity_type, status);

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&entities)?);
        }
        _ => {
            if entities.is_empty() {
                println!("No {} entities", entity_type);
            }
            for entity in &entities {
                println!("{}", summary_line(entity));
            }
        }
    }

    Ok(())
}

fn summary_line(entity: &StoredEntity) -> String {
    let mut line = format!(
        "{:<24} {:<9} {:<7} local v{} remote v{} {}",
        entity.id,
        entity.sync_status.as_str(),
        entity.intended_operation().as_str(),
        entity.local_version,
        entity.remote_version,
        entity.last_modified.format("%Y-%m-%d %H:%M:%S"),
    );
    if entity.deleted {
        line.push_str(" [deleted]");
    }
    if let Some(error) = &entity.last_error {
        line.push_str(&format!(" error: {}", error));
    }
    line
}
