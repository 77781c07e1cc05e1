//! Dump log command implementation.

use serde::Serialize;
use std::path::Path;
use tillsync_storage::{FileBackend, StorageBackend};
use tillsync_store::log::{LogReader, LogRecord, MetaEntry};
use tillsync_store::StoreDir;

/// Log record representation for output.
#[derive(Debug, Serialize)]
pub struct LogRecordInfo {
    /// Offset in the log file.
    pub offset: u64,
    /// Record type.
    pub record_type: String,
    /// Entity type (if applicable).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,
    /// Entity id (if applicable).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Short description of the record.
    pub summary: String,
}

/// Records read from the log, plus whatever stopped the read early.
#[derive(Debug, Serialize)]
pub struct LogDump {
    /// Records in log order.
    pub records: Vec<LogRecordInfo>,
    /// Damage found after the last record, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub damage: Option<String>,
}

/// Runs the dump-log command.
pub fn run(path: &Path, limit: Option<usize>, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let log_path = StoreDir::log_path_in(path);

    if !log_path.exists() {
        return Err("Log file not found".into());
    }

    let backend = FileBackend::open(&log_path)?;
    let dump = read_log(&backend, limit)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&dump)?);
        }
        _ => {
            print_text_output(&dump);
        }
    }

    Ok(())
}

fn read_log(
    backend: &dyn StorageBackend,
    limit: Option<usize>,
) -> Result<LogDump, Box<dyn std::error::Error>> {
    let max_records = limit.unwrap_or(usize::MAX);
    let mut records = Vec::new();
    let mut damage = None;

    for item in LogReader::new(backend)? {
        if records.len() >= max_records {
            break;
        }
        match item {
            Ok((offset, record)) => records.push(describe(offset, &record)),
            Err(e) => damage = Some(e.to_string()),
        }
    }

    Ok(LogDump { records, damage })
}

fn describe(offset: u64, record: &LogRecord) -> LogRecordInfo {
    let record_type = format!("{:?}", record.record_type()).to_uppercase();
    let (entity_type, id, summary) = match record {
        LogRecord::Put(entity) => (
            Some(entity.entity_type.to_string()),
            Some(entity.id.clone()),
            format!(
                "{} op={} local=v{} remote=v{}{}",
                entity.sync_status,
                entity.intended_operation(),
                entity.local_version,
                entity.remote_version,
                if entity.deleted { " deleted" } else { "" }
            ),
        ),
        LogRecord::Remove { entity_type, id } => {
            (Some(entity_type.to_string()), Some(id.clone()), "removed".to_string())
        }
        LogRecord::ClearType(entity_type) => (
            Some(entity_type.to_string()),
            None,
            "cleared type".to_string(),
        ),
        LogRecord::ClearAll => (None, None, "cleared all".to_string()),
        LogRecord::Meta(MetaEntry::LastSync { entity_type, at }) => (
            Some(entity_type.to_string()),
            None,
            format!("last sync {}", at.to_rfc3339()),
        ),
        LogRecord::Meta(MetaEntry::LegacyMigrated { at }) => {
            (None, None, format!("legacy queue migrated {}", at.to_rfc3339()))
        }
    };

    LogRecordInfo {
        offset,
        record_type,
        entity_type,
        id,
        summary,
    }
}

fn print_text_output(dump: &LogDump) {
    println!("Entity Log Dump");
    println!("===============");
    println!();

    if dump.records.is_empty() {
        println!("No records found");
    }
    for record in &dump.records {
        let key = match (&record.entity_type, &record.id) {
            (Some(t), Some(id)) => format!("{}/{}", t, id),
            (Some(t), None) => t.clone(),
            _ => "-".to_string(),
        };
        println!(
            "[{:>8}] {:<10} {:<24} {}",
            record.offset, record.record_type, key, record.summary
        );
    }

    println!();
    println!("Total: {} records", dump.records.len());
    if let Some(damage) = &dump.damage {
        println!("Log damaged after last record: {}", damage);
    }
}
