//! Compact command implementation.

use super::{format_size, open_store};
use std::path::Path;

/// Runs the compact command.
pub fn run(path: &Path, purge_deleted: bool) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store(path)?;
    println!("Compacting store at {:?}", path);
    println!();

    if purge_deleted {
        let purged = store.purge_deleted(None);
        println!("  Confirmed deletions purged: {}", purged);
    }

    let stats = store.compact().ok_or("Compaction failed, the log was left untouched")?;
    let saved = stats.bytes_before.saturating_sub(stats.bytes_after);

    println!("  Records kept: {}", stats.records);
    println!("  Size before:  {}", format_size(stats.bytes_before));
    println!("  Size after:   {}", format_size(stats.bytes_after));
    println!(
        "  Space saved:  {} ({:.1}%)",
        format_size(saved),
        if stats.bytes_before > 0 {
            (saved as f64 / stats.bytes_before as f64) * 100.0
        } else {
            0.0
        }
    );
    println!();
    println!("✓ Compaction complete");

    Ok(())
}
