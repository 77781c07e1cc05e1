//! tillsync CLI
//!
//! Maintenance tools for a till's offline entity store.
//!
//! # Commands
//!
//! - `inspect` - Sync status counts, last sync times, log size
//! - `list` - Entities of one type
//! - `clear` - Remove entities of one type, or all
//! - `compact` - Rewrite the log, optionally purging confirmed deletions
//! - `dump-log` - Dump log records for debugging

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tillsync_store::{EntityType, SyncStatus};
use tracing_subscriber::EnvFilter;

/// tillsync entity store tools.
#[derive(Parser)]
#[command(name = "tillsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the store directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display sync status counts and store metadata
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// List entities of one type
    List {
        /// Entity type (product, customer, sale, ...)
        #[arg(short, long)]
        entity_type: EntityType,

        /// Only show entities in this status
        #[arg(short, long)]
        status: Option<SyncStatus>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Remove stored entities
    Clear {
        /// Remove every entity of this type
        #[arg(short, long)]
        entity_type: Option<EntityType>,

        /// Remove every entity of every type
        #[arg(short, long, conflicts_with = "entity_type")]
        all: bool,
    },

    /// Rewrite the log keeping only live state
    Compact {
        /// Drop deletions the server already confirmed
        #[arg(long)]
        purge_deleted: bool,
    },

    /// Dump log records for debugging
    DumpLog {
        /// Maximum number of records to dump
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Inspect { format } => {
            let path = cli.path.ok_or("Store path required for inspect")?;
            commands::inspect::run(&path, &format)?;
        }
        Commands::List {
            entity_type,
            status,
            format,
        } => {
            let path = cli.path.ok_or("Store path required for list")?;
            commands::list::run(&path, entity_type, status, &format)?;
        }
        Commands::Clear { entity_type, all } => {
            let path = cli.path.ok_or("Store path required for clear")?;
            let scope = match (entity_type, all) {
                (Some(entity_type), false) => commands::clear::Scope::Type(entity_type),
                (None, true) => commands::clear::Scope::All,
                _ => return Err("Pass either --entity-type or --all".into()),
            };
            commands::clear::run(&path, scope)?;
        }
        Commands::Compact { purge_deleted } => {
            let path = cli.path.ok_or("Store path required for compact")?;
            commands::compact::run(&path, purge_deleted)?;
        }
        Commands::DumpLog { limit, format } => {
            let path = cli.path.ok_or("Store path required for dump-log")?;
            commands::dump_log::run(&path, limit, &format)?;
        }
        Commands::Version => {
            println!("tillsync CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("tillsync store v{}", tillsync_store::VERSION);
        }
    }

    Ok(())
}
