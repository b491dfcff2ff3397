//! CLI definitions using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub mod commands;

/// fieldsync - offline-first sync for field-service data
#[derive(Parser, Debug)]
#[command(name = "fieldsync", author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Database path (default: ~/.fieldsync/data/fieldsync.db)
    #[arg(long, global = true, env = "FIELDSYNC_DB")]
    pub db: Option<PathBuf>,

    /// Remote base URL (overrides config file)
    #[arg(long, global = true, env = "FIELDSYNC_REMOTE_URL")]
    pub remote_url: Option<String>,

    /// Remote API key (overrides config file)
    #[arg(long, global = true, env = "FIELDSYNC_REMOTE_KEY", hide_env_values = true)]
    pub remote_key: Option<String>,

    /// Output as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Increase logging verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (no output except errors)
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print version information
    Version,

    /// Create or upgrade the local database schema
    Migrate,

    /// Sync with the remote service
    Sync {
        #[command(subcommand)]
        command: SyncCommands,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Supported shells for completions.
#[derive(clap::ValueEnum, Clone, Debug)]
pub enum Shell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
    Elvish,
}

// ============================================================================
// Sync Commands
// ============================================================================

#[derive(Subcommand, Debug)]
pub enum SyncCommands {
    /// Push pending changes, then pull remote changes
    Run,

    /// Show pending changes and last sync time
    Status,

    /// Re-admit changes that stopped retrying
    Retry,

    /// Mark one record as synced without pushing it
    MarkSynced {
        /// Table name (customers, jobs, estimates, invoices, price_book_items)
        table: String,

        /// Record ID
        id: String,
    },
}
