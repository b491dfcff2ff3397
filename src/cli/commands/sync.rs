//! Sync command implementations.
//!
//! `sync run` needs a remote; the other subcommands only touch the local
//! store. Remote settings come from `--remote-url`/`--remote-key`, their
//! environment variables, or `~/.fieldsync/config.json`, in that order.

use crate::cli::SyncCommands;
use crate::config::{resolve_db_path, resolve_remote_settings, resolve_sync_options};
use crate::error::{Error, Result};
use crate::model::SyncableTable;
use crate::storage::{SharedStorage, StoreManager};
use crate::sync::{RestRemote, SyncEngine, SyncResult, print_status};
use colored::Colorize;
use std::path::PathBuf;

/// Remote overrides from the command line.
#[derive(Debug, Clone, Copy, Default)]
pub struct RemoteOverrides<'a> {
    pub url: Option<&'a str>,
    pub api_key: Option<&'a str>,
}

/// Execute sync commands.
///
/// # Errors
///
/// Returns an error if the database is missing, the configuration is
/// invalid, or the local store fails. Per-record sync failures are reported
/// in the output, not as errors.
pub fn execute(
    command: &SyncCommands,
    db_path: Option<&PathBuf>,
    remote: RemoteOverrides<'_>,
    json: bool,
) -> Result<()> {
    match command {
        SyncCommands::Run => run(db_path, remote, json),
        SyncCommands::Status => status(db_path, json),
        SyncCommands::Retry => retry(db_path, json),
        SyncCommands::MarkSynced { table, id } => mark_synced(table, id, db_path, json),
    }
}

/// Open the existing database. Sync never creates one; `migrate` does.
fn open_storage(db_path: Option<&PathBuf>) -> Result<SharedStorage> {
    let db_path = resolve_db_path(db_path.map(PathBuf::as_path)).ok_or(Error::NotInitialized)?;

    if !db_path.exists() {
        return Err(Error::NotInitialized);
    }

    StoreManager::new(&db_path).open()
}

/// Engine for local-only operations.
fn local_engine(db_path: Option<&PathBuf>) -> Result<SyncEngine<RestRemote>> {
    Ok(SyncEngine::new(open_storage(db_path)?, None).with_options(resolve_sync_options()?))
}

fn run(db_path: Option<&PathBuf>, overrides: RemoteOverrides<'_>, json: bool) -> Result<()> {
    let storage = open_storage(db_path)?;
    let options = resolve_sync_options()?;
    let remote = resolve_remote_settings(overrides.url, overrides.api_key)?
        .as_ref()
        .map(RestRemote::new)
        .transpose()?;

    let engine = SyncEngine::new(storage, remote).with_options(options);

    let rt = tokio::runtime::Runtime::new()
        .map_err(|e| Error::Other(format!("Failed to create async runtime: {e}")))?;
    let result = rt.block_on(engine.process_sync())?;

    if json {
        let output = serde_json::json!({
            "success": result.failed == 0,
            "result": result,
        });
        println!("{output}");
    } else {
        print_result(&result);
    }
    Ok(())
}

fn print_result(result: &SyncResult) {
    if result.is_clean() {
        println!(
            "{} pushed {}, pulled {}",
            "Sync complete:".green(),
            result.pushed,
            result.pulled
        );
        return;
    }

    println!(
        "Sync finished with errors: pushed {}, pulled {}, failed {}",
        result.pushed, result.pulled, result.failed
    );
    for error in &result.errors {
        println!("  {} {error}", "-".red());
    }
}

fn status(db_path: Option<&PathBuf>, json: bool) -> Result<()> {
    let summary = local_engine(db_path)?.status()?;

    if json {
        println!("{}", serde_json::to_string(&summary)?);
    } else {
        print_status(&summary);
    }
    Ok(())
}

fn retry(db_path: Option<&PathBuf>, json: bool) -> Result<()> {
    let reset = local_engine(db_path)?.reset_failed_retries()?;

    if json {
        let output = serde_json::json!({ "success": true, "reset": reset });
        println!("{output}");
    } else if reset == 0 {
        println!("No parked changes.");
    } else {
        println!("{reset} change(s) will be retried on the next sync.");
    }
    Ok(())
}

fn mark_synced(table: &str, id: &str, db_path: Option<&PathBuf>, json: bool) -> Result<()> {
    let table = SyncableTable::parse(table)?;
    local_engine(db_path)?.mark_synced(table, id)?;

    if json {
        let output = serde_json::json!({
            "success": true,
            "table": table,
            "id": id,
        });
        println!("{output}");
    } else {
        println!("Marked {table}/{id} as synced.");
    }
    Ok(())
}
