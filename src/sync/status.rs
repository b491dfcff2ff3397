//! Sync status tracker.
//!
//! Cheap read/write helpers over the local store: pending counts for UI
//! badges ("N changes pending sync") and a manual override to flip one row
//! to `synced`. The push/pull algorithm does not use these; it queries rows
//! directly.

use std::collections::BTreeMap;

use colored::Colorize;
use rusqlite::Connection;

use crate::error::{Error, Result};
use crate::model::{SyncStatus, SyncableTable};
use crate::storage::SqliteStorage;
use crate::sync::columns::{SYNC_RETRY_COLUMN, SYNC_STATUS_COLUMN};
use crate::sync::types::SyncStatusSummary;

fn count_pending(conn: &Connection, table: SyncableTable) -> Result<usize> {
    let count: i64 = conn.query_row(
        &format!(
            "SELECT COUNT(*) FROM {} WHERE {SYNC_STATUS_COLUMN} = ?1",
            table.as_str()
        ),
        [SyncStatus::Pending.as_str()],
        |row| row.get(0),
    )?;
    Ok(usize::try_from(count).unwrap_or(0))
}

/// Total pending rows across all syncable tables.
///
/// # Errors
///
/// Returns an error if a count query fails.
pub fn pending_count(storage: &SqliteStorage) -> Result<usize> {
    Ok(pending_count_by_table(storage)?.values().sum())
}

/// Pending rows per table, every table present (zero included).
///
/// # Errors
///
/// Returns an error if a count query fails.
pub fn pending_count_by_table(storage: &SqliteStorage) -> Result<BTreeMap<SyncableTable, usize>> {
    SyncableTable::ALL
        .into_iter()
        .map(|table| Ok((table, count_pending(storage.conn(), table)?)))
        .collect()
}

/// Pending rows parked at or above the retry ceiling.
///
/// # Errors
///
/// Returns an error if a count query fails.
pub fn parked_count(storage: &SqliteStorage, max_retry_count: i64) -> Result<usize> {
    let mut total = 0;
    for table in SyncableTable::ALL {
        let count: i64 = storage.conn().query_row(
            &format!(
                "SELECT COUNT(*) FROM {} WHERE {SYNC_STATUS_COLUMN} = ?1 AND {SYNC_RETRY_COLUMN} >= ?2",
                table.as_str()
            ),
            rusqlite::params![SyncStatus::Pending.as_str(), max_retry_count],
            |row| row.get(0),
        )?;
        total += usize::try_from(count).unwrap_or(0);
    }
    Ok(total)
}

/// Force one row to `synced` without touching `updated_at`.
///
/// Manual override; not part of the sync algorithm.
///
/// # Errors
///
/// Returns `Error::RecordNotFound` if no row has this id.
pub fn mark_synced(storage: &SqliteStorage, table: SyncableTable, id: &str) -> Result<()> {
    let changed = storage.conn().execute(
        &format!(
            "UPDATE {} SET {SYNC_STATUS_COLUMN} = ?1 WHERE id = ?2",
            table.as_str()
        ),
        rusqlite::params![SyncStatus::Synced.as_str(), id],
    )?;
    if changed == 0 {
        return Err(Error::RecordNotFound {
            table: table.to_string(),
            id: id.to_string(),
        });
    }
    Ok(())
}

/// Gather a status snapshot.
///
/// # Errors
///
/// Returns an error if any query fails.
pub fn get_sync_status(storage: &SqliteStorage, max_retry_count: i64) -> Result<SyncStatusSummary> {
    let pending_by_table = pending_count_by_table(storage)?;
    let total_pending = pending_by_table.values().sum();
    Ok(SyncStatusSummary {
        pending_by_table,
        total_pending,
        parked: parked_count(storage, max_retry_count)?,
        last_sync_timestamp: storage.last_sync_timestamp()?,
    })
}

/// Print sync status to stdout in a human-readable format.
pub fn print_status(status: &SyncStatusSummary) {
    println!("{}", "Sync Status".bold().underline());
    println!();

    match &status.last_sync_timestamp {
        Some(at) => println!("Last sync: {at}"),
        None => println!("{}", "Never synced.".dimmed()),
    }
    println!();

    if status.total_pending == 0 {
        println!("{}", "No pending changes.".green());
        return;
    }

    println!("{}", "Pending Changes:".yellow().bold());
    for (table, count) in &status.pending_by_table {
        if *count > 0 {
            println!("  {:<18} {}", table.as_str(), count);
        }
    }
    println!("  {}: {}", "Total".bold(), status.total_pending);

    if status.parked > 0 {
        println!();
        println!(
            "{}",
            format!(
                "{} change(s) stopped retrying after repeated failures.",
                status.parked
            )
            .red()
        );
        println!("{}", "Run 'fieldsync sync retry' to try them again.".dimmed());
    }
}
