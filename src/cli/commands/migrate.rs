//! Migrate command implementation.

use crate::config::resolve_db_path;
use crate::error::{Error, Result};
use crate::storage::SqliteStorage;
use std::path::PathBuf;

/// Create the database if needed and bring its schema up to date.
///
/// # Errors
///
/// Returns an error if no database path can be resolved, or if a migration
/// fails (the stored schema version is left unchanged).
pub fn execute(db_path: Option<&PathBuf>, json: bool) -> Result<()> {
    let db_path = resolve_db_path(db_path.map(PathBuf::as_path)).ok_or(Error::NotInitialized)?;

    let storage = SqliteStorage::open(&db_path)?;
    let outcome = storage.open_outcome();

    if json {
        let output = serde_json::json!({
            "success": true,
            "path": db_path.display().to_string(),
            "from_version": outcome.from,
            "schema_version": outcome.to,
            "applied": outcome.applied(),
        });
        println!("{output}");
    } else if outcome.applied() {
        println!(
            "Migrated {} from v{} to v{}",
            db_path.display(),
            outcome.from,
            outcome.to
        );
    } else {
        println!("Schema is up to date (v{}).", outcome.to);
    }

    Ok(())
}
