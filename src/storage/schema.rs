//! Connection setup and the settings key-value surface.
//!
//! Domain tables are created by versioned migrations (see
//! [`super::migrations`]). The settings table is bootstrapped here, ahead of
//! any migration, because it is where the schema version itself lives.

use rusqlite::{Connection, OptionalExtension, Result};

/// Settings key holding the applied schema version.
pub const SCHEMA_VERSION_KEY: &str = "schema_version";

/// Settings key holding the sync watermark.
pub const LAST_SYNC_KEY: &str = "last_sync_timestamp";

/// The settings key-value table.
pub const SETTINGS_SQL: &str = r"
CREATE TABLE IF NOT EXISTS settings (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
";

/// Set connection pragmas.
///
/// WAL gives concurrent readers while a sync cycle writes; foreign keys are
/// off by default in SQLite and must be enabled per connection.
///
/// # Errors
///
/// Returns an error if a pragma cannot be set.
pub fn apply_pragmas(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "temp_store", "MEMORY")?;
    Ok(())
}

/// Create the settings table if it does not exist.
///
/// # Errors
///
/// Returns an error if the DDL fails.
pub fn ensure_settings(conn: &Connection) -> Result<()> {
    conn.execute_batch(SETTINGS_SQL)
}

/// Read a setting.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn get_setting(conn: &Connection, key: &str) -> Result<Option<String>> {
    conn.query_row(
        "SELECT value FROM settings WHERE key = ?1",
        [key],
        |row| row.get(0),
    )
    .optional()
}

/// Write a setting, replacing any previous value.
///
/// # Errors
///
/// Returns an error if the write fails.
pub fn set_setting(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO settings (key, value, updated_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        rusqlite::params![key, value, crate::sync::timestamp::now()],
    )?;
    Ok(())
}

/// Read the stored schema version, 0 when unset or unparseable.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn schema_version(conn: &Connection) -> Result<i64> {
    Ok(get_setting(conn, SCHEMA_VERSION_KEY)?
        .and_then(|v| v.parse().ok())
        .unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_foreign_keys_enabled() {
        let conn = Connection::open_in_memory().unwrap();
        apply_pragmas(&conn).unwrap();

        let fk_enabled: i32 = conn
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
            .unwrap();
        assert_eq!(fk_enabled, 1);
    }

    #[test]
    fn test_wal_mode_on_file_database() {
        let dir = tempfile::TempDir::new().unwrap();
        let conn = Connection::open(dir.path().join("wal.db")).unwrap();
        apply_pragmas(&conn).unwrap();

        let mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
    }

    #[test]
    fn test_settings_roundtrip_and_overwrite() {
        let conn = Connection::open_in_memory().unwrap();
        ensure_settings(&conn).unwrap();

        assert_eq!(get_setting(&conn, LAST_SYNC_KEY).unwrap(), None);
        set_setting(&conn, LAST_SYNC_KEY, "2025-06-01T00:00:00.000Z").unwrap();
        set_setting(&conn, LAST_SYNC_KEY, "2025-07-01T00:00:00.000Z").unwrap();
        assert_eq!(
            get_setting(&conn, LAST_SYNC_KEY).unwrap().as_deref(),
            Some("2025-07-01T00:00:00.000Z")
        );
    }

    #[test]
    fn test_schema_version_defaults_to_zero() {
        let conn = Connection::open_in_memory().unwrap();
        ensure_settings(&conn).unwrap();
        assert_eq!(schema_version(&conn).unwrap(), 0);

        set_setting(&conn, SCHEMA_VERSION_KEY, "not-a-number").unwrap();
        assert_eq!(schema_version(&conn).unwrap(), 0);
    }
}
