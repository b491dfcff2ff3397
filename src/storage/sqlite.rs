//! SQLite storage implementation.
//!
//! `SqliteStorage` owns one connection. Opening it sets pragmas and brings
//! the schema up to date, so every other component can assume a migrated
//! store.

use std::path::Path;
use std::time::Duration;

use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OptionalExtension, params_from_iter};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::model::{SyncStatus, SyncableTable};
use crate::storage::migrations::{MigrationOutcome, run_migrations};
use crate::storage::schema::{self, LAST_SYNC_KEY};
use crate::sync::columns::{
    ColumnSet, INTERNAL_COLUMNS, Row, SYNC_RETRY_COLUMN, SYNC_STATUS_COLUMN, json_to_sql,
    quote_ident, sql_to_json,
};
use crate::sync::timestamp;

/// SQLite-based storage backend.
#[derive(Debug)]
pub struct SqliteStorage {
    conn: Connection,
    open_outcome: MigrationOutcome,
}

impl SqliteStorage {
    /// Open a database at the given path.
    ///
    /// Creates the database and migrates it if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established or a
    /// migration fails.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with_timeout(path, None)
    }

    /// Open a database with an optional busy timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established or a
    /// migration fails.
    pub fn open_with_timeout(path: &Path, timeout_ms: Option<u64>) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_millis(timeout_ms.unwrap_or(5000)))?;
        Self::init(conn)
    }

    /// Open an in-memory database (for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    pub fn open_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(mut conn: Connection) -> Result<Self> {
        schema::apply_pragmas(&conn)?;
        let outcome = run_migrations(&mut conn)?;
        Ok(Self {
            conn,
            open_outcome: outcome,
        })
    }

    /// Get a reference to the underlying connection (for read operations).
    #[must_use]
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Migrations applied while opening this store.
    #[must_use]
    pub fn open_outcome(&self) -> MigrationOutcome {
        self.open_outcome
    }

    /// Run pending migrations.
    ///
    /// # Errors
    ///
    /// Returns `Error::Migration` if a batch fails.
    pub fn migrate(&mut self) -> Result<MigrationOutcome> {
        run_migrations(&mut self.conn)
    }

    /// Currently applied schema version.
    ///
    /// # Errors
    ///
    /// Returns an error if the settings query fails.
    pub fn schema_version(&self) -> Result<i64> {
        Ok(schema::schema_version(&self.conn)?)
    }

    // ==================
    // Settings
    // ==================

    /// Read a setting.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        Ok(schema::get_setting(&self.conn, key)?)
    }

    /// Write a setting.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        Ok(schema::set_setting(&self.conn, key, value)?)
    }

    /// The sync watermark, absent before the first clean cycle.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn last_sync_timestamp(&self) -> Result<Option<String>> {
        self.get_setting(LAST_SYNC_KEY)
    }

    /// Advance the sync watermark.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn set_last_sync_timestamp(&self, at: &str) -> Result<()> {
        self.set_setting(LAST_SYNC_KEY, at)
    }

    // ==================
    // Local mutations
    // ==================

    /// Insert or update a row as a local edit.
    ///
    /// Assigns a UUID when `id` is absent, stamps `updated_at` (and
    /// `created_at` on insert) and marks the row `pending`.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidArgument` for unknown or internal columns, or a
    /// database error if the write violates a constraint.
    pub fn save_record(&mut self, table: SyncableTable, row: &Row) -> Result<String> {
        self.save_record_at(table, row, &timestamp::now())
    }

    /// Like [`Self::save_record`] with an explicit mutation time.
    ///
    /// # Errors
    ///
    /// See [`Self::save_record`].
    pub fn save_record_at(&mut self, table: SyncableTable, row: &Row, at: &str) -> Result<String> {
        let columns = ColumnSet::introspect(&self.conn, table)?;
        for key in row.keys() {
            if INTERNAL_COLUMNS.contains(&key.as_str()) {
                return Err(Error::InvalidArgument(format!(
                    "Column '{key}' is managed by the sync engine"
                )));
            }
            if !columns.contains(key) {
                return Err(Error::InvalidArgument(format!(
                    "Unknown column '{key}' for table '{table}'"
                )));
            }
        }

        let id = match row.get("id") {
            Some(Value::String(id)) if !id.is_empty() => id.clone(),
            None | Some(Value::Null) => uuid::Uuid::new_v4().to_string(),
            Some(other) => {
                return Err(Error::InvalidArgument(format!(
                    "Record id must be a non-empty string, got {other}"
                )));
            }
        };

        let mut values = row.clone();
        values.insert("id".into(), Value::String(id.clone()));
        values.insert("updated_at".into(), Value::String(at.to_string()));

        let tx = self.conn.transaction()?;
        let exists = tx
            .query_row(
                &format!("SELECT 1 FROM {} WHERE id = ?1", table.as_str()),
                [&id],
                |_| Ok(()),
            )
            .optional()?
            .is_some();

        if exists {
            let assignments: Vec<(&String, &Value)> =
                values.iter().filter(|(k, _)| k.as_str() != "id").collect();
            let mut sql = format!("UPDATE {} SET ", table.as_str());
            for (i, (name, _)) in assignments.iter().enumerate() {
                sql.push_str(&format!("{} = ?{}, ", quote_ident(name), i + 1));
            }
            sql.push_str(&format!(
                "{SYNC_STATUS_COLUMN} = '{}' WHERE id = ?{}",
                SyncStatus::Pending.as_str(),
                assignments.len() + 1
            ));
            let mut params: Vec<SqlValue> =
                assignments.iter().map(|(_, v)| json_to_sql(v)).collect();
            params.push(SqlValue::Text(id.clone()));
            tx.execute(&sql, params_from_iter(params))?;
        } else {
            if columns.contains("created_at") && !values.contains_key("created_at") {
                values.insert("created_at".into(), Value::String(at.to_string()));
            }
            let names: Vec<String> = values.keys().map(|k| quote_ident(k)).collect();
            let placeholders: Vec<String> = (1..=values.len()).map(|i| format!("?{i}")).collect();
            let sql = format!(
                "INSERT INTO {} ({}, {SYNC_STATUS_COLUMN}, {SYNC_RETRY_COLUMN}) VALUES ({}, '{}', 0)",
                table.as_str(),
                names.join(", "),
                placeholders.join(", "),
                SyncStatus::Pending.as_str(),
            );
            tx.execute(&sql, params_from_iter(values.values().map(json_to_sql)))?;
        }
        tx.commit()?;

        Ok(id)
    }

    /// Soft-delete a row: stamp `deleted_at` and mark it `pending`.
    ///
    /// # Errors
    ///
    /// Returns `Error::RecordNotFound` if no row has this id.
    pub fn soft_delete(&mut self, table: SyncableTable, id: &str) -> Result<()> {
        let now = timestamp::now();
        let changed = self.conn.execute(
            &format!(
                "UPDATE {} SET deleted_at = ?1, updated_at = ?1, {SYNC_STATUS_COLUMN} = ?2 WHERE id = ?3",
                table.as_str()
            ),
            rusqlite::params![now, SyncStatus::Pending.as_str(), id],
        )?;
        if changed == 0 {
            return Err(Error::RecordNotFound {
                table: table.to_string(),
                id: id.to_string(),
            });
        }
        Ok(())
    }

    /// Read a full row, bookkeeping columns included.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_record(&self, table: SyncableTable, id: &str) -> Result<Option<Row>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT * FROM {} WHERE id = ?1", table.as_str()))?;
        let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

        let row = stmt
            .query_row([id], |row| {
                let mut out = Row::new();
                for (idx, name) in names.iter().enumerate() {
                    out.insert(name.clone(), sql_to_json(row.get_ref(idx)?));
                }
                Ok(out)
            })
            .optional()?;
        Ok(row)
    }
}
