//! Generic column introspection.
//!
//! One push/pull implementation serves every syncable table by asking the
//! store for each table's column catalog at runtime instead of carrying a
//! struct per entity. Rows travel as JSON objects keyed by column name.
//!
//! Only the two internal bookkeeping columns are excluded from the pushable
//! set; everything else (including `id`, `updated_at`, `deleted_at`) is
//! payload.

use rusqlite::Connection;
use rusqlite::types::{Value as SqlValue, ValueRef};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::model::SyncableTable;

/// Column holding the per-row `pending` / `synced` flag.
pub const SYNC_STATUS_COLUMN: &str = "sync_status";

/// Column holding the per-row push failure counter.
pub const SYNC_RETRY_COLUMN: &str = "sync_retry_count";

/// Columns that never leave the device.
pub const INTERNAL_COLUMNS: [&str; 2] = [SYNC_STATUS_COLUMN, SYNC_RETRY_COLUMN];

/// A schema-driven row: column name to JSON value.
pub type Row = serde_json::Map<String, Value>;

/// One entry of a table's column catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    pub decl_type: String,
    pub not_null: bool,
    pub primary_key: bool,
}

/// Read the full column catalog for a table.
///
/// # Errors
///
/// Returns an error if the catalog query fails or the table does not exist.
pub fn table_columns(conn: &Connection, table: SyncableTable) -> Result<Vec<ColumnInfo>> {
    let mut stmt = conn.prepare(
        "SELECT name, type, \"notnull\", pk FROM pragma_table_info(?1) ORDER BY cid",
    )?;
    let columns = stmt
        .query_map([table.as_str()], |row| {
            Ok(ColumnInfo {
                name: row.get(0)?,
                decl_type: row.get(1)?,
                not_null: row.get::<_, i64>(2)? != 0,
                primary_key: row.get::<_, i64>(3)? != 0,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    if columns.is_empty() {
        return Err(Error::Other(format!(
            "Table '{table}' has no columns (schema not migrated?)"
        )));
    }
    Ok(columns)
}

/// The pushable column list of one table.
#[derive(Debug, Clone)]
pub struct ColumnSet {
    table: SyncableTable,
    columns: Vec<String>,
}

impl ColumnSet {
    /// Derive the pushable columns by introspection.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog cannot be read, or if the table lacks
    /// the `id` / `updated_at` columns the sync algorithm keys on.
    pub fn introspect(conn: &Connection, table: SyncableTable) -> Result<Self> {
        let columns: Vec<String> = table_columns(conn, table)?
            .into_iter()
            .map(|c| c.name)
            .filter(|name| !INTERNAL_COLUMNS.contains(&name.as_str()))
            .collect();

        for required in ["id", "updated_at"] {
            if !columns.iter().any(|c| c == required) {
                return Err(Error::Other(format!(
                    "Table '{table}' is missing required column '{required}'"
                )));
            }
        }

        Ok(Self { table, columns })
    }

    /// Table these columns belong to.
    #[must_use]
    pub fn table(&self) -> SyncableTable {
        self.table
    }

    /// Pushable column names in catalog order.
    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.columns
    }

    /// Returns true if `name` is a pushable column.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    /// Quoted, comma-separated column list for a SELECT.
    #[must_use]
    pub fn select_list(&self) -> String {
        self.columns
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Build a payload from a row selected with [`Self::select_list`].
    ///
    /// # Errors
    ///
    /// Returns an error if a column cannot be read.
    pub fn payload_from_row(&self, row: &rusqlite::Row<'_>) -> rusqlite::Result<Row> {
        let mut payload = Row::new();
        for (idx, name) in self.columns.iter().enumerate() {
            payload.insert(name.clone(), sql_to_json(row.get_ref(idx)?));
        }
        Ok(payload)
    }
}

/// Quote an SQL identifier.
#[must_use]
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Convert a stored SQL value to JSON.
///
/// Blobs become byte arrays; non-finite reals become null.
#[must_use]
pub fn sql_to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f).map_or(Value::Null, Value::Number),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::Array(b.iter().map(|byte| Value::from(*byte)).collect()),
    }
}

/// Convert a JSON value to an SQL parameter.
///
/// Booleans map to 0/1. Arrays and objects (e.g. `line_items`) are stored as
/// their JSON text.
#[must_use]
pub fn json_to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => n.as_i64().map_or_else(
            || n.as_f64().map_or(SqlValue::Null, SqlValue::Real),
            SqlValue::Integer,
        ),
        Value::String(s) => SqlValue::Text(s.clone()),
        Value::Array(_) | Value::Object(_) => SqlValue::Text(value.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::migrations::run_migrations;
    use serde_json::json;

    fn migrated() -> Connection {
        let mut conn = Connection::open_in_memory().unwrap();
        run_migrations(&mut conn).unwrap();
        conn
    }

    #[test]
    fn test_pushable_columns_exclude_sync_bookkeeping() {
        let conn = migrated();
        for table in SyncableTable::ALL {
            let set = ColumnSet::introspect(&conn, table).unwrap();
            assert!(set.contains("id"));
            assert!(set.contains("updated_at"));
            assert!(set.contains("deleted_at"));
            assert!(!set.contains(SYNC_STATUS_COLUMN));
            assert!(!set.contains(SYNC_RETRY_COLUMN));
        }
    }

    #[test]
    fn test_columns_follow_schema_shape() {
        let conn = migrated();
        let jobs = ColumnSet::introspect(&conn, SyncableTable::Jobs).unwrap();
        assert!(jobs.contains("customer_id"));
        assert!(jobs.contains("assigned_to"));
        assert!(!jobs.contains("unit_price_cents"));

        let catalog = table_columns(&conn, SyncableTable::Customers).unwrap();
        let id = catalog.iter().find(|c| c.name == "id").unwrap();
        assert!(id.primary_key);
        assert_eq!(id.decl_type, "TEXT");
    }

    #[test]
    fn test_introspect_unmigrated_table_fails() {
        let conn = Connection::open_in_memory().unwrap();
        assert!(ColumnSet::introspect(&conn, SyncableTable::Customers).is_err());
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("name"), "\"name\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_value_mapping() {
        assert_eq!(json_to_sql(&json!(null)), SqlValue::Null);
        assert_eq!(json_to_sql(&json!(true)), SqlValue::Integer(1));
        assert_eq!(json_to_sql(&json!(42)), SqlValue::Integer(42));
        assert_eq!(json_to_sql(&json!(1.5)), SqlValue::Real(1.5));
        assert_eq!(json_to_sql(&json!("x")), SqlValue::Text("x".into()));
        assert_eq!(
            json_to_sql(&json!([{"sku": "A1", "qty": 2}])),
            SqlValue::Text(r#"[{"qty":2,"sku":"A1"}]"#.into())
        );

        assert_eq!(sql_to_json(ValueRef::Integer(7)), json!(7));
        assert_eq!(sql_to_json(ValueRef::Real(f64::NAN)), Value::Null);
        assert_eq!(sql_to_json(ValueRef::Text(b"hi")), json!("hi"));
        assert_eq!(sql_to_json(ValueRef::Blob(&[1, 2])), json!([1, 2]));
    }
}
