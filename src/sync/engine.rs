//! Sync reconciliation engine.
//!
//! One cycle of [`SyncEngine::process_sync`]:
//!
//! 1. Read the watermark and note the cycle start time.
//! 2. **Push** every table in fixed order: each pending row below the retry
//!    ceiling is upserted to the remote, after a per-row exponential backoff
//!    if it has failed before. Success marks the row `synced`; failure bumps
//!    its retry count and is recorded, and the batch continues.
//! 3. **Pull** every table with the pre-push watermark: remote rows are
//!    inserted, or overwritten last-write-wins on `updated_at` (a strictly
//!    newer pending local edit survives; ties go to the remote).
//! 4. Advance the watermark to the cycle start only if nothing failed to push
//!    and every table fetched cleanly.
//!
//! Cycles are single-flight: overlapping calls queue on an async mutex.

use std::collections::BTreeMap;

use rusqlite::types::Value as SqlValue;
use rusqlite::{OptionalExtension, params_from_iter};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::model::{SyncStatus, SyncableTable};
use crate::storage::{SharedStorage, SqliteStorage, lock};
use crate::sync::columns::{
    ColumnSet, Row, SYNC_RETRY_COLUMN, SYNC_STATUS_COLUMN, json_to_sql, quote_ident,
};
use crate::sync::remote::RemoteService;
use crate::sync::status;
use crate::sync::timestamp;
use crate::sync::types::{
    LocalState, MergeDecision, SyncOptions, SyncResult, SyncStatusSummary, decide,
};

/// Error string returned when no remote is configured.
pub const REMOTE_NOT_CONFIGURED: &str = "Remote sync service is not configured";

/// A row selected for push.
struct PendingRow {
    id: String,
    retry_count: i64,
    payload: Row,
}

/// Push/pull reconciliation between the local store and one remote.
pub struct SyncEngine<R: RemoteService> {
    storage: SharedStorage,
    remote: Option<R>,
    options: SyncOptions,
    cycle: tokio::sync::Mutex<()>,
}

impl<R: RemoteService> SyncEngine<R> {
    /// Create an engine. `remote = None` yields a no-op engine whose cycles
    /// report [`REMOTE_NOT_CONFIGURED`].
    #[must_use]
    pub fn new(storage: SharedStorage, remote: Option<R>) -> Self {
        Self {
            storage,
            remote,
            options: SyncOptions::default(),
            cycle: tokio::sync::Mutex::new(()),
        }
    }

    /// Override the default tunables.
    #[must_use]
    pub fn with_options(mut self, options: SyncOptions) -> Self {
        self.options = options;
        self
    }

    /// Active tunables.
    #[must_use]
    pub fn options(&self) -> SyncOptions {
        self.options
    }

    /// The configured remote, if any.
    #[must_use]
    pub fn remote(&self) -> Option<&R> {
        self.remote.as_ref()
    }

    /// The shared storage handle.
    #[must_use]
    pub fn storage(&self) -> &SharedStorage {
        &self.storage
    }

    fn with_storage<T>(&self, f: impl FnOnce(&SqliteStorage) -> Result<T>) -> Result<T> {
        let guard = lock(&self.storage)?;
        f(&guard)
    }

    // ==================
    // Cycle
    // ==================

    /// Run one full sync cycle.
    ///
    /// Per-record remote and merge failures are reported in the result, not
    /// as `Err`.
    ///
    /// # Errors
    ///
    /// Returns an error only when the local store itself fails (lock
    /// poisoned, bookkeeping write rejected).
    pub async fn process_sync(&self) -> Result<SyncResult> {
        let _cycle = self.cycle.lock().await;

        let Some(remote) = self.remote.as_ref() else {
            warn!("Sync skipped: no remote configured");
            return Ok(SyncResult {
                errors: vec![REMOTE_NOT_CONFIGURED.to_string()],
                ..SyncResult::default()
            });
        };

        let started_at = timestamp::now();
        let watermark = self.with_storage(SqliteStorage::last_sync_timestamp)?;
        info!(
            since = watermark.as_deref().unwrap_or("never"),
            "Sync cycle started"
        );

        let mut result = SyncResult::default();

        for table in SyncableTable::ALL {
            self.push_table(remote, table, &mut result).await?;
        }

        let mut all_fetched = true;
        for table in SyncableTable::ALL {
            all_fetched &= self
                .pull_table(remote, table, watermark.as_deref(), &mut result)
                .await?;
        }

        if result.failed == 0 && all_fetched {
            self.with_storage(|s| s.set_last_sync_timestamp(&started_at))?;
            debug!(watermark = %started_at, "Watermark advanced");
        } else {
            warn!(
                failed = result.failed,
                all_fetched, "Watermark held back"
            );
        }

        info!(
            pushed = result.pushed,
            pulled = result.pulled,
            failed = result.failed,
            errors = result.errors.len(),
            "Sync cycle finished"
        );
        Ok(result)
    }

    // ==================
    // Push
    // ==================

    async fn push_table(
        &self,
        remote: &R,
        table: SyncableTable,
        result: &mut SyncResult,
    ) -> Result<()> {
        let pending = self.load_pending(table)?;
        if pending.is_empty() {
            return Ok(());
        }
        debug!(%table, rows = pending.len(), "Pushing");

        for row in pending {
            if row.retry_count > 0 {
                let delay = self
                    .options
                    .backoff_delay(u32::try_from(row.retry_count).unwrap_or(u32::MAX));
                debug!(%table, id = %row.id, retry = row.retry_count, ?delay, "Backing off");
                tokio::time::sleep(delay).await;
            }

            match remote.upsert(table, &row.payload).await {
                Ok(()) => {
                    self.mark_pushed(table, &row)?;
                    result.pushed += 1;
                }
                Err(e) => {
                    warn!(%table, id = %row.id, error = %e, "Push failed");
                    self.record_push_failure(table, &row.id)?;
                    result.failed += 1;
                    result.errors.push(format!("{table}/{}: {e}", row.id));
                }
            }
        }
        Ok(())
    }

    fn load_pending(&self, table: SyncableTable) -> Result<Vec<PendingRow>> {
        let max_retry = self.options.max_retry_count;
        self.with_storage(|storage| {
            let columns = ColumnSet::introspect(storage.conn(), table)?;
            let sql = format!(
                "SELECT {}, {SYNC_RETRY_COLUMN} FROM {} \
                 WHERE {SYNC_STATUS_COLUMN} = ?1 \
                 AND ({SYNC_RETRY_COLUMN} < ?2 OR {SYNC_RETRY_COLUMN} IS NULL) \
                 ORDER BY updated_at",
                columns.select_list(),
                table.as_str()
            );
            let retry_idx = columns.names().len();

            let mut stmt = storage.conn().prepare(&sql)?;
            let rows = stmt
                .query_map(
                    rusqlite::params![SyncStatus::Pending.as_str(), max_retry],
                    |row| {
                        let payload = columns.payload_from_row(row)?;
                        let retry_count: Option<i64> = row.get(retry_idx)?;
                        Ok((payload, retry_count.unwrap_or(0)))
                    },
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows
                .into_iter()
                .map(|(payload, retry_count)| PendingRow {
                    id: payload
                        .get("id")
                        .map(|v| v.as_str().map_or_else(|| v.to_string(), str::to_string))
                        .unwrap_or_default(),
                    retry_count,
                    payload,
                })
                .collect())
        })
    }

    fn mark_pushed(&self, table: SyncableTable, row: &PendingRow) -> Result<()> {
        let pushed_at = row.payload.get("updated_at").map_or(SqlValue::Null, json_to_sql);
        self.with_storage(|storage| {
            // A local edit made while the upsert was in flight has a newer
            // updated_at and must stay pending.
            let changed = storage.conn().execute(
                &format!(
                    "UPDATE {} SET {SYNC_STATUS_COLUMN} = ?1, {SYNC_RETRY_COLUMN} = 0 \
                     WHERE id = ?2 AND updated_at IS ?3",
                    table.as_str()
                ),
                rusqlite::params![SyncStatus::Synced.as_str(), row.id, pushed_at],
            )?;
            if changed == 0 {
                debug!(%table, id = %row.id, "Row changed during push; left pending");
                storage.conn().execute(
                    &format!(
                        "UPDATE {} SET {SYNC_RETRY_COLUMN} = 0 WHERE id = ?1",
                        table.as_str()
                    ),
                    [&row.id],
                )?;
            }
            Ok(())
        })
    }

    fn record_push_failure(&self, table: SyncableTable, id: &str) -> Result<()> {
        self.with_storage(|storage| {
            storage.conn().execute(
                &format!(
                    "UPDATE {} SET {SYNC_RETRY_COLUMN} = COALESCE({SYNC_RETRY_COLUMN}, 0) + 1 \
                     WHERE id = ?1",
                    table.as_str()
                ),
                [id],
            )?;
            Ok(())
        })
    }

    // ==================
    // Pull
    // ==================

    /// Returns `false` if the table could not be fetched at all.
    async fn pull_table(
        &self,
        remote: &R,
        table: SyncableTable,
        watermark: Option<&str>,
        result: &mut SyncResult,
    ) -> Result<bool> {
        let columns = self.with_storage(|s| ColumnSet::introspect(s.conn(), table))?;

        let rows = match remote.fetch_since(table, watermark).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(%table, error = %e, "Fetch failed");
                result.errors.push(format!("{table}: {e}"));
                return Ok(false);
            }
        };
        debug!(%table, rows = rows.len(), "Pulled");

        for remote_row in rows {
            let id = remote_row
                .get("id")
                .and_then(Value::as_str)
                .unwrap_or("?")
                .to_string();

            match self.with_storage(|s| merge_remote_row(s, &columns, remote_row)) {
                Ok(true) => result.pulled += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(%table, %id, error = %e, "Merge failed");
                    result.errors.push(format!("{table}/{id}: {e}"));
                }
            }
        }
        Ok(true)
    }

    // ==================
    // Administration
    // ==================

    /// Re-admit every parked row (retry count at or above the ceiling) to the
    /// next push. Rows below the ceiling are untouched.
    ///
    /// Returns the number of rows reset.
    ///
    /// # Errors
    ///
    /// Returns an error if an update fails.
    pub fn reset_failed_retries(&self) -> Result<usize> {
        let max_retry = self.options.max_retry_count;
        let reset = self.with_storage(|storage| {
            let mut total = 0;
            for table in SyncableTable::ALL {
                total += storage.conn().execute(
                    &format!(
                        "UPDATE {} SET {SYNC_RETRY_COLUMN} = 0 WHERE {SYNC_RETRY_COLUMN} >= ?1",
                        table.as_str()
                    ),
                    [max_retry],
                )?;
            }
            Ok(total)
        })?;
        info!(rows = reset, "Reset parked rows");
        Ok(reset)
    }

    /// Total pending rows. See [`status::pending_count`].
    ///
    /// # Errors
    ///
    /// Returns an error if a count query fails.
    pub fn pending_count(&self) -> Result<usize> {
        self.with_storage(status::pending_count)
    }

    /// Pending rows per table. See [`status::pending_count_by_table`].
    ///
    /// # Errors
    ///
    /// Returns an error if a count query fails.
    pub fn pending_count_by_table(&self) -> Result<BTreeMap<SyncableTable, usize>> {
        self.with_storage(status::pending_count_by_table)
    }

    /// Force one row to `synced`. See [`status::mark_synced`].
    ///
    /// # Errors
    ///
    /// Returns `Error::RecordNotFound` if no row has this id.
    pub fn mark_synced(&self, table: SyncableTable, id: &str) -> Result<()> {
        self.with_storage(|s| status::mark_synced(s, table, id))
    }

    /// Status snapshot using this engine's retry ceiling.
    ///
    /// # Errors
    ///
    /// Returns an error if any query fails.
    pub fn status(&self) -> Result<SyncStatusSummary> {
        let max_retry = self.options.max_retry_count;
        self.with_storage(|s| status::get_sync_status(s, max_retry))
    }
}

/// Apply one remote row locally. Returns `true` if a local row was written.
fn merge_remote_row(storage: &SqliteStorage, columns: &ColumnSet, remote_row: Value) -> Result<bool> {
    let table = columns.table();
    let Value::Object(remote) = remote_row else {
        return Err(Error::Remote("row is not a JSON object".into()));
    };
    let id = match remote.get("id").and_then(Value::as_str) {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => return Err(Error::Remote("row has no id".into())),
    };
    let remote_at = remote
        .get("updated_at")
        .and_then(Value::as_str)
        .and_then(timestamp::parse)
        .ok_or_else(|| Error::Remote("row has no valid updated_at".into()))?;

    let local = storage
        .conn()
        .query_row(
            &format!(
                "SELECT {SYNC_STATUS_COLUMN}, updated_at FROM {} WHERE id = ?1",
                table.as_str()
            ),
            [&id],
            |row| {
                let status: Option<String> = row.get(0)?;
                let updated_at: Option<String> = row.get(1)?;
                Ok(LocalState {
                    status: SyncStatus::from_str(status.as_deref().unwrap_or_default()),
                    updated_at: updated_at.as_deref().and_then(timestamp::parse),
                })
            },
        )
        .optional()?;

    // Insert writes only the columns the remote sent so table defaults apply.
    let present: Vec<(&String, &Value)> = columns
        .names()
        .iter()
        .filter_map(|name| remote.get(name).map(|value| (name, value)))
        .collect();

    match decide(local, remote_at) {
        MergeDecision::Insert => {
            let names: Vec<String> = present.iter().map(|(n, _)| quote_ident(n)).collect();
            let placeholders: Vec<String> = (1..=present.len()).map(|i| format!("?{i}")).collect();
            let sql = format!(
                "INSERT INTO {} ({}, {SYNC_STATUS_COLUMN}, {SYNC_RETRY_COLUMN}) VALUES ({}, '{}', 0)",
                table.as_str(),
                names.join(", "),
                placeholders.join(", "),
                SyncStatus::Synced.as_str(),
            );
            storage
                .conn()
                .execute(&sql, params_from_iter(present.iter().map(|(_, v)| json_to_sql(v))))?;
            debug!(%table, %id, "Inserted remote row");
            Ok(true)
        }
        MergeDecision::Overwrite => {
            // Every local column follows the remote; keys it omits become NULL.
            let assignments: Vec<&String> =
                columns.names().iter().filter(|n| n.as_str() != "id").collect();
            let mut sql = format!("UPDATE {} SET ", table.as_str());
            for (i, name) in assignments.iter().enumerate() {
                sql.push_str(&format!("{} = ?{}, ", quote_ident(name), i + 1));
            }
            sql.push_str(&format!(
                "{SYNC_STATUS_COLUMN} = '{}', {SYNC_RETRY_COLUMN} = 0 WHERE id = ?{}",
                SyncStatus::Synced.as_str(),
                assignments.len() + 1
            ));
            let mut params: Vec<SqlValue> = assignments
                .iter()
                .map(|name| remote.get(name.as_str()).map_or(SqlValue::Null, json_to_sql))
                .collect();
            params.push(SqlValue::Text(id.clone()));
            storage.conn().execute(&sql, params_from_iter(params))?;
            debug!(%table, %id, "Overwrote local row");
            Ok(true)
        }
        MergeDecision::KeepLocal => {
            debug!(%table, %id, "Local pending edit is newer; keeping it");
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StoreManager;
    use crate::sync::remote::{MemoryRemote, RestRemote};
    use serde_json::json;
    use std::time::Duration;

    const LOCAL_ID: &str = "c1";

    fn fast_options() -> SyncOptions {
        SyncOptions {
            base_backoff: Duration::ZERO,
            ..SyncOptions::default()
        }
    }

    fn engine_with(remote: MemoryRemote) -> SyncEngine<MemoryRemote> {
        let storage = StoreManager::in_memory().open().unwrap();
        SyncEngine::new(storage, Some(remote)).with_options(fast_options())
    }

    /// Insert a local row and force its sync bookkeeping.
    fn put_local(
        engine: &SyncEngine<MemoryRemote>,
        table: SyncableTable,
        row: Value,
        updated_at: &str,
        status: SyncStatus,
        retry_count: i64,
    ) -> String {
        let mut storage = lock(engine.storage()).unwrap();
        let id = storage
            .save_record_at(table, row.as_object().unwrap(), updated_at)
            .unwrap();
        storage
            .conn()
            .execute(
                &format!(
                    "UPDATE {} SET sync_status = ?1, sync_retry_count = ?2 WHERE id = ?3",
                    table.as_str()
                ),
                rusqlite::params![status.as_str(), retry_count, id],
            )
            .unwrap();
        id
    }

    fn local(engine: &SyncEngine<MemoryRemote>, table: SyncableTable, id: &str) -> Row {
        lock(engine.storage())
            .unwrap()
            .get_record(table, id)
            .unwrap()
            .unwrap()
    }

    fn watermark(engine: &SyncEngine<MemoryRemote>) -> Option<String> {
        lock(engine.storage()).unwrap().last_sync_timestamp().unwrap()
    }

    fn pending_customer(engine: &SyncEngine<MemoryRemote>, name: &str, updated_at: &str) {
        put_local(
            engine,
            SyncableTable::Customers,
            json!({"id": LOCAL_ID, "name": name}),
            updated_at,
            SyncStatus::Pending,
            0,
        );
    }

    #[tokio::test]
    async fn test_unconfigured_remote_is_not_fatal() {
        let storage = StoreManager::in_memory().open().unwrap();
        let engine: SyncEngine<RestRemote> = SyncEngine::new(storage, None);

        let result = engine.process_sync().await.unwrap();

        assert_eq!(result.pushed, 0);
        assert_eq!(result.pulled, 0);
        assert_eq!(result.failed, 0);
        assert_eq!(result.errors, vec![REMOTE_NOT_CONFIGURED.to_string()]);
    }

    #[tokio::test]
    async fn test_push_success_marks_synced() {
        let engine = engine_with(MemoryRemote::new());
        pending_customer(&engine, "Ada", "2025-06-01T00:00:00.000Z");

        let result = engine.process_sync().await.unwrap();

        assert_eq!(result.pushed, 1);
        assert_eq!(result.failed, 0);
        let row = local(&engine, SyncableTable::Customers, LOCAL_ID);
        assert_eq!(row["sync_status"], "synced");
        assert_eq!(row["sync_retry_count"], 0);
    }

    #[tokio::test]
    async fn test_push_payload_excludes_bookkeeping_columns() {
        let engine = engine_with(MemoryRemote::new());
        pending_customer(&engine, "Ada", "2025-06-01T00:00:00.000Z");

        engine.process_sync().await.unwrap();

        let pushed = engine
            .remote()
            .unwrap()
            .get(SyncableTable::Customers, LOCAL_ID)
            .unwrap();
        assert_eq!(pushed["name"], "Ada");
        assert_eq!(pushed["updated_at"], "2025-06-01T00:00:00.000Z");
        assert!(pushed.get("deleted_at").is_some());
        assert!(pushed.get("sync_status").is_none());
        assert!(pushed.get("sync_retry_count").is_none());
    }

    #[tokio::test]
    async fn test_push_failure_records_error_and_bumps_retry() {
        let remote = MemoryRemote::new();
        remote.fail_upserts("Network timeout");
        let engine = engine_with(remote);
        pending_customer(&engine, "Ada", "2025-06-01T00:00:00.000Z");

        let result = engine.process_sync().await.unwrap();

        assert_eq!(result.pushed, 0);
        assert_eq!(result.failed, 1);
        assert!(result.errors.contains(&format!("customers/{LOCAL_ID}: Network timeout")));
        let row = local(&engine, SyncableTable::Customers, LOCAL_ID);
        assert_eq!(row["sync_status"], "pending");
        assert_eq!(row["sync_retry_count"], 1);
    }

    #[tokio::test]
    async fn test_one_failure_does_not_abort_batch() {
        let remote = MemoryRemote::new();
        remote.fail_upsert_for("c2", "validation failed");
        let engine = engine_with(remote);
        for id in ["c1", "c2", "c3"] {
            put_local(
                &engine,
                SyncableTable::Customers,
                json!({"id": id, "name": id}),
                "2025-06-01T00:00:00.000Z",
                SyncStatus::Pending,
                0,
            );
        }

        let result = engine.process_sync().await.unwrap();

        assert_eq!(result.pushed, 2);
        assert_eq!(result.failed, 1);
        assert_eq!(result.errors, vec!["customers/c2: validation failed".to_string()]);
        assert_eq!(local(&engine, SyncableTable::Customers, "c3")["sync_status"], "synced");
    }

    #[tokio::test]
    async fn test_retry_ceiling_parks_row_until_reset() {
        let engine = engine_with(MemoryRemote::new());
        let max = engine.options().max_retry_count;
        put_local(
            &engine,
            SyncableTable::Customers,
            json!({"id": LOCAL_ID, "name": "Ada"}),
            "2025-06-01T00:00:00.000Z",
            SyncStatus::Pending,
            max,
        );

        let parked = engine.process_sync().await.unwrap();
        assert_eq!(parked.pushed, 0);
        assert_eq!(parked.failed, 0);
        assert_eq!(engine.remote().unwrap().upsert_calls(), 0);
        assert_eq!(engine.status().unwrap().parked, 1);

        assert_eq!(engine.reset_failed_retries().unwrap(), 1);

        let retried = engine.process_sync().await.unwrap();
        assert_eq!(retried.pushed, 1);
        assert_eq!(local(&engine, SyncableTable::Customers, LOCAL_ID)["sync_status"], "synced");
    }

    #[tokio::test]
    async fn test_reset_leaves_rows_below_ceiling_alone() {
        let engine = engine_with(MemoryRemote::new());
        put_local(
            &engine,
            SyncableTable::Customers,
            json!({"id": LOCAL_ID, "name": "Ada"}),
            "2025-06-01T00:00:00.000Z",
            SyncStatus::Pending,
            2,
        );

        assert_eq!(engine.reset_failed_retries().unwrap(), 0);
        assert_eq!(local(&engine, SyncableTable::Customers, LOCAL_ID)["sync_retry_count"], 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_before_retrying_failed_row() {
        let storage = StoreManager::in_memory().open().unwrap();
        let engine = SyncEngine::new(storage, Some(MemoryRemote::new()));
        put_local(
            &engine,
            SyncableTable::Customers,
            json!({"id": LOCAL_ID, "name": "Ada"}),
            "2025-06-01T00:00:00.000Z",
            SyncStatus::Pending,
            1,
        );

        let started = tokio::time::Instant::now();
        let result = engine.process_sync().await.unwrap();

        assert_eq!(result.pushed, 1);
        assert!(started.elapsed() >= Duration::from_millis(2000));
    }

    #[tokio::test]
    async fn test_pull_inserts_unknown_row_as_synced() {
        let remote = MemoryRemote::new();
        remote
            .insert(
                SyncableTable::Customers,
                json!({
                    "id": "c9",
                    "name": "Remote Customer",
                    "created_at": "2025-06-01T00:00:00.000Z",
                    "updated_at": "2025-06-01T00:00:00.000Z",
                    "server_only_field": "ignored"
                }),
            )
            .unwrap();
        let engine = engine_with(remote);

        let result = engine.process_sync().await.unwrap();

        assert_eq!(result.pulled, 1);
        let row = local(&engine, SyncableTable::Customers, "c9");
        assert_eq!(row["name"], "Remote Customer");
        assert_eq!(row["sync_status"], "synced");
        assert_eq!(row["sync_retry_count"], 0);
    }

    #[tokio::test]
    async fn test_conflict_local_newer_pending_wins() {
        let remote = MemoryRemote::new();
        // Keep the local edit pending so the push does not replace the remote row first.
        remote.fail_upsert_for(LOCAL_ID, "offline");
        remote
            .insert(
                SyncableTable::Customers,
                json!({"id": LOCAL_ID, "name": "Remote", "created_at": "2025-01-01", "updated_at": "2025-05-01"}),
            )
            .unwrap();
        let engine = engine_with(remote);
        pending_customer(&engine, "Local", "2025-06-01");

        let result = engine.process_sync().await.unwrap();

        assert_eq!(result.pulled, 0);
        let row = local(&engine, SyncableTable::Customers, LOCAL_ID);
        assert_eq!(row["name"], "Local");
        assert_eq!(row["updated_at"], "2025-06-01");
        assert_eq!(row["sync_status"], "pending");
    }

    #[tokio::test]
    async fn test_conflict_local_newer_survives_successful_push() {
        let remote = MemoryRemote::new();
        remote
            .insert(
                SyncableTable::Customers,
                json!({"id": LOCAL_ID, "name": "Remote", "created_at": "2025-01-01", "updated_at": "2025-05-01"}),
            )
            .unwrap();
        let engine = engine_with(remote);
        pending_customer(&engine, "Local", "2025-06-01");

        engine.process_sync().await.unwrap();

        assert_eq!(local(&engine, SyncableTable::Customers, LOCAL_ID)["name"], "Local");
        assert_eq!(
            engine.remote().unwrap().get(SyncableTable::Customers, LOCAL_ID).unwrap()["name"],
            "Local"
        );
    }

    #[tokio::test]
    async fn test_conflict_remote_newer_wins() {
        let remote = MemoryRemote::new();
        // Keep the local edit pending so the push does not replace the remote row first.
        remote.fail_upsert_for(LOCAL_ID, "offline");
        remote
            .insert(
                SyncableTable::Customers,
                json!({"id": LOCAL_ID, "name": "Remote", "phone": "555-0100", "created_at": "2025-01-01", "updated_at": "2025-06-01"}),
            )
            .unwrap();
        let engine = engine_with(remote);
        pending_customer(&engine, "Local", "2025-01-01");

        engine.process_sync().await.unwrap();

        let row = local(&engine, SyncableTable::Customers, LOCAL_ID);
        assert_eq!(row["name"], "Remote");
        assert_eq!(row["phone"], "555-0100");
        assert_eq!(row["updated_at"], "2025-06-01");
        assert_eq!(row["sync_status"], "synced");
        assert_eq!(row["sync_retry_count"], 0);
    }

    #[tokio::test]
    async fn test_remote_overwrite_clears_columns_the_remote_omits() {
        let remote = MemoryRemote::new();
        remote
            .insert(
                SyncableTable::Customers,
                json!({"id": LOCAL_ID, "name": "Remote", "created_at": "2025-01-01", "updated_at": "2025-06-01"}),
            )
            .unwrap();
        let engine = engine_with(remote);
        put_local(
            &engine,
            SyncableTable::Customers,
            json!({"id": LOCAL_ID, "name": "Local", "phone": "555-0100"}),
            "2025-01-01",
            SyncStatus::Synced,
            0,
        );

        let result = engine.process_sync().await.unwrap();

        assert_eq!(result.pulled, 1);
        let row = local(&engine, SyncableTable::Customers, LOCAL_ID);
        assert_eq!(row["name"], "Remote");
        assert!(row["phone"].is_null());
        assert_eq!(row["updated_at"], "2025-06-01");
        assert_eq!(row["sync_status"], "synced");
    }

    #[tokio::test]
    async fn test_equal_timestamps_resolve_to_remote() {
        let remote = MemoryRemote::new();
        // Keep the local edit pending so the push does not replace the remote row first.
        remote.fail_upsert_for(LOCAL_ID, "offline");
        remote
            .insert(
                SyncableTable::Customers,
                json!({"id": LOCAL_ID, "name": "Remote", "created_at": "2025-01-01", "updated_at": "2025-06-01T00:00:00.000Z"}),
            )
            .unwrap();
        let engine = engine_with(remote);
        pending_customer(&engine, "Local", "2025-06-01T00:00:00.000Z");

        engine.process_sync().await.unwrap();

        let row = local(&engine, SyncableTable::Customers, LOCAL_ID);
        assert_eq!(row["name"], "Remote");
        assert_eq!(row["sync_status"], "synced");
    }

    #[tokio::test]
    async fn test_synced_local_always_overwritten() {
        let remote = MemoryRemote::new();
        remote
            .insert(
                SyncableTable::Customers,
                json!({"id": LOCAL_ID, "name": "Remote", "created_at": "2020-01-01", "updated_at": "2020-01-01"}),
            )
            .unwrap();
        let engine = engine_with(remote);
        put_local(
            &engine,
            SyncableTable::Customers,
            json!({"id": LOCAL_ID, "name": "Local"}),
            "2030-01-01",
            SyncStatus::Synced,
            0,
        );

        let result = engine.process_sync().await.unwrap();

        assert_eq!(result.pushed, 0);
        assert_eq!(result.pulled, 1);
        assert_eq!(local(&engine, SyncableTable::Customers, LOCAL_ID)["name"], "Remote");
    }

    #[tokio::test]
    async fn test_watermark_advances_only_without_failures() {
        let remote = MemoryRemote::new();
        remote.fail_upserts("Network timeout");
        let engine = engine_with(remote);
        pending_customer(&engine, "Ada", "2025-06-01T00:00:00.000Z");

        let failed = engine.process_sync().await.unwrap();
        assert_eq!(failed.failed, 1);
        assert_eq!(watermark(&engine), None);

        engine.remote().unwrap().clear_failures();
        let clean = engine.process_sync().await.unwrap();
        assert_eq!(clean.failed, 0);
        assert!(watermark(&engine).is_some());
    }

    #[tokio::test]
    async fn test_watermark_not_moved_backwards_or_on_failure() {
        let engine = engine_with(MemoryRemote::new());
        engine.process_sync().await.unwrap();
        let first = watermark(&engine).unwrap();

        engine.remote().unwrap().fail_upserts("down");
        pending_customer(&engine, "Ada", "2025-06-01T00:00:00.000Z");
        engine.process_sync().await.unwrap();

        assert_eq!(watermark(&engine).unwrap(), first);
    }

    #[tokio::test]
    async fn test_fetch_failure_holds_watermark_but_other_tables_pull() {
        let remote = MemoryRemote::new();
        remote.fail_fetch_for(SyncableTable::Jobs, "rate limited");
        remote
            .insert(
                SyncableTable::PriceBookItems,
                json!({"id": "p1", "name": "Valve", "created_at": "2025-06-01", "updated_at": "2025-06-01"}),
            )
            .unwrap();
        let engine = engine_with(remote);

        let result = engine.process_sync().await.unwrap();

        assert_eq!(result.failed, 0);
        assert_eq!(result.pulled, 1);
        assert!(result.errors.contains(&"jobs: rate limited".to_string()));
        assert_eq!(watermark(&engine), None);
    }

    #[tokio::test]
    async fn test_malformed_remote_row_is_skipped() {
        let remote = MemoryRemote::new();
        remote
            .insert(
                SyncableTable::Customers,
                json!({"id": "bad", "name": "Bad", "updated_at": "last tuesday"}),
            )
            .unwrap();
        remote
            .insert(
                SyncableTable::Customers,
                json!({"id": "good", "name": "Good", "created_at": "2025-06-01", "updated_at": "2025-06-01"}),
            )
            .unwrap();
        remote
            .insert(
                SyncableTable::Jobs,
                json!({"id": "orphan", "customer_id": "nobody", "title": "Leak", "created_at": "2025-06-01", "updated_at": "2025-06-01"}),
            )
            .unwrap();
        let engine = engine_with(remote);

        let result = engine.process_sync().await.unwrap();

        assert_eq!(result.pulled, 1);
        assert_eq!(result.errors.len(), 2);
        assert!(result.errors.iter().any(|e| e.starts_with("customers/bad: ")));
        assert!(result.errors.iter().any(|e| e.starts_with("jobs/orphan: ")));
        assert!(lock(engine.storage())
            .unwrap()
            .get_record(SyncableTable::Customers, "bad")
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_second_cycle_is_idempotent() {
        let remote = MemoryRemote::new();
        remote
            .insert(
                SyncableTable::Customers,
                json!({"id": "c9", "name": "Remote", "created_at": "2025-01-01", "updated_at": "2025-01-01T00:00:00.000Z"}),
            )
            .unwrap();
        let engine = engine_with(remote);
        pending_customer(&engine, "Ada", "2025-06-01T00:00:00.000Z");

        let first = engine.process_sync().await.unwrap();
        assert_eq!(first.pushed, 1);
        assert!(first.pulled >= 1);

        let second = engine.process_sync().await.unwrap();
        assert_eq!(second.pushed, 0);
        assert_eq!(second.pulled, 0);
        assert!(second.is_clean());
    }

    #[tokio::test]
    async fn test_soft_delete_is_pushed_like_any_edit() {
        let engine = engine_with(MemoryRemote::new());
        pending_customer(&engine, "Ada", "2025-06-01T00:00:00.000Z");
        engine.process_sync().await.unwrap();

        lock(engine.storage())
            .unwrap()
            .soft_delete(SyncableTable::Customers, LOCAL_ID)
            .unwrap();
        assert_eq!(engine.pending_count().unwrap(), 1);

        let result = engine.process_sync().await.unwrap();

        assert_eq!(result.pushed, 1);
        let pushed = engine
            .remote()
            .unwrap()
            .get(SyncableTable::Customers, LOCAL_ID)
            .unwrap();
        assert!(pushed["deleted_at"].is_string());
        assert!(local(&engine, SyncableTable::Customers, LOCAL_ID)["deleted_at"].is_string());
    }

    #[tokio::test]
    async fn test_tables_pushed_in_dependency_order() {
        let engine = engine_with(MemoryRemote::new());
        pending_customer(&engine, "Ada", "2025-06-01T00:00:00.000Z");
        put_local(
            &engine,
            SyncableTable::Jobs,
            json!({"id": "j1", "customer_id": LOCAL_ID, "title": "Fix sink"}),
            "2025-06-01T00:00:00.000Z",
            SyncStatus::Pending,
            0,
        );

        let result = engine.process_sync().await.unwrap();

        assert_eq!(result.pushed, 2);
        assert_eq!(engine.pending_count().unwrap(), 0);
        let by_table = engine.pending_count_by_table().unwrap();
        assert!(by_table.values().all(|c| *c == 0));
    }

    #[tokio::test]
    async fn test_overlapping_cycles_are_serialized() {
        let engine = engine_with(MemoryRemote::new());
        pending_customer(&engine, "Ada", "2025-06-01T00:00:00.000Z");

        let (a, b) = tokio::join!(engine.process_sync(), engine.process_sync());
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!(a.pushed + b.pushed, 1);
        assert_eq!(engine.remote().unwrap().upsert_calls(), 1);
    }

    #[tokio::test]
    async fn test_mark_synced_through_engine() {
        let engine = engine_with(MemoryRemote::new());
        pending_customer(&engine, "Ada", "2025-06-01T00:00:00.000Z");

        engine.mark_synced(SyncableTable::Customers, LOCAL_ID).unwrap();

        assert_eq!(engine.pending_count().unwrap(), 0);
        assert!(matches!(
            engine.mark_synced(SyncableTable::Customers, "missing"),
            Err(Error::RecordNotFound { .. })
        ));
    }
}
