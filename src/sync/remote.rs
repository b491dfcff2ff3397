//! Remote sync service.
//!
//! The engine treats the remote as a plain keyed record store with two
//! operations per table: upsert a row by `id`, and list rows whose
//! `updated_at` is after a watermark.
//!
//! - [`RestRemote`] talks to a PostgREST-style HTTP endpoint.
//! - [`MemoryRemote`] keeps everything in process, with failure injection.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use serde_json::Value;

use crate::config::RemoteSettings;
use crate::error::{Error, Result};
use crate::model::SyncableTable;
use crate::sync::columns::Row;
use crate::sync::timestamp;

/// Failure reported by the remote service.
///
/// `Display` is the bare message so it can be embedded in per-record
/// error strings.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    /// Transport-level failure (connect, timeout, TLS).
    #[error("{0}")]
    Request(String),

    /// Non-success HTTP status.
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// Response body could not be decoded.
    #[error("{0}")]
    Decode(String),
}

/// Trait for remote sync backends.
pub trait RemoteService: Send + Sync {
    /// Insert or replace one row, keyed by its `id`.
    fn upsert(
        &self,
        table: SyncableTable,
        payload: &Row,
    ) -> impl std::future::Future<Output = std::result::Result<(), RemoteError>> + Send;

    /// Every row with `updated_at` strictly after `since` (all rows when `None`).
    ///
    /// Rows are returned undecoded; shape validation is the caller's job so a
    /// single malformed row does not fail the whole table.
    fn fetch_since(
        &self,
        table: SyncableTable,
        since: Option<&str>,
    ) -> impl std::future::Future<Output = std::result::Result<Vec<Value>, RemoteError>> + Send;
}

// ── REST ──────────────────────────────────────────────────────

/// PostgREST-style remote.
pub struct RestRemote {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl RestRemote {
    /// Create a client from resolved settings.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the URL is empty or the HTTP client cannot
    /// be built.
    pub fn new(settings: &RemoteSettings) -> Result<Self> {
        let base_url = settings.url.trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(Error::Config("Remote URL is empty".into()));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url,
            api_key: settings.api_key.clone(),
        })
    }

    fn table_url(&self, table: SyncableTable) -> String {
        format!("{}/rest/v1/{}", self.base_url, table.as_str())
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.header("apikey", key).bearer_auth(key),
            None => request,
        }
    }
}

/// Build the PostgREST query for an incremental fetch.
fn fetch_query(since: Option<&str>) -> Vec<(&'static str, String)> {
    let mut query = vec![
        ("select", "*".to_string()),
        ("order", "updated_at.asc".to_string()),
    ];
    if let Some(since) = since {
        query.push(("updated_at", format!("gt.{since}")));
    }
    query
}

async fn check_status(
    response: reqwest::Response,
) -> std::result::Result<reqwest::Response, RemoteError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(RemoteError::Status {
        status: status.as_u16(),
        body,
    })
}

impl RemoteService for RestRemote {
    async fn upsert(
        &self,
        table: SyncableTable,
        payload: &Row,
    ) -> std::result::Result<(), RemoteError> {
        let request = self
            .client
            .post(self.table_url(table))
            .query(&[("on_conflict", "id")])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&[payload]);

        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| RemoteError::Request(e.to_string()))?;

        check_status(response).await?;
        Ok(())
    }

    async fn fetch_since(
        &self,
        table: SyncableTable,
        since: Option<&str>,
    ) -> std::result::Result<Vec<Value>, RemoteError> {
        let request = self
            .client
            .get(self.table_url(table))
            .query(&fetch_query(since));

        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| RemoteError::Request(e.to_string()))?;

        check_status(response)
            .await?
            .json::<Vec<Value>>()
            .await
            .map_err(|e| RemoteError::Decode(format!("Failed to parse {table} rows: {e}")))
    }
}

// ── In-memory ─────────────────────────────────────────────────

#[derive(Debug, Default)]
struct MemoryState {
    tables: HashMap<SyncableTable, BTreeMap<String, Value>>,
    upsert_failure: Option<String>,
    failing_ids: HashMap<String, String>,
    fetch_failures: HashMap<SyncableTable, String>,
    upsert_calls: usize,
}

/// In-process remote.
///
/// Stores rows as given and filters by `updated_at`. Failures can be injected
/// for all upserts, for specific ids, or for a table's fetch.
#[derive(Debug, Default)]
pub struct MemoryRemote {
    state: Mutex<MemoryState>,
}

impl MemoryRemote {
    /// Create an empty remote.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Seed a row as if another device had pushed it.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidArgument` if `row` has no string `id`.
    pub fn insert(&self, table: SyncableTable, row: Value) -> Result<()> {
        let id = row
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| Error::InvalidArgument(format!("Seeded {table} row has no id")))?;
        self.state().tables.entry(table).or_default().insert(id, row);
        Ok(())
    }

    /// Look up a stored row.
    #[must_use]
    pub fn get(&self, table: SyncableTable, id: &str) -> Option<Value> {
        self.state().tables.get(&table).and_then(|t| t.get(id).cloned())
    }

    /// Number of rows stored for a table.
    #[must_use]
    pub fn len(&self, table: SyncableTable) -> usize {
        self.state().tables.get(&table).map_or(0, BTreeMap::len)
    }

    /// Returns true if no table holds any rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state().tables.values().all(BTreeMap::is_empty)
    }

    /// Make every upsert fail with `message`.
    pub fn fail_upserts(&self, message: &str) {
        self.state().upsert_failure = Some(message.to_string());
    }

    /// Make upserts of one id fail with `message`.
    pub fn fail_upsert_for(&self, id: &str, message: &str) {
        self.state()
            .failing_ids
            .insert(id.to_string(), message.to_string());
    }

    /// Make fetches of one table fail with `message`.
    pub fn fail_fetch_for(&self, table: SyncableTable, message: &str) {
        self.state()
            .fetch_failures
            .insert(table, message.to_string());
    }

    /// Remove all injected failures.
    pub fn clear_failures(&self) {
        let mut state = self.state();
        state.upsert_failure = None;
        state.failing_ids.clear();
        state.fetch_failures.clear();
    }

    /// Number of upsert attempts seen, successful or not.
    #[must_use]
    pub fn upsert_calls(&self) -> usize {
        self.state().upsert_calls
    }
}

impl RemoteService for MemoryRemote {
    async fn upsert(
        &self,
        table: SyncableTable,
        payload: &Row,
    ) -> std::result::Result<(), RemoteError> {
        let mut state = self.state();
        state.upsert_calls += 1;

        let id = payload
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| RemoteError::Request("payload has no id".into()))?
            .to_string();

        if let Some(message) = state
            .upsert_failure
            .clone()
            .or_else(|| state.failing_ids.get(&id).cloned())
        {
            return Err(RemoteError::Request(message));
        }

        state
            .tables
            .entry(table)
            .or_default()
            .insert(id, Value::Object(payload.clone()));
        Ok(())
    }

    async fn fetch_since(
        &self,
        table: SyncableTable,
        since: Option<&str>,
    ) -> std::result::Result<Vec<Value>, RemoteError> {
        let state = self.state();
        if let Some(message) = state.fetch_failures.get(&table) {
            return Err(RemoteError::Request(message.clone()));
        }

        let mut rows: Vec<Value> = state
            .tables
            .get(&table)
            .map(|t| {
                t.values()
                    .filter(|row| {
                        since.is_none()
                            || row
                                .get("updated_at")
                                .and_then(Value::as_str)
                                .is_some_and(|at| timestamp::is_after(at, since))
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        rows.sort_by(|a, b| {
            let key = |v: &Value| v.get("updated_at").and_then(Value::as_str).map(str::to_string);
            key(a).cmp(&key(b))
        });
        Ok(rows)
    }
}
