//! Sync value types.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::model::{SyncStatus, SyncableTable};

/// Rows with at least this many failed pushes are parked until reset.
pub const MAX_RETRY_COUNT: i64 = 5;

/// Base of the exponential per-record backoff.
pub const BASE_BACKOFF_MS: u64 = 1000;

/// Summary of one sync cycle. Not persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncResult {
    /// Rows accepted by the remote.
    pub pushed: usize,
    /// Remote rows written locally (inserted or overwritten).
    pub pulled: usize,
    /// Rows whose push failed this cycle.
    pub failed: usize,
    /// Human-readable failures, `"<table>/<id>: <message>"`.
    pub errors: Vec<String>,
}

impl SyncResult {
    /// Returns true if the cycle recorded no errors at all.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed == 0 && self.errors.is_empty()
    }
}

/// Tunables for the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOptions {
    /// Retry ceiling; rows at or above it are skipped by the push phase.
    pub max_retry_count: i64,
    /// Base delay for `backoff_delay`.
    pub base_backoff: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            max_retry_count: MAX_RETRY_COUNT,
            base_backoff: Duration::from_millis(BASE_BACKOFF_MS),
        }
    }
}

impl SyncOptions {
    /// Delay before re-pushing a row that has already failed `retry_count` times.
    ///
    /// `base × 2ⁿ`, saturating instead of overflowing for absurd counts.
    #[must_use]
    pub fn backoff_delay(&self, retry_count: u32) -> Duration {
        let factor = 2u32.checked_pow(retry_count).unwrap_or(u32::MAX);
        self.base_backoff.saturating_mul(factor)
    }
}

/// Delay with the default 1000 ms base: `0→1s, 1→2s, 2→4s, 3→8s`.
#[must_use]
pub fn backoff_delay(retry_count: u32) -> Duration {
    SyncOptions::default().backoff_delay(retry_count)
}

/// What the pull phase does with one remote row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeDecision {
    /// No local row: insert as synced.
    Insert,
    /// Remote wins: overwrite local columns, mark synced.
    Overwrite,
    /// Local pending edit is strictly newer: leave it for the next push.
    KeepLocal,
}

/// Sync-relevant state of an existing local row.
#[derive(Debug, Clone, Copy)]
pub struct LocalState {
    pub status: SyncStatus,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Last-write-wins on `updated_at`.
///
/// Only a pending local row with a strictly newer timestamp survives. Equal
/// timestamps go to the remote. A local timestamp that cannot be parsed never
/// wins.
#[must_use]
pub fn decide(local: Option<LocalState>, remote_updated_at: DateTime<Utc>) -> MergeDecision {
    match local {
        None => MergeDecision::Insert,
        Some(LocalState {
            status: SyncStatus::Pending,
            updated_at: Some(local_at),
        }) if local_at > remote_updated_at => MergeDecision::KeepLocal,
        Some(_) => MergeDecision::Overwrite,
    }
}

/// Snapshot of local sync state for display.
#[derive(Debug, Clone, Serialize)]
pub struct SyncStatusSummary {
    /// Pending rows per table, in processing order.
    pub pending_by_table: BTreeMap<SyncableTable, usize>,
    /// Sum of `pending_by_table`.
    pub total_pending: usize,
    /// Pending rows at or above the retry ceiling.
    pub parked: usize,
    /// Watermark of the last clean cycle, if any.
    pub last_sync_timestamp: Option<String>,
}
