//! Offline-first sync with a remote record store.
//!
//! Every local mutation marks its row `pending`. A sync cycle pushes pending
//! rows to the remote, then pulls remote rows changed since the last
//! successful cycle and merges them last-write-wins on `updated_at`.
//!
//! - [`engine`] - Push/pull cycle, backoff, watermark
//! - [`status`] - Pending counts and manual overrides
//! - [`remote`] - Remote service trait and backends
//! - [`columns`] - Column introspection and value conversion
//! - [`timestamp`] - Canonical timestamp format and comparison
//!
//! # Example
//!
//! ```ignore
//! use fieldsync::storage::StoreManager;
//! use fieldsync::sync::{RestRemote, SyncEngine};
//!
//! let storage = StoreManager::new(&db_path).open()?;
//! let engine = SyncEngine::new(storage, Some(RestRemote::new(&settings)?));
//! let result = engine.process_sync().await?;
//! println!("pushed {} pulled {} failed {}", result.pushed, result.pulled, result.failed);
//! ```

pub mod columns;
pub mod engine;
pub mod remote;
pub mod status;
pub mod timestamp;
mod types;

pub use columns::{ColumnSet, Row};
pub use engine::{REMOTE_NOT_CONFIGURED, SyncEngine};
pub use remote::{MemoryRemote, RemoteError, RemoteService, RestRemote};
pub use status::{get_sync_status, print_status};
pub use types::{
    BASE_BACKOFF_MS, LocalState, MAX_RETRY_COUNT, MergeDecision, SyncOptions, SyncResult,
    SyncStatusSummary, backoff_delay, decide,
};
