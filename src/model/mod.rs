//! Data models for fieldsync.
//!
//! - `SyncableTable`: the closed set of synchronized tables
//! - `SyncStatus`: per-row `pending` / `synced` flag
//!
//! Rows themselves are schema-driven JSON objects (see [`crate::sync::Row`]),
//! so there is no per-entity struct here.

pub mod table;

pub use table::{SyncStatus, SyncableTable};
