//! SQLite storage layer for fieldsync.
//!
//! This module provides the persistence layer using SQLite with:
//! - WAL mode and foreign-key enforcement
//! - Versioned, transactional schema migrations
//! - A settings key-value surface (schema version, sync watermark)
//! - An owned, shareable connection handle
//!
//! # Submodules
//!
//! - [`schema`] - Pragmas and the settings table
//! - [`migrations`] - Versioned DDL batches
//! - [`sqlite`] - Main SQLite storage implementation
//! - [`manager`] - Connection lifecycle (`open` / `close`)

pub mod manager;
pub mod migrations;
pub mod schema;
pub mod sqlite;

pub use manager::{SharedStorage, StoreManager, lock};
pub use migrations::{MigrationOutcome, target_version};
pub use sqlite::SqliteStorage;
