//! Versioned schema migrations embedded at compile time.
//!
//! Each migration is an additive DDL batch tagged with the schema version it
//! produces. The applied version is stored in the `settings` table under
//! `schema_version`. All pending batches run inside one transaction whose
//! final statement records the new version, so a failure anywhere leaves
//! the stored version (and the schema) exactly as it was.

use rusqlite::Connection;
use serde::Serialize;
use tracing::info;

use super::schema::{SCHEMA_VERSION_KEY, ensure_settings, schema_version, set_setting};
use crate::error::{Error, Result};

/// A single migration with version number and SQL content.
pub struct Migration {
    pub version: i64,
    pub sql: &'static str,
}

/// All migrations in order.
///
/// Versions must be contiguous and ascending. Never edit a released entry;
/// append a new one instead.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        sql: r"
CREATE TABLE customers (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    email TEXT,
    phone TEXT,
    address TEXT,
    notes TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    deleted_at TEXT,
    sync_status TEXT NOT NULL DEFAULT 'pending' CHECK (sync_status IN ('pending', 'synced')),
    sync_retry_count INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE jobs (
    id TEXT PRIMARY KEY,
    customer_id TEXT NOT NULL REFERENCES customers(id),
    title TEXT NOT NULL,
    description TEXT,
    status TEXT NOT NULL DEFAULT 'scheduled',
    scheduled_at TEXT,
    completed_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    deleted_at TEXT,
    sync_status TEXT NOT NULL DEFAULT 'pending' CHECK (sync_status IN ('pending', 'synced')),
    sync_retry_count INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE estimates (
    id TEXT PRIMARY KEY,
    customer_id TEXT NOT NULL REFERENCES customers(id),
    job_id TEXT REFERENCES jobs(id),
    status TEXT NOT NULL DEFAULT 'draft',
    line_items TEXT NOT NULL DEFAULT '[]',
    subtotal_cents INTEGER NOT NULL DEFAULT 0,
    tax_cents INTEGER NOT NULL DEFAULT 0,
    total_cents INTEGER NOT NULL DEFAULT 0,
    valid_until TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    deleted_at TEXT,
    sync_status TEXT NOT NULL DEFAULT 'pending' CHECK (sync_status IN ('pending', 'synced')),
    sync_retry_count INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE invoices (
    id TEXT PRIMARY KEY,
    customer_id TEXT NOT NULL REFERENCES customers(id),
    job_id TEXT REFERENCES jobs(id),
    estimate_id TEXT REFERENCES estimates(id),
    number TEXT,
    status TEXT NOT NULL DEFAULT 'draft',
    line_items TEXT NOT NULL DEFAULT '[]',
    subtotal_cents INTEGER NOT NULL DEFAULT 0,
    tax_cents INTEGER NOT NULL DEFAULT 0,
    total_cents INTEGER NOT NULL DEFAULT 0,
    issued_at TEXT,
    paid_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    deleted_at TEXT,
    sync_status TEXT NOT NULL DEFAULT 'pending' CHECK (sync_status IN ('pending', 'synced')),
    sync_retry_count INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE price_book_items (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    description TEXT,
    category TEXT,
    unit TEXT NOT NULL DEFAULT 'each',
    unit_price_cents INTEGER NOT NULL DEFAULT 0,
    taxable INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    deleted_at TEXT,
    sync_status TEXT NOT NULL DEFAULT 'pending' CHECK (sync_status IN ('pending', 'synced')),
    sync_retry_count INTEGER NOT NULL DEFAULT 0
);
",
    },
    Migration {
        version: 2,
        sql: r"
CREATE INDEX idx_customers_sync ON customers(sync_status, sync_retry_count);
CREATE INDEX idx_jobs_sync ON jobs(sync_status, sync_retry_count);
CREATE INDEX idx_estimates_sync ON estimates(sync_status, sync_retry_count);
CREATE INDEX idx_invoices_sync ON invoices(sync_status, sync_retry_count);
CREATE INDEX idx_price_book_items_sync ON price_book_items(sync_status, sync_retry_count);

CREATE INDEX idx_customers_updated ON customers(updated_at);
CREATE INDEX idx_jobs_updated ON jobs(updated_at);
CREATE INDEX idx_estimates_updated ON estimates(updated_at);
CREATE INDEX idx_invoices_updated ON invoices(updated_at);
CREATE INDEX idx_price_book_items_updated ON price_book_items(updated_at);
CREATE INDEX idx_jobs_customer ON jobs(customer_id);
",
    },
    Migration {
        version: 3,
        sql: r"
ALTER TABLE jobs ADD COLUMN assigned_to TEXT;
ALTER TABLE invoices ADD COLUMN due_date TEXT;
",
    },
];

/// Schema version this build expects.
#[must_use]
pub fn target_version() -> i64 {
    MIGRATIONS.last().map_or(0, |m| m.version)
}

/// Versions before and after a migration run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MigrationOutcome {
    pub from: i64,
    pub to: i64,
}

impl MigrationOutcome {
    /// Returns true if any DDL ran.
    #[must_use]
    pub fn applied(&self) -> bool {
        self.to > self.from
    }
}

/// Bring the database up to [`target_version`].
///
/// No-op when the stored version is already at or beyond the target.
///
/// # Errors
///
/// Returns `Error::Migration` if any batch fails; the transaction is rolled
/// back and the stored version is unchanged.
pub fn run_migrations(conn: &mut Connection) -> Result<MigrationOutcome> {
    apply_migrations(conn, MIGRATIONS)
}

/// Apply the pending subset of `migrations`.
pub(crate) fn apply_migrations(
    conn: &mut Connection,
    migrations: &[Migration],
) -> Result<MigrationOutcome> {
    ensure_settings(conn)?;

    let current = schema_version(conn)?;
    let target = migrations.last().map_or(0, |m| m.version);

    if current >= target {
        return Ok(MigrationOutcome {
            from: current,
            to: current,
        });
    }

    info!(from = current, to = target, "Migrating schema");

    let tx = conn.transaction()?;
    for migration in migrations.iter().filter(|m| m.version > current) {
        info!(version = migration.version, "Applying migration");
        tx.execute_batch(migration.sql)
            .map_err(|e| Error::Migration {
                version: migration.version,
                message: e.to_string(),
            })?;
    }
    set_setting(&tx, SCHEMA_VERSION_KEY, &target.to_string()).map_err(|e| Error::Migration {
        version: target,
        message: e.to_string(),
    })?;
    tx.commit().map_err(|e| Error::Migration {
        version: target,
        message: e.to_string(),
    })?;

    info!(version = target, "Migration complete");

    Ok(MigrationOutcome {
        from: current,
        to: target,
    })
}
