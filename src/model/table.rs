//! Syncable table registry.
//!
//! The engine only ever touches tables in this closed set. Names are
//! interpolated into SQL, so every identifier that reaches a statement
//! must come from here.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// One of the tables that participate in synchronization.
///
/// Variant order is the order in which tables are pushed and pulled.
/// Parents come before children so pulled rows find their foreign keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncableTable {
    Customers,
    Jobs,
    Estimates,
    Invoices,
    PriceBookItems,
}

impl SyncableTable {
    /// All syncable tables in processing order.
    pub const ALL: [Self; 5] = [
        Self::Customers,
        Self::Jobs,
        Self::Estimates,
        Self::Invoices,
        Self::PriceBookItems,
    ];

    /// Table name as it appears in the local store and on the remote.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Customers => "customers",
            Self::Jobs => "jobs",
            Self::Estimates => "estimates",
            Self::Invoices => "invoices",
            Self::PriceBookItems => "price_book_items",
        }
    }

    /// Parse a table name.
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownTable` for names outside the syncable set.
    pub fn parse(name: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == name)
            .ok_or_else(|| Error::UnknownTable {
                name: name.to_string(),
            })
    }
}

impl std::fmt::Display for SyncableTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SyncableTable {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Per-row synchronization flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// Local mutation not yet accepted by the remote.
    Pending,
    /// Row matches what the remote last acknowledged or sent.
    Synced,
}

impl SyncStatus {
    /// Get the string representation for storage.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Synced => "synced",
        }
    }

    /// Parse from the stored string. Anything unrecognised counts as pending,
    /// so a row is never silently skipped by the push phase.
    #[must_use]
    pub fn from_str(s: &str) -> Self {
        match s {
            "synced" => Self::Synced,
            _ => Self::Pending,
        }
    }
}

impl Default for SyncStatus {
    fn default() -> Self {
        Self::Pending
    }
}
