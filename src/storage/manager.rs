//! Owned connection lifecycle.
//!
//! `StoreManager` hands out one shared storage handle per database. It is an
//! explicit value the application owns and passes around, not a global:
//! whoever holds the manager decides the lifetime of the connection.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::storage::sqlite::SqliteStorage;

/// Storage shared between the engine, the status tracker and callers.
///
/// Locks are held only for synchronous store access, never across an await.
pub type SharedStorage = Arc<Mutex<SqliteStorage>>;

/// Lock a shared storage handle.
///
/// # Errors
///
/// Returns `Error::Other` if a previous holder panicked mid-write.
pub fn lock(storage: &SharedStorage) -> Result<std::sync::MutexGuard<'_, SqliteStorage>> {
    storage
        .lock()
        .map_err(|_| Error::Other("Storage lock poisoned".into()))
}

#[derive(Debug, Clone)]
enum Location {
    File(PathBuf),
    Memory,
}

/// Lazily opened, shared connection to one database.
#[derive(Debug)]
pub struct StoreManager {
    location: Location,
    slot: Mutex<Option<SharedStorage>>,
}

impl StoreManager {
    /// Manage the database at `path`. Nothing is opened yet.
    #[must_use]
    pub fn new(path: &Path) -> Self {
        Self {
            location: Location::File(path.to_path_buf()),
            slot: Mutex::new(None),
        }
    }

    /// Manage a private in-memory database (for testing).
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            location: Location::Memory,
            slot: Mutex::new(None),
        }
    }

    /// Return the open handle, opening and migrating the store first if needed.
    ///
    /// Concurrent callers always observe the same handle.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be opened or migrated; the slot
    /// stays empty in that case.
    pub fn open(&self) -> Result<SharedStorage> {
        let mut slot = self
            .slot
            .lock()
            .map_err(|_| Error::Other("Store manager lock poisoned".into()))?;

        if let Some(existing) = slot.as_ref() {
            debug!("Reusing open store");
            return Ok(Arc::clone(existing));
        }

        let storage = match &self.location {
            Location::File(path) => {
                info!(path = %path.display(), "Opening store");
                SqliteStorage::open(path)?
            }
            Location::Memory => SqliteStorage::open_memory()?,
        };

        let shared = Arc::new(Mutex::new(storage));
        *slot = Some(Arc::clone(&shared));
        Ok(shared)
    }

    /// Release the manager's handle so the next [`Self::open`] starts fresh.
    ///
    /// The connection closes once every outstanding clone is dropped.
    pub fn close(&self) {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.take().is_some() {
            info!("Store closed");
        }
    }

    /// Returns true if a handle is currently held.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.slot
            .lock()
            .map(|slot| slot.is_some())
            .unwrap_or(false)
    }
}
