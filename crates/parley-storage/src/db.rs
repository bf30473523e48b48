//! Database connection management.
//!
//! Wraps a single rusqlite Connection in a Mutex for thread-safe access.
//! Configures WAL mode and recommended PRAGMAs on initialization.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::Connection;
use tracing::{info, warn};

use parley_core::error::ParleyError;

use crate::migrations;
use crate::unit_of_work;

/// Thread-safe SQLite database wrapper.
///
/// Uses WAL mode so readers on other processes never block the writer.
/// The connection is wrapped in a Mutex since rusqlite Connection is not Sync.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) a database at the given path.
    ///
    /// Configures WAL mode, synchronous=NORMAL, foreign keys, the busy
    /// timeout, and runs all pending migrations.
    pub fn new(path: &Path, busy_timeout: Duration) -> Result<Self, ParleyError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)
            .map_err(|e| ParleyError::Storage(format!("Failed to open database: {}", e)))?;

        conn.busy_timeout(busy_timeout)
            .map_err(|e| ParleyError::Storage(format!("Failed to set busy timeout: {}", e)))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;
             PRAGMA cache_size = -16384;",
        )
        .map_err(|e| ParleyError::Storage(format!("Failed to set pragmas: {}", e)))?;

        info!("Database opened at {}", path.display());

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.with_conn(migrations::run_migrations)?;
        Ok(db)
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self, ParleyError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| ParleyError::Storage(format!("Failed to open in-memory db: {}", e)))?;

        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(|e| ParleyError::Storage(format!("Failed to set pragmas: {}", e)))?;

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.with_conn(migrations::run_migrations)?;
        Ok(db)
    }

    /// Execute a closure with a reference to the underlying connection.
    ///
    /// Used for reads and for single-statement writes. The mutex is held for
    /// the duration of the closure. Calling this from inside a unit of work
    /// fails with `NestedUnitOfWork` instead of deadlocking.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, ParleyError>
    where
        F: FnOnce(&Connection) -> Result<T, ParleyError>,
    {
        if unit_of_work::is_active() {
            return Err(ParleyError::NestedUnitOfWork);
        }
        let conn = self.lock()?;
        f(&conn)
    }

    /// Take the connection lock.
    ///
    /// A panic while the lock was held poisons it. The connection is still
    /// usable once any transaction the panic abandoned is rolled back, so the
    /// guard is recovered rather than failing every later call.
    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, Connection>, ParleyError> {
        match self.conn.lock() {
            Ok(guard) => Ok(guard),
            Err(poisoned) => {
                warn!("Recovering database lock after a panic");
                self.conn.clear_poison();
                let guard = poisoned.into_inner();
                if !guard.is_autocommit() {
                    guard.execute_batch("ROLLBACK").map_err(|e| {
                        ParleyError::Storage(format!("Rollback after panic failed: {}", e))
                    })?;
                }
                Ok(guard)
            }
        }
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish()
    }
}
