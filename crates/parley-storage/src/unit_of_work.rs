//! Scoped unit of work.
//!
//! `Database::unit_of_work` runs a closure inside one SQLite transaction.
//! The transaction commits only if the closure returns `Ok`; an `Err`, an
//! early return through `?`, or a panic rolls every statement back, so the
//! store is left exactly as it was before the scope was entered.
//!
//! Scopes do not nest. Opening a second scope (or calling
//! `Database::with_conn`) on a thread that already holds one fails with
//! `ParleyError::NestedUnitOfWork`.

use std::cell::Cell;

use rusqlite::{Connection, Params, TransactionBehavior};
use tracing::{debug, warn};

use parley_core::error::ParleyError;

use crate::db::Database;

thread_local! {
    static ACTIVE: Cell<bool> = const { Cell::new(false) };
}

/// Whether the current thread is inside a unit of work.
pub(crate) fn is_active() -> bool {
    ACTIVE.with(|active| active.get())
}

/// Marks the current thread as inside a scope until dropped.
struct ActiveScope;

impl ActiveScope {
    fn enter() -> Result<Self, ParleyError> {
        if is_active() {
            return Err(ParleyError::NestedUnitOfWork);
        }
        ACTIVE.with(|active| active.set(true));
        Ok(ActiveScope)
    }
}

impl Drop for ActiveScope {
    fn drop(&mut self) {
        ACTIVE.with(|active| active.set(false));
    }
}

/// Map a store rejection inside a unit of work.
pub fn persistence_error(err: rusqlite::Error) -> ParleyError {
    ParleyError::Persistence(err.to_string())
}

/// Handle to the open transaction, passed to the unit-of-work closure.
pub struct UnitOfWork<'a> {
    conn: &'a Connection,
}

impl<'a> UnitOfWork<'a> {
    /// The transaction's connection, for queries that need a statement.
    pub fn conn(&self) -> &'a Connection {
        self.conn
    }

    /// Execute one statement, mapping failures to `Persistence`.
    pub fn execute<P: Params>(&self, sql: &str, params: P) -> Result<usize, ParleyError> {
        self.conn.execute(sql, params).map_err(persistence_error)
    }
}

impl Database {
    /// Run `f` as a single atomic unit of work.
    ///
    /// The write lock is taken up front (`BEGIN IMMEDIATE`) and released on
    /// every exit path. Keep the closure short: it serializes all writers.
    pub fn unit_of_work<F, T>(&self, f: F) -> Result<T, ParleyError>
    where
        F: FnOnce(&UnitOfWork<'_>) -> Result<T, ParleyError>,
    {
        let _scope = ActiveScope::enter()?;
        let mut conn = self.lock()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(persistence_error)?;

        // A panic inside `f` drops `tx`, which rolls back.
        let outcome = f(&UnitOfWork { conn: &tx });

        match outcome {
            Ok(value) => {
                tx.commit().map_err(|e| {
                    warn!(error = %e, "Unit of work commit failed");
                    persistence_error(e)
                })?;
                debug!("Unit of work committed");
                Ok(value)
            }
            Err(err) => {
                if let Err(e) = tx.rollback() {
                    warn!(error = %e, "Unit of work rollback failed");
                }
                debug!(error = %err, "Unit of work rolled back");
                Err(err)
            }
        }
    }
}
