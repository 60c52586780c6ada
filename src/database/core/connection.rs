//! Database connection management
//!
//! This module provides the connection wrapper used by every helper.

use std::sync::{Mutex, MutexGuard};

use rusqlite::{Connection, OpenFlags, Rows};
use tracing::debug;

use crate::database::core::descriptor::{ConnectionDescriptor, Credentials};
use crate::database::core::statement::{Binder, GeneratedKeys, StatementExt};
use crate::error::{DbError, Result};

/// Lock-guarded database connection
///
/// `DbConnection` owns one engine connection behind a mutex. Each helper
/// method holds the lock for the whole statement or transaction, so threads
/// sharing a `DbConnection` (for example through an `Arc`) execute one after
/// the other instead of interleaving cursor or transaction state.
///
/// The lock is not reentrant. Callbacks must work through the `&Connection`
/// they are handed; calling back into a helper of the same `DbConnection`
/// from inside a callback deadlocks.
///
/// The engine connection is closed when the `DbConnection` is dropped.
pub struct DbConnection {
    conn: Mutex<Connection>,
    user: String,
}

impl DbConnection {
    /// Open a connection described by `descriptor` for the given account
    ///
    /// The descriptor's busy timeout and engine options are applied before
    /// the connection is returned.
    pub fn open(descriptor: &ConnectionDescriptor, credentials: &Credentials) -> Result<Self> {
        descriptor.validate()?;
        let target = descriptor.target();
        let flags = OpenFlags::default() | OpenFlags::SQLITE_OPEN_URI;
        let conn = Connection::open_with_flags(&target, flags).map_err(|e| {
            DbError::sqlite(
                format!("Failed to open database at '{}'", target.display()),
                e,
            )
        })?;
        debug!(
            "Opened connection to {} as {}",
            target.display(),
            credentials.user()
        );

        configure(&conn, descriptor)?;

        Ok(Self {
            conn: Mutex::new(conn),
            user: credentials.user().to_string(),
        })
    }

    /// Wrap an already open engine connection
    pub fn from_connection(conn: Connection, credentials: &Credentials) -> Self {
        Self {
            conn: Mutex::new(conn),
            user: credentials.user().to_string(),
        }
    }

    /// User this connection was opened for
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Take the connection lock for direct use of the engine connection
    pub fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| DbError::LockPoisoned)
    }

    pub fn into_inner(self) -> Result<Connection> {
        self.conn.into_inner().map_err(|_| DbError::LockPoisoned)
    }

    /// Run a query and hand the cursor to `process`
    pub fn query<T, P, R>(&self, sql: &str, prepare: P, process: R) -> Result<T>
    where
        P: FnOnce(&mut Binder) -> Result<()>,
        R: FnOnce(&mut Rows<'_>) -> Result<T>,
    {
        self.lock()?.query_with(sql, prepare, process)
    }

    /// Run an update and return the affected-row count
    pub fn update<P>(&self, sql: &str, prepare: P) -> Result<usize>
    where
        P: FnOnce(&mut Binder) -> Result<()>,
    {
        self.lock()?.update_with(sql, prepare)
    }

    /// Run an update in a transaction and process its generated keys
    pub fn update_with_keys<T, P, K>(&self, sql: &str, prepare: P, process: K) -> Result<T>
    where
        P: FnOnce(&mut Binder) -> Result<()>,
        K: FnOnce(usize, &GeneratedKeys) -> Result<T>,
    {
        self.lock()?.update_with_keys(sql, prepare, process)
    }

    /// Run a batch of parameter sets in one transaction
    pub fn batch_update<P>(&self, sql: &str, prepare: P) -> Result<Vec<usize>>
    where
        P: FnOnce(&mut Binder) -> Result<()>,
    {
        self.lock()?.batch_update(sql, prepare)
    }

    /// Run `work` in a transaction on this connection
    pub fn transaction<T, F>(&self, work: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        self.lock()?.transaction_with(work)
    }

    /// Execute one or more SQL statements without parameters
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        self.lock()?
            .execute_batch(sql)
            .map_err(|e| DbError::sqlite("Failed to execute SQL", e))
    }

    /// Check if a table or view exists (case-insensitive)
    pub fn table_exists(&self, table_name: &str) -> Result<bool> {
        table_exists(&*self.lock()?, table_name)
    }

    /// Get the row count for a table
    pub fn table_count(&self, table_name: &str) -> Result<u64> {
        let query = format!("SELECT COUNT(*) FROM \"{}\"", table_name.replace('"', "\"\""));
        self.lock()?
            .query_row(&query, [], |row| row.get(0))
            .map_err(|e| DbError::sqlite("Failed to get table count", e))
    }

    pub fn is_autocommit(&self) -> Result<bool> {
        Ok(self.lock()?.is_autocommit())
    }
}

/// Apply the busy timeout and engine options of `descriptor`
fn configure(conn: &Connection, descriptor: &ConnectionDescriptor) -> Result<()> {
    conn.busy_timeout(descriptor.busy_timeout())
        .map_err(|e| DbError::sqlite("Failed to set busy timeout", e))?;

    for (key, value) in descriptor.options() {
        // some pragmas (journal_mode) report the new value as a row
        conn.pragma(None, key, value, |_| Ok(()))
            .map_err(|e| DbError::sqlite(format!("Failed to set option {}={}", key, value), e))?;
    }

    Ok(())
}

/// Check if a table or view exists on a raw connection (case-insensitive)
pub(crate) fn table_exists(conn: &Connection, table_name: &str) -> Result<bool> {
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type IN ('table', 'view') AND name = ?1 COLLATE NOCASE",
            [table_name],
            |row| row.get(0),
        )
        .map_err(|e| DbError::sqlite("Failed to check table existence", e))?;
    Ok(count > 0)
}
