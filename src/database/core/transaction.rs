//! Transaction scope that restores the connection's commit mode
//!
//! A [`TxScope`] starts a real transaction when the connection is in
//! auto-commit mode, and a savepoint when a transaction is already open.
//! Either way, finishing the scope (commit or rollback) leaves the connection
//! in exactly the mode it was in before.

use rusqlite::Connection;
use tracing::warn;

use crate::error::{DbError, Result};

const SAVEPOINT_NAME: &str = "dbhelper_tx";

/// Open unit of work on a connection
///
/// Dropping the scope without calling [`TxScope::commit`] rolls it back.
pub struct TxScope<'c> {
    conn: &'c Connection,
    nested: bool,
    finished: bool,
}

impl<'c> TxScope<'c> {
    /// Begin a transaction, or a savepoint if one is already running
    pub fn begin(conn: &'c Connection) -> Result<Self> {
        let nested = !conn.is_autocommit();
        let sql = if nested {
            format!("SAVEPOINT {}", SAVEPOINT_NAME)
        } else {
            "BEGIN".to_string()
        };
        conn.execute_batch(&sql)
            .map_err(|e| DbError::sqlite("Failed to begin transaction", e))?;

        Ok(Self {
            conn,
            nested,
            finished: false,
        })
    }

    /// Whether this scope runs inside an outer transaction
    pub fn is_nested(&self) -> bool {
        self.nested
    }

    pub fn connection(&self) -> &'c Connection {
        self.conn
    }

    pub fn commit(mut self) -> Result<()> {
        let sql = if self.nested {
            format!("RELEASE {}", SAVEPOINT_NAME)
        } else {
            "COMMIT".to_string()
        };
        self.conn
            .execute_batch(&sql)
            .map_err(|e| DbError::sqlite("Failed to commit transaction", e))?;
        self.finished = true;
        Ok(())
    }

    pub fn rollback(mut self) -> Result<()> {
        self.finished = true;
        self.do_rollback()
    }

    fn do_rollback(&self) -> Result<()> {
        // the engine may already have rolled back on its own after a hard error
        if !self.nested && self.conn.is_autocommit() {
            return Ok(());
        }
        let sql = if self.nested {
            format!("ROLLBACK TO {0}; RELEASE {0}", SAVEPOINT_NAME)
        } else {
            "ROLLBACK".to_string()
        };
        self.conn
            .execute_batch(&sql)
            .map_err(|e| DbError::sqlite("Failed to roll back transaction", e))
    }
}

impl Drop for TxScope<'_> {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = self.do_rollback() {
                warn!("Ignoring rollback failure: {}", e);
            }
        }
    }
}

/// Run `work` inside a [`TxScope`], committing on success
///
/// Any error from `work` or from the commit rolls the scope back before it
/// is returned.
pub fn run_in_transaction<T, F>(conn: &Connection, work: F) -> Result<T>
where
    F: FnOnce(&Connection) -> Result<T>,
{
    let scope = TxScope::begin(conn)?;
    let value = work(scope.connection())?;
    scope.commit()?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute("CREATE TABLE t (id INTEGER PRIMARY KEY)", [])
            .unwrap();
        conn
    }

    fn count(conn: &Connection) -> i64 {
        conn.query_row("SELECT COUNT(*) FROM t", [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn test_commit_restores_autocommit() {
        let conn = setup();
        let scope = TxScope::begin(&conn).unwrap();
        assert!(!scope.is_nested());
        assert!(!conn.is_autocommit());
        conn.execute("INSERT INTO t (id) VALUES (1)", []).unwrap();
        scope.commit().unwrap();

        assert!(conn.is_autocommit());
        assert_eq!(count(&conn), 1);
    }

    #[test]
    fn test_drop_rolls_back() {
        let conn = setup();
        {
            let _scope = TxScope::begin(&conn).unwrap();
            conn.execute("INSERT INTO t (id) VALUES (1)", []).unwrap();
        }
        assert!(conn.is_autocommit());
        assert_eq!(count(&conn), 0);
    }

    #[test]
    fn test_explicit_rollback() {
        let conn = setup();
        let scope = TxScope::begin(&conn).unwrap();
        conn.execute("INSERT INTO t (id) VALUES (1)", []).unwrap();
        scope.rollback().unwrap();

        assert!(conn.is_autocommit());
        assert_eq!(count(&conn), 0);
    }

    #[test]
    fn test_nested_rollback_keeps_outer() {
        let conn = setup();
        let outer = TxScope::begin(&conn).unwrap();
        conn.execute("INSERT INTO t (id) VALUES (1)", []).unwrap();

        let result: Result<()> = run_in_transaction(&conn, |c| {
            c.execute("INSERT INTO t (id) VALUES (2)", [])?;
            Err(DbError::callback("boom"))
        });
        assert!(result.is_err());

        // still inside the outer transaction
        assert!(!conn.is_autocommit());
        outer.commit().unwrap();
        assert_eq!(count(&conn), 1);
    }

    #[test]
    fn test_run_in_transaction_commits() {
        let conn = setup();
        let inserted = run_in_transaction(&conn, |c| {
            c.execute("INSERT INTO t (id) VALUES (1), (2)", [])
                .map_err(DbError::from)
        })
        .unwrap();
        assert_eq!(inserted, 2);
        assert_eq!(count(&conn), 2);
        assert!(conn.is_autocommit());
    }
}
