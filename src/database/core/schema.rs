//! Table version management
//!
//! Every managed table has a recorded schema version in the `table_version`
//! bookkeeping table. [`SchemaManager::ensure_table_version`] compares the
//! recorded version with the one the caller's code expects and runs the
//! caller's upgrade routine exactly once per transition, inside the same
//! transaction that records the new version.
//!
//! The bookkeeping table is versioned through the same mechanism and is
//! bootstrapped before any other table is touched.
//!
//! Bootstrapping is not safe against a concurrent bootstrap of the same
//! database; open the database once at startup before sharing it.

use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use tracing::{debug, info};

use crate::database::core::connection::table_exists;
use crate::database::core::transaction::run_in_transaction;
use crate::error::{DbError, Result};

/// Name of the bookkeeping table
pub const VERSION_TABLE_NAME: &str = "table_version";

/// Version of the bookkeeping table itself
pub const VERSION_TABLE_VERSION: u32 = 1;

/// SQL used by the schema manager
pub struct SchemaDefinitions;

impl SchemaDefinitions {
    /// SQL for creating the bookkeeping table
    pub const VERSION_TABLE: &'static str = r#"
        CREATE TABLE IF NOT EXISTS table_version (
            name TEXT COLLATE NOCASE NOT NULL PRIMARY KEY,
            version INTEGER NOT NULL
        );
    "#;

    pub const SELECT_VERSION: &'static str = "SELECT version FROM table_version WHERE name = ?1";

    pub const UPSERT_VERSION: &'static str = r#"
        INSERT INTO table_version (name, version) VALUES (?1, ?2)
        ON CONFLICT(name) DO UPDATE SET version = excluded.version
    "#;

    pub const SELECT_ALL: &'static str = "SELECT name, version FROM table_version ORDER BY name";
}

/// Recorded version of one table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableVersion {
    pub name: String,
    pub version: u32,
}

/// Status of one table's schema relative to the version the caller expects
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaStatus {
    /// No version recorded, or the table no longer exists
    NotInitialized,

    /// Recorded version matches
    Current,

    /// Recorded version is older than required
    NeedsMigration { from: u32, to: u32 },

    /// Recorded version is newer than the calling code
    Incompatible {
        database_version: u32,
        required_version: u32,
    },
}

/// Schema manager for one connection
///
/// Operates directly on an engine connection; callers that share the
/// connection between threads must hold its lock for the manager's lifetime.
pub struct SchemaManager<'a> {
    conn: &'a Connection,
}

impl<'a> SchemaManager<'a> {
    /// Create a new schema manager for the given connection
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Create or upgrade the bookkeeping table
    pub fn initialize(&self) -> Result<()> {
        self.ensure_table_version(VERSION_TABLE_NAME, VERSION_TABLE_VERSION, |conn, current| {
            // later bookkeeping versions add their migrations here
            if current.is_none() {
                conn.execute_batch(SchemaDefinitions::VERSION_TABLE)
                    .map_err(|e| DbError::sqlite("Failed to create table_version table", e))?;
            }
            Ok(())
        })
    }

    /// Recorded version of `name`
    ///
    /// Returns `None` when the bookkeeping table does not exist yet, when no
    /// version is recorded, or when the table itself is gone.
    pub fn table_version(&self, name: &str) -> Result<Option<u32>> {
        if !table_exists(self.conn, VERSION_TABLE_NAME)? {
            return Ok(None);
        }
        if !table_exists(self.conn, name)? {
            return Ok(None);
        }

        self.conn
            .query_row(SchemaDefinitions::SELECT_VERSION, [name], |row| row.get(0))
            .optional()
            .map_err(|e| DbError::sqlite(format!("Failed to read version of table {}", name), e))
    }

    /// Compare the recorded version of `name` with `version`
    pub fn check_status(&self, name: &str, version: u32) -> Result<SchemaStatus> {
        let status = match self.table_version(name)? {
            None => SchemaStatus::NotInitialized,
            Some(current) if current == version => SchemaStatus::Current,
            Some(current) if current < version => SchemaStatus::NeedsMigration {
                from: current,
                to: version,
            },
            Some(current) => SchemaStatus::Incompatible {
                database_version: current,
                required_version: version,
            },
        };
        Ok(status)
    }

    /// Bring `name` to `version`, calling `upgrade` if it is behind
    ///
    /// `upgrade` receives the connection and the current recorded version
    /// (`None` means the table does not exist yet and must be created). The
    /// upgrade and the version update commit together; if either fails,
    /// both are rolled back and the error is returned.
    ///
    /// Fails with [`DbError::VersionConflict`] without calling `upgrade` when
    /// the recorded version is newer than `version`.
    pub fn ensure_table_version<F>(&self, name: &str, version: u32, upgrade: F) -> Result<()>
    where
        F: FnOnce(&Connection, Option<u32>) -> Result<()>,
    {
        if !name.eq_ignore_ascii_case(VERSION_TABLE_NAME)
            && !table_exists(self.conn, VERSION_TABLE_NAME)?
        {
            self.initialize()?;
        }

        let current = match self.check_status(name, version)? {
            SchemaStatus::Current => {
                debug!("Table {} is current at v{}", name, version);
                return Ok(());
            }
            SchemaStatus::Incompatible {
                database_version,
                required_version,
            } => {
                return Err(DbError::VersionConflict {
                    table: name.to_string(),
                    requested: required_version,
                    current: database_version,
                });
            }
            SchemaStatus::NeedsMigration { from, to } => {
                info!("Upgrading table {} from v{} to v{}", name, from, to);
                Some(from)
            }
            SchemaStatus::NotInitialized => {
                info!("Creating table {} at v{}", name, version);
                None
            }
        };

        run_in_transaction(self.conn, |conn| {
            upgrade(conn, current)?;
            set_version(conn, name, version)
        })
    }

    /// All recorded table versions, ordered by name
    pub fn recorded_versions(&self) -> Result<Vec<TableVersion>> {
        if !table_exists(self.conn, VERSION_TABLE_NAME)? {
            return Ok(Vec::new());
        }

        let mut stmt = self
            .conn
            .prepare(SchemaDefinitions::SELECT_ALL)
            .map_err(|e| DbError::sqlite("Failed to list table versions", e))?;
        let rows = stmt
            .query_map([], |row| {
                Ok(TableVersion {
                    name: row.get(0)?,
                    version: row.get(1)?,
                })
            })
            .map_err(|e| DbError::sqlite("Failed to list table versions", e))?;

        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| DbError::sqlite("Failed to list table versions", e))
    }
}

fn set_version(conn: &Connection, name: &str, version: u32) -> Result<()> {
    conn.execute(
        SchemaDefinitions::UPSERT_VERSION,
        rusqlite::params![name, version],
    )
    .map_err(|e| DbError::sqlite(format!("Failed to record version of table {}", name), e))?;
    Ok(())
}
