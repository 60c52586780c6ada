//! Database entry point
//!
//! [`Database`] knows how to open connections to one store and offers every
//! statement helper in a form that opens its own connection, runs, and closes
//! the connection again on every exit path.

use std::path::Path;

use rusqlite::{Connection, Rows};
use tracing::info;

use crate::config::DatabaseConfig;
use crate::database::core::{
    Binder, ConnectionDescriptor, Credentials, DbConnection, GeneratedKeys, SchemaManager,
    TableVersion,
};
use crate::error::Result;

/// Connection provider and versioned table manager for one database
///
/// Construction bootstraps the `table_version` bookkeeping table, so every
/// other table can be versioned with [`Database::ensure_table_version`]
/// right away. Construct once at startup; bootstrapping the same store from
/// two places at the same time is not supported.
pub struct Database {
    descriptor: ConnectionDescriptor,
    credentials: Credentials,
    // keeps a shared in-memory store alive between operations
    _anchor: Option<DbConnection>,
}

impl Database {
    /// Open the database described by `descriptor` with the default account
    pub fn open(descriptor: ConnectionDescriptor) -> Result<Self> {
        Self::open_with_credentials(descriptor, Credentials::default())
    }

    /// Open the database described by `descriptor` as `credentials`
    pub fn open_with_credentials(
        descriptor: ConnectionDescriptor,
        credentials: Credentials,
    ) -> Result<Self> {
        descriptor.validate()?;
        descriptor.ensure_parent_dir()?;

        let anchor = if descriptor.is_memory() {
            Some(DbConnection::open(&descriptor, &credentials)?)
        } else {
            None
        };

        let db = Self {
            descriptor,
            credentials,
            _anchor: anchor,
        };
        db.with_connection(|conn| SchemaManager::new(&*conn.lock()?).initialize())?;
        info!("Opened database {}", db.descriptor);

        Ok(db)
    }

    /// Open a database from a raw connection string
    ///
    /// Accepts a file path, `:memory:`, or a SQLite `file:` URI.
    pub fn from_url(url: &str) -> Result<Self> {
        Self::open(ConnectionDescriptor::parse(url)?)
    }

    /// Open a database file, creating its directory if needed
    ///
    /// `options` are applied on top of the default file options; `admin`
    /// replaces the default account.
    pub fn open_path(
        path: impl AsRef<Path>,
        options: Option<&[(&str, &str)]>,
        admin: Option<Credentials>,
    ) -> Result<Self> {
        let mut descriptor = ConnectionDescriptor::for_path(path);
        if let Some(options) = options {
            descriptor = descriptor.with_options(options.iter().copied());
        }
        Self::open_with_credentials(descriptor, admin.unwrap_or_default())
    }

    /// Create a private in-memory database
    pub fn open_in_memory() -> Result<Self> {
        Self::open(ConnectionDescriptor::in_memory())
    }

    /// Create or attach to a named in-memory database
    pub fn open_in_memory_named(name: &str) -> Result<Self> {
        Self::open(ConnectionDescriptor::in_memory_named(name)?)
    }

    /// Open the database described by a loaded configuration
    pub fn from_config(config: &DatabaseConfig) -> Result<Self> {
        Self::open_with_credentials(config.descriptor(), config.credentials()?)
    }

    pub fn descriptor(&self) -> &ConnectionDescriptor {
        &self.descriptor
    }

    /// Credentials used by operations that open their own connection
    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Set the account used by operations that open their own connection
    pub fn set_credentials(&mut self, user: &str, password: &str) -> Result<()> {
        self.credentials = Credentials::new(user, password)?;
        Ok(())
    }

    /// Revert to the built-in default account
    pub fn clear_credentials(&mut self) {
        self.credentials = Credentials::default();
    }

    /// Open a new connection with the current credentials
    pub fn connect(&self) -> Result<DbConnection> {
        DbConnection::open(&self.descriptor, &self.credentials)
    }

    /// Open a new connection as a specific account
    pub fn connect_as(&self, credentials: &Credentials) -> Result<DbConnection> {
        DbConnection::open(&self.descriptor, credentials)
    }

    /// Run `work` on a fresh connection that is closed afterwards
    pub fn with_connection<T, F>(&self, work: F) -> Result<T>
    where
        F: FnOnce(&DbConnection) -> Result<T>,
    {
        let conn = self.connect()?;
        work(&conn)
    }

    /// Bring table `name` to `version`, calling `upgrade` if it is behind
    ///
    /// See [`SchemaManager::ensure_table_version`].
    pub fn ensure_table_version<F>(&self, name: &str, version: u32, upgrade: F) -> Result<()>
    where
        F: FnOnce(&Connection, Option<u32>) -> Result<()>,
    {
        self.with_connection(|conn| {
            SchemaManager::new(&*conn.lock()?).ensure_table_version(name, version, upgrade)
        })
    }

    /// Recorded version of table `name`, if any
    pub fn table_version(&self, name: &str) -> Result<Option<u32>> {
        self.with_connection(|conn| SchemaManager::new(&*conn.lock()?).table_version(name))
    }

    /// All recorded table versions
    pub fn recorded_versions(&self) -> Result<Vec<TableVersion>> {
        self.with_connection(|conn| SchemaManager::new(&*conn.lock()?).recorded_versions())
    }

    /// Run a query on a fresh connection
    pub fn query<T, P, R>(&self, sql: &str, prepare: P, process: R) -> Result<T>
    where
        P: FnOnce(&mut Binder) -> Result<()>,
        R: FnOnce(&mut Rows<'_>) -> Result<T>,
    {
        self.with_connection(|conn| conn.query(sql, prepare, process))
    }

    /// Run an update on a fresh connection
    pub fn update<P>(&self, sql: &str, prepare: P) -> Result<usize>
    where
        P: FnOnce(&mut Binder) -> Result<()>,
    {
        self.with_connection(|conn| conn.update(sql, prepare))
    }

    /// Run an update with generated keys on a fresh connection
    pub fn update_with_keys<T, P, K>(&self, sql: &str, prepare: P, process: K) -> Result<T>
    where
        P: FnOnce(&mut Binder) -> Result<()>,
        K: FnOnce(usize, &GeneratedKeys) -> Result<T>,
    {
        self.with_connection(|conn| conn.update_with_keys(sql, prepare, process))
    }

    /// Run a batch update on a fresh connection
    pub fn batch_update<P>(&self, sql: &str, prepare: P) -> Result<Vec<usize>>
    where
        P: FnOnce(&mut Binder) -> Result<()>,
    {
        self.with_connection(|conn| conn.batch_update(sql, prepare))
    }

    /// Run `work` in a transaction on a fresh connection
    pub fn transaction<T, F>(&self, work: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        self.with_connection(|conn| conn.transaction(work))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::core::{no_params, StatementExt, VERSION_TABLE_NAME};
    use crate::error::DbError;
    use std::cell::Cell;
    use std::sync::Arc;
    use std::thread;

    fn create_items(conn: &Connection, current: Option<u32>) -> Result<()> {
        if current.is_none() {
            conn.update_with(
                "CREATE TABLE items (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT NOT NULL UNIQUE)",
                no_params,
            )?;
        }
        Ok(())
    }

    fn item_names(db: &Database) -> Vec<String> {
        db.query("SELECT name FROM items ORDER BY id", no_params, |rows| {
            let mut names = Vec::new();
            while let Some(row) = rows.next()? {
                names.push(row.get(0)?);
            }
            Ok(names)
        })
        .unwrap()
    }

    #[test]
    fn test_open_in_memory_bootstraps() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.table_version(VERSION_TABLE_NAME).unwrap(), Some(1));
    }

    #[test]
    fn test_in_memory_persists_across_connections() {
        let db = Database::open_in_memory().unwrap();
        db.ensure_table_version("items", 1, create_items).unwrap();
        db.update("INSERT INTO items (name) VALUES ('a')", no_params)
            .unwrap();

        // each call opened and closed its own connection
        assert_eq!(item_names(&db), vec!["a"]);
    }

    #[test]
    fn test_open_path_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("store.sqlite3");
        let db = Database::open_path(&path, Some(&[("cache_size", "2000")]), None).unwrap();
        assert!(path.exists());

        let cache_size: i64 = db
            .with_connection(|conn| {
                Ok(conn
                    .lock()?
                    .query_row("PRAGMA cache_size", [], |row| row.get(0))?)
            })
            .unwrap();
        assert_eq!(cache_size, 2000);
    }

    #[test]
    fn test_versions_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reopen.sqlite3");
        {
            let db = Database::open_path(&path, None, None).unwrap();
            db.ensure_table_version("items", 3, create_items).unwrap();
        }

        let db = Database::from_url(path.to_str().unwrap()).unwrap();
        assert_eq!(db.table_version("items").unwrap(), Some(3));

        let called = Cell::new(false);
        db.ensure_table_version("items", 3, |_, _| {
            called.set(true);
            Ok(())
        })
        .unwrap();
        assert!(!called.get());

        let err = db
            .ensure_table_version("items", 2, |_, _| Ok(()))
            .unwrap_err();
        assert!(err.is_version_conflict());
    }

    #[test]
    fn test_failed_upgrade_keeps_version() {
        let db = Database::open_in_memory().unwrap();
        db.ensure_table_version("items", 1, create_items).unwrap();

        let result = db.ensure_table_version("items", 2, |conn, current| {
            assert_eq!(current, Some(1));
            conn.update_with("INSERT INTO items (name) VALUES ('migrated')", no_params)?;
            Err(DbError::callback("cannot migrate"))
        });
        assert!(result.is_err());
        assert_eq!(db.table_version("items").unwrap(), Some(1));
        assert!(item_names(&db).is_empty());
    }

    #[test]
    fn test_recorded_versions() {
        let db = Database::open_in_memory().unwrap();
        db.ensure_table_version("items", 4, create_items).unwrap();

        let versions = db.recorded_versions().unwrap();
        assert_eq!(
            versions,
            vec![
                TableVersion {
                    name: "items".to_string(),
                    version: 4
                },
                TableVersion {
                    name: VERSION_TABLE_NAME.to_string(),
                    version: 1
                },
            ]
        );
    }

    #[test]
    fn test_batch_failure_commits_nothing() {
        let db = Database::open_in_memory().unwrap();
        db.ensure_table_version("items", 1, create_items).unwrap();

        let result = db.batch_update("INSERT INTO items (name) VALUES (?1)", |b| {
            for name in ["one", "one", "three"] {
                b.set(1, name)?;
                b.add_batch();
            }
            Ok(())
        });
        assert!(result.is_err());
        assert!(item_names(&db).is_empty());
    }

    #[test]
    fn test_update_with_keys_and_transaction() {
        let db = Database::open_in_memory().unwrap();
        db.ensure_table_version("items", 1, create_items).unwrap();

        let id = db
            .update_with_keys(
                "INSERT INTO items (name) VALUES (?1)",
                |b| b.set(1, "first"),
                |count, keys| {
                    assert_eq!(count, 1);
                    Ok(keys.first_id())
                },
            )
            .unwrap();
        assert_eq!(id, Some(1));

        let total = db
            .transaction(|conn| {
                conn.update_with("INSERT INTO items (name) VALUES ('second')", no_params)?;
                conn.update_with("INSERT INTO items (name) VALUES ('third')", no_params)?;
                conn.query_with("SELECT COUNT(*) FROM items", no_params, |rows| {
                    match rows.next()? {
                        Some(row) => Ok(row.get::<_, i64>(0)?),
                        None => Ok(0),
                    }
                })
            })
            .unwrap();
        assert_eq!(total, 3);
        assert_eq!(item_names(&db), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_credentials_override() {
        let mut db = Database::open_in_memory().unwrap();
        assert_eq!(db.connect().unwrap().user(), "sa");

        db.set_credentials("app", "secret").unwrap();
        assert_eq!(db.credentials().user(), "app");
        assert_eq!(db.connect().unwrap().user(), "app");

        assert!(db.set_credentials("", "x").is_err());

        db.clear_credentials();
        assert!(db.credentials().is_default());

        let admin = Credentials::new("admin", "pw").unwrap();
        assert_eq!(db.connect_as(&admin).unwrap().user(), "admin");
    }

    #[test]
    fn test_shared_connection_across_threads() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_path(dir.path().join("threads.sqlite3"), None, None).unwrap();
        db.ensure_table_version("counter", 1, |conn, _| {
            conn.execute_batch(
                "CREATE TABLE counter (id INTEGER PRIMARY KEY, value INTEGER NOT NULL);
                 INSERT INTO counter (id, value) VALUES (1, 0);",
            )?;
            Ok(())
        })
        .unwrap();

        let conn = Arc::new(db.connect().unwrap());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let conn = Arc::clone(&conn);
                thread::spawn(move || {
                    for _ in 0..25 {
                        // read-modify-write; only safe if calls never interleave
                        conn.transaction(|c| {
                            let value: i64 =
                                c.query_row("SELECT value FROM counter WHERE id = 1", [], |row| {
                                    row.get(0)
                                })?;
                            c.update_with("UPDATE counter SET value = ?1 WHERE id = 1", |b| {
                                b.set(1, value + 1)
                            })?;
                            Ok(())
                        })
                        .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let value: i64 = db
            .query("SELECT value FROM counter WHERE id = 1", no_params, |rows| {
                match rows.next()? {
                    Some(row) => Ok(row.get(0)?),
                    None => Err(DbError::callback("missing counter")),
                }
            })
            .unwrap();
        assert_eq!(value, 100);
    }

    #[test]
    fn test_from_url_rejects_empty() {
        assert!(Database::from_url("").is_err());
    }
}
