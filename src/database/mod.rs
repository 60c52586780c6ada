//! Database module
//!
//! This module provides all database functionality, organized into:
//!
//! - **core**: connection descriptors, the lock-guarded connection wrapper,
//!   statement helpers, transactions and table versioning
//! - **provider**: the [`Database`] entry point that opens connections on
//!   demand and offers every helper in a self-managed-connection form
//!
//! # Architecture
//!
//! ```text
//! database/
//! ├── core/            # Foundation
//! │   ├── descriptor   # ConnectionDescriptor, Credentials
//! │   ├── connection   # DbConnection (mutex-guarded SQLite connection)
//! │   ├── statement    # Binder, GeneratedKeys, StatementExt helpers
//! │   ├── transaction  # TxScope, run_in_transaction
//! │   └── schema       # SchemaManager, table_version bookkeeping
//! │
//! └── provider         # Database: connect, with_connection, helpers
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use dbhelper::database::{no_params, Database, StatementExt};
//!
//! let db = Database::open_path("/var/lib/app/app.sqlite3", None, None)?;
//!
//! db.ensure_table_version("users", 2, |conn, current| {
//!     if current.is_none() {
//!         conn.update_with("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)", no_params)?;
//!     }
//!     if current.unwrap_or(0) < 2 {
//!         conn.update_with("ALTER TABLE users ADD COLUMN email TEXT", no_params)?;
//!     }
//!     Ok(())
//! })?;
//!
//! let id = db.update_with_keys(
//!     "INSERT INTO users (name) VALUES (?1)",
//!     |b| b.set(1, "alice"),
//!     |_, keys| Ok(keys.first_id()),
//! )?;
//! ```

pub mod core;
mod provider;

pub use core::{
    no_params, run_in_transaction, Binder, ConnectionDescriptor, Credentials, DbConnection,
    GeneratedKeys, Location, SchemaDefinitions, SchemaManager, SchemaStatus, StatementExt,
    TableVersion, TxScope, DEFAULT_BUSY_TIMEOUT_MS, DEFAULT_FILE_OPTIONS, VERSION_TABLE_NAME,
    VERSION_TABLE_VERSION,
};
pub use provider::Database;
