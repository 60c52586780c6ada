#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

//! dbhelper - table versioning and statement helpers for SQLite
//!
//! dbhelper removes the connection and statement lifecycle boilerplate from
//! code that talks to an embedded SQLite database, and tracks a schema
//! version per table so upgrade logic runs exactly once per version step.
//!
//! # Architecture
//!
//! - **[`database`]**: connection provider, statement helpers, transactions
//!   and table versioning
//! - **[`config`]**: configuration loading (TOML file + environment)
//! - **[`error`]**: the single [`DbError`] type
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use dbhelper::{no_params, Database, StatementExt};
//!
//! let db = Database::open_in_memory()?;
//!
//! db.ensure_table_version("notes", 1, |conn, current| {
//!     if current.is_none() {
//!         conn.update_with("CREATE TABLE notes (id INTEGER PRIMARY KEY, body TEXT)", no_params)?;
//!     }
//!     Ok(())
//! })?;
//!
//! let counts = db.batch_update("INSERT INTO notes (body) VALUES (?1)", |b| {
//!     for body in ["first", "second"] {
//!         b.set(1, body)?;
//!         b.add_batch();
//!     }
//!     Ok(())
//! })?;
//! assert_eq!(counts, vec![1, 1]);
//! ```

pub mod config;
pub mod database;
pub mod error;

pub use config::DatabaseConfig;
pub use error::{DbError, Result};

pub use database::{
    no_params, Binder, ConnectionDescriptor, Credentials, Database, DbConnection, GeneratedKeys,
    Location, SchemaManager, SchemaStatus, StatementExt, TableVersion, TxScope,
};
