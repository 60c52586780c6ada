//! Core database infrastructure
//!
//! This module provides the foundational database components:
//! - `ConnectionDescriptor` / `Credentials`: what to open and as whom
//! - `DbConnection`: lock-guarded SQLite connection wrapper
//! - `StatementExt` / `Binder`: statement execution helpers
//! - `TxScope`: transactions that restore the prior commit mode
//! - `SchemaManager`: per-table schema versioning

mod connection;
mod descriptor;
mod schema;
mod statement;
mod transaction;

pub use connection::DbConnection;
pub use descriptor::{
    ConnectionDescriptor, Credentials, Location, DEFAULT_BUSY_TIMEOUT_MS, DEFAULT_FILE_OPTIONS,
    DEFAULT_PASSWORD, DEFAULT_USER,
};
pub use schema::{
    SchemaDefinitions, SchemaManager, SchemaStatus, TableVersion, VERSION_TABLE_NAME,
    VERSION_TABLE_VERSION,
};
pub use statement::{no_params, Binder, GeneratedKeys, StatementExt};
pub use transaction::{run_in_transaction, TxScope};
