//! Error type shared by every database operation

use std::path::PathBuf;

use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T, E = DbError> = std::result::Result<T, E>;

/// Database operation failure
///
/// Every failure surfaces as a `DbError`. Engine failures keep the underlying
/// [`rusqlite::Error`] as their source so the engine diagnostic is never lost.
#[derive(Debug, Error)]
pub enum DbError {
    /// The engine rejected an operation
    #[error("{context}: {source}")]
    Sqlite {
        context: String,
        #[source]
        source: rusqlite::Error,
    },

    /// The recorded table version is newer than the one the caller requires
    #[error(
        "Required version ({requested}) for table {table} is older than current version ({current})"
    )]
    VersionConflict {
        table: String,
        requested: u32,
        current: u32,
    },

    /// A parameter could not be bound to a statement
    #[error("Invalid statement parameter: {0}")]
    InvalidParameter(String),

    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("Invalid connection descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("Failed to create directory '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Another thread panicked while holding the connection
    #[error("Connection lock poisoned")]
    LockPoisoned,

    /// Failure raised by caller-supplied callback logic
    #[error("{0}")]
    Callback(String),
}

impl DbError {
    /// Wrap an engine error with a description of what was being attempted
    pub fn sqlite(context: impl Into<String>, source: rusqlite::Error) -> Self {
        DbError::Sqlite {
            context: context.into(),
            source,
        }
    }

    /// Build an error from inside a caller-supplied callback
    pub fn callback(message: impl Into<String>) -> Self {
        DbError::Callback(message.into())
    }

    pub fn is_version_conflict(&self) -> bool {
        matches!(self, DbError::VersionConflict { .. })
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(source: rusqlite::Error) -> Self {
        DbError::sqlite("Database error", source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_conflict_message() {
        let err = DbError::VersionConflict {
            table: "users".to_string(),
            requested: 2,
            current: 3,
        };
        assert!(err.is_version_conflict());
        assert_eq!(
            err.to_string(),
            "Required version (2) for table users is older than current version (3)"
        );
    }

    #[test]
    fn test_sqlite_error_keeps_diagnostic() {
        let err = DbError::sqlite("Failed to prepare", rusqlite::Error::InvalidQuery);
        let message = err.to_string();
        assert!(message.starts_with("Failed to prepare: "));
        assert!(std::error::Error::source(&err).is_some());
    }
}
