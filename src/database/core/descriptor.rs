//! Connection descriptors and credentials
//!
//! A [`ConnectionDescriptor`] identifies where a database lives and which
//! engine options every new connection receives. [`Credentials`] carry the
//! account a connection is opened for.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::error::{DbError, Result};

/// Default busy timeout applied to every connection (5 seconds)
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// Engine options applied to file-backed databases unless overridden
pub const DEFAULT_FILE_OPTIONS: &[(&str, &str)] = &[
    // WAL gives better concurrent read/write behaviour
    ("journal_mode", "WAL"),
    ("synchronous", "NORMAL"),
    ("foreign_keys", "ON"),
];

/// User name of the built-in default account
pub const DEFAULT_USER: &str = "sa";

/// Password of the built-in default account
pub const DEFAULT_PASSWORD: &str = "";

static MEMORY_DB_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Where the database lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    /// A database file on disk
    File(PathBuf),
    /// A named shared-cache in-memory database
    Memory { name: String },
    /// A raw SQLite `file:` URI, passed through untouched
    Uri(String),
}

/// Immutable description of how to open a connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionDescriptor {
    location: Location,
    options: Vec<(String, String)>,
    busy_timeout: Duration,
}

impl ConnectionDescriptor {
    fn with_location(location: Location) -> Self {
        Self {
            location,
            options: Vec::new(),
            busy_timeout: Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS),
        }
    }

    /// Build a descriptor from a raw connection string
    ///
    /// Accepts `:memory:`, a `file:` URI, or a plain file path. Plain paths
    /// get no default options, the string is taken as-is.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(DbError::InvalidDescriptor(
                "connection string is empty".to_string(),
            ));
        }

        let location = if raw == ":memory:" {
            Location::Memory {
                name: unique_memory_name(),
            }
        } else if raw.starts_with("file:") {
            Location::Uri(raw.to_string())
        } else {
            Location::File(PathBuf::from(raw))
        };

        Ok(Self::with_location(location))
    }

    /// Descriptor for a database file, with [`DEFAULT_FILE_OPTIONS`] applied
    pub fn for_path(path: impl AsRef<Path>) -> Self {
        let mut descriptor = Self::with_location(Location::File(path.as_ref().to_path_buf()));
        for (key, value) in DEFAULT_FILE_OPTIONS {
            descriptor = descriptor.with_option(*key, *value);
        }
        descriptor
    }

    /// Descriptor for a fresh, uniquely named in-memory database
    pub fn in_memory() -> Self {
        Self::with_location(Location::Memory {
            name: unique_memory_name(),
        })
    }

    /// Descriptor for a named in-memory database
    ///
    /// Every descriptor with the same name refers to the same database within
    /// this process, as long as at least one connection to it stays open.
    pub fn in_memory_named(name: &str) -> Result<Self> {
        if name.is_empty() || name.contains(['?', '&', '#', '/']) {
            return Err(DbError::InvalidDescriptor(format!(
                "invalid in-memory database name '{}'",
                name
            )));
        }
        Ok(Self::with_location(Location::Memory {
            name: name.to_string(),
        }))
    }

    /// Set an engine option, replacing any earlier value for the same key
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        let value = value.into();
        match self
            .options
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(&key))
        {
            Some(entry) => entry.1 = value,
            None => self.options.push((key, value)),
        }
        self
    }

    /// Set several engine options at once
    pub fn with_options<I, K, V>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (key, value) in options {
            self = self.with_option(key, value);
        }
        self
    }

    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    pub fn options(&self) -> &[(String, String)] {
        &self.options
    }

    pub fn busy_timeout(&self) -> Duration {
        self.busy_timeout
    }

    pub fn is_memory(&self) -> bool {
        matches!(self.location, Location::Memory { .. })
    }

    /// Check that every option key is a plain identifier
    pub fn validate(&self) -> Result<()> {
        for (key, _) in &self.options {
            let mut chars = key.chars();
            let valid_start = chars
                .next()
                .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
            if !valid_start || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return Err(DbError::InvalidDescriptor(format!(
                    "invalid option name '{}'",
                    key
                )));
            }
        }
        Ok(())
    }

    /// The target handed to the engine when opening a connection
    pub(crate) fn target(&self) -> PathBuf {
        match &self.location {
            Location::File(path) => path.clone(),
            Location::Memory { name } => {
                PathBuf::from(format!("file:{}?mode=memory&cache=shared", name))
            }
            Location::Uri(uri) => PathBuf::from(uri),
        }
    }

    /// Create the directory holding the database file, if any
    pub(crate) fn ensure_parent_dir(&self) -> Result<()> {
        let Location::File(path) = &self.location else {
            return Ok(());
        };
        match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => std::fs::create_dir_all(parent)
                .map_err(|source| DbError::Io {
                    path: parent.to_path_buf(),
                    source,
                }),
            _ => Ok(()),
        }
    }
}

impl fmt::Display for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.target().display())?;
        for (key, value) in &self.options {
            write!(f, ";{}={}", key, value)?;
        }
        Ok(())
    }
}

fn unique_memory_name() -> String {
    let n = MEMORY_DB_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("dbhelper-mem-{}-{}", std::process::id(), n)
}

/// Account a connection is opened for
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    user: String,
    password: String,
}

impl Credentials {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Result<Self> {
        let user = user.into();
        if user.trim().is_empty() {
            return Err(DbError::InvalidCredentials(
                "user name must not be empty".to_string(),
            ));
        }
        Ok(Self {
            user,
            password: password.into(),
        })
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    pub fn is_default(&self) -> bool {
        self.user == DEFAULT_USER && self.password == DEFAULT_PASSWORD
    }
}

impl Default for Credentials {
    fn default() -> Self {
        Self {
            user: DEFAULT_USER.to_string(),
            password: DEFAULT_PASSWORD.to_string(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"***")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_memory() {
        let a = ConnectionDescriptor::parse(":memory:").unwrap();
        let b = ConnectionDescriptor::parse(":memory:").unwrap();
        assert!(a.is_memory());
        // each `:memory:` gets its own database
        assert_ne!(a.location(), b.location());
    }

    #[test]
    fn test_parse_uri_and_path() {
        let uri = ConnectionDescriptor::parse("file:data.db?mode=ro").unwrap();
        assert_eq!(uri.location(), &Location::Uri("file:data.db?mode=ro".to_string()));

        let path = ConnectionDescriptor::parse("/tmp/data.db").unwrap();
        assert_eq!(path.location(), &Location::File(PathBuf::from("/tmp/data.db")));
        assert!(path.options().is_empty());

        assert!(ConnectionDescriptor::parse("   ").is_err());
    }

    #[test]
    fn test_for_path_defaults_and_override() {
        let descriptor =
            ConnectionDescriptor::for_path("/tmp/x.db").with_option("JOURNAL_MODE", "DELETE");
        assert_eq!(descriptor.options().len(), DEFAULT_FILE_OPTIONS.len());
        assert_eq!(
            descriptor.options()[0],
            ("journal_mode".to_string(), "DELETE".to_string())
        );
        assert_eq!(
            descriptor.to_string(),
            "/tmp/x.db;journal_mode=DELETE;synchronous=NORMAL;foreign_keys=ON"
        );
    }

    #[test]
    fn test_memory_target() {
        let descriptor = ConnectionDescriptor::in_memory_named("shared").unwrap();
        assert_eq!(
            descriptor.target(),
            PathBuf::from("file:shared?mode=memory&cache=shared")
        );
        assert!(ConnectionDescriptor::in_memory_named("a?b").is_err());
    }

    #[test]
    fn test_validate_option_names() {
        let ok = ConnectionDescriptor::in_memory().with_option("cache_size", "1000");
        assert!(ok.validate().is_ok());

        let bad = ConnectionDescriptor::in_memory().with_option("x; DROP TABLE t", "1");
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_ensure_parent_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("deeper").join("db.sqlite3");
        let descriptor = ConnectionDescriptor::for_path(&path);
        descriptor.ensure_parent_dir().unwrap();
        assert!(path.parent().unwrap().is_dir());
    }

    #[test]
    fn test_credentials() {
        let default = Credentials::default();
        assert_eq!(default.user(), "sa");
        assert_eq!(default.password(), "");
        assert!(default.is_default());

        let creds = Credentials::new("admin", "secret").unwrap();
        assert!(!creds.is_default());
        assert!(!format!("{:?}", creds).contains("secret"));

        assert!(Credentials::new("", "x").is_err());
    }
}
