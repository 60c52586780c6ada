use anyhow::{anyhow, Result};
use config::Config;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use crate::database::{ConnectionDescriptor, Credentials, DEFAULT_BUSY_TIMEOUT_MS};

/// Database settings loaded from a TOML file and the environment
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Path to the directory holding the database file
    pub data_dir: String,

    /// Database file name inside `data_dir`
    pub database: String,

    /// Use a private in-memory database instead of a file
    pub in_memory: bool,

    /// Busy timeout in milliseconds
    pub busy_timeout_ms: u64,

    /// Account used by default connections (built-in default if unset)
    pub user: Option<String>,
    pub password: Option<String>,

    /// Engine options (pragmas) applied on every connection, on top of the
    /// default file options
    pub options: BTreeMap<String, String>,
}

const EMPTY_CONFIG: &str = r#"### dbhelper configuration file

### directory holding the database file
# data_dir = "~/.dbhelper"

### database file name
# database = "dbhelper.sqlite3"

### use an in-memory database instead
# in_memory = false

### busy timeout in milliseconds
# busy_timeout_ms = 5000

### account for default connections
# user = "sa"
# password = ""

### engine options applied to every connection
# [options]
# journal_mode = "WAL"
# cache_size = "100000"
"#;

impl Default for DatabaseConfig {
    fn default() -> Self {
        let home_dir = dirs::home_dir()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|| ".".to_string());

        Self {
            data_dir: format!("{}/.dbhelper", home_dir),
            database: "dbhelper.sqlite3".to_string(),
            in_memory: false,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            user: None,
            password: None,
            options: BTreeMap::new(),
        }
    }
}

impl DatabaseConfig {
    /// Load configuration
    ///
    /// With an explicit `path`, that file is read, or created from a
    /// commented template if it does not exist. Without one,
    /// `$HOME/.dbhelper/dbhelper.toml` is read when present. Environment
    /// variables prefixed with `DBHELPER_` override file values.
    pub fn new(path: Option<&str>) -> Result<DatabaseConfig> {
        let mut builder = Config::builder();

        match path {
            Some(p) => {
                if Path::new(p).exists() {
                    builder = builder.add_source(config::File::with_name(p));
                } else {
                    std::fs::write(p, EMPTY_CONFIG)
                        .map_err(|e| anyhow!("Unable to create config file {}: {}", p, e))?;
                }
            }
            None => {
                let p = Self::config_file_path();
                if Path::new(p.as_str()).exists() {
                    builder = builder.add_source(config::File::with_name(p.as_str()));
                }
            }
        }

        // E.g., `DBHELPER_DATA_DIR=/srv/data` sets the data directory
        builder = builder.add_source(config::Environment::with_prefix("DBHELPER"));

        let settings = builder
            .build()
            .map_err(|e| anyhow!("Failed to build configuration: {}", e))?;

        let mut config = settings
            .try_deserialize::<DatabaseConfig>()
            .map_err(|e| anyhow!("Failed to deserialize configuration: {}", e))?;

        if let Some(rest) = config.data_dir.strip_prefix("~/") {
            let home = dirs::home_dir().ok_or_else(|| anyhow!("Could not find home directory"))?;
            config.data_dir = home.join(rest).to_string_lossy().to_string();
        }

        Ok(config)
    }

    /// Get the path to the SQLite database file
    pub fn sqlite_path(&self) -> String {
        let data_dir = self.data_dir.trim_end_matches('/');
        format!("{}/{}", data_dir, self.database)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    /// Build the connection descriptor these settings describe
    pub fn descriptor(&self) -> ConnectionDescriptor {
        let descriptor = if self.in_memory {
            ConnectionDescriptor::in_memory()
        } else {
            ConnectionDescriptor::for_path(self.sqlite_path())
        };
        descriptor
            .with_options(self.options.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .with_busy_timeout(self.busy_timeout())
    }

    /// Credentials for default connections
    pub fn credentials(&self) -> crate::error::Result<Credentials> {
        match &self.user {
            Some(user) => Credentials::new(user.as_str(), self.password.as_deref().unwrap_or("")),
            None => Ok(Credentials::default()),
        }
    }

    /// Display configuration summary
    pub fn summary(&self) -> String {
        let mut lines = vec![
            format!("Data Directory:     {}", self.data_dir),
            if self.in_memory {
                "SQLite Path:        (in-memory)".to_string()
            } else {
                format!("SQLite Path:        {}", self.sqlite_path())
            },
            format!("Busy Timeout:       {} ms", self.busy_timeout_ms),
            format!(
                "User:               {}",
                self.user.as_deref().unwrap_or(crate::database::core::DEFAULT_USER)
            ),
        ];

        for (key, value) in &self.options {
            lines.push(format!("Option:             {}={}", key, value));
        }

        lines.join("\n")
    }

    /// Get the default config file path
    pub fn config_file_path() -> String {
        let home_dir = dirs::home_dir()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|| "~".to_string());
        format!("{}/.dbhelper/dbhelper.toml", home_dir)
    }
}
