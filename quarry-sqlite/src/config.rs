//! SQLite configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use quarry_query::ConnectionConfig;

use crate::error::{SqliteError, SqliteResult};

/// How to open a SQLite database.
#[derive(Debug, Clone, PartialEq)]
pub struct SqliteConfig {
    /// Where the database lives.
    pub path: DatabasePath,
    /// `PRAGMA foreign_keys`.
    pub foreign_keys: bool,
    /// Milliseconds to wait on a locked database.
    pub busy_timeout_ms: Option<u64>,
    /// `PRAGMA synchronous`.
    pub synchronous: SynchronousMode,
    /// `PRAGMA journal_mode`; not applied to in-memory databases.
    pub journal_mode: JournalMode,
}

/// Location of a database.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum DatabasePath {
    /// A private in-memory database, gone when the connection closes.
    #[default]
    Memory,
    /// A database file, created on open if missing.
    File(PathBuf),
}

impl DatabasePath {
    /// Whether the database is in memory.
    pub fn is_memory(&self) -> bool {
        matches!(self, Self::Memory)
    }

    /// Human readable form for logs.
    pub fn display(&self) -> String {
        match self {
            Self::Memory => ":memory:".to_string(),
            Self::File(path) => path.display().to_string(),
        }
    }
}

/// Values of `PRAGMA synchronous`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SynchronousMode {
    /// No syncs.
    Off,
    /// Sync at checkpoints.
    #[default]
    Normal,
    /// Sync on every commit.
    Full,
}

impl SynchronousMode {
    /// Pragma argument.
    pub fn as_pragma(&self) -> &'static str {
        match self {
            Self::Off => "OFF",
            Self::Normal => "NORMAL",
            Self::Full => "FULL",
        }
    }
}

/// Values of `PRAGMA journal_mode`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum JournalMode {
    /// Rollback journal removed after each transaction.
    Delete,
    /// Rollback journal truncated after each transaction.
    Truncate,
    /// Write-ahead log.
    #[default]
    Wal,
}

impl JournalMode {
    /// Pragma argument.
    pub fn as_pragma(&self) -> &'static str {
        match self {
            Self::Delete => "DELETE",
            Self::Truncate => "TRUNCATE",
            Self::Wal => "WAL",
        }
    }
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: DatabasePath::Memory,
            foreign_keys: true,
            busy_timeout_ms: Some(5000),
            synchronous: SynchronousMode::Normal,
            journal_mode: JournalMode::Wal,
        }
    }
}

impl SqliteConfig {
    /// An in-memory database.
    pub fn memory() -> Self {
        Self::default()
    }

    /// The database file at `path`.
    pub fn file(path: impl AsRef<Path>) -> Self {
        Self {
            path: DatabasePath::File(path.as_ref().to_path_buf()),
            ..Default::default()
        }
    }

    /// Configuration from the `database` setting of a connection.
    ///
    /// Accepts `:memory:`, `sqlite::memory:`, `sqlite://path` and bare
    /// paths.
    /// Query parameters `foreign_keys`, `busy_timeout`, `synchronous` and
    /// `journal_mode` override the defaults.
    pub fn from_url(url: impl AsRef<str>) -> SqliteResult<Self> {
        let url = url.as_ref();
        let (location, query) = match url.split_once('?') {
            Some((location, query)) => (location, Some(query)),
            None => (url, None),
        };

        let location = location
            .strip_prefix("sqlite://")
            .or_else(|| location.strip_prefix("sqlite:"))
            .unwrap_or(location);
        if location.is_empty() {
            return Err(SqliteError::config("database path is required"));
        }

        let mut config = if location == ":memory:" {
            Self::memory()
        } else {
            Self::file(location)
        };

        for pair in query.into_iter().flat_map(|q| q.split('&')) {
            let Some((key, value)) = pair.split_once('=') else {
                continue;
            };
            match key {
                "foreign_keys" => config.foreign_keys = value == "true" || value == "1",
                "busy_timeout" => {
                    let ms = value
                        .parse()
                        .map_err(|_| SqliteError::config(format!("invalid busy_timeout: {}", value)))?;
                    config.busy_timeout_ms = Some(ms);
                }
                "synchronous" => {
                    config.synchronous = match value.to_lowercase().as_str() {
                        "off" => SynchronousMode::Off,
                        "full" => SynchronousMode::Full,
                        _ => SynchronousMode::Normal,
                    };
                }
                "journal_mode" => {
                    config.journal_mode = match value.to_lowercase().as_str() {
                        "delete" => JournalMode::Delete,
                        "truncate" => JournalMode::Truncate,
                        _ => JournalMode::Wal,
                    };
                }
                _ => {}
            }
        }

        Ok(config)
    }

    /// Configuration for a connection described in [`quarry_query::DatabaseConfig`].
    pub fn from_connection_config(config: &ConnectionConfig) -> SqliteResult<Self> {
        let mut sqlite = Self::from_url(&config.database)?;
        sqlite.foreign_keys = config.foreign_keys;
        if let Some(ms) = config.busy_timeout_ms {
            sqlite.busy_timeout_ms = Some(ms);
        }
        Ok(sqlite)
    }

    /// Busy timeout as a duration.
    pub fn busy_timeout(&self) -> Option<Duration> {
        self.busy_timeout_ms.map(Duration::from_millis)
    }

    /// Toggle foreign key enforcement.
    pub fn foreign_keys(mut self, enabled: bool) -> Self {
        self.foreign_keys = enabled;
        self
    }

    /// Busy timeout in milliseconds.
    pub fn with_busy_timeout(mut self, ms: u64) -> Self {
        self.busy_timeout_ms = Some(ms);
        self
    }

    /// Synchronous mode.
    pub fn synchronous(mut self, mode: SynchronousMode) -> Self {
        self.synchronous = mode;
        self
    }

    /// Journal mode.
    pub fn journal_mode(mut self, mode: JournalMode) -> Self {
        self.journal_mode = mode;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_memory_locations() {
        assert!(SqliteConfig::from_url("sqlite::memory:").unwrap().path.is_memory());
        assert!(SqliteConfig::from_url(":memory:").unwrap().path.is_memory());
    }

    #[test]
    fn test_file_locations() {
        let config = SqliteConfig::from_url("sqlite://./test.db").unwrap();
        assert_eq!(config.path, DatabasePath::File(PathBuf::from("./test.db")));

        let config = SqliteConfig::from_url("data/app.sqlite").unwrap();
        assert_eq!(config.path.display(), "data/app.sqlite");
    }

    #[test]
    fn test_query_options() {
        let config = SqliteConfig::from_url(
            "sqlite://./test.db?foreign_keys=false&busy_timeout=10000&synchronous=full",
        )
        .unwrap();

        assert!(!config.foreign_keys);
        assert_eq!(config.busy_timeout_ms, Some(10000));
        assert_eq!(config.synchronous, SynchronousMode::Full);
    }

    #[test]
    fn test_invalid_locations() {
        assert!(SqliteConfig::from_url("sqlite://").is_err());
        assert!(SqliteConfig::from_url("app.db?busy_timeout=soon").is_err());
    }

    #[test]
    fn test_from_connection_config() {
        let mut conn = ConnectionConfig::sqlite_memory();
        conn.foreign_keys = false;
        conn.busy_timeout_ms = Some(250);

        let config = SqliteConfig::from_connection_config(&conn).unwrap();
        assert!(config.path.is_memory());
        assert!(!config.foreign_keys);
        assert_eq!(config.busy_timeout(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_builder_methods() {
        let config = SqliteConfig::memory()
            .foreign_keys(false)
            .with_busy_timeout(3000)
            .synchronous(SynchronousMode::Off)
            .journal_mode(JournalMode::Delete);

        assert!(!config.foreign_keys);
        assert_eq!(config.busy_timeout_ms, Some(3000));
        assert_eq!(config.synchronous.as_pragma(), "OFF");
        assert_eq!(config.journal_mode.as_pragma(), "DELETE");
    }
}
