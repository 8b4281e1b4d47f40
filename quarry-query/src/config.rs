//! Database configuration (`quarry.toml`).
//!
//! ```toml
//! default = "main"
//!
//! [connections.main]
//! driver = "sqlite"
//! database = "${DATA_DIR:-.}/app.db"
//!
//! [migrations]
//! table = "migrations"
//!
//! [environments.test.connections.main]
//! driver = "sqlite"
//! database = ":memory:"
//! ```

use std::collections::HashMap;
use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{QueryError, QueryResult};

/// Top-level database configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfig {
    /// Name of the default connection.
    #[serde(default = "default_connection_name")]
    pub default: String,

    /// Named connections.
    #[serde(default)]
    pub connections: IndexMap<String, ConnectionConfig>,

    /// Migration settings.
    #[serde(default)]
    pub migrations: MigrationsConfig,

    /// Debug/logging settings.
    #[serde(default)]
    pub debug: DebugConfig,

    /// Environment-specific overrides.
    #[serde(default)]
    pub environments: HashMap<String, EnvironmentOverride>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            default: default_connection_name(),
            connections: IndexMap::new(),
            migrations: MigrationsConfig::default(),
            debug: DebugConfig::default(),
            environments: HashMap::new(),
        }
    }
}

/// One named connection.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectionConfig {
    /// Driver name, e.g. `sqlite`.
    #[serde(default = "default_driver")]
    pub driver: String,

    /// Database path or name; `:memory:` for an in-memory SQLite database.
    #[serde(default = "default_database")]
    pub database: String,

    /// Enforce foreign keys where the driver supports toggling them.
    #[serde(default = "default_true")]
    pub foreign_keys: bool,

    /// Busy timeout in milliseconds.
    #[serde(default)]
    pub busy_timeout_ms: Option<u64>,
}

impl ConnectionConfig {
    /// An in-memory SQLite connection.
    pub fn sqlite_memory() -> Self {
        Self {
            driver: default_driver(),
            database: default_database(),
            foreign_keys: true,
            busy_timeout_ms: None,
        }
    }
}

/// Migration settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct MigrationsConfig {
    /// Table recording applied migrations.
    #[serde(default = "default_migrations_table")]
    pub table: String,
}

impl Default for MigrationsConfig {
    fn default() -> Self {
        Self {
            table: default_migrations_table(),
        }
    }
}

/// Debug settings.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DebugConfig {
    /// Enable the in-memory query log on new connections.
    #[serde(default)]
    pub log_queries: bool,
}

/// Overrides applied by [`DatabaseConfig::with_environment`].
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct EnvironmentOverride {
    /// Replacement default connection.
    pub default: Option<String>,
    /// Connections replaced or added.
    #[serde(default)]
    pub connections: IndexMap<String, ConnectionConfig>,
    /// Replacement debug settings.
    pub debug: Option<DebugConfig>,
}

impl DatabaseConfig {
    /// Load configuration from a file path.
    pub fn from_file(path: impl AsRef<Path>) -> QueryResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            QueryError::configuration(format!("cannot read {}: {}", path.display(), e)).with_source(e)
        })?;
        info!(path = %path.display(), "loading database configuration");
        Self::from_toml(&content)
    }

    /// Parse configuration, expanding `${VAR}` from the process environment.
    pub fn from_toml(content: &str) -> QueryResult<Self> {
        Self::from_toml_with(content, |name| std::env::var(name).ok())
    }

    /// Parse configuration, expanding variables through `lookup`.
    pub fn from_toml_with(content: &str, lookup: impl Fn(&str) -> Option<String>) -> QueryResult<Self> {
        let expanded = expand_env_vars(content, lookup)?;
        toml::from_str(&expanded)
            .map_err(|e| QueryError::configuration(format!("invalid configuration: {}", e)).with_source(e))
    }

    /// Apply the overrides registered for `env`.
    pub fn with_environment(mut self, env: &str) -> Self {
        if let Some(overrides) = self.environments.remove(env) {
            if let Some(default) = overrides.default {
                self.default = default;
            }
            for (name, connection) in overrides.connections {
                self.connections.insert(name, connection);
            }
            if let Some(debug) = overrides.debug {
                self.debug = debug;
            }
        }
        self
    }

    /// Configuration of the named connection (the default when `None`).
    pub fn connection(&self, name: Option<&str>) -> QueryResult<&ConnectionConfig> {
        let name = name.unwrap_or(&self.default);
        self.connections
            .get(name)
            .ok_or_else(|| QueryError::unknown_connection(name))
    }
}

fn default_connection_name() -> String {
    "default".to_string()
}

fn default_driver() -> String {
    "sqlite".to_string()
}

fn default_database() -> String {
    ":memory:".to_string()
}

fn default_migrations_table() -> String {
    "migrations".to_string()
}

fn default_true() -> bool {
    true
}

/// Replace `${VAR}` and `${VAR:-fallback}`; an unset variable without a
/// fallback is an error.
fn expand_env_vars(content: &str, lookup: impl Fn(&str) -> Option<String>) -> QueryResult<String> {
    let re = regex_lite::Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}")
        .map_err(|e| QueryError::internal(format!("invalid env pattern: {}", e)))?;

    let mut missing = None;
    let expanded = re.replace_all(content, |caps: &regex_lite::Captures<'_>| {
        let name = &caps[1];
        match (lookup(name), caps.get(2)) {
            (Some(value), _) => value,
            (None, Some(fallback)) => fallback.as_str().to_string(),
            (None, None) => {
                missing.get_or_insert_with(|| name.to_string());
                String::new()
            }
        }
    });

    match missing {
        Some(name) => Err(QueryError::configuration(format!(
            "environment variable {} is not set",
            name
        ))),
        None => Ok(expanded.into_owned()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let config = DatabaseConfig::from_toml_with("", |_| None).unwrap();
        assert_eq!(config.default, "default");
        assert_eq!(config.migrations.table, "migrations");
        assert!(config.connections.is_empty());
    }

    #[test]
    fn test_env_expansion_with_fallback() {
        let toml = r#"
            default = "main"
            [connections.main]
            database = "${DATA_DIR:-/tmp}/${DB_NAME}.db"
        "#;
        let config = DatabaseConfig::from_toml_with(toml, |name| {
            (name == "DB_NAME").then(|| "app".to_string())
        })
        .unwrap();

        let main = config.connection(None).unwrap();
        assert_eq!(main.database, "/tmp/app.db");
        assert_eq!(main.driver, "sqlite");
        assert!(main.foreign_keys);
    }

    #[test]
    fn test_missing_env_var_is_an_error() {
        let err = DatabaseConfig::from_toml_with("default = \"${NOPE}\"", |_| None).unwrap_err();
        assert!(err.message.contains("NOPE"));
    }

    #[test]
    fn test_environment_override() {
        let toml = r#"
            default = "main"
            [connections.main]
            database = "app.db"
            [environments.test]
            debug = { log_queries = true }
            [environments.test.connections.main]
            database = ":memory:"
        "#;
        let config = DatabaseConfig::from_toml_with(toml, |_| None)
            .unwrap()
            .with_environment("test");

        assert_eq!(config.connection(Some("main")).unwrap().database, ":memory:");
        assert!(config.debug.log_queries);
    }

    #[test]
    fn test_unknown_connection() {
        let config = DatabaseConfig::default();
        let err = config.connection(Some("replica")).unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::UnknownConnection);
    }
}
