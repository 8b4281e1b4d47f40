//! Named connections resolved lazily from configuration.

use std::cell::OnceCell;
use std::collections::HashMap;

use indexmap::IndexMap;
use tracing::info;

use super::Connection;
use crate::builder::QueryBuilder;
use crate::config::{ConnectionConfig, DatabaseConfig};
use crate::error::{QueryError, QueryResult};
use crate::schema::SchemaBuilder;

/// Opens a connection for a driver name.
pub trait Connector {
    /// Open the connection called `name` described by `config`.
    fn connect(&self, name: &str, config: &ConnectionConfig) -> QueryResult<Connection>;
}

impl<F> Connector for F
where
    F: Fn(&str, &ConnectionConfig) -> QueryResult<Connection>,
{
    fn connect(&self, name: &str, config: &ConnectionConfig) -> QueryResult<Connection> {
        self(name, config)
    }
}

/// Looks up connections by name.
pub trait ConnectionResolver {
    /// The named connection, or the default one for `None`.
    fn connection(&self, name: Option<&str>) -> QueryResult<&Connection>;

    /// Name of the default connection.
    fn default_connection_name(&self) -> &str;
}

impl ConnectionResolver for Connection {
    fn connection(&self, name: Option<&str>) -> QueryResult<&Connection> {
        match name {
            None => Ok(self),
            Some(name) if name == self.name() => Ok(self),
            Some(name) => Err(QueryError::unknown_connection(name)),
        }
    }

    fn default_connection_name(&self) -> &str {
        self.name()
    }
}

/// Owns every named connection of an application.
///
/// Connections are opened on first use through the [`Connector`]
/// registered for their driver and cached afterwards.
pub struct DatabaseManager {
    config: DatabaseConfig,
    connectors: HashMap<String, Box<dyn Connector>>,
    connections: IndexMap<String, OnceCell<Connection>>,
}

impl std::fmt::Debug for DatabaseManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseManager")
            .field("default", &self.config.default)
            .field("connections", &self.connections.keys().collect::<Vec<_>>())
            .field("drivers", &self.connectors.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl DatabaseManager {
    /// A manager for the connections described by `config`.
    pub fn new(config: DatabaseConfig) -> Self {
        let connections = config
            .connections
            .keys()
            .map(|name| (name.clone(), OnceCell::new()))
            .collect();
        Self {
            config,
            connectors: HashMap::new(),
            connections,
        }
    }

    /// Register the connector used for `driver`.
    pub fn extend(&mut self, driver: impl Into<String>, connector: impl Connector + 'static) -> &mut Self {
        self.connectors.insert(driver.into(), Box::new(connector));
        self
    }

    /// Register an already opened connection under its own name.
    pub fn add_connection(&mut self, connection: Connection) -> &mut Self {
        let cell = OnceCell::new();
        let name = connection.name().to_string();
        let _ = cell.set(connection);
        self.connections.insert(name, cell);
        self
    }

    /// The configuration this manager was built from.
    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// Change the default connection.
    pub fn set_default_connection(&mut self, name: impl Into<String>) {
        self.config.default = name.into();
    }

    /// The default connection.
    pub fn default_connection(&self) -> QueryResult<&Connection> {
        self.connection(None)
    }

    /// A query builder on `table` of the default connection.
    pub fn table(&self, table: impl Into<String>) -> QueryResult<QueryBuilder<'_>> {
        Ok(self.default_connection()?.table(table))
    }

    /// A schema builder for the named connection.
    pub fn schema(&self, name: Option<&str>) -> QueryResult<SchemaBuilder<'_>> {
        Ok(self.connection(name)?.schema_builder())
    }

    /// Close the named connection; it is reopened on next use.
    pub fn purge(&mut self, name: Option<&str>) {
        let name = name.unwrap_or(&self.config.default).to_string();
        if let Some(cell) = self.connections.get_mut(&name) {
            if cell.take().is_some() {
                info!(connection = %name, "connection purged");
            }
        }
    }

    /// Names of connections that are currently open.
    pub fn open_connections(&self) -> Vec<&str> {
        self.connections
            .iter()
            .filter(|(_, cell)| cell.get().is_some())
            .map(|(name, _)| name.as_str())
            .collect()
    }

    fn open(&self, name: &str) -> QueryResult<Connection> {
        let config = self.config.connection(Some(name))?;
        let connector = self.connectors.get(&config.driver).ok_or_else(|| {
            QueryError::configuration(format!("unsupported database driver: {}", config.driver))
        })?;

        let connection = connector.connect(name, config)?;
        if self.config.debug.log_queries {
            connection.enable_query_log();
        }
        info!(connection = %name, driver = %config.driver, "connection opened");
        Ok(connection)
    }
}

impl ConnectionResolver for DatabaseManager {
    fn connection(&self, name: Option<&str>) -> QueryResult<&Connection> {
        let name = name.unwrap_or(&self.config.default);
        let cell = self
            .connections
            .get(name)
            .ok_or_else(|| QueryError::unknown_connection(name))?;

        if let Some(connection) = cell.get() {
            return Ok(connection);
        }
        let _ = cell.set(self.open(name)?);
        cell.get()
            .ok_or_else(|| QueryError::internal(format!("connection {} was not stored", name)))
    }

    fn default_connection_name(&self) -> &str {
        &self.config.default
    }
}
