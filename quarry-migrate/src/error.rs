//! Error types for the migrator.

use std::fmt;

use quarry_query::QueryError;
use serde::Serialize;
use thiserror::Error;

/// Result type alias for migration operations.
pub type MigrateResult<T> = Result<T, MigrationError>;

/// Which way a migration was being applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// `up()`
    Up,
    /// `down()`
    Down,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Up => f.write_str("up"),
            Self::Down => f.write_str("down"),
        }
    }
}

/// Errors that can occur while migrating.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// Reading or writing the repository, or resolving a connection, failed.
    #[error("{0}")]
    Query(#[from] QueryError),

    /// A migration's `up()` or `down()` returned an error. The run stopped
    /// at this migration; earlier migrations of the run stay recorded.
    #[error("migration '{migration}' failed running {direction}: {source}")]
    Failed {
        /// Migration name.
        migration: String,
        /// Direction being applied.
        direction: Direction,
        /// Underlying error.
        #[source]
        source: QueryError,
    },

    /// No migration with this name is registered.
    #[error("migration '{0}' not found")]
    NotFound(String),

    /// Two migrations were registered under one name.
    #[error("migration '{0}' is already registered")]
    DuplicateName(String),

    /// The repository table has not been created yet.
    #[error("migration table '{0}' not found")]
    RepositoryMissing(String),
}

impl MigrationError {
    /// Wrap an error raised by a migration body.
    pub fn failed(migration: impl Into<String>, direction: Direction, source: QueryError) -> Self {
        Self::Failed {
            migration: migration.into(),
            direction,
            source,
        }
    }

    /// Name of the migration that failed, if this is a [`MigrationError::Failed`].
    pub fn migration(&self) -> Option<&str> {
        match self {
            Self::Failed { migration, .. } => Some(migration),
            _ => None,
        }
    }

    /// Check if a migration body failed.
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_display() {
        let err = MigrationError::failed(
            "2024_01_01_create_users",
            Direction::Down,
            QueryError::invalid_query("boom"),
        );
        assert!(err.is_failed());
        assert_eq!(err.migration(), Some("2024_01_01_create_users"));
        assert!(err.to_string().starts_with("migration '2024_01_01_create_users' failed running down"));
    }

    #[test]
    fn test_query_error_converts() {
        let err: MigrationError = QueryError::unknown_connection("audit").into();
        assert!(matches!(err, MigrationError::Query(_)));
        assert!(!err.is_failed());
    }
}
