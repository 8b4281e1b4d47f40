//! SQLite driver errors.

use thiserror::Error;

use quarry_query::QueryError;

/// Result alias for the driver.
pub type SqliteResult<T> = Result<T, SqliteError>;

/// Failure while opening or talking to a SQLite database.
#[derive(Debug, Error)]
pub enum SqliteError {
    /// Raised by rusqlite.
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// A connection URL or option could not be understood.
    #[error("invalid sqlite configuration: {0}")]
    Config(String),
}

impl SqliteError {
    /// A configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

impl From<SqliteError> for QueryError {
    fn from(err: SqliteError) -> Self {
        match err {
            SqliteError::Config(msg) => QueryError::configuration(msg),
            err @ SqliteError::Sqlite(_) => QueryError::connection(err.to_string()).with_source(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_query::ErrorCode;

    #[test]
    fn test_error_display() {
        let err = SqliteError::config("empty path");
        assert_eq!(err.to_string(), "invalid sqlite configuration: empty path");
    }

    #[test]
    fn test_error_conversion() {
        let err: QueryError = SqliteError::config("bad").into();
        assert_eq!(err.code, ErrorCode::Configuration);

        let err: QueryError = SqliteError::from(rusqlite::Error::InvalidQuery).into();
        assert_eq!(err.code, ErrorCode::ConnectionFailed);
        assert!(std::error::Error::source(&err).is_some());
    }
}
