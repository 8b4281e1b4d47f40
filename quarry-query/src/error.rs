//! Error types for building, compiling and executing queries.
//!
//! Every failure in the query layer (and in the model layer built on top of
//! it) is a [`QueryError`]: an [`ErrorCode`] for programmatic handling, a
//! human readable message and an [`ErrorContext`] describing where it
//! happened.
//!
//! # Error Codes
//!
//! Error codes follow a pattern: Q{category}{number}
//! - 1xxx: Compilation errors (bad operator, malformed query)
//! - 2xxx: Model errors (mass assignment, missing model, missing relation)
//! - 3xxx: Connection errors
//! - 4xxx: Transaction errors
//! - 5xxx: Execution errors
//! - 6xxx: Data errors (casts, serialization)
//! - 7xxx: Configuration errors
//! - 9xxx: Internal errors
//!
//! ```rust
//! use quarry_query::{ErrorCode, QueryError};
//!
//! let err = QueryError::invalid_operator("DROP TABLE");
//! assert_eq!(err.code, ErrorCode::InvalidOperator);
//! assert!(err.is_compilation());
//! assert!(err.to_string().starts_with("[Q1001]"));
//! ```

use std::fmt;
use thiserror::Error;

use crate::value::Value;

/// Result type for query operations.
pub type QueryResult<T> = Result<T, QueryError>;

/// Boxed error produced by a database driver.
pub type DriverError = Box<dyn std::error::Error + Send + Sync>;

/// Error codes for programmatic error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // Compilation errors (1xxx)
    /// Operator outside the grammar's allow-list (Q1001).
    InvalidOperator = 1001,
    /// Structurally invalid query (Q1002).
    InvalidQuery = 1002,
    /// Operation the dialect cannot express (Q1003).
    UnsupportedOperation = 1003,

    // Model errors (2xxx)
    /// Attribute rejected by the mass-assignment guard (Q2001).
    MassAssignment = 2001,
    /// No model matched a `*_or_fail` lookup (Q2002).
    ModelNotFound = 2002,
    /// Relation name not declared on the model (Q2003).
    RelationNotFound = 2003,
    /// Local scope name not declared on the model (Q2004).
    ScopeNotFound = 2004,
    /// Model type not registered (Q2005).
    UnknownModel = 2005,

    // Connection errors (3xxx)
    /// Database connection failed (Q3001).
    ConnectionFailed = 3001,
    /// Connection name not configured (Q3002).
    UnknownConnection = 3002,

    // Transaction errors (4xxx)
    /// Transaction begin/commit/rollback failed (Q4001).
    TransactionFailed = 4001,

    // Execution errors (5xxx)
    /// Statement failed inside the driver (Q5001).
    ExecutionFailed = 5001,

    // Data errors (6xxx)
    /// Value could not be cast to the declared type (Q6001).
    InvalidCast = 6001,
    /// Serialization error (Q6002).
    SerializationError = 6002,

    // Configuration errors (7xxx)
    /// Invalid or missing configuration (Q7001).
    Configuration = 7001,

    // Internal errors (9xxx)
    /// Internal error (Q9001).
    Internal = 9001,
}

impl ErrorCode {
    /// Get the error code string (e.g., "Q1001").
    pub fn code(&self) -> String {
        format!("Q{}", *self as u16)
    }

    /// Get a short description of the error code.
    pub fn description(&self) -> &'static str {
        match self {
            Self::InvalidOperator => "Invalid operator",
            Self::InvalidQuery => "Invalid query",
            Self::UnsupportedOperation => "Unsupported operation",
            Self::MassAssignment => "Mass assignment rejected",
            Self::ModelNotFound => "Model not found",
            Self::RelationNotFound => "Relation not found",
            Self::ScopeNotFound => "Scope not found",
            Self::UnknownModel => "Unknown model",
            Self::ConnectionFailed => "Database connection failed",
            Self::UnknownConnection => "Unknown connection",
            Self::TransactionFailed => "Transaction failed",
            Self::ExecutionFailed => "Statement execution failed",
            Self::InvalidCast => "Invalid cast",
            Self::SerializationError => "Serialization error",
            Self::Configuration => "Invalid configuration",
            Self::Internal => "Internal error",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Additional context for an error.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    /// The operation that was being performed.
    pub operation: Option<String>,
    /// The model involved.
    pub model: Option<String>,
    /// The attribute, relation or scope involved.
    pub field: Option<String>,
    /// The primary key(s) involved in a lookup.
    pub keys: Vec<Value>,
    /// The SQL statement (if available).
    pub sql: Option<String>,
    /// The bindings sent with `sql`.
    pub bindings: Vec<Value>,
    /// Help text.
    pub help: Option<String>,
}

/// Errors that can occur during query operations.
#[derive(Error, Debug)]
pub struct QueryError {
    /// The error code.
    pub code: ErrorCode,
    /// The error message.
    pub message: String,
    /// Additional context.
    pub context: ErrorContext,
    /// The source error (if any).
    #[source]
    pub source: Option<DriverError>,
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code.code(), self.message)
    }
}

impl QueryError {
    /// Create a new error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            context: ErrorContext::default(),
            source: None,
        }
    }

    /// Add context about the operation.
    pub fn with_context(mut self, operation: impl Into<String>) -> Self {
        self.context.operation = Some(operation.into());
        self
    }

    /// Add help text.
    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.context.help = Some(help.into());
        self
    }

    /// Set the model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.context.model = Some(model.into());
        self
    }

    /// Set the field.
    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.context.field = Some(field.into());
        self
    }

    /// Set the SQL statement and its bindings.
    pub fn with_sql(mut self, sql: impl Into<String>, bindings: &[Value]) -> Self {
        self.context.sql = Some(sql.into());
        self.context.bindings = bindings.to_vec();
        self
    }

    /// Set the source error.
    pub fn with_source<E: std::error::Error + Send + Sync + 'static>(mut self, source: E) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    // ============== Constructor Functions ==============

    /// An operator that the grammar does not accept.
    pub fn invalid_operator(operator: impl Into<String>) -> Self {
        let operator = operator.into();
        Self::new(
            ErrorCode::InvalidOperator,
            format!("Illegal operator '{}' in query", operator),
        )
        .with_field(operator)
        .with_help("Use one of the comparison operators supported by the connection's grammar")
    }

    /// A query that cannot be compiled.
    pub fn invalid_query(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidQuery, message)
    }

    /// An operation the grammar cannot express.
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::UnsupportedOperation, message)
    }

    /// A driver failure while running `sql`.
    pub fn execution(sql: impl Into<String>, bindings: &[Value], source: DriverError) -> Self {
        let sql = sql.into();
        let mut err = Self::new(
            ErrorCode::ExecutionFailed,
            format!("{} (SQL: {})", source, sql),
        )
        .with_sql(sql, bindings);
        err.source = Some(source);
        err
    }

    /// Mass assignment of a guarded attribute.
    pub fn mass_assignment(model: impl Into<String>, key: impl Into<String>) -> Self {
        let model = model.into();
        let key = key.into();
        Self::new(
            ErrorCode::MassAssignment,
            format!(
                "Add [{}] to fillable property to allow mass assignment on [{}]",
                key, model
            ),
        )
        .with_model(model)
        .with_field(key)
    }

    /// No model matched the given keys.
    pub fn model_not_found(model: impl Into<String>, keys: Vec<Value>) -> Self {
        let model = model.into();
        let message = if keys.is_empty() {
            format!("No query results for model [{}]", model)
        } else {
            let ids: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
            format!("No query results for model [{}] {}", model, ids.join(", "))
        };
        let mut err = Self::new(ErrorCode::ModelNotFound, message).with_model(model);
        err.context.keys = keys;
        err
    }

    /// A relation name that was never declared.
    pub fn relation_not_found(model: impl Into<String>, relation: impl Into<String>) -> Self {
        let model = model.into();
        let relation = relation.into();
        Self::new(
            ErrorCode::RelationNotFound,
            format!("Call to undefined relationship [{}] on model [{}]", relation, model),
        )
        .with_model(model)
        .with_field(relation)
    }

    /// A local scope name that was never declared.
    pub fn scope_not_found(model: impl Into<String>, scope: impl Into<String>) -> Self {
        let model = model.into();
        let scope = scope.into();
        Self::new(
            ErrorCode::ScopeNotFound,
            format!("Call to undefined scope [{}] on model [{}]", scope, model),
        )
        .with_model(model)
        .with_field(scope)
    }

    /// A model name missing from the registry.
    pub fn unknown_model(model: impl Into<String>) -> Self {
        let model = model.into();
        Self::new(
            ErrorCode::UnknownModel,
            format!("Model [{}] is not registered", model),
        )
        .with_model(model)
    }

    /// A connection that could not be established.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConnectionFailed, message)
    }

    /// A connection name with no configuration.
    pub fn unknown_connection(name: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::UnknownConnection,
            format!("Database connection [{}] not configured", name.into()),
        )
    }

    /// A transaction control statement failed.
    pub fn transaction(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::TransactionFailed, message)
    }

    /// A value that cannot be cast.
    pub fn invalid_cast(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidCast, message).with_field(key)
    }

    /// Serialization failure.
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::SerializationError, message)
    }

    /// Configuration failure.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Configuration, message)
    }

    /// Internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }

    // ============== Error Checks ==============

    /// Errors detected before anything reached the database.
    pub fn is_compilation(&self) -> bool {
        matches!(
            self.code,
            ErrorCode::InvalidOperator | ErrorCode::InvalidQuery | ErrorCode::UnsupportedOperation
        )
    }

    /// Errors raised by the database while running a statement.
    pub fn is_execution(&self) -> bool {
        matches!(
            self.code,
            ErrorCode::ExecutionFailed | ErrorCode::TransactionFailed | ErrorCode::ConnectionFailed
        )
    }

    /// Check if this is a model-not-found error.
    pub fn is_not_found(&self) -> bool {
        self.code == ErrorCode::ModelNotFound
    }

    /// Get the error code.
    pub fn error_code(&self) -> &ErrorCode {
        &self.code
    }

    /// Multi-line rendering including SQL, bindings and help.
    pub fn display_full(&self) -> String {
        let mut output = format!("Error [{}]: {}", self.code.code(), self.message);

        if let Some(ref op) = self.context.operation {
            output.push_str(&format!("\n  -> While: {}", op));
        }
        if let Some(ref model) = self.context.model {
            output.push_str(&format!("\n  -> Model: {}", model));
        }
        if let Some(ref field) = self.context.field {
            output.push_str(&format!("\n  -> Field: {}", field));
        }
        if let Some(ref sql) = self.context.sql {
            output.push_str(&format!("\n  -> SQL: {}", sql));
            if !self.context.bindings.is_empty() {
                let bindings: Vec<String> =
                    self.context.bindings.iter().map(|b| format!("{:?}", b)).collect();
                output.push_str(&format!("\n  -> Bindings: [{}]", bindings.join(", ")));
            }
        }
        if let Some(ref help) = self.context.help {
            output.push_str(&format!("\n  Help: {}", help));
        }

        output
    }
}

impl From<serde_json::Error> for QueryError {
    fn from(err: serde_json::Error) -> Self {
        QueryError::serialization(err.to_string()).with_source(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_format() {
        assert_eq!(ErrorCode::InvalidOperator.code(), "Q1001");
        assert_eq!(ErrorCode::MassAssignment.code(), "Q2001");
        assert_eq!(ErrorCode::ExecutionFailed.code(), "Q5001");
    }

    #[test]
    fn test_compilation_errors_are_not_execution_errors() {
        let err = QueryError::invalid_operator("DROP TABLE");
        assert!(err.is_compilation());
        assert!(!err.is_execution());
        assert_eq!(err.context.field.as_deref(), Some("DROP TABLE"));
    }

    #[test]
    fn test_execution_error_keeps_sql_and_bindings() {
        let source: DriverError = "no such table: users".into();
        let err = QueryError::execution(
            "SELECT * FROM \"users\" WHERE \"id\" = ?",
            &[Value::Int(1)],
            source,
        );

        assert!(err.is_execution());
        assert_eq!(err.context.bindings, vec![Value::Int(1)]);
        assert!(err.message.contains("no such table"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_model_not_found_lists_keys() {
        let err = QueryError::model_not_found("User", vec![Value::Int(7)]);
        assert!(err.is_not_found());
        assert!(err.message.contains("[User] 7"));
        assert_eq!(err.context.keys, vec![Value::Int(7)]);
    }

    #[test]
    fn test_display_full() {
        let err = QueryError::relation_not_found("Post", "author").with_context("eager loading");
        let full = err.display_full();
        assert!(full.contains("Q2003"));
        assert!(full.contains("Model: Post"));
        assert!(full.contains("Field: author"));
        assert!(full.contains("While: eager loading"));
    }
}
