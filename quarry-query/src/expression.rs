//! Raw SQL fragments that bypass identifier wrapping.

use crate::value::Value;

/// A raw SQL fragment with its own bindings.
///
/// ```rust
/// use quarry_query::Expression;
///
/// let expr = Expression::with_bindings("price * ?", [1.2]);
/// assert_eq!(expr.sql(), "price * ?");
/// assert_eq!(expr.bindings().len(), 1);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    sql: String,
    bindings: Vec<Value>,
}

impl Expression {
    /// A fragment with no bindings.
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            bindings: Vec::new(),
        }
    }

    /// A fragment with positional bindings.
    pub fn with_bindings<I, V>(sql: impl Into<String>, bindings: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self {
            sql: sql.into(),
            bindings: bindings.into_iter().map(Into::into).collect(),
        }
    }

    /// The SQL text.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// The bindings, in placeholder order.
    pub fn bindings(&self) -> &[Value] {
        &self.bindings
    }
}

/// Shorthand for [`Expression::new`].
pub fn raw(sql: impl Into<String>) -> Expression {
    Expression::new(sql)
}
