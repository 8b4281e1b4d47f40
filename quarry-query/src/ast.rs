//! The query AST.
//!
//! A [`Query`] is a plain value: cloning it yields an independent copy, so a
//! subquery or a derived count query never aliases the query it came from.
//! Bindings live next to the clauses that produced them, in fixed-order
//! buckets ([`BindingKind`]) so that flattening them reproduces the order in
//! which the grammar emits placeholders.

use indexmap::IndexMap;
use smallvec::SmallVec;

use crate::expression::Expression;
use crate::types::{AggregateFunction, Boolean, JoinType, SortOrder};
use crate::value::Value;

/// A selected column.
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    /// A (possibly dotted or aliased) column name, wrapped by the grammar.
    Name(String),
    /// A raw select expression.
    Raw(Expression),
}

/// The `FROM` source.
#[derive(Debug, Clone, PartialEq)]
pub enum Source {
    /// A table name, optionally `table as alias`.
    Table(String),
    /// A raw source expression.
    Raw(Expression),
    /// A derived table.
    Sub {
        /// The subquery.
        query: Box<Query>,
        /// Alias the derived table is exposed under.
        alias: String,
    },
}

/// A requested aggregate, replacing the column list while set.
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregate {
    /// Aggregate function.
    pub function: AggregateFunction,
    /// Aggregated columns (`*` when empty).
    pub columns: Vec<String>,
}

/// One condition of a join's `ON` clause.
#[derive(Debug, Clone, PartialEq)]
pub enum JoinCondition {
    /// `first operator second`, both identifiers.
    On {
        /// Left-hand column.
        first: String,
        /// Comparison operator.
        operator: String,
        /// Right-hand column.
        second: String,
        /// Connective to the previous condition.
        boolean: Boolean,
    },
    /// `column operator ?`, bound in the join bucket.
    Value {
        /// Column.
        column: String,
        /// Comparison operator.
        operator: String,
        /// Bound value.
        value: Value,
        /// Connective to the previous condition.
        boolean: Boolean,
    },
}

/// A join clause.
#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    /// Join flavour.
    pub kind: JoinType,
    /// Joined table.
    pub table: String,
    /// `ON` conditions in order.
    pub conditions: Vec<JoinCondition>,
}

impl Join {
    /// A join with no conditions yet.
    pub fn new(kind: JoinType, table: impl Into<String>) -> Self {
        Self {
            kind,
            table: table.into(),
            conditions: Vec::new(),
        }
    }

    /// Add an `AND first op second` condition.
    pub fn on(mut self, first: impl Into<String>, operator: impl Into<String>, second: impl Into<String>) -> Self {
        self.conditions.push(JoinCondition::On {
            first: first.into(),
            operator: operator.into(),
            second: second.into(),
            boolean: Boolean::And,
        });
        self
    }

    /// Add an `OR first op second` condition.
    pub fn or_on(mut self, first: impl Into<String>, operator: impl Into<String>, second: impl Into<String>) -> Self {
        self.conditions.push(JoinCondition::On {
            first: first.into(),
            operator: operator.into(),
            second: second.into(),
            boolean: Boolean::Or,
        });
        self
    }

    /// Add an `AND column op ?` condition.
    pub fn where_value(mut self, column: impl Into<String>, operator: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push(JoinCondition::Value {
            column: column.into(),
            operator: operator.into(),
            value: value.into(),
            boolean: Boolean::And,
        });
        self
    }

    /// Values bound by this join, in emission order.
    pub fn bindings(&self) -> impl Iterator<Item = &Value> {
        self.conditions.iter().filter_map(|c| match c {
            JoinCondition::Value { value, .. } => Some(value),
            JoinCondition::On { .. } => None,
        })
    }
}

/// A `WHERE` predicate.
///
/// Values carried by a predicate are also recorded in the `where` binding
/// bucket when the predicate is added to a query.
#[derive(Debug, Clone, PartialEq)]
pub enum Where {
    /// `column operator ?`
    Basic {
        /// Column.
        column: String,
        /// Comparison operator.
        operator: String,
        /// Bound value.
        value: Value,
        /// Connective.
        boolean: Boolean,
    },
    /// `first operator second`, comparing two columns.
    Column {
        /// Left-hand column.
        first: String,
        /// Comparison operator.
        operator: String,
        /// Right-hand column.
        second: String,
        /// Connective.
        boolean: Boolean,
    },
    /// `column [NOT] IN (?, ...)`
    In {
        /// Column.
        column: String,
        /// Bound values.
        values: Vec<Value>,
        /// `NOT IN` when set.
        negated: bool,
        /// Connective.
        boolean: Boolean,
    },
    /// `column IS [NOT] NULL`
    Null {
        /// Column.
        column: String,
        /// `IS NOT NULL` when set.
        negated: bool,
        /// Connective.
        boolean: Boolean,
    },
    /// `column [NOT] BETWEEN ? AND ?`
    Between {
        /// Column.
        column: String,
        /// Lower and upper bound.
        values: [Value; 2],
        /// `NOT BETWEEN` when set.
        negated: bool,
        /// Connective.
        boolean: Boolean,
    },
    /// `[NOT] EXISTS (subquery)`
    Exists {
        /// Subquery.
        query: Box<Query>,
        /// `NOT EXISTS` when set.
        negated: bool,
        /// Connective.
        boolean: Boolean,
    },
    /// Parenthesized group of predicates.
    Nested {
        /// Query whose `wheres` form the group.
        query: Box<Query>,
        /// Connective.
        boolean: Boolean,
    },
    /// Raw predicate.
    Raw {
        /// Raw SQL (bindings kept in the where bucket).
        expression: Expression,
        /// Connective.
        boolean: Boolean,
    },
}

impl Where {
    /// The connective relative to the previous predicate.
    pub fn boolean(&self) -> Boolean {
        match self {
            Self::Basic { boolean, .. }
            | Self::Column { boolean, .. }
            | Self::In { boolean, .. }
            | Self::Null { boolean, .. }
            | Self::Between { boolean, .. }
            | Self::Exists { boolean, .. }
            | Self::Nested { boolean, .. }
            | Self::Raw { boolean, .. } => *boolean,
        }
    }
}

/// A `HAVING` predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum Having {
    /// `column operator ?`
    Basic {
        /// Column or aggregate expression.
        column: String,
        /// Comparison operator.
        operator: String,
        /// Bound value.
        value: Value,
        /// Connective.
        boolean: Boolean,
    },
    /// Raw predicate.
    Raw {
        /// Raw SQL.
        expression: Expression,
        /// Connective.
        boolean: Boolean,
    },
}

/// An `ORDER BY` term.
#[derive(Debug, Clone, PartialEq)]
pub enum Order {
    /// Column with direction.
    Column {
        /// Column.
        column: String,
        /// Direction.
        direction: SortOrder,
    },
    /// Raw order expression.
    Raw(Expression),
}

/// A `UNION [ALL]` member.
#[derive(Debug, Clone, PartialEq)]
pub struct Union {
    /// The unioned query.
    pub query: Box<Query>,
    /// `UNION ALL` when set.
    pub all: bool,
}

/// Binding buckets in emission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingKind {
    /// Raw select expressions.
    Select,
    /// Raw or derived `FROM`.
    From,
    /// Join conditions.
    Join,
    /// Where predicates.
    Where,
    /// Having predicates.
    Having,
    /// Raw order expressions.
    Order,
    /// Unioned queries.
    Union,
}

impl BindingKind {
    /// All buckets in the order their clauses are compiled.
    pub const ALL: [BindingKind; 7] = [
        Self::Select,
        Self::From,
        Self::Join,
        Self::Where,
        Self::Having,
        Self::Order,
        Self::Union,
    ];

    fn index(self) -> usize {
        self as usize
    }
}

/// Bindings grouped per clause kind.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Bindings {
    buckets: [SmallVec<[Value; 4]>; 7],
}

impl Bindings {
    /// Append one value to a bucket.
    pub fn add(&mut self, kind: BindingKind, value: Value) {
        self.buckets[kind.index()].push(value);
    }

    /// Append many values to a bucket.
    pub fn extend<I: IntoIterator<Item = Value>>(&mut self, kind: BindingKind, values: I) {
        self.buckets[kind.index()].extend(values);
    }

    /// Values in one bucket.
    pub fn get(&self, kind: BindingKind) -> &[Value] {
        &self.buckets[kind.index()]
    }

    /// Empty one bucket.
    pub fn clear(&mut self, kind: BindingKind) {
        self.buckets[kind.index()].clear();
    }

    /// Total number of values.
    pub fn len(&self) -> usize {
        self.buckets.iter().map(|b| b.len()).sum()
    }

    /// True when no bucket holds a value.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All values in bucket order, skipping the listed buckets.
    pub fn flatten_except(&self, skip: &[BindingKind]) -> Vec<Value> {
        BindingKind::ALL
            .iter()
            .filter(|kind| !skip.contains(kind))
            .flat_map(|kind| self.get(*kind).iter().cloned())
            .collect()
    }

    /// All values in bucket order.
    pub fn flatten(&self) -> Vec<Value> {
        self.flatten_except(&[])
    }
}

/// A column assignment in an `UPDATE`.
#[derive(Debug, Clone, PartialEq)]
pub enum Assignment {
    /// `column = ?`
    Value(Value),
    /// `column = <expression>`
    Raw(Expression),
}

impl<T: Into<Value>> From<T> for Assignment {
    fn from(value: T) -> Self {
        Self::Value(value.into())
    }
}

impl From<Expression> for Assignment {
    fn from(expr: Expression) -> Self {
        Self::Raw(expr)
    }
}

/// Ordered column assignments for an `UPDATE`.
pub type Assignments = IndexMap<String, Assignment>;

/// A select query as data.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Query {
    /// Aggregate replacing the column list.
    pub aggregate: Option<Aggregate>,
    /// Selected columns (`*` when empty).
    pub columns: Vec<Column>,
    /// `SELECT DISTINCT`.
    pub distinct: bool,
    /// `FROM` source.
    pub from: Option<Source>,
    /// Joins in order.
    pub joins: Vec<Join>,
    /// Predicates in order.
    pub wheres: Vec<Where>,
    /// `GROUP BY` columns.
    pub groups: Vec<String>,
    /// `HAVING` predicates.
    pub havings: Vec<Having>,
    /// `ORDER BY` terms.
    pub orders: Vec<Order>,
    /// `LIMIT`.
    pub limit: Option<u64>,
    /// `OFFSET`.
    pub offset: Option<u64>,
    /// Unioned queries.
    pub unions: Vec<Union>,
    /// Bound values per clause.
    pub bindings: Bindings,
}

impl Query {
    /// A query selecting from `table`.
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            from: Some(Source::Table(table.into())),
            ..Self::default()
        }
    }

    /// The base table name when the source is a plain table.
    pub fn table_name(&self) -> Option<&str> {
        match &self.from {
            Some(Source::Table(t)) => Some(t.as_str()),
            _ => None,
        }
    }

    /// Bindings of the query in placeholder order.
    ///
    /// While an aggregate is set the column list is not compiled, so the
    /// select bucket is left out.
    pub fn get_bindings(&self) -> Vec<Value> {
        if self.aggregate.is_some() {
            self.bindings.flatten_except(&[BindingKind::Select])
        } else {
            self.bindings.flatten()
        }
    }

    /// Push a predicate and record the values it binds.
    pub fn push_where(&mut self, predicate: Where) {
        match &predicate {
            Where::Basic { value, .. } => self.bindings.add(BindingKind::Where, value.clone()),
            Where::In { values, .. } => self.bindings.extend(BindingKind::Where, values.iter().cloned()),
            Where::Between { values, .. } => self.bindings.extend(BindingKind::Where, values.iter().cloned()),
            Where::Exists { query, .. } => self.bindings.extend(BindingKind::Where, query.get_bindings()),
            Where::Nested { query, .. } => self
                .bindings
                .extend(BindingKind::Where, query.bindings.get(BindingKind::Where).iter().cloned()),
            Where::Raw { expression, .. } => self
                .bindings
                .extend(BindingKind::Where, expression.bindings().iter().cloned()),
            Where::Column { .. } | Where::Null { .. } => {}
        }
        self.wheres.push(predicate);
    }

    /// Push a having predicate and record the values it binds.
    pub fn push_having(&mut self, having: Having) {
        match &having {
            Having::Basic { value, .. } => self.bindings.add(BindingKind::Having, value.clone()),
            Having::Raw { expression, .. } => self
                .bindings
                .extend(BindingKind::Having, expression.bindings().iter().cloned()),
        }
        self.havings.push(having);
    }

    /// Push a join and record the values it binds.
    pub fn push_join(&mut self, join: Join) {
        self.bindings.extend(BindingKind::Join, join.bindings().cloned());
        self.joins.push(join);
    }

    /// Drop every predicate and its bindings.
    pub fn clear_wheres(&mut self) {
        self.wheres.clear();
        self.bindings.clear(BindingKind::Where);
    }

    /// Drop every order term and its bindings.
    pub fn clear_orders(&mut self) {
        self.orders.clear();
        self.bindings.clear(BindingKind::Order);
    }
}
