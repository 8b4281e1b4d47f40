//! The fluent query builder.
//!
//! [`QueryBuilder`] accumulates a [`Query`] AST through chained calls that
//! take and return the builder by value. Terminal operations borrow the
//! builder, compile the AST with the connection's grammar and run it; the
//! builder stays usable afterwards, so one base query can feed several
//! terminals.
//!
//! ```rust
//! use quarry_query::connection::{testing::RecordingDriver, Connection};
//! use quarry_query::SortOrder;
//!
//! let conn = Connection::new("test", RecordingDriver::new());
//! let query = conn
//!     .table("users")
//!     .select(["id", "name"])
//!     .where_eq("active", true)
//!     .r#where("votes", ">", 100)
//!     .order_by("name", SortOrder::Asc)
//!     .limit(10);
//!
//! assert_eq!(
//!     query.to_sql().unwrap(),
//!     r#"SELECT "id", "name" FROM "users" WHERE "active" = ? AND "votes" > ? ORDER BY "name" ASC LIMIT 10"#
//! );
//! assert_eq!(query.get_bindings().len(), 2);
//! ```

use tracing::trace;

use crate::ast::{
    Aggregate, Assignment, Assignments, BindingKind, Column, Having, Join, Order, Query, Source,
    Union, Where,
};
use crate::connection::Connection;
use crate::error::QueryResult;
use crate::expression::Expression;
use crate::grammar::Grammar;
use crate::pagination::{Pagination, Paginator, SimplePaginator};
use crate::types::{AggregateFunction, Boolean, JoinType, SortOrder};
use crate::value::{Row, Value};

/// A query under construction, bound to a connection.
#[derive(Debug, Clone)]
pub struct QueryBuilder<'c> {
    connection: &'c Connection,
    query: Query,
}

impl<'c> From<QueryBuilder<'c>> for Query {
    fn from(builder: QueryBuilder<'c>) -> Self {
        builder.query
    }
}

impl<'c> QueryBuilder<'c> {
    /// An empty query on `connection`.
    pub fn new(connection: &'c Connection) -> Self {
        Self {
            connection,
            query: Query::default(),
        }
    }

    /// Wrap an existing AST.
    pub fn from_query(connection: &'c Connection, query: Query) -> Self {
        Self { connection, query }
    }

    /// The connection this builder runs on.
    pub fn connection(&self) -> &'c Connection {
        self.connection
    }

    /// The AST built so far.
    pub fn query(&self) -> &Query {
        &self.query
    }

    /// Mutable access to the AST.
    pub fn query_mut(&mut self) -> &mut Query {
        &mut self.query
    }

    /// Take the AST out of the builder.
    pub fn into_query(self) -> Query {
        self.query
    }

    /// An empty builder on the same connection.
    pub fn new_query(&self) -> QueryBuilder<'c> {
        QueryBuilder::new(self.connection)
    }

    fn grammar(&self) -> &'c dyn Grammar {
        self.connection.query_grammar()
    }

    /// Apply `f` when `condition` holds.
    pub fn when(self, condition: bool, f: impl FnOnce(Self) -> Self) -> Self {
        if condition { f(self) } else { self }
    }

    // ============== Selection ==============

    /// Replace the selected columns.
    pub fn select<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.query.columns = columns.into_iter().map(|c| Column::Name(c.into())).collect();
        self.query.bindings.clear(BindingKind::Select);
        self
    }

    /// Append selected columns.
    pub fn add_select<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.query
            .columns
            .extend(columns.into_iter().map(|c| Column::Name(c.into())));
        self
    }

    /// Append a raw select expression.
    pub fn select_raw(mut self, expression: Expression) -> Self {
        self.query
            .bindings
            .extend(BindingKind::Select, expression.bindings().iter().cloned());
        self.query.columns.push(Column::Raw(expression));
        self
    }

    /// `SELECT DISTINCT`.
    pub fn distinct(mut self) -> Self {
        self.query.distinct = true;
        self
    }

    /// Set the source table (`"table"` or `"table as alias"`).
    pub fn from(mut self, table: impl Into<String>) -> Self {
        self.query.bindings.clear(BindingKind::From);
        self.query.from = Some(Source::Table(table.into()));
        self
    }

    /// Use a raw source expression.
    pub fn from_raw(mut self, expression: Expression) -> Self {
        self.query.bindings.clear(BindingKind::From);
        self.query
            .bindings
            .extend(BindingKind::From, expression.bindings().iter().cloned());
        self.query.from = Some(Source::Raw(expression));
        self
    }

    /// Select from a derived table.
    pub fn from_sub(mut self, query: impl Into<Query>, alias: impl Into<String>) -> Self {
        let query = query.into();
        self.query.bindings.clear(BindingKind::From);
        self.query.bindings.extend(BindingKind::From, query.get_bindings());
        self.query.from = Some(Source::Sub {
            query: Box::new(query),
            alias: alias.into(),
        });
        self
    }

    // ============== Joins ==============

    /// `INNER JOIN table ON first op second`.
    pub fn join(
        self,
        table: impl Into<String>,
        first: impl Into<String>,
        operator: impl Into<String>,
        second: impl Into<String>,
    ) -> Self {
        self.join_with(Join::new(JoinType::Inner, table).on(first, operator, second))
    }

    /// `LEFT JOIN table ON first op second`.
    pub fn left_join(
        self,
        table: impl Into<String>,
        first: impl Into<String>,
        operator: impl Into<String>,
        second: impl Into<String>,
    ) -> Self {
        self.join_with(Join::new(JoinType::Left, table).on(first, operator, second))
    }

    /// `RIGHT JOIN table ON first op second`.
    pub fn right_join(
        self,
        table: impl Into<String>,
        first: impl Into<String>,
        operator: impl Into<String>,
        second: impl Into<String>,
    ) -> Self {
        self.join_with(Join::new(JoinType::Right, table).on(first, operator, second))
    }

    /// `CROSS JOIN table`.
    pub fn cross_join(self, table: impl Into<String>) -> Self {
        self.join_with(Join::new(JoinType::Cross, table))
    }

    /// `INNER JOIN table ON column op ?`, binding `value`.
    pub fn join_where(
        self,
        table: impl Into<String>,
        column: impl Into<String>,
        operator: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        self.join_with(Join::new(JoinType::Inner, table).where_value(column, operator, value))
    }

    /// Add a fully built join.
    pub fn join_with(mut self, join: Join) -> Self {
        self.query.push_join(join);
        self
    }

    // ============== Where ==============

    fn push_where(mut self, predicate: Where) -> Self {
        self.query.push_where(predicate);
        self
    }

    fn basic(self, column: String, operator: String, value: Value, boolean: Boolean) -> Self {
        if value.is_null() {
            let op = operator.trim().to_ascii_lowercase();
            if op == "=" || op == "is" {
                return self.push_where(Where::Null { column, negated: false, boolean });
            }
            if op == "!=" || op == "<>" || op == "is not" {
                return self.push_where(Where::Null { column, negated: true, boolean });
            }
        }
        self.push_where(Where::Basic { column, operator, value, boolean })
    }

    /// `column operator ?`.
    ///
    /// The operator is checked against the grammar's allow-list when the
    /// query is compiled. Comparing to `NULL` with `=` or `!=` becomes
    /// `IS [NOT] NULL`.
    pub fn r#where(self, column: impl Into<String>, operator: impl Into<String>, value: impl Into<Value>) -> Self {
        self.basic(column.into(), operator.into(), value.into(), Boolean::And)
    }

    /// `column = ?`.
    pub fn where_eq(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.r#where(column, "=", value)
    }

    /// `OR column operator ?`.
    pub fn or_where(self, column: impl Into<String>, operator: impl Into<String>, value: impl Into<Value>) -> Self {
        self.basic(column.into(), operator.into(), value.into(), Boolean::Or)
    }

    /// `OR column = ?`.
    pub fn or_where_eq(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.or_where(column, "=", value)
    }

    /// One `column = ?` per entry.
    pub fn where_all<I, K, V>(self, attributes: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        attributes
            .into_iter()
            .fold(self, |builder, (column, value)| builder.where_eq(column, value))
    }

    /// `first operator second`, comparing two columns.
    pub fn where_column(
        self,
        first: impl Into<String>,
        operator: impl Into<String>,
        second: impl Into<String>,
    ) -> Self {
        self.push_where(Where::Column {
            first: first.into(),
            operator: operator.into(),
            second: second.into(),
            boolean: Boolean::And,
        })
    }

    /// `OR first operator second`.
    pub fn or_where_column(
        self,
        first: impl Into<String>,
        operator: impl Into<String>,
        second: impl Into<String>,
    ) -> Self {
        self.push_where(Where::Column {
            first: first.into(),
            operator: operator.into(),
            second: second.into(),
            boolean: Boolean::Or,
        })
    }

    fn in_list<I, V>(self, column: impl Into<String>, values: I, negated: bool, boolean: Boolean) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.push_where(Where::In {
            column: column.into(),
            values: values.into_iter().map(Into::into).collect(),
            negated,
            boolean,
        })
    }

    /// `column IN (?, ...)`; an empty list matches nothing.
    pub fn where_in<I, V>(self, column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.in_list(column, values, false, Boolean::And)
    }

    /// `OR column IN (?, ...)`.
    pub fn or_where_in<I, V>(self, column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.in_list(column, values, false, Boolean::Or)
    }

    /// `column NOT IN (?, ...)`; an empty list matches everything.
    pub fn where_not_in<I, V>(self, column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.in_list(column, values, true, Boolean::And)
    }

    /// `OR column NOT IN (?, ...)`.
    pub fn or_where_not_in<I, V>(self, column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.in_list(column, values, true, Boolean::Or)
    }

    /// `column IS NULL`.
    pub fn where_null(self, column: impl Into<String>) -> Self {
        self.push_where(Where::Null { column: column.into(), negated: false, boolean: Boolean::And })
    }

    /// `OR column IS NULL`.
    pub fn or_where_null(self, column: impl Into<String>) -> Self {
        self.push_where(Where::Null { column: column.into(), negated: false, boolean: Boolean::Or })
    }

    /// `column IS NOT NULL`.
    pub fn where_not_null(self, column: impl Into<String>) -> Self {
        self.push_where(Where::Null { column: column.into(), negated: true, boolean: Boolean::And })
    }

    /// `OR column IS NOT NULL`.
    pub fn or_where_not_null(self, column: impl Into<String>) -> Self {
        self.push_where(Where::Null { column: column.into(), negated: true, boolean: Boolean::Or })
    }

    /// `column BETWEEN ? AND ?`.
    pub fn where_between(self, column: impl Into<String>, low: impl Into<Value>, high: impl Into<Value>) -> Self {
        self.push_where(Where::Between {
            column: column.into(),
            values: [low.into(), high.into()],
            negated: false,
            boolean: Boolean::And,
        })
    }

    /// `OR column BETWEEN ? AND ?`.
    pub fn or_where_between(self, column: impl Into<String>, low: impl Into<Value>, high: impl Into<Value>) -> Self {
        self.push_where(Where::Between {
            column: column.into(),
            values: [low.into(), high.into()],
            negated: false,
            boolean: Boolean::Or,
        })
    }

    /// `column NOT BETWEEN ? AND ?`.
    pub fn where_not_between(self, column: impl Into<String>, low: impl Into<Value>, high: impl Into<Value>) -> Self {
        self.push_where(Where::Between {
            column: column.into(),
            values: [low.into(), high.into()],
            negated: true,
            boolean: Boolean::And,
        })
    }

    /// `EXISTS (subquery)`.
    pub fn where_exists(self, query: impl Into<Query>) -> Self {
        self.push_where(Where::Exists { query: Box::new(query.into()), negated: false, boolean: Boolean::And })
    }

    /// `OR EXISTS (subquery)`.
    pub fn or_where_exists(self, query: impl Into<Query>) -> Self {
        self.push_where(Where::Exists { query: Box::new(query.into()), negated: false, boolean: Boolean::Or })
    }

    /// `NOT EXISTS (subquery)`.
    pub fn where_not_exists(self, query: impl Into<Query>) -> Self {
        self.push_where(Where::Exists { query: Box::new(query.into()), negated: true, boolean: Boolean::And })
    }

    fn nested(self, f: impl FnOnce(Self) -> Self, boolean: Boolean) -> Self {
        let inner = f(self.new_query());
        if inner.query.wheres.is_empty() {
            return self;
        }
        self.push_where(Where::Nested { query: Box::new(inner.query), boolean })
    }

    /// A parenthesized group of predicates built by `f`.
    ///
    /// ```rust
    /// # use quarry_query::connection::{testing::RecordingDriver, Connection};
    /// # let conn = Connection::new("test", RecordingDriver::new());
    /// let sql = conn
    ///     .table("users")
    ///     .where_eq("active", true)
    ///     .where_nested(|q| q.where_eq("role", "admin").or_where("votes", ">", 10))
    ///     .to_sql()
    ///     .unwrap();
    /// assert_eq!(
    ///     sql,
    ///     r#"SELECT * FROM "users" WHERE "active" = ? AND ("role" = ? OR "votes" > ?)"#
    /// );
    /// ```
    pub fn where_nested(self, f: impl FnOnce(Self) -> Self) -> Self {
        self.nested(f, Boolean::And)
    }

    /// `OR (...)`.
    pub fn or_where_nested(self, f: impl FnOnce(Self) -> Self) -> Self {
        self.nested(f, Boolean::Or)
    }

    /// A raw predicate.
    pub fn where_raw(self, expression: Expression) -> Self {
        self.push_where(Where::Raw { expression, boolean: Boolean::And })
    }

    /// `OR` a raw predicate.
    pub fn or_where_raw(self, expression: Expression) -> Self {
        self.push_where(Where::Raw { expression, boolean: Boolean::Or })
    }

    // ============== Grouping ==============

    /// `GROUP BY columns`.
    pub fn group_by<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.query.groups.extend(columns.into_iter().map(Into::into));
        self
    }

    /// `HAVING column operator ?`.
    pub fn having(mut self, column: impl Into<String>, operator: impl Into<String>, value: impl Into<Value>) -> Self {
        self.query.push_having(Having::Basic {
            column: column.into(),
            operator: operator.into(),
            value: value.into(),
            boolean: Boolean::And,
        });
        self
    }

    /// `OR column operator ?` in `HAVING`.
    pub fn or_having(mut self, column: impl Into<String>, operator: impl Into<String>, value: impl Into<Value>) -> Self {
        self.query.push_having(Having::Basic {
            column: column.into(),
            operator: operator.into(),
            value: value.into(),
            boolean: Boolean::Or,
        });
        self
    }

    /// A raw `HAVING` predicate.
    pub fn having_raw(mut self, expression: Expression) -> Self {
        self.query.push_having(Having::Raw { expression, boolean: Boolean::And });
        self
    }

    // ============== Ordering & Paging ==============

    /// `ORDER BY column direction`.
    pub fn order_by(mut self, column: impl Into<String>, direction: SortOrder) -> Self {
        self.query.orders.push(Order::Column { column: column.into(), direction });
        self
    }

    /// `ORDER BY column DESC`.
    pub fn order_by_desc(self, column: impl Into<String>) -> Self {
        self.order_by(column, SortOrder::Desc)
    }

    /// Newest first by `column`.
    pub fn latest(self, column: impl Into<String>) -> Self {
        self.order_by(column, SortOrder::Desc)
    }

    /// Oldest first by `column`.
    pub fn oldest(self, column: impl Into<String>) -> Self {
        self.order_by(column, SortOrder::Asc)
    }

    /// A raw order expression.
    pub fn order_by_raw(mut self, expression: Expression) -> Self {
        self.query
            .bindings
            .extend(BindingKind::Order, expression.bindings().iter().cloned());
        self.query.orders.push(Order::Raw(expression));
        self
    }

    /// Drop every order term.
    pub fn reorder(mut self) -> Self {
        self.query.clear_orders();
        self
    }

    /// `LIMIT n`.
    pub fn limit(mut self, limit: u64) -> Self {
        self.query.limit = Some(limit);
        self
    }

    /// Alias of [`QueryBuilder::limit`].
    pub fn take(self, limit: u64) -> Self {
        self.limit(limit)
    }

    /// `OFFSET n`.
    pub fn offset(mut self, offset: u64) -> Self {
        self.query.offset = Some(offset);
        self
    }

    /// Alias of [`QueryBuilder::offset`].
    pub fn skip(self, offset: u64) -> Self {
        self.offset(offset)
    }

    /// Limit and offset for a 1-indexed page.
    pub fn for_page(self, page: u64, per_page: u64) -> Self {
        let window = Pagination::page(page, per_page);
        self.offset(window.offset).limit(window.limit)
    }

    // ============== Unions ==============

    /// `UNION query`.
    pub fn union(self, query: impl Into<Query>) -> Self {
        self.push_union(query.into(), false)
    }

    /// `UNION ALL query`.
    pub fn union_all(self, query: impl Into<Query>) -> Self {
        self.push_union(query.into(), true)
    }

    fn push_union(mut self, query: Query, all: bool) -> Self {
        self.query.bindings.extend(BindingKind::Union, query.get_bindings());
        self.query.unions.push(Union { query: Box::new(query), all });
        self
    }

    // ============== Compilation ==============

    /// Compile the select without running it.
    pub fn to_sql(&self) -> QueryResult<String> {
        self.grammar().compile_select(&self.query)
    }

    /// Bindings in placeholder order.
    pub fn get_bindings(&self) -> Vec<Value> {
        self.query.get_bindings()
    }

    // ============== Reads ==============

    /// Run the select.
    pub fn get(&self) -> QueryResult<Vec<Row>> {
        run_select(self.connection, &self.query)
    }

    /// The first matching row.
    pub fn first(&self) -> QueryResult<Option<Row>> {
        Ok(self.clone().limit(1).get()?.into_iter().next())
    }

    /// The row whose `id` equals `id`.
    pub fn find(&self, id: impl Into<Value>) -> QueryResult<Option<Row>> {
        self.clone().where_eq("id", id).first()
    }

    /// A single column of the first row.
    pub fn value(&self, column: impl Into<String>) -> QueryResult<Option<Value>> {
        let row = self.clone().select([column.into()]).first()?;
        Ok(row.and_then(|row| row.into_iter().next().map(|(_, value)| value)))
    }

    /// One column of every row.
    pub fn pluck(&self, column: impl Into<String>) -> QueryResult<Vec<Value>> {
        let rows = self.clone().select([column.into()]).get()?;
        Ok(rows
            .into_iter()
            .filter_map(|row| row.into_iter().next().map(|(_, value)| value))
            .collect())
    }

    /// Whether any row matches.
    pub fn exists(&self) -> QueryResult<bool> {
        let sql = self.grammar().compile_exists(&self.query)?;
        let row = self.connection.select_one(&sql, &self.query.get_bindings())?;
        Ok(row
            .and_then(|row| row.get("exists").and_then(Value::as_bool))
            .unwrap_or(false))
    }

    /// Whether no row matches.
    pub fn doesnt_exist(&self) -> QueryResult<bool> {
        Ok(!self.exists()?)
    }

    // ============== Aggregates ==============

    /// Run an aggregate over `columns` (`*` when empty).
    ///
    /// The aggregate is applied to a copy of the AST; the builder keeps its
    /// column list.
    pub fn aggregate<I, S>(&self, function: AggregateFunction, columns: I) -> QueryResult<Value>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut query = self.query.clone();
        query.aggregate = Some(Aggregate {
            function,
            columns: columns.into_iter().map(Into::into).collect(),
        });
        let row = run_select(self.connection, &query)?.into_iter().next();
        Ok(row
            .and_then(|mut row| row.shift_remove("aggregate"))
            .unwrap_or(Value::Null))
    }

    /// `COUNT(*)`.
    pub fn count(&self) -> QueryResult<u64> {
        let value = self.aggregate(AggregateFunction::Count, ["*"])?;
        Ok(value.as_i64().unwrap_or(0).max(0) as u64)
    }

    /// `MIN(column)`.
    pub fn min(&self, column: impl Into<String>) -> QueryResult<Value> {
        self.aggregate(AggregateFunction::Min, [column.into()])
    }

    /// `MAX(column)`.
    pub fn max(&self, column: impl Into<String>) -> QueryResult<Value> {
        self.aggregate(AggregateFunction::Max, [column.into()])
    }

    /// `SUM(column)`; zero when no row matches.
    pub fn sum(&self, column: impl Into<String>) -> QueryResult<Value> {
        let value = self.aggregate(AggregateFunction::Sum, [column.into()])?;
        Ok(if value.is_null() { Value::Int(0) } else { value })
    }

    /// `AVG(column)`.
    pub fn avg(&self, column: impl Into<String>) -> QueryResult<Value> {
        self.aggregate(AggregateFunction::Avg, [column.into()])
    }

    // ============== Paging ==============

    /// Feed the results to `f` one page of `size` rows at a time.
    ///
    /// Stops after a short page or when `f` returns `false`; returns whether
    /// every page was processed.
    pub fn chunk<F>(&self, size: u64, mut f: F) -> QueryResult<bool>
    where
        F: FnMut(Vec<Row>, u64) -> QueryResult<bool>,
    {
        let size = size.max(1);
        let mut page = 1;
        loop {
            let rows = self.clone().for_page(page, size).get()?;
            let count = rows.len() as u64;
            if count == 0 {
                break;
            }
            trace!(page, rows = count, "chunk");
            if !f(rows, page)? {
                return Ok(false);
            }
            if count < size {
                break;
            }
            page += 1;
        }
        Ok(true)
    }

    /// One page of results plus the total count.
    pub fn paginate(&self, per_page: u64, page: u64) -> QueryResult<Paginator<Row>> {
        let total = self.count_for_pagination()?;
        let data = if total > 0 {
            self.clone().for_page(page, per_page).get()?
        } else {
            Vec::new()
        };
        Ok(Paginator::new(data, total, per_page, page))
    }

    /// One page of results without counting; fetches one extra row to detect a next page.
    pub fn simple_paginate(&self, per_page: u64, page: u64) -> QueryResult<SimplePaginator<Row>> {
        let window = Pagination::page(page, per_page);
        let rows = self
            .clone()
            .offset(window.offset)
            .limit(window.limit.saturating_add(1))
            .get()?;
        Ok(SimplePaginator::new(rows, per_page, page))
    }

    /// Total rows the query would return, ignoring orders and paging.
    ///
    /// Distinct, grouped and unioned queries are counted through a derived
    /// table.
    pub fn count_for_pagination(&self) -> QueryResult<u64> {
        let mut base = self.query.clone();
        base.clear_orders();
        base.limit = None;
        base.offset = None;

        let mut count = if !base.distinct && base.groups.is_empty() && base.unions.is_empty() {
            base
        } else {
            let mut outer = Query::default();
            outer.bindings.extend(BindingKind::From, base.get_bindings());
            outer.from = Some(Source::Sub {
                query: Box::new(base),
                alias: "aggregate_table".to_string(),
            });
            outer
        };
        count.aggregate = Some(Aggregate {
            function: AggregateFunction::Count,
            columns: vec!["*".to_string()],
        });

        let row = run_select(self.connection, &count)?.into_iter().next();
        Ok(row
            .and_then(|row| row.get("aggregate").and_then(Value::as_i64))
            .unwrap_or(0)
            .max(0) as u64)
    }

    // ============== Writes ==============

    /// Insert one or more rows; columns come from the first row.
    pub fn insert<I>(&self, rows: I) -> QueryResult<bool>
    where
        I: IntoIterator<Item = Row>,
    {
        let rows: Vec<Row> = rows.into_iter().collect();
        if rows.is_empty() {
            return Ok(true);
        }
        let grammar = self.grammar();
        let sql = grammar.compile_insert(&self.query, &rows)?;
        self.connection
            .insert(&sql, &grammar.prepare_bindings_for_insert(&rows))?;
        Ok(true)
    }

    /// Insert one row and return its generated key.
    pub fn insert_get_id(&self, row: Row, sequence: Option<&str>) -> QueryResult<Value> {
        let grammar = self.grammar();
        let sql = grammar.compile_insert_get_id(&self.query, &row, sequence)?;
        let bindings = grammar.prepare_bindings_for_insert(std::slice::from_ref(&row));
        self.connection
            .processor()
            .process_insert_get_id(self.connection, &sql, &bindings, sequence)
    }

    /// Update matching rows; returns the number of affected rows.
    pub fn update<I, K, V>(&self, values: I) -> QueryResult<u64>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Assignment>,
    {
        let values: Assignments = values
            .into_iter()
            .map(|(column, value)| (column.into(), value.into()))
            .collect();
        let grammar = self.grammar();
        let sql = grammar.compile_update(&self.query, &values)?;
        self.connection
            .update(&sql, &grammar.prepare_bindings_for_update(&self.query, &values))
    }

    /// Add `amount` to `column`.
    pub fn increment(&self, column: impl Into<String>, amount: impl Into<Value>) -> QueryResult<u64> {
        self.increment_with(column, amount, Row::new())
    }

    /// Add `amount` to `column` and set `extra` columns in the same statement.
    pub fn increment_with(&self, column: impl Into<String>, amount: impl Into<Value>, extra: Row) -> QueryResult<u64> {
        self.step(column.into(), "+", amount.into(), extra)
    }

    /// Subtract `amount` from `column`.
    pub fn decrement(&self, column: impl Into<String>, amount: impl Into<Value>) -> QueryResult<u64> {
        self.decrement_with(column, amount, Row::new())
    }

    /// Subtract `amount` from `column` and set `extra` columns.
    pub fn decrement_with(&self, column: impl Into<String>, amount: impl Into<Value>, extra: Row) -> QueryResult<u64> {
        self.step(column.into(), "-", amount.into(), extra)
    }

    fn step(&self, column: String, sign: &str, amount: Value, extra: Row) -> QueryResult<u64> {
        let expression = Expression::with_bindings(
            format!("{} {} ?", self.grammar().wrap(&column), sign),
            [amount],
        );
        let mut values = Assignments::new();
        values.insert(column, Assignment::Raw(expression));
        for (key, value) in extra {
            values.insert(key, Assignment::Value(value));
        }
        self.update(values)
    }

    /// Delete matching rows; returns the number of affected rows.
    pub fn delete(&self) -> QueryResult<u64> {
        let grammar = self.grammar();
        let sql = grammar.compile_delete(&self.query)?;
        self.connection
            .delete(&sql, &grammar.prepare_bindings_for_delete(&self.query))
    }

    /// Remove every row of the table.
    pub fn truncate(&self) -> QueryResult<()> {
        for (sql, bindings) in self.grammar().compile_truncate(&self.query)? {
            self.connection.statement(&sql, &bindings)?;
        }
        Ok(())
    }
}

fn run_select(connection: &Connection, query: &Query) -> QueryResult<Vec<Row>> {
    let sql = connection.query_grammar().compile_select(query)?;
    let rows = connection.select(&sql, &query.get_bindings())?;
    Ok(connection.processor().process_select(query, rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::testing::RecordingDriver;
    use crate::error::ErrorCode;
    use crate::expression::raw;
    use crate::row;
    use pretty_assertions::assert_eq;

    fn conn() -> Connection {
        Connection::new("test", RecordingDriver::new())
    }

    fn placeholders(sql: &str) -> usize {
        sql.matches('?').count()
    }

    #[test]
    fn test_query_without_wheres_has_no_where_clause() {
        let conn = conn();
        let sql = conn.table("users").order_by("id", SortOrder::Asc).to_sql().unwrap();
        assert!(!sql.contains("WHERE"));
    }

    #[test]
    fn test_bindings_match_placeholders_across_clauses() {
        let conn = conn();
        let sub = conn.table("orders").select(["user_id"]).where_eq("status", "paid");
        let query = conn
            .table("users")
            .select_raw(Expression::with_bindings("? AS flag", [1]))
            .join_where("teams", "teams.kind", "=", "core")
            .where_eq("active", true)
            .where_in("role", ["admin", "staff"])
            .where_between("age", 18, 65)
            .where_exists(sub)
            .group_by(["role"])
            .having("role", "!=", "guest")
            .order_by_raw(Expression::with_bindings("abs(score - ?)", [10]))
            .union(conn.table("admins").where_eq("level", 3));

        let sql = query.to_sql().unwrap();
        let bindings = query.get_bindings();
        assert_eq!(placeholders(&sql), bindings.len());
        assert_eq!(
            bindings,
            vec![
                Value::Int(1),
                Value::from("core"),
                Value::Bool(true),
                Value::from("admin"),
                Value::from("staff"),
                Value::Int(18),
                Value::Int(65),
                Value::from("paid"),
                Value::from("guest"),
                Value::Int(10),
                Value::Int(3),
            ]
        );
    }

    #[test]
    fn test_write_bindings_match_placeholders() {
        let driver = RecordingDriver::new();
        let log = driver.log();
        let conn = Connection::new("test", driver);

        conn.table("posts")
            .where_eq("id", 2)
            .having("votes", ">", 9)
            .order_by_raw(Expression::with_bindings("abs(score - ?)", [4]))
            .delete()
            .unwrap();
        conn.table("posts")
            .where_eq("id", 2)
            .having("votes", ">", 9)
            .order_by_raw(Expression::with_bindings("abs(score - ?)", [4]))
            .update([("title", "x")])
            .unwrap();

        let entries = log.entries();
        for (sql, bindings) in &entries {
            assert_eq!(placeholders(sql), bindings.len(), "{sql}");
        }
        assert_eq!(
            entries,
            vec![
                (r#"DELETE FROM "posts" WHERE "id" = ?"#.to_string(), vec![Value::Int(2)]),
                (
                    r#"UPDATE "posts" SET "title" = ? WHERE "id" = ?"#.to_string(),
                    vec![Value::from("x"), Value::Int(2)],
                ),
            ]
        );
    }

    #[test]
    fn test_delete_with_join_is_rejected() {
        let driver = RecordingDriver::new();
        let log = driver.log();
        let conn = Connection::new("test", driver);

        let err = conn
            .table("posts")
            .join_where("users", "users.id", "=", 1)
            .where_eq("posts.id", 2)
            .delete()
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::UnsupportedOperation);

        let err = conn
            .table("posts")
            .join_where("users", "users.id", "=", 1)
            .update([("title", "x")])
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::UnsupportedOperation);
        assert!(log.is_empty());
    }

    #[test]
    fn test_invalid_operator_fails_before_execution() {
        let driver = RecordingDriver::new();
        let log = driver.log();
        let conn = Connection::new("test", driver);

        let err = conn.table("users").r#where("a", "DROP TABLE", 1).get().unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidOperator);
        assert!(log.is_empty());

        let err = conn.table("users").r#where("a", "", 1).count().unwrap_err();
        assert!(err.is_compilation());
    }

    #[test]
    fn test_null_comparison_becomes_is_null() {
        let conn = conn();
        let query = conn
            .table("users")
            .where_eq("deleted_at", Value::Null)
            .r#where("email", "!=", Option::<String>::None);
        assert_eq!(
            query.to_sql().unwrap(),
            r#"SELECT * FROM "users" WHERE "deleted_at" IS NULL AND "email" IS NOT NULL"#
        );
        assert!(query.get_bindings().is_empty());
    }

    #[test]
    fn test_empty_in_lists() {
        let conn = conn();
        let sql = conn
            .table("users")
            .where_in("id", Vec::<i64>::new())
            .or_where_not_in("id", Vec::<i64>::new())
            .to_sql()
            .unwrap();
        assert_eq!(sql, r#"SELECT * FROM "users" WHERE 0 = 1 OR 1 = 1"#);
    }

    #[test]
    fn test_aggregate_leaves_builder_reusable() {
        let driver = RecordingDriver::new()
            .queue_rows(vec![row! { "aggregate" => 3 }])
            .queue_rows(vec![row! { "id" => 1, "name" => "a" }]);
        let log = driver.log();
        let conn = Connection::new("test", driver);

        let query = conn.table("users").select(["id", "name"]);
        assert_eq!(query.count().unwrap(), 3);
        assert_eq!(query.get().unwrap().len(), 1);

        assert_eq!(
            log.statements(),
            vec![
                r#"SELECT COUNT(*) AS "aggregate" FROM "users""#.to_string(),
                r#"SELECT "id", "name" FROM "users""#.to_string(),
            ]
        );
    }

    #[test]
    fn test_paginate_counts_then_fetches_page() {
        let page_rows: Vec<Row> = (11..=20).map(|id| row! { "id" => id }).collect();
        let driver = RecordingDriver::new()
            .queue_rows(vec![row! { "aggregate" => 25 }])
            .queue_rows(page_rows);
        let log = driver.log();
        let conn = Connection::new("test", driver);

        let page = conn
            .table("posts")
            .order_by("id", SortOrder::Asc)
            .paginate(10, 2)
            .unwrap();

        assert_eq!(page.len(), 10);
        assert_eq!(page.current_page, 2);
        assert_eq!(page.last_page, 3);
        assert!(page.has_more_pages());
        assert_eq!(
            log.statements(),
            vec![
                r#"SELECT COUNT(*) AS "aggregate" FROM "posts""#.to_string(),
                r#"SELECT * FROM "posts" ORDER BY "id" ASC LIMIT 10 OFFSET 10"#.to_string(),
            ]
        );
    }

    #[test]
    fn test_grouped_count_uses_derived_table() {
        let driver = RecordingDriver::new().with_rows(vec![row! { "aggregate" => 2 }]);
        let log = driver.log();
        let conn = Connection::new("test", driver);

        let total = conn
            .table("orders")
            .select(["user_id"])
            .where_eq("paid", true)
            .group_by(["user_id"])
            .count_for_pagination()
            .unwrap();

        assert_eq!(total, 2);
        assert_eq!(
            log.entries(),
            vec![(
                r#"SELECT COUNT(*) AS "aggregate" FROM (SELECT "user_id" FROM "orders" WHERE "paid" = ? GROUP BY "user_id") AS "aggregate_table""#.to_string(),
                vec![Value::Bool(true)],
            )]
        );
    }

    #[test]
    fn test_distinct_count_uses_derived_table() {
        let driver = RecordingDriver::new().with_rows(vec![row! { "aggregate" => 4 }]);
        let log = driver.log();
        let conn = Connection::new("test", driver);

        conn.table("orders").distinct().select(["user_id"]).count_for_pagination().unwrap();
        assert_eq!(
            log.statements(),
            vec![
                r#"SELECT COUNT(*) AS "aggregate" FROM (SELECT DISTINCT "user_id" FROM "orders") AS "aggregate_table""#
                    .to_string()
            ]
        );
    }

    #[test]
    fn test_chunk_stops_on_short_page() {
        let driver = RecordingDriver::new()
            .queue_rows(vec![row! { "id" => 1 }, row! { "id" => 2 }])
            .queue_rows(vec![row! { "id" => 3 }]);
        let log = driver.log();
        let conn = Connection::new("test", driver);

        let mut seen = Vec::new();
        let completed = conn
            .table("users")
            .order_by("id", SortOrder::Asc)
            .chunk(2, |rows, page| {
                seen.push((page, rows.len()));
                Ok(true)
            })
            .unwrap();

        assert!(completed);
        assert_eq!(seen, vec![(1, 2), (2, 1)]);
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn test_chunk_stops_when_callback_declines() {
        let driver = RecordingDriver::new().with_rows(vec![row! { "id" => 1 }, row! { "id" => 2 }]);
        let log = driver.log();
        let conn = Connection::new("test", driver);

        let completed = conn.table("users").chunk(2, |_, _| Ok(false)).unwrap();
        assert!(!completed);
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_simple_paginate_fetches_one_extra_row() {
        let driver = RecordingDriver::new().with_rows(vec![row! { "id" => 1 }, row! { "id" => 2 }, row! { "id" => 3 }]);
        let log = driver.log();
        let conn = Connection::new("test", driver);

        let page = conn.table("users").simple_paginate(2, 1).unwrap();
        assert_eq!(page.data.len(), 2);
        assert!(page.has_more_pages());
        assert_eq!(log.statements(), vec![r#"SELECT * FROM "users" LIMIT 3 OFFSET 0"#]);
    }

    #[test]
    fn test_update_with_increment_expression() {
        let driver = RecordingDriver::new();
        let log = driver.log();
        let conn = Connection::new("test", driver);

        conn.table("posts")
            .where_eq("id", 7)
            .increment_with("views", 2, row! { "touched" => true })
            .unwrap();

        assert_eq!(
            log.entries(),
            vec![(
                r#"UPDATE "posts" SET "views" = "views" + ?, "touched" = ? WHERE "id" = ?"#.to_string(),
                vec![Value::Int(2), Value::Bool(true), Value::Int(7)],
            )]
        );
    }

    #[test]
    fn test_multi_row_insert_and_insert_get_id() {
        let driver = RecordingDriver::new();
        let log = driver.log();
        let conn = Connection::new("test", driver);

        conn.table("tags")
            .insert(vec![row! { "name" => "rust" }, row! { "name" => "sql" }])
            .unwrap();
        let id = conn.table("tags").insert_get_id(row! { "name" => "orm" }, None).unwrap();

        assert_eq!(id, Value::Int(2));
        assert_eq!(
            log.statements(),
            vec![
                r#"INSERT INTO "tags" ("name") VALUES (?), (?)"#,
                r#"INSERT INTO "tags" ("name") VALUES (?)"#,
            ]
        );
    }

    #[test]
    fn test_exists_and_value() {
        let driver = RecordingDriver::new()
            .queue_rows(vec![row! { "exists" => 1 }])
            .queue_rows(vec![row! { "email" => "a@example.com" }]);
        let conn = Connection::new("test", driver);

        let query = conn.table("users").where_eq("id", 1);
        assert!(query.exists().unwrap());
        assert_eq!(query.value("email").unwrap(), Some(Value::from("a@example.com")));
    }

    #[test]
    fn test_from_sub_and_raw_columns() {
        let conn = conn();
        let latest = conn.table("posts").select(["user_id"]).where_eq("published", true);
        let query = conn
            .query()
            .from_sub(latest, "p")
            .select_raw(raw("COUNT(*) AS total"))
            .where_column("p.updated_at", ">", "p.created_at");

        assert_eq!(
            query.to_sql().unwrap(),
            r#"SELECT COUNT(*) AS total FROM (SELECT "user_id" FROM "posts" WHERE "published" = ?) AS "p" WHERE "p"."updated_at" > "p"."created_at""#
        );
        assert_eq!(query.get_bindings(), vec![Value::Bool(true)]);
    }

    #[test]
    fn test_joins_compile_in_order() {
        let conn = conn();
        let sql = conn
            .table("users")
            .join("posts", "users.id", "=", "posts.user_id")
            .left_join("teams as t", "t.id", "=", "users.team_id")
            .cross_join("regions")
            .select(["users.*"])
            .to_sql()
            .unwrap();

        insta::assert_snapshot!(sql, @r#"SELECT "users".* FROM "users" INNER JOIN "posts" ON "users"."id" = "posts"."user_id" LEFT JOIN "teams" AS "t" ON "t"."id" = "users"."team_id" CROSS JOIN "regions""#);
    }

    #[test]
    fn test_delete_and_truncate() {
        let driver = RecordingDriver::new();
        let log = driver.log();
        let conn = Connection::new("test", driver);

        conn.table("sessions").r#where("expires_at", "<", 100).delete().unwrap();
        conn.table("sessions").truncate().unwrap();

        assert_eq!(
            log.statements(),
            vec![
                r#"DELETE FROM "sessions" WHERE "expires_at" < ?"#,
                r#"DELETE FROM sqlite_sequence WHERE name = ?"#,
                r#"DELETE FROM "sessions""#,
            ]
        );
    }

    #[test]
    fn test_when_applies_conditionally() {
        let conn = conn();
        let sql = conn
            .table("users")
            .when(false, |q| q.where_eq("a", 1))
            .when(true, |q| q.limit(5))
            .to_sql()
            .unwrap();
        assert_eq!(sql, r#"SELECT * FROM "users" LIMIT 5"#);
    }
}
