//! SQL grammars: compile a [`Query`] into parameterized SQL.
//!
//! A grammar is a pure function of the AST. Dialects implement the few
//! required methods of [`Grammar`] (identifier quoting and the operator
//! allow-list) and override individual components where their SQL differs.
//!
//! Components of a select are compiled in a fixed order: aggregate,
//! columns, from, joins, wheres, groups, havings, orders, limit, offset,
//! unions. Empty components contribute nothing.
//!
//! ```rust
//! use quarry_query::grammar::{Grammar, SqliteGrammar};
//! use quarry_query::Query;
//!
//! let grammar = SqliteGrammar::new();
//! assert_eq!(grammar.wrap("users.name as n"), r#""users"."name" AS "n""#);
//! assert_eq!(grammar.wrap("posts.*"), r#""posts".*"#);
//!
//! let sql = grammar.compile_select(&Query::table("users")).unwrap();
//! assert_eq!(sql, r#"SELECT * FROM "users""#);
//! ```

mod sqlite;

pub use sqlite::SqliteGrammar;

use std::fmt;

use crate::ast::{
    Aggregate, Assignment, Assignments, BindingKind, Column, Having, Join, JoinCondition, Order,
    Query, Source, Where,
};
use crate::error::{QueryError, QueryResult};
use crate::value::{Row, Value};

/// Compiles query ASTs into SQL for one dialect.
pub trait Grammar: fmt::Debug {
    /// Dialect name, for logs.
    fn name(&self) -> &'static str;

    /// Comparison operators accepted in predicates (lowercase).
    fn operators(&self) -> &[&'static str];

    /// Quote a single identifier segment.
    fn wrap_value(&self, segment: &str) -> String;

    /// Format used when dates are rendered for storage.
    fn date_format(&self) -> &'static str {
        "%Y-%m-%d %H:%M:%S"
    }

    // ============== Identifiers ==============

    /// Whether `operator` is in the allow-list.
    fn is_valid_operator(&self, operator: &str) -> bool {
        let operator = operator.trim().to_lowercase();
        !operator.is_empty() && self.operators().iter().any(|op| *op == operator)
    }

    /// Quote a (possibly dotted, possibly aliased) identifier.
    ///
    /// `*` is never quoted; dotted names are quoted segment by segment.
    fn wrap(&self, name: &str) -> String {
        let lower = name.to_ascii_lowercase();
        if let Some(pos) = lower.find(" as ") {
            let (column, alias) = (&name[..pos], &name[pos + 4..]);
            return format!("{} AS {}", self.wrap(column.trim()), self.wrap_value(alias.trim()));
        }

        name.split('.')
            .map(|segment| {
                if segment == "*" {
                    "*".to_string()
                } else {
                    self.wrap_value(segment)
                }
            })
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Quote a table name.
    fn wrap_table(&self, table: &str) -> String {
        self.wrap(table)
    }

    /// Quote and comma-join column names.
    fn columnize(&self, columns: &[String]) -> String {
        columns.iter().map(|c| self.wrap(c)).collect::<Vec<_>>().join(", ")
    }

    /// `?, ?, ...` for `count` values.
    fn parameterize(&self, count: usize) -> String {
        vec!["?"; count].join(", ")
    }

    // ============== Validation ==============

    /// Check every operator in the query (and its subqueries) against the
    /// allow-list. Runs before any SQL is produced.
    fn validate(&self, query: &Query) -> QueryResult<()> {
        let check = |operator: &str| {
            if self.is_valid_operator(operator) {
                Ok(())
            } else {
                Err(QueryError::invalid_operator(operator))
            }
        };

        if let Some(Source::Sub { query, .. }) = &query.from {
            self.validate(query)?;
        }
        for join in &query.joins {
            for condition in &join.conditions {
                match condition {
                    JoinCondition::On { operator, .. } | JoinCondition::Value { operator, .. } => {
                        check(operator)?
                    }
                }
            }
        }
        for predicate in &query.wheres {
            match predicate {
                Where::Basic { operator, .. } | Where::Column { operator, .. } => check(operator)?,
                Where::Exists { query, .. } | Where::Nested { query, .. } => self.validate(query)?,
                Where::In { .. } | Where::Null { .. } | Where::Between { .. } | Where::Raw { .. } => {}
            }
        }
        for having in &query.havings {
            if let Having::Basic { operator, .. } = having {
                check(operator)?;
            }
        }
        for union in &query.unions {
            self.validate(&union.query)?;
        }
        Ok(())
    }

    // ============== Select ==============

    /// Compile a select statement.
    fn compile_select(&self, query: &Query) -> QueryResult<String> {
        self.validate(query)?;
        Ok(self.compile_components(query))
    }

    /// Compile the components of an already validated select.
    fn compile_components(&self, query: &Query) -> String {
        let parts = [
            self.compile_aggregate(query),
            self.compile_columns(query),
            self.compile_from(query),
            self.compile_joins(query),
            self.compile_wheres(query),
            self.compile_groups(query),
            self.compile_havings(query),
            self.compile_orders(query),
            self.compile_limit(query),
            self.compile_offset(query),
            self.compile_unions(query),
        ];

        parts
            .into_iter()
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// `SELECT FN(col) AS "aggregate"`.
    fn compile_aggregate(&self, query: &Query) -> String {
        let Some(Aggregate { function, columns }) = &query.aggregate else {
            return String::new();
        };

        let mut column = if columns.is_empty() || columns.iter().any(|c| c == "*") {
            "*".to_string()
        } else {
            self.columnize(columns)
        };
        if query.distinct && column != "*" {
            column = format!("DISTINCT {}", column);
        }

        format!("SELECT {}({}) AS {}", function.as_sql(), column, self.wrap_value("aggregate"))
    }

    /// `SELECT [DISTINCT] columns`, empty while an aggregate is set.
    fn compile_columns(&self, query: &Query) -> String {
        if query.aggregate.is_some() {
            return String::new();
        }

        let select = if query.distinct { "SELECT DISTINCT" } else { "SELECT" };
        if query.columns.is_empty() {
            return format!("{} *", select);
        }

        let columns: Vec<String> = query
            .columns
            .iter()
            .map(|column| match column {
                Column::Name(name) => self.wrap(name),
                Column::Raw(expr) => expr.sql().to_string(),
            })
            .collect();
        format!("{} {}", select, columns.join(", "))
    }

    /// `FROM source`.
    fn compile_from(&self, query: &Query) -> String {
        match &query.from {
            None => String::new(),
            Some(Source::Table(table)) => format!("FROM {}", self.wrap_table(table)),
            Some(Source::Raw(expr)) => format!("FROM {}", expr.sql()),
            Some(Source::Sub { query, alias }) => format!(
                "FROM ({}) AS {}",
                self.compile_components(query),
                self.wrap_value(alias)
            ),
        }
    }

    /// All join clauses.
    fn compile_joins(&self, query: &Query) -> String {
        query
            .joins
            .iter()
            .map(|join| self.compile_join(join))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// `{TYPE} JOIN table ON a = b AND ...`.
    fn compile_join(&self, join: &Join) -> String {
        let table = self.wrap_table(&join.table);
        if join.conditions.is_empty() {
            return format!("{} JOIN {}", join.kind.as_sql(), table);
        }

        let conditions: Vec<String> = join
            .conditions
            .iter()
            .enumerate()
            .map(|(index, condition)| {
                let (sql, boolean) = match condition {
                    JoinCondition::On { first, operator, second, boolean } => (
                        format!("{} {} {}", self.wrap(first), operator.to_uppercase(), self.wrap(second)),
                        boolean,
                    ),
                    JoinCondition::Value { column, operator, boolean, .. } => {
                        (format!("{} {} ?", self.wrap(column), operator.to_uppercase()), boolean)
                    }
                };
                if index == 0 {
                    sql
                } else {
                    format!("{} {}", boolean.as_sql(), sql)
                }
            })
            .collect();

        format!("{} JOIN {} ON {}", join.kind.as_sql(), table, conditions.join(" "))
    }

    /// `WHERE p1 AND p2 OR p3`.
    fn compile_wheres(&self, query: &Query) -> String {
        if query.wheres.is_empty() {
            return String::new();
        }
        format!("WHERE {}", self.compile_predicates(&query.wheres))
    }

    /// Predicates joined by their connectives; the first connective is dropped.
    fn compile_predicates(&self, wheres: &[Where]) -> String {
        wheres
            .iter()
            .enumerate()
            .map(|(index, predicate)| {
                let sql = self.compile_where(predicate);
                if index == 0 {
                    sql
                } else {
                    format!("{} {}", predicate.boolean().as_sql(), sql)
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// One predicate without its connective.
    fn compile_where(&self, predicate: &Where) -> String {
        match predicate {
            Where::Basic { column, operator, .. } => {
                format!("{} {} ?", self.wrap(column), operator.to_uppercase())
            }
            Where::Column { first, operator, second, .. } => {
                format!("{} {} {}", self.wrap(first), operator.to_uppercase(), self.wrap(second))
            }
            Where::In { column, values, negated, .. } => {
                if values.is_empty() {
                    return if *negated { "1 = 1".to_string() } else { "0 = 1".to_string() };
                }
                let not = if *negated { "NOT " } else { "" };
                format!("{} {}IN ({})", self.wrap(column), not, self.parameterize(values.len()))
            }
            Where::Null { column, negated, .. } => {
                let not = if *negated { "NOT " } else { "" };
                format!("{} IS {}NULL", self.wrap(column), not)
            }
            Where::Between { column, negated, .. } => {
                let not = if *negated { "NOT " } else { "" };
                format!("{} {}BETWEEN ? AND ?", self.wrap(column), not)
            }
            Where::Exists { query, negated, .. } => {
                let not = if *negated { "NOT " } else { "" };
                format!("{}EXISTS ({})", not, self.compile_components(query))
            }
            Where::Nested { query, .. } => format!("({})", self.compile_predicates(&query.wheres)),
            Where::Raw { expression, .. } => expression.sql().to_string(),
        }
    }

    /// `GROUP BY a, b`.
    fn compile_groups(&self, query: &Query) -> String {
        if query.groups.is_empty() {
            return String::new();
        }
        format!("GROUP BY {}", self.columnize(&query.groups))
    }

    /// `HAVING ...`.
    fn compile_havings(&self, query: &Query) -> String {
        if query.havings.is_empty() {
            return String::new();
        }

        let clauses: Vec<String> = query
            .havings
            .iter()
            .enumerate()
            .map(|(index, having)| {
                let (sql, boolean) = match having {
                    Having::Basic { column, operator, boolean, .. } => {
                        (format!("{} {} ?", self.wrap(column), operator.to_uppercase()), boolean)
                    }
                    Having::Raw { expression, boolean } => (expression.sql().to_string(), boolean),
                };
                if index == 0 {
                    sql
                } else {
                    format!("{} {}", boolean.as_sql(), sql)
                }
            })
            .collect();

        format!("HAVING {}", clauses.join(" "))
    }

    /// `ORDER BY a ASC, b DESC`.
    fn compile_orders(&self, query: &Query) -> String {
        if query.orders.is_empty() {
            return String::new();
        }

        let orders: Vec<String> = query
            .orders
            .iter()
            .map(|order| match order {
                Order::Column { column, direction } => {
                    format!("{} {}", self.wrap(column), direction.as_sql())
                }
                Order::Raw(expr) => expr.sql().to_string(),
            })
            .collect();
        format!("ORDER BY {}", orders.join(", "))
    }

    /// `LIMIT n`.
    fn compile_limit(&self, query: &Query) -> String {
        query.limit.map(|n| format!("LIMIT {}", n)).unwrap_or_default()
    }

    /// `OFFSET n`.
    fn compile_offset(&self, query: &Query) -> String {
        query.offset.map(|n| format!("OFFSET {}", n)).unwrap_or_default()
    }

    /// `UNION [ALL] select ...` for each member.
    fn compile_unions(&self, query: &Query) -> String {
        query
            .unions
            .iter()
            .map(|union| {
                let keyword = if union.all { "UNION ALL" } else { "UNION" };
                format!("{} {}", keyword, self.compile_components(&union.query))
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// `SELECT EXISTS(select) AS "exists"`.
    fn compile_exists(&self, query: &Query) -> QueryResult<String> {
        let select = self.compile_select(query)?;
        Ok(format!("SELECT EXISTS({}) AS {}", select, self.wrap_value("exists")))
    }

    // ============== Writes ==============

    /// `INSERT INTO t (a, b) VALUES (?, ?), (?, ?)`.
    ///
    /// Columns come from the first row; later rows are bound in that column
    /// order (see [`Grammar::prepare_bindings_for_insert`]).
    fn compile_insert(&self, query: &Query, rows: &[Row]) -> QueryResult<String> {
        let table = self.wrap_table(required_table(query)?);
        let Some(first) = rows.first() else {
            return Ok(format!("INSERT INTO {} DEFAULT VALUES", table));
        };
        if first.is_empty() {
            return Ok(format!("INSERT INTO {} DEFAULT VALUES", table));
        }

        let columns: Vec<String> = first.keys().cloned().collect();
        let tuple = format!("({})", self.parameterize(columns.len()));
        let values = vec![tuple; rows.len()].join(", ");

        Ok(format!(
            "INSERT INTO {} ({}) VALUES {}",
            table,
            self.columnize(&columns),
            values
        ))
    }

    /// Insert bindings, row by row in the first row's column order.
    fn prepare_bindings_for_insert(&self, rows: &[Row]) -> Vec<Value> {
        let Some(first) = rows.first() else {
            return Vec::new();
        };
        rows.iter()
            .flat_map(|row| {
                first
                    .keys()
                    .map(|column| row.get(column).cloned().unwrap_or(Value::Null))
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// Insert returning the generated key; dialects with `RETURNING` override.
    fn compile_insert_get_id(&self, query: &Query, row: &Row, _sequence: Option<&str>) -> QueryResult<String> {
        self.compile_insert(query, std::slice::from_ref(row))
    }

    /// `UPDATE t SET a = ?, b = b + ? WHERE ...`.
    fn compile_update(&self, query: &Query, values: &Assignments) -> QueryResult<String> {
        self.validate(query)?;
        if values.is_empty() {
            return Err(QueryError::invalid_query("UPDATE requires at least one column"));
        }
        let table = self.wrap_table(required_table(query)?);

        let sets: Vec<String> = values
            .iter()
            .map(|(column, assignment)| match assignment {
                Assignment::Value(_) => format!("{} = ?", self.wrap(column)),
                Assignment::Raw(expr) => format!("{} = {}", self.wrap(column), expr.sql()),
            })
            .collect();

        let mut parts = vec![format!("UPDATE {}", table)];
        let joins = self.compile_joins(query);
        if !joins.is_empty() {
            parts.push(joins);
        }
        parts.push(format!("SET {}", sets.join(", ")));
        let wheres = self.compile_wheres(query);
        if !wheres.is_empty() {
            parts.push(wheres);
        }
        Ok(parts.join(" "))
    }

    /// Update bindings in emission order: joins, assignments, wheres.
    ///
    /// Only the buckets `compile_update` renders contribute.
    fn prepare_bindings_for_update(&self, query: &Query, values: &Assignments) -> Vec<Value> {
        let mut bindings: Vec<Value> = query.bindings.get(BindingKind::Join).to_vec();
        for assignment in values.values() {
            match assignment {
                Assignment::Value(value) => bindings.push(value.clone()),
                Assignment::Raw(expr) => bindings.extend(expr.bindings().iter().cloned()),
            }
        }
        bindings.extend(query.bindings.get(BindingKind::Where).iter().cloned());
        bindings
    }

    /// `DELETE FROM t WHERE ...`.
    fn compile_delete(&self, query: &Query) -> QueryResult<String> {
        if !query.joins.is_empty() {
            return Err(QueryError::unsupported("DELETE with joins is not supported"));
        }
        self.validate(query)?;
        let table = self.wrap_table(required_table(query)?);
        let wheres = self.compile_wheres(query);
        if wheres.is_empty() {
            Ok(format!("DELETE FROM {}", table))
        } else {
            Ok(format!("DELETE FROM {} {}", table, wheres))
        }
    }

    /// Delete bindings: the where clause is the only part emitted.
    fn prepare_bindings_for_delete(&self, query: &Query) -> Vec<Value> {
        query.bindings.get(BindingKind::Where).to_vec()
    }

    /// Statements that empty the table.
    fn compile_truncate(&self, query: &Query) -> QueryResult<Vec<(String, Vec<Value>)>> {
        let table = self.wrap_table(required_table(query)?);
        Ok(vec![(format!("TRUNCATE TABLE {}", table), Vec::new())])
    }
}

fn required_table(query: &Query) -> QueryResult<&str> {
    query
        .table_name()
        .ok_or_else(|| QueryError::invalid_query("statement requires a plain table source"))
}
