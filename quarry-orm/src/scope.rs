//! Query scopes.

use std::sync::Arc;

use quarry_query::QueryBuilder;

use crate::definition::ModelDef;

/// A constraint added to every query of a model unless explicitly removed.
pub trait Scope: Send + Sync {
    /// Add the constraint to `query`.
    fn apply<'c>(&self, query: QueryBuilder<'c>, model: &ModelDef) -> QueryBuilder<'c>;
}

impl<F> Scope for F
where
    F: for<'c> Fn(QueryBuilder<'c>) -> QueryBuilder<'c> + Send + Sync,
{
    fn apply<'c>(&self, query: QueryBuilder<'c>, _model: &ModelDef) -> QueryBuilder<'c> {
        self(query)
    }
}

/// Named reusable constraint, applied on request.
pub type LocalScope = Arc<dyn for<'c> Fn(QueryBuilder<'c>) -> QueryBuilder<'c> + Send + Sync>;

/// Hides soft-deleted rows.
#[derive(Debug, Clone, Copy, Default)]
pub struct SoftDeletingScope;

impl Scope for SoftDeletingScope {
    fn apply<'c>(&self, query: QueryBuilder<'c>, model: &ModelDef) -> QueryBuilder<'c> {
        match model.deleted_at_column() {
            Some(column) => query.where_null(model.qualify(column)),
            None => query,
        }
    }
}
