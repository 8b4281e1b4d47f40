//! The migration contract.

use std::fmt;

use quarry_query::{QueryResult, SchemaBuilder};

/// A reversible schema change.
///
/// Migrations are applied in ascending name order, so names usually start
/// with a timestamp (`2024_05_01_120000_create_users`).
pub trait Migration {
    /// Unique name, recorded in the repository once applied.
    fn name(&self) -> &str;

    /// Apply the change.
    fn up(&self, schema: &SchemaBuilder<'_>) -> QueryResult<()>;

    /// Reverse the change.
    fn down(&self, schema: &SchemaBuilder<'_>) -> QueryResult<()>;

    /// Whether `up`/`down` run inside a transaction on their connection.
    fn within_transaction(&self) -> bool {
        true
    }

    /// Connection to run on; `None` uses the default connection.
    fn connection(&self) -> Option<&str> {
        None
    }
}

type Body = Box<dyn Fn(&SchemaBuilder<'_>) -> QueryResult<()>>;

/// A [`Migration`] assembled from closures.
///
/// ```rust
/// use quarry_migrate::{FnMigration, Migration};
///
/// let migration = FnMigration::new("2024_01_01_000000_create_tags")
///     .with_up(|schema| {
///         schema.create("tags", |table| {
///             table.increments("id");
///             table.string("name").unique();
///         })
///     })
///     .with_down(|schema| schema.drop_if_exists("tags"));
///
/// assert_eq!(migration.name(), "2024_01_01_000000_create_tags");
/// assert!(migration.within_transaction());
/// ```
pub struct FnMigration {
    name: String,
    up: Body,
    down: Body,
    transactional: bool,
    connection: Option<String>,
}

impl fmt::Debug for FnMigration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnMigration")
            .field("name", &self.name)
            .field("transactional", &self.transactional)
            .field("connection", &self.connection)
            .finish_non_exhaustive()
    }
}

impl FnMigration {
    /// A migration whose `up` and `down` do nothing until set.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            up: Box::new(|_| Ok(())),
            down: Box::new(|_| Ok(())),
            transactional: true,
            connection: None,
        }
    }

    /// Set the `up` body.
    pub fn with_up<F>(mut self, f: F) -> Self
    where
        F: Fn(&SchemaBuilder<'_>) -> QueryResult<()> + 'static,
    {
        self.up = Box::new(f);
        self
    }

    /// Set the `down` body.
    pub fn with_down<F>(mut self, f: F) -> Self
    where
        F: Fn(&SchemaBuilder<'_>) -> QueryResult<()> + 'static,
    {
        self.down = Box::new(f);
        self
    }

    /// Run outside a transaction.
    pub fn without_transaction(mut self) -> Self {
        self.transactional = false;
        self
    }

    /// Run on the named connection.
    pub fn on_connection(mut self, name: impl Into<String>) -> Self {
        self.connection = Some(name.into());
        self
    }
}

impl Migration for FnMigration {
    fn name(&self) -> &str {
        &self.name
    }

    fn up(&self, schema: &SchemaBuilder<'_>) -> QueryResult<()> {
        (self.up)(schema)
    }

    fn down(&self, schema: &SchemaBuilder<'_>) -> QueryResult<()> {
        (self.down)(schema)
    }

    fn within_transaction(&self) -> bool {
        self.transactional
    }

    fn connection(&self) -> Option<&str> {
        self.connection.as_deref()
    }
}
