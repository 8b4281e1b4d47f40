//! Table blueprints: the column, index and foreign-key intentions of one
//! DDL operation.

use crate::error::QueryResult;
use crate::value::Value;

use super::grammar::SchemaGrammar;

/// Column data types.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnType {
    /// 1-byte integer.
    TinyInteger,
    /// 2-byte integer.
    SmallInteger,
    /// 4-byte integer.
    Integer,
    /// 8-byte integer.
    BigInteger,
    /// Variable-length string with a maximum length.
    String(u32),
    /// Fixed-length string.
    Char(u32),
    /// Text.
    Text,
    /// Medium text.
    MediumText,
    /// Long text.
    LongText,
    /// Boolean.
    Boolean,
    /// Date.
    Date,
    /// Date and time.
    DateTime,
    /// Time of day.
    Time,
    /// Timestamp.
    Timestamp,
    /// Fixed-point number with precision and scale.
    Decimal(u8, u8),
    /// Single precision float.
    Float,
    /// Double precision float.
    Double,
    /// JSON document.
    Json,
    /// Binary blob.
    Binary,
    /// UUID.
    Uuid,
    /// One of a fixed set of strings.
    Enum(Vec<String>),
}

impl ColumnType {
    /// Whether this is one of the integer types.
    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            Self::TinyInteger | Self::SmallInteger | Self::Integer | Self::BigInteger
        )
    }
}

/// Default value of a column.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnDefault {
    /// A literal, quoted by the grammar.
    Value(Value),
    /// Raw SQL such as `CURRENT_TIMESTAMP`.
    Raw(String),
}

/// One column and its modifiers.
///
/// Builder methods on [`Blueprint`] return `&mut ColumnDefinition` so
/// modifiers chain:
///
/// ```rust
/// use quarry_query::schema::Blueprint;
///
/// let mut table = Blueprint::create("users");
/// table.string("email").unique();
/// table.integer("votes").unsigned().default(0);
/// table.timestamp("verified_at").nullable();
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDefinition {
    /// Column name.
    pub name: String,
    /// Data type.
    pub kind: ColumnType,
    /// Accepts `NULL`.
    pub nullable: bool,
    /// Default value.
    pub default: Option<ColumnDefault>,
    /// Auto-incrementing primary key.
    pub auto_increment: bool,
    /// Unsigned integer.
    pub unsigned: bool,
    /// Single-column primary key.
    pub primary: bool,
    /// Single-column unique index.
    pub unique: bool,
    /// Single-column plain index.
    pub index: bool,
    /// Column comment, where the dialect supports one.
    pub comment: Option<String>,
}

impl ColumnDefinition {
    /// A `NOT NULL` column without modifiers.
    pub fn new(name: impl Into<String>, kind: ColumnType) -> Self {
        Self {
            name: name.into(),
            kind,
            nullable: false,
            default: None,
            auto_increment: false,
            unsigned: false,
            primary: false,
            unique: false,
            index: false,
            comment: None,
        }
    }

    /// Allow `NULL`.
    pub fn nullable(&mut self) -> &mut Self {
        self.nullable = true;
        self
    }

    /// Literal default value.
    pub fn default(&mut self, value: impl Into<Value>) -> &mut Self {
        self.default = Some(ColumnDefault::Value(value.into()));
        self
    }

    /// Raw SQL default.
    pub fn default_raw(&mut self, sql: impl Into<String>) -> &mut Self {
        self.default = Some(ColumnDefault::Raw(sql.into()));
        self
    }

    /// Default to the current timestamp.
    pub fn use_current(&mut self) -> &mut Self {
        self.default_raw("CURRENT_TIMESTAMP")
    }

    /// Unsigned integer.
    pub fn unsigned(&mut self) -> &mut Self {
        self.unsigned = true;
        self
    }

    /// Add a unique index on this column.
    pub fn unique(&mut self) -> &mut Self {
        self.unique = true;
        self
    }

    /// Add a plain index on this column.
    pub fn index(&mut self) -> &mut Self {
        self.index = true;
        self
    }

    /// Make this column the primary key.
    pub fn primary(&mut self) -> &mut Self {
        self.primary = true;
        self
    }

    /// Auto-incrementing primary key.
    pub fn auto_increment(&mut self) -> &mut Self {
        self.auto_increment = true;
        self
    }

    /// Change the length of a string column.
    pub fn length(&mut self, length: u32) -> &mut Self {
        match &mut self.kind {
            ColumnType::String(n) | ColumnType::Char(n) => *n = length,
            _ => {}
        }
        self
    }

    /// Attach a comment.
    pub fn comment(&mut self, comment: impl Into<String>) -> &mut Self {
        self.comment = Some(comment.into());
        self
    }
}

/// A named index over columns.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexDefinition {
    /// Index name.
    pub name: String,
    /// Indexed columns.
    pub columns: Vec<String>,
}

/// A foreign key: local columns referencing another table.
///
/// ```rust
/// use quarry_query::schema::Blueprint;
///
/// let mut table = Blueprint::create("posts");
/// table.foreign_id("user_id");
/// table.foreign(["user_id"]).references(["id"]).on("users").on_delete("cascade");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ForeignKeyDefinition {
    /// Constraint name.
    pub name: String,
    /// Local columns.
    pub columns: Vec<String>,
    /// Referenced columns.
    pub references: Vec<String>,
    /// Referenced table.
    pub on: String,
    /// `ON DELETE` action.
    pub on_delete: Option<String>,
    /// `ON UPDATE` action.
    pub on_update: Option<String>,
}

impl ForeignKeyDefinition {
    /// Referenced columns.
    pub fn references<I, S>(&mut self, columns: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.references = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Referenced table.
    pub fn on(&mut self, table: impl Into<String>) -> &mut Self {
        self.on = table.into();
        self
    }

    /// `ON DELETE action`.
    pub fn on_delete(&mut self, action: impl Into<String>) -> &mut Self {
        self.on_delete = Some(action.into());
        self
    }

    /// `ON UPDATE action`.
    pub fn on_update(&mut self, action: impl Into<String>) -> &mut Self {
        self.on_update = Some(action.into());
        self
    }

    /// `ON DELETE CASCADE`.
    pub fn cascade_on_delete(&mut self) -> &mut Self {
        self.on_delete("cascade")
    }

    /// `ON DELETE SET NULL`.
    pub fn null_on_delete(&mut self) -> &mut Self {
        self.on_delete("set null")
    }
}

/// A table-level command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// `DROP TABLE`.
    Drop,
    /// `DROP TABLE IF EXISTS`.
    DropIfExists,
    /// Rename the table.
    Rename {
        /// New name.
        to: String,
    },
    /// Drop columns.
    DropColumn {
        /// Dropped columns.
        columns: Vec<String>,
    },
    /// Rename a column.
    RenameColumn {
        /// Current name.
        from: String,
        /// New name.
        to: String,
    },
    /// Primary key.
    Primary(IndexDefinition),
    /// Unique index.
    Unique(IndexDefinition),
    /// Plain index.
    Index(IndexDefinition),
    /// Drop an index.
    DropIndex {
        /// Index name.
        name: String,
    },
    /// Drop a unique index.
    DropUnique {
        /// Index name.
        name: String,
    },
    /// Drop the primary key.
    DropPrimary {
        /// Constraint name.
        name: String,
    },
    /// Drop a foreign key.
    DropForeign {
        /// Constraint name.
        name: String,
    },
}

/// Columns, indexes and commands for one table.
#[derive(Debug, Clone, PartialEq)]
pub struct Blueprint {
    table: String,
    creating: bool,
    columns: Vec<ColumnDefinition>,
    commands: Vec<Command>,
    foreign_keys: Vec<ForeignKeyDefinition>,
}

impl Blueprint {
    /// A blueprint that creates `table`.
    pub fn create(table: impl Into<String>) -> Self {
        Self {
            creating: true,
            ..Self::alter(table)
        }
    }

    /// A blueprint that alters an existing `table`.
    pub fn alter(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            creating: false,
            columns: Vec::new(),
            commands: Vec::new(),
            foreign_keys: Vec::new(),
        }
    }

    /// Table name.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Whether the blueprint creates its table.
    pub fn creating(&self) -> bool {
        self.creating
    }

    /// Column definitions in declaration order.
    pub fn columns(&self) -> &[ColumnDefinition] {
        &self.columns
    }

    /// Commands in declaration order.
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Foreign keys in declaration order.
    pub fn foreign_keys(&self) -> &[ForeignKeyDefinition] {
        &self.foreign_keys
    }

    /// Compile into the statements that apply it.
    pub fn to_sql(&self, grammar: &dyn SchemaGrammar) -> QueryResult<Vec<String>> {
        let commands = self.commands_with_column_indexes();
        let mut statements = Vec::new();

        if self.creating {
            statements.push(grammar.compile_create(self, &commands)?);
        } else {
            for column in &self.columns {
                statements.push(grammar.compile_add_column(self, column)?);
            }
            for foreign in &self.foreign_keys {
                statements.extend(grammar.compile_foreign(self, foreign)?);
            }
        }

        for command in &commands {
            statements.extend(grammar.compile_command(self, command)?);
        }
        Ok(statements)
    }

    /// Explicit commands plus the indexes requested through column
    /// modifiers. Auto-increment columns carry their own primary key.
    fn commands_with_column_indexes(&self) -> Vec<Command> {
        let mut commands = self.commands.clone();
        for column in &self.columns {
            let columns = vec![column.name.clone()];
            if column.primary && !column.auto_increment {
                commands.push(Command::Primary(self.index_definition("primary", columns.clone())));
            }
            if column.unique {
                commands.push(Command::Unique(self.index_definition("unique", columns.clone())));
            }
            if column.index {
                commands.push(Command::Index(self.index_definition("index", columns)));
            }
        }
        commands
    }

    /// Default index name: `{table}_{columns}_{kind}`.
    pub fn index_name(&self, kind: &str, columns: &[String]) -> String {
        format!("{}_{}_{}", self.table, columns.join("_"), kind)
            .to_lowercase()
            .replace(['-', '.'], "_")
    }

    fn index_definition(&self, kind: &str, columns: Vec<String>) -> IndexDefinition {
        IndexDefinition {
            name: self.index_name(kind, &columns),
            columns,
        }
    }

    // ============== Columns ==============

    /// Add a column of any type.
    pub fn add_column(&mut self, name: impl Into<String>, kind: ColumnType) -> &mut ColumnDefinition {
        let index = self.columns.len();
        self.columns.push(ColumnDefinition::new(name, kind));
        &mut self.columns[index]
    }

    /// Auto-incrementing big integer `id` primary key.
    pub fn id(&mut self) -> &mut ColumnDefinition {
        self.big_increments("id")
    }

    /// Auto-incrementing unsigned integer primary key.
    pub fn increments(&mut self, name: impl Into<String>) -> &mut ColumnDefinition {
        self.add_column(name, ColumnType::Integer).unsigned().auto_increment()
    }

    /// Auto-incrementing unsigned big integer primary key.
    pub fn big_increments(&mut self, name: impl Into<String>) -> &mut ColumnDefinition {
        self.add_column(name, ColumnType::BigInteger).unsigned().auto_increment()
    }

    /// Integer column.
    pub fn integer(&mut self, name: impl Into<String>) -> &mut ColumnDefinition {
        self.add_column(name, ColumnType::Integer)
    }

    /// Big integer column.
    pub fn big_integer(&mut self, name: impl Into<String>) -> &mut ColumnDefinition {
        self.add_column(name, ColumnType::BigInteger)
    }

    /// Small integer column.
    pub fn small_integer(&mut self, name: impl Into<String>) -> &mut ColumnDefinition {
        self.add_column(name, ColumnType::SmallInteger)
    }

    /// Tiny integer column.
    pub fn tiny_integer(&mut self, name: impl Into<String>) -> &mut ColumnDefinition {
        self.add_column(name, ColumnType::TinyInteger)
    }

    /// Unsigned integer column.
    pub fn unsigned_integer(&mut self, name: impl Into<String>) -> &mut ColumnDefinition {
        self.integer(name).unsigned()
    }

    /// Unsigned big integer column.
    pub fn unsigned_big_integer(&mut self, name: impl Into<String>) -> &mut ColumnDefinition {
        self.big_integer(name).unsigned()
    }

    /// Unsigned big integer meant to hold a foreign key.
    pub fn foreign_id(&mut self, name: impl Into<String>) -> &mut ColumnDefinition {
        self.unsigned_big_integer(name)
    }

    /// `VARCHAR(255)` column.
    pub fn string(&mut self, name: impl Into<String>) -> &mut ColumnDefinition {
        self.add_column(name, ColumnType::String(255))
    }

    /// Fixed-length string column.
    pub fn char(&mut self, name: impl Into<String>, length: u32) -> &mut ColumnDefinition {
        self.add_column(name, ColumnType::Char(length))
    }

    /// Text column.
    pub fn text(&mut self, name: impl Into<String>) -> &mut ColumnDefinition {
        self.add_column(name, ColumnType::Text)
    }

    /// Medium text column.
    pub fn medium_text(&mut self, name: impl Into<String>) -> &mut ColumnDefinition {
        self.add_column(name, ColumnType::MediumText)
    }

    /// Long text column.
    pub fn long_text(&mut self, name: impl Into<String>) -> &mut ColumnDefinition {
        self.add_column(name, ColumnType::LongText)
    }

    /// Boolean column.
    pub fn boolean(&mut self, name: impl Into<String>) -> &mut ColumnDefinition {
        self.add_column(name, ColumnType::Boolean)
    }

    /// Date column.
    pub fn date(&mut self, name: impl Into<String>) -> &mut ColumnDefinition {
        self.add_column(name, ColumnType::Date)
    }

    /// Date-time column.
    pub fn date_time(&mut self, name: impl Into<String>) -> &mut ColumnDefinition {
        self.add_column(name, ColumnType::DateTime)
    }

    /// Time column.
    pub fn time(&mut self, name: impl Into<String>) -> &mut ColumnDefinition {
        self.add_column(name, ColumnType::Time)
    }

    /// Timestamp column.
    pub fn timestamp(&mut self, name: impl Into<String>) -> &mut ColumnDefinition {
        self.add_column(name, ColumnType::Timestamp)
    }

    /// Nullable `created_at` and `updated_at` timestamps.
    pub fn timestamps(&mut self) {
        self.timestamp("created_at").nullable();
        self.timestamp("updated_at").nullable();
    }

    /// Alias of [`Blueprint::timestamps`].
    pub fn nullable_timestamps(&mut self) {
        self.timestamps();
    }

    /// Nullable `deleted_at` timestamp for soft deletes.
    pub fn soft_deletes(&mut self) -> &mut ColumnDefinition {
        self.timestamp("deleted_at").nullable()
    }

    /// Decimal column.
    pub fn decimal(&mut self, name: impl Into<String>, precision: u8, scale: u8) -> &mut ColumnDefinition {
        self.add_column(name, ColumnType::Decimal(precision, scale))
    }

    /// Float column.
    pub fn float(&mut self, name: impl Into<String>) -> &mut ColumnDefinition {
        self.add_column(name, ColumnType::Float)
    }

    /// Double column.
    pub fn double(&mut self, name: impl Into<String>) -> &mut ColumnDefinition {
        self.add_column(name, ColumnType::Double)
    }

    /// JSON column.
    pub fn json(&mut self, name: impl Into<String>) -> &mut ColumnDefinition {
        self.add_column(name, ColumnType::Json)
    }

    /// Binary column.
    pub fn binary(&mut self, name: impl Into<String>) -> &mut ColumnDefinition {
        self.add_column(name, ColumnType::Binary)
    }

    /// UUID column.
    pub fn uuid(&mut self, name: impl Into<String>) -> &mut ColumnDefinition {
        self.add_column(name, ColumnType::Uuid)
    }

    /// Column restricted to `allowed` values.
    pub fn enumeration<I, S>(&mut self, name: impl Into<String>, allowed: I) -> &mut ColumnDefinition
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.add_column(name, ColumnType::Enum(allowed.into_iter().map(Into::into).collect()))
    }

    // ============== Indexes ==============

    fn columns_of<I, S>(columns: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        columns.into_iter().map(Into::into).collect()
    }

    /// Composite primary key.
    pub fn primary<I, S>(&mut self, columns: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let definition = self.index_definition("primary", Self::columns_of(columns));
        self.commands.push(Command::Primary(definition));
        self
    }

    /// Unique index.
    pub fn unique<I, S>(&mut self, columns: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let definition = self.index_definition("unique", Self::columns_of(columns));
        self.commands.push(Command::Unique(definition));
        self
    }

    /// Plain index.
    pub fn index<I, S>(&mut self, columns: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let definition = self.index_definition("index", Self::columns_of(columns));
        self.commands.push(Command::Index(definition));
        self
    }

    /// Foreign key on local `columns`; complete it with
    /// [`ForeignKeyDefinition::references`] and [`ForeignKeyDefinition::on`].
    pub fn foreign<I, S>(&mut self, columns: I) -> &mut ForeignKeyDefinition
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let columns = Self::columns_of(columns);
        let index = self.foreign_keys.len();
        self.foreign_keys.push(ForeignKeyDefinition {
            name: self.index_name("foreign", &columns),
            columns,
            references: vec!["id".to_string()],
            on: String::new(),
            on_delete: None,
            on_update: None,
        });
        &mut self.foreign_keys[index]
    }

    // ============== Commands ==============

    /// Drop the table.
    pub fn drop(&mut self) {
        self.commands.push(Command::Drop);
    }

    /// Drop the table if it exists.
    pub fn drop_if_exists(&mut self) {
        self.commands.push(Command::DropIfExists);
    }

    /// Rename the table.
    pub fn rename(&mut self, to: impl Into<String>) {
        self.commands.push(Command::Rename { to: to.into() });
    }

    /// Drop columns.
    pub fn drop_column<I, S>(&mut self, columns: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.commands.push(Command::DropColumn {
            columns: Self::columns_of(columns),
        });
    }

    /// Rename a column.
    pub fn rename_column(&mut self, from: impl Into<String>, to: impl Into<String>) {
        self.commands.push(Command::RenameColumn {
            from: from.into(),
            to: to.into(),
        });
    }

    /// Drop `created_at` and `updated_at`.
    pub fn drop_timestamps(&mut self) {
        self.drop_column(["created_at", "updated_at"]);
    }

    /// Drop `deleted_at`.
    pub fn drop_soft_deletes(&mut self) {
        self.drop_column(["deleted_at"]);
    }

    /// Drop an index by name.
    pub fn drop_index(&mut self, name: impl Into<String>) {
        self.commands.push(Command::DropIndex { name: name.into() });
    }

    /// Drop a unique index by name.
    pub fn drop_unique(&mut self, name: impl Into<String>) {
        self.commands.push(Command::DropUnique { name: name.into() });
    }

    /// Drop the primary key.
    pub fn drop_primary(&mut self, name: impl Into<String>) {
        self.commands.push(Command::DropPrimary { name: name.into() });
    }

    /// Drop a foreign key by name.
    pub fn drop_foreign(&mut self, name: impl Into<String>) {
        self.commands.push(Command::DropForeign { name: name.into() });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_column_modifiers_chain() {
        let mut table = Blueprint::create("users");
        table.string("name").length(100).nullable().default("anon");

        let column = &table.columns()[0];
        assert_eq!(column.kind, ColumnType::String(100));
        assert!(column.nullable);
        assert_eq!(column.default, Some(ColumnDefault::Value(Value::from("anon"))));
    }

    #[test]
    fn test_columns_are_not_null_by_default() {
        let mut table = Blueprint::create("users");
        table.integer("votes");
        table.timestamps();

        assert!(!table.columns()[0].nullable);
        assert!(table.columns()[1].nullable);
        assert!(table.columns()[2].nullable);
    }

    #[test]
    fn test_index_names() {
        let table = Blueprint::alter("blog.posts");
        assert_eq!(
            table.index_name("unique", &["user_id".to_string(), "Slug".to_string()]),
            "blog_posts_user_id_slug_unique"
        );
    }

    #[test]
    fn test_column_indexes_become_commands() {
        let mut table = Blueprint::create("users");
        table.id();
        table.string("email").unique();
        table.string("code").primary();

        let commands = table.commands_with_column_indexes();
        assert_eq!(
            commands,
            vec![
                Command::Unique(IndexDefinition {
                    name: "users_email_unique".into(),
                    columns: vec!["email".into()],
                }),
                Command::Primary(IndexDefinition {
                    name: "users_code_primary".into(),
                    columns: vec!["code".into()],
                }),
            ]
        );
    }

    #[test]
    fn test_foreign_defaults_to_id() {
        let mut table = Blueprint::create("posts");
        table.foreign(["user_id"]).on("users").cascade_on_delete();

        let fk = &table.foreign_keys()[0];
        assert_eq!(fk.name, "posts_user_id_foreign");
        assert_eq!(fk.references, vec!["id".to_string()]);
        assert_eq!(fk.on_delete.as_deref(), Some("cascade"));
    }
}
