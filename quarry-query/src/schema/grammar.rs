//! DDL grammars: compile blueprints into statements.

use std::fmt;

use super::blueprint::{Blueprint, ColumnDefault, ColumnDefinition, ColumnType, Command, ForeignKeyDefinition};
use crate::error::{QueryError, QueryResult};
use crate::value::Value;

/// Compiles [`Blueprint`]s into DDL for one dialect.
pub trait SchemaGrammar: fmt::Debug {
    /// Dialect name.
    fn name(&self) -> &'static str;

    /// Quote an identifier.
    fn wrap(&self, identifier: &str) -> String;

    /// Quote and comma-join identifiers.
    fn columnize(&self, columns: &[String]) -> String {
        columns.iter().map(|c| self.wrap(c)).collect::<Vec<_>>().join(", ")
    }

    /// Whether constraints can be added to or dropped from existing tables.
    fn alters_constraints(&self) -> bool {
        true
    }

    /// SQL type of a column.
    fn type_sql(&self, column: &ColumnDefinition) -> String;

    /// Render a literal default.
    fn compile_default(&self, default: &ColumnDefault) -> String {
        match default {
            ColumnDefault::Raw(sql) => sql.clone(),
            ColumnDefault::Value(Value::Null) => "NULL".to_string(),
            ColumnDefault::Value(Value::Bool(b)) => format!("'{}'", *b as i32),
            ColumnDefault::Value(Value::Int(i)) => i.to_string(),
            ColumnDefault::Value(Value::Float(f)) => f.to_string(),
            ColumnDefault::Value(Value::Json(json)) => quote_literal(&json.to_string()),
            ColumnDefault::Value(other) => quote_literal(&other.to_string()),
        }
    }

    /// Column definition: name, type, then modifiers.
    fn compile_column(&self, column: &ColumnDefinition) -> String {
        let mut sql = format!("{} {}", self.wrap(&column.name), self.type_sql(column));
        if column.auto_increment && column.kind.is_integer() {
            sql.push_str(" PRIMARY KEY AUTOINCREMENT");
        }
        if !column.nullable {
            sql.push_str(" NOT NULL");
        }
        if let Some(default) = &column.default {
            sql.push_str(" DEFAULT ");
            sql.push_str(&self.compile_default(default));
        }
        sql
    }

    /// `CREATE TABLE` with column clauses followed by primary-key, unique
    /// and foreign-key constraint clauses.
    fn compile_create(&self, blueprint: &Blueprint, commands: &[Command]) -> QueryResult<String> {
        let mut clauses: Vec<String> = blueprint
            .columns()
            .iter()
            .map(|column| self.compile_column(column))
            .collect();

        for command in commands {
            if let Command::Primary(index) = command {
                clauses.push(format!("PRIMARY KEY ({})", self.columnize(&index.columns)));
            }
        }
        for command in commands {
            if let Command::Unique(index) = command {
                clauses.push(format!("UNIQUE ({})", self.columnize(&index.columns)));
            }
        }
        for foreign in blueprint.foreign_keys() {
            clauses.push(self.compile_foreign_clause(foreign)?);
        }

        if clauses.is_empty() {
            return Err(QueryError::invalid_query(format!(
                "table {} needs at least one column",
                blueprint.table()
            )));
        }
        Ok(format!(
            "CREATE TABLE {} ({})",
            self.wrap(blueprint.table()),
            clauses.join(", ")
        ))
    }

    /// `FOREIGN KEY (..) REFERENCES t (..) [ON DELETE ..] [ON UPDATE ..]`.
    fn compile_foreign_clause(&self, foreign: &ForeignKeyDefinition) -> QueryResult<String> {
        if foreign.on.is_empty() {
            return Err(QueryError::invalid_query(format!(
                "foreign key {} does not name a referenced table",
                foreign.name
            )));
        }
        let mut sql = format!(
            "FOREIGN KEY ({}) REFERENCES {} ({})",
            self.columnize(&foreign.columns),
            self.wrap(&foreign.on),
            self.columnize(&foreign.references)
        );
        if let Some(action) = &foreign.on_delete {
            sql.push_str(&format!(" ON DELETE {}", action.to_uppercase()));
        }
        if let Some(action) = &foreign.on_update {
            sql.push_str(&format!(" ON UPDATE {}", action.to_uppercase()));
        }
        Ok(sql)
    }

    /// Add one column to an existing table.
    fn compile_add_column(&self, blueprint: &Blueprint, column: &ColumnDefinition) -> QueryResult<String> {
        Ok(format!(
            "ALTER TABLE {} ADD COLUMN {}",
            self.wrap(blueprint.table()),
            self.compile_column(column)
        ))
    }

    /// Add a foreign key to an existing table.
    fn compile_foreign(&self, blueprint: &Blueprint, foreign: &ForeignKeyDefinition) -> QueryResult<Vec<String>> {
        if !self.alters_constraints() {
            return Err(unsupported_alteration(self.name(), blueprint.table()));
        }
        Ok(vec![format!(
            "ALTER TABLE {} ADD CONSTRAINT {} {}",
            self.wrap(blueprint.table()),
            self.wrap(&foreign.name),
            self.compile_foreign_clause(foreign)?
        )])
    }

    /// Statements for one command. Primary and unique constraints of a
    /// created table are part of its `CREATE TABLE` and yield nothing here.
    fn compile_command(&self, blueprint: &Blueprint, command: &Command) -> QueryResult<Vec<String>> {
        let table = self.wrap(blueprint.table());
        let alters_constraint = matches!(
            command,
            Command::DropPrimary { .. } | Command::DropForeign { .. }
        ) || (matches!(command, Command::Primary(_)) && !blueprint.creating());
        if alters_constraint && !self.alters_constraints() {
            return Err(unsupported_alteration(self.name(), blueprint.table()));
        }

        let statements = match command {
            Command::Drop => vec![format!("DROP TABLE {}", table)],
            Command::DropIfExists => vec![format!("DROP TABLE IF EXISTS {}", table)],
            Command::Rename { to } => vec![format!("ALTER TABLE {} RENAME TO {}", table, self.wrap(to))],
            Command::DropColumn { columns } => columns
                .iter()
                .map(|column| format!("ALTER TABLE {} DROP COLUMN {}", table, self.wrap(column)))
                .collect(),
            Command::RenameColumn { from, to } => vec![format!(
                "ALTER TABLE {} RENAME COLUMN {} TO {}",
                table,
                self.wrap(from),
                self.wrap(to)
            )],
            Command::Primary(_) | Command::Unique(_) if blueprint.creating() => Vec::new(),
            Command::Primary(index) => vec![format!(
                "ALTER TABLE {} ADD PRIMARY KEY ({})",
                table,
                self.columnize(&index.columns)
            )],
            Command::Unique(index) => vec![format!(
                "CREATE UNIQUE INDEX {} ON {} ({})",
                self.wrap(&index.name),
                table,
                self.columnize(&index.columns)
            )],
            Command::Index(index) => vec![format!(
                "CREATE INDEX {} ON {} ({})",
                self.wrap(&index.name),
                table,
                self.columnize(&index.columns)
            )],
            Command::DropIndex { name } | Command::DropUnique { name } => {
                vec![format!("DROP INDEX {}", self.wrap(name))]
            }
            Command::DropPrimary { name } | Command::DropForeign { name } => {
                vec![format!("ALTER TABLE {} DROP CONSTRAINT {}", table, self.wrap(name))]
            }
        };
        Ok(statements)
    }

    /// Query (one binding: the table name) returning a row when the table exists.
    fn compile_table_exists(&self) -> String;

    /// Query listing user tables in a `name` column.
    fn compile_tables(&self) -> String;

    /// Query listing the columns of `table` in a `name` column.
    fn compile_column_listing(&self, table: &str) -> String;

    /// Turn foreign key enforcement on.
    fn compile_enable_foreign_key_constraints(&self) -> String;

    /// Turn foreign key enforcement off.
    fn compile_disable_foreign_key_constraints(&self) -> String;
}

fn unsupported_alteration(dialect: &str, table: &str) -> QueryError {
    QueryError::unsupported(format!(
        "{} cannot add or drop constraints on existing table {}",
        dialect, table
    ))
}

fn quote_literal(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

/// Schema grammar for SQLite.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteSchemaGrammar;

impl SqliteSchemaGrammar {
    /// Create the grammar.
    pub fn new() -> Self {
        Self
    }
}

impl SchemaGrammar for SqliteSchemaGrammar {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn wrap(&self, identifier: &str) -> String {
        format!("\"{}\"", identifier.replace('"', "\"\""))
    }

    fn type_sql(&self, column: &ColumnDefinition) -> String {
        match &column.kind {
            ColumnType::TinyInteger
            | ColumnType::SmallInteger
            | ColumnType::Integer
            | ColumnType::BigInteger => "INTEGER".to_string(),
            ColumnType::String(_) | ColumnType::Char(_) | ColumnType::Uuid => "VARCHAR".to_string(),
            ColumnType::Text | ColumnType::MediumText | ColumnType::LongText | ColumnType::Json => {
                "TEXT".to_string()
            }
            ColumnType::Boolean => "TINYINT(1)".to_string(),
            ColumnType::Date => "DATE".to_string(),
            ColumnType::DateTime | ColumnType::Timestamp => "DATETIME".to_string(),
            ColumnType::Time => "TIME".to_string(),
            ColumnType::Decimal(_, _) => "NUMERIC".to_string(),
            ColumnType::Float => "FLOAT".to_string(),
            ColumnType::Double => "DOUBLE".to_string(),
            ColumnType::Binary => "BLOB".to_string(),
            ColumnType::Enum(allowed) => {
                let allowed: Vec<String> = allowed.iter().map(|v| quote_literal(v)).collect();
                format!("VARCHAR CHECK ({} IN ({}))", self.wrap(&column.name), allowed.join(", "))
            }
        }
    }

    fn alters_constraints(&self) -> bool {
        false
    }

    fn compile_table_exists(&self) -> String {
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?".to_string()
    }

    fn compile_tables(&self) -> String {
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name"
            .to_string()
    }

    fn compile_column_listing(&self, table: &str) -> String {
        format!("PRAGMA table_info({})", self.wrap(table))
    }

    fn compile_enable_foreign_key_constraints(&self) -> String {
        "PRAGMA foreign_keys = ON".to_string()
    }

    fn compile_disable_foreign_key_constraints(&self) -> String {
        "PRAGMA foreign_keys = OFF".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use pretty_assertions::assert_eq;

    fn compile(blueprint: &Blueprint) -> QueryResult<Vec<String>> {
        blueprint.to_sql(&SqliteSchemaGrammar::new())
    }

    #[test]
    fn test_posts_table_has_one_primary_key_clause() {
        let mut table = Blueprint::create("posts");
        table.id();
        table.string("title");
        table.integer("user_id");
        table.timestamps();

        let statements = compile(&table).unwrap();
        assert_eq!(statements.len(), 1);
        insta::assert_snapshot!(statements[0], @r#"CREATE TABLE "posts" ("id" INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL, "title" VARCHAR NOT NULL, "user_id" INTEGER NOT NULL, "created_at" DATETIME, "updated_at" DATETIME)"#);
        assert_eq!(statements[0].matches("PRIMARY KEY").count(), 1);
    }

    #[test]
    fn test_constraints_follow_columns() {
        let mut table = Blueprint::create("post_tag");
        table.foreign_id("post_id");
        table.foreign_id("tag_id");
        table.string("slug").unique();
        table.boolean("pinned").default(false);
        table.primary(["post_id", "tag_id"]);
        table.foreign(["post_id"]).on("posts").cascade_on_delete();
        table.index(["tag_id"]);

        assert_eq!(
            compile(&table).unwrap(),
            vec![
                concat!(
                    r#"CREATE TABLE "post_tag" ("post_id" INTEGER NOT NULL, "tag_id" INTEGER NOT NULL, "#,
                    r#""slug" VARCHAR NOT NULL, "pinned" TINYINT(1) NOT NULL DEFAULT '0', "#,
                    r#"PRIMARY KEY ("post_id", "tag_id"), UNIQUE ("slug"), "#,
                    r#"FOREIGN KEY ("post_id") REFERENCES "posts" ("id") ON DELETE CASCADE)"#
                )
                .to_string(),
                r#"CREATE INDEX "post_tag_tag_id_index" ON "post_tag" ("tag_id")"#.to_string(),
            ]
        );
    }

    #[test]
    fn test_alter_statements() {
        let mut table = Blueprint::alter("users");
        table.string("nickname").nullable();
        table.string("email").unique();
        table.rename_column("name", "full_name");
        table.drop_column(["legacy"]);
        table.drop_index("users_votes_index");

        assert_eq!(
            compile(&table).unwrap(),
            vec![
                r#"ALTER TABLE "users" ADD COLUMN "nickname" VARCHAR"#,
                r#"ALTER TABLE "users" ADD COLUMN "email" VARCHAR NOT NULL"#,
                r#"ALTER TABLE "users" RENAME COLUMN "name" TO "full_name""#,
                r#"ALTER TABLE "users" DROP COLUMN "legacy""#,
                r#"DROP INDEX "users_votes_index""#,
                r#"CREATE UNIQUE INDEX "users_email_unique" ON "users" ("email")"#,
            ]
        );
    }

    #[test]
    fn test_sqlite_rejects_constraint_alteration() {
        let mut table = Blueprint::alter("posts");
        table.foreign(["user_id"]).on("users");
        assert_eq!(compile(&table).unwrap_err().code, ErrorCode::UnsupportedOperation);

        let mut table = Blueprint::alter("posts");
        table.drop_foreign("posts_user_id_foreign");
        assert_eq!(compile(&table).unwrap_err().code, ErrorCode::UnsupportedOperation);
    }

    #[test]
    fn test_enum_and_defaults() {
        let mut table = Blueprint::create("jobs");
        table.enumeration("state", ["queued", "done"]).default("queued");
        table.timestamp("queued_at").use_current();
        table.string("note").nullable().default("it's");

        let sql = compile(&table).unwrap().remove(0);
        assert_eq!(
            sql,
            concat!(
                r#"CREATE TABLE "jobs" ("state" VARCHAR CHECK ("state" IN ('queued', 'done')) NOT NULL DEFAULT 'queued', "#,
                r#""queued_at" DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP, "note" VARCHAR DEFAULT 'it''s')"#
            )
        );
    }

    #[test]
    fn test_drop_and_rename() {
        let mut table = Blueprint::alter("old");
        table.rename("new");
        assert_eq!(compile(&table).unwrap(), vec![r#"ALTER TABLE "old" RENAME TO "new""#]);

        let mut table = Blueprint::alter("old");
        table.drop_if_exists();
        assert_eq!(compile(&table).unwrap(), vec![r#"DROP TABLE IF EXISTS "old""#]);
    }
}
