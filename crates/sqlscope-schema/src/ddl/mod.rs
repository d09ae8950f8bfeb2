//! DDL (Data Definition Language) generation from schema operations.
//!
//! This module converts `SchemaOperation`s into executable SQL statements for
//! each supported database dialect (SQLite, MySQL, PostgreSQL).

mod mysql;
mod postgres;
mod sqlite;

pub use mysql::MysqlDdlGenerator;
pub use postgres::PostgresDdlGenerator;
pub use sqlite::SqliteDdlGenerator;

use crate::ops::SchemaOperation;
use crate::table::{ColumnDef, ForeignKeyDef, IndexDef, TableDef};
use sqlscope_core::{Dialect, Error, Result, SchemaErrorKind, SqlType};

/// Generates DDL SQL statements from schema operations.
pub trait DdlGenerator: Send + Sync {
    /// The database dialect.
    fn dialect(&self) -> Dialect;

    /// Dialect spelling of a column type.
    fn type_name(&self, sql_type: SqlType) -> String;

    /// Generate DDL statement(s) for a single schema operation.
    fn generate(&self, op: &SchemaOperation) -> Result<Vec<String>>;

    /// Generate DDL statements for multiple operations.
    fn generate_all(&self, ops: &[SchemaOperation]) -> Result<Vec<String>> {
        let mut out = Vec::new();
        for op in ops {
            out.extend(self.generate(op)?);
        }
        Ok(out)
    }
}

/// Create a DDL generator for the given dialect.
pub fn generator_for_dialect(dialect: Dialect) -> Box<dyn DdlGenerator> {
    match dialect {
        Dialect::Sqlite => Box::new(SqliteDdlGenerator),
        Dialect::Mysql => Box::new(MysqlDdlGenerator),
        Dialect::Postgres => Box::new(PostgresDdlGenerator),
    }
}

// ============================================================================
// Shared Helpers
// ============================================================================

fn unsupported(dialect: Dialect, what: &str) -> Error {
    Error::schema(
        SchemaErrorKind::Unsupported,
        format!("{} does not support {}", dialect.name(), what),
    )
}

/// Column type, honoring an explicit override.
fn column_type(generator: &dyn DdlGenerator, col: &ColumnDef) -> String {
    match &col.type_override {
        Some(spelled) => spelled.clone(),
        None => generator.type_name(col.sql_type),
    }
}

/// Format a column definition for CREATE TABLE or ADD COLUMN.
///
/// `sql_type` is the already-resolved type; auto-increment handling is the
/// caller's.
fn format_column_def(col: &ColumnDef, sql_type: &str, dialect: Dialect) -> String {
    let mut parts = vec![dialect.quote_identifier(&col.name), sql_type.to_string()];

    if !col.nullable && !col.primary_key {
        parts.push("NOT NULL".to_string());
    }

    if col.unique && !col.primary_key {
        parts.push("UNIQUE".to_string());
    }

    if let Some(ref default) = col.default {
        parts.push(format!("DEFAULT {}", default));
    }

    parts.join(" ")
}

/// `CREATE TABLE` with column definitions built by `column_def` and a
/// trailing primary key clause when `with_pk_clause` holds.
fn generate_create_table(
    table: &TableDef,
    dialect: Dialect,
    column_def: impl Fn(&ColumnDef) -> String,
    with_pk_clause: bool,
) -> String {
    let mut parts: Vec<String> = table.columns.iter().map(column_def).collect();
    let pk = table.primary_key();
    if with_pk_clause && !pk.is_empty() {
        let cols: Vec<String> = pk.iter().map(|c| dialect.quote_identifier(c)).collect();
        parts.push(format!("PRIMARY KEY ({})", cols.join(", ")));
    }
    format!(
        "CREATE TABLE {} ({})",
        dialect.quote_identifier(&table.name),
        parts.join(", ")
    )
}

fn generate_drop_table(name: &str, if_exists: bool, dialect: Dialect) -> String {
    if if_exists {
        format!("DROP TABLE IF EXISTS {}", dialect.quote_identifier(name))
    } else {
        format!("DROP TABLE {}", dialect.quote_identifier(name))
    }
}

fn generate_add_column(table: &str, column_def: &str, dialect: Dialect) -> String {
    format!(
        "ALTER TABLE {} ADD COLUMN {}",
        dialect.quote_identifier(table),
        column_def
    )
}

fn generate_drop_column(table: &str, column: &str, dialect: Dialect) -> String {
    format!(
        "ALTER TABLE {} DROP COLUMN {}",
        dialect.quote_identifier(table),
        dialect.quote_identifier(column)
    )
}

fn generate_create_index(index: &IndexDef, dialect: Dialect) -> String {
    let cols: Vec<String> = index
        .columns
        .iter()
        .map(|c| dialect.quote_identifier(c))
        .collect();
    format!(
        "CREATE {}INDEX {} ON {}({})",
        if index.unique { "UNIQUE " } else { "" },
        dialect.quote_identifier(&index.name),
        dialect.quote_identifier(&index.table),
        cols.join(", ")
    )
}

fn generate_add_foreign_key(fk: &ForeignKeyDef, dialect: Dialect) -> String {
    format!(
        "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ON DELETE {} ON UPDATE {}",
        dialect.quote_identifier(&fk.table),
        dialect.quote_identifier(&fk.name),
        dialect.quote_identifier(&fk.column),
        fk.references,
        fk.on_delete.as_sql(),
        fk.on_update.as_sql()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlscope_core::{FieldInfo, ReferentialAction};

    static FIELDS: &[FieldInfo] = &[
        FieldInfo::new("id", "id", SqlType::BigInt)
            .primary_key(true)
            .auto_increment(true),
        FieldInfo::new("name", "name", SqlType::VarChar(255)).nullable(true),
        FieldInfo::new("age", "age", SqlType::Integer)
            .nullable(true)
            .default_opt(Some("18")),
        FieldInfo::new("code", "code", SqlType::Text).unique(true),
        FieldInfo::new("meta", "meta", SqlType::Json)
            .nullable(true)
            .sql_type_override_opt(Some("jsonb")),
    ];

    fn users() -> TableDef {
        TableDef::from_fields("users", FIELDS)
    }

    #[test]
    fn create_table_per_dialect() {
        let sqlite = SqliteDdlGenerator
            .generate(&SchemaOperation::CreateTable(users()))
            .unwrap();
        assert_eq!(
            sqlite,
            vec![
                "CREATE TABLE \"users\" (\"id\" INTEGER PRIMARY KEY AUTOINCREMENT, \
                 \"name\" VARCHAR(255), \"age\" INTEGER DEFAULT 18, \"code\" TEXT NOT NULL UNIQUE, \
                 \"meta\" jsonb)"
            ]
        );

        let pg = PostgresDdlGenerator
            .generate(&SchemaOperation::CreateTable(users()))
            .unwrap();
        assert_eq!(
            pg[0],
            "CREATE TABLE \"users\" (\"id\" BIGSERIAL, \"name\" VARCHAR(255), \
             \"age\" INTEGER DEFAULT 18, \"code\" TEXT NOT NULL UNIQUE, \"meta\" jsonb, \
             PRIMARY KEY (\"id\"))"
        );

        let my = MysqlDdlGenerator
            .generate(&SchemaOperation::CreateTable(users()))
            .unwrap();
        assert!(my[0].starts_with("CREATE TABLE `users` (`id` BIGINT AUTO_INCREMENT, "));
        assert!(my[0].ends_with("PRIMARY KEY (`id`))"));
    }

    #[test]
    fn modify_column_is_unsupported_on_sqlite() {
        let op = SchemaOperation::ModifyColumn {
            table: "users".into(),
            column: "age".into(),
            sql_type: "TEXT".into(),
        };
        let err = SqliteDdlGenerator.generate(&op).unwrap_err();
        assert!(matches!(
            err,
            Error::Schema(ref e) if e.kind == SchemaErrorKind::Unsupported
        ));
        assert_eq!(
            PostgresDdlGenerator.generate(&op).unwrap(),
            vec!["ALTER TABLE \"users\" ALTER COLUMN \"age\" TYPE TEXT"]
        );
        assert_eq!(
            MysqlDdlGenerator.generate(&op).unwrap(),
            vec!["ALTER TABLE `users` MODIFY COLUMN `age` TEXT"]
        );
    }

    #[test]
    fn indexes() {
        let index = IndexDef::new("users", "idx_users_name", ["name", "age"]).unique(true);
        assert_eq!(
            SqliteDdlGenerator
                .generate(&SchemaOperation::CreateIndex(index))
                .unwrap(),
            vec!["CREATE UNIQUE INDEX \"idx_users_name\" ON \"users\"(\"name\", \"age\")"]
        );
        let drop = SchemaOperation::DropIndex {
            table: "users".into(),
            name: "idx_users_name".into(),
        };
        assert_eq!(
            MysqlDdlGenerator.generate(&drop).unwrap(),
            vec!["DROP INDEX `idx_users_name` ON `users`"]
        );
        assert_eq!(
            PostgresDdlGenerator.generate(&drop).unwrap(),
            vec!["DROP INDEX \"idx_users_name\""]
        );
    }

    #[test]
    fn foreign_keys() {
        let fk = ForeignKeyDef::new("emails", "user_id", "users(id)")
            .actions(ReferentialAction::Cascade, ReferentialAction::Restrict);
        let op = SchemaOperation::AddForeignKey(fk);
        assert_eq!(
            PostgresDdlGenerator.generate(&op).unwrap(),
            vec![
                "ALTER TABLE \"emails\" ADD CONSTRAINT \"emails_user_id_users_id__foreign\" \
                 FOREIGN KEY (\"user_id\") REFERENCES users(id) ON DELETE CASCADE ON UPDATE RESTRICT"
            ]
        );
        assert!(SqliteDdlGenerator.generate(&op).is_err());
        let drop = SchemaOperation::DropForeignKey {
            table: "emails".into(),
            name: "fk".into(),
        };
        assert_eq!(
            MysqlDdlGenerator.generate(&drop).unwrap(),
            vec!["ALTER TABLE `emails` DROP FOREIGN KEY `fk`"]
        );
    }

    #[test]
    fn join_table_sqlite() {
        let t = TableDef::join_table(
            "user_languages",
            [("user_id", SqlType::BigInt), ("language_id", SqlType::BigInt)],
        );
        assert_eq!(
            SqliteDdlGenerator
                .generate(&SchemaOperation::CreateTable(t))
                .unwrap(),
            vec![
                "CREATE TABLE \"user_languages\" (\"user_id\" BIGINT, \"language_id\" BIGINT, \
                 PRIMARY KEY (\"user_id\", \"language_id\"))"
            ]
        );
    }

    #[test]
    fn generate_all_stops_at_first_error() {
        let ops = [
            SchemaOperation::DropTable {
                name: "users".into(),
                if_exists: true,
            },
            SchemaOperation::DropForeignKey {
                table: "emails".into(),
                name: "fk".into(),
            },
        ];
        assert!(SqliteDdlGenerator.generate_all(&ops).is_err());
        assert_eq!(
            generator_for_dialect(Dialect::Postgres)
                .generate_all(&ops)
                .unwrap(),
            vec![
                "DROP TABLE IF EXISTS \"users\"",
                "ALTER TABLE \"emails\" DROP CONSTRAINT \"fk\""
            ]
        );
    }
}
