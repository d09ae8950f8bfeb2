//! PostgreSQL DDL generator.

use super::{
    DdlGenerator, column_type, format_column_def, generate_add_column, generate_add_foreign_key,
    generate_create_index, generate_create_table, generate_drop_column, generate_drop_table,
};
use crate::ops::SchemaOperation;
use crate::table::ColumnDef;
use sqlscope_core::{Dialect, Result, SqlType};

/// DDL generator for PostgreSQL.
pub struct PostgresDdlGenerator;

impl PostgresDdlGenerator {
    fn column_def(&self, col: &ColumnDef) -> String {
        let sql_type = match (col.auto_increment, col.sql_type, &col.type_override) {
            (true, SqlType::BigInt, None) => "BIGSERIAL".to_string(),
            (true, SqlType::Integer | SqlType::SmallInt | SqlType::TinyInt, None) => {
                "SERIAL".to_string()
            }
            _ => column_type(self, col),
        };
        format_column_def(col, &sql_type, Dialect::Postgres)
    }
}

impl DdlGenerator for PostgresDdlGenerator {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    fn type_name(&self, sql_type: SqlType) -> String {
        match sql_type {
            SqlType::TinyInt => "SMALLINT".to_string(),
            SqlType::Blob => "BYTEA".to_string(),
            SqlType::Json => "JSONB".to_string(),
            other => other.sql_name(),
        }
    }

    fn generate(&self, op: &SchemaOperation) -> Result<Vec<String>> {
        tracing::debug!(dialect = "postgres", op = op.name(), table = op.table(), "Generating DDL");

        let dialect = Dialect::Postgres;
        let statement = match op {
            SchemaOperation::CreateTable(table) => {
                generate_create_table(table, dialect, |col| self.column_def(col), true)
            }
            SchemaOperation::DropTable { name, if_exists } => {
                generate_drop_table(name, *if_exists, dialect)
            }
            SchemaOperation::AddColumn { table, column } => {
                generate_add_column(table, &self.column_def(column), dialect)
            }
            SchemaOperation::ModifyColumn {
                table,
                column,
                sql_type,
            } => format!(
                "ALTER TABLE {} ALTER COLUMN {} TYPE {}",
                dialect.quote_identifier(table),
                dialect.quote_identifier(column),
                sql_type
            ),
            SchemaOperation::DropColumn { table, column } => {
                generate_drop_column(table, column, dialect)
            }
            SchemaOperation::CreateIndex(index) => generate_create_index(index, dialect),
            SchemaOperation::DropIndex { name, .. } => {
                format!("DROP INDEX {}", dialect.quote_identifier(name))
            }
            SchemaOperation::AddForeignKey(fk) => generate_add_foreign_key(fk, dialect),
            SchemaOperation::DropForeignKey { table, name } => format!(
                "ALTER TABLE {} DROP CONSTRAINT {}",
                dialect.quote_identifier(table),
                dialect.quote_identifier(name)
            ),
        };
        Ok(vec![statement])
    }
}
