//! MySQL DDL generator.

use super::{
    DdlGenerator, column_type, format_column_def, generate_add_column, generate_add_foreign_key,
    generate_create_index, generate_create_table, generate_drop_column, generate_drop_table,
};
use crate::ops::SchemaOperation;
use crate::table::ColumnDef;
use sqlscope_core::{Dialect, Result, SqlType};

/// DDL generator for MySQL.
pub struct MysqlDdlGenerator;

impl MysqlDdlGenerator {
    fn column_def(&self, col: &ColumnDef) -> String {
        let mut sql_type = column_type(self, col);
        if col.auto_increment {
            sql_type.push_str(" AUTO_INCREMENT");
        }
        format_column_def(col, &sql_type, Dialect::Mysql)
    }
}

impl DdlGenerator for MysqlDdlGenerator {
    fn dialect(&self) -> Dialect {
        Dialect::Mysql
    }

    fn type_name(&self, sql_type: SqlType) -> String {
        match sql_type {
            SqlType::Double => "DOUBLE".to_string(),
            SqlType::Timestamp => "DATETIME".to_string(),
            SqlType::Blob => "LONGBLOB".to_string(),
            other => other.sql_name(),
        }
    }

    fn generate(&self, op: &SchemaOperation) -> Result<Vec<String>> {
        tracing::debug!(dialect = "mysql", op = op.name(), table = op.table(), "Generating DDL");

        let dialect = Dialect::Mysql;
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
                "ALTER TABLE {} MODIFY COLUMN {} {}",
                dialect.quote_identifier(table),
                dialect.quote_identifier(column),
                sql_type
            ),
            SchemaOperation::DropColumn { table, column } => {
                generate_drop_column(table, column, dialect)
            }
            SchemaOperation::CreateIndex(index) => generate_create_index(index, dialect),
            SchemaOperation::DropIndex { table, name } => format!(
                "DROP INDEX {} ON {}",
                dialect.quote_identifier(name),
                dialect.quote_identifier(table)
            ),
            SchemaOperation::AddForeignKey(fk) => generate_add_foreign_key(fk, dialect),
            SchemaOperation::DropForeignKey { table, name } => format!(
                "ALTER TABLE {} DROP FOREIGN KEY {}",
                dialect.quote_identifier(table),
                dialect.quote_identifier(name)
            ),
        };
        Ok(vec![statement])
    }
}
