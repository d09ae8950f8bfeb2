//! SQLite DDL generator.
//!
//! SQLite has limited ALTER TABLE support: column types cannot be changed in
//! place and constraints cannot be added to an existing table.

use super::{
    DdlGenerator, column_type, format_column_def, generate_add_column, generate_create_index,
    generate_create_table, generate_drop_column, generate_drop_table, unsupported,
};
use crate::ops::SchemaOperation;
use crate::table::{ColumnDef, TableDef};
use sqlscope_core::{Dialect, Result, SqlType};

/// DDL generator for SQLite.
pub struct SqliteDdlGenerator;

impl SqliteDdlGenerator {
    /// A lone integer auto-increment key becomes the rowid alias.
    fn rowid_key(table: &TableDef) -> Option<&ColumnDef> {
        let mut pk = table.columns.iter().filter(|c| c.primary_key);
        match (pk.next(), pk.next()) {
            (Some(col), None) if col.auto_increment && col.sql_type.is_integer() => Some(col),
            _ => None,
        }
    }

    fn column_def(&self, col: &ColumnDef, rowid: bool) -> String {
        if rowid {
            return format!(
                "{} INTEGER PRIMARY KEY AUTOINCREMENT",
                Dialect::Sqlite.quote_identifier(&col.name)
            );
        }
        format_column_def(col, &column_type(self, col), Dialect::Sqlite)
    }
}

impl DdlGenerator for SqliteDdlGenerator {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn type_name(&self, sql_type: SqlType) -> String {
        match sql_type {
            SqlType::Double => "REAL".to_string(),
            SqlType::Timestamp => "DATETIME".to_string(),
            SqlType::Json => "TEXT".to_string(),
            other => other.sql_name(),
        }
    }

    fn generate(&self, op: &SchemaOperation) -> Result<Vec<String>> {
        tracing::debug!(dialect = "sqlite", op = op.name(), table = op.table(), "Generating DDL");

        let dialect = Dialect::Sqlite;
        let statement = match op {
            SchemaOperation::CreateTable(table) => {
                let rowid = Self::rowid_key(table).map(|c| c.name.clone());
                generate_create_table(
                    table,
                    dialect,
                    |col| self.column_def(col, rowid.as_deref() == Some(col.name.as_str())),
                    rowid.is_none(),
                )
            }
            SchemaOperation::DropTable { name, if_exists } => {
                generate_drop_table(name, *if_exists, dialect)
            }
            SchemaOperation::AddColumn { table, column } => {
                generate_add_column(table, &self.column_def(column, false), dialect)
            }
            SchemaOperation::ModifyColumn { .. } => {
                return Err(unsupported(dialect, "changing a column type"));
            }
            // Requires SQLite >= 3.35.0; the bundled library qualifies.
            SchemaOperation::DropColumn { table, column } => {
                generate_drop_column(table, column, dialect)
            }
            SchemaOperation::CreateIndex(index) => generate_create_index(index, dialect),
            SchemaOperation::DropIndex { name, .. } => {
                format!("DROP INDEX {}", dialect.quote_identifier(name))
            }
            SchemaOperation::AddForeignKey(_) => {
                return Err(unsupported(dialect, "adding a foreign key to an existing table"));
            }
            SchemaOperation::DropForeignKey { .. } => {
                return Err(unsupported(dialect, "dropping a foreign key"));
            }
        };
        Ok(vec![statement])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composite_key_keeps_constraint_clause() {
        let mut a = ColumnDef::new("a", SqlType::BigInt);
        a.primary_key = true;
        a.auto_increment = true;
        let mut b = ColumnDef::new("b", SqlType::BigInt);
        b.primary_key = true;
        let table = TableDef {
            name: "pairs".into(),
            columns: vec![a, b],
        };
        assert!(SqliteDdlGenerator::rowid_key(&table).is_none());
        let sql = SqliteDdlGenerator
            .generate(&SchemaOperation::CreateTable(table))
            .unwrap();
        assert_eq!(
            sql[0],
            "CREATE TABLE \"pairs\" (\"a\" BIGINT, \"b\" BIGINT, PRIMARY KEY (\"a\", \"b\"))"
        );
    }

    #[test]
    fn add_column() {
        let op = SchemaOperation::AddColumn {
            table: "users".into(),
            column: ColumnDef::new("score", SqlType::Double),
        };
        assert_eq!(
            SqliteDdlGenerator.generate(&op).unwrap(),
            vec!["ALTER TABLE \"users\" ADD COLUMN \"score\" REAL"]
        );
    }
}
