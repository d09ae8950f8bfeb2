//! Schema operations.

use crate::table::{ColumnDef, ForeignKeyDef, IndexDef, TableDef};

/// A single schema change, rendered to SQL by a [`crate::DdlGenerator`].
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaOperation {
    CreateTable(TableDef),
    DropTable { name: String, if_exists: bool },
    AddColumn { table: String, column: ColumnDef },
    /// Change a column's type to the given SQL spelling.
    ModifyColumn {
        table: String,
        column: String,
        sql_type: String,
    },
    DropColumn { table: String, column: String },
    CreateIndex(IndexDef),
    DropIndex { table: String, name: String },
    AddForeignKey(ForeignKeyDef),
    DropForeignKey { table: String, name: String },
}

impl SchemaOperation {
    /// The table the operation touches.
    pub fn table(&self) -> &str {
        match self {
            SchemaOperation::CreateTable(t) => &t.name,
            SchemaOperation::DropTable { name, .. } => name,
            SchemaOperation::AddColumn { table, .. }
            | SchemaOperation::ModifyColumn { table, .. }
            | SchemaOperation::DropColumn { table, .. }
            | SchemaOperation::DropIndex { table, .. }
            | SchemaOperation::DropForeignKey { table, .. } => table,
            SchemaOperation::CreateIndex(i) => &i.table,
            SchemaOperation::AddForeignKey(fk) => &fk.table,
        }
    }

    /// Short operation name for logs.
    pub const fn name(&self) -> &'static str {
        match self {
            SchemaOperation::CreateTable(_) => "create_table",
            SchemaOperation::DropTable { .. } => "drop_table",
            SchemaOperation::AddColumn { .. } => "add_column",
            SchemaOperation::ModifyColumn { .. } => "modify_column",
            SchemaOperation::DropColumn { .. } => "drop_column",
            SchemaOperation::CreateIndex(_) => "create_index",
            SchemaOperation::DropIndex { .. } => "drop_index",
            SchemaOperation::AddForeignKey(_) => "add_foreign_key",
            SchemaOperation::DropForeignKey { .. } => "drop_foreign_key",
        }
    }
}
