//! Schema definition and DDL generation for sqlscope.
//!
//! This crate provides:
//! - Table, column, index and foreign key definitions built from model fields
//! - DDL generation for SQLite, MySQL, PostgreSQL
//! - Introspection queries (`has_table`, `has_column`, `has_index`)
//!
//! Statements are returned as text; executing them is the caller's job.

pub mod ddl;
pub mod introspect;
pub mod ops;
pub mod table;

pub use ddl::{
    DdlGenerator, MysqlDdlGenerator, PostgresDdlGenerator, SqliteDdlGenerator,
    generator_for_dialect,
};
pub use introspect::{IntrospectQuery, has_column, has_index, has_table};
pub use ops::SchemaOperation;
pub use table::{ColumnDef, ForeignKeyDef, IndexDef, TableDef, foreign_key_name};
