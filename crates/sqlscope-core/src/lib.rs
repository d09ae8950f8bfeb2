//! Core types and traits for sqlscope.
//!
//! This crate provides the foundations shared by every other sqlscope crate:
//!
//! - `Value` and `Row` for parameters and results
//! - `Error`/`Errors` and the `Result` alias
//! - `Model`, `Record` and `RecordSet` for struct mapping
//! - `FieldInfo` and `RelationshipInfo` static metadata
//! - `Connection` and `Transaction` driver traits

pub mod connection;
pub mod dialect;
pub mod error;
pub mod field;
pub mod model;
pub mod naming;
pub mod relationship;
pub mod row;
pub mod types;
pub mod value;

pub use connection::{Connection, Transaction};
pub use dialect::Dialect;
pub use error::{
    ConfigError, ConfigErrorKind, ConnectionError, ConnectionErrorKind, Error, Errors, QueryError,
    QueryErrorKind, Result, SchemaError, SchemaErrorKind, TransactionError, TransactionErrorKind,
    TypeError,
};
pub use field::{FieldInfo, ReferentialAction};
pub use model::{Model, ModelDescriptor, ModelEvent, ModelEvents, ModelValue, Record, RecordSet};
pub use relationship::{LinkTableInfo, RelationshipInfo, RelationshipKind, find_relationship};
pub use row::{ColumnInfo, FromValue, Row};
pub use types::{SqlType, TypeInfo};
pub use value::Value;
