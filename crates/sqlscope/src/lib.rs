//! sqlscope - a chainable ORM core with a pluggable callback pipeline.
//!
//! A [`Db`] handle accumulates query conditions through immutable chain
//! calls. Terminal operations (`first`, `find`, `create`, `save`, `delete`,
//! `updates`, ...) build a [`Scope`] and run one of five callback chains
//! against it: create, update, delete, query and row query. The chains are
//! lists of named steps that applications can extend or rearrange through
//! [`Db::callback`].
//!
//! # Quick Start
//!
//! ```ignore
//! use sqlscope::{Config, Db, FieldMap, Model};
//! use sqlscope_sqlite::SqliteConnection;
//! use std::sync::Arc;
//!
//! #[derive(Model, Debug, Clone, Default)]
//! struct User {
//!     id: i64,
//!     name: String,
//!     age: i32,
//!     #[sqlscope(has_many)]
//!     emails: Vec<Email>,
//! }
//!
//! #[derive(Model, Debug, Clone, Default)]
//! struct Email {
//!     id: i64,
//!     user_id: i64,
//!     address: String,
//! }
//!
//! let db = Db::open_with(Arc::new(SqliteConnection::open_memory()?), Config::from_env());
//! db.auto_migrate::<User>();
//! db.auto_migrate::<Email>();
//!
//! let mut user = User { name: "jinzhu".into(), age: 18, ..Default::default() };
//! db.create(&mut user);
//!
//! let mut users: Vec<User> = Vec::new();
//! let result = db
//!     .filter("age >= ?", (18,))
//!     .order("name")
//!     .preload("emails")
//!     .find(&mut users);
//! if let Some(err) = result.error() {
//!     eprintln!("{err}");
//! }
//!
//! db.model(&user).updates(FieldMap::from([("age", 19)]));
//! ```
//!
//! Errors never panic and never abort the chain: each operation returns a
//! handle whose [`Db::error`] aggregates what went wrong, with
//! [`Db::record_not_found`] singled out.

pub mod association;
pub mod callback;
mod callbacks;
pub mod config;
mod crud;
pub mod db;
pub mod logger;
mod migrate;
pub mod registry;
pub mod scope;

pub use sqlscope_core;

pub use sqlscope_core::{
    ConfigErrorKind, Connection, Dialect, Error, Errors, FieldInfo, FromValue, Model,
    ModelDescriptor, ModelEvent, ModelEvents, ModelValue, Record, RecordSet, ReferentialAction,
    RelationshipKind, Result, Row, SchemaErrorKind, SqlType, Transaction, TransactionErrorKind,
    Value,
};
pub use sqlscope_macros::Model;
pub use sqlscope_query::{Arg, Condition, FieldMap, IntoArgs, SqlExpr, expr};

pub use association::Association;
pub use callback::{Callback, CallbackKind, CallbackProcessor, CallbackRegistry};
pub use config::Config;
pub use db::{Db, Setting};
pub use logger::{LogEntry, LogMode, Logger, TracingLogger};
pub use registry::{JoinTable, ModelRegistry, ModelStruct, Relationship};
pub use scope::{
    ORDER_BY_PRIMARY_KEY, SAVE_ASSOCIATIONS, SKIP_BINDVAR, STARTED_TRANSACTION, Scope,
    UPDATE_ATTRS, UPDATE_COLUMN, UPDATE_INTERFACE,
};

/// Prelude module for convenient imports.
///
/// ```ignore
/// use sqlscope::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        Condition, Config, Db, Error, FieldMap, LogMode, Model, Result, Row, Scope, Value, expr,
    };
}

#[cfg(test)]
pub(crate) mod testing {
    use crate::{Config, Db, LogMode};
    use sqlscope_sqlite::SqliteConnection;
    use std::sync::Arc;

    #[derive(crate::Model, Debug, Default, Clone, PartialEq)]
    #[sqlscope(table = "people")]
    pub(crate) struct Person {
        pub(crate) id: i64,
        pub(crate) name: String,
        pub(crate) age: i32,
        pub(crate) deleted_at: Option<i64>,
    }

    /// A silent handle on a fresh in-memory database.
    pub(crate) fn memory_db() -> Db {
        let conn = SqliteConnection::open_memory().expect("in-memory database");
        Db::open_with(Arc::new(conn), Config::new().log_mode(LogMode::Silent))
    }

    /// [`memory_db`] with the `people` table created.
    pub(crate) fn people_table() -> Db {
        let db = memory_db();
        let created = db.create_table::<Person>();
        assert!(created.error().is_none(), "{:?}", created.error());
        db
    }
}
