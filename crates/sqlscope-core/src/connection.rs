//! Database connection traits.
//!
//! - [`Connection`] - executes statements and opens transactions
//! - [`Transaction`] - a connection bound to one open transaction
//!
//! Both are synchronous: a call blocks until the driver returns.

use crate::dialect::Dialect;
use crate::error::{Error, Result};
use crate::row::Row;
use crate::value::Value;
use std::sync::Arc;

/// A database connection.
///
/// Implementations must be shareable across threads; drivers serialize
/// access internally where the underlying library requires it.
pub trait Connection: Send + Sync {
    /// The SQL dialect spoken by this connection.
    fn dialect(&self) -> Dialect;

    /// Execute a statement and return the number of affected rows.
    fn execute(&self, sql: &str, params: &[Value]) -> Result<u64>;

    /// Execute a query and return all rows.
    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>>;

    /// Execute an INSERT and return the generated row id.
    fn insert(&self, sql: &str, params: &[Value]) -> Result<i64>;

    /// Begin a transaction.
    ///
    /// Connections that cannot open transactions keep the default.
    fn begin(&self) -> Result<Arc<dyn Transaction>> {
        Err(Error::cant_start_transaction())
    }

    /// Close the connection. Further calls fail.
    fn close(&self) -> Result<()>;
}

/// An open transaction.
///
/// Statements run through the [`Connection`] methods of the transaction
/// are part of it until `commit` or `rollback` is called.
pub trait Transaction: Connection {
    fn commit(&self) -> Result<()>;
    fn rollback(&self) -> Result<()>;
}
