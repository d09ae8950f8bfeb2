//! Error types for sqlscope operations.

use std::fmt;

/// The primary error type for all sqlscope operations.
///
/// Errors are `Clone` so a handle can carry its accumulated error across the
/// clones produced by chained calls.
#[derive(Debug, Clone)]
pub enum Error {
    /// A query matched no rows for a single-record target.
    RecordNotFound,
    /// Statement text could not be rendered.
    InvalidSql(String),
    /// UPDATE or DELETE without conditions while global updates are blocked.
    MissingWhereClause,
    /// Connection-related errors (open, close, busy)
    Connection(ConnectionError),
    /// Query execution errors
    Query(QueryError),
    /// Type conversion errors
    Type(TypeError),
    /// Transaction state errors
    Transaction(TransactionError),
    /// Schema/migration errors
    Schema(SchemaError),
    /// Configuration errors (callbacks, associations, metadata)
    Config(ConfigError),
    /// Several distinct errors accumulated on one handle
    Multiple(Errors),
    /// Custom error with message
    Custom(String),
}

#[derive(Debug, Clone)]
pub struct ConnectionError {
    pub kind: ConnectionErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    /// Failed to establish connection
    Connect,
    /// Connection was closed or is unusable
    Disconnected,
    /// Database is locked or busy
    Busy,
}

#[derive(Debug, Clone)]
pub struct QueryError {
    pub kind: QueryErrorKind,
    pub sql: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    /// Syntax error in SQL
    Syntax,
    /// Constraint violation (unique, foreign key, etc.)
    Constraint,
    /// Table or column not found
    NotFound,
    /// Other database error
    Database,
}

#[derive(Debug, Clone)]
pub struct TypeError {
    pub expected: &'static str,
    pub actual: String,
    pub column: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TransactionError {
    pub kind: TransactionErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionErrorKind {
    /// Commit or rollback on a handle that holds no transaction
    Invalid,
    /// The connection cannot open a transaction from this handle
    CantStart,
}

#[derive(Debug, Clone)]
pub struct SchemaError {
    pub kind: SchemaErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaErrorKind {
    /// Table not found
    TableNotFound,
    /// The dialect has no statement for this change
    Unsupported,
    /// Invalid schema definition
    Invalid,
}

#[derive(Debug, Clone)]
pub struct ConfigError {
    pub kind: ConfigErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigErrorKind {
    /// A callback name referenced by before/after/replace/remove is not registered
    UnknownCallback,
    /// A callback name is already registered on the chain
    DuplicateCallback,
    /// The association target does not match the relationship
    InvalidAssociation,
    /// The model declares no relationship for the requested type or field
    MissingRelationship,
    /// The owning record has a blank or undeclared primary key
    MissingPrimaryKey,
    /// The model has no such field or column
    UnknownField,
}

impl Error {
    /// Shorthand for a transaction-state error.
    pub fn invalid_transaction() -> Self {
        Error::Transaction(TransactionError {
            kind: TransactionErrorKind::Invalid,
            message: "no valid transaction".to_string(),
        })
    }

    /// Shorthand for a connection that cannot begin a transaction.
    pub fn cant_start_transaction() -> Self {
        Error::Transaction(TransactionError {
            kind: TransactionErrorKind::CantStart,
            message: "can't start transaction".to_string(),
        })
    }

    /// Shorthand for a configuration error.
    pub fn config(kind: ConfigErrorKind, message: impl Into<String>) -> Self {
        Error::Config(ConfigError {
            kind,
            message: message.into(),
        })
    }

    /// Shorthand for a schema error.
    pub fn schema(kind: SchemaErrorKind, message: impl Into<String>) -> Self {
        Error::Schema(SchemaError {
            kind,
            message: message.into(),
        })
    }

    /// Is this the not-found sentinel, or an aggregate containing it?
    pub fn is_record_not_found(&self) -> bool {
        match self {
            Error::RecordNotFound => true,
            Error::Multiple(errors) => errors.iter().any(Error::is_record_not_found),
            _ => false,
        }
    }

    /// Is this a transaction-state error of the given kind?
    pub fn is_transaction(&self, kind: TransactionErrorKind) -> bool {
        matches!(self, Error::Transaction(e) if e.kind == kind)
    }

    /// Configuration error kind, if this is one.
    pub fn config_kind(&self) -> Option<ConfigErrorKind> {
        match self {
            Error::Config(e) => Some(e.kind),
            _ => None,
        }
    }

    /// Get the SQL that caused this error, if available
    pub fn sql(&self) -> Option<&str> {
        match self {
            Error::Query(q) => q.sql.as_deref(),
            _ => None,
        }
    }

    /// Flatten into the list of underlying errors.
    pub fn into_vec(self) -> Vec<Error> {
        match self {
            Error::Multiple(errors) => errors.0,
            other => vec![other],
        }
    }
}

/// An ordered, de-duplicated collection of errors.
///
/// Two errors are considered identical when they render the same message.
#[derive(Debug, Clone, Default)]
pub struct Errors(Vec<Error>);

impl Errors {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Add an error, flattening aggregates and skipping duplicates.
    pub fn add(&mut self, err: Error) {
        for e in err.into_vec() {
            let message = e.to_string();
            if self.0.iter().any(|existing| existing.to_string() == message) {
                continue;
            }
            self.0.push(e);
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Error> {
        self.0.iter()
    }

    /// The collected errors in order of occurrence.
    pub fn get_errors(&self) -> &[Error] {
        &self.0
    }

    /// Collapse into a single error: `None` when empty, the error itself when
    /// there is only one, `Error::Multiple` otherwise.
    pub fn into_error(mut self) -> Option<Error> {
        match self.0.len() {
            0 => None,
            1 => self.0.pop(),
            _ => Some(Error::Multiple(self)),
        }
    }
}

impl From<Vec<Error>> for Errors {
    fn from(errors: Vec<Error>) -> Self {
        let mut out = Errors::new();
        for e in errors {
            out.add(e);
        }
        out
    }
}

impl IntoIterator for Errors {
    type Item = Error;
    type IntoIter = std::vec::IntoIter<Error>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl fmt::Display for Errors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, err) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}", err)?;
        }
        Ok(())
    }
}

impl std::error::Error for Errors {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::RecordNotFound => write!(f, "record not found"),
            Error::InvalidSql(msg) => write!(f, "invalid SQL: {}", msg),
            Error::MissingWhereClause => {
                write!(f, "missing WHERE clause while updating or deleting")
            }
            Error::Connection(e) => write!(f, "Connection error: {}", e.message),
            Error::Query(e) => write!(f, "Query error: {}", e.message),
            Error::Type(e) => {
                if let Some(col) = &e.column {
                    write!(
                        f,
                        "Type error in column '{}': expected {}, found {}",
                        col, e.expected, e.actual
                    )
                } else {
                    write!(f, "Type error: expected {}, found {}", e.expected, e.actual)
                }
            }
            Error::Transaction(e) => write!(f, "{}", e.message),
            Error::Schema(e) => write!(f, "Schema error: {}", e.message),
            Error::Config(e) => write!(f, "{}", e.message),
            Error::Multiple(errors) => write!(f, "{}", errors),
            Error::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(col) = &self.column {
            write!(
                f,
                "expected {} for column '{}', found {}",
                self.expected, col, self.actual
            )
        } else {
            write!(f, "expected {}, found {}", self.expected, self.actual)
        }
    }
}

impl fmt::Display for TransactionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl From<ConnectionError> for Error {
    fn from(err: ConnectionError) -> Self {
        Error::Connection(err)
    }
}

impl From<QueryError> for Error {
    fn from(err: QueryError) -> Self {
        Error::Query(err)
    }
}

impl From<TypeError> for Error {
    fn from(err: TypeError) -> Self {
        Error::Type(err)
    }
}

impl From<TransactionError> for Error {
    fn from(err: TransactionError) -> Self {
        Error::Transaction(err)
    }
}

impl From<SchemaError> for Error {
    fn from(err: SchemaError) -> Self {
        Error::Schema(err)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

impl From<Errors> for Error {
    fn from(errors: Errors) -> Self {
        errors
            .into_error()
            .unwrap_or_else(|| Error::Custom("empty error set".to_string()))
    }
}

/// Result type alias for sqlscope operations.
pub type Result<T> = std::result::Result<T, Error>;
