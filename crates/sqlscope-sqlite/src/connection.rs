//! SQLite connection implementation.

use crate::types;
use libsqlite3_sys as ffi;
use sqlscope_core::{
    Connection, ConnectionError, ConnectionErrorKind, Dialect, Error, QueryError, QueryErrorKind,
    Result, Row, Transaction, Value, row::ColumnInfo,
};
use std::ffi::{CStr, CString, c_int};
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

// libsqlite3-sys omits `sqlite3_close_v2` from its bindings; the symbol is
// still provided by the bundled SQLite library.
unsafe extern "C" {
    fn sqlite3_close_v2(db: *mut ffi::sqlite3) -> c_int;
}

/// Configuration for opening SQLite connections.
#[derive(Debug, Clone)]
pub struct SqliteConfig {
    /// Database file path or ":memory:" for in-memory database.
    pub path: String,
    /// Connection flags.
    pub flags: OpenFlags,
    /// Busy timeout in milliseconds.
    pub busy_timeout_ms: u32,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: ":memory:".to_string(),
            flags: OpenFlags::default(),
            busy_timeout_ms: 5000,
        }
    }
}

impl SqliteConfig {
    /// Create a new config for a file-based database.
    pub fn file(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Create a new config for an in-memory database.
    pub fn memory() -> Self {
        Self::default()
    }

    /// Set the open flags.
    pub fn flags(mut self, flags: OpenFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Set the busy timeout.
    pub fn busy_timeout(mut self, ms: u32) -> Self {
        self.busy_timeout_ms = ms;
        self
    }
}

/// SQLite open flags.
#[derive(Debug, Clone, Copy)]
pub struct OpenFlags {
    /// Open for reading only.
    pub read_only: bool,
    /// Open for reading and writing.
    pub read_write: bool,
    /// Create the database if it doesn't exist.
    pub create: bool,
    /// Enable URI filename interpretation.
    pub uri: bool,
    /// Open in multi-thread mode (no mutex on the handle).
    pub no_mutex: bool,
    /// Open in serialized mode.
    pub full_mutex: bool,
}

impl Default for OpenFlags {
    fn default() -> Self {
        Self {
            read_only: false,
            read_write: true,
            create: true,
            uri: false,
            no_mutex: false,
            full_mutex: true,
        }
    }
}

impl OpenFlags {
    /// Create flags for read-only access.
    pub fn read_only() -> Self {
        Self {
            read_only: true,
            read_write: false,
            create: false,
            ..Default::default()
        }
    }

    /// Create flags for read-write access, creating the file if missing.
    pub fn create_read_write() -> Self {
        Self::default()
    }

    fn to_sqlite_flags(self) -> c_int {
        let mut flags = 0;

        if self.read_only {
            flags |= ffi::SQLITE_OPEN_READONLY;
        }
        if self.read_write {
            flags |= ffi::SQLITE_OPEN_READWRITE;
        }
        if self.create {
            flags |= ffi::SQLITE_OPEN_CREATE;
        }
        if self.uri {
            flags |= ffi::SQLITE_OPEN_URI;
        }
        if self.no_mutex {
            flags |= ffi::SQLITE_OPEN_NOMUTEX;
        }
        if self.full_mutex {
            flags |= ffi::SQLITE_OPEN_FULLMUTEX;
        }

        flags
    }
}

/// The raw handle plus the state every statement checks.
struct SqliteInner {
    db: *mut ffi::sqlite3,
    in_transaction: bool,
}

// SAFETY: the handle is opened in serialized mode and only touched under the
// Mutex that owns it.
unsafe impl Send for SqliteInner {}

impl SqliteInner {
    fn handle(&self) -> Result<*mut ffi::sqlite3> {
        if self.db.is_null() {
            Err(Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::Disconnected,
                message: "connection is closed".to_string(),
            }))
        } else {
            Ok(self.db)
        }
    }

    fn close(&mut self) {
        if !self.db.is_null() {
            // SAFETY: db is a live handle owned by this struct
            unsafe {
                sqlite3_close_v2(self.db);
            }
            self.db = ptr::null_mut();
        }
    }
}

impl Drop for SqliteInner {
    fn drop(&mut self) {
        self.close();
    }
}

type Shared = Arc<Mutex<SqliteInner>>;

fn lock(inner: &Shared) -> Result<MutexGuard<'_, SqliteInner>> {
    inner.lock().map_err(|_| {
        Error::Connection(ConnectionError {
            kind: ConnectionErrorKind::Disconnected,
            message: "connection mutex poisoned".to_string(),
        })
    })
}

/// A connection to a SQLite database.
///
/// The handle lives behind a mutex, so one connection may be shared across
/// threads. Transactions opened from it share the same handle.
pub struct SqliteConnection {
    inner: Shared,
    path: String,
}

impl std::fmt::Debug for SqliteConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteConnection")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl SqliteConnection {
    /// Open a new SQLite connection with the given configuration.
    pub fn open(config: &SqliteConfig) -> Result<Self> {
        let c_path = CString::new(config.path.as_str()).map_err(|_| {
            Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::Connect,
                message: "Invalid path: contains null byte".to_string(),
            })
        })?;

        let mut db: *mut ffi::sqlite3 = ptr::null_mut();
        let flags = config.flags.to_sqlite_flags();

        // SAFETY: We pass valid pointers and check the return value
        let rc = unsafe { ffi::sqlite3_open_v2(c_path.as_ptr(), &mut db, flags, ptr::null()) };

        if rc != ffi::SQLITE_OK {
            let msg = if db.is_null() {
                error_string(rc)
            } else {
                // SAFETY: db is valid until closed here
                unsafe {
                    let msg = errmsg(db);
                    ffi::sqlite3_close(db);
                    msg
                }
            };

            return Err(Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::Connect,
                message: format!("Failed to open database: {}", msg),
            }));
        }

        if config.busy_timeout_ms > 0 {
            // SAFETY: db is valid
            unsafe {
                ffi::sqlite3_busy_timeout(
                    db,
                    c_int::try_from(config.busy_timeout_ms).unwrap_or(c_int::MAX),
                );
            }
        }

        tracing::debug!(path = %config.path, "opened sqlite database");

        Ok(Self {
            inner: Arc::new(Mutex::new(SqliteInner {
                db,
                in_transaction: false,
            })),
            path: config.path.clone(),
        })
    }

    /// Open an in-memory database.
    pub fn open_memory() -> Result<Self> {
        Self::open(&SqliteConfig::memory())
    }

    /// Open a file-based database.
    pub fn open_file(path: impl Into<String>) -> Result<Self> {
        Self::open(&SqliteConfig::file(path))
    }

    /// Get the database path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Execute one or more statements without parameters.
    pub fn execute_raw(&self, sql: &str) -> Result<()> {
        let inner = lock(&self.inner)?;
        exec_batch(inner.handle()?, sql)
    }

    /// Get the last insert rowid.
    pub fn last_insert_rowid(&self) -> Result<i64> {
        let inner = lock(&self.inner)?;
        let db = inner.handle()?;
        // SAFETY: db is valid
        Ok(unsafe { ffi::sqlite3_last_insert_rowid(db) })
    }

    /// Whether a transaction is open on the shared handle.
    pub fn in_transaction(&self) -> bool {
        lock(&self.inner).is_ok_and(|inner| inner.in_transaction)
    }
}

impl Connection for SqliteConnection {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        let inner = lock(&self.inner)?;
        execute_stmt(inner.handle()?, sql, params)
    }

    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let inner = lock(&self.inner)?;
        query_stmt(inner.handle()?, sql, params)
    }

    fn insert(&self, sql: &str, params: &[Value]) -> Result<i64> {
        let inner = lock(&self.inner)?;
        insert_stmt(inner.handle()?, sql, params)
    }

    fn begin(&self) -> Result<Arc<dyn Transaction>> {
        let mut inner = lock(&self.inner)?;
        if inner.in_transaction {
            return Err(Error::cant_start_transaction());
        }
        exec_batch(inner.handle()?, "BEGIN")?;
        inner.in_transaction = true;
        tracing::trace!(path = %self.path, "BEGIN");
        Ok(Arc::new(SqliteTransaction {
            inner: Arc::clone(&self.inner),
            done: AtomicBool::new(false),
        }))
    }

    fn close(&self) -> Result<()> {
        let mut inner = lock(&self.inner)?;
        inner.close();
        Ok(())
    }
}

/// An open SQLite transaction.
///
/// Dropping it without `commit` or `rollback` rolls back.
pub struct SqliteTransaction {
    inner: Shared,
    done: AtomicBool,
}

impl SqliteTransaction {
    fn finish(&self, sql: &str) -> Result<()> {
        if self.done.swap(true, Ordering::SeqCst) {
            return Err(Error::invalid_transaction());
        }
        let mut inner = lock(&self.inner)?;
        inner.in_transaction = false;
        exec_batch(inner.handle()?, sql)?;
        tracing::trace!("{}", sql);
        Ok(())
    }

    fn live(&self) -> Result<MutexGuard<'_, SqliteInner>> {
        if self.done.load(Ordering::SeqCst) {
            return Err(Error::invalid_transaction());
        }
        lock(&self.inner)
    }
}

impl Connection for SqliteTransaction {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        let inner = self.live()?;
        execute_stmt(inner.handle()?, sql, params)
    }

    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let inner = self.live()?;
        query_stmt(inner.handle()?, sql, params)
    }

    fn insert(&self, sql: &str, params: &[Value]) -> Result<i64> {
        let inner = self.live()?;
        insert_stmt(inner.handle()?, sql, params)
    }

    fn close(&self) -> Result<()> {
        let mut inner = lock(&self.inner)?;
        inner.close();
        Ok(())
    }
}

impl Transaction for SqliteTransaction {
    fn commit(&self) -> Result<()> {
        self.finish("COMMIT")
    }

    fn rollback(&self) -> Result<()> {
        self.finish("ROLLBACK")
    }
}

impl Drop for SqliteTransaction {
    fn drop(&mut self) {
        if !self.done.load(Ordering::SeqCst) {
            let _ = self.rollback();
        }
    }
}

// Helper functions

fn prepare_stmt(db: *mut ffi::sqlite3, sql: &str) -> Result<*mut ffi::sqlite3_stmt> {
    let c_sql = CString::new(sql).map_err(|_| {
        Error::Query(QueryError {
            kind: QueryErrorKind::Syntax,
            sql: Some(sql.to_string()),
            message: "SQL contains null byte".to_string(),
        })
    })?;

    let mut stmt: *mut ffi::sqlite3_stmt = ptr::null_mut();

    // SAFETY: All pointers are valid
    let rc = unsafe {
        ffi::sqlite3_prepare_v2(
            db,
            c_sql.as_ptr(),
            c_int::try_from(c_sql.as_bytes().len()).unwrap_or(c_int::MAX),
            &mut stmt,
            ptr::null_mut(),
        )
    };

    if rc != ffi::SQLITE_OK {
        return Err(db_error(db, sql));
    }

    Ok(stmt)
}

/// Prepare and bind; the caller finalizes the returned statement.
fn prepare_bound(
    db: *mut ffi::sqlite3,
    sql: &str,
    params: &[Value],
) -> Result<*mut ffi::sqlite3_stmt> {
    let stmt = prepare_stmt(db, sql)?;
    for (i, param) in params.iter().enumerate() {
        let index = c_int::try_from(i + 1).unwrap_or(c_int::MAX);
        // SAFETY: stmt is valid, index is 1-based
        let rc = unsafe { types::bind_value(stmt, index, param) };
        if rc != ffi::SQLITE_OK {
            let err = bind_error(db, sql, i + 1);
            // SAFETY: stmt is valid
            unsafe { ffi::sqlite3_finalize(stmt) };
            return Err(err);
        }
    }
    Ok(stmt)
}

fn query_stmt(db: *mut ffi::sqlite3, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
    let stmt = prepare_bound(db, sql, params)?;

    // SAFETY: stmt is valid
    let col_count = unsafe { ffi::sqlite3_column_count(stmt) };
    let names = (0..col_count)
        .map(|i| {
            // SAFETY: stmt is valid and i is in range
            unsafe { types::column_name(stmt, i) }.unwrap_or_else(|| format!("col{}", i))
        })
        .collect();
    let columns = Arc::new(ColumnInfo::new(names));

    let mut rows = Vec::new();
    loop {
        // SAFETY: stmt is valid
        let rc = unsafe { ffi::sqlite3_step(stmt) };
        match rc {
            ffi::SQLITE_ROW => {
                let values = (0..col_count)
                    // SAFETY: stmt is valid, we just got SQLITE_ROW
                    .map(|i| unsafe { types::read_column(stmt, i) })
                    .collect();
                rows.push(Row::with_columns(Arc::clone(&columns), values));
            }
            ffi::SQLITE_DONE => break,
            _ => {
                let err = db_error(db, sql);
                // SAFETY: stmt is valid
                unsafe { ffi::sqlite3_finalize(stmt) };
                return Err(err);
            }
        }
    }

    // SAFETY: stmt is valid
    unsafe { ffi::sqlite3_finalize(stmt) };
    Ok(rows)
}

fn execute_stmt(db: *mut ffi::sqlite3, sql: &str, params: &[Value]) -> Result<u64> {
    let stmt = prepare_bound(db, sql, params)?;

    // SAFETY: stmt is valid
    let rc = unsafe { ffi::sqlite3_step(stmt) };
    let result = match rc {
        // SAFETY: db is valid
        ffi::SQLITE_DONE | ffi::SQLITE_ROW => Ok(unsafe { ffi::sqlite3_changes64(db) } as u64),
        _ => Err(db_error(db, sql)),
    };

    // SAFETY: stmt is valid
    unsafe { ffi::sqlite3_finalize(stmt) };
    result
}

fn insert_stmt(db: *mut ffi::sqlite3, sql: &str, params: &[Value]) -> Result<i64> {
    execute_stmt(db, sql, params)?;
    // SAFETY: db is valid
    Ok(unsafe { ffi::sqlite3_last_insert_rowid(db) })
}

fn exec_batch(db: *mut ffi::sqlite3, sql: &str) -> Result<()> {
    let c_sql = CString::new(sql).map_err(|_| {
        Error::Query(QueryError {
            kind: QueryErrorKind::Syntax,
            sql: Some(sql.to_string()),
            message: "SQL contains null byte".to_string(),
        })
    })?;

    let mut err_ptr: *mut std::ffi::c_char = ptr::null_mut();

    // SAFETY: All pointers are valid
    let rc = unsafe { ffi::sqlite3_exec(db, c_sql.as_ptr(), None, ptr::null_mut(), &mut err_ptr) };

    if rc != ffi::SQLITE_OK {
        let message = if err_ptr.is_null() {
            error_string(rc)
        } else {
            // SAFETY: err_ptr was allocated by SQLite
            unsafe {
                let msg = CStr::from_ptr(err_ptr).to_string_lossy().into_owned();
                ffi::sqlite3_free(err_ptr.cast());
                msg
            }
        };
        return Err(Error::Query(QueryError {
            kind: error_code_to_kind(rc),
            sql: Some(sql.to_string()),
            message,
        }));
    }

    Ok(())
}

/// # Safety
/// `db` must be a valid handle.
unsafe fn errmsg(db: *mut ffi::sqlite3) -> String {
    // SAFETY: forwarded from the caller's contract
    unsafe { CStr::from_ptr(ffi::sqlite3_errmsg(db)).to_string_lossy().into_owned() }
}

fn error_string(code: c_int) -> String {
    // SAFETY: sqlite3_errstr returns a static string for any code
    unsafe {
        CStr::from_ptr(ffi::sqlite3_errstr(code))
            .to_string_lossy()
            .into_owned()
    }
}

fn db_error(db: *mut ffi::sqlite3, sql: &str) -> Error {
    // SAFETY: db is valid
    let (message, code) = unsafe { (errmsg(db), ffi::sqlite3_errcode(db)) };
    Error::Query(QueryError {
        kind: error_code_to_kind(code),
        sql: Some(sql.to_string()),
        message,
    })
}

fn bind_error(db: *mut ffi::sqlite3, sql: &str, param_index: usize) -> Error {
    // SAFETY: db is valid
    let msg = unsafe { errmsg(db) };
    Error::Query(QueryError {
        kind: QueryErrorKind::Database,
        sql: Some(sql.to_string()),
        message: format!("Failed to bind parameter {}: {}", param_index, msg),
    })
}

fn error_code_to_kind(code: c_int) -> QueryErrorKind {
    match code & 0xff {
        ffi::SQLITE_CONSTRAINT => QueryErrorKind::Constraint,
        ffi::SQLITE_NOTFOUND => QueryErrorKind::NotFound,
        ffi::SQLITE_ERROR => QueryErrorKind::Syntax,
        _ => QueryErrorKind::Database,
    }
}
