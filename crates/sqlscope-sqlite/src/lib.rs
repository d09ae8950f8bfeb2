//! SQLite driver for sqlscope.
//!
// FFI bindings require unsafe code - this is expected for database drivers
#![allow(unsafe_code)]
//!
//! This crate implements the `Connection` and `Transaction` traits from
//! sqlscope-core on top of the bundled libsqlite3.
//!
//! # Example
//!
//! ```rust,ignore
//! use sqlscope_core::{Connection, Value};
//! use sqlscope_sqlite::SqliteConnection;
//!
//! let conn = SqliteConnection::open_memory()?;
//! conn.execute_raw("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)")?;
//! let id = conn.insert("INSERT INTO users (name) VALUES (?1)", &[Value::from("jinzhu")])?;
//! ```
//!
//! # Type Mapping
//!
//! | Value | SQLite storage |
//! |-------|----------------|
//! | `Bool`, integers | INTEGER |
//! | `Date`, `Time`, `Timestamp` | INTEGER (days / microseconds) |
//! | `Float`, `Double` | REAL |
//! | `Text`, `Decimal`, `Json` | TEXT |
//! | `Bytes` | BLOB |
//!
//! INTEGER columns always read back as `Value::BigInt`.

pub mod connection;
pub mod types;

pub use connection::{OpenFlags, SqliteConfig, SqliteConnection, SqliteTransaction};

/// The SQLite library version.
pub fn sqlite_version() -> String {
    // SAFETY: sqlite3_libversion returns a static string
    unsafe {
        std::ffi::CStr::from_ptr(libsqlite3_sys::sqlite3_libversion())
            .to_string_lossy()
            .into_owned()
    }
}

/// The SQLite library version number.
pub fn sqlite_version_number() -> i32 {
    // SAFETY: no preconditions
    unsafe { libsqlite3_sys::sqlite3_libversion_number() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sqlite_version() {
        let version = sqlite_version();
        assert!(
            version.starts_with('3'),
            "Expected SQLite 3.x, got {}",
            version
        );
        assert!(sqlite_version_number() >= 3_000_000);
    }
}
