//! Database introspection.
//!
//! Each check is a single `count(*)` query; a non-zero count means the object
//! exists.

use sqlscope_core::{Dialect, Value};

/// An introspection query with its bound parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct IntrospectQuery {
    pub sql: String,
    pub params: Vec<Value>,
}

impl IntrospectQuery {
    fn new(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }
}

/// Query counting tables named `table`.
pub fn has_table(dialect: Dialect, table: &str) -> IntrospectQuery {
    let sql = match dialect {
        Dialect::Sqlite => "SELECT count(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        Dialect::Postgres => {
            "SELECT count(*) FROM information_schema.tables \
             WHERE table_schema = current_schema() AND table_name = $1 AND table_type = 'BASE TABLE'"
        }
        Dialect::Mysql => {
            "SELECT count(*) FROM information_schema.tables \
             WHERE table_schema = DATABASE() AND table_name = ? AND table_type = 'BASE TABLE'"
        }
    };
    IntrospectQuery::new(sql, vec![Value::from(table)])
}

/// Query counting columns named `column` on `table`.
pub fn has_column(dialect: Dialect, table: &str, column: &str) -> IntrospectQuery {
    let sql = match dialect {
        Dialect::Sqlite => "SELECT count(*) FROM pragma_table_info(?1) WHERE name = ?2",
        Dialect::Postgres => {
            "SELECT count(*) FROM information_schema.columns \
             WHERE table_schema = current_schema() AND table_name = $1 AND column_name = $2"
        }
        Dialect::Mysql => {
            "SELECT count(*) FROM information_schema.columns \
             WHERE table_schema = DATABASE() AND table_name = ? AND column_name = ?"
        }
    };
    IntrospectQuery::new(sql, vec![Value::from(table), Value::from(column)])
}

/// Query counting indexes named `index` on `table`.
pub fn has_index(dialect: Dialect, table: &str, index: &str) -> IntrospectQuery {
    let sql = match dialect {
        Dialect::Sqlite => {
            "SELECT count(*) FROM sqlite_master WHERE type = 'index' AND tbl_name = ?1 AND name = ?2"
        }
        Dialect::Postgres => {
            "SELECT count(*) FROM pg_indexes \
             WHERE schemaname = current_schema() AND tablename = $1 AND indexname = $2"
        }
        Dialect::Mysql => {
            "SELECT count(*) FROM information_schema.statistics \
             WHERE table_schema = DATABASE() AND table_name = ? AND index_name = ?"
        }
    };
    IntrospectQuery::new(sql, vec![Value::from(table), Value::from(index)])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholders_match_dialect() {
        let q = has_column(Dialect::Postgres, "users", "age");
        assert!(q.sql.contains("$1") && q.sql.contains("$2"));
        assert_eq!(q.params, vec![Value::from("users"), Value::from("age")]);

        let q = has_index(Dialect::Mysql, "users", "idx");
        assert_eq!(q.sql.matches('?').count(), 2);

        let q = has_table(Dialect::Sqlite, "users");
        assert!(q.sql.contains("sqlite_master"));
        assert_eq!(q.params.len(), 1);
    }
}
