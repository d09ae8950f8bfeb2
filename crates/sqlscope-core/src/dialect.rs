//! SQL dialects.

use serde::{Deserialize, Serialize};

/// SQL dialect used for placeholders, identifier quoting and DDL spelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash, Serialize, Deserialize)]
pub enum Dialect {
    /// SQLite dialect (uses ?1, ?2 placeholders)
    #[default]
    Sqlite,
    /// PostgreSQL dialect (uses $1, $2 placeholders)
    Postgres,
    /// MySQL dialect (uses ? placeholders)
    Mysql,
}

impl Dialect {
    /// Generate a placeholder for the given parameter index (1-based).
    pub fn placeholder(self, index: usize) -> String {
        match self {
            Dialect::Postgres => format!("${index}"),
            Dialect::Sqlite => format!("?{index}"),
            Dialect::Mysql => "?".to_string(),
        }
    }

    /// Quote an identifier for this dialect.
    ///
    /// Embedded quote characters are doubled. A dotted name quotes each part.
    pub fn quote_identifier(self, name: &str) -> String {
        name.split('.')
            .map(|part| match self {
                Dialect::Postgres | Dialect::Sqlite => {
                    format!("\"{}\"", part.replace('"', "\"\""))
                }
                Dialect::Mysql => format!("`{}`", part.replace('`', "``")),
            })
            .collect::<Vec<_>>()
            .join(".")
    }

    pub const fn name(self) -> &'static str {
        match self {
            Dialect::Sqlite => "sqlite3",
            Dialect::Postgres => "postgres",
            Dialect::Mysql => "mysql",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholders() {
        assert_eq!(Dialect::Sqlite.placeholder(3), "?3");
        assert_eq!(Dialect::Postgres.placeholder(1), "$1");
        assert_eq!(Dialect::Mysql.placeholder(9), "?");
    }

    #[test]
    fn quoting_escapes_and_splits() {
        assert_eq!(Dialect::Sqlite.quote_identifier("users"), "\"users\"");
        assert_eq!(
            Dialect::Postgres.quote_identifier("public.users"),
            "\"public\".\"users\""
        );
        assert_eq!(Dialect::Mysql.quote_identifier("we`ird"), "`we``ird`");
        assert_eq!(Dialect::Sqlite.quote_identifier("a\"b"), "\"a\"\"b\"");
    }
}
