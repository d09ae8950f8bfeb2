//! Table, column, index and foreign key definitions.
//!
//! Definitions are plain data built from model field metadata. The DDL
//! generators in [`crate::ddl`] turn them into dialect-specific SQL.

use sqlscope_core::{FieldInfo, ReferentialAction, SqlType};

/// A column definition.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    pub name: String,
    pub sql_type: SqlType,
    /// Explicit type spelling; used verbatim when set.
    pub type_override: Option<String>,
    pub nullable: bool,
    pub primary_key: bool,
    pub auto_increment: bool,
    pub unique: bool,
    pub default: Option<String>,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, sql_type: SqlType) -> Self {
        Self {
            name: name.into(),
            sql_type,
            type_override: None,
            nullable: true,
            primary_key: false,
            auto_increment: false,
            unique: false,
            default: None,
        }
    }

    #[must_use]
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }
}

impl From<&FieldInfo> for ColumnDef {
    fn from(field: &FieldInfo) -> Self {
        Self {
            name: field.column_name.to_string(),
            sql_type: field.sql_type,
            type_override: field.sql_type_override.map(str::to_string),
            nullable: field.nullable,
            primary_key: field.primary_key,
            auto_increment: field.auto_increment,
            unique: field.unique,
            default: field.default.map(str::to_string),
        }
    }
}

/// A table definition.
#[derive(Debug, Clone, PartialEq)]
pub struct TableDef {
    pub name: String,
    pub columns: Vec<ColumnDef>,
}

impl TableDef {
    /// Build a table definition from model fields.
    pub fn from_fields(name: impl Into<String>, fields: &[FieldInfo]) -> Self {
        Self {
            name: name.into(),
            columns: fields.iter().map(ColumnDef::from).collect(),
        }
    }

    /// Build the join table of a many-to-many relationship. Both columns
    /// together form the primary key.
    pub fn join_table(name: impl Into<String>, columns: [(&str, SqlType); 2]) -> Self {
        Self {
            name: name.into(),
            columns: columns
                .into_iter()
                .map(|(column, sql_type)| {
                    let mut def = ColumnDef::new(column, sql_type).not_null();
                    def.primary_key = true;
                    def
                })
                .collect(),
        }
    }

    pub fn primary_key(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|c| c.primary_key)
            .map(|c| c.name.as_str())
            .collect()
    }
}

/// An index definition.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexDef {
    pub name: String,
    pub table: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

impl IndexDef {
    pub fn new<I, S>(table: impl Into<String>, name: impl Into<String>, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            table: table.into(),
            columns: columns.into_iter().map(Into::into).collect(),
            unique: false,
        }
    }

    #[must_use]
    pub fn unique(mut self, unique: bool) -> Self {
        self.unique = unique;
        self
    }

    /// Collect the indexes declared on `fields`.
    ///
    /// Fields sharing an index name form one composite index, in field
    /// order. An empty name becomes `idx_<table>_<column>` (or `uix_` for
    /// unique indexes).
    pub fn declared(table: &str, fields: &[FieldInfo]) -> Vec<IndexDef> {
        let mut out: Vec<IndexDef> = Vec::new();
        let mut add = |name: &str, column: &str, unique: bool| {
            let name = if name.is_empty() {
                let prefix = if unique { "uix" } else { "idx" };
                format!("{}_{}_{}", prefix, table, column)
            } else {
                name.to_string()
            };
            match out.iter_mut().find(|i| i.name == name) {
                Some(index) => index.columns.push(column.to_string()),
                None => out.push(IndexDef::new(table, name, [column]).unique(unique)),
            }
        };
        for field in fields {
            if let Some(name) = field.index {
                add(name, field.column_name, false);
            }
            if let Some(name) = field.unique_index {
                add(name, field.column_name, true);
            }
        }
        out
    }
}

/// A foreign key constraint added after table creation.
#[derive(Debug, Clone, PartialEq)]
pub struct ForeignKeyDef {
    pub name: String,
    pub table: String,
    pub column: String,
    /// Referenced target, e.g. `users(id)`.
    pub references: String,
    pub on_delete: ReferentialAction,
    pub on_update: ReferentialAction,
}

impl ForeignKeyDef {
    pub fn new(table: &str, column: &str, references: &str) -> Self {
        Self {
            name: foreign_key_name(table, column, references),
            table: table.to_string(),
            column: column.to_string(),
            references: references.to_string(),
            on_delete: ReferentialAction::default(),
            on_update: ReferentialAction::default(),
        }
    }

    #[must_use]
    pub fn actions(mut self, on_delete: ReferentialAction, on_update: ReferentialAction) -> Self {
        self.on_delete = on_delete;
        self.on_update = on_update;
        self
    }
}

const MAX_IDENTIFIER_LEN: usize = 64;

/// Constraint name for a foreign key: `<table>_<column>_<references>_foreign`,
/// with every non-alphanumeric character replaced by `_`.
pub fn foreign_key_name(table: &str, column: &str, references: &str) -> String {
    let raw = format!("{}_{}_{}_foreign", table, column, references);
    let mut name: String = raw
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    name.truncate(MAX_IDENTIFIER_LEN);
    name
}

#[cfg(test)]
mod tests {
    use super::*;

    static FIELDS: &[FieldInfo] = &[
        FieldInfo::new("id", "id", SqlType::BigInt)
            .primary_key(true)
            .auto_increment(true),
        FieldInfo::new("name", "name", SqlType::Text).index_opt(Some("")),
        FieldInfo::new("email", "email", SqlType::Text).unique_index_opt(Some("uix_contact")),
        FieldInfo::new("phone", "phone", SqlType::Text).unique_index_opt(Some("uix_contact")),
    ];

    #[test]
    fn declared_indexes_group_by_name() {
        let indexes = IndexDef::declared("users", FIELDS);
        assert_eq!(indexes.len(), 2);
        assert_eq!(indexes[0].name, "idx_users_name");
        assert!(!indexes[0].unique);
        assert_eq!(indexes[1].name, "uix_contact");
        assert_eq!(indexes[1].columns, ["email", "phone"]);
        assert!(indexes[1].unique);
    }

    #[test]
    fn join_table_has_composite_key() {
        let t = TableDef::join_table(
            "user_languages",
            [("user_id", SqlType::BigInt), ("language_id", SqlType::BigInt)],
        );
        assert_eq!(t.primary_key(), ["user_id", "language_id"]);
    }

    #[test]
    fn foreign_key_names_are_sanitized() {
        assert_eq!(
            foreign_key_name("emails", "user_id", "users(id)"),
            "emails_user_id_users_id__foreign"
        );
        let long = "x".repeat(100);
        assert_eq!(foreign_key_name(&long, "a", "b").len(), 64);
    }
}
