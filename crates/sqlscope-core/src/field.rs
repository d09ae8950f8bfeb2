//! Field and column definitions.

use crate::types::SqlType;

/// Referential action for foreign key constraints (ON DELETE / ON UPDATE).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReferentialAction {
    /// No action - raise error if any references exist.
    #[default]
    NoAction,
    /// Restrict - same as NO ACTION.
    Restrict,
    /// Cascade - automatically delete/update referencing rows.
    Cascade,
    /// Set null - set referencing columns to NULL.
    SetNull,
    /// Set default - set referencing columns to their default values.
    SetDefault,
}

impl ReferentialAction {
    /// Get the SQL representation of this action.
    #[must_use]
    pub const fn as_sql(&self) -> &'static str {
        match self {
            ReferentialAction::NoAction => "NO ACTION",
            ReferentialAction::Restrict => "RESTRICT",
            ReferentialAction::Cascade => "CASCADE",
            ReferentialAction::SetNull => "SET NULL",
            ReferentialAction::SetDefault => "SET DEFAULT",
        }
    }

    /// Parse a referential action from a string (case-insensitive).
    #[must_use]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "NO ACTION" | "NO_ACTION" => Some(ReferentialAction::NoAction),
            "RESTRICT" => Some(ReferentialAction::Restrict),
            "CASCADE" => Some(ReferentialAction::Cascade),
            "SET NULL" | "SET_NULL" => Some(ReferentialAction::SetNull),
            "SET DEFAULT" | "SET_DEFAULT" => Some(ReferentialAction::SetDefault),
            _ => None,
        }
    }
}

/// Metadata about a model field/column.
///
/// Built in `const` context by the derive macro, one entry per persisted
/// field. Relationship fields and skipped fields have no `FieldInfo`.
#[derive(Debug, Clone)]
pub struct FieldInfo {
    /// Rust field name
    pub name: &'static str,
    /// Database column name (may differ from field name)
    pub column_name: &'static str,
    /// SQL type for this field
    pub sql_type: SqlType,
    /// Explicit SQL type string, used verbatim in DDL when set
    pub sql_type_override: Option<&'static str>,
    /// Whether this field is nullable
    pub nullable: bool,
    /// Whether this is a primary key
    pub primary_key: bool,
    /// Whether this field auto-increments
    pub auto_increment: bool,
    /// Whether this field has a unique constraint
    pub unique: bool,
    /// Default value expression (SQL)
    pub default: Option<&'static str>,
    /// Index name if indexed
    pub index: Option<&'static str>,
    /// Unique index name if uniquely indexed
    pub unique_index: Option<&'static str>,
}

impl FieldInfo {
    /// Create a new field info with minimal required data.
    pub const fn new(name: &'static str, column_name: &'static str, sql_type: SqlType) -> Self {
        Self {
            name,
            column_name,
            sql_type,
            sql_type_override: None,
            nullable: false,
            primary_key: false,
            auto_increment: false,
            unique: false,
            default: None,
            index: None,
            unique_index: None,
        }
    }

    /// Set explicit SQL type override from optional.
    pub const fn sql_type_override_opt(mut self, type_str: Option<&'static str>) -> Self {
        self.sql_type_override = type_str;
        self
    }

    /// Set nullable flag.
    pub const fn nullable(mut self, value: bool) -> Self {
        self.nullable = value;
        self
    }

    /// Set primary key flag.
    pub const fn primary_key(mut self, value: bool) -> Self {
        self.primary_key = value;
        self
    }

    /// Set auto-increment flag.
    pub const fn auto_increment(mut self, value: bool) -> Self {
        self.auto_increment = value;
        self
    }

    /// Set unique flag.
    pub const fn unique(mut self, value: bool) -> Self {
        self.unique = value;
        self
    }

    /// Set default value from optional.
    pub const fn default_opt(mut self, expr: Option<&'static str>) -> Self {
        self.default = expr;
        self
    }

    /// Set index name from optional.
    pub const fn index_opt(mut self, name: Option<&'static str>) -> Self {
        self.index = name;
        self
    }

    /// Set unique index name from optional.
    pub const fn unique_index_opt(mut self, name: Option<&'static str>) -> Self {
        self.unique_index = name;
        self
    }

    /// Whether an INSERT may omit this column when its value is blank,
    /// letting the database fill it in.
    pub const fn has_default_value(&self) -> bool {
        self.auto_increment || self.default.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: FieldInfo = FieldInfo::new("id", "id", SqlType::BigInt)
        .primary_key(true)
        .auto_increment(true);

    #[test]
    fn const_builders() {
        assert!(ID.primary_key);
        assert!(ID.has_default_value());
        let name = FieldInfo::new("name", "user_name", SqlType::Text)
            .unique_index_opt(Some("idx_user_name"))
            .default_opt(Some("'anon'"));
        assert_eq!(name.column_name, "user_name");
        assert_eq!(name.unique_index, Some("idx_user_name"));
        assert!(name.has_default_value());
    }

    #[test]
    fn referential_action_parse() {
        assert_eq!(
            ReferentialAction::from_str("set null"),
            Some(ReferentialAction::SetNull)
        );
        assert_eq!(ReferentialAction::Cascade.as_sql(), "CASCADE");
        assert_eq!(ReferentialAction::from_str("explode"), None);
    }
}
