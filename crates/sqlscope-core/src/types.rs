//! SQL type definitions and mapping.

/// SQL data types a model field can be declared with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlType {
    // Integer types
    TinyInt,
    SmallInt,
    Integer,
    BigInt,

    // Floating point
    Real,
    Double,

    // Fixed precision
    Decimal { precision: u8, scale: u8 },

    // Boolean
    Boolean,

    // String types
    VarChar(u32),
    Text,

    // Binary
    Blob,

    // Date/time types
    Date,
    Time,
    Timestamp,

    // JSON
    Json,

    // Custom type name
    Custom(&'static str),
}

impl SqlType {
    /// Get the generic SQL type name for this type.
    ///
    /// Dialect-specific spellings live in the schema crate.
    pub fn sql_name(&self) -> String {
        match self {
            SqlType::TinyInt => "TINYINT".to_string(),
            SqlType::SmallInt => "SMALLINT".to_string(),
            SqlType::Integer => "INTEGER".to_string(),
            SqlType::BigInt => "BIGINT".to_string(),
            SqlType::Real => "REAL".to_string(),
            SqlType::Double => "DOUBLE PRECISION".to_string(),
            SqlType::Decimal { precision, scale } => format!("DECIMAL({}, {})", precision, scale),
            SqlType::Boolean => "BOOLEAN".to_string(),
            SqlType::VarChar(len) => format!("VARCHAR({})", len),
            SqlType::Text => "TEXT".to_string(),
            SqlType::Blob => "BLOB".to_string(),
            SqlType::Date => "DATE".to_string(),
            SqlType::Time => "TIME".to_string(),
            SqlType::Timestamp => "TIMESTAMP".to_string(),
            SqlType::Json => "JSON".to_string(),
            SqlType::Custom(name) => (*name).to_string(),
        }
    }

    /// Check if this type is an integer type.
    pub const fn is_integer(&self) -> bool {
        matches!(
            self,
            SqlType::TinyInt | SqlType::SmallInt | SqlType::Integer | SqlType::BigInt
        )
    }

    /// Check if this type is text-based.
    pub const fn is_text(&self) -> bool {
        matches!(self, SqlType::VarChar(_) | SqlType::Text)
    }
}

/// Trait for types that have a corresponding SQL type.
///
/// The derive macro uses this to infer column types from field types.
pub trait TypeInfo {
    /// The SQL type for this Rust type.
    const SQL_TYPE: SqlType;

    /// Whether this type is nullable by default.
    const NULLABLE: bool = false;
}

macro_rules! type_info {
    ($($t:ty => $sql:expr),* $(,)?) => {
        $(impl TypeInfo for $t {
            const SQL_TYPE: SqlType = $sql;
        })*
    };
}

type_info!(
    i8 => SqlType::TinyInt,
    i16 => SqlType::SmallInt,
    i32 => SqlType::Integer,
    i64 => SqlType::BigInt,
    u8 => SqlType::SmallInt,
    u16 => SqlType::Integer,
    u32 => SqlType::BigInt,
    u64 => SqlType::BigInt,
    f32 => SqlType::Real,
    f64 => SqlType::Double,
    bool => SqlType::Boolean,
    String => SqlType::Text,
    Vec<u8> => SqlType::Blob,
    serde_json::Value => SqlType::Json,
);

impl<T: TypeInfo> TypeInfo for Option<T> {
    const SQL_TYPE: SqlType = T::SQL_TYPE;
    const NULLABLE: bool = true;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn option_is_nullable() {
        assert_eq!(<Option<i64> as TypeInfo>::SQL_TYPE, SqlType::BigInt);
        assert!(<Option<i64> as TypeInfo>::NULLABLE);
        assert!(!<i64 as TypeInfo>::NULLABLE);
    }

    #[test]
    fn names() {
        assert_eq!(SqlType::VarChar(255).sql_name(), "VARCHAR(255)");
        assert_eq!(SqlType::Custom("CITEXT").sql_name(), "CITEXT");
        assert!(SqlType::BigInt.is_integer());
        assert!(!SqlType::Text.is_integer());
    }
}
