//! SQL type inference from Rust types.

use proc_macro2::TokenStream;
use quote::quote;
use syn::Type;

use crate::parse::{Container, split_container};

/// The SQL type expression for a field.
///
/// An explicit `sql_type` attribute is mapped to the closest `SqlType`
/// variant; otherwise the field type's `TypeInfo` impl decides.
pub fn sql_type_tokens(ty: &Type, explicit: Option<&str>) -> TokenStream {
    match explicit {
        Some(sql_type) => parse_sql_type_attr(sql_type),
        None => quote! { <#ty as ::sqlscope_core::TypeInfo>::SQL_TYPE },
    }
}

/// Whether the (optionally `Option`-wrapped) type is a primitive integer.
pub fn is_integer_type(ty: &Type) -> bool {
    let inner = match split_container(ty) {
        (Container::Option, inner) => inner,
        _ => ty.clone(),
    };
    let Type::Path(path) = inner else {
        return false;
    };
    path.path.segments.last().is_some_and(|segment| {
        matches!(
            segment.ident.to_string().as_str(),
            "i8" | "i16" | "i32" | "i64" | "u8" | "u16" | "u32" | "u64"
        )
    })
}

/// Parse an explicit sql_type attribute string into a SqlType TokenStream.
///
/// Supports common SQL type names:
/// - INTEGER, INT, BIGINT, SMALLINT, TINYINT
/// - REAL, FLOAT, DOUBLE, DOUBLE PRECISION
/// - NUMERIC(p,s), DECIMAL(p,s)
/// - BOOLEAN, BOOL
/// - VARCHAR(n), TEXT
/// - BLOB, BYTEA
/// - DATE, TIME, DATETIME, TIMESTAMP
/// - JSON, JSONB
///
/// Anything else becomes `SqlType::Custom`.
pub fn parse_sql_type_attr(sql_type: &str) -> TokenStream {
    let upper = sql_type.trim().to_uppercase();

    if let Some(len) = upper
        .strip_prefix("VARCHAR(")
        .and_then(|rest| rest.strip_suffix(')'))
        .and_then(|len| len.trim().parse::<u32>().ok())
    {
        return quote! { ::sqlscope_core::SqlType::VarChar(#len) };
    }

    for prefix in ["DECIMAL(", "NUMERIC("] {
        if let Some(args) = upper
            .strip_prefix(prefix)
            .and_then(|rest| rest.strip_suffix(')'))
        {
            let mut parts = args.split(',').map(|p| p.trim().parse::<u8>());
            if let (Some(Ok(precision)), Some(Ok(scale)), None) =
                (parts.next(), parts.next(), parts.next())
            {
                return quote! {
                    ::sqlscope_core::SqlType::Decimal { precision: #precision, scale: #scale }
                };
            }
        }
    }

    match upper.as_str() {
        "TINYINT" => quote! { ::sqlscope_core::SqlType::TinyInt },
        "SMALLINT" => quote! { ::sqlscope_core::SqlType::SmallInt },
        "INTEGER" | "INT" => quote! { ::sqlscope_core::SqlType::Integer },
        "BIGINT" => quote! { ::sqlscope_core::SqlType::BigInt },
        "REAL" | "FLOAT" => quote! { ::sqlscope_core::SqlType::Real },
        "DOUBLE" | "DOUBLE PRECISION" => quote! { ::sqlscope_core::SqlType::Double },
        "BOOLEAN" | "BOOL" => quote! { ::sqlscope_core::SqlType::Boolean },
        "TEXT" => quote! { ::sqlscope_core::SqlType::Text },
        "BLOB" | "BYTEA" => quote! { ::sqlscope_core::SqlType::Blob },
        "DATE" => quote! { ::sqlscope_core::SqlType::Date },
        "TIME" => quote! { ::sqlscope_core::SqlType::Time },
        "DATETIME" | "TIMESTAMP" => quote! { ::sqlscope_core::SqlType::Timestamp },
        "JSON" | "JSONB" => quote! { ::sqlscope_core::SqlType::Json },
        _ => {
            let lit = sql_type.trim();
            quote! { ::sqlscope_core::SqlType::Custom(#lit) }
        }
    }
}
