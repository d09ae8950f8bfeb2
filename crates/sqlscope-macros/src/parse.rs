//! Parsing logic for the Model derive macro.
//!
//! This module extracts struct-level and field-level attributes from the
//! derive input to build `ModelDef` and `FieldDef` structures used for
//! code generation.

use crate::infer;
use proc_macro2::Span;
use syn::{
    Attribute, Data, DeriveInput, Error, Field, Fields, GenericArgument, Generics, Ident, Lit,
    LitStr, PathArguments, Result, Type,
};

/// Parsed model definition from a struct with `#[derive(Model)]`.
#[derive(Debug)]
pub struct ModelDef {
    /// The struct name (e.g., `User`).
    pub name: Ident,
    /// Explicit table name from `#[sqlscope(table = "...")]`.
    pub table_name: Option<String>,
    /// Whether `run_event` forwards to `ModelEvents`.
    pub events: bool,
    pub fields: Vec<FieldDef>,
    pub generics: Generics,
}

impl ModelDef {
    /// Persisted column fields.
    pub fn column_fields(&self) -> Vec<&FieldDef> {
        self.fields
            .iter()
            .filter(|f| !f.skip && f.relationship.is_none())
            .collect()
    }

    pub fn relationship_fields(&self) -> Vec<&FieldDef> {
        self.fields
            .iter()
            .filter(|f| f.relationship.is_some())
            .collect()
    }
}

/// Parsed field definition from a struct field.
#[derive(Debug)]
pub struct FieldDef {
    /// The Rust field name.
    pub name: Ident,
    /// The SQL column name (field name unless overridden).
    pub column_name: String,
    pub ty: Type,
    /// Explicit SQL type, e.g. `"VARCHAR(100)"`.
    pub sql_type: Option<String>,
    pub nullable: bool,
    pub primary_key: bool,
    pub auto_increment: bool,
    pub unique: bool,
    /// SQL DEFAULT expression.
    pub default: Option<String>,
    /// Index name; empty for an unnamed index.
    pub index: Option<String>,
    /// Unique index name; empty for an unnamed index.
    pub unique_index: Option<String>,
    pub skip: bool,
    pub relationship: Option<RelationshipAttr>,
}

/// The relationship declared on a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationshipKindAttr {
    HasOne,
    HasMany,
    BelongsTo,
    ManyToMany,
}

/// How a relationship field holds its values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Container {
    Vec,
    Option,
    Plain,
}

/// Parsed relationship attributes.
#[derive(Debug, Clone)]
pub struct RelationshipAttr {
    pub kind: RelationshipKindAttr,
    /// The related model type, with any `Vec`/`Option` wrapper removed.
    pub related: Type,
    pub container: Container,
    pub foreign_key: Option<String>,
    pub association_foreign_key: Option<String>,
    /// Join table for `many2many`.
    pub join_table: Option<String>,
    pub join_foreign_key: Option<String>,
    pub join_association_foreign_key: Option<String>,
}

/// Parse a `DeriveInput` into a `ModelDef`.
pub fn parse_model(input: &DeriveInput) -> Result<ModelDef> {
    let name = input.ident.clone();
    let generics = input.generics.clone();

    let (table_name, events) = parse_struct_attrs(&input.attrs)?;

    let mut fields = match &input.data {
        Data::Struct(data) => parse_fields(&data.fields)?,
        Data::Enum(_) => {
            return Err(Error::new_spanned(
                input,
                "Model can only be derived for structs, not enums",
            ));
        }
        Data::Union(_) => {
            return Err(Error::new_spanned(
                input,
                "Model can only be derived for structs, not unions",
            ));
        }
    };

    // Without an explicit key, a column named `id` is the primary key.
    if !fields.iter().any(|f| f.primary_key) {
        if let Some(id) = fields
            .iter_mut()
            .find(|f| f.column_name == "id" && !f.skip && f.relationship.is_none())
        {
            id.primary_key = true;
            id.nullable = false;
            id.auto_increment = id.auto_increment || infer::is_integer_type(&id.ty);
        }
    }

    Ok(ModelDef {
        name,
        table_name,
        events,
        fields,
        generics,
    })
}

/// Parse struct-level `#[sqlscope(...)]` attributes.
///
/// Supported keys:
/// - `table = "name"` (overrides the derived table name)
/// - `events` (forward lifecycle hooks to `ModelEvents`)
fn parse_struct_attrs(attrs: &[Attribute]) -> Result<(Option<String>, bool)> {
    let mut table_name = None;
    let mut events = false;

    for attr in attrs {
        if !attr.path().is_ident("sqlscope") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("table") {
                let value: LitStr = meta.value()?.parse()?;
                if value.value().trim().is_empty() {
                    return Err(Error::new_spanned(value, "table name cannot be empty"));
                }
                table_name = Some(value.value());
            } else if meta.path.is_ident("events") {
                events = true;
            } else {
                return Err(meta.error("unknown sqlscope struct attribute"));
            }
            Ok(())
        })?;
    }

    Ok((table_name, events))
}

fn parse_fields(fields: &Fields) -> Result<Vec<FieldDef>> {
    match fields {
        Fields::Named(named) => named.named.iter().map(parse_field).collect(),
        Fields::Unnamed(_) => Err(Error::new(
            Span::call_site(),
            "Model requires a struct with named fields, not a tuple struct",
        )),
        Fields::Unit => Err(Error::new(
            Span::call_site(),
            "Model requires a struct with fields, not a unit struct",
        )),
    }
}

/// Intermediate struct for collecting field attributes.
#[derive(Default)]
struct FieldAttrs {
    column: Option<String>,
    sql_type: Option<String>,
    not_null: bool,
    primary_key: bool,
    auto_increment: Option<bool>,
    unique: bool,
    default: Option<String>,
    index: Option<String>,
    unique_index: Option<String>,
    skip: bool,
    kind: Option<RelationshipKindAttr>,
    join_table: Option<String>,
    foreign_key: Option<String>,
    association_foreign_key: Option<String>,
    join_foreign_key: Option<String>,
    join_association_foreign_key: Option<String>,
}

/// Parse a single field and its attributes.
fn parse_field(field: &Field) -> Result<FieldDef> {
    let name = field
        .ident
        .clone()
        .ok_or_else(|| Error::new_spanned(field, "expected named field"))?;
    let ty = field.ty.clone();
    let attrs = parse_field_attrs(&field.attrs)?;

    let relationship = match attrs.kind {
        Some(kind) => Some(relationship_attr(kind, &attrs, &ty)?),
        None => {
            if attrs.foreign_key.is_some() || attrs.association_foreign_key.is_some() {
                return Err(Error::new_spanned(
                    &field.ty,
                    "foreign_key requires has_one, has_many, belongs_to or many2many",
                ));
            }
            None
        }
    };

    let column_name = attrs.column.unwrap_or_else(|| name.to_string());
    let auto_increment = attrs
        .auto_increment
        .unwrap_or(attrs.primary_key && infer::is_integer_type(&ty));

    Ok(FieldDef {
        name,
        column_name,
        ty,
        sql_type: attrs.sql_type,
        nullable: !attrs.not_null && !attrs.primary_key,
        primary_key: attrs.primary_key,
        auto_increment,
        unique: attrs.unique,
        default: attrs.default,
        index: attrs.index,
        unique_index: attrs.unique_index,
        skip: attrs.skip,
        relationship,
    })
}

fn lit_string(meta: &syn::meta::ParseNestedMeta<'_>, what: &str) -> Result<String> {
    let value: Lit = meta.value()?.parse()?;
    match value {
        Lit::Str(s) => Ok(s.value()),
        other => Err(Error::new_spanned(
            other,
            format!("expected string literal for {}", what),
        )),
    }
}

/// `key` alone yields an empty name, `key = "name"` yields the name.
fn optional_name(meta: &syn::meta::ParseNestedMeta<'_>, what: &str) -> Result<String> {
    if meta.input.peek(syn::Token![=]) {
        lit_string(meta, what)
    } else {
        Ok(String::new())
    }
}

fn set_kind(
    result: &mut FieldAttrs,
    meta: &syn::meta::ParseNestedMeta<'_>,
    kind: RelationshipKindAttr,
) -> Result<()> {
    if result.kind.is_some() {
        return Err(meta.error("a field can declare only one relationship"));
    }
    result.kind = Some(kind);
    Ok(())
}

/// Parse all `#[sqlscope(...)]` attributes on a field.
fn parse_field_attrs(attrs: &[Attribute]) -> Result<FieldAttrs> {
    let mut result = FieldAttrs::default();

    for attr in attrs {
        if !attr.path().is_ident("sqlscope") {
            continue;
        }

        attr.parse_nested_meta(|meta| {
            let path = &meta.path;

            if path.is_ident("primary_key") {
                result.primary_key = true;
            } else if path.is_ident("auto_increment") {
                result.auto_increment = Some(if meta.input.peek(syn::Token![=]) {
                    let value: syn::LitBool = meta.value()?.parse()?;
                    value.value
                } else {
                    true
                });
            } else if path.is_ident("not_null") {
                result.not_null = true;
            } else if path.is_ident("unique") {
                result.unique = true;
            } else if path.is_ident("skip") {
                result.skip = true;
            } else if path.is_ident("column") {
                result.column = Some(lit_string(&meta, "column name")?);
            } else if path.is_ident("sql_type") {
                result.sql_type = Some(lit_string(&meta, "sql_type")?);
            } else if path.is_ident("default") {
                result.default = Some(lit_string(&meta, "default")?);
            } else if path.is_ident("index") {
                result.index = Some(optional_name(&meta, "index name")?);
            } else if path.is_ident("unique_index") {
                result.unique_index = Some(optional_name(&meta, "unique index name")?);
            } else if path.is_ident("has_one") {
                set_kind(&mut result, &meta, RelationshipKindAttr::HasOne)?;
            } else if path.is_ident("has_many") {
                set_kind(&mut result, &meta, RelationshipKindAttr::HasMany)?;
            } else if path.is_ident("belongs_to") {
                set_kind(&mut result, &meta, RelationshipKindAttr::BelongsTo)?;
            } else if path.is_ident("many2many") {
                set_kind(&mut result, &meta, RelationshipKindAttr::ManyToMany)?;
                result.join_table = Some(lit_string(&meta, "join table")?);
            } else if path.is_ident("foreign_key") {
                result.foreign_key = Some(lit_string(&meta, "foreign_key")?);
            } else if path.is_ident("association_foreign_key") {
                result.association_foreign_key =
                    Some(lit_string(&meta, "association_foreign_key")?);
            } else if path.is_ident("join_foreign_key") {
                result.join_foreign_key = Some(lit_string(&meta, "join_foreign_key")?);
            } else if path.is_ident("join_association_foreign_key") {
                result.join_association_foreign_key =
                    Some(lit_string(&meta, "join_association_foreign_key")?);
            } else {
                return Err(meta.error("unknown sqlscope field attribute"));
            }
            Ok(())
        })?;
    }

    if result.skip && result.kind.is_some() {
        return Err(Error::new(
            Span::call_site(),
            "a skipped field cannot declare a relationship",
        ));
    }

    Ok(result)
}

fn relationship_attr(
    kind: RelationshipKindAttr,
    attrs: &FieldAttrs,
    ty: &Type,
) -> Result<RelationshipAttr> {
    let (container, related) = split_container(ty);
    match (kind, container) {
        (RelationshipKindAttr::HasMany | RelationshipKindAttr::ManyToMany, Container::Vec) => {}
        (RelationshipKindAttr::HasMany | RelationshipKindAttr::ManyToMany, _) => {
            return Err(Error::new_spanned(
                ty,
                "has_many and many2many fields must be Vec<T>",
            ));
        }
        (_, Container::Vec) => {
            return Err(Error::new_spanned(
                ty,
                "has_one and belongs_to fields must be T or Option<T>",
            ));
        }
        _ => {}
    }
    Ok(RelationshipAttr {
        kind,
        related,
        container,
        foreign_key: attrs.foreign_key.clone(),
        association_foreign_key: attrs.association_foreign_key.clone(),
        join_table: attrs.join_table.clone(),
        join_foreign_key: attrs.join_foreign_key.clone(),
        join_association_foreign_key: attrs.join_association_foreign_key.clone(),
    })
}

/// Split `Vec<T>` / `Option<T>` into the wrapper and `T`.
pub fn split_container(ty: &Type) -> (Container, Type) {
    if let Type::Path(type_path) = ty {
        if let Some(segment) = type_path.path.segments.last() {
            let container = if segment.ident == "Vec" {
                Some(Container::Vec)
            } else if segment.ident == "Option" {
                Some(Container::Option)
            } else {
                None
            };
            if let (Some(container), PathArguments::AngleBracketed(args)) =
                (container, &segment.arguments)
            {
                if let Some(GenericArgument::Type(inner)) = args.args.first() {
                    return (container, inner.clone());
                }
            }
        }
    }
    (Container::Plain, ty.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use syn::parse_quote;

    #[test]
    fn table_override_and_events() {
        let input: DeriveInput = parse_quote! {
            #[sqlscope(table = "people", events)]
            struct User {
                id: i64,
                name: String,
            }
        };
        let def = parse_model(&input).unwrap();
        assert_eq!(def.table_name.as_deref(), Some("people"));
        assert!(def.events);
    }

    #[test]
    fn implicit_id_is_an_auto_increment_key() {
        let input: DeriveInput = parse_quote! {
            struct User {
                id: i64,
                name: String,
            }
        };
        let def = parse_model(&input).unwrap();
        let id = &def.fields[0];
        assert!(id.primary_key && id.auto_increment && !id.nullable);
        assert!(!def.fields[1].primary_key);
        assert!(def.fields[1].nullable);
    }

    #[test]
    fn string_key_does_not_auto_increment() {
        let input: DeriveInput = parse_quote! {
            struct Tag {
                #[sqlscope(primary_key)]
                code: String,
            }
        };
        let def = parse_model(&input).unwrap();
        assert!(def.fields[0].primary_key);
        assert!(!def.fields[0].auto_increment);
    }

    #[test]
    fn column_attributes() {
        let input: DeriveInput = parse_quote! {
            struct User {
                id: i64,
                #[sqlscope(column = "user_name", sql_type = "VARCHAR(100)", not_null, index)]
                name: String,
                #[sqlscope(unique_index = "uix_contact", default = "''")]
                email: String,
                #[sqlscope(skip)]
                scratch: u64,
            }
        };
        let def = parse_model(&input).unwrap();
        let name = &def.fields[1];
        assert_eq!(name.column_name, "user_name");
        assert_eq!(name.sql_type.as_deref(), Some("VARCHAR(100)"));
        assert!(!name.nullable);
        assert_eq!(name.index.as_deref(), Some(""));
        assert_eq!(def.fields[2].unique_index.as_deref(), Some("uix_contact"));
        assert_eq!(def.fields[2].default.as_deref(), Some("''"));
        assert_eq!(def.column_fields().len(), 3);
    }

    #[test]
    fn relationships() {
        let input: DeriveInput = parse_quote! {
            struct User {
                id: i64,
                #[sqlscope(has_many)]
                emails: Vec<Email>,
                #[sqlscope(belongs_to, foreign_key = "company_ref")]
                company: Option<Company>,
                #[sqlscope(many2many = "user_languages")]
                languages: Vec<Language>,
                #[sqlscope(has_one)]
                card: CreditCard,
            }
        };
        let def = parse_model(&input).unwrap();
        let rels = def.relationship_fields();
        assert_eq!(rels.len(), 4);

        let emails = rels[0].relationship.as_ref().unwrap();
        assert_eq!(emails.kind, RelationshipKindAttr::HasMany);
        assert_eq!(emails.container, Container::Vec);
        let expected: Type = parse_quote!(Email);
        assert_eq!(emails.related, expected);

        let company = rels[1].relationship.as_ref().unwrap();
        assert_eq!(company.container, Container::Option);
        assert_eq!(company.foreign_key.as_deref(), Some("company_ref"));

        let languages = rels[2].relationship.as_ref().unwrap();
        assert_eq!(languages.join_table.as_deref(), Some("user_languages"));

        assert_eq!(
            rels[3].relationship.as_ref().unwrap().container,
            Container::Plain
        );
        assert_eq!(def.column_fields().len(), 1);
    }

    #[test]
    fn has_many_requires_vec() {
        let input: DeriveInput = parse_quote! {
            struct User {
                id: i64,
                #[sqlscope(has_many)]
                emails: Option<Email>,
            }
        };
        let err = parse_model(&input).unwrap_err();
        assert!(err.to_string().contains("Vec<T>"));
    }

    #[test]
    fn unknown_attributes_are_rejected() {
        let input: DeriveInput = parse_quote! {
            struct User {
                #[sqlscope(primary)]
                id: i64,
            }
        };
        assert!(parse_model(&input).is_err());

        let input: DeriveInput = parse_quote! {
            #[sqlscope(tabel = "x")]
            struct User {
                id: i64,
            }
        };
        assert!(parse_model(&input).is_err());
    }

    #[test]
    fn only_one_relationship_per_field() {
        let input: DeriveInput = parse_quote! {
            struct User {
                id: i64,
                #[sqlscope(has_one, belongs_to)]
                card: Option<CreditCard>,
            }
        };
        assert!(parse_model(&input).is_err());
    }

    #[test]
    fn rejects_enums_and_tuple_structs() {
        let input: DeriveInput = parse_quote! { enum E { A } };
        assert!(parse_model(&input).is_err());
        let input: DeriveInput = parse_quote! { struct T(i64); };
        assert!(parse_model(&input).is_err());
    }
}
