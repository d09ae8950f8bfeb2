//! Procedural macros for sqlscope.
//!
//! `sqlscope-macros` is the **compile-time codegen layer**. `#[derive(Model)]`
//! turns a struct into a described model: static column and relationship
//! metadata plus the row conversions the callback pipeline relies on.
//!
//! The macro is used by application crates via the `sqlscope` facade.

use proc_macro::TokenStream;
use quote::quote;

mod infer;
mod parse;

use parse::{Container, FieldDef, ModelDef, RelationshipKindAttr, parse_model};

/// Derive macro for the `Model` trait.
///
/// # Attributes
///
/// Struct level:
/// - `#[sqlscope(table = "name")]` - Override the derived table name
/// - `#[sqlscope(events)]` - Forward lifecycle hooks to the `ModelEvents` impl
///
/// Field level:
/// - `primary_key` - Mark field as primary key (a field named `id` is the default)
/// - `auto_increment` / `auto_increment = false` - Integer keys auto-increment by default
/// - `column = "name"` - Override column name
/// - `sql_type = "VARCHAR(100)"` - Explicit column type
/// - `not_null` - Emit `NOT NULL` in DDL
/// - `unique` - Add unique constraint
/// - `default = "expr"` - Set default SQL expression
/// - `index` / `index = "name"` - Add to an index
/// - `unique_index` / `unique_index = "name"` - Add to a unique index
/// - `skip` - Not persisted
/// - `has_one`, `has_many`, `belongs_to`, `many2many = "join_table"` - Relationships
/// - `foreign_key`, `association_foreign_key`, `join_foreign_key`,
///   `join_association_foreign_key` - Relationship key overrides
///
/// # Example
///
/// ```ignore
/// use sqlscope::Model;
///
/// #[derive(Model, Debug, Clone, Default)]
/// struct User {
///     id: i64,
///     #[sqlscope(unique_index)]
///     name: String,
///     age: Option<i32>,
///     #[sqlscope(has_many)]
///     emails: Vec<Email>,
///     #[sqlscope(many2many = "user_languages")]
///     languages: Vec<Language>,
/// }
/// ```
#[proc_macro_derive(Model, attributes(sqlscope))]
pub fn derive_model(input: TokenStream) -> TokenStream {
    let input = syn::parse_macro_input!(input as syn::DeriveInput);

    let model = match parse_model(&input) {
        Ok(m) => m,
        Err(e) => return e.to_compile_error().into(),
    };

    generate_model_impl(&model).into()
}

/// Generate the Model trait implementation from parsed model definition.
fn generate_model_impl(model: &ModelDef) -> proc_macro2::TokenStream {
    let name = &model.name;
    let name_lit = name.to_string();
    let (impl_generics, ty_generics, where_clause) = model.generics.split_for_impl();

    let table_name_ts = match &model.table_name {
        Some(table) => quote! { ::core::option::Option::Some(#table) },
        None => quote! { ::core::option::Option::None },
    };

    let field_infos = generate_field_infos(model);
    let relationships = generate_relationships(model);
    let to_row = generate_to_row(model);
    let from_row = generate_from_row(model);
    let set_column = generate_set_column(model);
    let relationship_methods = generate_relationship_methods(model);

    let run_event = if model.events {
        quote! {
            fn run_event(
                &mut self,
                event: ::sqlscope_core::ModelEvent,
            ) -> ::sqlscope_core::Result<()> {
                <Self as ::sqlscope_core::ModelEvents>::dispatch(self, event)
            }
        }
    } else {
        quote! {}
    };

    quote! {
        impl #impl_generics ::sqlscope_core::Model for #name #ty_generics #where_clause {
            const MODEL_NAME: &'static str = #name_lit;
            const TABLE_NAME: ::core::option::Option<&'static str> = #table_name_ts;
            const RELATIONSHIPS: &'static [::sqlscope_core::RelationshipInfo] = #relationships;

            fn fields() -> &'static [::sqlscope_core::FieldInfo] {
                static FIELDS: &[::sqlscope_core::FieldInfo] = &[#field_infos];
                FIELDS
            }

            fn to_row(&self) -> ::std::vec::Vec<(&'static str, ::sqlscope_core::Value)> {
                #to_row
            }

            fn from_row(row: &::sqlscope_core::Row) -> ::sqlscope_core::Result<Self> {
                #from_row
            }

            fn set_column(
                &mut self,
                column: &str,
                value: ::sqlscope_core::Value,
            ) -> ::sqlscope_core::Result<bool> {
                #set_column
            }

            #relationship_methods

            #run_event
        }
    }
}

fn opt_str(value: Option<&String>) -> proc_macro2::TokenStream {
    match value {
        Some(s) => quote! { ::core::option::Option::Some(#s) },
        None => quote! { ::core::option::Option::None },
    }
}

/// Generate the static `FieldInfo` entries.
fn generate_field_infos(model: &ModelDef) -> proc_macro2::TokenStream {
    let entries = model.column_fields().into_iter().map(|field| {
        let field_name = field.name.to_string();
        let column_name = &field.column_name;
        let sql_type = infer::sql_type_tokens(&field.ty, field.sql_type.as_deref());
        let sql_type_override = opt_str(field.sql_type.as_ref());
        let nullable = field.nullable;
        let primary_key = field.primary_key;
        let auto_increment = field.auto_increment;
        let unique = field.unique;
        let default = opt_str(field.default.as_ref());
        let index = opt_str(field.index.as_ref());
        let unique_index = opt_str(field.unique_index.as_ref());

        quote! {
            ::sqlscope_core::FieldInfo::new(#field_name, #column_name, #sql_type)
                .sql_type_override_opt(#sql_type_override)
                .nullable(#nullable)
                .primary_key(#primary_key)
                .auto_increment(#auto_increment)
                .unique(#unique)
                .default_opt(#default)
                .index_opt(#index)
                .unique_index_opt(#unique_index)
        }
    });
    quote! { #(#entries),* }
}

/// Generate the `RELATIONSHIPS` constant.
fn generate_relationships(model: &ModelDef) -> proc_macro2::TokenStream {
    let entries = model.relationship_fields().into_iter().filter_map(|field| {
        let rel = field.relationship.as_ref()?;
        let field_name = field.name.to_string();
        let related = &rel.related;
        let kind = match rel.kind {
            RelationshipKindAttr::HasOne => quote! { ::sqlscope_core::RelationshipKind::HasOne },
            RelationshipKindAttr::HasMany => quote! { ::sqlscope_core::RelationshipKind::HasMany },
            RelationshipKindAttr::BelongsTo => {
                quote! { ::sqlscope_core::RelationshipKind::BelongsTo }
            }
            RelationshipKindAttr::ManyToMany => {
                quote! { ::sqlscope_core::RelationshipKind::ManyToMany }
            }
        };
        let foreign_key = opt_str(rel.foreign_key.as_ref());
        let association_foreign_key = opt_str(rel.association_foreign_key.as_ref());
        let link_table = rel.join_table.as_ref().map(|table| {
            let local = opt_str(rel.join_foreign_key.as_ref());
            let remote = opt_str(rel.join_association_foreign_key.as_ref());
            quote! {
                .link_table(
                    ::sqlscope_core::LinkTableInfo::new(#table).columns(#local, #remote)
                )
            }
        });

        Some(quote! {
            ::sqlscope_core::RelationshipInfo::new(
                #field_name,
                #kind,
                ::sqlscope_core::ModelDescriptor::of::<#related>,
            )
            .foreign_key_opt(#foreign_key)
            .association_foreign_key_opt(#association_foreign_key)
            #link_table
        })
    });
    quote! { &[#(#entries),*] }
}

/// Generate the to_row method body.
fn generate_to_row(model: &ModelDef) -> proc_macro2::TokenStream {
    let conversions = model.column_fields().into_iter().map(|field| {
        let field_name = &field.name;
        let column_name = &field.column_name;
        quote! {
            (#column_name, ::sqlscope_core::Value::from(self.#field_name.clone()))
        }
    });
    quote! { vec![#(#conversions),*] }
}

/// Generate the from_row method body.
///
/// Columns missing from the row, skipped fields and relationship fields take
/// their `Default`.
fn generate_from_row(model: &ModelDef) -> proc_macro2::TokenStream {
    let name = &model.name;
    let extractions = model.fields.iter().map(|field: &FieldDef| {
        let field_name = &field.name;
        if field.skip || field.relationship.is_some() {
            quote! { #field_name: ::core::default::Default::default() }
        } else {
            let column_name = &field.column_name;
            quote! { #field_name: row.get_named_or_default(#column_name)? }
        }
    });
    quote! {
        Ok(#name {
            #(#extractions,)*
        })
    }
}

/// Generate the set_column method body.
fn generate_set_column(model: &ModelDef) -> proc_macro2::TokenStream {
    let arms = model.column_fields().into_iter().map(|field| {
        let field_name = &field.name;
        let column_name = &field.column_name;
        quote! {
            #column_name => {
                self.#field_name = ::sqlscope_core::FromValue::from_value(&value)?;
            }
        }
    });
    quote! {
        match column {
            #(#arms)*
            _ => return Ok(false),
        }
        Ok(true)
    }
}

/// Generate `set_related` and `related_mut` for relationship fields.
fn generate_relationship_methods(model: &ModelDef) -> proc_macro2::TokenStream {
    let fields = model.relationship_fields();
    if fields.is_empty() {
        return quote! {};
    }

    let mut set_arms = Vec::new();
    let mut mut_arms = Vec::new();
    for field in fields {
        let Some(rel) = field.relationship.as_ref() else {
            continue;
        };
        let field_name = &field.name;
        let field_lit = field.name.to_string();
        let related = &rel.related;

        let (set_body, mut_body) = match rel.container {
            Container::Vec => (
                quote! {
                    self.#field_name = rows
                        .iter()
                        .map(<#related as ::sqlscope_core::Model>::from_row)
                        .collect::<::sqlscope_core::Result<::std::vec::Vec<_>>>()?;
                },
                quote! {
                    self.#field_name
                        .iter_mut()
                        .map(|m| m as &mut dyn ::sqlscope_core::Record)
                        .collect()
                },
            ),
            Container::Option => (
                quote! {
                    self.#field_name = match rows.first() {
                        ::core::option::Option::Some(r) => ::core::option::Option::Some(
                            <#related as ::sqlscope_core::Model>::from_row(r)?,
                        ),
                        ::core::option::Option::None => ::core::option::Option::None,
                    };
                },
                quote! {
                    self.#field_name
                        .iter_mut()
                        .map(|m| m as &mut dyn ::sqlscope_core::Record)
                        .collect()
                },
            ),
            Container::Plain => (
                quote! {
                    self.#field_name = match rows.first() {
                        ::core::option::Option::Some(r) => {
                            <#related as ::sqlscope_core::Model>::from_row(r)?
                        }
                        ::core::option::Option::None => ::core::default::Default::default(),
                    };
                },
                quote! {
                    vec![&mut self.#field_name as &mut dyn ::sqlscope_core::Record]
                },
            ),
        };

        set_arms.push(quote! { #field_lit => { #set_body } });
        mut_arms.push(quote! { #field_lit => { #mut_body } });
    }

    quote! {
        fn set_related(
            &mut self,
            field: &str,
            rows: &[::sqlscope_core::Row],
        ) -> ::sqlscope_core::Result<()> {
            match field {
                #(#set_arms)*
                _ => {
                    return Err(::sqlscope_core::Error::config(
                        ::sqlscope_core::ConfigErrorKind::MissingRelationship,
                        format!(
                            "{} has no relationship {}",
                            <Self as ::sqlscope_core::Model>::MODEL_NAME,
                            field
                        ),
                    ));
                }
            }
            Ok(())
        }

        fn related_mut(
            &mut self,
            field: &str,
        ) -> ::std::vec::Vec<&mut dyn ::sqlscope_core::Record> {
            match field {
                #(#mut_arms)*
                _ => ::std::vec::Vec::new(),
            }
        }
    }
}
