//! Resolved model metadata.
//!
//! The derive macro emits static [`FieldInfo`] and [`RelationshipInfo`]
//! tables. A [`ModelStruct`] adds what depends on configuration or on other
//! models: the table name under the current naming convention and the key
//! columns of every relationship. Each root handle owns one
//! [`ModelRegistry`]; toggling singular table names clears it.

use sqlscope_core::naming::{to_snake_case, table_name_for};
use sqlscope_core::{FieldInfo, ModelDescriptor, RelationshipKind};
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Column used for soft deletes.
pub const DELETED_AT: &str = "deleted_at";
/// Column set on insert.
pub const CREATED_AT: &str = "created_at";
/// Column set on insert and update.
pub const UPDATED_AT: &str = "updated_at";

/// The link table of a many-to-many relationship.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinTable {
    pub table: String,
    /// Join column holding the owner's key.
    pub foreign_key: String,
    /// Join column holding the related model's key.
    pub association_foreign_key: String,
}

/// A relationship with every key column resolved.
///
/// Key columns by kind:
///
/// | Kind | `foreign_key` | `association_foreign_key` |
/// |------|---------------|---------------------------|
/// | has-one / has-many | on the related table | owner column it points at |
/// | belongs-to | on the owner table | related column it points at |
/// | many-to-many | owner column | related column |
#[derive(Debug, Clone)]
pub struct Relationship {
    pub field: &'static str,
    pub kind: RelationshipKind,
    pub related: ModelDescriptor,
    pub related_table: String,
    pub related_primary_key: String,
    pub foreign_key: String,
    pub association_foreign_key: String,
    pub join_table: Option<JoinTable>,
}

impl Relationship {
    /// Owner column whose value identifies the related rows.
    pub fn owner_key(&self) -> &str {
        match self.kind {
            RelationshipKind::BelongsTo => &self.foreign_key,
            RelationshipKind::HasOne | RelationshipKind::HasMany => &self.association_foreign_key,
            RelationshipKind::ManyToMany => &self.foreign_key,
        }
    }

    /// Related column matched against [`Relationship::owner_key`].
    pub fn related_key(&self) -> &str {
        match self.kind {
            RelationshipKind::BelongsTo => &self.association_foreign_key,
            RelationshipKind::HasOne | RelationshipKind::HasMany => &self.foreign_key,
            RelationshipKind::ManyToMany => &self.association_foreign_key,
        }
    }
}

/// Model metadata resolved for one naming convention.
#[derive(Debug, Clone)]
pub struct ModelStruct {
    pub descriptor: ModelDescriptor,
    pub table_name: String,
    pub fields: &'static [FieldInfo],
    pub primary_keys: Vec<&'static FieldInfo>,
    pub soft_delete: bool,
    pub relationships: Vec<Relationship>,
}

impl ModelStruct {
    fn resolve(descriptor: &ModelDescriptor, singular: bool) -> Self {
        let table_name = table_name_of(descriptor, singular);
        let primary_keys: Vec<&'static FieldInfo> =
            descriptor.fields.iter().filter(|f| f.primary_key).collect();
        let owner_pk = primary_keys.first().map_or("id", |f| f.column_name);

        let relationships = descriptor
            .relationships
            .iter()
            .filter_map(|info| {
                let related = (info.related)();
                let related_pk = primary_key_of(&related);
                let (foreign_key, association_foreign_key) = match info.kind {
                    RelationshipKind::HasOne | RelationshipKind::HasMany => (
                        info.foreign_key.map_or_else(
                            || format!("{}_id", to_snake_case(descriptor.name)),
                            String::from,
                        ),
                        info.association_foreign_key
                            .map_or_else(|| owner_pk.to_string(), String::from),
                    ),
                    RelationshipKind::BelongsTo => (
                        info.foreign_key
                            .map_or_else(|| format!("{}_id", info.name), String::from),
                        info.association_foreign_key
                            .map_or_else(|| related_pk.to_string(), String::from),
                    ),
                    RelationshipKind::ManyToMany => (
                        info.foreign_key
                            .map_or_else(|| owner_pk.to_string(), String::from),
                        info.association_foreign_key
                            .map_or_else(|| related_pk.to_string(), String::from),
                    ),
                };

                // The key column must exist on the side that carries it.
                let resolved = match info.kind {
                    RelationshipKind::HasOne | RelationshipKind::HasMany => {
                        related.field(&foreign_key).is_some()
                            && descriptor.field(&association_foreign_key).is_some()
                    }
                    RelationshipKind::BelongsTo => {
                        descriptor.field(&foreign_key).is_some()
                            && related.field(&association_foreign_key).is_some()
                    }
                    RelationshipKind::ManyToMany => {
                        info.link_table.is_some()
                            && descriptor.field(&foreign_key).is_some()
                            && related.field(&association_foreign_key).is_some()
                    }
                };
                if !resolved {
                    tracing::debug!(
                        target: "sqlscope",
                        model = descriptor.name,
                        field = info.name,
                        "relationship has no usable foreign key"
                    );
                    return None;
                }

                let join_table = info.link_table.map(|link| JoinTable {
                    table: link.table_name.to_string(),
                    foreign_key: link.local_column.map_or_else(
                        || format!("{}_{}", to_snake_case(descriptor.name), foreign_key),
                        String::from,
                    ),
                    association_foreign_key: link.remote_column.map_or_else(
                        || format!("{}_{}", to_snake_case(related.name), association_foreign_key),
                        String::from,
                    ),
                });

                Some(Relationship {
                    field: info.name,
                    kind: info.kind,
                    related,
                    related_table: table_name_of(&related, singular),
                    related_primary_key: related_pk.to_string(),
                    foreign_key,
                    association_foreign_key,
                    join_table,
                })
            })
            .collect();

        Self {
            descriptor: *descriptor,
            table_name,
            fields: descriptor.fields,
            primary_keys,
            soft_delete: descriptor.field(DELETED_AT).is_some(),
            relationships,
        }
    }

    /// The first primary key column.
    pub fn primary_key(&self) -> Option<&'static str> {
        self.primary_keys.first().map(|f| f.column_name)
    }

    /// A resolved relationship by field name.
    pub fn relationship(&self, field: &str) -> Option<&Relationship> {
        self.relationships.iter().find(|r| r.field == field)
    }

    /// The first resolved relationship to the model with `type_id`.
    pub fn relationship_to(&self, type_id: TypeId) -> Option<&Relationship> {
        self.relationships
            .iter()
            .find(|r| r.related.type_id == type_id)
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.fields.iter().any(|f| f.column_name == column)
    }

    /// Map a field or column name to its column.
    pub fn column_for(&self, name: &str) -> Option<&'static str> {
        self.fields
            .iter()
            .find(|f| f.column_name == name || f.name == name)
            .map(|f| f.column_name)
    }
}

fn table_name_of(descriptor: &ModelDescriptor, singular: bool) -> String {
    descriptor
        .table_name
        .map_or_else(|| table_name_for(descriptor.name, singular), String::from)
}

fn primary_key_of(descriptor: &ModelDescriptor) -> &'static str {
    descriptor
        .fields
        .iter()
        .find(|f| f.primary_key)
        .map_or("id", |f| f.column_name)
}

/// Cache of resolved [`ModelStruct`]s, keyed by model type.
#[derive(Debug, Default)]
pub struct ModelRegistry {
    structs: RwLock<HashMap<TypeId, Arc<ModelStruct>>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The resolved struct for `descriptor`, resolving it on first use.
    pub fn get(&self, descriptor: &ModelDescriptor, singular: bool) -> Arc<ModelStruct> {
        {
            let structs = self
                .structs
                .read()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            if let Some(found) = structs.get(&descriptor.type_id) {
                return Arc::clone(found);
            }
        }
        let resolved = Arc::new(ModelStruct::resolve(descriptor, singular));
        let mut structs = self
            .structs
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Arc::clone(structs.entry(descriptor.type_id).or_insert(resolved))
    }

    /// Drop every cached entry.
    pub fn clear(&self) {
        self.structs
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clear();
    }

    pub fn len(&self) -> usize {
        self.structs
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlscope_core::{
        FromValue, LinkTableInfo, Model, RelationshipInfo, Result, Row, SqlType, Value,
    };

    #[derive(Debug, Default)]
    struct Language {
        id: i64,
    }

    impl Model for Language {
        const MODEL_NAME: &'static str = "Language";

        fn fields() -> &'static [FieldInfo] {
            static FIELDS: &[FieldInfo] =
                &[FieldInfo::new("id", "id", SqlType::BigInt).primary_key(true)];
            FIELDS
        }

        fn to_row(&self) -> Vec<(&'static str, Value)> {
            vec![("id", Value::from(self.id))]
        }

        fn from_row(row: &Row) -> Result<Self> {
            Ok(Self {
                id: row.get_named_or_default("id")?,
            })
        }

        fn set_column(&mut self, column: &str, value: Value) -> Result<bool> {
            if column == "id" {
                self.id = FromValue::from_value(&value)?;
                return Ok(true);
            }
            Ok(false)
        }
    }

    #[derive(Debug, Default)]
    struct Email {
        id: i64,
        user_id: i64,
    }

    impl Model for Email {
        const MODEL_NAME: &'static str = "Email";

        fn fields() -> &'static [FieldInfo] {
            static FIELDS: &[FieldInfo] = &[
                FieldInfo::new("id", "id", SqlType::BigInt).primary_key(true),
                FieldInfo::new("user_id", "user_id", SqlType::BigInt),
            ];
            FIELDS
        }

        fn to_row(&self) -> Vec<(&'static str, Value)> {
            vec![("id", Value::from(self.id)), ("user_id", Value::from(self.user_id))]
        }

        fn from_row(row: &Row) -> Result<Self> {
            Ok(Self {
                id: row.get_named_or_default("id")?,
                user_id: row.get_named_or_default("user_id")?,
            })
        }

        fn set_column(&mut self, column: &str, value: Value) -> Result<bool> {
            match column {
                "id" => self.id = FromValue::from_value(&value)?,
                "user_id" => self.user_id = FromValue::from_value(&value)?,
                _ => return Ok(false),
            }
            Ok(true)
        }
    }

    #[derive(Debug, Default)]
    struct User {
        id: i64,
    }

    impl Model for User {
        const MODEL_NAME: &'static str = "User";
        const RELATIONSHIPS: &'static [RelationshipInfo] = &[
            RelationshipInfo::new(
                "emails",
                RelationshipKind::HasMany,
                ModelDescriptor::of::<Email>,
            ),
            RelationshipInfo::new(
                "languages",
                RelationshipKind::ManyToMany,
                ModelDescriptor::of::<Language>,
            )
            .link_table(LinkTableInfo::new("user_languages")),
            RelationshipInfo::new(
                "company",
                RelationshipKind::BelongsTo,
                ModelDescriptor::of::<Language>,
            ),
        ];

        fn fields() -> &'static [FieldInfo] {
            static FIELDS: &[FieldInfo] = &[
                FieldInfo::new("id", "id", SqlType::BigInt).primary_key(true),
                FieldInfo::new("deleted_at", "deleted_at", SqlType::BigInt).nullable(true),
            ];
            FIELDS
        }

        fn to_row(&self) -> Vec<(&'static str, Value)> {
            vec![("id", Value::from(self.id))]
        }

        fn from_row(row: &Row) -> Result<Self> {
            Ok(Self {
                id: row.get_named_or_default("id")?,
            })
        }

        fn set_column(&mut self, column: &str, value: Value) -> Result<bool> {
            if column == "id" {
                self.id = FromValue::from_value(&value)?;
                return Ok(true);
            }
            Ok(false)
        }
    }

    #[test]
    fn resolves_keys_and_tables() {
        let registry = ModelRegistry::new();
        let user = registry.get(&ModelDescriptor::of::<User>(), false);
        assert_eq!(user.table_name, "users");
        assert_eq!(user.primary_key(), Some("id"));
        assert!(user.soft_delete);

        let emails = user.relationship("emails").unwrap();
        assert_eq!(emails.foreign_key, "user_id");
        assert_eq!(emails.association_foreign_key, "id");
        assert_eq!(emails.related_table, "emails");
        assert_eq!(emails.owner_key(), "id");
        assert_eq!(emails.related_key(), "user_id");

        let languages = user.relationship("languages").unwrap();
        let join = languages.join_table.as_ref().unwrap();
        assert_eq!(join.table, "user_languages");
        assert_eq!(join.foreign_key, "user_id");
        assert_eq!(join.association_foreign_key, "language_id");
    }

    #[test]
    fn drops_relationships_without_key_column() {
        let registry = ModelRegistry::new();
        let user = registry.get(&ModelDescriptor::of::<User>(), false);
        // `company_id` is not a column of User.
        assert!(user.relationship("company").is_none());
        assert!(user.relationship_to(TypeId::of::<Email>()).is_some());
    }

    #[test]
    fn singular_names_after_clear() {
        let registry = ModelRegistry::new();
        assert_eq!(registry.get(&ModelDescriptor::of::<Email>(), false).table_name, "emails");
        assert_eq!(registry.len(), 1);
        // Cached entry wins until cleared.
        assert_eq!(registry.get(&ModelDescriptor::of::<Email>(), true).table_name, "emails");
        registry.clear();
        assert!(registry.is_empty());
        assert_eq!(registry.get(&ModelDescriptor::of::<Email>(), true).table_name, "email");
    }
}
