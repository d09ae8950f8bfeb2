//! Relationship metadata.
//!
//! Relationships are declared at compile time (via the derive macro) and kept
//! as static metadata on each `Model`. Column names that the declaration leaves
//! out are resolved once per type by the metadata registry in the facade crate.

use crate::model::ModelDescriptor;

/// The type of relationship between two models, seen from the owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationshipKind {
    /// The related table holds a foreign key to the owner; at most one row.
    HasOne,
    /// The related table holds a foreign key to the owner.
    HasMany,
    /// The owner holds a foreign key to the related table.
    BelongsTo,
    /// Owner and related rows are linked through a join table.
    ManyToMany,
}

impl RelationshipKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            RelationshipKind::HasOne => "has_one",
            RelationshipKind::HasMany => "has_many",
            RelationshipKind::BelongsTo => "belongs_to",
            RelationshipKind::ManyToMany => "many_to_many",
        }
    }
}

/// Information about a join table for many-to-many relationships.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkTableInfo {
    /// The join table name (e.g. `"user_languages"`).
    pub table_name: &'static str,
    /// Column pointing at the owner; defaults to `<owner>_<pk>`.
    pub local_column: Option<&'static str>,
    /// Column pointing at the related model; defaults to `<related>_<pk>`.
    pub remote_column: Option<&'static str>,
}

impl LinkTableInfo {
    #[must_use]
    pub const fn new(table_name: &'static str) -> Self {
        Self {
            table_name,
            local_column: None,
            remote_column: None,
        }
    }

    #[must_use]
    pub const fn columns(
        mut self,
        local_column: Option<&'static str>,
        remote_column: Option<&'static str>,
    ) -> Self {
        self.local_column = local_column;
        self.remote_column = remote_column;
        self
    }
}

/// Static declaration of one relationship field.
#[derive(Debug, Clone, Copy)]
pub struct RelationshipInfo {
    /// Rust field name holding the related value(s).
    pub name: &'static str,
    /// Relationship kind.
    pub kind: RelationshipKind,
    /// Descriptor of the related model.
    pub related: fn() -> ModelDescriptor,
    /// Foreign key column, if declared explicitly.
    pub foreign_key: Option<&'static str>,
    /// Column the foreign key references, if declared explicitly.
    pub association_foreign_key: Option<&'static str>,
    /// Join table for many-to-many relationships.
    pub link_table: Option<LinkTableInfo>,
}

impl RelationshipInfo {
    #[must_use]
    pub const fn new(
        name: &'static str,
        kind: RelationshipKind,
        related: fn() -> ModelDescriptor,
    ) -> Self {
        Self {
            name,
            kind,
            related,
            foreign_key: None,
            association_foreign_key: None,
            link_table: None,
        }
    }

    #[must_use]
    pub const fn foreign_key_opt(mut self, column: Option<&'static str>) -> Self {
        self.foreign_key = column;
        self
    }

    #[must_use]
    pub const fn association_foreign_key_opt(mut self, column: Option<&'static str>) -> Self {
        self.association_foreign_key = column;
        self
    }

    #[must_use]
    pub const fn link_table(mut self, info: LinkTableInfo) -> Self {
        self.link_table = Some(info);
        self
    }
}

/// Find a relationship declaration by field name.
pub fn find_relationship(
    relationships: &'static [RelationshipInfo],
    field: &str,
) -> Option<&'static RelationshipInfo> {
    relationships.iter().find(|r| r.name == field)
}
