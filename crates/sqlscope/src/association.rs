//! Association mode: work on one relationship of a saved owner value.
//!
//! ```ignore
//! let mut user = User { id: 1, ..Default::default() };
//! let mut assoc = db.association(&mut user, "languages");
//! assoc.append(&mut [zh, en]);
//! assoc.delete(&[en]);
//! let n = assoc.count();
//! if let Some(err) = assoc.error() { /* ... */ }
//! ```

use crate::callbacks::preload::related_search;
use crate::db::Db;
use crate::registry::{JoinTable, ModelStruct, Relationship};
use sqlscope_core::{
    ConfigErrorKind, Dialect, Error, Errors, Model, ModelDescriptor, ModelValue, Record,
    RelationshipKind, Result, Value,
};
use sqlscope_query::{FieldMap, RenderContext, Search, SqlBuilder, join_non_empty};
use std::sync::Arc;

/// A handle on one relationship of an owner value.
///
/// The first failure is sticky: later operations do nothing and
/// [`Association::error`] keeps reporting it.
pub struct Association<'a> {
    db: Db,
    owner: &'a mut dyn Record,
    owner_struct: Arc<ModelStruct>,
    relationship: Option<Relationship>,
}

enum Unlink {
    All,
    Only(Vec<Value>),
    Except(Vec<Value>),
}

impl Db {
    /// Association mode for `field` of `owner`, which needs a non-zero
    /// primary key.
    pub fn association<'a, M: Model>(&self, owner: &'a mut M, field: &str) -> Association<'a> {
        Association::new(self.new(), owner, field)
    }
}

impl<'a> Association<'a> {
    fn new(mut db: Db, owner: &'a mut dyn Record, field: &str) -> Self {
        let owner_struct = db.model_struct(&owner.descriptor());
        let key_is_zero = owner_struct
            .primary_key()
            .and_then(|pk| owner.value_of(pk))
            .is_none_or(|v| v.is_zero());
        let relationship = owner_struct.relationship(field).cloned();
        let declared = owner_struct
            .descriptor
            .relationships
            .iter()
            .any(|info| info.name == field);
        if key_is_zero {
            db.add_error(Error::config(
                ConfigErrorKind::MissingPrimaryKey,
                format!("{} needs a primary key for associations", owner_struct.table_name),
            ));
        } else if relationship.is_none() && declared {
            db.add_error(Error::config(
                ConfigErrorKind::InvalidAssociation,
                format!(
                    "{}.{} has no usable foreign key",
                    owner_struct.descriptor.name, field
                ),
            ));
        } else if relationship.is_none() {
            db.add_error(Error::config(
                ConfigErrorKind::UnknownField,
                format!("{} has no relationship {}", owner_struct.descriptor.name, field),
            ));
        }
        Self {
            db,
            owner,
            owner_struct,
            relationship,
        }
    }

    /// The accumulated error, if any.
    pub fn error(&self) -> Option<&Error> {
        self.db.error()
    }

    fn has_error(&self) -> bool {
        self.db.error.is_some()
    }

    /// Keep an operation's error without logging it again.
    fn absorb(&mut self, result: Db) {
        if let Some(e) = result.error {
            self.keep(e);
        }
    }

    fn keep(&mut self, error: Error) {
        let mut errors = Errors::new();
        if let Some(previous) = self.db.error.take() {
            errors.add(previous);
        }
        errors.add(error);
        self.db.error = errors.into_error();
    }

    /// The relationship, when usable with values of `R`.
    fn checked(&mut self, related: ModelDescriptor) -> Option<Relationship> {
        if self.has_error() {
            return None;
        }
        let relationship = self.relationship.clone()?;
        if relationship.related != related {
            self.db.add_error(Error::config(
                ConfigErrorKind::InvalidAssociation,
                format!(
                    "{} holds {}, not {}",
                    relationship.field, relationship.related.name, related.name
                ),
            ));
            return None;
        }
        Some(relationship)
    }

    fn owner_key(&self, relationship: &Relationship) -> Value {
        self.owner
            .value_of(relationship.owner_key())
            .unwrap_or(Value::Null)
    }

    /// Load the related rows into `out`.
    pub fn find<R: Model>(&mut self, out: &mut Vec<R>) -> &mut Self {
        let Some(relationship) = self.checked(ModelDescriptor::of::<R>()) else {
            return self;
        };
        let key = self.owner_key(&relationship);
        if key.is_zero() {
            out.clear();
            return self;
        }
        let result = related_handle(&self.db, &relationship, key).find(out);
        self.absorb(result);
        self
    }

    /// Save `values` and link them to the owner.
    pub fn append<R: Model>(&mut self, values: &mut [R]) -> &mut Self {
        let Some(relationship) = self.checked(ModelDescriptor::of::<R>()) else {
            return self;
        };
        self.save_linked(&relationship, values);
        self.reload(&relationship);
        self
    }

    /// Link exactly `values`, unlinking every other related row.
    pub fn replace<R: Model>(&mut self, values: &mut [R]) -> &mut Self {
        let Some(relationship) = self.checked(ModelDescriptor::of::<R>()) else {
            return self;
        };
        let keys = self.save_linked(&relationship, values);
        if !self.has_error() {
            self.unlink(&relationship, Unlink::Except(keys));
        }
        self.reload(&relationship);
        self
    }

    /// Unlink `values` from the owner. The related rows themselves stay.
    pub fn delete<R: Model>(&mut self, values: &[R]) -> &mut Self {
        let Some(relationship) = self.checked(ModelDescriptor::of::<R>()) else {
            return self;
        };
        let keys: Vec<Value> = values
            .iter()
            .filter_map(|v| identity(&relationship, v))
            .collect();
        if !keys.is_empty() {
            self.unlink(&relationship, Unlink::Only(keys));
        }
        self.reload(&relationship);
        self
    }

    /// Unlink every related row.
    pub fn clear(&mut self) -> &mut Self {
        if self.has_error() {
            return self;
        }
        let Some(relationship) = self.relationship.clone() else {
            return self;
        };
        self.unlink(&relationship, Unlink::All);
        self.reload(&relationship);
        self
    }

    /// Number of related rows.
    pub fn count(&mut self) -> i64 {
        if self.has_error() {
            return 0;
        }
        let Some(relationship) = self.relationship.clone() else {
            return 0;
        };
        let key = self.owner_key(&relationship);
        if key.is_zero() {
            return 0;
        }
        let mut n = 0;
        let result = related_handle(&self.db, &relationship, key).count(&mut n);
        self.absorb(result);
        n
    }

    /// Save each value and link it; returns the keys identifying them.
    fn save_linked<R: Model>(
        &mut self,
        relationship: &Relationship,
        values: &mut [R],
    ) -> Vec<Value> {
        let mut keys = Vec::new();
        for value in values.iter_mut() {
            if self.has_error() {
                break;
            }
            match relationship.kind {
                RelationshipKind::HasOne | RelationshipKind::HasMany => {
                    let owner_key = self.owner_key(relationship);
                    if let Err(e) =
                        Record::set_column(value, &relationship.foreign_key, owner_key)
                    {
                        self.db.add_error(e);
                        break;
                    }
                    let result = self.db.save(value);
                    self.absorb(result);
                }
                RelationshipKind::BelongsTo => {
                    let result = self.db.save(value);
                    self.absorb(result);
                    if let Some(key) = value.value_of(&relationship.association_foreign_key) {
                        self.set_owner_key(relationship, key);
                    }
                }
                RelationshipKind::ManyToMany => {
                    let result = self.db.save(value);
                    self.absorb(result);
                    let related = value.value_of(&relationship.association_foreign_key);
                    if let (Some(join), Some(related)) = (&relationship.join_table, related) {
                        let owner_key = self.owner_key(relationship);
                        if let Err(e) = link(&self.db, join, owner_key, related) {
                            self.db.add_error(e);
                        }
                    }
                }
            }
            if let Some(key) = identity(relationship, value) {
                keys.push(key);
            }
        }
        keys
    }

    /// Point the owner's belongs-to key at `key`, in memory and in its row.
    fn set_owner_key(&mut self, relationship: &Relationship, key: Value) {
        if let Err(e) = self.owner.set_column(&relationship.foreign_key, key.clone()) {
            self.db.add_error(e);
            return;
        }
        let Some(pk) = self.owner_struct.primary_key() else {
            return;
        };
        let pk_value = self.owner.value_of(pk).unwrap_or(Value::Null);
        let result = self
            .db
            .new()
            .table(self.owner_struct.table_name.clone())
            .filter(FieldMap::new().set(pk, pk_value), ())
            .update_column(&relationship.foreign_key, key);
        self.absorb(result);
    }

    fn unlink(&mut self, relationship: &Relationship, which: Unlink) {
        let owner_key = self.owner_key(relationship);
        match relationship.kind {
            RelationshipKind::HasOne | RelationshipKind::HasMany => {
                let mut handle = self
                    .db
                    .new()
                    .table(relationship.related_table.clone())
                    .filter(
                        FieldMap::new().set(relationship.foreign_key.as_str(), owner_key),
                        (),
                    );
                let pk = relationship.related_primary_key.as_str();
                match which {
                    Unlink::All => {}
                    Unlink::Only(keys) => {
                        handle = handle.filter(FieldMap::new().set(pk, Value::Array(keys)), ());
                    }
                    Unlink::Except(keys) if keys.is_empty() => {}
                    Unlink::Except(keys) => {
                        handle = handle.not(FieldMap::new().set(pk, Value::Array(keys)), ());
                    }
                }
                let result = handle.update_column(&relationship.foreign_key, Value::Null);
                self.absorb(result);
            }
            RelationshipKind::BelongsTo => {
                let current = self.owner_key(relationship);
                let unlink = match &which {
                    Unlink::All => true,
                    Unlink::Only(keys) => keys.iter().any(|k| k.loosely_eq(&current)),
                    Unlink::Except(keys) => !keys.iter().any(|k| k.loosely_eq(&current)),
                };
                if unlink && !current.is_zero() {
                    self.set_owner_key(relationship, Value::Null);
                }
            }
            RelationshipKind::ManyToMany => {
                let Some(join) = &relationship.join_table else {
                    return;
                };
                let mut search = Search::new();
                let owned = FieldMap::new().set(join.foreign_key.as_str(), owner_key);
                search.filter(owned.into());
                let related_column = join.association_foreign_key.as_str();
                match which {
                    Unlink::All => {}
                    Unlink::Only(keys) => {
                        let only = FieldMap::new().set(related_column, Value::Array(keys));
                        search.filter(only.into());
                    }
                    Unlink::Except(keys) if keys.is_empty() => {}
                    Unlink::Except(keys) => {
                        let except = FieldMap::new().set(related_column, Value::Array(keys));
                        search.not(except.into());
                    }
                }
                if let Err(e) = delete_links(&self.db, join, &search) {
                    self.db.add_error(e);
                }
            }
        }
    }

    /// Refresh the owner's field from the database.
    fn reload(&mut self, relationship: &Relationship) {
        let key = self.owner_key(relationship);
        let rows = if key.is_zero() {
            Ok(Vec::new())
        } else {
            related_handle(&self.db, relationship, key).rows()
        };
        match rows {
            Ok(rows) => {
                if let Err(e) = self.owner.set_related(relationship.field, &rows) {
                    self.db.add_error(e);
                }
            }
            Err(e) => self.keep(e),
        }
    }
}

/// The column value that identifies a related value on its side of the
/// relationship.
fn identity(relationship: &Relationship, value: &dyn Record) -> Option<Value> {
    let column = match relationship.kind {
        RelationshipKind::HasOne | RelationshipKind::HasMany => &relationship.related_primary_key,
        RelationshipKind::BelongsTo | RelationshipKind::ManyToMany => {
            &relationship.association_foreign_key
        }
    };
    value.value_of(column).filter(|v| !v.is_zero())
}

/// A handle over the rows related to one owner key.
pub(crate) fn related_handle(db: &Db, relationship: &Relationship, key: Value) -> Db {
    let mut handle = db.new();
    handle.search = related_search(db, relationship, vec![key], false);
    handle.value = Some(ModelValue::empty(relationship.related));
    handle
}

/// Insert a link row unless it already exists.
pub(crate) fn link(db: &Db, join: &JoinTable, owner: Value, related: Value) -> Result<()> {
    let dialect = db.dialect();
    let table = dialect.quote_identifier(&join.table);
    let owner_column = dialect.quote_identifier(&join.foreign_key);
    let related_column = dialect.quote_identifier(&join.association_foreign_key);
    let from_dual = if dialect == Dialect::Mysql { " FROM DUAL" } else { "" };
    let sql = format!(
        "INSERT INTO {table} ({owner_column}, {related_column}) SELECT {}, {}{from_dual} \
         WHERE NOT EXISTS (SELECT 1 FROM {table} WHERE {owner_column} = {} AND {related_column} = {})",
        dialect.placeholder(1),
        dialect.placeholder(2),
        dialect.placeholder(3),
        dialect.placeholder(4),
    );
    db.exec_logged(&sql, &[owner.clone(), related.clone(), owner, related])?;
    Ok(())
}

fn delete_links(db: &Db, join: &JoinTable, search: &Search) -> Result<()> {
    let ctx = RenderContext::new(db.dialect(), join.table.clone());
    let mut vars = Vec::new();
    let conditions = SqlBuilder::new(&ctx, &mut vars).where_sql(search, &[]);
    let sql = join_non_empty(&[format!("DELETE FROM {}", ctx.quoted_table()), conditions]);
    db.exec_logged(&sql, &vars)?;
    Ok(())
}
