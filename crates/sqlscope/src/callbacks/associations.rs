//! Saving related values with their owner.
//!
//! Belongs-to values are saved first so the owner can take their key. The
//! other kinds are saved after the owner, taking the owner's key; for
//! many-to-many a link row is added when missing.

use crate::association::link;
use crate::scope::{SAVE_ASSOCIATIONS, Scope, UPDATE_COLUMN};
use sqlscope_core::RelationshipKind;

fn saves_associations(scope: &Scope<'_>) -> bool {
    if scope.has_error() || scope.get(UPDATE_COLUMN).is_some() {
        return false;
    }
    scope.get_as::<bool>(SAVE_ASSOCIATIONS).unwrap_or(true)
}

pub(crate) fn save_before_associations(scope: &mut Scope<'_>) {
    if !saves_associations(scope) {
        return;
    }
    let Some(model) = scope.model_struct() else {
        return;
    };
    let db = scope.db().new();
    let mut failures = Vec::new();
    for relationship in model
        .relationships
        .iter()
        .filter(|r| r.kind == RelationshipKind::BelongsTo)
    {
        for record in scope.records_mut() {
            let mut key = None;
            for child in record.related_mut(relationship.field) {
                if child.is_blank() {
                    continue;
                }
                match db.save_record(&mut *child).error {
                    Some(e) => failures.push(e),
                    None => key = child.value_of(&relationship.association_foreign_key),
                }
            }
            if let Some(key) = key {
                if let Err(e) = record.set_column(&relationship.foreign_key, key) {
                    failures.push(e);
                }
            }
        }
    }
    for e in failures {
        scope.err(e);
    }
}

pub(crate) fn save_after_associations(scope: &mut Scope<'_>) {
    if !saves_associations(scope) {
        return;
    }
    let Some(model) = scope.model_struct() else {
        return;
    };
    let db = scope.db().new();
    let mut failures = Vec::new();
    for relationship in model
        .relationships
        .iter()
        .filter(|r| r.kind != RelationshipKind::BelongsTo)
    {
        for record in scope.records_mut() {
            let Some(owner_key) = record
                .value_of(relationship.owner_key())
                .filter(|v| !v.is_zero())
            else {
                continue;
            };
            let mut linked = Vec::new();
            for child in record.related_mut(relationship.field) {
                if child.is_blank() {
                    continue;
                }
                if relationship.kind != RelationshipKind::ManyToMany {
                    if let Err(e) = child.set_column(&relationship.foreign_key, owner_key.clone()) {
                        failures.push(e);
                        continue;
                    }
                }
                match db.save_record(&mut *child).error {
                    Some(e) => failures.push(e),
                    None => {
                        if let Some(key) = child.value_of(&relationship.association_foreign_key) {
                            linked.push(key);
                        }
                    }
                }
            }
            if let Some(join) = &relationship.join_table {
                for key in linked {
                    if let Err(e) = link(&db, join, owner_key.clone(), key) {
                        failures.push(e);
                    }
                }
            }
        }
    }
    for e in failures {
        scope.err(e);
    }
}
