//! Loading relationships along with the main query.
//!
//! Each preload path runs one extra query per level, keyed on the owner
//! values found at the previous level, and the result rows are grouped back
//! onto their owners.

use crate::db::Db;
use crate::registry::{ModelStruct, Relationship};
use crate::scope::{Scope, Target};
use sqlscope_core::{
    ConfigErrorKind, Error, ModelValue, Record, RelationshipKind, Result, Row, Value,
};
use sqlscope_query::{Arg, Condition, FieldMap, Search};

/// Column carrying the owner key in many-to-many preload rows.
pub(crate) const OWNER_KEY_ALIAS: &str = "sqlscope_owner_key";

pub(crate) fn preload(scope: &mut Scope<'_>) {
    if scope.has_error() {
        return;
    }
    let preloads = scope.search().preloads().to_vec();
    if preloads.is_empty() {
        return;
    }
    let Some(model) = scope.model_struct() else {
        return;
    };
    let db = scope.db().new();
    let mut failures = Vec::new();
    for preload in &preloads {
        let path: Vec<&str> = preload.path.split('.').map(str::trim).collect();
        let mut records = scope.records_mut();
        if let Err(e) = preload_path(&db, &model, &mut records, &path, &preload.conditions) {
            failures.push(e);
        }
    }
    for e in failures {
        scope.err(e);
    }
}

fn preload_path(
    db: &Db,
    owner: &ModelStruct,
    records: &mut [&mut dyn Record],
    path: &[&str],
    conditions: &[Condition],
) -> Result<()> {
    let Some((field, rest)) = path.split_first() else {
        return Ok(());
    };
    let relationship = owner
        .relationship(field)
        .ok_or_else(|| {
            Error::config(
                ConfigErrorKind::MissingRelationship,
                format!("{} has no relationship {}", owner.descriptor.name, field),
            )
        })?
        .clone();
    let extra = if rest.is_empty() { conditions } else { &[] };

    let mut keys: Vec<Value> = Vec::new();
    for record in records.iter() {
        if let Some(key) = record
            .value_of(relationship.owner_key())
            .filter(|v| !v.is_zero())
        {
            if !keys.iter().any(|k| k.loosely_eq(&key)) {
                keys.push(key);
            }
        }
    }

    if !keys.is_empty() {
        let mut handle = db.new();
        handle.search = related_search(db, &relationship, keys, true);
        for condition in extra {
            handle.search.filter(condition.clone());
        }
        let rows = Scope::new(
            handle,
            Target::Owned(ModelValue::empty(relationship.related)),
        )
        .fetch_rows()?;

        let match_column = match relationship.kind {
            RelationshipKind::ManyToMany => OWNER_KEY_ALIAS,
            _ => relationship.related_key(),
        };
        for record in records.iter_mut() {
            let Some(key) = record
                .value_of(relationship.owner_key())
                .filter(|v| !v.is_zero())
            else {
                continue;
            };
            let matched: Vec<Row> = rows
                .iter()
                .filter(|row| {
                    row.get_by_name(match_column)
                        .is_some_and(|v| v.loosely_eq(&key))
                })
                .cloned()
                .collect();
            record.set_related(relationship.field, &matched)?;
        }
    }

    if rest.is_empty() {
        return Ok(());
    }
    let related = db.model_struct(&relationship.related);
    let mut children: Vec<&mut dyn Record> = records
        .iter_mut()
        .flat_map(|r| r.related_mut(relationship.field))
        .collect();
    preload_path(db, &related, &mut children, rest, conditions)
}

/// A search for the rows related to the owner `keys`.
///
/// Many-to-many rows are joined through the link table; with `owner_key`
/// each row also carries the owner key under [`OWNER_KEY_ALIAS`].
pub(crate) fn related_search(
    db: &Db,
    relationship: &Relationship,
    keys: Vec<Value>,
    owner_key: bool,
) -> Search {
    let mut search = Search::new();
    match (&relationship.join_table, relationship.kind) {
        (Some(join), RelationshipKind::ManyToMany) => {
            let dialect = db.dialect();
            let q = |name: &str| dialect.quote_identifier(name);
            let related_table = q(&relationship.related_table);
            let join_table = q(&join.table);
            let select = if owner_key {
                format!(
                    "{}.*, {}.{} AS {}",
                    related_table,
                    join_table,
                    q(&join.foreign_key),
                    q(OWNER_KEY_ALIAS)
                )
            } else {
                format!("{}.*", related_table)
            };
            search
                .select(Condition::raw(select))
                .joins(Condition::raw(format!(
                    "INNER JOIN {} ON {}.{} = {}.{}",
                    join_table,
                    join_table,
                    q(&join.association_foreign_key),
                    related_table,
                    q(&relationship.association_foreign_key)
                )))
                .filter(Condition::Raw {
                    sql: format!("{}.{} IN (?)", join_table, q(&join.foreign_key)),
                    args: vec![Arg::Value(Value::Array(keys))],
                });
        }
        _ => {
            search.filter(Condition::Map(
                FieldMap::new().set(relationship.related_key(), Value::Array(keys)),
            ));
        }
    }
    search
}
