//! Steps of the update chain.

use crate::registry::{CREATED_AT, UPDATED_AT};
use crate::scope::{Scope, UPDATE_ATTRS, UPDATE_COLUMN, UPDATE_INTERFACE};
use sqlscope_core::{Error, ModelEvent, Result, Value};
use sqlscope_query::{Arg, FieldMap, join_non_empty};

/// Reduce the `updates` map to the columns that change the target value,
/// assigning them on the way. Stops the chain when nothing changes.
pub(crate) fn assign_updating_attributes(scope: &mut Scope<'_>) {
    let Some(attrs) = scope.get_as::<FieldMap>(UPDATE_INTERFACE) else {
        return;
    };
    match changed_attrs(scope, &attrs) {
        Ok(changed) if changed.is_empty() => scope.skip_left(),
        Ok(changed) => {
            scope.instance_set(UPDATE_ATTRS, changed);
        }
        Err(e) => scope.err(e),
    }
}

fn changed_attrs(scope: &mut Scope<'_>, attrs: &FieldMap) -> Result<FieldMap> {
    let model = scope.model_struct();
    let mut changed = FieldMap::new();
    for (key, arg) in attrs.iter() {
        let column = model.as_ref().and_then(|m| m.column_for(key));
        match (column, arg) {
            (Some(column), Arg::Value(value)) => {
                let unchanged = scope
                    .value_of(column)
                    .is_some_and(|current| current.loosely_eq(value));
                if !unchanged {
                    scope.set_column(column, value.clone())?;
                    changed.insert(column, value.clone());
                }
            }
            (Some(column), Arg::Expr(_)) => changed.insert(column, arg.clone()),
            (None, _) => changed.insert(key, arg.clone()),
        }
    }
    Ok(changed)
}

fn updating_columns_only(scope: &Scope<'_>) -> bool {
    scope.get(UPDATE_COLUMN).is_some()
}

pub(crate) fn before_update(scope: &mut Scope<'_>) {
    if updating_columns_only(scope) {
        return;
    }
    scope.call_method(ModelEvent::BeforeSave);
    scope.call_method(ModelEvent::BeforeUpdate);
}

/// Set `updated_at`, in the value and in the pending update map.
pub(crate) fn update_time_stamp(scope: &mut Scope<'_>) {
    if scope.has_error() || updating_columns_only(scope) {
        return;
    }
    if !scope.model_struct().is_some_and(|m| m.has_column(UPDATED_AT)) {
        return;
    }
    let now = scope.now();
    if let Err(e) = scope.set_column(UPDATED_AT, now.clone()) {
        scope.err(e);
        return;
    }
    if let Some(mut attrs) = scope.get_as::<FieldMap>(UPDATE_ATTRS) {
        attrs.insert(UPDATED_AT, now);
        scope.instance_set(UPDATE_ATTRS, attrs);
    }
}

/// UPDATE the matched rows, from the update map when there is one and from
/// every writable column of the target value otherwise.
pub(crate) fn update(scope: &mut Scope<'_>) {
    if scope.has_error() {
        return;
    }
    if scope.db().blocks_global_update() && !scope.has_conditions() {
        scope.err(Error::MissingWhereClause);
        return;
    }

    scope.set_sql(String::new(), Vec::new());
    let mut sets = Vec::new();
    if let Some(attrs) = scope.get_as::<FieldMap>(UPDATE_ATTRS) {
        for (column, arg) in attrs.iter() {
            let placeholder = scope.add_arg(arg);
            sets.push(format!("{} = {}", scope.quote(column), placeholder));
        }
    } else if let Some(model) = scope.model_struct() {
        for field in model.fields {
            if field.primary_key || !scope.changeable_field(field) {
                continue;
            }
            let value = scope.value_of(field.column_name).unwrap_or(Value::Null);
            if field.column_name == CREATED_AT && value.is_zero() {
                continue;
            }
            let placeholder = scope.add_to_vars(value);
            sets.push(format!("{} = {}", scope.quote(field.column_name), placeholder));
        }
    }
    if sets.is_empty() {
        return;
    }

    let head = format!("UPDATE {} SET {}", scope.quoted_table_name(), sets.join(", "));
    let rest = scope.combined_conditions_sql();
    scope.raw(join_non_empty(&[head, rest]));
    scope.exec();
}

pub(crate) fn after_update(scope: &mut Scope<'_>) {
    if updating_columns_only(scope) {
        return;
    }
    scope.call_method(ModelEvent::AfterUpdate);
    scope.call_method(ModelEvent::AfterSave);
}

#[cfg(test)]
mod tests {
    use crate::testing::{Person, people_table};
    use sqlscope_core::Error;
    use sqlscope_query::FieldMap;

    #[test]
    fn save_writes_every_column() {
        let db = people_table();
        let mut ada = Person {
            name: "ada".into(),
            age: 36,
            ..Person::default()
        };
        db.create(&mut ada);
        ada.age = 37;
        ada.name = "ada l".into();
        let result = db.save(&mut ada);
        assert!(result.error().is_none());
        assert_eq!(result.rows_affected(), 1);

        let mut found = Person::default();
        db.first(&mut found);
        assert_eq!(found, ada);
    }

    #[test]
    fn unchanged_updates_skip_the_statement() {
        let db = people_table();
        let mut ada = Person {
            name: "ada".into(),
            age: 36,
            ..Person::default()
        };
        db.create(&mut ada);
        let result = db.model(&ada).updates(FieldMap::from([("age", 36)]));
        assert!(result.error().is_none());
        assert_eq!(result.rows_affected(), 0);

        let result = db.update_record(&mut ada, FieldMap::from([("age", 40)]));
        assert_eq!(result.rows_affected(), 1);
        assert_eq!(ada.age, 40);
    }

    #[test]
    fn blocked_global_update_needs_conditions() {
        let db = people_table().block_global_update(true);
        let result = db.table("people").update("age", 1);
        assert!(matches!(result.error(), Some(Error::MissingWhereClause)));

        let result = db.table("people").filter("age > ?", (0,)).update("age", 1);
        assert!(result.error().is_none());
    }
}
