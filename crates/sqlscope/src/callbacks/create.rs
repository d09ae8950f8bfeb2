//! Steps of the create chain.

use crate::registry::{CREATED_AT, UPDATED_AT};
use crate::scope::Scope;
use sqlscope_core::{Error, ModelEvent, Row, Value};
use sqlscope_query::join_non_empty;

pub(crate) fn before_create(scope: &mut Scope<'_>) {
    scope.call_method(ModelEvent::BeforeSave);
    scope.call_method(ModelEvent::BeforeCreate);
}

/// Fill blank `created_at` and `updated_at` columns.
pub(crate) fn update_time_stamp(scope: &mut Scope<'_>) {
    if scope.has_error() {
        return;
    }
    let Some(model) = scope.model_struct() else {
        return;
    };
    let now = scope.now();
    for column in [CREATED_AT, UPDATED_AT] {
        if !model.has_column(column) {
            continue;
        }
        if scope.value_of(column).is_none_or(|v| v.is_zero()) {
            if let Err(e) = scope.set_column(column, now.clone()) {
                scope.err(e);
            }
        }
    }
}

/// INSERT the target value.
///
/// A zero auto-increment key is left to the database and read back. Blank
/// columns that have a database default are left out and reloaded after
/// the insert.
pub(crate) fn create(scope: &mut Scope<'_>) {
    if scope.has_error() {
        return;
    }
    let Some(model) = scope.model_struct() else {
        scope.err(Error::Custom("create needs a model value".into()));
        return;
    };

    scope.set_sql(String::new(), Vec::new());
    let mut columns = Vec::new();
    let mut placeholders = Vec::new();
    let mut defaulted = Vec::new();
    let mut generated_key = None;
    for field in model.fields {
        if !scope.changeable_field(field) {
            continue;
        }
        let value = scope.value_of(field.column_name).unwrap_or(Value::Null);
        if field.primary_key && field.auto_increment && value.is_zero() {
            generated_key = Some(field.column_name);
            continue;
        }
        if value.is_zero() && field.has_default_value() {
            defaulted.push(field.column_name);
            continue;
        }
        columns.push(scope.quote(field.column_name));
        placeholders.push(scope.add_to_vars(value));
    }

    let table = scope.quoted_table_name();
    let sql = if columns.is_empty() {
        format!("INSERT INTO {} DEFAULT VALUES", table)
    } else {
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table,
            columns.join(", "),
            placeholders.join(", ")
        )
    };
    scope.raw(sql);

    match generated_key {
        Some(key) => {
            if let Some(id) = scope.exec_insert() {
                if let Err(e) = scope.set_column(key, Value::BigInt(id)) {
                    scope.err(e);
                }
            }
        }
        None => {
            scope.exec();
        }
    }

    if !defaulted.is_empty() && !scope.has_error() {
        reload_defaults(scope, &defaulted);
    }
}

/// Read back columns the database filled in.
fn reload_defaults(scope: &mut Scope<'_>, columns: &[&'static str]) {
    let (Some(pk), Some(key)) = (scope.primary_key(), scope.primary_key_value()) else {
        return;
    };
    if key.is_zero() {
        return;
    }
    let select = columns
        .iter()
        .map(|c| scope.quote(c))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = join_non_empty(&[
        format!("SELECT {} FROM {}", select, scope.quoted_table_name()),
        format!(
            "WHERE {} = {}",
            scope.quote(pk),
            scope.db().dialect().placeholder(1)
        ),
    ]);
    let loaded: Result<Vec<Row>, Error> = scope.db().query_logged(&sql, &[key]);
    match loaded {
        Ok(rows) => {
            let Some(row) = rows.first() else {
                return;
            };
            let mut failures = Vec::new();
            for record in scope.records_mut() {
                if let Err(e) = record.load_row(row) {
                    failures.push(e);
                }
            }
            for e in failures {
                scope.err(e);
            }
        }
        Err(e) => scope.err(e),
    }
}

pub(crate) fn after_create(scope: &mut Scope<'_>) {
    scope.call_method(ModelEvent::AfterCreate);
    scope.call_method(ModelEvent::AfterSave);
}

#[cfg(test)]
mod tests {
    use crate::testing::{Person, memory_db};

    #[test]
    fn insert_assigns_generated_key() {
        let db = memory_db();
        db.exec(
            "CREATE TABLE people (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT, age INTEGER, deleted_at INTEGER)",
            (),
        );
        let mut ada = Person {
            name: "ada".into(),
            age: 36,
            ..Person::default()
        };
        let result = db.create(&mut ada);
        assert!(result.error().is_none(), "{:?}", result.error());
        assert_eq!(result.rows_affected(), 1);
        assert_eq!(ada.id, 1);

        let mut bob = Person {
            name: "bob".into(),
            ..Person::default()
        };
        db.create(&mut bob);
        assert_eq!(bob.id, 2);
    }

    #[test]
    fn omitted_columns_are_not_written() {
        let db = memory_db();
        db.exec(
            "CREATE TABLE people (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT, age INTEGER DEFAULT 9, deleted_at INTEGER)",
            (),
        );
        let mut ada = Person {
            name: "ada".into(),
            age: 36,
            ..Person::default()
        };
        db.omit(["age"]).create(&mut ada);
        let mut found = Person::default();
        db.first(&mut found);
        assert_eq!(found.name, "ada");
        assert_eq!(found.age, 9);
    }
}
