//! Steps of the query chain.

use crate::scope::{ORDER_BY_PRIMARY_KEY, Scope, Target};
use sqlscope_core::{Error, ModelEvent, Record, Result};
use sqlscope_query::Condition;

/// SELECT into the target: every row for a collection, the first row for a
/// single value. A single value with no row is a record-not-found error.
pub(crate) fn query(scope: &mut Scope<'_>) {
    if scope.has_error() {
        return;
    }
    if let (Some(direction), Some(pk)) = (
        scope.get_as::<&'static str>(ORDER_BY_PRIMARY_KEY),
        scope.primary_key(),
    ) {
        let order = format!(
            "{}.{} {}",
            scope.quoted_table_name(),
            scope.quote(pk),
            direction
        );
        scope.search_mut().order(Condition::raw(order), false);
    }

    let rows = match scope.fetch_rows() {
        Ok(rows) => rows,
        Err(e) => {
            scope.err(e);
            return;
        }
    };
    scope.db.rows_affected = rows.len() as u64;

    let loaded: Result<()> = match scope.target_mut() {
        Target::Many(set) => {
            set.clear();
            rows.iter().try_for_each(|row| set.push_row(row))
        }
        Target::One(record) => match rows.first() {
            Some(row) => record.load_row(row),
            None => Err(Error::RecordNotFound),
        },
        Target::Owned(value) => match rows.first() {
            Some(row) => value.load_row(row),
            None => Err(Error::RecordNotFound),
        },
        Target::None => Ok(()),
    };
    if let Err(e) = loaded {
        scope.err(e);
    }
}

pub(crate) fn after_query(scope: &mut Scope<'_>) {
    scope.call_method(ModelEvent::AfterFind);
}

#[cfg(test)]
mod tests {
    use crate::testing::{Person, people_table};

    fn seed(db: &crate::Db) {
        for (name, age) in [("ada", 36), ("bob", 20), ("cy", 51)] {
            let mut p = Person {
                name: name.into(),
                age,
                ..Person::default()
            };
            db.create(&mut p);
        }
    }

    #[test]
    fn first_and_last_order_by_key() {
        let db = people_table();
        seed(&db);
        let mut first = Person::default();
        let mut last = Person::default();
        db.first(&mut first);
        db.last(&mut last);
        assert_eq!(first.name, "ada");
        assert_eq!(last.name, "cy");
    }

    #[test]
    fn find_replaces_the_collection() {
        let db = people_table();
        seed(&db);
        let mut people = vec![Person::default()];
        let result = db.filter("age > ?", (30,)).order("age desc").find(&mut people);
        assert!(result.error().is_none());
        assert_eq!(result.rows_affected(), 2);
        let names: Vec<_> = people.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["cy", "ada"]);
    }

    #[test]
    fn missing_single_row_is_not_found() {
        let db = people_table();
        let mut nobody = Person::default();
        let result = db.filter("name = ?", ("zed",)).first(&mut nobody);
        assert!(result.record_not_found());

        let mut none: Vec<Person> = Vec::new();
        let result = db.filter("name = ?", ("zed",)).find(&mut none);
        assert!(result.error().is_none());
        assert!(none.is_empty());
    }
}
