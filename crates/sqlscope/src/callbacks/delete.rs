//! Steps of the delete chain.

use crate::registry::DELETED_AT;
use crate::scope::Scope;
use sqlscope_core::{Error, ModelEvent};
use sqlscope_query::join_non_empty;

pub(crate) fn before_delete(scope: &mut Scope<'_>) {
    scope.call_method(ModelEvent::BeforeDelete);
}

/// DELETE the matched rows, or stamp `deleted_at` on models that soft
/// delete, unless the search is unscoped.
pub(crate) fn delete(scope: &mut Scope<'_>) {
    if scope.has_error() {
        return;
    }
    if scope.db().blocks_global_update() && !scope.has_conditions() {
        scope.err(Error::MissingWhereClause);
        return;
    }

    let soft =
        scope.model_struct().is_some_and(|m| m.soft_delete) && !scope.search().is_unscoped();
    scope.set_sql(String::new(), Vec::new());
    let head = if soft {
        let placeholder = scope.add_to_vars(scope.now());
        format!(
            "UPDATE {} SET {} = {}",
            scope.quoted_table_name(),
            scope.quote(DELETED_AT),
            placeholder
        )
    } else {
        format!("DELETE FROM {}", scope.quoted_table_name())
    };
    let rest = scope.combined_conditions_sql();
    scope.raw(join_non_empty(&[head, rest]));
    scope.exec();
}

pub(crate) fn after_delete(scope: &mut Scope<'_>) {
    scope.call_method(ModelEvent::AfterDelete);
}

#[cfg(test)]
mod tests {
    use crate::testing::{Person, people_table};
    use sqlscope_core::Error;

    #[test]
    fn soft_delete_hides_rows_until_unscoped() {
        let db = people_table();
        let mut ada = Person {
            name: "ada".into(),
            ..Person::default()
        };
        db.create(&mut ada);
        let result = db.delete(&mut ada);
        assert!(result.error().is_none());
        assert_eq!(result.rows_affected(), 1);

        let mut found = Person::default();
        assert!(db.first(&mut found).record_not_found());
        let mut found = Person::default();
        assert!(db.unscoped().first(&mut found).error().is_none());
        assert!(found.deleted_at.is_some());

        assert_eq!(db.unscoped().delete(&mut found).rows_affected(), 1);
        let mut gone = Person::default();
        assert!(db.unscoped().first(&mut gone).record_not_found());
    }

    #[test]
    fn blocked_delete_without_key_or_conditions() {
        let db = people_table().block_global_update(true);
        let mut nobody = Person::default();
        let result = db.delete(&mut nobody);
        assert!(matches!(result.error(), Some(Error::MissingWhereClause)));
    }
}
