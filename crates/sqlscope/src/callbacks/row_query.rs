//! The row query chain: run the SELECT and keep the raw rows.

use crate::scope::Scope;

pub(crate) fn row_query(scope: &mut Scope<'_>) {
    if scope.has_error() {
        return;
    }
    match scope.fetch_rows() {
        Ok(rows) => {
            scope.db.rows_affected = rows.len() as u64;
            scope.set_row_result(rows);
        }
        Err(e) => scope.err(e),
    }
}
