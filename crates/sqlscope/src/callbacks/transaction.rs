//! Transaction steps shared by the create, update and delete chains.

use crate::db::SqlCommon;
use crate::scope::{STARTED_TRANSACTION, Scope};

/// Run the rest of the chain in a transaction unless the handle is already
/// in one. A connection that cannot start one runs the chain without.
pub(crate) fn begin_transaction(scope: &mut Scope<'_>) {
    if scope.db.conn.is_transaction() {
        return;
    }
    match scope.db.conn.begin() {
        Ok(tx) => {
            let outer = std::mem::replace(&mut scope.db.conn, SqlCommon::Transaction(tx));
            scope.instance_set(STARTED_TRANSACTION, outer);
        }
        Err(e) => {
            tracing::debug!(target: "sqlscope", error = %e, "running without transaction");
        }
    }
}

/// Commit, or roll back when the scope has an error. Only a transaction
/// started by [`begin_transaction`] is finished here.
pub(crate) fn commit_or_rollback_transaction(scope: &mut Scope<'_>) {
    let Some(outer) = take_outer(scope) else {
        return;
    };
    let finished = std::mem::replace(&mut scope.db.conn, outer);
    if let SqlCommon::Transaction(tx) = finished {
        if scope.has_error() {
            if let Err(e) = tx.rollback() {
                tracing::warn!(target: "sqlscope", error = %e, "rollback failed");
            }
        } else if let Err(e) = tx.commit() {
            scope.err(e);
        }
    }
}

/// Roll back a transaction left open by a chain that stopped early.
pub(crate) fn rollback_started(scope: &mut Scope<'_>) {
    let Some(outer) = take_outer(scope) else {
        return;
    };
    if let SqlCommon::Transaction(tx) = std::mem::replace(&mut scope.db.conn, outer) {
        if let Err(e) = tx.rollback() {
            tracing::warn!(target: "sqlscope", error = %e, "rollback failed");
        }
    }
}

fn take_outer(scope: &mut Scope<'_>) -> Option<SqlCommon> {
    scope
        .instance_take(STARTED_TRANSACTION)
        .and_then(|v| v.downcast_ref::<SqlCommon>().cloned())
}
