//! The default callback chains.
//!
//! | Chain | Steps |
//! |-------|-------|
//! | create | `begin_transaction`, `before_create`, `save_before_associations`, `update_time_stamp`, `create`, `save_after_associations`, `after_create`, `commit_or_rollback_transaction` |
//! | update | `assign_updating_attributes`, `begin_transaction`, `before_update`, `save_before_associations`, `update_time_stamp`, `update`, `save_after_associations`, `after_update`, `commit_or_rollback_transaction` |
//! | delete | `begin_transaction`, `before_delete`, `delete`, `after_delete`, `commit_or_rollback_transaction` |
//! | query | `query`, `preload`, `after_query` |
//! | row_query | `row_query` |
//!
//! Every name carries the `sqlscope:` prefix.

pub(crate) mod associations;
pub(crate) mod create;
pub(crate) mod delete;
pub(crate) mod preload;
pub(crate) mod query;
pub(crate) mod row_query;
pub(crate) mod transaction;
pub(crate) mod update;

use crate::callback::{CallbackKind, Callbacks};
use crate::scope::Scope;

type Step = (&'static str, fn(&mut Scope<'_>));

const CREATE: &[Step] = &[
    ("sqlscope:begin_transaction", transaction::begin_transaction),
    ("sqlscope:before_create", create::before_create),
    ("sqlscope:save_before_associations", associations::save_before_associations),
    ("sqlscope:update_time_stamp", create::update_time_stamp),
    ("sqlscope:create", create::create),
    ("sqlscope:save_after_associations", associations::save_after_associations),
    ("sqlscope:after_create", create::after_create),
    ("sqlscope:commit_or_rollback_transaction", transaction::commit_or_rollback_transaction),
];

const UPDATE: &[Step] = &[
    ("sqlscope:assign_updating_attributes", update::assign_updating_attributes),
    ("sqlscope:begin_transaction", transaction::begin_transaction),
    ("sqlscope:before_update", update::before_update),
    ("sqlscope:save_before_associations", associations::save_before_associations),
    ("sqlscope:update_time_stamp", update::update_time_stamp),
    ("sqlscope:update", update::update),
    ("sqlscope:save_after_associations", associations::save_after_associations),
    ("sqlscope:after_update", update::after_update),
    ("sqlscope:commit_or_rollback_transaction", transaction::commit_or_rollback_transaction),
];

const DELETE: &[Step] = &[
    ("sqlscope:begin_transaction", transaction::begin_transaction),
    ("sqlscope:before_delete", delete::before_delete),
    ("sqlscope:delete", delete::delete),
    ("sqlscope:after_delete", delete::after_delete),
    ("sqlscope:commit_or_rollback_transaction", transaction::commit_or_rollback_transaction),
];

const QUERY: &[Step] = &[
    ("sqlscope:query", query::query),
    ("sqlscope:preload", preload::preload),
    ("sqlscope:after_query", query::after_query),
];

const ROW_QUERY: &[Step] = &[("sqlscope:row_query", row_query::row_query)];

pub(crate) fn default_callbacks() -> Callbacks {
    let mut callbacks = Callbacks::empty();
    let chains = [
        (CallbackKind::Create, CREATE),
        (CallbackKind::Update, UPDATE),
        (CallbackKind::Delete, DELETE),
        (CallbackKind::Query, QUERY),
        (CallbackKind::RowQuery, ROW_QUERY),
    ];
    for (kind, steps) in chains {
        for (name, step) in steps {
            callbacks.builtin(kind, name, *step);
        }
    }
    callbacks
}
