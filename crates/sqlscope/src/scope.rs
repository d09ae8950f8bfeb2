//! Per-operation execution context.
//!
//! A [`Scope`] is built by every terminal operation on a [`Db`]. It owns a
//! clone of the handle, a snapshot of its [`Search`], the target value and
//! the SQL being built. Callback steps read and change it in turn; when the
//! chain finishes the scope's handle is returned to the caller.

use crate::db::{Db, Setting};
use crate::registry::ModelStruct;
use sqlscope_core::{
    Error, FieldInfo, ModelDescriptor, ModelEvent, ModelValue, Record, RecordSet, Result, Row,
    Value,
};
use sqlscope_query::{Arg, Condition, PrimaryCondition, RenderContext, Search, SqlBuilder};
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// `"ASC"` or `"DESC"`; appends a primary key order to a query.
pub const ORDER_BY_PRIMARY_KEY: &str = "sqlscope:order_by_primary_key";
/// The [`sqlscope_query::FieldMap`] passed to `updates`.
pub const UPDATE_INTERFACE: &str = "sqlscope:update_interface";
/// The part of the update map that actually changes the row.
pub const UPDATE_ATTRS: &str = "sqlscope:update_attrs";
/// Set by `update_column(s)`: skip hooks, timestamps and associations.
pub const UPDATE_COLUMN: &str = "sqlscope:update_column";
/// `false` disables saving associations on create and update.
pub const SAVE_ASSOCIATIONS: &str = "sqlscope:save_associations";
/// Holds the outer connection while a chain runs in its own transaction.
pub const STARTED_TRANSACTION: &str = "sqlscope:started_transaction";
/// Render `?` for every bound value, as in `query_expr`.
pub const SKIP_BINDVAR: &str = "sqlscope:skip_bindvar";

/// What an operation reads into or writes from.
pub(crate) enum Target<'a> {
    None,
    One(&'a mut dyn Record),
    Owned(ModelValue),
    Many(&'a mut dyn RecordSet),
}

impl Target<'_> {
    fn descriptor(&self) -> Option<ModelDescriptor> {
        match self {
            Target::None => None,
            Target::One(record) => Some(record.descriptor()),
            Target::Owned(value) => Some(value.descriptor()),
            Target::Many(set) => Some(set.descriptor()),
        }
    }
}

/// The context a callback chain runs against.
pub struct Scope<'a> {
    pub(crate) db: Db,
    search: Search,
    target: Target<'a>,
    model: Option<Arc<ModelStruct>>,
    sql: String,
    sql_vars: Vec<Value>,
    instance: HashMap<String, Setting>,
    skip_left: bool,
    row_result: Option<Vec<Row>>,
    pub(crate) wrap_count: bool,
}

impl<'a> Scope<'a> {
    /// A scope over `target`; with no target the handle's model value is used.
    pub(crate) fn new(db: Db, target: Target<'a>) -> Self {
        let target = match target {
            Target::None => db.value.clone().map_or(Target::None, Target::Owned),
            other => other,
        };
        let model = target.descriptor().map(|d| db.model_struct(&d));
        let search = db.search.clone();
        Self {
            db,
            search,
            target,
            model,
            sql: String::new(),
            sql_vars: Vec::new(),
            instance: HashMap::new(),
            skip_left: false,
            row_result: None,
            wrap_count: false,
        }
    }

    /// Use another model's metadata, e.g. the handle's model when scanning
    /// into an unrelated destination type.
    pub(crate) fn with_model(mut self, model: Option<Arc<ModelStruct>>) -> Self {
        if model.is_some() {
            self.model = model;
        }
        self
    }

    /// Run every step of the chain's current snapshot.
    pub(crate) fn call_callbacks(&mut self, kind: crate::callback::CallbackKind) -> &mut Self {
        let steps = self.db.parent.callbacks().chain(kind).compiled();
        for step in steps.iter() {
            step.call(self);
            if self.skip_left {
                break;
            }
        }
        self
    }

    /// Finish the operation and hand back its handle. An owned target
    /// becomes the handle's model value again.
    pub(crate) fn into_db(mut self) -> Db {
        // A skipped chain never leaves the handle inside its own transaction.
        if self.instance.contains_key(STARTED_TRANSACTION) {
            crate::callbacks::transaction::rollback_started(&mut self);
        }
        let Scope { mut db, target, .. } = self;
        if let Target::Owned(value) = target {
            db.value = Some(value);
        }
        db
    }

    pub(crate) fn take_row_result(&mut self) -> Option<Vec<Row>> {
        self.row_result.take()
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    pub fn search(&self) -> &Search {
        &self.search
    }

    pub fn search_mut(&mut self) -> &mut Search {
        &mut self.search
    }

    /// Resolved metadata of the target's model.
    pub fn model_struct(&self) -> Option<Arc<ModelStruct>> {
        self.model.clone()
    }

    /// The table override, else the model's table.
    pub fn table_name(&self) -> String {
        if let Some(table) = self.search.table_name() {
            return table.to_string();
        }
        self.model
            .as_ref()
            .map(|m| m.table_name.clone())
            .unwrap_or_default()
    }

    pub fn quoted_table_name(&self) -> String {
        self.render_context().quoted_table()
    }

    pub fn quote(&self, name: &str) -> String {
        self.db.dialect.quote_identifier(name)
    }

    pub fn primary_key(&self) -> Option<&'static str> {
        self.model.as_ref().and_then(|m| m.primary_key())
    }

    pub fn primary_key_value(&self) -> Option<Value> {
        self.primary_key().and_then(|pk| self.value_of(pk))
    }

    pub fn primary_key_zero(&self) -> bool {
        self.primary_key_value().is_none_or(|v| v.is_zero())
    }

    /// A column of the single target value.
    pub fn value_of(&self, column: &str) -> Option<Value> {
        match &self.target {
            Target::One(record) => record.value_of(column),
            Target::Owned(value) => value.get(column).cloned(),
            Target::None | Target::Many(_) => None,
        }
    }

    /// Assign a column, by column or field name, on every target value.
    /// Returns whether any value took it.
    pub fn set_column(&mut self, name: &str, value: Value) -> Result<bool> {
        let column = self
            .model
            .as_ref()
            .and_then(|m| m.column_for(name))
            .unwrap_or(name);
        let mut assigned = false;
        for record in self.records_mut() {
            assigned |= record.set_column(column, value.clone())?;
        }
        Ok(assigned)
    }

    /// Run a lifecycle hook on every target value; a failure is recorded.
    pub fn call_method(&mut self, event: ModelEvent) {
        if self.has_error() {
            return;
        }
        let mut failures = Vec::new();
        for record in self.records_mut() {
            if let Err(e) = record.run_event(event) {
                failures.push(e);
            }
        }
        for e in failures {
            self.err(e);
        }
    }

    pub(crate) fn records_mut(&mut self) -> Vec<&mut dyn Record> {
        match &mut self.target {
            Target::None => Vec::new(),
            Target::One(record) => {
                let record: &mut dyn Record = &mut **record;
                vec![record]
            }
            Target::Owned(value) => {
                let record: &mut dyn Record = value;
                vec![record]
            }
            Target::Many(set) => set.records_mut(),
        }
    }

    pub(crate) fn target_mut(&mut self) -> &mut Target<'a> {
        &mut self.target
    }

    pub fn has_error(&self) -> bool {
        self.db.error.is_some()
    }

    /// Record an error on the scope's handle.
    pub fn err(&mut self, error: Error) {
        self.db.add_error(error);
    }

    /// Stop the chain after the current step.
    pub fn skip_left(&mut self) {
        self.skip_left = true;
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn sql_vars(&self) -> &[Value] {
        &self.sql_vars
    }

    pub fn set_sql(&mut self, sql: impl Into<String>, vars: Vec<Value>) {
        self.sql = sql.into();
        self.sql_vars = vars;
    }

    /// Replace the statement text, keeping the bound values.
    pub fn raw(&mut self, sql: impl Into<String>) -> &mut Self {
        self.sql = sql.into();
        self
    }

    /// Bind an argument; an expression is inlined with its own arguments.
    pub fn add_arg(&mut self, arg: &Arg) -> String {
        let ctx = self.render_context();
        SqlBuilder::new(&ctx, &mut self.sql_vars).add_arg(arg)
    }

    /// Bind a value for the statement being built and return its placeholder.
    pub fn add_to_vars(&mut self, value: Value) -> String {
        self.sql_vars.push(value);
        if self.skips_bindvar() {
            "?".to_string()
        } else {
            self.db.dialect.placeholder(self.sql_vars.len())
        }
    }

    /// Rows affected by the last statement.
    pub fn rows_affected(&self) -> u64 {
        self.db.rows_affected
    }

    pub fn row_result(&self) -> Option<&[Row]> {
        self.row_result.as_deref()
    }

    pub(crate) fn set_row_result(&mut self, rows: Vec<Row>) {
        self.row_result = Some(rows);
    }

    /// A scope setting, falling back to the handle's settings.
    pub fn get(&self, name: &str) -> Option<Setting> {
        self.instance
            .get(name)
            .cloned()
            .or_else(|| self.db.get(name))
    }

    /// Typed [`Scope::get`].
    pub fn get_as<T: Any + Clone>(&self, name: &str) -> Option<T> {
        self.get(name).and_then(|v| v.downcast_ref::<T>().cloned())
    }

    /// A setting that lives only as long as this scope.
    pub fn instance_set(&mut self, name: &str, value: impl Any + Send + Sync) -> &mut Self {
        self.instance.insert(name.to_string(), Arc::new(value));
        self
    }

    pub fn instance_get(&self, name: &str) -> Option<Setting> {
        self.instance.get(name).cloned()
    }

    pub(crate) fn instance_take(&mut self, name: &str) -> Option<Setting> {
        self.instance.remove(name)
    }

    /// Set a setting on the scope's handle.
    pub fn set(&mut self, name: &str, value: impl Any + Send + Sync) -> &mut Self {
        self.db.instant_set(name, value);
        self
    }

    /// Whether the value or the search restricts which rows are touched.
    pub fn has_conditions(&self) -> bool {
        !self.primary_key_zero() || self.search.has_conditions()
    }

    fn skips_bindvar(&self) -> bool {
        self.instance.contains_key(SKIP_BINDVAR)
    }

    pub fn render_context(&self) -> RenderContext {
        let mut ctx = RenderContext::new(self.db.dialect, self.table_name())
            .skip_bindvar(self.skips_bindvar());
        if let Some(pk) = self.primary_key() {
            ctx = ctx.primary_key(pk);
        }
        ctx
    }

    /// Conditions ahead of the user's where clause.
    pub fn primary_conditions(&self) -> Vec<PrimaryCondition> {
        let mut out = Vec::new();
        let Some(model) = &self.model else {
            return out;
        };
        if model.soft_delete && !self.search.is_unscoped() {
            out.push(PrimaryCondition::NotDeleted(
                crate::registry::DELETED_AT.to_string(),
            ));
        }
        if let (Some(pk), Some(value)) = (model.primary_key(), self.primary_key_value()) {
            if !value.is_zero() {
                out.push(PrimaryCondition::KeyEquals(pk.to_string(), value));
            }
        }
        out
    }

    /// Render everything after `FROM`, appending to the bound values.
    pub fn combined_conditions_sql(&mut self) -> String {
        let ctx = self.render_context();
        let primary = self.primary_conditions();
        let mut builder = SqlBuilder::new(&ctx, &mut self.sql_vars);
        builder.combined_conditions(&self.search, &primary)
    }

    /// Render the SELECT statement into [`Scope::sql`].
    pub fn prepare_query_sql(&mut self) -> &mut Self {
        let ctx = self.render_context();
        let primary = self.primary_conditions();
        let mut vars = Vec::new();
        let sql = SqlBuilder::new(&ctx, &mut vars).query_sql(&self.search, &primary);
        self.sql = if self.wrap_count {
            format!("SELECT count(*) FROM ({}) AS count_table", sql)
        } else {
            sql
        };
        self.sql_vars = vars;
        self
    }

    /// Whether a column may be written, honoring select and omit lists.
    pub fn changeable_field(&self, field: &FieldInfo) -> bool {
        let selected = self.selected_columns();
        if !selected.is_empty() {
            return selected
                .iter()
                .any(|s| s == field.column_name || s == field.name);
        }
        !self
            .search
            .omits()
            .iter()
            .any(|o| o == field.column_name || o == field.name)
    }

    fn selected_columns(&self) -> Vec<String> {
        match self.search.selects() {
            Some(Condition::Raw { sql, args }) if args.is_empty() && !sql.contains('(') => sql
                .split(',')
                .map(|s| s.trim().trim_matches(['"', '`']).to_string())
                .filter(|s| !s.is_empty() && !s.ends_with('*'))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Execute [`Scope::sql`] unless an error is already recorded.
    pub fn exec(&mut self) -> &mut Self {
        if self.has_error() {
            return self;
        }
        let start = Instant::now();
        match self.db.conn.execute(&self.sql, &self.sql_vars) {
            Ok(rows) => {
                self.db.rows_affected = rows;
                self.db.trace_sql(&self.sql, &self.sql_vars, start, rows);
            }
            Err(e) => self.err(e),
        }
        self
    }

    /// Execute [`Scope::sql`] as an INSERT and return the new row id.
    pub(crate) fn exec_insert(&mut self) -> Option<i64> {
        if self.has_error() {
            return None;
        }
        let start = Instant::now();
        match self.db.conn.insert(&self.sql, &self.sql_vars) {
            Ok(id) => {
                self.db.rows_affected = 1;
                self.db.trace_sql(&self.sql, &self.sql_vars, start, 1);
                Some(id)
            }
            Err(e) => {
                self.err(e);
                None
            }
        }
    }

    /// Run the SELECT for this scope.
    pub fn fetch_rows(&mut self) -> Result<Vec<Row>> {
        self.prepare_query_sql();
        let start = Instant::now();
        let rows = self.db.conn.query(&self.sql, &self.sql_vars)?;
        self.db
            .trace_sql(&self.sql, &self.sql_vars, start, rows.len() as u64);
        Ok(rows)
    }

    /// Current time, as stored in timestamp columns.
    pub fn now(&self) -> Value {
        Value::Timestamp((self.db.parent.now)())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Person, memory_db};
    use sqlscope_core::Model;
    use sqlscope_query::FieldMap;

    #[test]
    fn where_clause_includes_primary_conditions() {
        let db = memory_db();
        let mut person = Person {
            id: 7,
            ..Person::default()
        };
        let handle = db.filter("age > ?", (3,));
        let mut scope = Scope::new(handle, Target::One(&mut person));
        let sql = scope.combined_conditions_sql();
        assert_eq!(
            sql,
            r#"WHERE "people"."deleted_at" IS NULL AND "people"."id" = ?1 AND ((age > ?2))"#
        );
        assert_eq!(scope.sql_vars(), &[Value::BigInt(7), Value::Int(3)]);
    }

    #[test]
    fn unscoped_drops_soft_delete_condition() {
        let db = memory_db();
        let mut person = Person::default();
        let mut scope = Scope::new(db.unscoped(), Target::One(&mut person));
        assert!(scope.primary_conditions().is_empty());
        assert!(!scope.has_conditions());
        scope.prepare_query_sql();
        assert_eq!(scope.sql(), r#"SELECT "people".* FROM "people""#);
    }

    #[test]
    fn instance_settings_shadow_handle_settings() {
        let db = memory_db().set("answer", 1_i64);
        let mut scope = Scope::new(db, Target::None);
        assert_eq!(scope.get_as::<i64>("answer"), Some(1));
        scope.instance_set("answer", 2_i64);
        assert_eq!(scope.get_as::<i64>("answer"), Some(2));
        assert_eq!(scope.db().get_as::<i64>("answer"), Some(1));
    }

    #[test]
    fn select_and_omit_limit_changeable_fields() {
        let db = memory_db();
        let name = Person::fields()
            .iter()
            .find(|f| f.column_name == "name")
            .unwrap();
        let age = Person::fields()
            .iter()
            .find(|f| f.column_name == "age")
            .unwrap();

        let scope = Scope::new(db.select("name", ()), Target::None);
        assert!(scope.changeable_field(name));
        assert!(!scope.changeable_field(age));

        let scope = Scope::new(db.omit(["name"]), Target::None);
        assert!(!scope.changeable_field(name));
        assert!(scope.changeable_field(age));
    }

    #[test]
    fn set_column_accepts_field_names() {
        let db = memory_db();
        let mut person = Person::default();
        let mut scope = Scope::new(db, Target::One(&mut person));
        assert!(scope.set_column("name", Value::from("ada")).unwrap());
        assert!(!scope.set_column("nope", Value::from(1)).unwrap());
        drop(scope);
        assert_eq!(person.name, "ada");
    }

    #[test]
    fn handle_value_becomes_owned_target() {
        let db = memory_db();
        let person = Person {
            id: 3,
            ..Person::default()
        };
        let scope = Scope::new(db.model(&person), Target::None);
        assert_eq!(scope.table_name(), "people");
        assert_eq!(scope.primary_key_value(), Some(Value::BigInt(3)));
        let scope = Scope::new(db.table("folks").attrs(FieldMap::new()), Target::None);
        assert_eq!(scope.table_name(), "folks");
        assert!(scope.model_struct().is_none());
    }
}
