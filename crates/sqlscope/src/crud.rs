//! Terminal operations: the calls that build a [`Scope`], run a callback
//! chain and hand back the resulting handle.

use crate::callback::CallbackKind;
use crate::db::Db;
use crate::scope::{
    ORDER_BY_PRIMARY_KEY, SAVE_ASSOCIATIONS, SKIP_BINDVAR, Scope, Target, UPDATE_COLUMN,
    UPDATE_INTERFACE,
};
use regex::Regex;
use sqlscope_core::{ConfigErrorKind, Error, FromValue, Model, Record, Result, Row, Value};
use sqlscope_query::{Arg, ClauseKind, Condition, FieldMap, IntoArgs, SqlBuilder, SqlExpr};
use std::any::TypeId;
use std::sync::OnceLock;

static COUNT_SELECT: OnceLock<Option<Regex>> = OnceLock::new();

/// Whether a select list is already a `count(...)`.
fn is_count_select(sql: &str) -> bool {
    COUNT_SELECT
        .get_or_init(|| Regex::new(r"(?i)^\s*count\s*\(.*\)\s*$").ok())
        .as_ref()
        .is_some_and(|re| re.is_match(sql))
}

impl Db {
    // --- queries ---

    /// The first row ordered by primary key.
    ///
    /// A non-zero key on `out` is part of the condition. Nothing found is a
    /// record-not-found error.
    pub fn first<M: Model>(&self, out: &mut M) -> Db {
        self.query_one(out, Some("ASC"))
    }

    /// The first row in database order.
    pub fn take<M: Model>(&self, out: &mut M) -> Db {
        self.query_one(out, None)
    }

    /// The last row ordered by primary key.
    pub fn last<M: Model>(&self, out: &mut M) -> Db {
        self.query_one(out, Some("DESC"))
    }

    pub(crate) fn first_record(&self, out: &mut dyn Record) -> Db {
        self.query_one(out, Some("ASC"))
    }

    fn query_one(&self, out: &mut dyn Record, direction: Option<&'static str>) -> Db {
        let mut scope = Scope::new(self.clone(), Target::One(out));
        scope.search_mut().limit(1);
        if let Some(direction) = direction {
            scope.instance_set(ORDER_BY_PRIMARY_KEY, direction);
        }
        scope.call_callbacks(CallbackKind::Query);
        scope.into_db()
    }

    /// Every matching row. An empty result is not an error.
    pub fn find<M: Model>(&self, out: &mut Vec<M>) -> Db {
        let mut scope = Scope::new(self.clone(), Target::Many(out));
        scope.call_callbacks(CallbackKind::Query);
        scope.into_db()
    }

    /// Like [`Db::find`], reading the table and conditions of the handle's
    /// model into another type.
    pub fn scan<M: Model>(&self, out: &mut Vec<M>) -> Db {
        let model = self.value.as_ref().map(|v| self.model_struct(&v.descriptor()));
        let mut scope = Scope::new(self.clone(), Target::Many(out)).with_model(model);
        scope.call_callbacks(CallbackKind::Query);
        scope.into_db()
    }

    /// [`Db::scan`] into a single value.
    pub fn scan_one<M: Model>(&self, out: &mut M) -> Db {
        let model = self.value.as_ref().map(|v| self.model_struct(&v.descriptor()));
        let mut scope = Scope::new(self.clone(), Target::One(out)).with_model(model);
        scope.search_mut().limit(1);
        scope.call_callbacks(CallbackKind::Query);
        scope.into_db()
    }

    /// The raw result rows of the query.
    pub fn rows(&self) -> Result<Vec<Row>> {
        let mut scope = Scope::new(self.clone(), Target::None);
        scope.call_callbacks(CallbackKind::RowQuery);
        let rows = scope.take_row_result();
        let db = scope.into_db();
        match db.error {
            Some(e) => Err(e),
            None => Ok(rows.unwrap_or_default()),
        }
    }

    /// The first raw result row.
    pub fn row(&self) -> Result<Row> {
        self.rows()?.into_iter().next().ok_or(Error::RecordNotFound)
    }

    /// Map rows fetched with [`Db::rows`] onto a model, appending to `out`.
    pub fn scan_rows<M: Model>(&self, rows: &[Row], out: &mut Vec<M>) -> Result<()> {
        out.reserve(rows.len());
        for row in rows {
            out.push(M::from_row(row)?);
        }
        Ok(())
    }

    /// One column of every matching row.
    ///
    /// ```ignore
    /// let mut names: Vec<String> = Vec::new();
    /// db.model_type::<User>().pluck("name", &mut names);
    /// ```
    pub fn pluck<T: FromValue>(&self, column: &str, out: &mut Vec<T>) -> Db {
        let mut scope = Scope::new(self.clone(), Target::None);
        if scope.search().selects().is_none() {
            scope.search_mut().select(Condition::raw(column));
        }
        scope.call_callbacks(CallbackKind::RowQuery);
        let rows = scope.take_row_result();
        let mut db = scope.into_db();
        if let Some(rows) = rows {
            out.clear();
            for row in &rows {
                let value = row.get(0).cloned().unwrap_or(Value::Null);
                match T::from_value(&value) {
                    Ok(v) => out.push(v),
                    Err(e) => {
                        db.add_error(e);
                        break;
                    }
                }
            }
        }
        db
    }

    /// The number of matching rows; grouped queries count their groups.
    pub fn count(&self, out: &mut i64) -> Db {
        let mut scope = Scope::new(self.clone(), Target::None);
        let counting = matches!(
            scope.search().selects(),
            Some(Condition::Raw { sql, .. }) if is_count_select(sql)
        );
        if !counting {
            if scope.search().group_by().is_some() {
                scope.search_mut().select(Condition::raw("1"));
                scope.wrap_count = true;
            } else {
                scope.search_mut().select(Condition::raw("count(*)"));
            }
        }
        scope.search_mut().set_ignore_order(true);
        scope.call_callbacks(CallbackKind::RowQuery);
        let rows = scope.take_row_result();
        let mut db = scope.into_db();
        if let Some(value) = rows.as_ref().and_then(|r| r.first()).and_then(|r| r.get(0)) {
            match i64::from_value(value) {
                Ok(n) => *out = n,
                Err(e) => db.add_error(e),
            }
        }
        db
    }

    // --- find or init / create ---

    /// Find the first match, or fill `out` from the where conditions and
    /// [`Db::attrs`] without touching the database. [`Db::assign`] values are
    /// applied either way.
    pub fn first_or_init<M: Model>(&self, out: &mut M) -> Db {
        self.first_or_init_record(out)
    }

    /// Find the first match, or create it from the where conditions and
    /// [`Db::attrs`]. When found, [`Db::assign`] values are saved.
    pub fn first_or_create<M: Model>(&self, out: &mut M) -> Db {
        self.first_or_create_record(out)
    }

    fn first_or_init_record(&self, out: &mut dyn Record) -> Db {
        let found = self.first_record(out);
        if found.error.is_some() {
            if !found.record_not_found() {
                return found;
            }
            let mut scope = Scope::new(self.clone(), Target::One(out));
            initialize(&mut scope, true);
            return scope.into_db();
        }
        if !self.search.assign_attrs().is_empty() {
            let mut scope = Scope::new(found, Target::One(out));
            initialize(&mut scope, false);
            return scope.into_db();
        }
        found
    }

    pub(crate) fn first_or_create_record(&self, out: &mut dyn Record) -> Db {
        let found = self.first_record(out);
        if found.error.is_some() {
            if !found.record_not_found() {
                return found;
            }
            let mut scope = Scope::new(self.clone(), Target::One(out));
            initialize(&mut scope, true);
            if !scope.has_error() {
                scope.call_callbacks(CallbackKind::Create);
            }
            return scope.into_db();
        }
        let assign = self.search.assign_attrs().clone();
        if !assign.is_empty() {
            let mut scope = Scope::new(found, Target::One(out));
            scope.instance_set(UPDATE_INTERFACE, assign);
            scope.call_callbacks(CallbackKind::Update);
            return scope.into_db();
        }
        found
    }

    // --- writes ---

    /// INSERT `value`, assigning its generated key.
    pub fn create<M: Model>(&self, value: &mut M) -> Db {
        let mut scope = Scope::new(self.clone(), Target::One(value));
        scope.call_callbacks(CallbackKind::Create);
        scope.into_db()
    }

    /// UPDATE every column of `value`, or INSERT it when its key is zero.
    ///
    /// An UPDATE that matches no row falls back to creating the row with
    /// its current key.
    pub fn save<M: Model>(&self, value: &mut M) -> Db {
        self.save_record(value)
    }

    pub(crate) fn save_record(&self, value: &mut dyn Record) -> Db {
        let mut scope = Scope::new(self.clone(), Target::One(&mut *value));
        if scope.primary_key_zero() {
            scope.call_callbacks(CallbackKind::Create);
            return scope.into_db();
        }
        scope.call_callbacks(CallbackKind::Update);
        let table = scope.table_name();
        let db = scope.into_db();
        if db.error.is_none() && db.rows_affected == 0 {
            return self.new().table(table).first_or_create_record(value);
        }
        db
    }

    /// DELETE `value`, or the matching rows when its key is zero. Models
    /// with `deleted_at` are soft deleted unless the handle is unscoped.
    pub fn delete<M: Model>(&self, value: &mut M) -> Db {
        let mut scope = Scope::new(self.clone(), Target::One(value));
        scope.call_callbacks(CallbackKind::Delete);
        scope.into_db()
    }

    /// Update one column of the handle's model value or table.
    pub fn update(&self, column: &str, value: impl Into<Arg>) -> Db {
        self.updates(FieldMap::new().set(column, value))
    }

    /// Update the changed columns of the handle's model value or table,
    /// with hooks and `updated_at`.
    ///
    /// ```ignore
    /// db.model(&user).updates(FieldMap::from([("name", "hello"), ("age", 18)]));
    /// db.table("users").filter("age < ?", (18,)).update("minor", true);
    /// ```
    pub fn updates(&self, values: impl Into<FieldMap>) -> Db {
        self.run_update(Target::None, values.into(), false)
    }

    /// [`Db::update`] without hooks, timestamps or associations.
    pub fn update_column(&self, column: &str, value: impl Into<Arg>) -> Db {
        self.update_columns(FieldMap::new().set(column, value))
    }

    /// [`Db::updates`] without hooks, timestamps or associations.
    pub fn update_columns(&self, values: impl Into<FieldMap>) -> Db {
        self.run_update(Target::None, values.into(), true)
    }

    /// [`Db::updates`] on a borrowed value, which receives the new values
    /// and runs its hooks.
    pub fn update_record<M: Model>(&self, value: &mut M, values: impl Into<FieldMap>) -> Db {
        self.run_update(Target::One(value), values.into(), false)
    }

    fn run_update(&self, target: Target<'_>, values: FieldMap, columns_only: bool) -> Db {
        let mut scope = Scope::new(self.clone(), target);
        if columns_only {
            scope
                .instance_set(UPDATE_COLUMN, true)
                .instance_set(SAVE_ASSOCIATIONS, false);
        }
        scope.instance_set(UPDATE_INTERFACE, values);
        scope.call_callbacks(CallbackKind::Update);
        scope.into_db()
    }

    // --- raw SQL ---

    /// Execute a statement with `?` placeholders.
    pub fn exec(&self, sql: &str, args: impl IntoArgs) -> Db {
        let mut scope = Scope::new(self.clone(), Target::None);
        let ctx = scope.render_context();
        let mut vars = Vec::new();
        let sql = SqlBuilder::new(&ctx, &mut vars).render_raw(sql, &args.into_args());
        scope.set_sql(sql, vars);
        scope.exec();
        scope.into_db()
    }

    /// The query this handle would run, as an expression with `?`
    /// placeholders.
    pub fn query_expr(&self) -> SqlExpr {
        let mut scope = Scope::new(self.clone(), Target::None);
        scope.instance_set(SKIP_BINDVAR, true);
        scope.prepare_query_sql();
        SqlExpr {
            sql: scope.sql().to_string(),
            args: scope.sql_vars().iter().cloned().map(Arg::Value).collect(),
        }
    }

    /// [`Db::query_expr`] in parentheses, for use as a condition argument.
    ///
    /// ```ignore
    /// let avg = db.table("orders").select("AVG(amount)", ()).sub_query();
    /// db.table("orders").filter("amount > ?", (avg,)).find(&mut orders);
    /// ```
    pub fn sub_query(&self) -> SqlExpr {
        self.query_expr().parenthesized()
    }

    // --- misc ---

    /// Whether `value` has a zero primary key.
    pub fn new_record(&self, value: &dyn Record) -> bool {
        let model = self.model_struct(&value.descriptor());
        model
            .primary_key()
            .and_then(|pk| value.value_of(pk))
            .is_none_or(|v| v.is_zero())
    }

    /// Rows of `R` related to `owner` through its first relationship to `R`.
    pub fn related<O: Model, R: Model>(&self, owner: &O, out: &mut Vec<R>) -> Db {
        let model = self.model_struct_of::<O>();
        let Some(relationship) = model.relationship_to(TypeId::of::<R>()) else {
            let mut db = self.clone();
            db.add_error(Error::config(
                ConfigErrorKind::MissingRelationship,
                format!("{} has no relationship to {}", O::MODEL_NAME, R::MODEL_NAME),
            ));
            return db;
        };
        let key = owner.value_of(relationship.owner_key()).unwrap_or(Value::Null);
        crate::association::related_handle(self, relationship, key).find(out)
    }
}

/// Fill the target from the where equalities, then [`Db::attrs`] when
/// `with_attrs`, then [`Db::assign`].
fn initialize(scope: &mut Scope<'_>, with_attrs: bool) {
    let mut values: Vec<(String, Value)> = scope
        .search()
        .conditions(ClauseKind::Where)
        .flat_map(Condition::equalities)
        .collect();
    let mut maps = Vec::new();
    if with_attrs {
        maps.push(scope.search().init_attrs().clone());
    }
    maps.push(scope.search().assign_attrs().clone());
    for map in &maps {
        values.extend(map.values().map(|(k, v)| (k.to_string(), v.clone())));
    }
    for (column, value) in values {
        if matches!(value, Value::Array(_)) {
            continue;
        }
        if let Err(e) = scope.set_column(&column, value) {
            scope.err(e);
        }
    }
}
