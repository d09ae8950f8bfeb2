//! The chainable connection handle.
//!
//! Every condition-building method clones the handle, changes the clone and
//! returns it, so a `Db` held in one place is never affected by calls made
//! through another. Clones share the connection and the [`Parent`], which
//! carries the callback registry, the metadata registry and the logger.

use crate::callback::{CallbackRegistry, Callbacks};
use crate::callbacks;
use crate::config::Config;
use crate::logger::{LogEntry, LogMode, Logger, TracingLogger, log_error};
use crate::registry::{ModelRegistry, ModelStruct};
use sqlscope_core::{
    Connection, Dialect, Error, Errors, Model, ModelDescriptor, ModelValue, Record, Result, Row,
    Transaction, Value,
};
use sqlscope_query::{Condition, FieldMap, IntoArgs, Search};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;

/// A value stored with [`Db::set`] or [`crate::Scope::instance_set`].
pub type Setting = Arc<dyn Any + Send + Sync>;

/// State shared by every handle derived from one [`Db::open`].
pub(crate) struct Parent {
    pub(crate) callbacks: RwLock<Arc<Callbacks>>,
    singular_table: AtomicBool,
    models: ModelRegistry,
    logger: Arc<dyn Logger>,
    pub(crate) now: fn() -> i64,
}

impl Parent {
    /// The registry as of now.
    pub(crate) fn callbacks(&self) -> Arc<Callbacks> {
        Arc::clone(&self.callbacks.read().unwrap_or_else(PoisonError::into_inner))
    }
}

/// The connection a handle runs statements on.
#[derive(Clone)]
pub(crate) enum SqlCommon {
    Database(Arc<dyn Connection>),
    Transaction(Arc<dyn Transaction>),
}

impl SqlCommon {
    pub(crate) fn dialect(&self) -> Dialect {
        match self {
            SqlCommon::Database(c) => c.dialect(),
            SqlCommon::Transaction(t) => t.dialect(),
        }
    }

    pub(crate) fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        match self {
            SqlCommon::Database(c) => c.execute(sql, params),
            SqlCommon::Transaction(t) => t.execute(sql, params),
        }
    }

    pub(crate) fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        match self {
            SqlCommon::Database(c) => c.query(sql, params),
            SqlCommon::Transaction(t) => t.query(sql, params),
        }
    }

    pub(crate) fn insert(&self, sql: &str, params: &[Value]) -> Result<i64> {
        match self {
            SqlCommon::Database(c) => c.insert(sql, params),
            SqlCommon::Transaction(t) => t.insert(sql, params),
        }
    }

    pub(crate) fn begin(&self) -> Result<Arc<dyn Transaction>> {
        match self {
            SqlCommon::Database(c) => c.begin(),
            SqlCommon::Transaction(_) => Err(Error::cant_start_transaction()),
        }
    }

    pub(crate) fn is_transaction(&self) -> bool {
        matches!(self, SqlCommon::Transaction(_))
    }
}

/// The chainable connection handle.
///
/// ```ignore
/// let db = Db::open(Arc::new(SqliteConnection::open_memory()?));
/// let mut users: Vec<User> = Vec::new();
/// let result = db
///     .filter("age > ?", (30,))
///     .order("name")
///     .limit(2)
///     .find(&mut users);
/// if let Some(err) = result.error() {
///     eprintln!("{err}");
/// }
/// ```
#[derive(Clone)]
pub struct Db {
    pub(crate) conn: SqlCommon,
    pub(crate) search: Search,
    pub(crate) value: Option<ModelValue>,
    settings: HashMap<String, Setting>,
    pub(crate) error: Option<Error>,
    pub(crate) rows_affected: u64,
    log_mode: LogMode,
    block_global_update: bool,
    pub(crate) dialect: Dialect,
    pub(crate) parent: Arc<Parent>,
}

impl fmt::Debug for Db {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Db")
            .field("dialect", &self.dialect)
            .field("transaction", &self.conn.is_transaction())
            .field("search", &self.search)
            .field("error", &self.error)
            .field("rows_affected", &self.rows_affected)
            .field("log_mode", &self.log_mode)
            .finish_non_exhaustive()
    }
}

impl Db {
    /// Open a root handle with the default configuration.
    pub fn open(conn: Arc<dyn Connection>) -> Db {
        Self::open_with(conn, Config::default())
    }

    /// Open a root handle. Each root has its own callback and metadata
    /// registries.
    pub fn open_with(conn: Arc<dyn Connection>, config: Config) -> Db {
        let dialect = conn.dialect();
        let parent = Parent {
            callbacks: RwLock::new(Arc::new(callbacks::default_callbacks())),
            singular_table: AtomicBool::new(config.singular_table),
            models: ModelRegistry::new(),
            logger: config
                .logger
                .unwrap_or_else(|| Arc::new(TracingLogger) as Arc<dyn Logger>),
            now: config.now,
        };
        tracing::debug!(target: "sqlscope", dialect = dialect.name(), "opened handle");
        Db {
            conn: SqlCommon::Database(conn),
            search: Search::new(),
            value: None,
            settings: HashMap::new(),
            error: None,
            rows_affected: 0,
            log_mode: config.log_mode,
            block_global_update: config.block_global_update,
            dialect,
            parent: Arc::new(parent),
        }
    }

    /// A clone with an empty search, no value and no error.
    #[must_use]
    pub fn new(&self) -> Db {
        let mut db = self.clone();
        db.search = Search::new();
        db.value = None;
        db.error = None;
        db.rows_affected = 0;
        db
    }

    /// Close the underlying connection.
    pub fn close(&self) -> Result<()> {
        match &self.conn {
            SqlCommon::Database(c) => c.close(),
            SqlCommon::Transaction(_) => Err(Error::invalid_transaction()),
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// The accumulated error, if any.
    pub fn error(&self) -> Option<&Error> {
        self.error.as_ref()
    }

    /// Every accumulated error, in order of occurrence.
    pub fn get_errors(&self) -> Vec<Error> {
        self.error.clone().map(Error::into_vec).unwrap_or_default()
    }

    /// Whether a record-not-found error is among the accumulated errors.
    pub fn record_not_found(&self) -> bool {
        self.get_errors().iter().any(Error::is_record_not_found)
    }

    pub fn rows_affected(&self) -> u64 {
        self.rows_affected
    }

    /// The model value set with [`Db::model`].
    pub fn value(&self) -> Option<&ModelValue> {
        self.value.as_ref()
    }

    pub fn search(&self) -> &Search {
        &self.search
    }

    pub fn is_transaction(&self) -> bool {
        self.conn.is_transaction()
    }

    /// Record an error on this handle.
    ///
    /// Distinct errors accumulate into [`Error::Multiple`]; an error already
    /// present is not added again. Record-not-found is kept but never
    /// logged.
    pub fn add_error(&mut self, error: Error) {
        if !error.is_record_not_found() {
            log_error(&self.parent.logger, self.log_mode, &error);
        }
        let mut errors = Errors::new();
        if let Some(previous) = self.error.take() {
            errors.add(previous);
        }
        errors.add(error);
        self.error = errors.into_error();
    }

    pub(crate) fn trace_sql(&self, sql: &str, vars: &[Value], start: Instant, rows_affected: u64) {
        if self.log_mode == LogMode::Verbose {
            self.parent.logger.print(&LogEntry::Sql {
                sql: sql.to_string(),
                vars: vars.to_vec(),
                elapsed: start.elapsed(),
                rows_affected,
            });
        }
    }

    /// Execute a statement outside any scope, tracing it like scoped SQL.
    pub(crate) fn exec_logged(&self, sql: &str, vars: &[Value]) -> Result<u64> {
        let start = Instant::now();
        let rows = self.conn.execute(sql, vars)?;
        self.trace_sql(sql, vars, start, rows);
        Ok(rows)
    }

    pub(crate) fn query_logged(&self, sql: &str, vars: &[Value]) -> Result<Vec<Row>> {
        let start = Instant::now();
        let rows = self.conn.query(sql, vars)?;
        self.trace_sql(sql, vars, start, rows.len() as u64);
        Ok(rows)
    }

    /// Log a message through the handle's logger.
    pub fn log(&self, message: impl Into<String>) {
        if self.log_mode != LogMode::Silent {
            self.parent.logger.print(&LogEntry::Info(message.into()));
        }
    }

    #[must_use]
    pub fn log_mode(&self, mode: LogMode) -> Db {
        let mut db = self.clone();
        db.log_mode = mode;
        db
    }

    /// Verbose logging for this chain.
    #[must_use]
    pub fn debug(&self) -> Db {
        self.log_mode(LogMode::Verbose)
    }

    /// Make UPDATE and DELETE without conditions fail.
    #[must_use]
    pub fn block_global_update(&self, enable: bool) -> Db {
        let mut db = self.clone();
        db.block_global_update = enable;
        db
    }

    pub(crate) fn blocks_global_update(&self) -> bool {
        self.block_global_update
    }

    /// Switch between `user` and `users` style table names for every handle
    /// sharing this root. Cached model metadata is dropped.
    pub fn singular_table(&self, enable: bool) {
        self.parent.singular_table.store(enable, Ordering::SeqCst);
        self.parent.models.clear();
    }

    pub fn is_singular_table(&self) -> bool {
        self.parent.singular_table.load(Ordering::SeqCst)
    }

    /// Resolved metadata for a model.
    pub fn model_struct(&self, descriptor: &ModelDescriptor) -> Arc<ModelStruct> {
        self.parent.models.get(descriptor, self.is_singular_table())
    }

    pub fn model_struct_of<M: Model>(&self) -> Arc<ModelStruct> {
        self.model_struct(&ModelDescriptor::of::<M>())
    }

    /// The table a model maps to under the current naming convention.
    pub fn table_name_of<M: Model>(&self) -> String {
        self.model_struct_of::<M>().table_name.clone()
    }

    /// The callback registry shared by this root.
    pub fn callback(&self) -> CallbackRegistry {
        CallbackRegistry::new(Arc::clone(&self.parent))
    }

    // --- settings ---

    /// Clone the handle, then [`Db::instant_set`] on the clone.
    #[must_use]
    pub fn set(&self, name: &str, value: impl Any + Send + Sync) -> Db {
        let mut db = self.clone();
        db.instant_set(name, value);
        db
    }

    /// Set a setting on this handle in place.
    pub fn instant_set(&mut self, name: &str, value: impl Any + Send + Sync) -> &mut Self {
        self.settings.insert(name.to_string(), Arc::new(value));
        self
    }

    pub fn get(&self, name: &str) -> Option<Setting> {
        self.settings.get(name).cloned()
    }

    /// Typed [`Db::get`]; `None` when absent or of another type.
    pub fn get_as<T: Any + Clone>(&self, name: &str) -> Option<T> {
        self.settings
            .get(name)
            .and_then(|v| v.downcast_ref::<T>().cloned())
    }

    // --- chain methods ---

    fn with_search(&self, f: impl FnOnce(&mut Search)) -> Db {
        let mut db = self.clone();
        f(&mut db.search);
        db
    }

    /// Add a where condition.
    ///
    /// ```ignore
    /// db.filter("name = ? AND age > ?", ("jinzhu", 20));
    /// db.filter(FieldMap::from([("name", "jinzhu")]), ());
    /// db.filter(Condition::model(&user), ());
    /// ```
    #[must_use]
    pub fn filter(&self, condition: impl Into<Condition>, args: impl IntoArgs) -> Db {
        let condition = condition.into().with_args(args.into_args());
        self.with_search(|s| {
            s.filter(condition);
        })
    }

    #[must_use]
    pub fn or(&self, condition: impl Into<Condition>, args: impl IntoArgs) -> Db {
        let condition = condition.into().with_args(args.into_args());
        self.with_search(|s| {
            s.or(condition);
        })
    }

    #[must_use]
    pub fn not(&self, condition: impl Into<Condition>, args: impl IntoArgs) -> Db {
        let condition = condition.into().with_args(args.into_args());
        self.with_search(|s| {
            s.not(condition);
        })
    }

    /// Set the limit; a negative value clears it.
    #[must_use]
    pub fn limit(&self, limit: i64) -> Db {
        self.with_search(|s| {
            s.limit(limit);
        })
    }

    /// Set the offset; a negative value clears it.
    #[must_use]
    pub fn offset(&self, offset: i64) -> Db {
        self.with_search(|s| {
            s.offset(offset);
        })
    }

    /// Append an order clause.
    #[must_use]
    pub fn order(&self, order: impl Into<Condition>) -> Db {
        let order = order.into();
        self.with_search(|s| {
            s.order(order, false);
        })
    }

    /// Replace every earlier order clause.
    #[must_use]
    pub fn reorder(&self, order: impl Into<Condition>) -> Db {
        let order = order.into();
        self.with_search(|s| {
            s.order(order, true);
        })
    }

    #[must_use]
    pub fn select(&self, query: impl Into<Condition>, args: impl IntoArgs) -> Db {
        let query = query.into().with_args(args.into_args());
        self.with_search(|s| {
            s.select(query);
        })
    }

    /// Leave columns out of INSERT and UPDATE statements.
    #[must_use]
    pub fn omit<I, S>(&self, columns: I) -> Db
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.with_search(|s| {
            s.omit(columns);
        })
    }

    #[must_use]
    pub fn group(&self, group: impl Into<String>) -> Db {
        let group = group.into();
        self.with_search(|s| {
            s.group(group);
        })
    }

    #[must_use]
    pub fn having(&self, condition: impl Into<Condition>, args: impl IntoArgs) -> Db {
        let condition = condition.into().with_args(args.into_args());
        self.with_search(|s| {
            s.having(condition);
        })
    }

    #[must_use]
    pub fn joins(&self, query: impl Into<String>, args: impl IntoArgs) -> Db {
        let condition = Condition::raw(query).with_args(args.into_args());
        self.with_search(|s| {
            s.joins(condition);
        })
    }

    /// Load a relationship, `"Field"` or a nested `"field.child"` path,
    /// along with the main query.
    #[must_use]
    pub fn preload(&self, path: impl Into<String>) -> Db {
        self.preload_with(path, Vec::new())
    }

    /// [`Db::preload`] with extra conditions on the preloaded rows.
    #[must_use]
    pub fn preload_with(&self, path: impl Into<String>, conditions: Vec<Condition>) -> Db {
        let path = path.into();
        self.with_search(|s| {
            s.preload(path, conditions);
        })
    }

    /// Values used by `first_or_init` and `first_or_create` when nothing is
    /// found.
    #[must_use]
    pub fn attrs(&self, attrs: impl Into<FieldMap>) -> Db {
        let attrs = attrs.into();
        self.with_search(|s| {
            s.attrs(attrs);
        })
    }

    /// Values applied by `first_or_init` and `first_or_create` whether or
    /// not a record is found.
    #[must_use]
    pub fn assign(&self, attrs: impl Into<FieldMap>) -> Db {
        let attrs = attrs.into();
        self.with_search(|s| {
            s.assign(attrs);
        })
    }

    /// Ignore soft deletes.
    #[must_use]
    pub fn unscoped(&self) -> Db {
        self.with_search(|s| {
            s.set_unscoped();
        })
    }

    /// Query a table by name; clears the model value.
    #[must_use]
    pub fn table(&self, name: impl Into<String>) -> Db {
        let mut db = self.with_search(|s| {
            s.set_table(name);
        });
        db.value = None;
        db
    }

    /// Raw SQL for `scan`, `rows` or `count`.
    #[must_use]
    pub fn raw(&self, sql: impl Into<String>, args: impl IntoArgs) -> Db {
        let condition = Condition::raw(sql).with_args(args.into_args());
        self.with_search(|s| {
            s.set_raw(true).filter(condition);
        })
    }

    /// Set the model value that operations without a target act on.
    #[must_use]
    pub fn model(&self, value: &dyn Record) -> Db {
        let mut db = self.clone();
        db.value = Some(ModelValue::of(value));
        db
    }

    /// Set the model type without a value.
    #[must_use]
    pub fn model_type<M: Model>(&self) -> Db {
        let mut db = self.clone();
        db.value = Some(ModelValue::empty(ModelDescriptor::of::<M>()));
        db
    }

    /// Apply reusable chain functions in order.
    #[must_use]
    pub fn scopes(&self, funcs: &[&dyn Fn(Db) -> Db]) -> Db {
        funcs.iter().fold(self.clone(), |db, f| f(db))
    }

    // --- transactions ---

    /// Start a transaction on a clone of the handle.
    ///
    /// Fails with a can't-start error when the handle is already a
    /// transaction or the connection has no transaction support.
    #[must_use]
    pub fn begin(&self) -> Db {
        let mut db = self.clone();
        match self.conn.begin() {
            Ok(tx) => {
                db.dialect = tx.dialect();
                db.conn = SqlCommon::Transaction(tx);
            }
            Err(e) => db.add_error(e),
        }
        db
    }

    /// Commit; an invalid-transaction error unless the handle holds one.
    #[must_use]
    pub fn commit(&self) -> Db {
        let mut db = self.clone();
        match &self.conn {
            SqlCommon::Transaction(tx) => {
                if let Err(e) = tx.commit() {
                    db.add_error(e);
                }
            }
            SqlCommon::Database(_) => db.add_error(Error::invalid_transaction()),
        }
        db
    }

    /// Roll back; an invalid-transaction error unless the handle holds one.
    #[must_use]
    pub fn rollback(&self) -> Db {
        let mut db = self.clone();
        match &self.conn {
            SqlCommon::Transaction(tx) => {
                if let Err(e) = tx.rollback() {
                    db.add_error(e);
                }
            }
            SqlCommon::Database(_) => db.add_error(Error::invalid_transaction()),
        }
        db
    }

    /// Run `f` in a transaction, committing when it returns `Ok` and rolling
    /// back otherwise.
    pub fn transaction<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&Db) -> Result<()>,
    {
        let tx = self.begin();
        if let Some(e) = tx.error() {
            return Err(e.clone());
        }
        match f(&tx) {
            Ok(()) => match tx.commit().error() {
                Some(e) => Err(e.clone()),
                None => Ok(()),
            },
            Err(e) => {
                let rolled = tx.rollback();
                if let Some(rollback_error) = rolled.error() {
                    tracing::warn!(target: "sqlscope", error = %rollback_error, "rollback failed");
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::memory_db;
    use sqlscope_core::{ConfigErrorKind, TransactionErrorKind};

    #[test]
    fn chained_calls_leave_the_source_untouched() {
        let base = memory_db().filter("a = ?", (1,));
        let left = base.filter("b = ?", (2,)).limit(5);
        let right = base.or("c = ?", (3,));
        assert_eq!(base.search().fragments().len(), 1);
        assert_eq!(left.search().fragments().len(), 2);
        assert_eq!(right.search().fragments().len(), 2);
        assert_eq!(base.search().limit_value(), None);
        assert_eq!(left.search().limit_value(), Some(5));
    }

    #[test]
    fn reorder_and_limit_overwrite() {
        let db = memory_db().order("a").reorder("b");
        assert_eq!(db.search().orders().count(), 1);
        assert_eq!(db.search().orders().next(), Some(&Condition::raw("b")));
        let db = memory_db().limit(5).limit(10);
        assert_eq!(db.search().limit_value(), Some(10));
        assert_eq!(db.limit(-1).search().limit_value(), None);
    }

    #[test]
    fn set_clones_and_instant_set_mutates() {
        let base = memory_db();
        let set = base.set("k", 1_i32);
        assert!(base.get("k").is_none());
        assert_eq!(set.get_as::<i32>("k"), Some(1));
        assert_eq!(set.get_as::<String>("k"), None);

        let mut local = base.clone();
        local.instant_set("k", "v".to_string());
        assert_eq!(local.get_as::<String>("k").as_deref(), Some("v"));
    }

    #[test]
    fn add_error_aggregates_and_deduplicates() {
        let mut db = memory_db().log_mode(LogMode::Silent);
        db.add_error(Error::Custom("one".into()));
        db.add_error(Error::Custom("two".into()));
        db.add_error(Error::Custom("one".into()));
        let errors = db.get_errors();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].to_string(), "one");
        assert_eq!(errors[1].to_string(), "two");
        assert!(matches!(db.error(), Some(Error::Multiple(_))));
        assert!(!db.record_not_found());

        db.add_error(Error::RecordNotFound);
        assert!(db.record_not_found());
    }

    #[test]
    fn commit_without_begin_is_invalid() {
        let db = memory_db().log_mode(LogMode::Silent);
        let committed = db.commit();
        assert!(
            committed
                .error()
                .unwrap()
                .is_transaction(TransactionErrorKind::Invalid)
        );
        let rolled = db.rollback();
        assert!(
            rolled
                .error()
                .unwrap()
                .is_transaction(TransactionErrorKind::Invalid)
        );
    }

    #[test]
    fn nested_begin_cannot_start() {
        let db = memory_db().log_mode(LogMode::Silent);
        let tx = db.begin();
        assert!(tx.error().is_none());
        assert!(tx.is_transaction());
        let nested = tx.begin();
        assert!(
            nested
                .error()
                .unwrap()
                .is_transaction(TransactionErrorKind::CantStart)
        );
        assert!(tx.rollback().error().is_none());
    }

    #[test]
    fn table_clears_model_value() {
        let db = memory_db().model_type::<crate::testing::Person>();
        assert!(db.value().is_some());
        assert!(db.table("people").value().is_none());
    }

    #[test]
    fn registry_changes_are_shared_by_clones() {
        let root = memory_db();
        let child = root.filter("x = 1", ());
        child
            .callback()
            .query()
            .register("probe", |_scope| {})
            .unwrap();
        assert!(root.callback().query().get("probe").is_some());

        let other_root = memory_db();
        assert!(other_root.callback().query().get("probe").is_none());
        let err = other_root.callback().query().remove("probe").unwrap_err();
        assert_eq!(err.config_kind(), Some(ConfigErrorKind::UnknownCallback));
    }
}
