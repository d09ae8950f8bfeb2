use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use sqlscope::prelude::*;
use sqlscope::{CallbackKind, Connection, Dialect, ModelEvents, TransactionErrorKind};
use sqlscope_sqlite::SqliteConnection;

#[derive(Model, Debug, Clone, Default, PartialEq)]
struct User {
    id: i64,
    name: String,
    age: i32,
    deleted_at: Option<i64>,
}

#[derive(Model, Debug, Clone, Default)]
#[sqlscope(events)]
struct Account {
    id: i64,
    name: String,
    balance: i64,
    #[sqlscope(skip)]
    trail: Vec<String>,
}

impl ModelEvents for Account {
    fn before_save(&mut self) -> Result<()> {
        self.trail.push("before_save".into());
        Ok(())
    }

    fn before_create(&mut self) -> Result<()> {
        self.trail.push("before_create".into());
        Ok(())
    }

    fn after_create(&mut self) -> Result<()> {
        self.trail.push("after_create".into());
        Ok(())
    }

    fn after_save(&mut self) -> Result<()> {
        self.trail.push("after_save".into());
        Ok(())
    }

    fn after_find(&mut self) -> Result<()> {
        self.trail.push("after_find".into());
        Ok(())
    }

    fn before_delete(&mut self) -> Result<()> {
        if self.balance > 0 {
            return Err(Error::Custom("account has funds".into()));
        }
        Ok(())
    }
}

fn open() -> Db {
    let conn = SqliteConnection::open_memory().expect("open sqlite memory db");
    let db = Db::open_with(Arc::new(conn), Config::new().log_mode(LogMode::Silent));
    for migrated in [db.auto_migrate::<User>(), db.auto_migrate::<Account>()] {
        assert!(migrated.error().is_none(), "{:?}", migrated.error());
    }
    db
}

fn user(name: &str, age: i32) -> User {
    User {
        name: name.to_string(),
        age,
        ..Default::default()
    }
}

fn seed(db: &Db) -> Vec<User> {
    let mut users = vec![
        user("ann", 10),
        user("bob", 20),
        user("cat", 30),
        user("dan", 40),
        user("eve", 50),
    ];
    for u in &mut users {
        let created = db.create(u);
        assert!(created.error().is_none(), "{:?}", created.error());
        assert_ne!(u.id, 0);
    }
    users
}

fn names(users: &[User]) -> Vec<&str> {
    users.iter().map(|u| u.name.as_str()).collect()
}

#[test]
fn filter_order_limit_find() {
    let db = open();
    seed(&db);

    let mut found: Vec<User> = Vec::new();
    let result = db
        .filter("age > ?", (15,))
        .order("age desc")
        .limit(2)
        .find(&mut found);
    assert!(result.error().is_none(), "{:?}", result.error());
    assert_eq!(names(&found), ["eve", "dan"]);
    assert_eq!(result.rows_affected(), 2);

    let base = db.filter("age > ?", (15,));
    let mut wide: Vec<User> = Vec::new();
    base.find(&mut wide);
    assert_eq!(wide.len(), 4);
    let mut narrow: Vec<User> = Vec::new();
    base.filter("age < ?", (35,)).find(&mut narrow);
    assert_eq!(narrow.len(), 2);
    base.find(&mut wide);
    assert_eq!(wide.len(), 4, "the shared base handle must not change");
}

#[test]
fn or_not_and_map_conditions() {
    let db = open();
    seed(&db);

    let mut found: Vec<User> = Vec::new();
    db.filter("name = ?", ("ann",))
        .or("name = ?", ("eve",))
        .order("id")
        .find(&mut found);
    assert_eq!(names(&found), ["ann", "eve"]);

    db.not(FieldMap::new().set("name", vec!["ann", "bob"]), ())
        .order("id")
        .find(&mut found);
    assert_eq!(names(&found), ["cat", "dan", "eve"]);

    db.filter(FieldMap::new().set("age", 30), ()).find(&mut found);
    assert_eq!(names(&found), ["cat"]);
}

#[test]
fn first_last_take_and_not_found() {
    let db = open();

    let mut missing = User::default();
    let first = db.first(&mut missing);
    assert!(first.record_not_found());

    let mut none: Vec<User> = Vec::new();
    let found = db.find(&mut none);
    assert!(found.error().is_none());
    assert!(none.is_empty());

    seed(&db);
    let mut one = User::default();
    db.first(&mut one);
    assert_eq!(one.name, "ann");
    let mut last = User::default();
    db.last(&mut last);
    assert_eq!(last.name, "eve");
    let mut any = User::default();
    assert!(db.filter("age = ?", (20,)).take(&mut any).error().is_none());
    assert_eq!(any.name, "bob");

    let mut by_key = User {
        id: last.id,
        ..Default::default()
    };
    db.first(&mut by_key);
    assert_eq!(by_key, last);

    let mut by_condition = User::default();
    db.filter(one.id, ()).first(&mut by_condition);
    assert_eq!(by_condition.name, "ann");
}

#[test]
fn malformed_sql_is_not_record_not_found() {
    let db = open();
    seed(&db);

    let mut user = User::default();
    let broken = db.filter("nonsense ((", ()).first(&mut user);
    assert!(broken.error().is_some());
    assert!(!broken.record_not_found());
    assert_eq!(user, User::default());

    let mut users: Vec<User> = Vec::new();
    let broken = db.filter("nonsense ((", ()).find(&mut users);
    assert!(broken.error().is_some());
    assert!(!broken.record_not_found());

    let missing = db.filter("age > ?", (100,)).first(&mut user);
    assert!(missing.record_not_found());
}

#[test]
fn first_or_init_never_writes() {
    let db = open();
    let lookup = db
        .filter(FieldMap::new().set("name", "zed"), ())
        .attrs(FieldMap::new().set("age", 30));

    let mut u = User::default();
    let result = lookup.first_or_init(&mut u);
    assert!(result.error().is_none(), "{:?}", result.error());
    assert_eq!(u.id, 0);
    assert_eq!(u.name, "zed");
    assert_eq!(u.age, 30);

    let mut again = User::default();
    lookup.first_or_init(&mut again);
    assert_eq!(again, u);

    let mut total = 0;
    db.model_type::<User>().count(&mut total);
    assert_eq!(total, 0);
}

#[test]
fn first_or_create_inserts_once_and_assigns() {
    let db = open();
    let lookup = db
        .filter(FieldMap::new().set("name", "zed"), ())
        .attrs(FieldMap::new().set("age", 30));

    let mut created = User::default();
    assert!(lookup.first_or_create(&mut created).error().is_none());
    assert_ne!(created.id, 0);
    assert_eq!(created.age, 30);

    let mut found = User::default();
    assert!(lookup.first_or_create(&mut found).error().is_none());
    assert_eq!(found.id, created.id);

    let mut total = 0;
    db.model_type::<User>().count(&mut total);
    assert_eq!(total, 1);

    let mut assigned = User::default();
    db.filter(FieldMap::new().set("name", "zed"), ())
        .assign(FieldMap::new().set("age", 31))
        .first_or_create(&mut assigned);
    assert_eq!(assigned.age, 31);
    let mut stored = User::default();
    db.first(&mut stored);
    assert_eq!(stored.age, 31);
}

#[test]
fn save_updates_or_creates() {
    let db = open();
    let mut u = user("ann", 10);
    db.save(&mut u);
    assert_ne!(u.id, 0);

    u.age = 11;
    let saved = db.save(&mut u);
    assert!(saved.error().is_none());
    assert_eq!(saved.rows_affected(), 1);

    let mut detached = User {
        id: 42,
        name: "ghost".into(),
        age: 1,
        deleted_at: None,
    };
    let result = db.save(&mut detached);
    assert!(result.error().is_none(), "{:?}", result.error());
    let mut stored = User::default();
    db.filter(42_i64, ()).first(&mut stored);
    assert_eq!(stored.name, "ghost");
}

#[test]
fn updates_through_model_and_table() {
    let db = open();
    let users = seed(&db);

    let updated = db
        .model(&users[0])
        .updates(FieldMap::new().set("name", "anna").set("age", 11));
    assert!(updated.error().is_none());
    assert_eq!(updated.rows_affected(), 1);
    let snapshot = updated.value().expect("model value");
    assert_eq!(snapshot.get("name"), Some(&Value::Text("anna".into())));

    let mut stored = User::default();
    db.filter(users[0].id, ()).first(&mut stored);
    assert_eq!(stored.name, "anna");
    assert_eq!(stored.age, 11);

    let minors = db
        .table("users")
        .filter("age < ?", (35,))
        .update("age", 0);
    assert_eq!(minors.rows_affected(), 3);

    let mut b = users[1].clone();
    db.update_record(&mut b, FieldMap::new().set("name", "bobby"));
    assert_eq!(b.name, "bobby");
    db.model(&b).update_column("age", 99);
    let mut reloaded = User::default();
    db.filter(b.id, ()).first(&mut reloaded);
    assert_eq!(reloaded.name, "bobby");
    assert_eq!(reloaded.age, 99);
}

#[test]
fn soft_delete_and_unscoped() {
    let db = open();
    let mut users = seed(&db);

    let deleted = db.delete(&mut users[0]);
    assert!(deleted.error().is_none());
    let mut visible = 0;
    db.model_type::<User>().count(&mut visible);
    assert_eq!(visible, 4);
    let mut all = 0;
    db.unscoped().model_type::<User>().count(&mut all);
    assert_eq!(all, 5);

    db.unscoped().delete(&mut users[1]);
    db.unscoped().model_type::<User>().count(&mut all);
    assert_eq!(all, 4);
}

#[test]
fn global_updates_and_deletes_can_be_blocked() {
    let db = open();
    seed(&db);
    let guarded = db.block_global_update(true);

    let update = guarded.model_type::<User>().update("age", 1);
    assert!(update.error().is_some());
    let mut blank = User::default();
    assert!(guarded.delete(&mut blank).error().is_some());

    let mut sum: Vec<i64> = Vec::new();
    db.model_type::<User>().select("SUM(age)", ()).pluck("SUM(age)", &mut sum);
    assert_eq!(sum, [150]);

    assert!(
        guarded
            .model_type::<User>()
            .filter("age > ?", (45,))
            .update("age", 1)
            .error()
            .is_none()
    );
}

#[test]
fn pluck_and_count() {
    let db = open();
    seed(&db);
    db.create(&mut user("ann", 60));

    let mut all_names: Vec<String> = Vec::new();
    db.model_type::<User>()
        .order("id")
        .pluck("name", &mut all_names);
    assert_eq!(all_names, ["ann", "bob", "cat", "dan", "eve", "ann"]);

    let mut n = 0;
    db.model_type::<User>()
        .filter("name = ?", ("ann",))
        .count(&mut n);
    assert_eq!(n, 2);

    db.model_type::<User>().group("name").count(&mut n);
    assert_eq!(n, 5);

    db.table("users").select("count(distinct name)", ()).count(&mut n);
    assert_eq!(n, 5);
}

#[test]
fn query_expr_and_sub_query() {
    let db = open();
    seed(&db);

    let expr = db
        .table("users")
        .select("name", ())
        .filter("age > ?", (25,))
        .query_expr();
    assert!(expr.sql.starts_with("SELECT name FROM"), "{}", expr.sql);
    assert!(expr.sql.contains("age > ?"), "{}", expr.sql);
    assert_eq!(expr.args.len(), 1);

    let average = db.table("users").select("AVG(age)", ()).sub_query();
    assert!(average.sql.starts_with('(') && average.sql.ends_with(')'));
    let mut above: Vec<User> = Vec::new();
    db.filter("age > ?", (average,)).order("age").find(&mut above);
    assert_eq!(names(&above), ["dan", "eve"]);
}

#[test]
fn raw_and_exec() {
    let db = open();
    seed(&db);

    let exec = db.exec("UPDATE users SET age = age + ? WHERE name = ?", (1, "ann"));
    assert_eq!(exec.rows_affected(), 1);

    let mut found: Vec<User> = Vec::new();
    db.raw("SELECT * FROM users WHERE age IN (?)", (vec![11, 50],))
        .find(&mut found);
    assert_eq!(found.len(), 2);

    let rows = db
        .raw("SELECT name, age FROM users ORDER BY age DESC", ())
        .rows()
        .expect("rows");
    assert_eq!(rows.len(), 5);
    assert_eq!(rows[0].get_by_name("name"), Some(&Value::Text("eve".into())));

    let mut scanned: Vec<User> = Vec::new();
    db.scan_rows(&rows, &mut scanned).expect("scan rows");
    assert_eq!(scanned[0].age, 50);
}

#[test]
fn scopes_compose() {
    let db = open();
    seed(&db);

    let adults = |db: Db| db.filter("age >= ?", (18,));
    let oldest_first = |db: Db| db.order("age desc");
    let mut found: Vec<User> = Vec::new();
    db.scopes(&[&adults, &oldest_first]).limit(1).find(&mut found);
    assert_eq!(names(&found), ["eve"]);
}

#[test]
fn singular_table_names_follow_the_setting() {
    let db = open();
    assert_eq!(db.table_name_of::<User>(), "users");
    db.singular_table(true);
    assert!(db.is_singular_table());
    assert_eq!(db.table_name_of::<User>(), "user");
    db.singular_table(false);
    assert_eq!(db.table_name_of::<User>(), "users");
}

#[test]
fn auto_migrate_adds_missing_columns() {
    let conn = SqliteConnection::open_memory().expect("open sqlite memory db");
    let db = Db::open_with(Arc::new(conn), Config::new().log_mode(LogMode::Silent));
    assert!(
        db.exec("CREATE TABLE users (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT)", ())
            .error()
            .is_none()
    );
    let mut u = user("ann", 10);
    assert!(db.create(&mut u).error().is_some());

    assert!(db.auto_migrate::<User>().error().is_none());
    let mut u = user("ann", 10);
    assert!(db.create(&mut u).error().is_none());
    let mut stored = User::default();
    db.first(&mut stored);
    assert_eq!(stored.age, 10);
}

#[test]
fn hooks_run_in_order() {
    let db = open();
    let mut account = Account {
        name: "main".into(),
        balance: 10,
        ..Default::default()
    };
    db.create(&mut account);
    assert_eq!(
        account.trail,
        ["before_save", "before_create", "after_create", "after_save"]
    );

    let mut loaded = Account::default();
    db.first(&mut loaded);
    assert_eq!(loaded.trail, ["after_find"]);

    let refused = db.delete(&mut loaded);
    let err = refused.error().expect("hook error");
    assert_eq!(err.to_string(), "account has funds");
    let mut remaining = 0;
    db.model_type::<Account>().count(&mut remaining);
    assert_eq!(remaining, 1);

    loaded.balance = 0;
    assert!(db.delete(&mut loaded).error().is_none());
    db.model_type::<Account>().count(&mut remaining);
    assert_eq!(remaining, 0);
}

#[test]
fn transaction_commits_or_rolls_back() {
    let db = open();

    let result = db.transaction(|tx| {
        let created = tx.create(&mut user("kept", 1));
        match created.error() {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    });
    assert!(result.is_ok());

    let result = db.transaction(|tx| {
        tx.create(&mut user("dropped", 2));
        Err(Error::Custom("abort".into()))
    });
    assert!(result.is_err());

    let mut stored: Vec<String> = Vec::new();
    db.model_type::<User>().pluck("name", &mut stored);
    assert_eq!(stored, ["kept"]);

    let tx = db.begin();
    tx.create(&mut user("pending", 3));
    assert!(tx.rollback().error().is_none());
    db.model_type::<User>().pluck("name", &mut stored);
    assert_eq!(stored, ["kept"]);
}

#[derive(Default)]
struct CountingConnection {
    calls: AtomicUsize,
}

impl Connection for CountingConnection {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn execute(&self, _sql: &str, _params: &[Value]) -> Result<u64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(0)
    }

    fn query(&self, _sql: &str, _params: &[Value]) -> Result<Vec<Row>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Vec::new())
    }

    fn insert(&self, _sql: &str, _params: &[Value]) -> Result<i64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(1)
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[test]
fn transaction_guards_make_no_driver_calls() {
    let conn = Arc::new(CountingConnection::default());
    let db = Db::open_with(conn.clone(), Config::new().log_mode(LogMode::Silent));

    let committed = db.commit();
    assert!(
        committed
            .error()
            .is_some_and(|e| e.is_transaction(TransactionErrorKind::Invalid))
    );
    let rolled = db.rollback();
    assert!(
        rolled
            .error()
            .is_some_and(|e| e.is_transaction(TransactionErrorKind::Invalid))
    );
    let begun = db.begin();
    assert!(
        begun
            .error()
            .is_some_and(|e| e.is_transaction(TransactionErrorKind::CantStart))
    );
    assert_eq!(conn.calls.load(Ordering::SeqCst), 0);

    // Chains still run without transaction support.
    let mut u = user("ann", 1);
    assert!(db.create(&mut u).error().is_none());
    assert_eq!(u.id, 1);
    assert_eq!(conn.calls.load(Ordering::SeqCst), 1);
}

#[test]
fn custom_callbacks_run_in_position() {
    let db = open();
    let log = Arc::new(Mutex::new(Vec::<String>::new()));

    let before = Arc::clone(&log);
    db.callback()
        .create()
        .before("sqlscope:create")
        .register("audit:before", move |scope| {
            let key_zero = scope.primary_key_zero();
            before
                .lock()
                .expect("log lock")
                .push(format!("before key_zero={key_zero}"));
        })
        .expect("register before");
    let after = Arc::clone(&log);
    db.callback()
        .create()
        .after("sqlscope:create")
        .register("audit:after", move |scope| {
            let key_zero = scope.primary_key_zero();
            after
                .lock()
                .expect("log lock")
                .push(format!("after key_zero={key_zero}"));
        })
        .expect("register after");

    let order = db.callback().names(CallbackKind::Create);
    let position = |name: &str| order.iter().position(|n| n == name).expect(name);
    assert!(position("audit:before") + 1 == position("sqlscope:create"));
    assert!(position("audit:after") == position("sqlscope:create") + 1);

    db.create(&mut user("ann", 1));
    assert_eq!(
        *log.lock().expect("log lock"),
        ["before key_zero=true", "after key_zero=false"]
    );

    db.callback()
        .create()
        .remove("audit:before")
        .expect("remove");
    db.create(&mut user("bob", 2));
    assert_eq!(log.lock().expect("log lock").len(), 3);
}

#[test]
fn replaced_step_and_errors_aggregate() {
    let db = open();
    db.callback()
        .query()
        .replace("sqlscope:query", |scope| {
            scope.err(Error::Custom("first".into()));
            scope.err(Error::Custom("second".into()));
        })
        .expect("replace query step");

    let mut found: Vec<User> = Vec::new();
    let result = db.find(&mut found);
    let errors = result.get_errors();
    assert_eq!(errors.len(), 2);
    assert_eq!(errors[0].to_string(), "first");
    assert_eq!(errors[1].to_string(), "second");
    assert!(!result.record_not_found());
}

#[test]
fn transactions_close_over_chained_handles() {
    let db = open();
    let tx = db.begin();
    assert!(tx.is_transaction());
    let scoped = tx.filter("age > ?", (0,));
    assert!(scoped.is_transaction());
    assert!(!db.is_transaction());
    let nested = scoped.begin();
    assert!(
        nested
            .error()
            .is_some_and(|e| e.is_transaction(TransactionErrorKind::CantStart))
    );
    assert!(tx.commit().error().is_none());
}
