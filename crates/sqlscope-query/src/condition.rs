//! Query conditions.
//!
//! A condition is classified once, when it enters a search, into one of a
//! small closed set of shapes. Rendering to SQL happens later in
//! [`crate::render`].

use crate::expr::{Arg, SqlExpr};
use sqlscope_core::{Record, Value};

/// An ordered map of column name to argument.
///
/// Used for map conditions and for the `attrs`/`assign`/`updates` maps.
/// Inserting an existing key overwrites it in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldMap(Vec<(String, Arg)>);

impl FieldMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a key.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Arg>) {
        let key = key.into();
        let value = value.into();
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.0.push((key, value)),
        }
    }

    /// Builder form of [`FieldMap::insert`].
    #[must_use]
    pub fn set(mut self, key: impl Into<String>, value: impl Into<Arg>) -> Self {
        self.insert(key, value);
        self
    }

    /// Merge `other` into `self`; keys from `other` win.
    pub fn merge(&mut self, other: FieldMap) {
        for (k, v) in other.0 {
            self.insert(k, v);
        }
    }

    pub fn get(&self, key: &str) -> Option<&Arg> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn remove(&mut self, key: &str) -> Option<Arg> {
        let idx = self.0.iter().position(|(k, _)| k == key)?;
        Some(self.0.remove(idx).1)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arg)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(k, _)| k.as_str())
    }

    /// Entries whose value is a plain value rather than an expression.
    pub fn values(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0
            .iter()
            .filter_map(|(k, v)| v.as_value().map(|v| (k.as_str(), v)))
    }

    /// Build a map from the non-zero columns of a record.
    pub fn from_record(record: &dyn Record) -> Self {
        Self(
            record
                .values()
                .into_iter()
                .filter(|(_, v)| !v.is_zero())
                .map(|(k, v)| (k.to_string(), Arg::Value(v)))
                .collect(),
        )
    }
}

impl<K: Into<String>, V: Into<Arg>, const N: usize> From<[(K, V); N]> for FieldMap {
    fn from(entries: [(K, V); N]) -> Self {
        let mut map = FieldMap::new();
        for (k, v) in entries {
            map.insert(k, v);
        }
        map
    }
}

impl<K: Into<String>, V: Into<Arg>> FromIterator<(K, V)> for FieldMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = FieldMap::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

impl IntoIterator for FieldMap {
    type Item = (String, Arg);
    type IntoIter = std::vec::IntoIter<(String, Arg)>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// One query condition.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// SQL text with `?` placeholders.
    Raw { sql: String, args: Vec<Arg> },
    /// Column equality map.
    Map(FieldMap),
    /// The non-zero columns of a model instance.
    Struct(Vec<(&'static str, Value)>),
    /// Inline primary key lookup.
    PrimaryKey(Vec<Value>),
}

impl Condition {
    pub fn raw(sql: impl Into<String>) -> Self {
        Condition::Raw {
            sql: sql.into(),
            args: Vec::new(),
        }
    }

    /// Condition on the non-zero columns of `record`.
    pub fn model(record: &dyn Record) -> Self {
        Condition::Struct(
            record
                .values()
                .into_iter()
                .filter(|(_, v)| !v.is_zero())
                .collect(),
        )
    }

    /// Primary key equality (or `IN` for several keys).
    pub fn pk(key: impl Into<Value>) -> Self {
        match key.into() {
            Value::Array(keys) => Condition::PrimaryKey(keys),
            key => Condition::PrimaryKey(vec![key]),
        }
    }

    /// Attach positional arguments. Only raw conditions take arguments.
    #[must_use]
    pub fn with_args(self, extra: Vec<Arg>) -> Self {
        match self {
            Condition::Raw { sql, mut args } => {
                args.extend(extra);
                Condition::Raw { sql, args }
            }
            other => other,
        }
    }

    /// Whether the condition renders to nothing.
    pub fn is_empty(&self) -> bool {
        match self {
            Condition::Raw { sql, .. } => sql.trim().is_empty(),
            Condition::Map(map) => map.is_empty(),
            Condition::Struct(values) => values.is_empty(),
            Condition::PrimaryKey(keys) => keys.is_empty(),
        }
    }

    /// Column/value pairs usable to initialize a record; empty for raw SQL.
    pub fn equalities(&self) -> Vec<(String, Value)> {
        match self {
            Condition::Map(map) => map
                .values()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
            Condition::Struct(values) => values
                .iter()
                .map(|(k, v)| ((*k).to_string(), v.clone()))
                .collect(),
            Condition::Raw { .. } | Condition::PrimaryKey(_) => Vec::new(),
        }
    }
}

impl From<&str> for Condition {
    fn from(sql: &str) -> Self {
        Condition::raw(sql)
    }
}

impl From<String> for Condition {
    fn from(sql: String) -> Self {
        Condition::raw(sql)
    }
}

impl From<&String> for Condition {
    fn from(sql: &String) -> Self {
        Condition::raw(sql.clone())
    }
}

impl From<FieldMap> for Condition {
    fn from(map: FieldMap) -> Self {
        Condition::Map(map)
    }
}

impl From<SqlExpr> for Condition {
    fn from(expr: SqlExpr) -> Self {
        Condition::Raw {
            sql: expr.sql,
            args: expr.args,
        }
    }
}

impl From<i64> for Condition {
    fn from(key: i64) -> Self {
        Condition::pk(key)
    }
}

impl From<i32> for Condition {
    fn from(key: i32) -> Self {
        Condition::pk(key)
    }
}

impl From<Vec<i64>> for Condition {
    fn from(keys: Vec<i64>) -> Self {
        Condition::pk(keys)
    }
}
