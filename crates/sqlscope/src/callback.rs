//! The callback registry.
//!
//! Every terminal operation runs one of five named chains against a
//! [`Scope`]. A chain is an ordered list of named steps; the order actually
//! executed is compiled once into an immutable snapshot and cached until the
//! next registration change. A running chain keeps the snapshot it started
//! with, so registering a step never affects an operation in flight.
//!
//! ```ignore
//! db.callback()
//!     .create()
//!     .before("sqlscope:create")
//!     .register("audit", |scope| {
//!         tracing::info!(table = %scope.table_name(), "inserting");
//!     })?;
//! ```

use crate::db::Parent;
use crate::scope::Scope;
use sqlscope_core::{ConfigErrorKind, Error, Result};
use std::fmt;
use std::sync::{Arc, OnceLock, PoisonError};

/// One processing step.
#[derive(Clone)]
pub enum Callback {
    /// A step shipped with the crate.
    Builtin(fn(&mut Scope<'_>)),
    /// A step registered by the application.
    Custom(Arc<dyn Fn(&mut Scope<'_>) + Send + Sync>),
}

impl Callback {
    pub fn call(&self, scope: &mut Scope<'_>) {
        match self {
            Callback::Builtin(f) => f(scope),
            Callback::Custom(f) => f(scope),
        }
    }

    pub fn is_builtin(&self) -> bool {
        matches!(self, Callback::Builtin(_))
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Callback::Builtin(_) => f.write_str("Callback::Builtin"),
            Callback::Custom(_) => f.write_str("Callback::Custom"),
        }
    }
}

/// The operation a chain belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallbackKind {
    Create,
    Update,
    Delete,
    Query,
    RowQuery,
}

impl CallbackKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            CallbackKind::Create => "create",
            CallbackKind::Update => "update",
            CallbackKind::Delete => "delete",
            CallbackKind::Query => "query",
            CallbackKind::RowQuery => "row_query",
        }
    }
}

#[derive(Debug, Clone)]
struct Step {
    name: String,
    callback: Callback,
}

/// An ordered list of named steps plus its compiled snapshot.
#[derive(Debug, Clone, Default)]
pub struct Chain {
    steps: Vec<Step>,
    compiled: OnceLock<Arc<[Callback]>>,
}

impl Chain {
    /// Step names in execution order.
    pub fn names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.name == name)
    }

    fn position_or_err(&self, kind: CallbackKind, name: &str) -> Result<usize> {
        self.position(name).ok_or_else(|| {
            Error::config(
                ConfigErrorKind::UnknownCallback,
                format!("{} callback {} is not registered", kind.as_str(), name),
            )
        })
    }

    /// The execution order, compiled on first use after a change.
    pub fn compiled(&self) -> Arc<[Callback]> {
        Arc::clone(
            self.compiled
                .get_or_init(|| self.steps.iter().map(|s| s.callback.clone()).collect()),
        )
    }

    fn changed(&mut self) {
        self.compiled = OnceLock::new();
    }

    fn insert(
        &mut self,
        kind: CallbackKind,
        at: Placement<'_>,
        name: &str,
        callback: Callback,
    ) -> Result<()> {
        if self.position(name).is_some() {
            return Err(Error::config(
                ConfigErrorKind::DuplicateCallback,
                format!("{} callback {} is already registered", kind.as_str(), name),
            ));
        }
        let index = match at {
            Placement::End => self.steps.len(),
            Placement::Before(other) => self.position_or_err(kind, other)?,
            Placement::After(other) => self.position_or_err(kind, other)? + 1,
        };
        self.steps.insert(
            index,
            Step {
                name: name.to_string(),
                callback,
            },
        );
        self.changed();
        Ok(())
    }

    fn replace(&mut self, kind: CallbackKind, name: &str, callback: Callback) -> Result<()> {
        let index = self.position_or_err(kind, name)?;
        self.steps[index].callback = callback;
        self.changed();
        Ok(())
    }

    fn remove(&mut self, kind: CallbackKind, name: &str) -> Result<()> {
        let index = self.position_or_err(kind, name)?;
        self.steps.remove(index);
        self.changed();
        Ok(())
    }

    fn get(&self, name: &str) -> Option<Callback> {
        self.position(name).map(|i| self.steps[i].callback.clone())
    }
}

#[derive(Debug, Clone, Copy)]
enum Placement<'a> {
    End,
    Before(&'a str),
    After(&'a str),
}

/// The five chains.
#[derive(Debug, Clone, Default)]
pub struct Callbacks {
    create: Chain,
    update: Chain,
    delete: Chain,
    query: Chain,
    row_query: Chain,
}

impl Callbacks {
    /// Empty chains.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn chain(&self, kind: CallbackKind) -> &Chain {
        match kind {
            CallbackKind::Create => &self.create,
            CallbackKind::Update => &self.update,
            CallbackKind::Delete => &self.delete,
            CallbackKind::Query => &self.query,
            CallbackKind::RowQuery => &self.row_query,
        }
    }

    fn chain_mut(&mut self, kind: CallbackKind) -> &mut Chain {
        match kind {
            CallbackKind::Create => &mut self.create,
            CallbackKind::Update => &mut self.update,
            CallbackKind::Delete => &mut self.delete,
            CallbackKind::Query => &mut self.query,
            CallbackKind::RowQuery => &mut self.row_query,
        }
    }

    /// Append a built-in step; used to assemble the default chains.
    pub(crate) fn builtin(&mut self, kind: CallbackKind, name: &str, f: fn(&mut Scope<'_>)) {
        let chain = self.chain_mut(kind);
        if chain.position(name).is_none() {
            chain.steps.push(Step {
                name: name.to_string(),
                callback: Callback::Builtin(f),
            });
            chain.changed();
        }
    }
}

/// Entry point returned by [`crate::Db::callback`].
#[derive(Clone)]
pub struct CallbackRegistry {
    parent: Arc<Parent>,
}

impl CallbackRegistry {
    pub(crate) fn new(parent: Arc<Parent>) -> Self {
        Self { parent }
    }

    fn processor(&self, kind: CallbackKind) -> CallbackProcessor {
        CallbackProcessor {
            parent: Arc::clone(&self.parent),
            kind,
            before: None,
            after: None,
        }
    }

    pub fn create(&self) -> CallbackProcessor {
        self.processor(CallbackKind::Create)
    }

    pub fn update(&self) -> CallbackProcessor {
        self.processor(CallbackKind::Update)
    }

    pub fn delete(&self) -> CallbackProcessor {
        self.processor(CallbackKind::Delete)
    }

    pub fn query(&self) -> CallbackProcessor {
        self.processor(CallbackKind::Query)
    }

    pub fn row_query(&self) -> CallbackProcessor {
        self.processor(CallbackKind::RowQuery)
    }

    /// Step names of one chain, in execution order.
    pub fn names(&self, kind: CallbackKind) -> Vec<String> {
        let callbacks = self.parent.callbacks();
        callbacks
            .chain(kind)
            .names()
            .into_iter()
            .map(String::from)
            .collect()
    }
}

/// Registration on one chain.
///
/// `before` and `after` only position the next [`register`]; they are
/// checked when it runs.
///
/// [`register`]: CallbackProcessor::register
pub struct CallbackProcessor {
    parent: Arc<Parent>,
    kind: CallbackKind,
    before: Option<String>,
    after: Option<String>,
}

impl CallbackProcessor {
    #[must_use]
    pub fn before(mut self, name: impl Into<String>) -> Self {
        self.before = Some(name.into());
        self
    }

    #[must_use]
    pub fn after(mut self, name: impl Into<String>) -> Self {
        self.after = Some(name.into());
        self
    }

    /// Add a step, at the end unless positioned with `before` or `after`.
    pub fn register<F>(self, name: &str, f: F) -> Result<()>
    where
        F: Fn(&mut Scope<'_>) + Send + Sync + 'static,
    {
        let placement = match (&self.before, &self.after) {
            (Some(before), _) => Placement::Before(before),
            (None, Some(after)) => Placement::After(after),
            (None, None) => Placement::End,
        };
        let callback = Callback::Custom(Arc::new(f));
        self.mutate(|chain, kind| chain.insert(kind, placement, name, callback))?;
        tracing::debug!(
            target: "sqlscope",
            chain = self.kind.as_str(),
            name,
            "registered callback"
        );
        Ok(())
    }

    /// Swap the function of an existing step, keeping its position.
    pub fn replace<F>(&self, name: &str, f: F) -> Result<()>
    where
        F: Fn(&mut Scope<'_>) + Send + Sync + 'static,
    {
        let callback = Callback::Custom(Arc::new(f));
        self.mutate(|chain, kind| chain.replace(kind, name, callback))
    }

    pub fn remove(&self, name: &str) -> Result<()> {
        self.mutate(|chain, kind| chain.remove(kind, name))
    }

    pub fn get(&self, name: &str) -> Option<Callback> {
        self.parent.callbacks().chain(self.kind).get(name)
    }

    fn mutate(&self, f: impl FnOnce(&mut Chain, CallbackKind) -> Result<()>) -> Result<()> {
        let mut guard = self
            .parent
            .callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        // Copy-on-write: snapshots held by running chains stay untouched.
        let callbacks = Arc::make_mut(&mut guard);
        f(callbacks.chain_mut(self.kind), self.kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_: &mut Scope<'_>) {}

    fn chain_with(names: &[&str]) -> Chain {
        let mut callbacks = Callbacks::empty();
        for name in names {
            callbacks.builtin(CallbackKind::Create, name, noop);
        }
        callbacks.create
    }

    #[test]
    fn before_and_after_position_steps() {
        let mut chain = chain_with(&["a", "c"]);
        let kind = CallbackKind::Create;
        chain
            .insert(kind, Placement::Before("c"), "b", Callback::Builtin(noop))
            .unwrap();
        chain
            .insert(kind, Placement::After("c"), "d", Callback::Builtin(noop))
            .unwrap();
        assert_eq!(chain.names(), vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn unknown_and_duplicate_names() {
        let mut chain = chain_with(&["a"]);
        let kind = CallbackKind::Query;
        let err = chain
            .insert(kind, Placement::Before("missing"), "x", Callback::Builtin(noop))
            .unwrap_err();
        assert_eq!(err.config_kind(), Some(ConfigErrorKind::UnknownCallback));
        let err = chain
            .insert(kind, Placement::End, "a", Callback::Builtin(noop))
            .unwrap_err();
        assert_eq!(err.config_kind(), Some(ConfigErrorKind::DuplicateCallback));
        assert!(chain.remove(kind, "missing").is_err());
        assert!(chain.replace(kind, "missing", Callback::Builtin(noop)).is_err());
    }

    #[test]
    fn compiled_snapshot_survives_changes() {
        let mut chain = chain_with(&["a", "b"]);
        let before = chain.compiled();
        assert_eq!(before.len(), 2);
        chain.remove(CallbackKind::Create, "a").unwrap();
        assert_eq!(before.len(), 2);
        assert_eq!(chain.compiled().len(), 1);
    }

    #[test]
    fn replace_keeps_position() {
        let mut chain = chain_with(&["a", "b", "c"]);
        let custom = Callback::Custom(Arc::new(|_: &mut Scope<'_>| {}));
        chain.replace(CallbackKind::Create, "b", custom).unwrap();
        assert_eq!(chain.names(), vec!["a", "b", "c"]);
        assert!(!chain.get("b").unwrap().is_builtin());
        assert!(chain.get("a").unwrap().is_builtin());
    }
}
