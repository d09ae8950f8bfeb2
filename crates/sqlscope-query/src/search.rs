//! Accumulated query state.

use crate::condition::{Condition, FieldMap};
use std::sync::Arc;

/// Which clause a condition fragment belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClauseKind {
    Where,
    Or,
    Not,
    Having,
    Joins,
}

/// A condition tagged with its clause.
#[derive(Debug, Clone, PartialEq)]
pub struct Fragment {
    pub kind: ClauseKind,
    pub condition: Arc<Condition>,
}

/// A preload directive: load the relationship at `path` along with the
/// parent rows, filtered by `conditions`.
#[derive(Debug, Clone, PartialEq)]
pub struct Preload {
    pub path: String,
    pub conditions: Vec<Condition>,
}

/// The query fragments accumulated by a chain of builder calls.
///
/// Cloning copies the fragment list; the fragments themselves are shared and
/// never mutated after they are appended.
#[derive(Debug, Clone, Default)]
pub struct Search {
    fragments: Vec<Fragment>,
    orders: Vec<Arc<Condition>>,
    limit: Option<u64>,
    offset: Option<u64>,
    table_name: Option<String>,
    group: Option<String>,
    raw: bool,
    unscoped: bool,
    ignore_order: bool,
    init_attrs: FieldMap,
    assign_attrs: FieldMap,
    preloads: Vec<Preload>,
    selects: Option<Condition>,
    omits: Vec<String>,
}

impl Search {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, kind: ClauseKind, condition: Condition) -> &mut Self {
        self.fragments.push(Fragment {
            kind,
            condition: Arc::new(condition),
        });
        self
    }

    pub fn filter(&mut self, condition: Condition) -> &mut Self {
        self.push(ClauseKind::Where, condition)
    }

    pub fn or(&mut self, condition: Condition) -> &mut Self {
        self.push(ClauseKind::Or, condition)
    }

    pub fn not(&mut self, condition: Condition) -> &mut Self {
        self.push(ClauseKind::Not, condition)
    }

    pub fn having(&mut self, condition: Condition) -> &mut Self {
        self.push(ClauseKind::Having, condition)
    }

    pub fn joins(&mut self, condition: Condition) -> &mut Self {
        self.push(ClauseKind::Joins, condition)
    }

    /// Append an order; with `reorder` the earlier orders are dropped first.
    pub fn order(&mut self, condition: Condition, reorder: bool) -> &mut Self {
        if reorder {
            self.orders.clear();
        }
        if !condition.is_empty() {
            self.orders.push(Arc::new(condition));
        }
        self
    }

    /// Set the limit. A negative value clears it.
    pub fn limit(&mut self, limit: i64) -> &mut Self {
        self.limit = u64::try_from(limit).ok();
        self
    }

    /// Set the offset. A negative value clears it.
    pub fn offset(&mut self, offset: i64) -> &mut Self {
        self.offset = u64::try_from(offset).ok();
        self
    }

    pub fn group(&mut self, group: impl Into<String>) -> &mut Self {
        self.group = Some(group.into());
        self
    }

    pub fn select(&mut self, condition: Condition) -> &mut Self {
        self.selects = Some(condition);
        self
    }

    pub fn omit<I, S>(&mut self, columns: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.omits = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn attrs(&mut self, attrs: FieldMap) -> &mut Self {
        self.init_attrs.merge(attrs);
        self
    }

    pub fn assign(&mut self, attrs: FieldMap) -> &mut Self {
        self.assign_attrs.merge(attrs);
        self
    }

    /// Add a preload; preloading the same path again replaces it.
    pub fn preload(&mut self, path: impl Into<String>, conditions: Vec<Condition>) -> &mut Self {
        let path = path.into();
        self.preloads.retain(|p| p.path != path);
        self.preloads.push(Preload { path, conditions });
        self
    }

    pub fn set_unscoped(&mut self) -> &mut Self {
        self.unscoped = true;
        self
    }

    pub fn set_table(&mut self, name: impl Into<String>) -> &mut Self {
        self.table_name = Some(name.into());
        self
    }

    pub fn set_raw(&mut self, raw: bool) -> &mut Self {
        self.raw = raw;
        self
    }

    pub fn set_ignore_order(&mut self, ignore: bool) -> &mut Self {
        self.ignore_order = ignore;
        self
    }

    pub fn clear_preloads(&mut self) -> &mut Self {
        self.preloads.clear();
        self
    }

    pub fn clear_limit_offset(&mut self) -> &mut Self {
        self.limit = None;
        self.offset = None;
        self
    }

    pub fn fragments(&self) -> &[Fragment] {
        &self.fragments
    }

    /// Conditions of one clause, in the order they were added.
    pub fn conditions(&self, kind: ClauseKind) -> impl Iterator<Item = &Condition> {
        self.fragments
            .iter()
            .filter(move |f| f.kind == kind)
            .map(|f| f.condition.as_ref())
    }

    /// Whether any where/or/not condition is present.
    pub fn has_conditions(&self) -> bool {
        self.fragments.iter().any(|f| {
            matches!(f.kind, ClauseKind::Where | ClauseKind::Or | ClauseKind::Not)
                && !f.condition.is_empty()
        })
    }

    pub fn orders(&self) -> impl Iterator<Item = &Condition> {
        self.orders.iter().map(AsRef::as_ref)
    }

    pub fn limit_value(&self) -> Option<u64> {
        self.limit
    }

    pub fn offset_value(&self) -> Option<u64> {
        self.offset
    }

    pub fn table_name(&self) -> Option<&str> {
        self.table_name.as_deref()
    }

    pub fn group_by(&self) -> Option<&str> {
        self.group.as_deref()
    }

    pub fn is_raw(&self) -> bool {
        self.raw
    }

    pub fn is_unscoped(&self) -> bool {
        self.unscoped
    }

    pub fn ignores_order(&self) -> bool {
        self.ignore_order
    }

    pub fn init_attrs(&self) -> &FieldMap {
        &self.init_attrs
    }

    pub fn assign_attrs(&self) -> &FieldMap {
        &self.assign_attrs
    }

    pub fn preloads(&self) -> &[Preload] {
        &self.preloads
    }

    pub fn selects(&self) -> Option<&Condition> {
        self.selects.as_ref()
    }

    pub fn omits(&self) -> &[String] {
        &self.omits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_are_independent() {
        let mut base = Search::new();
        base.filter(Condition::raw("a = 1"));
        let mut left = base.clone();
        left.filter(Condition::raw("b = 2"));
        let mut right = base.clone();
        right.or(Condition::raw("c = 3"));

        assert_eq!(base.fragments().len(), 1);
        assert_eq!(left.conditions(ClauseKind::Where).count(), 2);
        assert_eq!(right.conditions(ClauseKind::Where).count(), 1);
        assert_eq!(right.conditions(ClauseKind::Or).count(), 1);
        assert!(Arc::ptr_eq(
            &base.fragments()[0].condition,
            &left.fragments()[0].condition
        ));
    }

    #[test]
    fn reorder_drops_earlier_orders() {
        let mut s = Search::new();
        s.order(Condition::raw("age desc"), false)
            .order(Condition::raw("name"), false);
        assert_eq!(s.orders().count(), 2);
        s.order(Condition::raw("id"), true);
        assert_eq!(s.orders().collect::<Vec<_>>(), vec![&Condition::raw("id")]);
    }

    #[test]
    fn limit_and_offset_last_call_wins() {
        let mut s = Search::new();
        s.limit(10).limit(3).offset(5);
        assert_eq!(s.limit_value(), Some(3));
        assert_eq!(s.offset_value(), Some(5));
        s.limit(-1);
        assert_eq!(s.limit_value(), None);
    }

    #[test]
    fn preload_same_path_replaces() {
        let mut s = Search::new();
        s.preload("Emails", vec![])
            .preload("Languages", vec![])
            .preload("Emails", vec![Condition::raw("primary = 1")]);
        let paths: Vec<_> = s.preloads().iter().map(|p| p.path.as_str()).collect();
        assert_eq!(paths, ["Languages", "Emails"]);
        assert_eq!(s.preloads()[1].conditions.len(), 1);
    }

    #[test]
    fn empty_conditions_do_not_count() {
        let mut s = Search::new();
        s.filter(Condition::raw(""));
        assert!(!s.has_conditions());
        s.not(Condition::pk(3_i64));
        assert!(s.has_conditions());
    }
}
