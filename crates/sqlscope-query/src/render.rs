//! SQL rendering of a [`Search`].
//!
//! Rendering appends bound values to a caller-owned vector in the order their
//! placeholders appear in the text, so positional dialects stay consistent.

use crate::condition::{Condition, FieldMap};
use crate::expr::{Arg, SqlExpr};
use crate::search::{ClauseKind, Search};
use regex::Regex;
use sqlscope_core::{Dialect, Value};
use std::sync::OnceLock;

static BARE_IDENTIFIER: OnceLock<Option<Regex>> = OnceLock::new();
static BARE_NUMBER: OnceLock<Option<Regex>> = OnceLock::new();

fn is_match(cell: &'static OnceLock<Option<Regex>>, pattern: &str, text: &str) -> bool {
    cell.get_or_init(|| Regex::new(pattern).ok())
        .as_ref()
        .is_some_and(|re| re.is_match(text))
}

fn is_bare_identifier(text: &str) -> bool {
    is_match(&BARE_IDENTIFIER, r"^\s*\w+\s*$", text)
}

fn is_bare_number(text: &str) -> bool {
    is_match(&BARE_NUMBER, r"^\s*\d+\s*$", text)
}

/// Conditions added ahead of the user's where clause.
#[derive(Debug, Clone, PartialEq)]
pub enum PrimaryCondition {
    /// `"t"."col" IS NULL`, for soft-deleted models.
    NotDeleted(String),
    /// `"t"."col" = ?`, for a target with a non-zero primary key.
    KeyEquals(String, Value),
}

/// Table and dialect information needed to render conditions.
#[derive(Debug, Clone)]
pub struct RenderContext {
    pub dialect: Dialect,
    pub table: String,
    pub primary_key: Option<String>,
    /// Emit `?` for every value instead of the dialect placeholder.
    pub skip_bindvar: bool,
}

impl RenderContext {
    pub fn new(dialect: Dialect, table: impl Into<String>) -> Self {
        Self {
            dialect,
            table: table.into(),
            primary_key: None,
            skip_bindvar: false,
        }
    }

    #[must_use]
    pub fn primary_key(mut self, column: impl Into<String>) -> Self {
        self.primary_key = Some(column.into());
        self
    }

    #[must_use]
    pub fn skip_bindvar(mut self, skip: bool) -> Self {
        self.skip_bindvar = skip;
        self
    }

    pub fn quote(&self, name: &str) -> String {
        self.dialect.quote_identifier(name)
    }

    /// The table name, quoted unless it already carries an alias or quotes.
    pub fn quoted_table(&self) -> String {
        if self.table.contains(char::is_whitespace) || self.table.contains(['"', '`']) {
            self.table.clone()
        } else {
            self.quote(&self.table)
        }
    }

    fn quoted_primary_key(&self) -> String {
        self.quote(self.primary_key.as_deref().unwrap_or("id"))
    }

    /// Quote a column, qualifying it with the table unless already qualified.
    pub fn qualified(&self, column: &str) -> String {
        if column.contains('.') {
            self.quote(column)
        } else {
            format!("{}.{}", self.quoted_table(), self.quote(column))
        }
    }
}

/// Renders condition fragments while collecting their bound values.
pub struct SqlBuilder<'a> {
    ctx: &'a RenderContext,
    vars: &'a mut Vec<Value>,
}

impl<'a> SqlBuilder<'a> {
    pub fn new(ctx: &'a RenderContext, vars: &'a mut Vec<Value>) -> Self {
        Self { ctx, vars }
    }

    pub fn context(&self) -> &RenderContext {
        self.ctx
    }

    /// Bind a value and return its placeholder.
    pub fn add_var(&mut self, value: Value) -> String {
        self.vars.push(value);
        if self.ctx.skip_bindvar {
            "?".to_string()
        } else {
            self.ctx.dialect.placeholder(self.vars.len())
        }
    }

    /// Bind an argument; expressions are inlined with their own arguments.
    pub fn add_arg(&mut self, arg: &Arg) -> String {
        match arg {
            Arg::Value(v) => self.add_var(v.clone()),
            Arg::Expr(e) => self.render_expr(e),
        }
    }

    pub fn render_expr(&mut self, expr: &SqlExpr) -> String {
        self.render_raw(&expr.sql, &expr.args)
    }

    /// Replace each unquoted `?` in `sql` with the next argument.
    ///
    /// Array arguments expand to a comma-separated placeholder list; an empty
    /// array renders `NULL`. Placeholders beyond the argument count are kept.
    pub fn render_raw(&mut self, sql: &str, args: &[Arg]) -> String {
        let mut out = String::with_capacity(sql.len() + args.len() * 3);
        let mut args = args.iter();
        let mut quoted = false;
        for ch in sql.chars() {
            if ch == '\'' {
                quoted = !quoted;
            }
            if ch == '?' && !quoted {
                if let Some(arg) = args.next() {
                    out.push_str(&self.expand_arg(arg));
                    continue;
                }
            }
            out.push(ch);
        }
        out
    }

    fn expand_arg(&mut self, arg: &Arg) -> String {
        match arg {
            Arg::Value(Value::Array(items)) if items.is_empty() => "NULL".to_string(),
            Arg::Value(Value::Array(items)) => items
                .iter()
                .map(|v| self.add_var(v.clone()))
                .collect::<Vec<_>>()
                .join(","),
            other => self.add_arg(other),
        }
    }

    /// Render one condition as a where-style fragment. Empty conditions
    /// render as an empty string.
    pub fn condition(&mut self, condition: &Condition, negate: bool) -> String {
        if condition.is_empty() {
            return String::new();
        }
        match condition {
            Condition::Raw { sql, args } if negate => self.not_raw(sql, args),
            Condition::Raw { sql, args } => {
                if is_bare_number(sql) && args.is_empty() {
                    return format!("({} = {})", self.pk_column(), sql.trim());
                }
                format!("({})", self.render_raw(sql, args))
            }
            Condition::Map(map) => self.map(map, negate),
            Condition::Struct(values) => {
                let parts: Vec<String> = values
                    .iter()
                    .map(|(column, value)| {
                        let op = if negate { "<>" } else { "=" };
                        let col = self.ctx.qualified(column);
                        format!("({} {} {})", col, op, self.add_var(value.clone()))
                    })
                    .collect();
                parts.join(" AND ")
            }
            Condition::PrimaryKey(keys) => {
                let column = self.pk_column();
                if let [key] = keys.as_slice() {
                    let op = if negate { "<>" } else { "=" };
                    format!("({} {} {})", column, op, self.add_var(key.clone()))
                } else {
                    let op = if negate { "NOT IN" } else { "IN" };
                    let marks: Vec<String> = keys.iter().map(|k| self.add_var(k.clone())).collect();
                    format!("({} {} ({}))", column, op, marks.join(","))
                }
            }
        }
    }

    fn pk_column(&self) -> String {
        format!("{}.{}", self.ctx.quoted_table(), self.ctx.quoted_primary_key())
    }

    fn not_raw(&mut self, sql: &str, args: &[Arg]) -> String {
        if is_bare_number(sql) && args.is_empty() {
            return format!("({} <> {})", self.pk_column(), sql.trim());
        }
        if !is_bare_identifier(sql) {
            return format!("NOT ({})", self.render_raw(sql, args));
        }
        let column = self.ctx.qualified(sql.trim());
        match args.first() {
            None => format!("NOT ({})", sql.trim()),
            Some(Arg::Value(Value::Array(items))) if items.is_empty() => String::new(),
            Some(Arg::Value(Value::Array(_))) => {
                format!("({} NOT IN ({}))", column, self.expand_arg(&args[0]))
            }
            Some(arg) => format!("({} <> {})", column, self.add_arg(arg)),
        }
    }

    fn map(&mut self, map: &FieldMap, negate: bool) -> String {
        let parts: Vec<String> = map
            .iter()
            .map(|(key, arg)| {
                let col = self.ctx.qualified(key);
                match arg {
                    Arg::Value(Value::Null) => {
                        let op = if negate { "IS NOT NULL" } else { "IS NULL" };
                        format!("({} {})", col, op)
                    }
                    Arg::Value(Value::Array(_)) => {
                        let op = if negate { "NOT IN" } else { "IN" };
                        format!("({} {} ({}))", col, op, self.expand_arg(arg))
                    }
                    other => {
                        let op = if negate { "<>" } else { "=" };
                        format!("({} {} {})", col, op, self.add_arg(other))
                    }
                }
            })
            .collect();
        parts.join(" AND ")
    }

    /// The select list, defaulting to every column of the table.
    pub fn select_sql(&mut self, search: &Search) -> String {
        match search.selects() {
            Some(Condition::Raw { sql, args }) if !sql.trim().is_empty() => {
                self.render_raw(sql, args)
            }
            _ => format!("{}.*", self.ctx.quoted_table()),
        }
    }

    pub fn joins_sql(&mut self, search: &Search) -> String {
        let parts: Vec<String> = search
            .conditions(ClauseKind::Joins)
            .filter_map(|c| match c {
                Condition::Raw { sql, args } if !sql.trim().is_empty() => {
                    Some(self.render_raw(sql, args))
                }
                _ => None,
            })
            .collect();
        parts.join(" ")
    }

    /// The `WHERE` clause, or the bare condition text in raw mode.
    pub fn where_sql(&mut self, search: &Search, primary: &[PrimaryCondition]) -> String {
        if search.is_raw() {
            let parts: Vec<String> = search
                .conditions(ClauseKind::Where)
                .filter_map(|c| match c {
                    Condition::Raw { sql, args } => Some(self.render_raw(sql, args)),
                    _ => None,
                })
                .collect();
            return parts.join(" AND ");
        }

        let primary: Vec<String> = primary
            .iter()
            .map(|p| match p {
                PrimaryCondition::NotDeleted(column) => {
                    format!("{} IS NULL", self.ctx.qualified(column))
                }
                PrimaryCondition::KeyEquals(column, value) => {
                    let col = self.ctx.qualified(column);
                    format!("{} = {}", col, self.add_var(value.clone()))
                }
            })
            .collect();

        let mut and_parts = Vec::new();
        for c in search.conditions(ClauseKind::Where) {
            and_parts.push(self.condition(c, false));
        }
        for c in search.conditions(ClauseKind::Not) {
            and_parts.push(self.condition(c, true));
        }
        and_parts.retain(|s| !s.is_empty());

        let mut or_parts = Vec::new();
        for c in search.conditions(ClauseKind::Or) {
            or_parts.push(self.condition(c, false));
        }
        or_parts.retain(|s| !s.is_empty());

        let mut combined = and_parts.join(" AND ");
        let or_sql = or_parts.join(" OR ");
        if combined.is_empty() {
            combined = or_sql;
        } else if !or_sql.is_empty() {
            combined = format!("{} OR {}", combined, or_sql);
        }

        if !primary.is_empty() {
            let mut sql = format!("WHERE {}", primary.join(" AND "));
            if !combined.is_empty() {
                sql = format!("{} AND ({})", sql, combined);
            }
            sql
        } else if !combined.is_empty() {
            format!("WHERE {}", combined)
        } else {
            String::new()
        }
    }

    pub fn group_sql(&self, search: &Search) -> String {
        match search.group_by() {
            Some(group) if !group.is_empty() => format!("GROUP BY {}", group),
            _ => String::new(),
        }
    }

    pub fn having_sql(&mut self, search: &Search) -> String {
        let mut parts = Vec::new();
        for c in search.conditions(ClauseKind::Having) {
            parts.push(self.condition(c, false));
        }
        parts.retain(|s| !s.is_empty());
        if parts.is_empty() {
            String::new()
        } else {
            format!("HAVING {}", parts.join(" AND "))
        }
    }

    pub fn order_sql(&mut self, search: &Search) -> String {
        if search.ignores_order() {
            return String::new();
        }
        let mut parts = Vec::new();
        for c in search.orders() {
            let part = match c {
                Condition::Raw { sql, args } => self.render_raw(sql, args),
                Condition::Map(map) => map
                    .keys()
                    .map(|k| self.ctx.quote(k))
                    .collect::<Vec<_>>()
                    .join(", "),
                _ => String::new(),
            };
            if !part.trim().is_empty() {
                parts.push(part);
            }
        }
        if parts.is_empty() {
            String::new()
        } else {
            format!("ORDER BY {}", parts.join(", "))
        }
    }

    pub fn limit_offset_sql(&self, search: &Search) -> String {
        let limit = search.limit_value();
        let offset = search.offset_value();
        match (self.ctx.dialect, limit, offset) {
            (_, None, None) => String::new(),
            (_, Some(l), None) => format!("LIMIT {}", l),
            (_, Some(l), Some(o)) => format!("LIMIT {} OFFSET {}", l, o),
            (Dialect::Sqlite, None, Some(o)) => format!("LIMIT -1 OFFSET {}", o),
            (Dialect::Mysql, None, Some(o)) => format!("LIMIT 18446744073709551615 OFFSET {}", o),
            (Dialect::Postgres, None, Some(o)) => format!("OFFSET {}", o),
        }
    }

    /// Everything after `FROM <table>`: joins, where, group, having, order
    /// and limit, in that order.
    pub fn combined_conditions(&mut self, search: &Search, primary: &[PrimaryCondition]) -> String {
        let parts = [
            self.joins_sql(search),
            self.where_sql(search, primary),
            self.group_sql(search),
            self.having_sql(search),
            self.order_sql(search),
            self.limit_offset_sql(search),
        ];
        join_non_empty(&parts)
    }

    /// A complete `SELECT` statement, or the raw text in raw mode.
    pub fn query_sql(&mut self, search: &Search, primary: &[PrimaryCondition]) -> String {
        if search.is_raw() {
            return self.combined_conditions(search, primary);
        }
        let select = self.select_sql(search);
        let rest = self.combined_conditions(search, primary);
        join_non_empty(&[
            format!("SELECT {} FROM {}", select, self.ctx.quoted_table()),
            rest,
        ])
    }
}

/// Join the non-empty parts with single spaces.
pub fn join_non_empty(parts: &[String]) -> String {
    parts
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
