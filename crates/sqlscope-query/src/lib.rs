//! Query accumulation and SQL rendering for sqlscope.
//!
//! `sqlscope-query` is the **condition layer** underneath the chainable `Db`
//! handle:
//!
//! - [`Search`] holds the fragments a chain of builder calls accumulates.
//! - [`Condition`] is the closed set of condition shapes a caller can pass.
//! - [`SqlBuilder`] renders a `Search` into SQL plus bound values.
//! - [`SqlExpr`] is a SQL fragment with arguments, usable as a sub-query.
//!
//! Most users reach these types through the `sqlscope` facade crate.

pub mod condition;
pub mod expr;
pub mod render;
pub mod search;

pub use condition::{Condition, FieldMap};
pub use expr::{Arg, IntoArgs, SqlExpr, expr};
pub use render::{PrimaryCondition, RenderContext, SqlBuilder, join_non_empty};
pub use search::{ClauseKind, Fragment, Preload, Search};
