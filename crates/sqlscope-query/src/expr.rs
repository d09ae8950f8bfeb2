//! SQL expressions and condition arguments.

use sqlscope_core::Value;

/// A SQL fragment with its own arguments, written with `?` placeholders.
///
/// Expressions are inlined wherever they appear as an argument, so a
/// `query_expr()` result can be nested as a sub-query in another condition.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlExpr {
    pub sql: String,
    pub args: Vec<Arg>,
}

impl SqlExpr {
    pub fn new(sql: impl Into<String>, args: impl IntoArgs) -> Self {
        Self {
            sql: sql.into(),
            args: args.into_args(),
        }
    }

    /// Wrap the expression in parentheses, for use as a sub-query.
    #[must_use]
    pub fn parenthesized(self) -> Self {
        Self {
            sql: format!("({})", self.sql),
            args: self.args,
        }
    }
}

/// Build a SQL expression, e.g. `expr("age + ?", (1,))`.
pub fn expr(sql: impl Into<String>, args: impl IntoArgs) -> SqlExpr {
    SqlExpr::new(sql, args)
}

/// A single bound argument: a plain value or a nested expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Value(Value),
    Expr(SqlExpr),
}

impl Arg {
    /// The plain value, if this is not an expression.
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Arg::Value(v) => Some(v),
            Arg::Expr(_) => None,
        }
    }
}

impl From<Value> for Arg {
    fn from(v: Value) -> Self {
        Arg::Value(v)
    }
}

impl From<SqlExpr> for Arg {
    fn from(e: SqlExpr) -> Self {
        Arg::Expr(e)
    }
}

impl<T: Into<Value>> From<Option<T>> for Arg {
    fn from(v: Option<T>) -> Self {
        Arg::Value(Value::from(v))
    }
}

macro_rules! arg_from_value {
    ($($t:ty),* $(,)?) => {
        $(impl From<$t> for Arg {
            fn from(v: $t) -> Self {
                Arg::Value(Value::from(v))
            }
        })*
    };
}

arg_from_value!(
    bool,
    i8,
    i16,
    i32,
    i64,
    u8,
    u16,
    u32,
    f32,
    f64,
    String,
    &str,
    &String,
    Vec<i32>,
    Vec<i64>,
    Vec<String>,
    Vec<&str>,
    Vec<Value>,
    serde_json::Value,
);

/// Conversion of a call's positional arguments into a list of [`Arg`]s.
///
/// Implemented for `()`, tuples of up to six arguments, arrays and
/// `Vec<Arg>`.
pub trait IntoArgs {
    fn into_args(self) -> Vec<Arg>;
}

impl IntoArgs for () {
    fn into_args(self) -> Vec<Arg> {
        Vec::new()
    }
}

impl IntoArgs for Vec<Arg> {
    fn into_args(self) -> Vec<Arg> {
        self
    }
}

impl<T: Into<Arg>, const N: usize> IntoArgs for [T; N] {
    fn into_args(self) -> Vec<Arg> {
        self.into_iter().map(Into::into).collect()
    }
}

macro_rules! tuple_args {
    ($($name:ident),+) => {
        impl<$($name: Into<Arg>),+> IntoArgs for ($($name,)+) {
            #[allow(non_snake_case)]
            fn into_args(self) -> Vec<Arg> {
                let ($($name,)+) = self;
                vec![$($name.into()),+]
            }
        }
    };
}

tuple_args!(A);
tuple_args!(A, B);
tuple_args!(A, B, C);
tuple_args!(A, B, C, D);
tuple_args!(A, B, C, D, E);
tuple_args!(A, B, C, D, E, F);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tuples_mix_types() {
        let args = ("jinzhu", 20, None::<i64>).into_args();
        assert_eq!(
            args,
            vec![
                Arg::Value(Value::from("jinzhu")),
                Arg::Value(Value::Int(20)),
                Arg::Value(Value::Null),
            ]
        );
    }

    #[test]
    fn nested_expression_is_kept_whole() {
        let inner = expr("SELECT id FROM users WHERE age > ?", (30,)).parenthesized();
        let args = (inner.clone(),).into_args();
        assert_eq!(args, vec![Arg::Expr(inner)]);
        assert!(args[0].as_value().is_none());
    }

    #[test]
    fn arrays_become_array_values() {
        let args = [vec![1_i64, 2, 3]].into_args();
        assert_eq!(
            args[0].as_value(),
            Some(&Value::Array(vec![
                Value::BigInt(1),
                Value::BigInt(2),
                Value::BigInt(3)
            ]))
        );
    }
}
