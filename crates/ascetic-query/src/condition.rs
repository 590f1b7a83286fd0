//! WHERE predicates.
//!
//! A [`Condition`] is a small predicate tree over [`Column`] references and
//! bound [`Value`]s. Rendering appends SQL to a buffer and pushes parameters
//! in placeholder order, so conditions compose into any statement.
//!
//! # Example
//!
//! ```ignore
//! let cond = Condition::eq("author_id", 5)
//!     .and(Condition::starts_with("tree_path", "0000000001/"));
//! let (sql, params) = cond.build_with_dialect(Dialect::Sqlite);
//! ```

use ascetic_core::{Dialect, Key, Value};

/// Escape character used by [`Condition::StartsWith`] in its `LIKE` pattern.
pub const LIKE_ESCAPE: char = '!';

/// A possibly table-qualified column reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Column {
    pub table: Option<String>,
    pub name: String,
}

impl Column {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            table: None,
            name: name.into(),
        }
    }

    pub fn qualified(table: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            table: Some(table.into()),
            name: name.into(),
        }
    }

    /// Render the quoted reference.
    pub fn to_sql(&self, dialect: Dialect) -> String {
        match &self.table {
            Some(table) => dialect.quote_qualified(table, &self.name),
            None => dialect.quote(&self.name),
        }
    }
}

impl From<&str> for Column {
    fn from(name: &str) -> Self {
        Column::new(name)
    }
}

impl From<String> for Column {
    fn from(name: String) -> Self {
        Column::new(name)
    }
}

impl From<&String> for Column {
    fn from(name: &String) -> Self {
        Column::new(name.clone())
    }
}

/// Comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    pub const fn as_sql(self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "<>",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        }
    }
}

/// A boolean predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// `column <op> value`. Equality against NULL renders as `IS NULL`.
    Compare {
        column: Column,
        op: CompareOp,
        value: Value,
    },
    /// Tuple membership: `columns` in any of `keys`.
    ///
    /// One column renders as `col IN (...)`; several render as an OR of
    /// AND-ed equalities so every backend profile accepts it. No keys at
    /// all renders as an always-false predicate.
    In { columns: Vec<Column>, keys: Vec<Key> },
    /// Text prefix match through `LIKE ... ESCAPE`.
    StartsWith { column: Column, prefix: String },
    IsNull(Column),
    And(Vec<Condition>),
    Or(Vec<Condition>),
    Not(Box<Condition>),
}

impl Condition {
    pub fn compare(column: impl Into<Column>, op: CompareOp, value: impl Into<Value>) -> Self {
        Condition::Compare {
            column: column.into(),
            op,
            value: value.into(),
        }
    }

    pub fn eq(column: impl Into<Column>, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::Eq, value)
    }

    pub fn ne(column: impl Into<Column>, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::Ne, value)
    }

    pub fn lt(column: impl Into<Column>, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::Lt, value)
    }

    pub fn gt(column: impl Into<Column>, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::Gt, value)
    }

    /// Single-column membership.
    pub fn in_values(column: impl Into<Column>, values: impl IntoIterator<Item = Value>) -> Self {
        Condition::In {
            columns: vec![column.into()],
            keys: values.into_iter().map(Key::from).collect(),
        }
    }

    /// Tuple membership over several columns.
    pub fn in_keys(columns: Vec<Column>, keys: Vec<Key>) -> Self {
        Condition::In { columns, keys }
    }

    pub fn starts_with(column: impl Into<Column>, prefix: impl Into<String>) -> Self {
        Condition::StartsWith {
            column: column.into(),
            prefix: prefix.into(),
        }
    }

    pub fn is_null(column: impl Into<Column>) -> Self {
        Condition::IsNull(column.into())
    }

    /// Every column equal to the matching key part.
    pub fn key_eq(columns: &[Column], key: &Key) -> Self {
        let mut parts: Vec<Condition> = columns
            .iter()
            .zip(key.values())
            .map(|(c, v)| Condition::eq(c.clone(), v.clone()))
            .collect();
        if parts.len() == 1 {
            parts.remove(0)
        } else {
            Condition::And(parts)
        }
    }

    /// Conjoin, flattening nested ANDs.
    pub fn and(self, other: Condition) -> Self {
        match (self, other) {
            (Condition::And(mut a), Condition::And(b)) => {
                a.extend(b);
                Condition::And(a)
            }
            (Condition::And(mut a), other) => {
                a.push(other);
                Condition::And(a)
            }
            (this, other) => Condition::And(vec![this, other]),
        }
    }

    pub fn or(self, other: Condition) -> Self {
        match self {
            Condition::Or(mut a) => {
                a.push(other);
                Condition::Or(a)
            }
            this => Condition::Or(vec![this, other]),
        }
    }

    pub fn not(self) -> Self {
        Condition::Not(Box::new(self))
    }

    /// Render into `sql`, appending bound values to `params`.
    pub fn render(&self, dialect: Dialect, sql: &mut String, params: &mut Vec<Value>) {
        match self {
            Condition::Compare { column, op, value } => {
                sql.push_str(&column.to_sql(dialect));
                match (op, value.is_null()) {
                    (CompareOp::Eq, true) => sql.push_str(" IS NULL"),
                    (CompareOp::Ne, true) => sql.push_str(" IS NOT NULL"),
                    _ => {
                        sql.push(' ');
                        sql.push_str(op.as_sql());
                        sql.push(' ');
                        push_param(dialect, sql, params, value.clone());
                    }
                }
            }
            Condition::In { columns, keys } => render_in(dialect, columns, keys, sql, params),
            Condition::StartsWith { column, prefix } => {
                sql.push_str(&column.to_sql(dialect));
                sql.push_str(" LIKE ");
                push_param(dialect, sql, params, Value::Text(like_prefix(prefix)));
                sql.push_str(&format!(" ESCAPE '{LIKE_ESCAPE}'"));
            }
            Condition::IsNull(column) => {
                sql.push_str(&column.to_sql(dialect));
                sql.push_str(" IS NULL");
            }
            Condition::And(parts) => render_group(dialect, parts, " AND ", "1 = 1", sql, params),
            Condition::Or(parts) => render_group(dialect, parts, " OR ", "1 = 0", sql, params),
            Condition::Not(inner) => {
                sql.push_str("NOT (");
                inner.render(dialect, sql, params);
                sql.push(')');
            }
        }
    }

    /// Render standalone, e.g. for a WHERE clause.
    pub fn build_with_dialect(&self, dialect: Dialect) -> (String, Vec<Value>) {
        let mut sql = String::new();
        let mut params = Vec::new();
        self.render(dialect, &mut sql, &mut params);
        (sql, params)
    }
}

fn push_param(dialect: Dialect, sql: &mut String, params: &mut Vec<Value>, value: Value) {
    params.push(value);
    sql.push_str(dialect.placeholder(params.len()));
}

fn render_group(
    dialect: Dialect,
    parts: &[Condition],
    joiner: &str,
    empty: &str,
    sql: &mut String,
    params: &mut Vec<Value>,
) {
    if parts.is_empty() {
        sql.push_str(empty);
        return;
    }
    if parts.len() == 1 {
        parts[0].render(dialect, sql, params);
        return;
    }
    sql.push('(');
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            sql.push_str(joiner);
        }
        part.render(dialect, sql, params);
    }
    sql.push(')');
}

fn render_in(
    dialect: Dialect,
    columns: &[Column],
    keys: &[Key],
    sql: &mut String,
    params: &mut Vec<Value>,
) {
    if keys.is_empty() || columns.is_empty() {
        sql.push_str("1 = 0");
        return;
    }
    if let [column] = columns {
        sql.push_str(&column.to_sql(dialect));
        sql.push_str(" IN (");
        for (i, key) in keys.iter().enumerate() {
            if i > 0 {
                sql.push_str(", ");
            }
            let value = key.values().first().cloned().unwrap_or_default();
            push_param(dialect, sql, params, value);
        }
        sql.push(')');
        return;
    }
    let alternatives: Vec<Condition> = keys
        .iter()
        .map(|key| Condition::key_eq(columns, key))
        .collect();
    render_group(dialect, &alternatives, " OR ", "1 = 0", sql, params);
}

/// Escape LIKE wildcards in `prefix` and append `%`.
pub fn like_prefix(prefix: &str) -> String {
    let mut out = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if c == LIKE_ESCAPE || c == '%' || c == '_' {
            out.push(LIKE_ESCAPE);
        }
        out.push(c);
    }
    out.push('%');
    out
}
