//! SELECT query builder.
//!
//! # Example
//!
//! ```ignore
//! let (sql, params) = Select::from("article")
//!     .column(Column::qualified("article", "id"))
//!     .inner_join("news", vec![(Column::qualified("article", "id"), Column::qualified("news", "id"))])
//!     .filter(Condition::eq("lang", "en"))
//!     .order_by(Column::new("id"))
//!     .limit(10)
//!     .build_with_dialect(Dialect::Sqlite);
//! ```

use ascetic_core::{Connection, Dialect, Row, StorageError, Value};

use crate::condition::{Column, Condition};

/// One projected column, optionally aliased.
#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    pub column: Column,
    pub alias: Option<String>,
}

/// An INNER JOIN onto `table` with equality on each column pair.
#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub table: String,
    pub on: Vec<(Column, Column)>,
}

/// ORDER BY item.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub column: Column,
    pub descending: bool,
}

/// SELECT query builder.
#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    table: String,
    projection: Vec<Projection>,
    joins: Vec<Join>,
    condition: Option<Condition>,
    order_by: Vec<OrderBy>,
    limit: Option<u64>,
    offset: Option<u64>,
}

impl Select {
    /// Start a query over `table`. With no projected columns, selects `*`.
    pub fn from(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            projection: Vec::new(),
            joins: Vec::new(),
            condition: None,
            order_by: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn column(mut self, column: impl Into<Column>) -> Self {
        self.projection.push(Projection {
            column: column.into(),
            alias: None,
        });
        self
    }

    pub fn column_as(mut self, column: impl Into<Column>, alias: impl Into<String>) -> Self {
        self.projection.push(Projection {
            column: column.into(),
            alias: Some(alias.into()),
        });
        self
    }

    pub fn inner_join(mut self, table: impl Into<String>, on: Vec<(Column, Column)>) -> Self {
        self.joins.push(Join {
            table: table.into(),
            on,
        });
        self
    }

    /// Add a WHERE condition, AND-ed with any existing one.
    pub fn filter(mut self, condition: Condition) -> Self {
        self.condition = Some(match self.condition.take() {
            Some(existing) => existing.and(condition),
            None => condition,
        });
        self
    }

    pub fn condition(&self) -> Option<&Condition> {
        self.condition.as_ref()
    }

    pub fn order_by(mut self, column: impl Into<Column>) -> Self {
        self.order_by.push(OrderBy {
            column: column.into(),
            descending: false,
        });
        self
    }

    pub fn order_by_desc(mut self, column: impl Into<Column>) -> Self {
        self.order_by.push(OrderBy {
            column: column.into(),
            descending: true,
        });
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    fn push_from(&self, dialect: Dialect, sql: &mut String, params: &mut Vec<Value>) {
        sql.push_str(" FROM ");
        sql.push_str(&dialect.quote(&self.table));
        for join in &self.joins {
            sql.push_str(" INNER JOIN ");
            sql.push_str(&dialect.quote(&join.table));
            sql.push_str(" ON ");
            let on: Vec<String> = join
                .on
                .iter()
                .map(|(l, r)| format!("{} = {}", l.to_sql(dialect), r.to_sql(dialect)))
                .collect();
            sql.push_str(&on.join(" AND "));
        }
        if let Some(condition) = &self.condition {
            sql.push_str(" WHERE ");
            condition.render(dialect, sql, params);
        }
    }

    /// Build the SELECT SQL and parameters with the default dialect.
    pub fn build(&self) -> (String, Vec<Value>) {
        self.build_with_dialect(Dialect::default())
    }

    /// Build the SELECT SQL and parameters with a specific dialect.
    pub fn build_with_dialect(&self, dialect: Dialect) -> (String, Vec<Value>) {
        let mut sql = String::from("SELECT ");
        let mut params = Vec::new();

        if self.projection.is_empty() {
            sql.push('*');
        } else {
            let cols: Vec<String> = self
                .projection
                .iter()
                .map(|p| match &p.alias {
                    Some(alias) => format!("{} AS {}", p.column.to_sql(dialect), dialect.quote(alias)),
                    None => p.column.to_sql(dialect),
                })
                .collect();
            sql.push_str(&cols.join(", "));
        }

        self.push_from(dialect, &mut sql, &mut params);

        if !self.order_by.is_empty() {
            let items: Vec<String> = self
                .order_by
                .iter()
                .map(|o| {
                    let col = o.column.to_sql(dialect);
                    if o.descending { format!("{col} DESC") } else { col }
                })
                .collect();
            sql.push_str(" ORDER BY ");
            sql.push_str(&items.join(", "));
        }

        match (self.limit, self.offset) {
            (Some(limit), _) => sql.push_str(&format!(" LIMIT {limit}")),
            // Offset alone is not valid SQLite or MySQL.
            (None, Some(_)) => match dialect {
                Dialect::Sqlite => sql.push_str(" LIMIT -1"),
                Dialect::MySql => sql.push_str(" LIMIT 18446744073709551615"),
                Dialect::Postgres => {}
            },
            (None, None) => {}
        }
        if let Some(offset) = self.offset {
            sql.push_str(&format!(" OFFSET {offset}"));
        }

        (sql, params)
    }

    /// Build a `COUNT(*)` over the same rows, ignoring projection and order.
    pub fn count_with_dialect(&self, dialect: Dialect) -> (String, Vec<Value>) {
        if self.limit.is_some() || self.offset.is_some() {
            let inner = Select {
                order_by: Vec::new(),
                ..self.clone()
            };
            let (inner_sql, params) = inner.build_with_dialect(dialect);
            return (
                format!("SELECT COUNT(*) FROM ({inner_sql}) AS {}", dialect.quote("sub")),
                params,
            );
        }
        let mut sql = String::from("SELECT COUNT(*)");
        let mut params = Vec::new();
        self.push_from(dialect, &mut sql, &mut params);
        (sql, params)
    }

    /// Execute and map every row through `map`.
    ///
    /// `map` is the per-row hydration hook: it turns a raw [`Row`] into a
    /// domain value, and may fail with the caller's own error type.
    pub fn fetch<C, T, E, F>(&self, conn: &mut C, mut map: F) -> Result<Vec<T>, E>
    where
        C: Connection + ?Sized,
        E: From<StorageError>,
        F: FnMut(Row) -> Result<T, E>,
    {
        let (sql, params) = self.build_with_dialect(conn.dialect());
        tracing::debug!(sql = %sql, "fetch");
        let rows = conn.query(&sql, &params)?;
        rows.into_iter().map(&mut map).collect()
    }

    /// Execute the COUNT form.
    pub fn count<C>(&self, conn: &mut C) -> Result<u64, StorageError>
    where
        C: Connection + ?Sized,
    {
        let (sql, params) = self.count_with_dialect(conn.dialect());
        let rows = conn.query(&sql, &params)?;
        Ok(count_from_rows(&rows))
    }
}

/// Read the single integer a `COUNT(*)` query returns.
pub fn count_from_rows(rows: &[Row]) -> u64 {
    rows.first()
        .and_then(|r| r.get(0))
        .and_then(Value::as_i64)
        .and_then(|n| u64::try_from(n).ok())
        .unwrap_or(0)
}
