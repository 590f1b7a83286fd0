//! Query builders for INSERT, UPDATE, DELETE operations.
//!
//! Statements are described by table and column names rather than by a
//! compile-time model type, because the mapper derives its columns from
//! schema introspection at run time.

use ascetic_core::{Connection, Dialect, StorageError, Value};

use crate::condition::Condition;

/// INSERT query builder.
///
/// # Example
///
/// ```ignore
/// let (sql, params) = Insert::into("author")
///     .value("first_name", "Ada")
///     .value("last_name", "Lovelace")
///     .build_with_dialect(Dialect::Sqlite);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Insert {
    table: String,
    values: Vec<(String, Value)>,
}

impl Insert {
    /// Create a new INSERT builder for the given table.
    pub fn into(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            values: Vec::new(),
        }
    }

    /// Add a column value.
    pub fn value(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.push((column.into(), value.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Build the INSERT SQL and parameters with default dialect.
    pub fn build(&self) -> (String, Vec<Value>) {
        self.build_with_dialect(Dialect::default())
    }

    /// Build the INSERT SQL and parameters with specific dialect.
    ///
    /// With no columns at all, renders the dialect's all-defaults form.
    pub fn build_with_dialect(&self, dialect: Dialect) -> (String, Vec<Value>) {
        let table = dialect.quote(&self.table);
        if self.values.is_empty() {
            let sql = match dialect {
                Dialect::MySql => format!("INSERT INTO {table} () VALUES ()"),
                Dialect::Sqlite | Dialect::Postgres => {
                    format!("INSERT INTO {table} DEFAULT VALUES")
                }
            };
            return (sql, Vec::new());
        }

        let columns: Vec<String> = self.values.iter().map(|(c, _)| dialect.quote(c)).collect();
        let params: Vec<Value> = self.values.iter().map(|(_, v)| v.clone()).collect();
        let placeholders: Vec<&str> = (1..=params.len()).map(|i| dialect.placeholder(i)).collect();

        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table,
            columns.join(", "),
            placeholders.join(", ")
        );
        (sql, params)
    }

    /// Execute the INSERT and return rows affected.
    pub fn execute<C: Connection + ?Sized>(&self, conn: &mut C) -> Result<u64, StorageError> {
        let (sql, params) = self.build_with_dialect(conn.dialect());
        conn.execute(&sql, &params)
    }
}

/// One item of an UPDATE's SET list.
#[derive(Debug, Clone, PartialEq)]
pub enum Assignment {
    /// `column = <placeholder>`.
    Value { column: String, value: Value },
    /// `column = <sql>`, where `sql` already uses the target dialect's
    /// placeholders for `params`.
    Expr {
        column: String,
        sql: String,
        params: Vec<Value>,
    },
}

/// UPDATE query builder.
///
/// # Example
///
/// ```ignore
/// let (sql, params) = Update::table("author")
///     .set("last_name", "Byron")
///     .filter(Condition::eq("id", 42))
///     .build_with_dialect(Dialect::Sqlite);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    table: String,
    assignments: Vec<Assignment>,
    condition: Option<Condition>,
}

impl Update {
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            assignments: Vec::new(),
            condition: None,
        }
    }

    /// Set a column to a specific value.
    pub fn set(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.assignments.push(Assignment::Value {
            column: column.into(),
            value: value.into(),
        });
        self
    }

    /// Set a column to a SQL expression.
    pub fn set_expr(
        mut self,
        column: impl Into<String>,
        sql: impl Into<String>,
        params: Vec<Value>,
    ) -> Self {
        self.assignments.push(Assignment::Expr {
            column: column.into(),
            sql: sql.into(),
            params,
        });
        self
    }

    /// Add a WHERE condition.
    pub fn filter(mut self, condition: Condition) -> Self {
        self.condition = Some(match self.condition.take() {
            Some(existing) => existing.and(condition),
            None => condition,
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    /// Build the UPDATE SQL and parameters with default dialect.
    pub fn build(&self) -> (String, Vec<Value>) {
        self.build_with_dialect(Dialect::default())
    }

    /// Build the UPDATE SQL and parameters with specific dialect.
    ///
    /// An empty SET list yields an empty statement.
    pub fn build_with_dialect(&self, dialect: Dialect) -> (String, Vec<Value>) {
        if self.assignments.is_empty() {
            return (String::new(), Vec::new());
        }

        let mut params = Vec::new();
        let mut set_clauses = Vec::with_capacity(self.assignments.len());
        for assignment in &self.assignments {
            match assignment {
                Assignment::Value { column, value } => {
                    params.push(value.clone());
                    set_clauses.push(format!(
                        "{} = {}",
                        dialect.quote(column),
                        dialect.placeholder(params.len())
                    ));
                }
                Assignment::Expr {
                    column,
                    sql,
                    params: expr_params,
                } => {
                    params.extend(expr_params.iter().cloned());
                    set_clauses.push(format!("{} = {}", dialect.quote(column), sql));
                }
            }
        }

        let mut sql = format!(
            "UPDATE {} SET {}",
            dialect.quote(&self.table),
            set_clauses.join(", ")
        );
        if let Some(condition) = &self.condition {
            sql.push_str(" WHERE ");
            condition.render(dialect, &mut sql, &mut params);
        }
        (sql, params)
    }

    /// Execute the UPDATE and return rows affected. An empty SET is skipped.
    pub fn execute<C: Connection + ?Sized>(&self, conn: &mut C) -> Result<u64, StorageError> {
        if self.is_empty() {
            return Ok(0);
        }
        let (sql, params) = self.build_with_dialect(conn.dialect());
        conn.execute(&sql, &params)
    }
}

/// DELETE query builder.
#[derive(Debug, Clone, PartialEq)]
pub struct Delete {
    table: String,
    condition: Option<Condition>,
}

impl Delete {
    pub fn from(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            condition: None,
        }
    }

    /// Add a WHERE condition.
    pub fn filter(mut self, condition: Condition) -> Self {
        self.condition = Some(match self.condition.take() {
            Some(existing) => existing.and(condition),
            None => condition,
        });
        self
    }

    /// Build the DELETE SQL and parameters with default dialect.
    pub fn build(&self) -> (String, Vec<Value>) {
        self.build_with_dialect(Dialect::default())
    }

    /// Build the DELETE SQL and parameters with specific dialect.
    pub fn build_with_dialect(&self, dialect: Dialect) -> (String, Vec<Value>) {
        let mut sql = format!("DELETE FROM {}", dialect.quote(&self.table));
        let mut params = Vec::new();
        if let Some(condition) = &self.condition {
            sql.push_str(" WHERE ");
            condition.render(dialect, &mut sql, &mut params);
        }
        (sql, params)
    }

    /// Execute the DELETE and return rows affected.
    pub fn execute<C: Connection + ?Sized>(&self, conn: &mut C) -> Result<u64, StorageError> {
        let (sql, params) = self.build_with_dialect(conn.dialect());
        conn.execute(&sql, &params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ascetic_core::Row;

    #[derive(Default)]
    struct DummyConnection {
        executed: Vec<(String, Vec<Value>)>,
    }

    impl Connection for DummyConnection {
        fn dialect(&self) -> Dialect {
            Dialect::Sqlite
        }

        fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64, StorageError> {
            self.executed.push((sql.to_string(), params.to_vec()));
            Ok(1)
        }

        fn query(&mut self, _sql: &str, _params: &[Value]) -> Result<Vec<Row>, StorageError> {
            Ok(Vec::new())
        }

        fn last_insert_id(&mut self) -> Result<Value, StorageError> {
            Ok(Value::Int(1))
        }
    }

    #[test]
    fn test_insert_basic() {
        let (sql, params) = Insert::into("heroes")
            .value("name", "Spider-Man")
            .value("age", 25)
            .build();
        assert_eq!(sql, "INSERT INTO \"heroes\" (\"name\", \"age\") VALUES (?, ?)");
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn test_insert_mysql_dialect() {
        let (sql, _) = Insert::into("heroes")
            .value("name", "x")
            .build_with_dialect(Dialect::MySql);
        assert_eq!(sql, "INSERT INTO `heroes` (`name`) VALUES (%s)");
    }

    #[test]
    fn test_insert_default_values() {
        assert_eq!(
            Insert::into("t").build_with_dialect(Dialect::Sqlite).0,
            "INSERT INTO \"t\" DEFAULT VALUES"
        );
        assert_eq!(
            Insert::into("t").build_with_dialect(Dialect::MySql).0,
            "INSERT INTO `t` () VALUES ()"
        );
    }

    #[test]
    fn test_update_with_expression() {
        let (sql, params) = Update::table("node")
            .set_expr(
                "tree_path",
                "? || SUBSTR(\"tree_path\", ?)",
                vec![Value::from("0000000003/"), Value::Int(12)],
            )
            .filter(Condition::starts_with("tree_path", "0000000001/"))
            .build();
        assert_eq!(
            sql,
            "UPDATE \"node\" SET \"tree_path\" = ? || SUBSTR(\"tree_path\", ?) \
             WHERE \"tree_path\" LIKE ? ESCAPE '!'"
        );
        assert_eq!(params.len(), 3);
        assert_eq!(params[2], Value::from("0000000001/%"));
    }

    #[test]
    fn test_update_empty_set_is_skipped() {
        let mut conn = DummyConnection::default();
        let update = Update::table("t").filter(Condition::eq("id", 1));
        assert_eq!(update.build(), (String::new(), Vec::new()));
        assert_eq!(update.execute(&mut conn).unwrap(), 0);
        assert!(conn.executed.is_empty());
    }

    #[test]
    fn test_update_params_order() {
        let (sql, params) = Update::table("t")
            .set("a", 1)
            .set("b", 2)
            .filter(Condition::eq("id", 3))
            .build();
        assert_eq!(sql, "UPDATE \"t\" SET \"a\" = ?, \"b\" = ? WHERE \"id\" = ?");
        assert_eq!(params, vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
    }

    #[test]
    fn test_delete_executes() {
        let mut conn = DummyConnection::default();
        let affected = Delete::from("t")
            .filter(Condition::eq("id", 7))
            .execute(&mut conn)
            .unwrap();
        assert_eq!(affected, 1);
        assert_eq!(conn.executed[0].0, "DELETE FROM \"t\" WHERE \"id\" = ?");
    }
}
