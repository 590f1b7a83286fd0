//! The storage capability contract.
//!
//! A [`Connection`] is everything the mapper needs from a database driver:
//! statement execution, generated-key readback, transaction and savepoint
//! primitives, and schema introspection. Connections are owned by exactly
//! one execution context and are never shared between threads, so every
//! method takes `&mut self` and nothing here is async.

use crate::dialect::Dialect;
use crate::error::{StorageError, StorageErrorKind};
use crate::row::Row;
use crate::types::ColumnInfo;
use crate::value::Value;

/// A synchronous database connection.
///
/// Only `dialect`, `execute`, `query` and `last_insert_id` are required;
/// everything else has a default expressed in terms of those and the
/// connection's [`Dialect`].
pub trait Connection {
    /// The backend profile this connection speaks.
    fn dialect(&self) -> Dialect;

    /// Execute a statement that returns no rows, yielding the affected row count.
    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64, StorageError>;

    /// Execute a query and return every row.
    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>, StorageError>;

    /// Key generated by the most recent INSERT on this connection.
    fn last_insert_id(&mut self) -> Result<Value, StorageError>;

    fn begin(&mut self) -> Result<(), StorageError> {
        let sql = self.dialect().begin_sql();
        self.execute(sql, &[]).map(|_| ())
    }

    fn commit(&mut self) -> Result<(), StorageError> {
        self.execute("COMMIT", &[]).map(|_| ())
    }

    fn rollback(&mut self) -> Result<(), StorageError> {
        self.execute("ROLLBACK", &[]).map(|_| ())
    }

    fn begin_savepoint(&mut self, name: &str) -> Result<(), StorageError> {
        let sql = self.dialect().savepoint_sql(name);
        self.execute(&sql, &[]).map(|_| ())
    }

    fn commit_savepoint(&mut self, name: &str) -> Result<(), StorageError> {
        let sql = self.dialect().release_savepoint_sql(name);
        self.execute(&sql, &[]).map(|_| ())
    }

    fn rollback_savepoint(&mut self, name: &str) -> Result<(), StorageError> {
        let sql = self.dialect().rollback_savepoint_sql(name);
        self.execute(&sql, &[]).map(|_| ())
    }

    /// Columns of `table` in ordinal order.
    fn describe_table(&mut self, table: &str) -> Result<Vec<ColumnInfo>, StorageError> {
        let Some(sql) = self.dialect().describe_table_sql() else {
            return Err(StorageError::new(
                StorageErrorKind::Other,
                format!("{:?} connections must implement describe_table", self.dialect()),
            ));
        };
        let rows = self.query(&sql, &[Value::from(table)])?;
        rows.iter().map(column_info_from_row).collect()
    }

    /// Primary-key column names of `table` in key order.
    ///
    /// An empty result means storage reports no key; the caller falls back
    /// to its configured default.
    fn read_pk(&mut self, table: &str) -> Result<Vec<String>, StorageError> {
        let Some(sql) = self.dialect().read_pk_sql() else {
            return Err(StorageError::new(
                StorageErrorKind::Other,
                format!("{:?} connections must implement read_pk", self.dialect()),
            ));
        };
        let rows = self.query(&sql, &[Value::from(table)])?;
        Ok(rows
            .iter()
            .filter_map(|row| row.get(0).and_then(Value::as_str).map(str::to_string))
            .collect())
    }

    /// Re-establish a dropped connection.
    fn reconnect(&mut self) -> Result<(), StorageError> {
        Err(StorageError::connection_lost(
            "this connection does not support reconnecting",
        ))
    }

    fn quote_name(&self, name: &str) -> String {
        self.dialect().quote(name)
    }
}

/// Map one row of [`Dialect::describe_table_sql`] output to column metadata.
fn column_info_from_row(row: &Row) -> Result<ColumnInfo, StorageError> {
    let text = |idx: usize| row.get(idx).and_then(Value::as_str).unwrap_or_default();
    let name = text(0);
    if name.is_empty() {
        return Err(StorageError::new(
            StorageErrorKind::Query,
            "introspection row without a column name",
        ));
    }
    let nullable = row.get(2).and_then(Value::as_bool).unwrap_or(true);
    let mut info = ColumnInfo::from_declared(name, text(1), nullable);
    if let Some(len) = row
        .get(3)
        .and_then(Value::as_i64)
        .and_then(|n| usize::try_from(n).ok())
    {
        info.max_length = Some(len);
    }
    info.has_default = row.get(4).and_then(Value::as_bool).unwrap_or(false);
    Ok(info)
}
