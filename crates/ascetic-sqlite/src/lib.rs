//! SQLite connection for Ascetic.
//!
//! [`SqliteConnection`] implements [`ascetic_core::Connection`] on top of
//! `rusqlite` with the bundled SQLite library, so no system installation is
//! needed.
//!
//! # Example
//!
//! ```ignore
//! use ascetic_sqlite::SqliteConnection;
//!
//! let mut conn = SqliteConnection::open_memory()?;
//! conn.execute_batch("CREATE TABLE author (id INTEGER PRIMARY KEY, name TEXT)")?;
//! let session = Session::new(registry, Box::new(conn));
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use ascetic_core::{
    ColumnInfo, Connection, Dialect, Row, SqlType, StorageError, StorageErrorKind, Value,
};
use rusqlite::types::{Value as SqliteValue, ValueRef};
use rusqlite::{ErrorCode, params_from_iter};

/// Statements run on every freshly opened connection.
const INITIAL_SQL: &str = "PRAGMA foreign_keys = 1; PRAGMA busy_timeout = 1000;";

/// Where a connection was opened from, so it can be reopened.
#[derive(Debug, Clone)]
enum Location {
    Memory,
    File(PathBuf),
}

/// A single SQLite connection.
pub struct SqliteConnection {
    conn: rusqlite::Connection,
    location: Location,
}

impl std::fmt::Debug for SqliteConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteConnection")
            .field("location", &self.location)
            .finish_non_exhaustive()
    }
}

impl SqliteConnection {
    /// Open a private in-memory database.
    ///
    /// Reconnecting an in-memory connection yields a new, empty database.
    pub fn open_memory() -> Result<Self, StorageError> {
        Self::open_at(Location::Memory)
    }

    /// Open (or create) the database file at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        Self::open_at(Location::File(path.as_ref().to_path_buf()))
    }

    fn open_at(location: Location) -> Result<Self, StorageError> {
        let conn = connect(&location)?;
        tracing::debug!(?location, "opened sqlite connection");
        Ok(Self { conn, location })
    }

    /// Run several `;`-separated statements without parameters.
    pub fn execute_batch(&mut self, sql: &str) -> Result<(), StorageError> {
        tracing::trace!(sql, "execute batch");
        self.conn.execute_batch(sql).map_err(storage_error)
    }

    /// Borrow the underlying `rusqlite` connection.
    pub fn inner(&self) -> &rusqlite::Connection {
        &self.conn
    }
}

fn connect(location: &Location) -> Result<rusqlite::Connection, StorageError> {
    let conn = match location {
        Location::Memory => rusqlite::Connection::open_in_memory(),
        Location::File(path) => rusqlite::Connection::open(path),
    }
    .map_err(storage_error)?;
    conn.execute_batch(INITIAL_SQL).map_err(storage_error)?;
    Ok(conn)
}

impl Connection for SqliteConnection {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64, StorageError> {
        tracing::trace!(sql, params = params.len(), "sqlite execute");
        let changed = self
            .conn
            .execute(sql, params_from_iter(params.iter().map(to_sqlite)))
            .map_err(storage_error)?;
        Ok(changed as u64)
    }

    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>, StorageError> {
        tracing::trace!(sql, params = params.len(), "sqlite query");
        let mut stmt = self.conn.prepare(sql).map_err(storage_error)?;
        let columns: Arc<[String]> = stmt
            .column_names()
            .into_iter()
            .map(str::to_string)
            .collect::<Vec<_>>()
            .into();
        let width = columns.len();

        let mut rows = stmt
            .query(params_from_iter(params.iter().map(to_sqlite)))
            .map_err(storage_error)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(storage_error)? {
            let values = (0..width)
                .map(|idx| row.get_ref(idx).map(from_sqlite))
                .collect::<Result<Vec<_>, _>>()
                .map_err(storage_error)?;
            out.push(Row::new(Arc::clone(&columns), values));
        }
        Ok(out)
    }

    fn last_insert_id(&mut self) -> Result<Value, StorageError> {
        Ok(Value::Int(self.conn.last_insert_rowid()))
    }

    fn describe_table(&mut self, table: &str) -> Result<Vec<ColumnInfo>, StorageError> {
        let rows = self.query(
            "SELECT name, type, \"notnull\", dflt_value IS NOT NULL \
             FROM pragma_table_info(?) ORDER BY cid",
            &[Value::from(table)],
        )?;
        rows.iter().map(column_from_pragma).collect()
    }

    fn read_pk(&mut self, table: &str) -> Result<Vec<String>, StorageError> {
        let rows = self.query(
            "SELECT name FROM pragma_table_info(?) WHERE pk > 0 ORDER BY pk",
            &[Value::from(table)],
        )?;
        Ok(rows
            .iter()
            .filter_map(|row| row.get(0).and_then(Value::as_str).map(str::to_string))
            .collect())
    }

    fn reconnect(&mut self) -> Result<(), StorageError> {
        tracing::info!(location = ?self.location, "reopening sqlite connection");
        self.conn = connect(&self.location)?;
        Ok(())
    }
}

fn column_from_pragma(row: &Row) -> Result<ColumnInfo, StorageError> {
    let Some(name) = row.get(0).and_then(Value::as_str) else {
        return Err(StorageError::new(
            StorageErrorKind::Query,
            "table_info row without a column name",
        ));
    };
    let declared = row.get(1).and_then(Value::as_str).unwrap_or_default();
    let not_null = row.get(2).and_then(Value::as_i64).unwrap_or(0) != 0;
    let has_default = row.get(3).and_then(Value::as_i64).unwrap_or(0) != 0;

    let mut info = ColumnInfo::from_declared(name, declared, !not_null);
    // Columns declared without a type take any value.
    if declared.is_empty() {
        info.sql_type = SqlType::Other;
    }
    if has_default {
        info = info.with_default();
    }
    Ok(info)
}

fn to_sqlite(value: &Value) -> SqliteValue {
    match value {
        Value::Null => SqliteValue::Null,
        Value::Bool(b) => SqliteValue::Integer(i64::from(*b)),
        Value::Int(i) => SqliteValue::Integer(*i),
        Value::Float(f) => SqliteValue::Real(*f),
        Value::Text(s) => SqliteValue::Text(s.clone()),
        Value::Bytes(b) => SqliteValue::Blob(b.clone()),
        Value::Json(j) => SqliteValue::Text(j.to_string()),
    }
}

fn from_sqlite(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Int(i),
        ValueRef::Real(f) => Value::Float(f),
        ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::Bytes(b.to_vec()),
    }
}

/// Classify a `rusqlite` error for the session's retry policy.
fn storage_error(error: rusqlite::Error) -> StorageError {
    let kind = match &error {
        rusqlite::Error::SqliteFailure(failure, _) => match failure.code {
            ErrorCode::ConstraintViolation => StorageErrorKind::Constraint,
            ErrorCode::CannotOpen
            | ErrorCode::SystemIoFailure
            | ErrorCode::NotADatabase
            | ErrorCode::DatabaseCorrupt => StorageErrorKind::ConnectionLost,
            _ => StorageErrorKind::Query,
        },
        _ => StorageErrorKind::Other,
    };
    StorageError::with_source(kind, error)
}
