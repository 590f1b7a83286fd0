//! In-memory connection double for unit tests.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;
use std::sync::Arc;

use ascetic_core::{ColumnInfo, Connection, Dialect, Row, StorageError, Value};

use crate::registry::Registry;
use crate::session::Session;

#[derive(Default)]
struct State {
    tables: HashMap<String, Vec<ColumnInfo>>,
    pks: HashMap<String, Vec<String>>,
    executed: Vec<(String, Vec<Value>)>,
    queries: Vec<(String, Vec<Value>)>,
    results: VecDeque<Vec<Row>>,
    failures: VecDeque<StorageError>,
    last_insert_id: i64,
    reconnects: usize,
}

/// Scripted connection: answers introspection from registered tables,
/// records every statement, and replays queued results and failures.
///
/// Clones share state, so a test keeps one handle while the session owns
/// the other.
#[derive(Clone, Default)]
pub(crate) struct ScriptedConnection(Rc<RefCell<State>>);

impl ScriptedConnection {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn table(self, name: &str, columns: Vec<ColumnInfo>) -> Self {
        self.0.borrow_mut().tables.insert(name.to_string(), columns);
        self
    }

    pub(crate) fn primary_key<const N: usize>(self, table: &str, columns: [&str; N]) -> Self {
        self.0.borrow_mut().pks.insert(
            table.to_string(),
            columns.iter().map(|c| (*c).to_string()).collect(),
        );
        self
    }

    pub(crate) fn set_last_insert_id(&self, id: i64) {
        self.0.borrow_mut().last_insert_id = id;
    }

    pub(crate) fn push_rows(&self, rows: Vec<Row>) {
        self.0.borrow_mut().results.push_back(rows);
    }

    /// Make the next statement or query fail with `error`.
    pub(crate) fn fail_next(&self, error: StorageError) {
        self.0.borrow_mut().failures.push_back(error);
    }

    pub(crate) fn executed(&self) -> Vec<(String, Vec<Value>)> {
        self.0.borrow().executed.clone()
    }

    pub(crate) fn executed_sql(&self) -> Vec<String> {
        self.0.borrow().executed.iter().map(|(s, _)| s.clone()).collect()
    }

    pub(crate) fn queries(&self) -> Vec<(String, Vec<Value>)> {
        self.0.borrow().queries.clone()
    }

    pub(crate) fn reconnects(&self) -> usize {
        self.0.borrow().reconnects
    }

    fn take_failure(&self) -> Result<(), StorageError> {
        match self.0.borrow_mut().failures.pop_front() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Connection for ScriptedConnection {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64, StorageError> {
        self.take_failure()?;
        self.0
            .borrow_mut()
            .executed
            .push((sql.to_string(), params.to_vec()));
        Ok(1)
    }

    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>, StorageError> {
        self.take_failure()?;
        let mut state = self.0.borrow_mut();
        state.queries.push((sql.to_string(), params.to_vec()));
        Ok(state.results.pop_front().unwrap_or_default())
    }

    fn last_insert_id(&mut self) -> Result<Value, StorageError> {
        Ok(Value::Int(self.0.borrow().last_insert_id))
    }

    fn describe_table(&mut self, table: &str) -> Result<Vec<ColumnInfo>, StorageError> {
        Ok(self.0.borrow().tables.get(table).cloned().unwrap_or_default())
    }

    fn read_pk(&mut self, table: &str) -> Result<Vec<String>, StorageError> {
        Ok(self.0.borrow().pks.get(table).cloned().unwrap_or_default())
    }

    fn reconnect(&mut self) -> Result<(), StorageError> {
        self.0.borrow_mut().reconnects += 1;
        Ok(())
    }
}

pub(crate) fn session_with(conn: ScriptedConnection) -> Session {
    Session::new(Arc::new(Registry::new()), Box::new(conn))
}
