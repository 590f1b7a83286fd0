//! Shared fixtures for the SQLite integration tests.
#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::Arc;

use ascetic::prelude::*;
use ascetic::{ColumnInfo, Connection, Dialect, Row, StorageError};

/// In-memory SQLite connection that logs every statement and can be told
/// to fail.
///
/// Clones share the log, so a test keeps a handle after the session took
/// ownership of the connection. Injected failures never reach SQLite, and
/// `reconnect` only counts: the database behind the handle survives.
#[derive(Clone)]
pub struct Recorder {
    inner: Rc<RefCell<SqliteConnection>>,
    log: Rc<RefCell<Vec<String>>>,
    failures: Rc<RefCell<VecDeque<StorageError>>>,
    reconnects: Rc<Cell<usize>>,
}

impl Recorder {
    pub fn open(ddl: &str) -> Self {
        let mut conn = SqliteConnection::open_memory().unwrap();
        conn.execute_batch(ddl).unwrap();
        Self {
            inner: Rc::new(RefCell::new(conn)),
            log: Rc::default(),
            failures: Rc::default(),
            reconnects: Rc::default(),
        }
    }

    pub fn statements(&self) -> Vec<String> {
        self.log.borrow().clone()
    }

    pub fn clear_log(&self) {
        self.log.borrow_mut().clear();
    }

    /// Statements logged that start with `verb` (e.g. `"UPDATE"`).
    pub fn count(&self, verb: &str) -> usize {
        self.log
            .borrow()
            .iter()
            .filter(|sql| sql.starts_with(verb))
            .count()
    }

    pub fn fail_next(&self, error: StorageError) {
        self.failures.borrow_mut().push_back(error);
    }

    pub fn reconnects(&self) -> usize {
        self.reconnects.get()
    }

    fn take_failure(&self) -> Result<(), StorageError> {
        match self.failures.borrow_mut().pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

impl Connection for Recorder {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64, StorageError> {
        self.take_failure()?;
        self.log.borrow_mut().push(sql.to_string());
        self.inner.borrow_mut().execute(sql, params)
    }

    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>, StorageError> {
        self.take_failure()?;
        self.log.borrow_mut().push(sql.to_string());
        self.inner.borrow_mut().query(sql, params)
    }

    fn last_insert_id(&mut self) -> Result<Value, StorageError> {
        self.inner.borrow_mut().last_insert_id()
    }

    fn describe_table(&mut self, table: &str) -> Result<Vec<ColumnInfo>, StorageError> {
        self.inner.borrow_mut().describe_table(table)
    }

    fn read_pk(&mut self, table: &str) -> Result<Vec<String>, StorageError> {
        self.inner.borrow_mut().read_pk(table)
    }

    fn reconnect(&mut self) -> Result<(), StorageError> {
        self.reconnects.set(self.reconnects.get() + 1);
        Ok(())
    }
}

/// A session over a fresh in-memory database holding `ddl`.
pub fn session(ddl: &str) -> (Session, Recorder) {
    session_with(ddl, SessionConfig::default())
}

pub fn session_with(ddl: &str, config: SessionConfig) -> (Session, Recorder) {
    let recorder = Recorder::open(ddl);
    let session = SessionBuilder::new()
        .config(config)
        .build_with(recorder.clone());
    (session, recorder)
}

/// A second session on the same database and registry.
pub fn sibling(session: &Session, recorder: &Recorder, config: SessionConfig) -> Session {
    SessionBuilder::new()
        .registry(Arc::clone(session.registry()))
        .config(config)
        .build_with(recorder.clone())
}

pub fn record(pairs: &[(&str, Value)]) -> Record {
    pairs.iter().map(|(k, v)| (*k, v.clone())).collect()
}

/// `SELECT COUNT(*)` straight from storage.
pub fn count_rows(session: &Session, table: &str) -> i64 {
    let rows = session
        .query(&format!("SELECT COUNT(*) FROM {table}"), &[])
        .unwrap();
    rows[0].get(0).and_then(Value::as_i64).unwrap()
}

/// One column of one row straight from storage.
pub fn column_value(session: &Session, table: &str, column: &str, id: i64) -> Value {
    let rows = session
        .query(
            &format!("SELECT {column} FROM {table} WHERE id = ?"),
            &[Value::Int(id)],
        )
        .unwrap();
    rows[0].get(0).cloned().unwrap()
}

pub const AUTHOR_BOOK_DDL: &str = "
    CREATE TABLE author (
        id INTEGER PRIMARY KEY,
        first_name VARCHAR(40) NOT NULL,
        last_name VARCHAR(40) NOT NULL,
        bio TEXT
    );
    CREATE TABLE book (
        id INTEGER PRIMARY KEY,
        title VARCHAR(100) NOT NULL,
        author_id INTEGER,
        editor_id INTEGER
    );
";

/// Author and Book mappers: `Book.author` cascades, `Book.editor` nulls.
pub fn register_authors_and_books(session: &Session) {
    MapperBuilder::new("Author").register(session).unwrap();
    MapperBuilder::new("Book")
        .relation(
            "author",
            ForeignKey::to("Author").on_delete(OnDelete::Cascade),
        )
        .relation(
            "editor",
            ForeignKey::to("Author")
                .local(["editor_id"])
                .on_delete(OnDelete::SetNull)
                .related_name("edited_books"),
        )
        .register(session)
        .unwrap();
}

pub fn new_author(session: &Session, first: &str, last: &str) -> Instance {
    let mapper = session.mapper("Author").unwrap();
    let author = mapper.create(record(&[
        ("first_name", Value::from(first)),
        ("last_name", Value::from(last)),
    ]));
    mapper.save(session, &author).unwrap();
    author
}

pub fn new_book(session: &Session, title: &str, author: &Instance) -> Instance {
    let mapper = session.mapper("Book").unwrap();
    let book = mapper.create(record(&[("title", Value::from(title))]));
    mapper
        .set_related(session, &book, "author", author.clone())
        .unwrap();
    mapper.save(session, &book).unwrap();
    book
}
