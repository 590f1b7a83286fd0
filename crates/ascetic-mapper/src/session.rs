//! Sessions: one connection, its identity map, and its transaction stack.
//!
//! A [`Session`] belongs to one execution context. It is deliberately not
//! `Send`: instances are `Rc`-based and the identity map must never be
//! observed from two threads. Open one session per thread against a shared
//! [`Registry`].
//!
//! # Example
//!
//! ```ignore
//! let registry = Arc::new(Registry::new());
//! let session = Session::new(Arc::clone(&registry), Box::new(SqliteConnection::open_memory()?));
//!
//! session.transaction(|s| {
//!     let author = s.mapper("Author")?.get(s, 1)?;
//!     author.set("last_name", "Byron");
//!     s.mapper("Author")?.save(s, &author)
//! })?;
//! ```

use std::cell::{Ref, RefCell, RefMut};
use std::sync::Arc;

use ascetic_core::{Connection, Dialect, Error, Result, Row, StorageError, Value};
use ascetic_query::Select;

use crate::config::SessionConfig;
use crate::identity_map::IdentityMap;
use crate::mapper::Mapper;
use crate::registry::Registry;
use crate::transaction::{TransactionNode, savepoint_name};

/// The central per-connection object.
pub struct Session {
    registry: Arc<Registry>,
    connection: RefCell<Box<dyn Connection>>,
    identity_map: RefCell<IdentityMap>,
    transactions: RefCell<Vec<TransactionNode>>,
    config: SessionConfig,
}

impl Session {
    /// Create a new session from an existing connection.
    pub fn new(registry: Arc<Registry>, connection: Box<dyn Connection>) -> Self {
        Self::with_config(registry, connection, SessionConfig::default())
    }

    /// Create a new session with custom configuration.
    pub fn with_config(
        registry: Arc<Registry>,
        connection: Box<dyn Connection>,
        config: SessionConfig,
    ) -> Self {
        let identity_map =
            IdentityMap::with_capacity(config.isolation_level, config.identity_map_capacity);
        Self {
            registry,
            connection: RefCell::new(connection),
            identity_map: RefCell::new(identity_map),
            transactions: RefCell::new(Vec::new()),
            config,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Get the session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Look up a registered mapper by model name.
    pub fn mapper(&self, model: &str) -> Result<Arc<Mapper>> {
        self.registry.mapper(model)
    }

    pub fn dialect(&self) -> Dialect {
        self.connection.borrow().dialect()
    }

    pub fn quote_name(&self, name: &str) -> String {
        self.connection.borrow().quote_name(name)
    }

    /// Borrow the identity map. Do not hold the guard across mapper calls.
    pub fn identity_map(&self) -> RefMut<'_, IdentityMap> {
        self.identity_map.borrow_mut()
    }

    /// Borrow the raw connection. Do not hold the guard across mapper calls.
    pub fn connection(&self) -> Ref<'_, Box<dyn Connection>> {
        self.connection.borrow()
    }

    // ========================================================================
    // Statement Execution
    // ========================================================================

    /// Run `op`, reconnecting and retrying once when the failure allows it.
    ///
    /// A lost connection is retried outside a transaction, or inside one
    /// when `always_reconnect` is set; anything else propagates unchanged.
    fn with_retry<T>(
        &self,
        op: impl Fn(&mut dyn Connection) -> std::result::Result<T, StorageError>,
    ) -> Result<T> {
        let mut conn = self.connection.borrow_mut();
        match op(conn.as_mut()) {
            Ok(value) => Ok(value),
            Err(e) if e.is_reconnect_eligible() && self.may_reconnect() => {
                tracing::warn!(error = %e, "connection lost, reconnecting");
                conn.reconnect()?;
                Ok(op(conn.as_mut())?)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn may_reconnect(&self) -> bool {
        !self.in_transaction() || self.config.always_reconnect
    }

    /// Execute a statement that returns no rows.
    pub fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        if sql.is_empty() {
            return Ok(0);
        }
        tracing::debug!(sql, params = params.len(), "execute");
        self.with_retry(|conn| conn.execute(sql, params))
    }

    /// Execute a query and return its rows.
    pub fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        tracing::debug!(sql, params = params.len(), "query");
        self.with_retry(|conn| conn.query(sql, params))
    }

    /// Run `select` and map every row through `map`.
    ///
    /// No borrow of the connection is held while `map` runs, so it may
    /// itself issue queries.
    pub fn fetch<T>(&self, select: &Select, mut map: impl FnMut(Row) -> Result<T>) -> Result<Vec<T>> {
        let (sql, params) = select.build_with_dialect(self.dialect());
        let rows = self.query(&sql, &params)?;
        rows.into_iter().map(&mut map).collect()
    }

    pub fn last_insert_id(&self) -> Result<Value> {
        Ok(self.connection.borrow_mut().last_insert_id()?)
    }

    pub fn describe_table(&self, table: &str) -> Result<Vec<ascetic_core::ColumnInfo>> {
        self.with_retry(|conn| conn.describe_table(table))
    }

    pub fn read_pk(&self, table: &str) -> Result<Vec<String>> {
        self.with_retry(|conn| conn.read_pk(table))
    }

    // ========================================================================
    // Transaction Management
    // ========================================================================

    /// Whether any transaction node is open.
    pub fn in_transaction(&self) -> bool {
        !self.transactions.borrow().is_empty()
    }

    /// Nesting depth: 0 outside a transaction, 1 in the root transaction.
    pub fn transaction_depth(&self) -> usize {
        self.transactions.borrow().len()
    }

    /// Begin the root transaction, or a savepoint when one is already open.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn begin(&self) -> Result<()> {
        if self.in_transaction() {
            let name = savepoint_name();
            tracing::debug!(savepoint = %name, "Creating savepoint");
            self.connection.borrow_mut().begin_savepoint(&name)?;
            self.transactions
                .borrow_mut()
                .push(TransactionNode::savepoint(name));
        } else {
            tracing::info!("Beginning transaction");
            self.with_retry(|conn| conn.begin())?;
            self.transactions.borrow_mut().push(TransactionNode::root());
        }
        Ok(())
    }

    /// Commit the innermost node.
    ///
    /// Only the root commit clears the identity map; releasing a savepoint
    /// leaves the outer read view intact.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn commit(&self) -> Result<()> {
        let node = self.pop_node("commit")?;
        let result = match node.savepoint_name() {
            Some(name) => self.connection.borrow_mut().commit_savepoint(name),
            None => {
                tracing::info!("Committing transaction");
                self.connection.borrow_mut().commit()
            }
        };
        self.finish_node(node, result)
    }

    /// Roll back the innermost node.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn rollback(&self) -> Result<()> {
        let node = self.pop_node("rollback")?;
        let result = match node.savepoint_name() {
            Some(name) => self.connection.borrow_mut().rollback_savepoint(name),
            None => {
                tracing::info!("Rolling back transaction");
                self.connection.borrow_mut().rollback()
            }
        };
        self.finish_node(node, result)
    }

    fn pop_node(&self, action: &str) -> Result<TransactionNode> {
        self.transactions
            .borrow_mut()
            .pop()
            .ok_or_else(|| Error::mapping(format!("{action} without an active transaction")))
    }

    fn finish_node(
        &self,
        node: TransactionNode,
        result: std::result::Result<(), StorageError>,
    ) -> Result<()> {
        match result {
            Ok(()) => {
                if node.is_root() {
                    self.identity_map.borrow_mut().clear();
                }
                Ok(())
            }
            Err(e) => {
                // Still open on the server; leave it for the caller to roll back.
                self.transactions.borrow_mut().push(node);
                Err(e.into())
            }
        }
    }

    /// Run `f` inside a transaction (or savepoint), committing on `Ok` and
    /// rolling back on `Err`.
    pub fn transaction<T>(&self, f: impl FnOnce(&Session) -> Result<T>) -> Result<T> {
        self.begin()?;
        match f(self) {
            Ok(value) => {
                self.commit()?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_err) = self.rollback() {
                    tracing::warn!(error = %rollback_err, "rollback after failure also failed");
                }
                Err(e)
            }
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("depth", &self.transaction_depth())
            .field("identity_map", &*self.identity_map.borrow())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
