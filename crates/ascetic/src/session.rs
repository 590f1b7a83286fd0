//! Session re-exports and a builder.
//!
//! [`Session`] lives in `ascetic-mapper`; this module exposes it from the
//! façade together with [`SessionBuilder`], which assembles registry,
//! configuration and connection in one expression.
//!
//! # Example
//!
//! ```rust,ignore
//! use ascetic::prelude::*;
//!
//! let registry = Arc::new(Registry::new());
//! let session = SessionBuilder::new()
//!     .registry(Arc::clone(&registry))
//!     .isolation_level(IsolationLevel::Serializable)
//!     .build_with(SqliteConnection::open_memory()?);
//! ```

use std::sync::Arc;

use ascetic_core::Connection;

pub use ascetic_mapper::{IsolationLevel, Registry, Session, SessionConfig};

/// Builder for [`Session`].
///
/// Without an explicit registry every built session gets a fresh one;
/// sessions that should see the same mappers must share a registry.
#[derive(Debug, Default)]
pub struct SessionBuilder {
    registry: Option<Arc<Registry>>,
    config: SessionConfig,
}

impl SessionBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Share an existing registry.
    #[must_use]
    pub fn registry(mut self, registry: Arc<Registry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Replace the whole configuration, e.g. one deserialized from a file.
    #[must_use]
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn isolation_level(mut self, level: IsolationLevel) -> Self {
        self.config.isolation_level = level;
        self
    }

    #[must_use]
    pub fn identity_map_capacity(mut self, capacity: usize) -> Self {
        self.config.identity_map_capacity = capacity;
        self
    }

    /// Reconnect on a lost connection even inside a transaction.
    #[must_use]
    pub fn always_reconnect(mut self, enabled: bool) -> Self {
        self.config.always_reconnect = enabled;
        self
    }

    /// Primary key name assumed when storage reports none.
    #[must_use]
    pub fn default_pk(mut self, name: impl Into<String>) -> Self {
        self.config.default_pk = name.into();
        self
    }

    /// Build the session over `connection`.
    pub fn build_with(self, connection: impl Connection + 'static) -> Session {
        let registry = self.registry.unwrap_or_default();
        tracing::debug!(
            isolation = ?self.config.isolation_level,
            capacity = self.config.identity_map_capacity,
            "building session"
        );
        Session::with_config(registry, Box::new(connection), self.config)
    }

    /// Build the session over a private in-memory SQLite database.
    #[cfg(feature = "sqlite")]
    pub fn build_memory(self) -> ascetic_core::Result<Session> {
        let connection = ascetic_sqlite::SqliteConnection::open_memory()?;
        Ok(self.build_with(connection))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ascetic_core::{Dialect, Row, StorageError, Value};

    struct Silent;

    impl Connection for Silent {
        fn dialect(&self) -> Dialect {
            Dialect::Postgres
        }

        fn execute(&mut self, _sql: &str, _params: &[Value]) -> Result<u64, StorageError> {
            Ok(0)
        }

        fn query(&mut self, _sql: &str, _params: &[Value]) -> Result<Vec<Row>, StorageError> {
            Ok(Vec::new())
        }

        fn last_insert_id(&mut self) -> Result<Value, StorageError> {
            Ok(Value::Null)
        }
    }

    #[test]
    fn test_builder_defaults() {
        let session = SessionBuilder::new().build_with(Silent);
        assert_eq!(
            session.config().isolation_level,
            IsolationLevel::RepeatableReads
        );
        assert!(!session.config().always_reconnect);
        assert_eq!(session.dialect(), Dialect::Postgres);
    }

    #[test]
    fn test_builder_chain() {
        let registry = Arc::new(Registry::new());
        let session = SessionBuilder::new()
            .registry(Arc::clone(&registry))
            .isolation_level(IsolationLevel::Serializable)
            .identity_map_capacity(10)
            .always_reconnect(true)
            .default_pk("pk")
            .build_with(Silent);
        assert!(Arc::ptr_eq(session.registry(), &registry));
        assert_eq!(session.config().isolation_level, IsolationLevel::Serializable);
        assert_eq!(session.config().identity_map_capacity, 10);
        assert!(session.config().always_reconnect);
        assert_eq!(session.config().default_pk, "pk");
    }

    #[test]
    fn test_builder_takes_whole_config() {
        let config: SessionConfig =
            serde_json::from_str(r#"{"isolation_level": "READ_COMMITTED"}"#).unwrap();
        let session = SessionBuilder::new().config(config).build_with(Silent);
        assert_eq!(session.config().isolation_level, IsolationLevel::ReadCommitted);
        assert_eq!(session.config().default_pk, "id");
    }

    #[cfg(feature = "sqlite")]
    #[test]
    fn test_build_memory() {
        let session = SessionBuilder::new().build_memory().unwrap();
        assert_eq!(session.dialect(), Dialect::Sqlite);
    }
}
