//! Transaction stack nodes.
//!
//! Nodes form a strict LIFO stack per session. The first `begin` pushes the
//! root node (plain `BEGIN`); each further `begin` pushes a savepoint node.
//! `commit`/`rollback` always pop the innermost node.

/// One level of the transaction stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionNode {
    savepoint: Option<String>,
}

impl TransactionNode {
    pub fn root() -> Self {
        Self { savepoint: None }
    }

    pub fn savepoint(name: impl Into<String>) -> Self {
        Self {
            savepoint: Some(name.into()),
        }
    }

    pub fn is_root(&self) -> bool {
        self.savepoint.is_none()
    }

    /// Savepoint name, `None` for the root node.
    pub fn savepoint_name(&self) -> Option<&str> {
        self.savepoint.as_deref()
    }
}

/// A fresh, collision-resistant savepoint name.
pub fn savepoint_name() -> String {
    format!("sp_{:016x}", rand::random::<u64>())
}
