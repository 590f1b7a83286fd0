//! Error taxonomy shared by every Ascetic crate.
//!
//! Each failure a caller can observe is its own variant: validation,
//! not-found, not-registered, storage passthrough, and mapping misuse.

use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

/// Result alias used throughout the workspace.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Top-level error.
#[derive(Debug, Error)]
pub enum Error {
    /// A model or mapper was looked up before (or without) registration.
    #[error("model {0:?} is not registered")]
    NotRegistered(String),

    /// No row matched a lookup, or the identity map confirmed the key absent.
    #[error("{model} matching {lookup} does not exist")]
    DoesNotExist { model: String, lookup: String },

    /// One or more fields failed validation; nothing was written.
    #[error(transparent)]
    Validation(#[from] ValidationErrors),

    /// Passed through from the storage collaborator.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The mapper was asked for something its definition does not support.
    #[error("mapping error: {0}")]
    Mapping(String),
}

impl Error {
    pub fn does_not_exist(model: impl Into<String>, lookup: impl fmt::Display) -> Self {
        Error::DoesNotExist {
            model: model.into(),
            lookup: lookup.to_string(),
        }
    }

    pub fn mapping(message: impl Into<String>) -> Self {
        Error::Mapping(message.into())
    }

    pub fn is_does_not_exist(&self) -> bool {
        matches!(self, Error::DoesNotExist { .. })
    }

    pub fn is_not_registered(&self) -> bool {
        matches!(self, Error::NotRegistered(_))
    }

    pub fn validation_errors(&self) -> Option<&ValidationErrors> {
        match self {
            Error::Validation(e) => Some(e),
            _ => None,
        }
    }
}

/// Field name → messages, aggregated over every field checked in one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors {
    errors: BTreeMap<String, Vec<String>>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors
            .entry(field.into())
            .or_default()
            .push(message.into());
    }

    pub fn extend_field(&mut self, field: &str, messages: Vec<String>) {
        if messages.is_empty() {
            return;
        }
        self.errors
            .entry(field.to_string())
            .or_default()
            .extend(messages);
    }

    /// Fold another set of errors into this one.
    pub fn merge(&mut self, other: ValidationErrors) {
        for (field, messages) in other.errors {
            self.extend_field(&field, messages);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn get(&self, field: &str) -> Option<&[String]> {
        self.errors.get(field).map(Vec::as_slice)
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.errors.keys().map(String::as_str)
    }

    /// `Ok(())` when empty, otherwise `Err(self)`.
    pub fn into_result(self) -> Result<(), ValidationErrors> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("validation failed")?;
        for (i, (field, messages)) in self.errors.iter().enumerate() {
            f.write_str(if i == 0 { ": " } else { "; " })?;
            write!(f, "{field}: {}", messages.join(" "))?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}

/// Classification the mapper core acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageErrorKind {
    /// The connection dropped; eligible for one reconnect outside a transaction.
    ConnectionLost,
    /// A constraint (unique, foreign key, not null) rejected the statement.
    Constraint,
    /// The statement itself failed.
    Query,
    Other,
}

/// An error raised by the storage collaborator.
#[derive(Debug, Error)]
#[error("{kind:?} storage error: {message}")]
pub struct StorageError {
    pub kind: StorageErrorKind,
    pub message: String,
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl StorageError {
    pub fn new(kind: StorageErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        kind: StorageErrorKind,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            kind,
            message: source.to_string(),
            source: Some(Box::new(source)),
        }
    }

    pub fn connection_lost(message: impl Into<String>) -> Self {
        Self::new(StorageErrorKind::ConnectionLost, message)
    }

    pub fn is_reconnect_eligible(&self) -> bool {
        self.kind == StorageErrorKind::ConnectionLost
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_errors_merge() {
        let mut a = ValidationErrors::new();
        a.add("title", "This field is required.");
        let mut b = ValidationErrors::new();
        b.add("title", "Too long.");
        b.add("lang", "Enter a valid value.");
        a.merge(b);

        assert_eq!(a.len(), 2);
        assert_eq!(a.get("title").map(<[String]>::len), Some(2));
        assert!(a.to_string().starts_with("validation failed: lang:"));
    }

    #[test]
    fn test_into_result() {
        assert!(ValidationErrors::new().into_result().is_ok());
        let mut e = ValidationErrors::new();
        e.add("x", "bad");
        assert!(e.into_result().is_err());
    }

    #[test]
    fn test_error_predicates() {
        let err = Error::does_not_exist("Author", 5);
        assert!(err.is_does_not_exist());
        assert_eq!(err.to_string(), "Author matching 5 does not exist");
        assert!(Error::NotRegistered("X".into()).is_not_registered());
        assert!(StorageError::connection_lost("gone").is_reconnect_eligible());
    }
}
