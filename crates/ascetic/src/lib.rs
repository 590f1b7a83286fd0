//! Ascetic: a lightweight data mapper.
//!
//! Ascetic maps rows onto plain in-memory records through per-model
//! [`Mapper`]s, keeps every loaded row unique per [`Session`] through an
//! identity map, and saves only what changed.
//!
//! # Crates
//!
//! - `ascetic-core`: values, keys, fields, validators, backend profiles and
//!   the [`Connection`] trait.
//! - `ascetic-query`: statement building.
//! - `ascetic-mapper`: sessions, mappers, relations, trees and signals.
//! - `ascetic-sqlite`: the SQLite connection (feature `sqlite`, on by default).
//!
//! # Example
//!
//! ```rust,ignore
//! use ascetic::prelude::*;
//!
//! let session = SessionBuilder::new().build_memory()?;
//! MapperBuilder::new("Author").register(&session)?;
//! MapperBuilder::new("Book")
//!     .relation("author", ForeignKey::to("Author").on_delete(OnDelete::Cascade))
//!     .register(&session)?;
//!
//! let books = session.mapper("Book")?;
//! let book = books.get(&session, 1)?;
//! let author = books.related(&session, &book, "author")?.into_one()?;
//! ```

pub mod i18n;
pub mod session;

pub use ascetic_core::{
    ColumnInfo, Connection, Dialect, Error, Field, FieldDefault, Key, OnDelete, Record, Result,
    Row, SqlType, StorageError, StorageErrorKind, ValidationErrors, Validator, Value,
};
pub use ascetic_mapper::{
    BindRelation, CacheError, DEFAULT_TYPE_FIELD, Event, EventKind, ForeignKey,
    GenericForeignKey, GenericRelation, IdentityMap, Instance, IsolationLevel, Mapper,
    MapperBuilder, OneToMany, QuerySet, Registry, Related, RelatedValue, Relation, RelationKind,
    ReverseOneToOne, SignalBus, SubscriptionId, TreeConfig, WeakInstance, record_from_serialize,
};
pub use ascetic_query::{Column, Condition, Select};
#[cfg(feature = "sqlite")]
pub use ascetic_sqlite::SqliteConnection;
pub use session::{Session, SessionBuilder, SessionConfig};

/// The usual imports.
pub mod prelude {
    pub use std::sync::Arc;

    pub use crate::i18n::LocaleColumns;
    pub use crate::session::{IsolationLevel, Registry, Session, SessionBuilder, SessionConfig};
    pub use crate::{
        Error, Event, EventKind, Field, FieldDefault, ForeignKey, GenericForeignKey,
        GenericRelation, Instance, Key, Mapper, MapperBuilder, OneToMany, OnDelete, QuerySet,
        Record, Related, RelatedValue, Result, Validator, Value,
    };

    #[cfg(feature = "sqlite")]
    pub use crate::SqliteConnection;
}
