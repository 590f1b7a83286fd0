//! Mappers, identity map, relations and transactions for Ascetic.
//!
//! This crate is the **unit-of-work layer**. A [`Registry`] holds one
//! [`Mapper`] per model; a [`Session`] runs mapper operations over one
//! connection, keeps the [`IdentityMap`] for its transaction scope, and
//! manages the transaction/savepoint stack.
//!
//! # Role In The Architecture
//!
//! - **Mapping**: [`MapperBuilder`] merges introspected columns with declared
//!   fields, aliases, defaults and validators.
//! - **Identity**: [`IdentityMap`] returns the same [`Instance`] for the same
//!   key, subject to the session's [`IsolationLevel`].
//! - **Relations**: [`ForeignKey`], [`OneToMany`], [`GenericForeignKey`] and
//!   friends resolve lazily and prefetch in one query.
//! - **Inheritance**: polymorphic mappers join their parent's table and
//!   upcast loaded rows to the concrete model.
//! - **Trees**: [`MapperBuilder::tree`] keeps a materialized path per row.
//!
//! Most applications should use the `ascetic` facade instead.

pub mod config;
pub mod identity_map;
pub mod instance;
pub mod mapper;
pub mod query;
pub mod registry;
pub mod relation;
pub mod session;
pub mod signals;
pub mod transaction;
pub mod tree;

#[cfg(test)]
mod test_support;

pub use config::{IsolationLevel, SessionConfig};
pub use identity_map::{CacheError, IdentityKey, IdentityMap};
pub use instance::{Instance, WeakInstance, record_from_serialize};
pub use mapper::{DEFAULT_TYPE_FIELD, Mapper, MapperBuilder};
pub use query::QuerySet;
pub use registry::Registry;
pub use relation::{
    BindRelation, ForeignKey, GenericForeignKey, GenericRelation, OneToMany, Related,
    RelatedValue, Relation, RelationKind, ReverseOneToOne,
};
pub use session::Session;
pub use signals::{Event, EventKind, SignalBus, Subscriber, SubscriptionId};
pub use transaction::{TransactionNode, savepoint_name};
pub use tree::{TreeConfig, encode_key, encode_segment, path_prefixes};
