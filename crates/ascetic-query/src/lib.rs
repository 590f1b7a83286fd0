//! Statement builders for the Ascetic data mapper.
//!
//! The mapper core treats this crate as an opaque capability: build a
//! filtered, ordered, limited statement for a [`Dialect`], execute it, get
//! rows back. Nothing here knows about mappers or instances.
//!
//! - [`Condition`] composes WHERE predicates (equality, membership, prefix
//!   match, boolean combinators).
//! - [`Select`] adds projection, joins, ordering, LIMIT/OFFSET, COUNT and a
//!   per-row mapping hook.
//! - [`Insert`], [`Update`] and [`Delete`] cover writes.
//!
//! [`Dialect`]: ascetic_core::Dialect

pub mod builder;
pub mod condition;
pub mod select;

pub use builder::{Assignment, Delete, Insert, Update};
pub use condition::{Column, CompareOp, Condition, LIKE_ESCAPE, like_prefix};
pub use select::{Join, OrderBy, Projection, Select, count_from_rows};
