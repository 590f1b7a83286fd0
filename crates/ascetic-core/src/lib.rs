//! Core types and traits for the Ascetic data mapper.
//!
//! `ascetic-core` is the **foundation layer** for the workspace. It defines the
//! data types every other crate exchanges and the capability contract a
//! storage driver has to satisfy.
//!
//! # Role In The Architecture
//!
//! - **Contract layer**: [`Connection`] is implemented by drivers
//!   (`ascetic-sqlite`) and consumed by the mapper.
//! - **Data model**: [`Value`], [`Key`], [`Row`] and [`Record`] represent
//!   query inputs/outputs and instance data.
//! - **Field metadata**: [`Field`], [`Validator`], [`FieldDefault`] and
//!   [`ColumnInfo`] describe how a model attribute maps onto a column.
//! - **Backend profiles**: [`Dialect`] captures placeholder, quoting,
//!   savepoint and introspection differences.
//!
//! # Who Uses This Crate
//!
//! - `ascetic-query` renders statements over [`Value`] parameters for a [`Dialect`].
//! - `ascetic-mapper` builds mappers from [`ColumnInfo`] and drives a [`Connection`].
//! - `ascetic-sqlite` implements [`Connection`] on top of `rusqlite`.
//!
//! Most applications should use the `ascetic` facade instead.

pub mod connection;
pub mod dialect;
pub mod error;
pub mod field;
pub mod record;
pub mod row;
pub mod types;
pub mod validate;
pub mod value;

pub use connection::Connection;
pub use dialect::Dialect;
pub use error::{Error, Result, StorageError, StorageErrorKind, ValidationErrors};
pub use field::{Field, FieldDefault, OnDelete};
pub use record::Record;
pub use row::Row;
pub use types::{ColumnInfo, SqlType};
pub use validate::{Validator, matches_pattern, validate_pattern};
pub use value::{Key, Value};
