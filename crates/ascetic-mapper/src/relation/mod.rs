//! Relation descriptors.
//!
//! A relation is bound to an owning model and an attribute name, and is
//! looked up by that name on the owner's [`Mapper`](crate::Mapper). Every
//! relation resolves lazily, caches the resolution on the instance, and
//! can populate that cache for a whole result set in one query
//! ([`Relation::prefetch`]).
//!
//! | kind                 | side    | resolves to            |
//! |----------------------|---------|------------------------|
//! | [`ForeignKey`]       | forward | one object or none     |
//! | [`ForeignKey::one_to_one`] | forward | one object or none |
//! | [`OneToMany`]        | inverse | a cached [`QuerySet`]  |
//! | [`ReverseOneToOne`]  | inverse | one object or none     |
//! | [`GenericForeignKey`]| forward | one object of any type |
//! | [`GenericRelation`]  | inverse | a cached [`QuerySet`]  |

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use ascetic_core::{Error, Key, OnDelete, Result};

use crate::instance::{Cached, Instance};
use crate::query::QuerySet;
use crate::registry::Registry;
use crate::session::Session;

mod foreign_key;
mod generic;
mod one_to_many;

pub use foreign_key::ForeignKey;
pub use generic::{GenericForeignKey, GenericRelation};
pub use one_to_many::{OneToMany, ReverseOneToOne};

/// Relation variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationKind {
    ForeignKey,
    OneToOne,
    OneToMany,
    ReverseOneToOne,
    GenericForeignKey,
    GenericRelation,
}

impl RelationKind {
    /// Inverse relations point at rows that reference the owner; they are
    /// the ones delete policies act on.
    pub const fn is_inverse(self) -> bool {
        matches!(
            self,
            RelationKind::OneToMany | RelationKind::ReverseOneToOne | RelationKind::GenericRelation
        )
    }
}

/// Resolved value of a relation.
#[derive(Debug, Clone)]
pub enum RelatedValue {
    One(Option<Instance>),
    Many(QuerySet),
}

impl RelatedValue {
    pub fn into_one(self) -> Result<Option<Instance>> {
        match self {
            RelatedValue::One(value) => Ok(value),
            RelatedValue::Many(q) => Err(Error::mapping(format!(
                "relation to {} is a collection",
                q.model()
            ))),
        }
    }

    pub fn into_many(self) -> Result<QuerySet> {
        match self {
            RelatedValue::Many(q) => Ok(q),
            RelatedValue::One(_) => Err(Error::mapping("relation is not a collection")),
        }
    }

    /// Every related object, running the collection query if needed.
    pub fn instances(self, session: &Session) -> Result<Vec<Instance>> {
        match self {
            RelatedValue::One(value) => Ok(value.into_iter().collect()),
            RelatedValue::Many(q) => q.all(session),
        }
    }
}

/// What to assign through [`Relation::set`].
#[derive(Debug, Clone)]
pub enum Related {
    /// A related object; the local key is derived from it.
    Instance(Instance),
    /// A raw key; any cached object is dropped.
    Key(Key),
    /// Clear the reference.
    None,
}

impl From<&Instance> for Related {
    fn from(instance: &Instance) -> Self {
        Related::Instance(instance.clone())
    }
}

impl From<Instance> for Related {
    fn from(instance: Instance) -> Self {
        Related::Instance(instance)
    }
}

impl From<Key> for Related {
    fn from(key: Key) -> Self {
        Related::Key(key)
    }
}

impl From<Option<&Instance>> for Related {
    fn from(instance: Option<&Instance>) -> Self {
        instance.map_or(Related::None, |i| Related::Instance(i.clone()))
    }
}

/// The descriptor interface every relation implements.
pub trait Relation: fmt::Debug + Send + Sync {
    /// Attribute name on the owner.
    fn name(&self) -> &str;

    /// Owning model name.
    fn owner(&self) -> &str;

    fn kind(&self) -> RelationKind;

    /// Statically known target model; `None` when it is read per instance.
    fn target(&self) -> Option<&str>;

    fn on_delete(&self) -> OnDelete {
        OnDelete::NoAction
    }

    /// `(fields on the owner, fields on the target)` that must match.
    fn key_fields(&self, registry: &Registry) -> Result<(Vec<String>, Vec<String>)>;

    /// Fields on related objects nulled by [`OnDelete::SetNull`].
    fn dependent_fields(&self, registry: &Registry) -> Result<Vec<String>> {
        Ok(self.key_fields(registry)?.1)
    }

    /// The inverse descriptor to install on the target, if any.
    fn reciprocal(&self) -> Option<Arc<dyn Relation>> {
        None
    }

    /// For generic foreign keys: `(type field, key fields)`.
    fn generic_fields(&self) -> Option<(&str, &[String])> {
        None
    }

    fn get(&self, session: &Session, instance: &Instance) -> Result<RelatedValue>;

    fn set(&self, session: &Session, instance: &Instance, value: Related) -> Result<()>;

    fn clear(&self, session: &Session, instance: &Instance) -> Result<()>;

    /// Resolve this relation for every instance with one query and store
    /// the results in their caches.
    fn prefetch(&self, session: &Session, instances: &[Instance]) -> Result<()>;

    /// Bring stored key fields in line with a cached object before a save.
    fn before_save(&self, _session: &Session, _instance: &Instance) -> Result<()> {
        Ok(())
    }

    /// Drop collections on the other side that the saved row may have
    /// joined or left.
    fn after_save(&self, _session: &Session, _instance: &Instance) -> Result<()> {
        Ok(())
    }
}

/// Construction-time binding of a relation to its owner and name.
pub trait BindRelation: Relation + Sized + 'static {
    fn bind(self, owner: &str, name: &str) -> Self;
}

/// Cached single object for `relation`, valid while its `remote` fields
/// still match `local_key`.
///
/// Returns `Some(None)` for a cached absence and `None` when there is
/// nothing usable in the cache.
pub(crate) fn cached_one(
    instance: &Instance,
    relation: &str,
    local_key: &Key,
    remote: &[String],
) -> Option<Option<Instance>> {
    let Some(Cached::One { key, value }) = instance.cached(relation) else {
        return None;
    };
    match value {
        None if key == *local_key => Some(None),
        None => None,
        Some(weak) => {
            let object = weak.upgrade()?;
            (object.key_of(remote) == *local_key).then_some(Some(object))
        }
    }
}

pub(crate) fn cache_one(instance: &Instance, relation: &str, key: Key, value: Option<&Instance>) {
    instance.set_cached(
        relation,
        Cached::One {
            key,
            value: value.map(Instance::downgrade),
        },
    );
}

/// Cached collection for `relation`, valid while the owner key is unchanged.
pub(crate) fn cached_many(instance: &Instance, relation: &str, key: &Key) -> Option<QuerySet> {
    match instance.cached(relation) {
        Some(Cached::Many { key: cached, query }) if cached == *key => Some(query),
        _ => None,
    }
}

pub(crate) fn cache_many(instance: &Instance, relation: &str, key: Key, query: QuerySet) {
    instance.set_cached(relation, Cached::Many { key, query });
}

/// Distinct complete keys, in first-seen order.
pub(crate) fn distinct_keys<S: AsRef<str>>(instances: &[Instance], fields: &[S]) -> Vec<Key> {
    let mut seen = HashSet::new();
    instances
        .iter()
        .map(|i| i.key_of(fields))
        .filter(|k| k.is_complete() && seen.insert(k.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ascetic_core::{Record, Value};

    fn author(id: i64) -> Instance {
        let inst = Instance::new("Author", Record::new(), false);
        inst.set("id", id);
        inst
    }

    #[test]
    fn test_cached_one_tracks_key_changes() {
        let book = Instance::new("Book", Record::new(), false);
        let a = author(1);
        let remote = vec!["id".to_string()];
        cache_one(&book, "author", Key::from(1), Some(&a));

        assert!(
            cached_one(&book, "author", &Key::from(1), &remote)
                .flatten()
                .is_some_and(|x| x.ptr_eq(&a))
        );
        assert!(cached_one(&book, "author", &Key::from(2), &remote).is_none());
    }

    #[test]
    fn test_cached_absence() {
        let book = Instance::new("Book", Record::new(), false);
        let null = Key::from(Value::Null);
        cache_one(&book, "author", null.clone(), None);
        assert!(matches!(
            cached_one(&book, "author", &null, &["id".to_string()]),
            Some(None)
        ));
        assert!(cached_one(&book, "author", &Key::from(1), &["id".to_string()]).is_none());
    }

    #[test]
    fn test_distinct_keys_skips_incomplete() {
        let items = vec![author(1), author(2), author(1)];
        items[1].set("id", Value::Null);
        assert_eq!(distinct_keys(&items, &["id"]), vec![Key::from(1)]);
    }

    #[test]
    fn test_inverse_kinds() {
        assert!(RelationKind::OneToMany.is_inverse());
        assert!(RelationKind::GenericRelation.is_inverse());
        assert!(!RelationKind::ForeignKey.is_inverse());
        assert!(!RelationKind::GenericForeignKey.is_inverse());
    }
}
