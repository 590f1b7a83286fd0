//! Inverse sides of foreign keys.

use std::collections::HashMap;

use ascetic_core::{Error, Key, OnDelete, Result};

use super::{
    BindRelation, Related, RelatedValue, Relation, RelationKind, cache_many, cache_one,
    cached_many, cached_one, distinct_keys,
};
use crate::instance::Instance;
use crate::query::QuerySet;
use crate::registry::Registry;
use crate::session::Session;

/// Field pairing shared by both inverse relation kinds.
#[derive(Debug, Clone)]
struct Inverse {
    name: String,
    owner: String,
    target: String,
    via: Option<String>,
    explicit: Option<(Vec<String>, Vec<String>)>,
    on_delete: OnDelete,
}

/// Resolved `(owner fields, target fields, forward relation name)`.
type Resolved = (Vec<String>, Vec<String>, Option<String>);

impl Inverse {
    fn new(target: String) -> Self {
        Self {
            name: String::new(),
            owner: String::new(),
            target,
            via: None,
            explicit: None,
            on_delete: OnDelete::NoAction,
        }
    }

    /// Owner and target fields, read off the forward foreign key on the
    /// target unless given explicitly.
    fn resolve(&self, registry: &Registry) -> Result<Resolved> {
        if let Some((local, remote)) = &self.explicit {
            return Ok((local.clone(), remote.clone(), self.via.clone()));
        }
        let target = registry.mapper(&self.target)?;
        let forward = match &self.via {
            Some(via) => target.relation(via)?,
            None => target
                .all_relations()
                .into_iter()
                .find(|r| {
                    matches!(r.kind(), RelationKind::ForeignKey | RelationKind::OneToOne)
                        && r.target() == Some(self.owner.as_str())
                })
                .ok_or_else(|| {
                    Error::mapping(format!(
                        "{}.{}: no foreign key on {} points back",
                        self.owner, self.name, self.target
                    ))
                })?,
        };
        let (fk_local, fk_remote) = forward.key_fields(registry)?;
        Ok((fk_remote, fk_local, Some(forward.name().to_string())))
    }

    fn query(&self, session: &Session, remote: &[String], key: &Key) -> Result<QuerySet> {
        let query = session.mapper(&self.target)?.query();
        Ok(if key.is_complete() {
            query.filter_key(remote, key)
        } else {
            // An unsaved owner has no dependents yet.
            query.filter_in(remote, Vec::new())
        })
    }

    /// Fetch every dependent of `instances` in one query, grouped by the
    /// owner key they point at.
    fn fetch_grouped(
        &self,
        session: &Session,
        instances: &[Instance],
    ) -> Result<(Resolved, HashMap<Key, Vec<Instance>>)> {
        let resolved = self.resolve(session.registry())?;
        let (local, remote, _) = &resolved;
        let keys = distinct_keys(instances, local);
        let mut grouped: HashMap<Key, Vec<Instance>> = HashMap::new();
        if !keys.is_empty() {
            let related = session
                .mapper(&self.target)?
                .query()
                .filter_in(remote, keys)
                .all(session)?;
            for object in related {
                grouped
                    .entry(object.key_of(remote))
                    .or_default()
                    .push(object);
            }
        }
        tracing::debug!(
            relation = %self.name,
            owners = instances.len(),
            groups = grouped.len(),
            "prefetched inverse relation"
        );
        Ok((resolved, grouped))
    }

    fn read_only(&self) -> Error {
        Error::mapping(format!(
            "{}.{} is the inverse side; assign through {}",
            self.owner,
            self.name,
            self.via.as_deref().unwrap_or("the foreign key")
        ))
    }
}

/// Every target row whose foreign key points at the owner.
///
/// Usually installed automatically as the reciprocal of a [`ForeignKey`]
/// (named `<owner>_set` unless the key sets `related_name`).
///
/// [`ForeignKey`]: super::ForeignKey
#[derive(Debug, Clone)]
pub struct OneToMany(Inverse);

impl OneToMany {
    pub fn to(target: impl Into<String>) -> Self {
        Self(Inverse::new(target.into()))
    }

    /// Name of the foreign key on the target this relation mirrors.
    pub fn via_relation(mut self, name: impl Into<String>) -> Self {
        self.0.via = Some(name.into());
        self
    }

    /// Explicit `(owner fields, target fields)` pairing.
    pub fn fields<S: Into<String>>(
        mut self,
        local: impl IntoIterator<Item = S>,
        remote: impl IntoIterator<Item = S>,
    ) -> Self {
        self.0.explicit = Some((
            local.into_iter().map(Into::into).collect(),
            remote.into_iter().map(Into::into).collect(),
        ));
        self
    }

    pub fn on_delete(mut self, on_delete: OnDelete) -> Self {
        self.0.on_delete = on_delete;
        self
    }

    pub(crate) fn via(owner: &str, name: &str, target: &str, via: &str, on_delete: OnDelete) -> Self {
        Self(Inverse {
            name: name.to_string(),
            owner: owner.to_string(),
            target: target.to_string(),
            via: Some(via.to_string()),
            explicit: None,
            on_delete,
        })
    }
}

impl BindRelation for OneToMany {
    fn bind(mut self, owner: &str, name: &str) -> Self {
        self.0.owner = owner.to_string();
        self.0.name = name.to_string();
        self
    }
}

impl Relation for OneToMany {
    fn name(&self) -> &str {
        &self.0.name
    }

    fn owner(&self) -> &str {
        &self.0.owner
    }

    fn kind(&self) -> RelationKind {
        RelationKind::OneToMany
    }

    fn target(&self) -> Option<&str> {
        Some(&self.0.target)
    }

    fn on_delete(&self) -> OnDelete {
        self.0.on_delete
    }

    fn key_fields(&self, registry: &Registry) -> Result<(Vec<String>, Vec<String>)> {
        let (local, remote, _) = self.0.resolve(registry)?;
        Ok((local, remote))
    }

    fn get(&self, session: &Session, instance: &Instance) -> Result<RelatedValue> {
        let (local, remote, _) = self.0.resolve(session.registry())?;
        let key = instance.key_of(&local);
        if let Some(query) = cached_many(instance, &self.0.name, &key) {
            return Ok(RelatedValue::Many(query));
        }
        let query = self.0.query(session, &remote, &key)?;
        cache_many(instance, &self.0.name, key, query.clone());
        Ok(RelatedValue::Many(query))
    }

    fn set(&self, _session: &Session, _instance: &Instance, _value: Related) -> Result<()> {
        Err(self.0.read_only())
    }

    fn clear(&self, _session: &Session, _instance: &Instance) -> Result<()> {
        Err(self.0.read_only())
    }

    fn prefetch(&self, session: &Session, instances: &[Instance]) -> Result<()> {
        let ((local, remote, back), mut grouped) = self.0.fetch_grouped(session, instances)?;
        for instance in instances {
            let key = instance.key_of(&local);
            let children = grouped.remove(&key).unwrap_or_default();
            if let Some(back) = &back {
                for child in &children {
                    cache_one(child, back, key.clone(), Some(instance));
                }
            }
            let query = self.0.query(session, &remote, &key)?;
            query.set_cache(children);
            cache_many(instance, &self.0.name, key, query);
        }
        Ok(())
    }
}

/// The owner-side view of a one-to-one key held by the target.
#[derive(Debug, Clone)]
pub struct ReverseOneToOne(Inverse);

impl ReverseOneToOne {
    pub fn to(target: impl Into<String>) -> Self {
        Self(Inverse::new(target.into()))
    }

    pub fn via_relation(mut self, name: impl Into<String>) -> Self {
        self.0.via = Some(name.into());
        self
    }

    pub fn on_delete(mut self, on_delete: OnDelete) -> Self {
        self.0.on_delete = on_delete;
        self
    }

    pub(crate) fn via(owner: &str, name: &str, target: &str, via: &str, on_delete: OnDelete) -> Self {
        Self(Inverse {
            name: name.to_string(),
            owner: owner.to_string(),
            target: target.to_string(),
            via: Some(via.to_string()),
            explicit: None,
            on_delete,
        })
    }
}

impl BindRelation for ReverseOneToOne {
    fn bind(mut self, owner: &str, name: &str) -> Self {
        self.0.owner = owner.to_string();
        self.0.name = name.to_string();
        self
    }
}

impl Relation for ReverseOneToOne {
    fn name(&self) -> &str {
        &self.0.name
    }

    fn owner(&self) -> &str {
        &self.0.owner
    }

    fn kind(&self) -> RelationKind {
        RelationKind::ReverseOneToOne
    }

    fn target(&self) -> Option<&str> {
        Some(&self.0.target)
    }

    fn on_delete(&self) -> OnDelete {
        self.0.on_delete
    }

    fn key_fields(&self, registry: &Registry) -> Result<(Vec<String>, Vec<String>)> {
        let (local, remote, _) = self.0.resolve(registry)?;
        Ok((local, remote))
    }

    fn get(&self, session: &Session, instance: &Instance) -> Result<RelatedValue> {
        let (local, remote, back) = self.0.resolve(session.registry())?;
        let key = instance.key_of(&local);
        if let Some(hit) = cached_one(instance, &self.0.name, &key, &remote) {
            return Ok(RelatedValue::One(hit));
        }
        let object = if key.is_complete() {
            self.0.query(session, &remote, &key)?.first(session)?
        } else {
            None
        };
        cache_one(instance, &self.0.name, key.clone(), object.as_ref());
        if let (Some(object), Some(back)) = (&object, &back) {
            cache_one(object, back, key, Some(instance));
        }
        Ok(RelatedValue::One(object))
    }

    fn set(&self, _session: &Session, _instance: &Instance, _value: Related) -> Result<()> {
        Err(self.0.read_only())
    }

    fn clear(&self, _session: &Session, _instance: &Instance) -> Result<()> {
        Err(self.0.read_only())
    }

    fn prefetch(&self, session: &Session, instances: &[Instance]) -> Result<()> {
        let ((local, _, back), mut grouped) = self.0.fetch_grouped(session, instances)?;
        for instance in instances {
            let key = instance.key_of(&local);
            let object = grouped
                .remove(&key)
                .and_then(|objects| objects.into_iter().next());
            if let (Some(object), Some(back)) = (&object, &back) {
                cache_one(object, back, key.clone(), Some(instance));
            }
            cache_one(instance, &self.0.name, key, object.as_ref());
        }
        Ok(())
    }
}
