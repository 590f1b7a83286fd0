//! Forward single-object relations.

use std::collections::HashMap;
use std::sync::Arc;

use ascetic_core::{Error, Key, OnDelete, Result, Value};
use heck::ToSnakeCase;

use super::one_to_many::{OneToMany, ReverseOneToOne};
use super::{
    BindRelation, Related, RelatedValue, Relation, RelationKind, cache_one, cached_one,
    distinct_keys,
};
use crate::instance::{Cached, Instance};
use crate::registry::Registry;
use crate::session::Session;

/// Reference from the owner's key fields to fields on a target model.
///
/// ```ignore
/// MapperBuilder::new("Book")
///     .relation("author", ForeignKey::to("Author").on_delete(OnDelete::Cascade));
/// ```
///
/// Unless overridden, the local field is `<target in snake case>_id` and
/// the remote field is the target's primary key. A composite primary key
/// gives one local field per key part, `<target>_<part>`.
#[derive(Debug, Clone)]
pub struct ForeignKey {
    name: String,
    owner: String,
    target: String,
    local: Option<Vec<String>>,
    remote: Option<Vec<String>>,
    on_delete: OnDelete,
    related_name: Option<String>,
    one_to_one: bool,
}

impl ForeignKey {
    pub fn to(target: impl Into<String>) -> Self {
        Self {
            name: String::new(),
            owner: String::new(),
            target: target.into(),
            local: None,
            remote: None,
            on_delete: OnDelete::NoAction,
            related_name: None,
            one_to_one: false,
        }
    }

    /// A foreign key whose reverse side holds at most one object.
    pub fn one_to_one(target: impl Into<String>) -> Self {
        Self {
            one_to_one: true,
            ..Self::to(target)
        }
    }

    /// Local field names on the owner.
    pub fn local<S: Into<String>>(mut self, fields: impl IntoIterator<Item = S>) -> Self {
        self.local = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    /// Referenced field names on the target.
    pub fn remote<S: Into<String>>(mut self, fields: impl IntoIterator<Item = S>) -> Self {
        self.remote = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn on_delete(mut self, on_delete: OnDelete) -> Self {
        self.on_delete = on_delete;
        self
    }

    /// Name of the reverse relation installed on the target.
    pub fn related_name(mut self, name: impl Into<String>) -> Self {
        self.related_name = Some(name.into());
        self
    }

    fn reverse_name(&self) -> String {
        self.related_name.clone().unwrap_or_else(|| {
            let owner = self.owner.to_snake_case();
            if self.one_to_one {
                owner
            } else {
                format!("{owner}_set")
            }
        })
    }

    fn remote_fields(&self, registry: &Registry) -> Result<Vec<String>> {
        match &self.remote {
            Some(fields) => Ok(fields.clone()),
            None => Ok(registry.mapper(&self.target)?.pk().to_vec()),
        }
    }

    fn local_fields(&self, remote: &[String]) -> Vec<String> {
        if let Some(fields) = &self.local {
            return fields.clone();
        }
        let prefix = self.target.to_snake_case();
        match remote {
            [_] => vec![format!("{prefix}_id")],
            parts => parts.iter().map(|p| format!("{prefix}_{p}")).collect(),
        }
    }

    /// A live target reached through `key`, from the relation cache or the
    /// identity map.
    fn live_target(
        &self,
        session: &Session,
        instance: &Instance,
        key: &Key,
        remote: &[String],
    ) -> Result<Option<Instance>> {
        if let Some(Some(object)) = cached_one(instance, &self.name, key, remote) {
            return Ok(Some(object));
        }
        if !key.is_complete() || session.mapper(&self.target)?.pk() != remote {
            return Ok(None);
        }
        Ok(session.identity_map().get(&self.target, key).ok())
    }

    /// Cache `object` on the reverse side of a one-to-one link.
    fn cache_reverse(&self, object: &Instance, owner: &Instance, remote: &[String]) {
        if self.one_to_one {
            cache_one(object, &self.reverse_name(), object.key_of(remote), Some(owner));
        }
    }
}

impl BindRelation for ForeignKey {
    fn bind(mut self, owner: &str, name: &str) -> Self {
        self.owner = owner.to_string();
        self.name = name.to_string();
        self
    }
}

impl Relation for ForeignKey {
    fn name(&self) -> &str {
        &self.name
    }

    fn owner(&self) -> &str {
        &self.owner
    }

    fn kind(&self) -> RelationKind {
        if self.one_to_one {
            RelationKind::OneToOne
        } else {
            RelationKind::ForeignKey
        }
    }

    fn target(&self) -> Option<&str> {
        Some(&self.target)
    }

    fn on_delete(&self) -> OnDelete {
        self.on_delete
    }

    fn key_fields(&self, registry: &Registry) -> Result<(Vec<String>, Vec<String>)> {
        let remote = self.remote_fields(registry)?;
        let local = self.local_fields(&remote);
        if local.len() != remote.len() {
            return Err(Error::mapping(format!(
                "{}.{}: {} local fields for {} remote fields",
                self.owner,
                self.name,
                local.len(),
                remote.len()
            )));
        }
        Ok((local, remote))
    }

    fn reciprocal(&self) -> Option<Arc<dyn Relation>> {
        let name = self.reverse_name();
        if self.one_to_one {
            Some(Arc::new(ReverseOneToOne::via(
                &self.target,
                &name,
                &self.owner,
                &self.name,
                self.on_delete,
            )))
        } else {
            Some(Arc::new(OneToMany::via(
                &self.target,
                &name,
                &self.owner,
                &self.name,
                self.on_delete,
            )))
        }
    }

    fn get(&self, session: &Session, instance: &Instance) -> Result<RelatedValue> {
        let (local, remote) = self.key_fields(session.registry())?;
        let key = instance.key_of(&local);
        if let Some(hit) = cached_one(instance, &self.name, &key, &remote) {
            return Ok(RelatedValue::One(hit));
        }
        if !key.is_complete() {
            cache_one(instance, &self.name, key, None);
            return Ok(RelatedValue::One(None));
        }

        let target = session.mapper(&self.target)?;
        let object = if remote.as_slice() == target.pk() {
            target.get(session, key.clone())?
        } else {
            target
                .query()
                .filter_key(&remote, &key)
                .first(session)?
                .ok_or_else(|| Error::does_not_exist(&self.target, &key))?
        };
        cache_one(instance, &self.name, key, Some(&object));
        self.cache_reverse(&object, instance, &remote);
        Ok(RelatedValue::One(Some(object)))
    }

    fn set(&self, session: &Session, instance: &Instance, value: Related) -> Result<()> {
        let (local, remote) = self.key_fields(session.registry())?;
        match value {
            Related::Instance(object) => {
                let key = object.key_of(&remote);
                instance.set_key(&local, &key);
                cache_one(instance, &self.name, key, Some(&object));
                self.cache_reverse(&object, instance, &remote);
            }
            Related::Key(key) => {
                if key.len() != local.len() {
                    return Err(Error::mapping(format!(
                        "{}.{} expects a key of {} parts, got {key}",
                        self.owner,
                        self.name,
                        local.len()
                    )));
                }
                instance.set_key(&local, &key);
                instance.clear_cached(&self.name);
            }
            Related::None => {
                let null = Key::new(vec![Value::Null; local.len()]);
                instance.set_key(&local, &null);
                cache_one(instance, &self.name, null, None);
            }
        }
        Ok(())
    }

    fn clear(&self, session: &Session, instance: &Instance) -> Result<()> {
        self.set(session, instance, Related::None)
    }

    fn prefetch(&self, session: &Session, instances: &[Instance]) -> Result<()> {
        let (local, remote) = self.key_fields(session.registry())?;
        let keys = distinct_keys(instances, &local);
        let found: HashMap<Key, Instance> = if keys.is_empty() {
            HashMap::new()
        } else {
            session
                .mapper(&self.target)?
                .query()
                .filter_in(&remote, keys)
                .all(session)?
                .into_iter()
                .map(|object| (object.key_of(&remote), object))
                .collect()
        };
        tracing::debug!(
            relation = %self.name,
            owners = instances.len(),
            found = found.len(),
            "prefetched foreign key"
        );
        for instance in instances {
            let key = instance.key_of(&local);
            match found.get(&key) {
                Some(object) => {
                    cache_one(instance, &self.name, key, Some(object));
                    self.cache_reverse(object, instance, &remote);
                }
                None if !key.is_complete() => cache_one(instance, &self.name, key, None),
                // Dangling key: left for `get` to report.
                None => instance.clear_cached(&self.name),
            }
        }
        Ok(())
    }

    fn before_save(&self, session: &Session, instance: &Instance) -> Result<()> {
        let Some(Cached::One {
            value: Some(weak), ..
        }) = instance.cached(&self.name)
        else {
            return Ok(());
        };
        let Some(object) = weak.upgrade() else {
            return Ok(());
        };
        let (local, remote) = self.key_fields(session.registry())?;
        // The object may have been assigned before it had a key.
        let key = object.key_of(&remote);
        if key.is_complete() && !instance.key_of(&local).is_complete() {
            instance.set_key(&local, &key);
            cache_one(instance, &self.name, key, Some(&object));
        }
        Ok(())
    }

    fn after_save(&self, session: &Session, instance: &Instance) -> Result<()> {
        if self.one_to_one {
            return Ok(());
        }
        let (local, remote) = self.key_fields(session.registry())?;
        let key = instance.key_of(&local);
        let old_key = instance.original().map(|o| o.key_of(&local));
        let reverse = self.reverse_name();
        for key in std::iter::once(key).chain(old_key) {
            if let Some(target) = self.live_target(session, instance, &key, &remote)? {
                target.clear_cached(&reverse);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_field_names() {
        let fk = ForeignKey::to("BlogAuthor").bind("Post", "author");
        assert_eq!(fk.local_fields(&["id".to_string()]), vec!["blog_author_id"]);
        assert_eq!(
            fk.local_fields(&["id".to_string(), "lang".to_string()]),
            vec!["blog_author_id", "blog_author_lang"]
        );
        let explicit = ForeignKey::to("Author").local(["writer"]);
        assert_eq!(explicit.local_fields(&["id".to_string()]), vec!["writer"]);
    }

    #[test]
    fn test_reverse_names() {
        let fk = ForeignKey::to("Author").bind("BookChapter", "author");
        assert_eq!(fk.reverse_name(), "book_chapter_set");
        let named = ForeignKey::to("Author").related_name("books").bind("Book", "author");
        assert_eq!(named.reverse_name(), "books");
        let o2o = ForeignKey::one_to_one("User").bind("Profile", "user");
        assert_eq!(o2o.reverse_name(), "profile");
        assert_eq!(o2o.kind(), RelationKind::OneToOne);
    }

    #[test]
    fn test_reciprocal_kinds() {
        let fk = ForeignKey::to("Author")
            .on_delete(OnDelete::Cascade)
            .bind("Book", "author");
        let reverse = fk.reciprocal().unwrap();
        assert_eq!(reverse.kind(), RelationKind::OneToMany);
        assert_eq!(reverse.owner(), "Author");
        assert_eq!(reverse.target(), Some("Book"));
        assert_eq!(reverse.name(), "book_set");
        assert_eq!(reverse.on_delete(), OnDelete::Cascade);

        let o2o = ForeignKey::one_to_one("User").bind("Profile", "user");
        assert_eq!(o2o.reciprocal().unwrap().kind(), RelationKind::ReverseOneToOne);
    }
}
