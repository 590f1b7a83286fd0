//! Generic (polymorphic-target) relations.
//!
//! A generic foreign key stores the target's model name in a type field next
//! to the key fields, so one column pair can point at rows of any model.

use std::collections::HashMap;

use ascetic_core::{Error, Key, OnDelete, Result, Value};
use indexmap::IndexMap;

use super::{
    BindRelation, Related, RelatedValue, Relation, RelationKind, cache_many, cache_one,
    cached_many, distinct_keys,
};
use crate::instance::{Cached, Instance};
use crate::query::QuerySet;
use crate::registry::Registry;
use crate::session::Session;

const DEFAULT_TYPE_FIELD: &str = "content_type";
const DEFAULT_KEY_FIELD: &str = "object_id";

/// Forward generic reference: `(type field, key fields)` on the owner.
#[derive(Debug, Clone)]
pub struct GenericForeignKey {
    name: String,
    owner: String,
    type_field: String,
    key_fields: Vec<String>,
}

impl Default for GenericForeignKey {
    fn default() -> Self {
        Self::new()
    }
}

impl GenericForeignKey {
    pub fn new() -> Self {
        Self {
            name: String::new(),
            owner: String::new(),
            type_field: DEFAULT_TYPE_FIELD.to_string(),
            key_fields: vec![DEFAULT_KEY_FIELD.to_string()],
        }
    }

    pub fn type_field(mut self, field: impl Into<String>) -> Self {
        self.type_field = field.into();
        self
    }

    pub fn key_fields<S: Into<String>>(mut self, fields: impl IntoIterator<Item = S>) -> Self {
        self.key_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    fn target_model(instance: &Instance, type_field: &str) -> Option<String> {
        instance.get(type_field).as_str().map(str::to_string)
    }

    /// Cache key: the target model name followed by the key values.
    fn cache_key(model: &Value, key: &Key) -> Key {
        let mut values = vec![model.clone()];
        values.extend(key.values().iter().cloned());
        Key::new(values)
    }
}

impl BindRelation for GenericForeignKey {
    fn bind(mut self, owner: &str, name: &str) -> Self {
        self.owner = owner.to_string();
        self.name = name.to_string();
        self
    }
}

impl Relation for GenericForeignKey {
    fn name(&self) -> &str {
        &self.name
    }

    fn owner(&self) -> &str {
        &self.owner
    }

    fn kind(&self) -> RelationKind {
        RelationKind::GenericForeignKey
    }

    fn target(&self) -> Option<&str> {
        None
    }

    /// The remote side depends on each instance's type field, so only the
    /// local key fields are reported.
    fn key_fields(&self, _registry: &Registry) -> Result<(Vec<String>, Vec<String>)> {
        Ok((self.key_fields.clone(), Vec::new()))
    }

    fn generic_fields(&self) -> Option<(&str, &[String])> {
        Some((&self.type_field, &self.key_fields))
    }

    fn get(&self, session: &Session, instance: &Instance) -> Result<RelatedValue> {
        let model = instance.get(&self.type_field);
        let key = instance.key_of(&self.key_fields);
        let cache_key = Self::cache_key(&model, &key);
        if let Some(Cached::One {
            key: cached,
            value,
        }) = instance.cached(&self.name)
        {
            if cached == cache_key {
                match value.map(|weak| weak.upgrade()) {
                    None => return Ok(RelatedValue::One(None)),
                    Some(Some(object)) => return Ok(RelatedValue::One(Some(object))),
                    Some(None) => {}
                }
            }
        }

        let (Some(model), true) = (Self::target_model(instance, &self.type_field), key.is_complete())
        else {
            cache_one(instance, &self.name, cache_key, None);
            return Ok(RelatedValue::One(None));
        };
        let object = session.mapper(&model)?.get(session, key)?;
        cache_one(instance, &self.name, cache_key, Some(&object));
        Ok(RelatedValue::One(Some(object)))
    }

    fn set(&self, session: &Session, instance: &Instance, value: Related) -> Result<()> {
        match value {
            Related::Instance(object) => {
                let model = object.model();
                let key = object.key_of(session.mapper(&model)?.pk());
                if key.len() != self.key_fields.len() {
                    return Err(Error::mapping(format!(
                        "{}.{} holds {} key fields, {model} has {}",
                        self.owner,
                        self.name,
                        self.key_fields.len(),
                        key.len()
                    )));
                }
                instance.set(&self.type_field, model.as_str());
                instance.set_key(&self.key_fields, &key);
                let cache_key = Self::cache_key(&Value::from(model), &key);
                cache_one(instance, &self.name, cache_key, Some(&object));
                Ok(())
            }
            Related::Key(_) => Err(Error::mapping(format!(
                "{}.{} needs an instance to record its type",
                self.owner, self.name
            ))),
            Related::None => self.clear(session, instance),
        }
    }

    fn clear(&self, _session: &Session, instance: &Instance) -> Result<()> {
        let null = Key::new(vec![Value::Null; self.key_fields.len()]);
        instance.set(&self.type_field, Value::Null);
        instance.set_key(&self.key_fields, &null);
        cache_one(instance, &self.name, Self::cache_key(&Value::Null, &null), None);
        Ok(())
    }

    fn prefetch(&self, session: &Session, instances: &[Instance]) -> Result<()> {
        let mut by_model: IndexMap<String, Vec<Instance>> = IndexMap::new();
        for instance in instances {
            match Self::target_model(instance, &self.type_field) {
                Some(model) => by_model.entry(model).or_default().push(instance.clone()),
                None => {
                    let key = instance.key_of(&self.key_fields);
                    cache_one(instance, &self.name, Self::cache_key(&Value::Null, &key), None);
                }
            }
        }
        // One query per distinct target model.
        for (model, owners) in by_model {
            let mapper = session.mapper(&model)?;
            let keys = distinct_keys(&owners, &self.key_fields);
            let found: HashMap<Key, Instance> = if keys.is_empty() {
                HashMap::new()
            } else {
                mapper
                    .query()
                    .filter_in(mapper.pk(), keys)
                    .all(session)?
                    .into_iter()
                    .map(|object| (object.key_of(mapper.pk()), object))
                    .collect()
            };
            let model_value = Value::from(model.as_str());
            for owner in &owners {
                let key = owner.key_of(&self.key_fields);
                let cache_key = Self::cache_key(&model_value, &key);
                cache_one(owner, &self.name, cache_key, found.get(&key));
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
        match weak.upgrade() {
            Some(object) if !instance.key_of(&self.key_fields).is_complete() => {
                self.set(session, instance, Related::Instance(object))
            }
            _ => Ok(()),
        }
    }
}

/// Inverse of a [`GenericForeignKey`]: every target row whose type field
/// names the owner's model and whose key fields hold the owner's key.
#[derive(Debug, Clone)]
pub struct GenericRelation {
    name: String,
    owner: String,
    target: String,
    type_field: String,
    key_fields: Vec<String>,
    on_delete: OnDelete,
}

impl GenericRelation {
    pub fn to(target: impl Into<String>) -> Self {
        Self {
            name: String::new(),
            owner: String::new(),
            target: target.into(),
            type_field: DEFAULT_TYPE_FIELD.to_string(),
            key_fields: vec![DEFAULT_KEY_FIELD.to_string()],
            on_delete: OnDelete::NoAction,
        }
    }

    pub fn type_field(mut self, field: impl Into<String>) -> Self {
        self.type_field = field.into();
        self
    }

    pub fn key_fields<S: Into<String>>(mut self, fields: impl IntoIterator<Item = S>) -> Self {
        self.key_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn on_delete(mut self, on_delete: OnDelete) -> Self {
        self.on_delete = on_delete;
        self
    }

    fn query(&self, session: &Session, model: &str, key: &Key) -> Result<QuerySet> {
        let query = session
            .mapper(&self.target)?
            .query()
            .filter(&self.type_field, model);
        Ok(if key.is_complete() {
            query.filter_key(&self.key_fields, key)
        } else {
            query.filter_in(&self.key_fields, Vec::new())
        })
    }

    /// Name of the matching generic foreign key on the target, if declared.
    fn back_reference(&self, session: &Session) -> Result<Option<String>> {
        let target = session.mapper(&self.target)?;
        Ok(target.all_relations().into_iter().find_map(|r| {
            let (type_field, key_fields) = r.generic_fields()?;
            (type_field == self.type_field && key_fields == self.key_fields.as_slice())
                .then(|| r.name().to_string())
        }))
    }

    fn pk(&self, registry: &Registry) -> Result<Vec<String>> {
        Ok(registry.mapper(&self.owner)?.pk().to_vec())
    }
}

impl BindRelation for GenericRelation {
    fn bind(mut self, owner: &str, name: &str) -> Self {
        self.owner = owner.to_string();
        self.name = name.to_string();
        self
    }
}

impl Relation for GenericRelation {
    fn name(&self) -> &str {
        &self.name
    }

    fn owner(&self) -> &str {
        &self.owner
    }

    fn kind(&self) -> RelationKind {
        RelationKind::GenericRelation
    }

    fn target(&self) -> Option<&str> {
        Some(&self.target)
    }

    fn on_delete(&self) -> OnDelete {
        self.on_delete
    }

    fn key_fields(&self, registry: &Registry) -> Result<(Vec<String>, Vec<String>)> {
        Ok((self.pk(registry)?, self.key_fields.clone()))
    }

    fn get(&self, session: &Session, instance: &Instance) -> Result<RelatedValue> {
        let key = instance.key_of(&self.pk(session.registry())?);
        if let Some(query) = cached_many(instance, &self.name, &key) {
            return Ok(RelatedValue::Many(query));
        }
        let query = self.query(session, &instance.model(), &key)?;
        cache_many(instance, &self.name, key, query.clone());
        Ok(RelatedValue::Many(query))
    }

    fn set(&self, _session: &Session, _instance: &Instance, _value: Related) -> Result<()> {
        Err(Error::mapping(format!(
            "{}.{} is the inverse side of a generic foreign key",
            self.owner, self.name
        )))
    }

    fn clear(&self, session: &Session, instance: &Instance) -> Result<()> {
        self.set(session, instance, Related::None)
    }

    fn prefetch(&self, session: &Session, instances: &[Instance]) -> Result<()> {
        let pk = self.pk(session.registry())?;
        let back = self.back_reference(session)?;
        let mut by_model: IndexMap<String, Vec<Instance>> = IndexMap::new();
        for instance in instances {
            by_model
                .entry(instance.model())
                .or_default()
                .push(instance.clone());
        }
        for (model, owners) in by_model {
            let keys = distinct_keys(&owners, &pk);
            let mut grouped: HashMap<Key, Vec<Instance>> = HashMap::new();
            if !keys.is_empty() {
                let related = session
                    .mapper(&self.target)?
                    .query()
                    .filter(&self.type_field, model.as_str())
                    .filter_in(&self.key_fields, keys)
                    .all(session)?;
                for object in related {
                    grouped
                        .entry(object.key_of(&self.key_fields))
                        .or_default()
                        .push(object);
                }
            }
            let model_value = Value::from(model.as_str());
            for owner in &owners {
                let key = owner.key_of(&pk);
                let children = grouped.remove(&key).unwrap_or_default();
                if let Some(back) = &back {
                    let cache_key = GenericForeignKey::cache_key(&model_value, &key);
                    for child in &children {
                        cache_one(child, back, cache_key.clone(), Some(owner));
                    }
                }
                let query = self.query(session, &model, &key)?;
                query.set_cache(children);
                cache_many(owner, &self.name, key, query);
            }
        }
        Ok(())
    }
}
