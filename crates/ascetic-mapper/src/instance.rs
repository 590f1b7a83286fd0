//! Model instances.
//!
//! An [`Instance`] is a shared handle to one object's field values plus the
//! bookkeeping the mapper maintains for it: the snapshot taken at the last
//! load or save, the new-record flag, and the per-relation resolution cache.
//! Handles are cheap to clone and compare by identity with [`Instance::ptr_eq`].

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use ascetic_core::{Error, Key, Record, Result, Value};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::query::QuerySet;

/// What a relation cached on an instance.
#[derive(Clone)]
pub(crate) enum Cached {
    /// A single related object, or a confirmed absence.
    ///
    /// `key` is the local key the resolution was made for. The object is
    /// held weakly so that back-references never form ownership cycles.
    One {
        key: Key,
        value: Option<WeakInstance>,
    },
    /// A collection, cached as a query whose row cache may be filled.
    Many { key: Key, query: QuerySet },
}

struct InstanceData {
    model: String,
    record: Record,
    original: Option<Record>,
    new_record: bool,
    cache: HashMap<String, Cached>,
}

/// Shared handle to a model instance.
#[derive(Clone)]
pub struct Instance(Rc<RefCell<InstanceData>>);

impl Instance {
    pub(crate) fn new(model: impl Into<String>, record: Record, new_record: bool) -> Self {
        Instance(Rc::new(RefCell::new(InstanceData {
            model: model.into(),
            record,
            original: None,
            new_record,
            cache: HashMap::new(),
        })))
    }

    /// Name of the mapper this instance belongs to.
    pub fn model(&self) -> String {
        self.0.borrow().model.clone()
    }

    /// Current value of `field`, NULL when unset.
    pub fn get(&self, field: &str) -> Value {
        self.0.borrow().record.value(field)
    }

    pub fn set(&self, field: &str, value: impl Into<Value>) {
        self.0.borrow_mut().record.set(field, value);
    }

    /// A copy of the current field values.
    pub fn record(&self) -> Record {
        self.0.borrow().record.clone()
    }

    /// The snapshot taken at the last load or save.
    pub fn original(&self) -> Option<Record> {
        self.0.borrow().original.clone()
    }

    /// True until the first successful insert.
    pub fn is_new(&self) -> bool {
        self.0.borrow().new_record
    }

    pub fn key_of<S: AsRef<str>>(&self, fields: &[S]) -> Key {
        self.0.borrow().record.key_of(fields)
    }

    pub fn set_key<S: AsRef<str>>(&self, fields: &[S], key: &Key) {
        self.0.borrow_mut().record.set_key(fields, key);
    }

    /// Run `f` over the current values without cloning them.
    pub fn with_record<T>(&self, f: impl FnOnce(&Record) -> T) -> T {
        f(&self.0.borrow().record)
    }

    /// Whether both handles point at the same object.
    pub fn ptr_eq(&self, other: &Instance) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn downgrade(&self) -> WeakInstance {
        WeakInstance(Rc::downgrade(&self.0))
    }

    /// Convert into a typed struct through serde.
    pub fn to_model<T: DeserializeOwned>(&self) -> Result<T> {
        let json = serde_json::to_value(&self.0.borrow().record)
            .map_err(|e| Error::mapping(e.to_string()))?;
        serde_json::from_value(json).map_err(|e| Error::mapping(e.to_string()))
    }

    /// Overwrite field values from a serializable struct.
    pub fn update_from<T: Serialize>(&self, value: &T) -> Result<()> {
        let record = record_from_serialize(value)?;
        let mut data = self.0.borrow_mut();
        for (field, value) in record.iter() {
            data.record.set(field, value.clone());
        }
        Ok(())
    }

    /// Take the current values as the clean snapshot.
    pub(crate) fn snapshot(&self) {
        let mut data = self.0.borrow_mut();
        data.original = Some(data.record.clone());
        data.new_record = false;
    }

    pub(crate) fn set_original_value(&self, field: &str, value: Value) {
        if let Some(original) = self.0.borrow_mut().original.as_mut() {
            original.set(field, value);
        }
    }

    /// Forget persistence state after the row was deleted.
    pub(crate) fn mark_deleted(&self) {
        let mut data = self.0.borrow_mut();
        data.original = None;
        data.new_record = true;
        data.cache.clear();
    }

    pub(crate) fn cached(&self, relation: &str) -> Option<Cached> {
        self.0.borrow().cache.get(relation).cloned()
    }

    pub(crate) fn set_cached(&self, relation: &str, cached: Cached) {
        self.0
            .borrow_mut()
            .cache
            .insert(relation.to_string(), cached);
    }

    pub(crate) fn clear_cached(&self, relation: &str) {
        self.0.borrow_mut().cache.remove(relation);
    }

    /// Drop every relation resolution.
    pub(crate) fn clear_cache(&self) {
        self.0.borrow_mut().cache.clear();
    }

    /// Whether a relation resolution is cached (prefetched or previously read).
    pub fn is_relation_cached(&self, relation: &str) -> bool {
        self.0.borrow().cache.contains_key(relation)
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let data = self.0.borrow();
        f.debug_struct("Instance")
            .field("model", &data.model)
            .field("record", &data.record)
            .field("new_record", &data.new_record)
            .finish_non_exhaustive()
    }
}

/// Non-owning handle to an [`Instance`].
#[derive(Clone)]
pub struct WeakInstance(Weak<RefCell<InstanceData>>);

impl WeakInstance {
    pub fn upgrade(&self) -> Option<Instance> {
        self.0.upgrade().map(Instance)
    }
}

impl fmt::Debug for WeakInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("WeakInstance(..)")
    }
}

/// Field values of a serializable struct.
pub fn record_from_serialize<T: Serialize>(value: &T) -> Result<Record> {
    let json = serde_json::to_value(value).map_err(|e| Error::mapping(e.to_string()))?;
    if !json.is_object() {
        return Err(Error::mapping("model values must serialize to a map"));
    }
    serde_json::from_value(json).map_err(|e| Error::mapping(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Author {
        id: Option<i64>,
        first_name: String,
    }

    #[test]
    fn test_instance_identity() {
        let a = Instance::new("Author", Record::new(), true);
        let b = a.clone();
        let c = Instance::new("Author", Record::new(), true);
        assert!(a.ptr_eq(&b));
        assert!(!a.ptr_eq(&c));
        assert!(a.downgrade().upgrade().is_some_and(|x| x.ptr_eq(&a)));
    }

    #[test]
    fn test_weak_handle_dies_with_instance() {
        let weak = Instance::new("Author", Record::new(), true).downgrade();
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn test_snapshot_clears_new_flag() {
        let a = Instance::new("Author", Record::new(), true);
        a.set("first_name", "Ada");
        assert!(a.is_new());
        assert!(a.original().is_none());
        a.snapshot();
        assert!(!a.is_new());
        assert_eq!(a.original().map(|r| r.value("first_name")), Some(Value::from("Ada")));
    }

    #[test]
    fn test_typed_round_trip() {
        let a = Instance::new("Author", Record::new(), true);
        a.update_from(&Author {
            id: Some(3),
            first_name: "Ada".into(),
        })
        .unwrap();
        assert_eq!(a.get("id"), Value::Int(3));
        let back: Author = a.to_model().unwrap();
        assert_eq!(back.first_name, "Ada");
    }

    #[test]
    fn test_record_from_non_map_fails() {
        assert!(record_from_serialize(&5).is_err());
    }
}
