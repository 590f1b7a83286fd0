//! Field values of one model instance.
//!
//! Models are not compile-time structs here: their shape comes from schema
//! introspection at mapper construction, so an instance's data is an ordered
//! map from field name to [`Value`].

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::value::{Key, Value};

/// Ordered field-name → value map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    values: IndexMap<String, Value>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a value for a field.
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(field.into(), value.into());
    }

    /// Get a value for a field.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.values.get(field)
    }

    /// Value for a field, NULL when absent.
    pub fn value(&self, field: &str) -> Value {
        self.values.get(field).cloned().unwrap_or(Value::Null)
    }

    /// Remove a value, returning it.
    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.values.shift_remove(field)
    }

    /// Check if a field has a value set.
    pub fn has(&self, field: &str) -> bool {
        self.values.contains_key(field)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Collect the values of `fields`, in order, as a key tuple.
    pub fn key_of<S: AsRef<str>>(&self, fields: &[S]) -> Key {
        Key::new(fields.iter().map(|f| self.value(f.as_ref())).collect())
    }

    /// Assign `key` positionally onto `fields`.
    pub fn set_key<S: AsRef<str>>(&mut self, fields: &[S], key: &Key) {
        for (field, value) in fields.iter().zip(key.values()) {
            self.set(field.as_ref(), value.clone());
        }
    }
}

impl<S: Into<String>, V: Into<Value>> FromIterator<(S, V)> for Record {
    fn from_iter<T: IntoIterator<Item = (S, V)>>(iter: T) -> Self {
        let mut record = Record::new();
        for (k, v) in iter {
            record.set(k, v);
        }
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_basic() {
        let mut record = Record::new();
        record.set("name", "Alice");
        assert_eq!(record.get("name").and_then(Value::as_str), Some("Alice"));
        assert!(!record.has("id"));
        assert_eq!(record.value("id"), Value::Null);
    }

    #[test]
    fn test_key_round_trip() {
        let mut record: Record = [("id", Value::Int(5)), ("lang", Value::from("en"))]
            .into_iter()
            .collect();
        let key = record.key_of(&["id", "lang"]);
        assert_eq!(key, Key::from((5, "en")));

        record.set_key(&["id", "lang"], &Key::from((6, "fr")));
        assert_eq!(record.value("id"), Value::Int(6));
        assert_eq!(record.value("lang"), Value::from("fr"));
    }

    #[test]
    fn test_serializes_as_plain_map() {
        let record: Record = [("id", Value::Int(1)), ("name", Value::from("Ada"))]
            .into_iter()
            .collect();
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json, serde_json::json!({"id": 1, "name": "Ada"}));
        let back: Record = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_insertion_order_preserved() {
        let record: Record = [("b", 1), ("a", 2)].into_iter().collect();
        let names: Vec<_> = record.iter().map(|(k, _)| k).collect();
        assert_eq!(names, vec!["b", "a"]);
    }
}
