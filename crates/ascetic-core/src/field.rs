//! Field and column definitions.

use std::fmt;
use std::sync::Arc;

use crate::record::Record;
use crate::types::{ColumnInfo, SqlType};
use crate::validate::Validator;
use crate::value::Value;

/// What happens to dependent rows when the row they reference is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OnDelete {
    /// Leave dependents untouched (their reference may dangle).
    #[default]
    NoAction,
    /// Delete dependents first.
    Cascade,
    /// Null the dependents' reference columns and save them.
    SetNull,
}

/// Default for a field whose value is NULL at save time.
#[derive(Clone)]
pub enum FieldDefault {
    /// A literal value.
    Value(Value),
    /// A zero-argument factory, called on every save that needs it.
    Factory(Arc<dyn Fn() -> Value + Send + Sync>),
    /// A factory that sees the rest of the instance's data.
    FactoryWith(Arc<dyn Fn(&Record) -> Value + Send + Sync>),
}

impl FieldDefault {
    pub fn value(value: impl Into<Value>) -> Self {
        FieldDefault::Value(value.into())
    }

    pub fn factory<F>(f: F) -> Self
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        FieldDefault::Factory(Arc::new(f))
    }

    pub fn factory_with<F>(f: F) -> Self
    where
        F: Fn(&Record) -> Value + Send + Sync + 'static,
    {
        FieldDefault::FactoryWith(Arc::new(f))
    }

    /// Produce the default for an instance whose data is `record`.
    pub fn compute(&self, record: &Record) -> Value {
        match self {
            FieldDefault::Value(v) => v.clone(),
            FieldDefault::Factory(f) => f(),
            FieldDefault::FactoryWith(f) => f(record),
        }
    }
}

impl fmt::Debug for FieldDefault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldDefault::Value(v) => f.debug_tuple("Value").field(v).finish(),
            FieldDefault::Factory(_) => f.write_str("Factory(..)"),
            FieldDefault::FactoryWith(_) => f.write_str("FactoryWith(..)"),
        }
    }
}

/// One mapped attribute of a model.
///
/// `name` is what callers use; `column` is what storage uses. A virtual
/// field is never selected or persisted.
#[derive(Debug, Clone)]
pub struct Field {
    pub name: String,
    pub column: String,
    pub default: Option<FieldDefault>,
    pub validators: Vec<Validator>,
    pub is_virtual: bool,
    pub sql_type: SqlType,
    pub nullable: bool,
    pub max_length: Option<usize>,
}

impl Field {
    /// A field whose column has the same name.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            column: name.clone(),
            name,
            default: None,
            validators: Vec::new(),
            is_virtual: false,
            sql_type: SqlType::Other,
            nullable: true,
            max_length: None,
        }
    }

    /// Derive a field from introspected column metadata.
    ///
    /// Non-nullable columns that storage will not fill get a `Required`
    /// validator; bounded text columns get a `MaxLength` validator.
    /// `auto_assigned` marks a key column storage generates on insert.
    pub fn from_column(info: &ColumnInfo, auto_assigned: bool) -> Self {
        let mut field = Field::new(info.name.clone());
        field.sql_type = info.sql_type.clone();
        field.nullable = info.nullable;
        field.max_length = info.max_length;
        if !info.nullable && !info.has_default && !auto_assigned {
            field.validators.push(Validator::Required);
        }
        if let Some(max) = info.max_length {
            field.validators.push(Validator::MaxLength(max));
        }
        field
    }

    /// Set the database column name.
    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.column = column.into();
        self
    }

    pub fn default(mut self, default: FieldDefault) -> Self {
        self.default = Some(default);
        self
    }

    pub fn default_value(self, value: impl Into<Value>) -> Self {
        self.default(FieldDefault::value(value))
    }

    pub fn validator(mut self, validator: Validator) -> Self {
        self.validators.push(validator);
        self
    }

    /// Mark as computed; never persisted or selected.
    pub fn virtual_field(mut self) -> Self {
        self.is_virtual = true;
        self
    }

    /// Run every validator, collecting all messages.
    pub fn validate(&self, value: &Value) -> Vec<String> {
        self.validators
            .iter()
            .filter_map(|v| v.check(value).err())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_from_column_derives_validators() {
        let info = ColumnInfo::from_declared("title", "VARCHAR(5)", false);
        let field = Field::from_column(&info, false);
        assert_eq!(field.validate(&Value::Null).len(), 1);
        assert_eq!(field.validate(&Value::from("toolong")).len(), 1);
        assert!(field.validate(&Value::from("ok")).is_empty());
    }

    #[test]
    fn test_auto_assigned_key_not_required() {
        let info = ColumnInfo::new("id", SqlType::Integer).not_null();
        let field = Field::from_column(&info, true);
        assert!(field.validate(&Value::Null).is_empty());
    }

    #[test]
    fn test_defaults_compute() {
        let mut record = Record::new();
        record.set("first", "Ada");
        assert_eq!(FieldDefault::value(3).compute(&record), Value::Int(3));
        assert_eq!(
            FieldDefault::factory(|| Value::from("x")).compute(&record),
            Value::from("x")
        );
        let derived = FieldDefault::factory_with(|r| r.value("first"));
        assert_eq!(derived.compute(&record), Value::from("Ada"));
    }

    #[test]
    fn test_field_builder() {
        let field = Field::new("title")
            .column("title_col")
            .default_value("untitled")
            .virtual_field();
        assert_eq!(field.column, "title_col");
        assert!(field.is_virtual);
        assert!(field.default.is_some());
    }
}
