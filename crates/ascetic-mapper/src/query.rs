//! Lazy, chainable queries over one model.
//!
//! A [`QuerySet`] names fields, never columns: it is turned into SQL by the
//! model's mapper, which applies storage column names, column mangling, and
//! the join across a polymorphic chain. Results are cached on the set; every
//! builder call returns a fresh set with an empty cache.
//!
//! ```ignore
//! let recent = session
//!     .mapper("Book")?
//!     .query()
//!     .filter("author_id", 1)
//!     .order_by_desc("published")
//!     .limit(10)
//!     .prefetch("author")
//!     .all(&session)?;
//! ```

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use ascetic_core::{Error, Key, Result, Value};
use ascetic_query::{CompareOp, Condition, Select, count_from_rows};

use crate::instance::Instance;
use crate::mapper::Mapper;
use crate::session::Session;

/// A filter expressed on field names.
#[derive(Debug, Clone)]
enum Lookup {
    Compare {
        field: String,
        op: CompareOp,
        value: Value,
    },
    In {
        fields: Vec<String>,
        keys: Vec<Key>,
    },
    Prefix {
        field: String,
        prefix: String,
    },
    Not(Box<Lookup>),
    /// A prebuilt condition on storage columns.
    Raw(Condition),
}

impl Lookup {
    fn to_condition(&self, mapper: &Mapper) -> Result<Condition> {
        Ok(match self {
            Lookup::Compare { field, op, value } => {
                Condition::compare(mapper.column_ref(field)?, *op, value.clone())
            }
            Lookup::In { fields, keys } => {
                let columns = fields
                    .iter()
                    .map(|f| mapper.column_ref(f))
                    .collect::<Result<Vec<_>>>()?;
                Condition::in_keys(columns, keys.clone())
            }
            Lookup::Prefix { field, prefix } => {
                Condition::starts_with(mapper.column_ref(field)?, prefix.clone())
            }
            Lookup::Not(inner) => inner.to_condition(mapper)?.not(),
            Lookup::Raw(condition) => condition.clone(),
        })
    }
}

/// Lazy query over one model.
#[derive(Clone)]
pub struct QuerySet {
    model: String,
    lookups: Vec<Lookup>,
    order: Vec<(String, bool)>,
    limit: Option<u64>,
    offset: Option<u64>,
    polymorphic: bool,
    prefetch: Vec<String>,
    cache: Rc<RefCell<Option<Vec<Instance>>>>,
}

impl QuerySet {
    pub(crate) fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            lookups: Vec::new(),
            order: Vec::new(),
            limit: None,
            offset: None,
            polymorphic: true,
            prefetch: Vec::new(),
            cache: Rc::new(RefCell::new(None)),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Clone with an empty result cache.
    fn fork(&self) -> Self {
        Self {
            cache: Rc::new(RefCell::new(None)),
            ..self.clone()
        }
    }

    fn with_lookup(&self, lookup: Lookup) -> Self {
        let mut next = self.fork();
        next.lookups.push(lookup);
        next
    }

    // ========================================================================
    // Builders
    // ========================================================================

    /// `field = value`; NULL compares with `IS NULL`.
    pub fn filter(&self, field: &str, value: impl Into<Value>) -> Self {
        self.filter_op(field, CompareOp::Eq, value)
    }

    pub fn filter_op(&self, field: &str, op: CompareOp, value: impl Into<Value>) -> Self {
        self.with_lookup(Lookup::Compare {
            field: field.to_string(),
            op,
            value: value.into(),
        })
    }

    /// Every field equal to the matching part of `key`.
    pub fn filter_key<S: AsRef<str>>(&self, fields: &[S], key: &Key) -> Self {
        let mut next = self.fork();
        for (field, value) in fields.iter().zip(key.values()) {
            next.lookups.push(Lookup::Compare {
                field: field.as_ref().to_string(),
                op: CompareOp::Eq,
                value: value.clone(),
            });
        }
        next
    }

    /// Tuple membership; an empty `keys` matches nothing.
    pub fn filter_in<S: AsRef<str>>(&self, fields: &[S], keys: Vec<Key>) -> Self {
        self.with_lookup(Lookup::In {
            fields: fields.iter().map(|f| f.as_ref().to_string()).collect(),
            keys,
        })
    }

    /// `field LIKE 'prefix%'` with wildcards in `prefix` escaped.
    pub fn filter_prefix(&self, field: &str, prefix: impl Into<String>) -> Self {
        self.with_lookup(Lookup::Prefix {
            field: field.to_string(),
            prefix: prefix.into(),
        })
    }

    pub fn exclude(&self, field: &str, value: impl Into<Value>) -> Self {
        self.with_lookup(Lookup::Not(Box::new(Lookup::Compare {
            field: field.to_string(),
            op: CompareOp::Eq,
            value: value.into(),
        })))
    }

    /// Add a condition written against storage columns.
    pub fn where_condition(&self, condition: Condition) -> Self {
        self.with_lookup(Lookup::Raw(condition))
    }

    pub fn order_by(&self, field: &str) -> Self {
        let mut next = self.fork();
        next.order.push((field.to_string(), false));
        next
    }

    pub fn order_by_desc(&self, field: &str) -> Self {
        let mut next = self.fork();
        next.order.push((field.to_string(), true));
        next
    }

    pub fn limit(&self, limit: u64) -> Self {
        let mut next = self.fork();
        next.limit = Some(limit);
        next
    }

    pub fn offset(&self, offset: u64) -> Self {
        let mut next = self.fork();
        next.offset = Some(offset);
        next
    }

    /// Whether loaded rows are upcast to their concrete model (default on).
    pub fn polymorphic(&self, enabled: bool) -> Self {
        let mut next = self.fork();
        next.polymorphic = enabled;
        next
    }

    /// Resolve relation `name` for every result in one extra query.
    pub fn prefetch(&self, name: &str) -> Self {
        let mut next = self.fork();
        next.prefetch.push(name.to_string());
        next
    }

    // ========================================================================
    // Execution
    // ========================================================================

    /// The SELECT this set would run.
    pub fn to_select(&self, mapper: &Mapper) -> Result<Select> {
        let mut select = mapper.select();
        for lookup in &self.lookups {
            select = select.filter(lookup.to_condition(mapper)?);
        }
        for (field, desc) in &self.order {
            let column = mapper.column_ref(field)?;
            select = if *desc {
                select.order_by_desc(column)
            } else {
                select.order_by(column)
            };
        }
        if let Some(limit) = self.limit {
            select = select.limit(limit);
        }
        if let Some(offset) = self.offset {
            select = select.offset(offset);
        }
        Ok(select)
    }

    /// Run the query (or return the cached results).
    #[tracing::instrument(level = "debug", skip(self, session), fields(model = %self.model))]
    pub fn all(&self, session: &Session) -> Result<Vec<Instance>> {
        if let Some(cached) = self.cache.borrow().as_ref() {
            return Ok(cached.clone());
        }
        let mapper = session.mapper(&self.model)?;
        let select = self.to_select(&mapper)?;
        let upcast = self.polymorphic && mapper.is_polymorphic();
        let mut instances = session.fetch(&select, |row| mapper.load(session, &row))?;
        if upcast {
            instances = instances
                .into_iter()
                .map(|instance| mapper.upcast(session, instance))
                .collect::<Result<_>>()?;
        }
        for name in &self.prefetch {
            mapper.relation(name)?.prefetch(session, &instances)?;
        }
        tracing::debug!(rows = instances.len(), "query loaded");
        *self.cache.borrow_mut() = Some(instances.clone());
        Ok(instances)
    }

    pub fn first(&self, session: &Session) -> Result<Option<Instance>> {
        if let Some(cached) = self.cache.borrow().as_ref() {
            return Ok(cached.first().cloned());
        }
        Ok(self.limit(1).all(session)?.into_iter().next())
    }

    /// The first match, or `DoesNotExist`.
    pub fn get(&self, session: &Session) -> Result<Instance> {
        self.first(session)?
            .ok_or_else(|| Error::does_not_exist(&self.model, self.describe()))
    }

    pub fn count(&self, session: &Session) -> Result<u64> {
        if let Some(cached) = self.cache.borrow().as_ref() {
            return Ok(cached.len() as u64);
        }
        let mapper = session.mapper(&self.model)?;
        let (sql, params) = self
            .to_select(&mapper)?
            .count_with_dialect(session.dialect());
        Ok(count_from_rows(&session.query(&sql, &params)?))
    }

    pub fn exists(&self, session: &Session) -> Result<bool> {
        Ok(self.first(session)?.is_some())
    }

    // ========================================================================
    // Result Cache
    // ========================================================================

    pub fn is_cached(&self) -> bool {
        self.cache.borrow().is_some()
    }

    /// Fill the result cache without running the query.
    pub fn set_cache(&self, instances: Vec<Instance>) {
        *self.cache.borrow_mut() = Some(instances);
    }

    pub fn invalidate(&self) {
        *self.cache.borrow_mut() = None;
    }

    fn describe(&self) -> String {
        self.lookups
            .iter()
            .map(|l| match l {
                Lookup::Compare { field, op, value } => {
                    format!("{field} {} {value}", op.as_sql())
                }
                Lookup::In { fields, keys } => format!("{fields:?} IN {} keys", keys.len()),
                Lookup::Prefix { field, prefix } => format!("{field} LIKE {prefix:?}%"),
                Lookup::Not(_) => "NOT (..)".to_string(),
                Lookup::Raw(_) => "<condition>".to_string(),
            })
            .collect::<Vec<_>>()
            .join(" AND ")
    }
}

impl fmt::Debug for QuerySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuerySet")
            .field("model", &self.model)
            .field("lookups", &self.lookups)
            .field("order", &self.order)
            .field("limit", &self.limit)
            .field("offset", &self.offset)
            .field("cached", &self.is_cached())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ascetic_core::Record;

    #[test]
    fn test_builders_do_not_share_cache() {
        let base = QuerySet::new("Author");
        base.set_cache(vec![Instance::new("Author", Record::new(), false)]);
        assert!(base.is_cached());

        let narrowed = base.filter("id", 1);
        assert!(!narrowed.is_cached());
        assert!(base.is_cached());

        // Plain clones share it.
        let same = base.clone();
        same.invalidate();
        assert!(!base.is_cached());
    }

    #[test]
    fn test_filter_key_adds_one_lookup_per_field() {
        let q = QuerySet::new("Translation").filter_key(&["id", "lang"], &Key::from((1, "en")));
        assert_eq!(q.lookups.len(), 2);
        assert_eq!(q.describe(), "id = 1 AND lang = \"en\"");
    }

    #[test]
    fn test_polymorphic_default_on() {
        let q = QuerySet::new("Article");
        assert!(q.polymorphic);
        assert!(!q.polymorphic(false).polymorphic);
    }
}
