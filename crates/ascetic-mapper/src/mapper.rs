//! Model mappers.
//!
//! A [`Mapper`] binds one model name to one table: its fields (introspected
//! from the schema, then overridden by declarations), its primary key, its
//! relations, and optionally a polymorphic parent whose table it extends.
//! Mappers are built with [`MapperBuilder`] and owned by the [`Registry`];
//! every operation takes the [`Session`] it runs in.
//!
//! [`Registry`]: crate::Registry

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use ascetic_core::{
    Error, Field, FieldDefault, Key, OnDelete, Record, Result, Row, SqlType, ValidationErrors,
    Validator, Value, validate_pattern,
};
use ascetic_query::{Column, Condition, Delete, Insert, Select, Update};
use heck::ToSnakeCase;
use indexmap::IndexMap;
use serde::Serialize;

use crate::identity_map::CacheError;
use crate::instance::{Instance, record_from_serialize};
use crate::query::QuerySet;
use crate::relation::{BindRelation, ForeignKey, Related, RelatedValue, Relation};
use crate::session::Session;
use crate::signals::{Event, SignalBus};
use crate::tree::TreeConfig;

/// Default discriminator field of a polymorphic root.
pub const DEFAULT_TYPE_FIELD: &str = "polymorphic_type_id";

/// Maps one model to one table.
pub struct Mapper {
    name: String,
    table: String,
    pk: Vec<String>,
    auto_pk: bool,
    fields: IndexMap<String, Field>,
    /// Storage column to field name, this level only.
    columns: HashMap<String, String>,
    relations: RwLock<IndexMap<String, Arc<dyn Relation>>>,
    parent: Option<Arc<Mapper>>,
    type_field: Option<String>,
    tree: Option<TreeConfig>,
    signals: Arc<SignalBus>,
}

impl Mapper {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Primary-key field names in declared order.
    pub fn pk(&self) -> &[String] {
        &self.pk
    }

    /// Whether storage assigns the key on insert.
    pub fn has_auto_pk(&self) -> bool {
        self.auto_pk
    }

    /// Polymorphic parent, if this model extends one.
    pub fn parent(&self) -> Option<&Arc<Mapper>> {
        self.parent.as_ref()
    }

    pub fn tree(&self) -> Option<&TreeConfig> {
        self.tree.as_ref()
    }

    /// Discriminator field of the polymorphic chain this model belongs to.
    pub fn polymorphic_field(&self) -> Option<&str> {
        self.root().type_field.as_deref()
    }

    pub fn is_polymorphic(&self) -> bool {
        self.polymorphic_field().is_some()
    }

    fn root(&self) -> &Mapper {
        let mut current = self;
        while let Some(parent) = &current.parent {
            current = parent.as_ref();
        }
        current
    }

    /// Every level of the polymorphic chain, root first.
    pub(crate) fn chain(&self) -> Vec<&Mapper> {
        let mut levels = vec![self];
        let mut current = self;
        while let Some(parent) = &current.parent {
            current = parent.as_ref();
            levels.push(current);
        }
        levels.reverse();
        levels
    }

    /// Whether this model is `model` or derives from it.
    pub fn is_a(&self, model: &str) -> bool {
        self.chain().iter().any(|level| level.name == model)
    }

    // ========================================================================
    // Fields
    // ========================================================================

    /// Fields declared at this level only.
    pub fn own_fields(&self) -> impl Iterator<Item = &Field> {
        self.fields.values()
    }

    /// A field from anywhere in the chain.
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.owning_level(name).map(|(_, f)| f)
    }

    /// Every field across the chain, root first, each name once.
    pub fn fields(&self) -> Vec<&Field> {
        self.leveled_fields().into_iter().map(|(_, f)| f).collect()
    }

    fn leveled_fields(&self) -> Vec<(&Mapper, &Field)> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for level in self.chain() {
            for field in level.fields.values() {
                if seen.insert(field.name.as_str()) {
                    out.push((level, field));
                }
            }
        }
        out
    }

    fn stored_fields(&self) -> Vec<(&Mapper, &Field)> {
        self.leveled_fields()
            .into_iter()
            .filter(|(_, f)| !f.is_virtual)
            .collect()
    }

    fn owning_level(&self, name: &str) -> Option<(&Mapper, &Field)> {
        self.chain()
            .into_iter()
            .rev()
            .find_map(|level| level.fields.get(name).map(|f| (level, f)))
    }

    /// Field name mapped to a storage column anywhere in the chain.
    pub fn field_for_column(&self, column: &str) -> Option<&str> {
        self.chain()
            .into_iter()
            .rev()
            .find_map(|level| level.columns.get(column).map(String::as_str))
    }

    /// Column emitted for `field`, after column mangling.
    fn storage_column(&self, field: &Field) -> String {
        self.signals
            .mangle_column(&self.name, &field.name, &field.column)
    }

    /// Table-qualified storage column for a stored field.
    pub fn column_ref(&self, name: &str) -> Result<Column> {
        let (level, field) = self
            .owning_level(name)
            .ok_or_else(|| Error::mapping(format!("{} has no field {name:?}", self.name)))?;
        if field.is_virtual {
            return Err(Error::mapping(format!(
                "{}.{name} is virtual and cannot be queried",
                self.name
            )));
        }
        Ok(Column::qualified(&level.table, level.storage_column(field)))
    }

    /// Level that stores `name` and the unqualified column it is written to.
    pub(crate) fn storage_of(&self, name: &str) -> Result<(&Mapper, String)> {
        match self.owning_level(name) {
            Some((level, field)) if !field.is_virtual => Ok((level, level.storage_column(field))),
            _ => Err(unknown_field(&self.name, name)),
        }
    }

    /// Unqualified key columns at this level.
    fn pk_columns(&self) -> Vec<Column> {
        self.pk
            .iter()
            .map(|name| match self.fields.get(name) {
                Some(field) => Column::new(self.storage_column(field)),
                None => Column::new(name.clone()),
            })
            .collect()
    }

    pub(crate) fn key_condition(&self, key: &Key) -> Condition {
        Condition::key_eq(&self.pk_columns(), key)
    }

    // ========================================================================
    // Relations
    // ========================================================================

    /// Relations declared on (or installed onto) this level.
    pub fn relations(&self) -> Vec<Arc<dyn Relation>> {
        self.relations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Relations across the chain, most derived level first.
    pub fn all_relations(&self) -> Vec<Arc<dyn Relation>> {
        self.chain()
            .into_iter()
            .rev()
            .flat_map(Mapper::relations)
            .collect()
    }

    pub fn relation(&self, name: &str) -> Result<Arc<dyn Relation>> {
        self.chain()
            .into_iter()
            .rev()
            .find_map(|level| {
                level
                    .relations
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .get(name)
                    .cloned()
            })
            .ok_or_else(|| Error::mapping(format!("{} has no relation {name:?}", self.name)))
    }

    /// Install a relation unless one with the same name exists.
    pub fn add_relation_if_absent(&self, relation: Arc<dyn Relation>) -> bool {
        let mut relations = self
            .relations
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if relations.contains_key(relation.name()) {
            return false;
        }
        tracing::debug!(
            model = %self.name,
            relation = relation.name(),
            "installed reciprocal relation"
        );
        relations.insert(relation.name().to_string(), relation);
        true
    }

    pub fn related(
        &self,
        session: &Session,
        instance: &Instance,
        name: &str,
    ) -> Result<RelatedValue> {
        self.relation(name)?.get(session, instance)
    }

    pub fn set_related(
        &self,
        session: &Session,
        instance: &Instance,
        name: &str,
        value: impl Into<Related>,
    ) -> Result<()> {
        self.relation(name)?.set(session, instance, value.into())
    }

    pub fn clear_related(&self, session: &Session, instance: &Instance, name: &str) -> Result<()> {
        self.relation(name)?.clear(session, instance)
    }

    // ========================================================================
    // Instances
    // ========================================================================

    /// A new, unsaved instance; unspecified fields are NULL.
    pub fn create(&self, values: Record) -> Instance {
        self.signals.publish(&Event::PreInit {
            model: &self.name,
            record: &values,
        });
        let mut record: Record = self
            .fields()
            .into_iter()
            .map(|f| (f.name.clone(), Value::Null))
            .collect();
        for (field, value) in values.iter() {
            record.set(field, value.clone());
        }
        let instance = Instance::new(self.name.clone(), record, true);
        self.signals.publish(&Event::PostInit {
            instance: &instance,
        });
        instance
    }

    /// [`Mapper::create`] from a serializable struct.
    pub fn create_from<T: Serialize>(&self, value: &T) -> Result<Instance> {
        Ok(self.create(record_from_serialize(value)?))
    }

    /// Storage form of an instance: canonical column name to value, stored
    /// fields only.
    pub fn unload(&self, instance: &Instance) -> Record {
        instance.with_record(|record| {
            self.stored_fields()
                .into_iter()
                .map(|(_, f)| (f.column.clone(), record.value(&f.name)))
                .collect()
        })
    }

    /// Fields whose value differs from the snapshot; every field when there
    /// is no snapshot yet.
    pub fn get_changed(&self, instance: &Instance) -> BTreeSet<String> {
        let names = self.fields().into_iter().map(|f| f.name.clone());
        match instance.original() {
            None => names.collect(),
            Some(original) => instance.with_record(|record| {
                names
                    .filter(|name| record.value(name) != original.value(name))
                    .collect()
            }),
        }
    }

    pub fn is_changed(&self, instance: &Instance) -> bool {
        !self.get_changed(instance).is_empty()
    }

    /// Fill NULL fields that declare a default.
    pub fn set_defaults(&self, instance: &Instance) {
        for field in self.fields() {
            let Some(default) = &field.default else {
                continue;
            };
            if instance.get(&field.name).is_null() {
                let value = instance.with_record(|record| default.compute(record));
                instance.set(&field.name, value);
            }
        }
        if let Some(type_field) = self.polymorphic_field() {
            if instance.get(type_field).is_null() {
                instance.set(type_field, instance.model());
            }
        }
    }

    /// Run validators across every level, limited to `only` when given.
    ///
    /// All failures are collected before returning.
    pub fn validate(&self, instance: &Instance, only: Option<&BTreeSet<String>>) -> Result<()> {
        let mut errors = ValidationErrors::new();
        instance.with_record(|record| {
            for level in self.chain() {
                for field in level.fields.values() {
                    if only.is_some_and(|set| !set.contains(&field.name)) {
                        continue;
                    }
                    let messages = field.validate(&record.value(&field.name));
                    if !messages.is_empty() {
                        errors.extend_field(&field.name, messages);
                    }
                }
            }
        });
        Ok(errors.into_result()?)
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    /// Insert or update `instance`.
    ///
    /// Defaults are applied first, then the changed fields are validated.
    /// Each polymorphic level is written root first. The snapshot is reset
    /// once everything succeeded.
    #[tracing::instrument(level = "debug", skip(self, session, instance), fields(model = %self.name))]
    pub fn save(&self, session: &Session, instance: &Instance) -> Result<()> {
        if let Some(concrete) = self.concrete_for(session, instance)? {
            return concrete.save(session, instance);
        }
        for relation in self.all_relations() {
            relation.before_save(session, instance)?;
        }
        self.set_defaults(instance);
        let created = instance.is_new();
        let tree_state = self.tree_before_save(session, instance)?;

        let changed = self.get_changed(instance);
        self.validate(instance, Some(&changed))?;
        self.signals.publish(&Event::PreSave { instance });
        // Subscribers may have touched the instance.
        let changed = self.get_changed(instance);

        let old_key = instance.original().map(|o| o.key_of(&self.pk));
        self.save_level(session, instance, &changed, created)?;
        self.tree_after_save(session, instance, tree_state)?;

        let key = instance.key_of(&self.pk);
        {
            let mut identity_map = session.identity_map();
            if let Some(old) = old_key.filter(|old| *old != key) {
                identity_map.remove(&self.name, &old);
            }
            if key.is_complete() {
                identity_map.add(&self.name, &key, Some(instance));
            }
        }
        for relation in self.all_relations() {
            relation.after_save(session, instance)?;
        }
        tracing::debug!(key = %key, created, "saved");
        self.signals
            .publish(&Event::PostSave { instance, created });
        instance.snapshot();
        Ok(())
    }

    fn save_level(
        &self,
        session: &Session,
        instance: &Instance,
        changed: &BTreeSet<String>,
        created: bool,
    ) -> Result<()> {
        if let Some(parent) = &self.parent {
            parent.save_level(session, instance, changed, created)?;
            let key = instance.key_of(&parent.pk);
            instance.set_key(&self.pk, &key);
        }
        if created {
            self.insert_row(session, instance)
        } else {
            self.update_row(session, instance, changed)
        }
    }

    fn insert_row(&self, session: &Session, instance: &Instance) -> Result<()> {
        let generated = self.auto_pk && instance.key_of(&self.pk).is_unset();
        let mut insert = Insert::into(&self.table);
        for field in self.fields.values().filter(|f| !f.is_virtual) {
            if generated && self.pk.contains(&field.name) {
                continue;
            }
            insert = insert.value(self.storage_column(field), instance.get(&field.name));
        }
        let (sql, params) = insert.build_with_dialect(session.dialect());
        session.execute(&sql, &params)?;
        if generated {
            let id = session.last_insert_id()?;
            if let Some(pk) = self.pk.first() {
                instance.set(pk, id);
            }
        }
        Ok(())
    }

    fn update_row(
        &self,
        session: &Session,
        instance: &Instance,
        changed: &BTreeSet<String>,
    ) -> Result<()> {
        let mut update = Update::table(&self.table);
        for field in self
            .fields
            .values()
            .filter(|f| !f.is_virtual && changed.contains(&f.name))
        {
            update = update.set(self.storage_column(field), instance.get(&field.name));
        }
        if update.is_empty() {
            return Ok(());
        }
        let key = self.stored_key(instance);
        let (sql, params) = update
            .filter(self.key_condition(&key))
            .build_with_dialect(session.dialect());
        session.execute(&sql, &params)?;
        Ok(())
    }

    /// Key the row is stored under: the snapshot's, else the current one.
    fn stored_key(&self, instance: &Instance) -> Key {
        instance
            .original()
            .map_or_else(|| instance.key_of(&self.pk), |o| o.key_of(&self.pk))
    }

    /// Delete `instance`, applying delete policies of inverse relations.
    ///
    /// Returns `false` when the model was already being deleted further up
    /// the same cascade path.
    #[tracing::instrument(level = "debug", skip(self, session, instance), fields(model = %self.name))]
    pub fn delete(&self, session: &Session, instance: &Instance) -> Result<bool> {
        self.delete_guarded(session, instance, &HashSet::new())
    }

    fn delete_guarded(
        &self,
        session: &Session,
        instance: &Instance,
        visited: &HashSet<String>,
    ) -> Result<bool> {
        if let Some(concrete) = self.concrete_for(session, instance)? {
            return concrete.delete_guarded(session, instance, visited);
        }
        if visited.contains(&self.name) {
            tracing::debug!(model = %self.name, "already deleting on this path");
            return Ok(false);
        }
        if instance.is_new() {
            return Err(Error::mapping(format!(
                "cannot delete an unsaved {} instance",
                self.name
            )));
        }
        let mut visited = visited.clone();
        visited.insert(self.name.clone());

        self.signals.publish(&Event::PreDelete { instance });
        for relation in self.all_relations() {
            if !relation.kind().is_inverse() {
                continue;
            }
            let policy = relation.on_delete();
            if policy == OnDelete::NoAction {
                continue;
            }
            // A collection read earlier misses rows saved since.
            instance.clear_cached(relation.name());
            let dependents = relation.get(session, instance)?.instances(session)?;
            match policy {
                OnDelete::NoAction => {}
                OnDelete::Cascade => {
                    for child in dependents {
                        session
                            .mapper(&child.model())?
                            .delete_guarded(session, &child, &visited)?;
                    }
                }
                OnDelete::SetNull => {
                    let fields = relation.dependent_fields(session.registry())?;
                    for child in dependents {
                        for field in &fields {
                            child.set(field, Value::Null);
                        }
                        child.clear_cache();
                        session.mapper(&child.model())?.save(session, &child)?;
                    }
                }
            }
            instance.clear_cached(relation.name());
        }

        let key = self.stored_key(instance);
        for level in self.chain().into_iter().rev() {
            let (sql, params) = Delete::from(&level.table)
                .filter(level.key_condition(&key))
                .build_with_dialect(session.dialect());
            session.execute(&sql, &params)?;
        }
        {
            let mut identity_map = session.identity_map();
            for level in self.chain() {
                identity_map.remove(&level.name, &key);
            }
        }
        tracing::debug!(key = %key, "deleted");
        self.signals.publish(&Event::PostDelete { instance });
        instance.mark_deleted();
        Ok(true)
    }

    /// The mapper of a more derived model when `instance` belongs to one.
    fn concrete_for(&self, session: &Session, instance: &Instance) -> Result<Option<Arc<Mapper>>> {
        let model = instance.model();
        if model == self.name {
            return Ok(None);
        }
        let concrete = session.mapper(&model)?;
        if concrete.is_a(&self.name) {
            Ok(Some(concrete))
        } else {
            Err(Error::mapping(format!(
                "{model} instance passed to the {} mapper",
                self.name
            )))
        }
    }

    // ========================================================================
    // Loading
    // ========================================================================

    /// The SELECT every query on this model starts from.
    ///
    /// Polymorphic levels are inner-joined on the primary key; each column
    /// is aliased back to its canonical name.
    pub fn select(&self) -> Select {
        let chain = self.chain();
        let mut select = Select::from(&self.root().table);
        for pair in chain.windows(2) {
            let (upper, lower) = (pair[0], pair[1]);
            let on = upper
                .pk_columns()
                .into_iter()
                .zip(lower.pk_columns())
                .map(|(u, l)| {
                    (
                        Column::qualified(&upper.table, u.name),
                        Column::qualified(&lower.table, l.name),
                    )
                })
                .collect();
            select = select.inner_join(&lower.table, on);
        }
        for (level, field) in self.stored_fields() {
            select = select.column_as(
                Column::qualified(&level.table, level.storage_column(field)),
                field.column.clone(),
            );
        }
        select
    }

    /// Build (or reuse) the instance for one result row.
    pub fn load(&self, session: &Session, row: &Row) -> Result<Instance> {
        let mut record = Record::new();
        for (column, value) in row.iter() {
            let field = self
                .field_for_column(column)
                .or_else(|| self.field(column).map(|f| f.name.as_str()));
            if let Some(field) = field {
                record.set(field, value.clone());
            }
        }
        self.load_record(session, record)
    }

    /// Build (or reuse) the instance for stored field values.
    ///
    /// When the identity map already holds the key, that instance is
    /// returned untouched.
    pub fn load_record(&self, session: &Session, record: Record) -> Result<Instance> {
        let key = record.key_of(&self.pk);
        if !key.is_complete() {
            return Err(Error::mapping(format!(
                "{} row without a complete primary key",
                self.name
            )));
        }
        let cached = session.identity_map().get(&self.name, &key);
        if let Ok(instance) = cached {
            return Ok(instance);
        }

        self.signals.publish(&Event::PreInit {
            model: &self.name,
            record: &record,
        });
        let full: Record = self
            .fields()
            .into_iter()
            .map(|f| (f.name.clone(), record.value(&f.name)))
            .collect();
        let instance = Instance::new(self.name.clone(), full, false);
        instance.snapshot();
        session
            .identity_map()
            .add(&self.name, &key, Some(&instance));
        self.signals.publish(&Event::PostInit {
            instance: &instance,
        });
        Ok(instance)
    }

    /// A query over this model.
    pub fn query(&self) -> QuerySet {
        QuerySet::new(self.name.clone())
    }

    /// Fetch by primary key, consulting the identity map first.
    ///
    /// Under `Serializable`, a key storage confirmed absent is remembered
    /// and repeating the lookup fails without a query. Weaker levels ask
    /// storage again.
    #[tracing::instrument(level = "debug", skip(self, session, key), fields(model = %self.name))]
    pub fn get(&self, session: &Session, key: impl Into<Key>) -> Result<Instance> {
        self.get_with(session, key.into(), true)
    }

    pub(crate) fn get_with(&self, session: &Session, key: Key, polymorphic: bool) -> Result<Instance> {
        if key.len() != self.pk.len() {
            return Err(Error::mapping(format!(
                "{} key has {} parts, got {key}",
                self.name,
                self.pk.len()
            )));
        }
        let cached = session.identity_map().get(&self.name, &key);
        let instance = match cached {
            Ok(instance) => instance,
            Err(CacheError::DoesNotExist) => {
                return Err(Error::does_not_exist(&self.name, &key));
            }
            Err(CacheError::Miss) => {
                let found = self
                    .query()
                    .polymorphic(false)
                    .filter_key(&self.pk, &key)
                    .first(session)?;
                match found {
                    Some(instance) => instance,
                    None => {
                        session.identity_map().add(&self.name, &key, None);
                        return Err(Error::does_not_exist(&self.name, &key));
                    }
                }
            }
        };
        if polymorphic {
            self.upcast(session, instance)
        } else {
            Ok(instance)
        }
    }

    /// First instance matching every `(field, value)` pair.
    pub fn get_by(&self, session: &Session, filters: &[(&str, Value)]) -> Result<Instance> {
        filters
            .iter()
            .fold(self.query(), |q, (field, value)| q.filter(field, value.clone()))
            .get(session)
    }

    /// Replace a base-level instance with the instance of the model its
    /// discriminator names.
    pub fn upcast(&self, session: &Session, instance: Instance) -> Result<Instance> {
        let Some(type_field) = self.polymorphic_field() else {
            return Ok(instance);
        };
        let discriminator = instance.get(type_field);
        let Some(model) = discriminator.as_str() else {
            return Ok(instance);
        };
        if model == instance.model() {
            return Ok(instance);
        }
        let concrete = session.mapper(model)?;
        if !concrete.is_a(&self.name) {
            return Ok(instance);
        }
        concrete.get_with(session, instance.key_of(&self.pk), false)
    }

    /// Resolve relation `name` for every instance in one query.
    pub fn prefetch(&self, session: &Session, instances: &[Instance], name: &str) -> Result<()> {
        self.relation(name)?.prefetch(session, instances)
    }
}

impl fmt::Debug for Mapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mapper")
            .field("name", &self.name)
            .field("table", &self.table)
            .field("pk", &self.pk)
            .field("fields", &self.fields.keys().collect::<Vec<_>>())
            .field("parent", &self.parent.as_ref().map(|p| p.name()))
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Declarative construction of a [`Mapper`].
///
/// Field definitions are merged in this order, later steps winning:
/// introspected schema, inherited fields of a non-polymorphic parent,
/// declared fields, column aliases, defaults, validators.
///
/// ```ignore
/// MapperBuilder::new("Book")
///     .alias("title", "book_title")
///     .default("status", FieldDefault::value("draft"))
///     .validator("isbn", Validator::pattern(r"^\d{13}$"))
///     .relation("author", ForeignKey::to("Author").on_delete(OnDelete::Cascade))
///     .register(&session)?;
/// ```
pub struct MapperBuilder {
    name: String,
    table: Option<String>,
    declared: Vec<Field>,
    aliases: Vec<(String, String)>,
    defaults: Vec<(String, FieldDefault)>,
    validators: Vec<(String, Validator)>,
    primary_key: Option<Vec<String>>,
    auto_pk: Option<bool>,
    relations: Vec<Arc<dyn Relation>>,
    extends: Option<String>,
    type_field: Option<String>,
    tree_path: Option<String>,
}

impl MapperBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: None,
            declared: Vec::new(),
            aliases: Vec::new(),
            defaults: Vec::new(),
            validators: Vec::new(),
            primary_key: None,
            auto_pk: None,
            relations: Vec::new(),
            extends: None,
            type_field: None,
            tree_path: None,
        }
    }

    /// Table name; defaults to the model name in snake case.
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    /// Declare or override a field. A field with no matching column is
    /// virtual.
    pub fn field(mut self, field: Field) -> Self {
        self.declared.push(field);
        self
    }

    /// Map `field` onto a differently named column.
    pub fn alias(mut self, field: impl Into<String>, column: impl Into<String>) -> Self {
        self.aliases.push((field.into(), column.into()));
        self
    }

    pub fn default(mut self, field: impl Into<String>, default: FieldDefault) -> Self {
        self.defaults.push((field.into(), default));
        self
    }

    pub fn validator(mut self, field: impl Into<String>, validator: Validator) -> Self {
        self.validators.push((field.into(), validator));
        self
    }

    /// Primary-key fields; read from the schema when not given.
    pub fn primary_key<S: Into<String>>(mut self, fields: impl IntoIterator<Item = S>) -> Self {
        self.primary_key = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    /// Override whether storage assigns the key on insert.
    pub fn auto_pk(mut self, enabled: bool) -> Self {
        self.auto_pk = Some(enabled);
        self
    }

    pub fn relation<R: BindRelation>(mut self, name: &str, relation: R) -> Self {
        let bound = relation.bind(&self.name, name);
        self.relations.push(Arc::new(bound));
        self
    }

    /// Derive from a registered model.
    ///
    /// A polymorphic parent is joined at query time; any other parent only
    /// lends its field definitions.
    pub fn extends(mut self, parent: impl Into<String>) -> Self {
        self.extends = Some(parent.into());
        self
    }

    /// Make this model a polymorphic root discriminated by
    /// `polymorphic_type_id`.
    pub fn polymorphic(self) -> Self {
        self.polymorphic_on(DEFAULT_TYPE_FIELD)
    }

    pub fn polymorphic_on(mut self, type_field: impl Into<String>) -> Self {
        self.type_field = Some(type_field.into());
        self
    }

    /// Keep a materialized path in `tree_path`; the schema must also have
    /// `parent_<pk>` columns.
    pub fn tree(self) -> Self {
        self.tree_on(crate::tree::DEFAULT_PATH_FIELD)
    }

    pub fn tree_on(mut self, path_field: impl Into<String>) -> Self {
        self.tree_path = Some(path_field.into());
        self
    }

    /// Introspect the table, build the mapper, and register it with the
    /// session's registry.
    #[tracing::instrument(level = "debug", skip(self, session), fields(model = %self.name))]
    pub fn register(self, session: &Session) -> Result<Arc<Mapper>> {
        let mapper = self.build(session)?;
        session.registry().register(mapper)
    }

    fn build(self, session: &Session) -> Result<Mapper> {
        let table = self
            .table
            .clone()
            .unwrap_or_else(|| self.name.to_snake_case());
        let schema = session.describe_table(&table)?;
        if schema.is_empty() {
            return Err(Error::mapping(format!(
                "table {table:?} for {} has no columns",
                self.name
            )));
        }
        let parent = self
            .extends
            .as_deref()
            .map(|name| session.mapper(name))
            .transpose()?;
        let polymorphic_parent = parent.clone().filter(|p| p.is_polymorphic());

        let field_name = |column: &str| -> String {
            self.aliases
                .iter()
                .find(|(_, c)| c == column)
                .map_or_else(|| column.to_string(), |(f, _)| f.clone())
        };
        for (field, column) in &self.aliases {
            if !schema.iter().any(|c| &c.name == column) {
                return Err(Error::mapping(format!(
                    "{}: alias {field:?} names missing column {column:?}",
                    self.name
                )));
            }
        }

        let pk = match &self.primary_key {
            Some(pk) => pk.clone(),
            None => {
                let read: Vec<String> = session
                    .read_pk(&table)?
                    .iter()
                    .map(|c| field_name(c))
                    .collect();
                if read.is_empty() {
                    vec![session.config().default_pk.clone()]
                } else {
                    read
                }
            }
        };
        let auto_pk = self.auto_pk.unwrap_or_else(|| {
            polymorphic_parent.is_none()
                && pk.len() == 1
                && schema.iter().any(|c| {
                    pk.first() == Some(&field_name(&c.name)) && c.sql_type == SqlType::Integer
                })
        });

        let mut fields: IndexMap<String, Field> = IndexMap::new();
        for column in &schema {
            let name = field_name(&column.name);
            let mut field = Field::from_column(column, auto_pk && pk.contains(&name));
            field.name.clone_from(&name);
            fields.insert(name, field);
        }

        if let Some(parent) = parent.as_ref().filter(|p| !p.is_polymorphic()) {
            for inherited in parent.fields() {
                let declared_here = self.declared.iter().any(|d| d.name == inherited.name);
                if declared_here {
                    continue;
                }
                if let Some(existing) = fields.get_mut(&inherited.name) {
                    existing.default.clone_from(&inherited.default);
                    existing.validators.clone_from(&inherited.validators);
                } else if inherited.is_virtual {
                    fields.insert(inherited.name.clone(), inherited.clone());
                }
            }
        }

        for declared in &self.declared {
            let stored = fields
                .shift_remove(&declared.name)
                .or_else(|| fields.shift_remove(&declared.column));
            let field = match stored {
                Some(schema_field) => Field {
                    is_virtual: false,
                    sql_type: schema_field.sql_type,
                    nullable: schema_field.nullable,
                    max_length: schema_field.max_length,
                    column: if declared.column == declared.name {
                        schema_field.column
                    } else {
                        declared.column.clone()
                    },
                    ..declared.clone()
                },
                None => Field {
                    is_virtual: true,
                    ..declared.clone()
                },
            };
            fields.insert(field.name.clone(), field);
        }

        for (name, default) in &self.defaults {
            fields
                .get_mut(name)
                .ok_or_else(|| unknown_field(&self.name, name))?
                .default = Some(default.clone());
        }
        for (name, validator) in &self.validators {
            if let Validator::Pattern(pattern) = validator {
                if let Some(problem) = validate_pattern(pattern) {
                    return Err(Error::mapping(format!(
                        "{}.{name}: invalid pattern: {problem}",
                        self.name
                    )));
                }
            }
            fields
                .get_mut(name)
                .ok_or_else(|| unknown_field(&self.name, name))?
                .validators
                .push(validator.clone());
        }

        for name in &pk {
            if !fields.contains_key(name) {
                return Err(Error::mapping(format!(
                    "{}: primary key field {name:?} is not mapped",
                    self.name
                )));
            }
        }

        if let Some(type_field) = &self.type_field {
            if polymorphic_parent.is_some() {
                return Err(Error::mapping(format!(
                    "{}: only the polymorphic root declares the type field",
                    self.name
                )));
            }
            let field = fields
                .get_mut(type_field)
                .filter(|f| !f.is_virtual)
                .ok_or_else(|| unknown_field(&self.name, type_field))?;
            // Filled in on save.
            field.validators.retain(|v| !matches!(v, Validator::Required));
        }

        if let Some(parent) = &polymorphic_parent {
            for name in fields.keys() {
                if !pk.contains(name) && parent.field(name).is_some() {
                    return Err(Error::mapping(format!(
                        "{}.{name} shadows a field of {}",
                        self.name,
                        parent.name()
                    )));
                }
            }
            if pk.len() != parent.pk().len() {
                return Err(Error::mapping(format!(
                    "{}: key shape differs from {}",
                    self.name,
                    parent.name()
                )));
            }
            // Copied from the parent row on insert.
            for name in &pk {
                if let Some(field) = fields.get_mut(name) {
                    field.validators.retain(|v| !matches!(v, Validator::Required));
                }
            }
        }

        let mut relations = self.relations;
        let tree = match &self.tree_path {
            Some(path_field) => {
                let config = TreeConfig::new(&pk, path_field);
                for name in config.parent_fields.iter().chain([&config.path_field]) {
                    if !fields.contains_key(name) {
                        return Err(Error::mapping(format!(
                            "{}: tree field {name:?} is not mapped",
                            self.name
                        )));
                    }
                }
                if let Some(field) = fields.get_mut(&config.path_field) {
                    field.validators.retain(|v| !matches!(v, Validator::Required));
                }
                let parent_fk = ForeignKey::to(self.name.clone())
                    .local(config.parent_fields.clone())
                    .remote(pk.clone())
                    .on_delete(OnDelete::Cascade)
                    .related_name(crate::tree::CHILDREN_RELATION)
                    .bind(&self.name, &config.parent_relation);
                relations.push(Arc::new(parent_fk));
                Some(config)
            }
            None => None,
        };

        let mut by_name: IndexMap<String, Arc<dyn Relation>> = IndexMap::new();
        for relation in relations {
            if by_name.contains_key(relation.name()) {
                return Err(Error::mapping(format!(
                    "{}: relation {:?} declared twice",
                    self.name,
                    relation.name()
                )));
            }
            by_name.insert(relation.name().to_string(), relation);
        }

        let columns = fields
            .values()
            .filter(|f| !f.is_virtual)
            .map(|f| (f.column.clone(), f.name.clone()))
            .collect();

        tracing::debug!(
            model = %self.name,
            table = %table,
            fields = fields.len(),
            pk = ?pk,
            auto_pk,
            "built mapper"
        );
        Ok(Mapper {
            name: self.name,
            table,
            pk,
            auto_pk,
            fields,
            columns,
            relations: RwLock::new(by_name),
            parent: polymorphic_parent,
            type_field: self.type_field,
            tree,
            signals: Arc::clone(session.registry().signals()),
        })
    }
}

fn unknown_field(model: &str, field: &str) -> Error {
    Error::mapping(format!("{model} has no field {field:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedConnection, session_with};
    use ascetic_core::ColumnInfo;

    fn author_columns() -> Vec<ColumnInfo> {
        vec![
            ColumnInfo::new("id", SqlType::Integer).not_null(),
            ColumnInfo::from_declared("first_name", "VARCHAR(40)", false),
            ColumnInfo::from_declared("last_name", "VARCHAR(40)", false),
            ColumnInfo::from_declared("bio", "TEXT", true),
        ]
    }

    fn author_session() -> (Session, ScriptedConnection) {
        let conn = ScriptedConnection::new()
            .table("author", author_columns())
            .primary_key("author", ["id"]);
        (session_with(conn.clone()), conn)
    }

    #[test]
    fn test_fields_from_schema() {
        let (session, _) = author_session();
        let mapper = MapperBuilder::new("Author").register(&session).unwrap();
        assert_eq!(mapper.table(), "author");
        assert_eq!(mapper.pk(), ["id".to_string()]);
        assert!(mapper.has_auto_pk());
        let names: Vec<_> = mapper.fields().iter().map(|f| f.name.clone()).collect();
        assert_eq!(names, ["id", "first_name", "last_name", "bio"]);
        // Required + MaxLength from the schema.
        assert_eq!(mapper.field("first_name").unwrap().validators.len(), 2);
        assert!(mapper.field("id").unwrap().validators.is_empty());
    }

    #[test]
    fn test_declared_virtual_and_alias() {
        let (session, _) = author_session();
        let mapper = MapperBuilder::new("Author")
            .alias("surname", "last_name")
            .field(Field::new("full_name").virtual_field())
            .field(Field::new("nickname"))
            .register(&session)
            .unwrap();
        assert_eq!(mapper.field("surname").unwrap().column, "last_name");
        assert!(mapper.field("last_name").is_none());
        assert!(mapper.field("full_name").unwrap().is_virtual);
        assert!(mapper.field("nickname").unwrap().is_virtual);
        assert_eq!(mapper.field_for_column("last_name"), Some("surname"));
        assert!(mapper.column_ref("nickname").is_err());
    }

    #[test]
    fn test_register_twice_fails() {
        let (session, _) = author_session();
        MapperBuilder::new("Author").register(&session).unwrap();
        let err = MapperBuilder::new("Author").register(&session).unwrap_err();
        assert!(matches!(err, Error::Mapping(_)));
    }

    #[test]
    fn test_unknown_default_field_fails() {
        let (session, _) = author_session();
        let err = MapperBuilder::new("Author")
            .default("missing", FieldDefault::value(1))
            .register(&session)
            .unwrap_err();
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn test_create_fills_nulls_and_tracks_changes() {
        let (session, _) = author_session();
        let mapper = MapperBuilder::new("Author").register(&session).unwrap();
        let author = mapper.create([("first_name".to_string(), Value::from("Ada"))].into_iter().collect());
        assert!(author.is_new());
        assert_eq!(author.get("bio"), Value::Null);
        assert_eq!(mapper.get_changed(&author).len(), 4);
    }

    #[test]
    fn test_validation_collects_every_field() {
        let (session, _) = author_session();
        let mapper = MapperBuilder::new("Author").register(&session).unwrap();
        let author = mapper.create(Record::new());
        let err = mapper.validate(&author, None).unwrap_err();
        let errors = err.validation_errors().unwrap();
        assert!(errors.get("first_name").is_some());
        assert!(errors.get("last_name").is_some());
        assert!(errors.get("id").is_none());
    }

    #[test]
    fn test_insert_then_update_only_changed() {
        let (session, conn) = author_session();
        let mapper = MapperBuilder::new("Author").register(&session).unwrap();
        let author = mapper.create(
            [
                ("first_name".to_string(), Value::from("Ada")),
                ("last_name".to_string(), Value::from("Lovelace")),
            ]
            .into_iter()
            .collect(),
        );
        conn.set_last_insert_id(7);
        mapper.save(&session, &author).unwrap();
        assert_eq!(author.get("id"), Value::Int(7));
        assert!(!mapper.is_changed(&author));
        let insert = conn.executed().pop().unwrap();
        assert!(insert.0.starts_with("INSERT INTO \"author\""));
        assert!(!insert.0.contains("\"id\""));

        author.set("bio", "Mathematician");
        mapper.save(&session, &author).unwrap();
        let (sql, params) = conn.executed().pop().unwrap();
        assert_eq!(sql, "UPDATE \"author\" SET \"bio\" = ? WHERE \"id\" = ?");
        assert_eq!(params, vec![Value::from("Mathematician"), Value::Int(7)]);

        // Nothing changed: no statement.
        let before = conn.executed().len();
        mapper.save(&session, &author).unwrap();
        assert_eq!(conn.executed().len(), before);
    }

    #[test]
    fn test_serializable_get_remembers_missing_keys() {
        let (session, conn) = author_session();
        session
            .identity_map()
            .set_isolation_level(crate::config::IsolationLevel::Serializable);
        let mapper = MapperBuilder::new("Author").register(&session).unwrap();
        let err = mapper.get(&session, 99).unwrap_err();
        assert!(err.is_does_not_exist());
        let queries = conn.queries().len();
        assert!(mapper.get(&session, 99).unwrap_err().is_does_not_exist());
        assert_eq!(conn.queries().len(), queries);
    }

    #[test]
    fn test_repeatable_reads_get_requeries_missing_keys() {
        let (session, conn) = author_session();
        let mapper = MapperBuilder::new("Author").register(&session).unwrap();
        assert!(mapper.get(&session, 99).unwrap_err().is_does_not_exist());
        let queries = conn.queries().len();
        assert!(mapper.get(&session, 99).unwrap_err().is_does_not_exist());
        assert_eq!(conn.queries().len(), queries + 1);
    }

    #[test]
    fn test_select_aliases_mangled_columns() {
        let (session, _) = author_session();
        session
            .registry()
            .signals()
            .subscribe(crate::signals::EventKind::ColumnMangling, |event| match event {
                Event::ColumnMangling {
                    field: "bio", ..
                } => Some((1, "bio_fr".to_string())),
                _ => None,
            });
        let mapper = MapperBuilder::new("Author").register(&session).unwrap();
        let (sql, _) = mapper.select().build();
        assert!(sql.contains("\"author\".\"bio_fr\" AS \"bio\""));
    }
}
