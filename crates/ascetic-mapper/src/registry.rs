//! The mapper registry.
//!
//! One [`Registry`] is created at process start and shared (behind an
//! `Arc`) by every session. It owns the mappers by model name and the
//! [`SignalBus`] they publish on, and wires reciprocal relations as mappers
//! arrive in any order.

use std::sync::{Arc, PoisonError, RwLock};

use ascetic_core::{Error, Result};
use indexmap::IndexMap;

use crate::mapper::Mapper;
use crate::signals::{Event, SignalBus};

/// Process-wide collection of mappers.
#[derive(Debug, Default)]
pub struct Registry {
    mappers: RwLock<IndexMap<String, Arc<Mapper>>>,
    signals: Arc<SignalBus>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry publishing on an existing bus.
    pub fn with_signals(signals: Arc<SignalBus>) -> Self {
        Self {
            mappers: RwLock::new(IndexMap::new()),
            signals,
        }
    }

    pub fn signals(&self) -> &Arc<SignalBus> {
        &self.signals
    }

    /// Look up a mapper by model name.
    pub fn mapper(&self, model: &str) -> Result<Arc<Mapper>> {
        self.mappers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(model)
            .cloned()
            .ok_or_else(|| Error::NotRegistered(model.to_string()))
    }

    pub fn contains(&self, model: &str) -> bool {
        self.mappers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(model)
    }

    /// Registered model names in registration order.
    pub fn models(&self) -> Vec<String> {
        self.mappers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    fn all(&self) -> Vec<Arc<Mapper>> {
        self.mappers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Register a fully built mapper.
    ///
    /// Registering a second mapper under the same name is a mapping error.
    /// Reciprocal relations are installed in both directions: from the new
    /// mapper's relations onto already-registered targets, and from
    /// registered mappers' relations that target the new one.
    pub fn register(&self, mapper: Mapper) -> Result<Arc<Mapper>> {
        let mapper = Arc::new(mapper);
        {
            let mut mappers = self
                .mappers
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            if mappers.contains_key(mapper.name()) {
                return Err(Error::mapping(format!(
                    "model {:?} is already registered",
                    mapper.name()
                )));
            }
            mappers.insert(mapper.name().to_string(), Arc::clone(&mapper));
        }

        for relation in mapper.relations() {
            if let Some(target) = relation.target().and_then(|t| self.mapper(t).ok()) {
                if let Some(reverse) = relation.reciprocal() {
                    target.add_relation_if_absent(reverse);
                }
            }
        }
        for other in self.all() {
            if Arc::ptr_eq(&other, &mapper) {
                continue;
            }
            for relation in other.relations() {
                if relation.target() == Some(mapper.name()) {
                    if let Some(reverse) = relation.reciprocal() {
                        mapper.add_relation_if_absent(reverse);
                    }
                }
            }
        }

        tracing::info!(
            model = mapper.name(),
            table = mapper.table(),
            "Registered mapper"
        );
        self.signals.publish(&Event::ClassPrepared {
            model: mapper.name(),
        });
        Ok(mapper)
    }
}
