//! Identity map with pluggable isolation strategies.
//!
//! The map guarantees at most one live [`Instance`] per `(model, key)` while
//! a transaction scope lasts. It is made of two independent structures:
//!
//! - the **alive set**: non-owning handles (or a "confirmed nonexistent"
//!   marker) by key; an instance dropped everywhere else simply stops
//!   resolving,
//! - the **LRU list**: a bounded list of owning handles in promotion order,
//!   oldest pruned first once over capacity.
//!
//! What `add`/`get`/`exists` actually do is delegated to the strategy for
//! the active [`IsolationLevel`].

use std::collections::HashMap;
use std::fmt;

use ascetic_core::Key;
use indexmap::IndexMap;

use crate::config::IsolationLevel;
use crate::instance::{Instance, WeakInstance};

/// Identity-map key: mapper name plus primary-key tuple.
pub type IdentityKey = (String, Key);

/// Why an identity-map lookup did not produce an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheError {
    /// Not cached; fall back to storage.
    Miss,
    /// Storage already confirmed the key absent. Terminal.
    DoesNotExist,
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheError::Miss => f.write_str("cache miss"),
            CacheError::DoesNotExist => f.write_str("object does not exist"),
        }
    }
}

impl std::error::Error for CacheError {}

#[derive(Debug, Clone)]
enum Entry {
    Alive(WeakInstance),
    Nonexistent,
}

/// The two structures every strategy operates on.
struct Store {
    alive: HashMap<IdentityKey, Entry>,
    lru: IndexMap<IdentityKey, Instance>,
    capacity: usize,
}

impl Store {
    fn touch(&mut self, key: &IdentityKey, instance: &Instance) {
        self.lru.shift_remove(key);
        self.lru.insert(key.clone(), instance.clone());
        while self.lru.len() > self.capacity {
            self.lru.shift_remove_index(0);
        }
    }

    fn lookup(&mut self, key: &IdentityKey) -> Option<Result<Instance, CacheError>> {
        match self.alive.get(key)? {
            Entry::Nonexistent => Some(Err(CacheError::DoesNotExist)),
            Entry::Alive(weak) => match weak.upgrade() {
                Some(instance) => Some(Ok(instance)),
                None => {
                    self.alive.remove(key);
                    None
                }
            },
        }
    }
}

/// Behavior of the identity map at one isolation level.
trait IsolationStrategy {
    fn add(&self, store: &mut Store, key: IdentityKey, value: Option<&Instance>);
    fn get(&self, store: &mut Store, key: &IdentityKey) -> Result<Instance, CacheError>;
    fn exists(&self, store: &mut Store, key: &IdentityKey) -> bool;
}

/// `READ_UNCOMMITTED` and `READ_COMMITTED`: nothing is remembered.
struct Inert;

impl IsolationStrategy for Inert {
    fn add(&self, _store: &mut Store, _key: IdentityKey, _value: Option<&Instance>) {}

    fn get(&self, _store: &mut Store, _key: &IdentityKey) -> Result<Instance, CacheError> {
        Err(CacheError::Miss)
    }

    fn exists(&self, _store: &mut Store, _key: &IdentityKey) -> bool {
        false
    }
}

/// `REPEATABLE_READS`: existing rows only.
struct RepeatableReads;

impl IsolationStrategy for RepeatableReads {
    fn add(&self, store: &mut Store, key: IdentityKey, value: Option<&Instance>) {
        if let Some(instance) = value {
            store.touch(&key, instance);
            store.alive.insert(key, Entry::Alive(instance.downgrade()));
        }
    }

    fn get(&self, store: &mut Store, key: &IdentityKey) -> Result<Instance, CacheError> {
        match store.lookup(key) {
            Some(Ok(instance)) => {
                store.touch(key, &instance);
                Ok(instance)
            }
            // A marker left behind by a stricter level is not trusted here.
            Some(Err(_)) | None => Err(CacheError::Miss),
        }
    }

    fn exists(&self, store: &mut Store, key: &IdentityKey) -> bool {
        matches!(store.lookup(key), Some(Ok(_)))
    }
}

/// `SERIALIZABLE`: existing rows plus confirmed-missing keys.
struct Serializable;

impl IsolationStrategy for Serializable {
    fn add(&self, store: &mut Store, key: IdentityKey, value: Option<&Instance>) {
        match value {
            Some(instance) => {
                store.touch(&key, instance);
                store.alive.insert(key, Entry::Alive(instance.downgrade()));
            }
            None => {
                store.lru.shift_remove(&key);
                store.alive.insert(key, Entry::Nonexistent);
            }
        }
    }

    fn get(&self, store: &mut Store, key: &IdentityKey) -> Result<Instance, CacheError> {
        match store.lookup(key) {
            Some(Ok(instance)) => {
                store.touch(key, &instance);
                Ok(instance)
            }
            Some(Err(e)) => Err(e),
            None => Err(CacheError::Miss),
        }
    }

    fn exists(&self, store: &mut Store, key: &IdentityKey) -> bool {
        store.lookup(key).is_some()
    }
}

fn strategy_for(level: IsolationLevel) -> Box<dyn IsolationStrategy> {
    match level {
        IsolationLevel::ReadUncommitted | IsolationLevel::ReadCommitted => Box::new(Inert),
        IsolationLevel::RepeatableReads => Box::new(RepeatableReads),
        IsolationLevel::Serializable => Box::new(Serializable),
    }
}

/// Per-connection cache from `(model, key)` to the live instance.
pub struct IdentityMap {
    store: Store,
    level: IsolationLevel,
    strategy: Box<dyn IsolationStrategy>,
    last_level: Option<IsolationLevel>,
}

impl IdentityMap {
    /// Create a map with the default LRU capacity of 1000.
    pub fn new(level: IsolationLevel) -> Self {
        Self::with_capacity(level, 1000)
    }

    pub fn with_capacity(level: IsolationLevel, capacity: usize) -> Self {
        Self {
            store: Store {
                alive: HashMap::new(),
                lru: IndexMap::new(),
                capacity,
            },
            level,
            strategy: strategy_for(level),
            last_level: None,
        }
    }

    pub fn isolation_level(&self) -> IsolationLevel {
        self.level
    }

    pub fn set_isolation_level(&mut self, level: IsolationLevel) {
        tracing::debug!(from = ?self.level, to = ?level, "identity map isolation level");
        self.level = level;
        self.strategy = strategy_for(level);
    }

    /// Remember `value` under `key`; `None` records a confirmed absence
    /// (kept only at `SERIALIZABLE`).
    pub fn add(&mut self, model: &str, key: &Key, value: Option<&Instance>) {
        self.strategy
            .add(&mut self.store, (model.to_string(), key.clone()), value);
    }

    /// Look up the live instance for `key`.
    pub fn get(&mut self, model: &str, key: &Key) -> Result<Instance, CacheError> {
        let ikey = (model.to_string(), key.clone());
        let result = self.strategy.get(&mut self.store, &ikey);
        tracing::trace!(model, key = %key, hit = result.is_ok(), "identity map lookup");
        result
    }

    pub fn exists(&mut self, model: &str, key: &Key) -> bool {
        self.strategy
            .exists(&mut self.store, &(model.to_string(), key.clone()))
    }

    /// Evict from both the alive set and the LRU list.
    pub fn remove(&mut self, model: &str, key: &Key) {
        let ikey = (model.to_string(), key.clone());
        self.store.alive.remove(&ikey);
        self.store.lru.shift_remove(&ikey);
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        tracing::debug!(entries = self.store.alive.len(), "clearing identity map");
        self.store.alive.clear();
        self.store.lru.clear();
    }

    /// Downgrade to `READ_UNCOMMITTED`, remembering the current level.
    ///
    /// The remembered level is a single slot: disabling twice and enabling
    /// once restores the level from before the first call.
    pub fn disable(&mut self) {
        if self.last_level.is_none() {
            self.last_level = Some(self.level);
        }
        self.set_isolation_level(IsolationLevel::ReadUncommitted);
    }

    /// Restore the level saved by [`IdentityMap::disable`].
    pub fn enable(&mut self) {
        if let Some(level) = self.last_level.take() {
            self.set_isolation_level(level);
        }
    }

    /// Every still-alive instance registered for `model`.
    pub fn alive_instances(&self, model: &str) -> Vec<Instance> {
        self.store
            .alive
            .iter()
            .filter(|((m, _), _)| m == model)
            .filter_map(|(_, entry)| match entry {
                Entry::Alive(weak) => weak.upgrade(),
                Entry::Nonexistent => None,
            })
            .collect()
    }

    /// Number of entries in the alive set, markers included.
    pub fn len(&self) -> usize {
        self.store.alive.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.alive.is_empty()
    }

    /// Number of owning handles in the LRU list.
    pub fn lru_len(&self) -> usize {
        self.store.lru.len()
    }
}

impl fmt::Debug for IdentityMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityMap")
            .field("level", &self.level)
            .field("entries", &self.store.alive.len())
            .field("lru", &self.store.lru.len())
            .field("capacity", &self.store.capacity)
            .finish()
    }
}
