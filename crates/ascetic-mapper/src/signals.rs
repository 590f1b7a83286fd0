//! Lifecycle notifications.
//!
//! The mapper publishes an [`Event`] at each lifecycle point; subscribers
//! ignore the return value except for [`EventKind::ColumnMangling`], where a
//! subscriber may answer with `(priority, replacement column)`. The highest
//! priority answer wins.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use ascetic_core::Record;

use crate::instance::Instance;

/// Event discriminant used to subscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    PreInit,
    PostInit,
    PreSave,
    PostSave,
    PreDelete,
    PostDelete,
    ClassPrepared,
    ColumnMangling,
}

/// A published notification.
#[derive(Debug, Clone, Copy)]
pub enum Event<'a> {
    /// Before an instance is constructed from `record`.
    PreInit { model: &'a str, record: &'a Record },
    PostInit { instance: &'a Instance },
    PreSave { instance: &'a Instance },
    PostSave { instance: &'a Instance, created: bool },
    PreDelete { instance: &'a Instance },
    PostDelete { instance: &'a Instance },
    /// A mapper finished construction and was registered.
    ClassPrepared { model: &'a str },
    /// A column reference for `model.field` is about to be emitted.
    ColumnMangling {
        model: &'a str,
        field: &'a str,
        column: &'a str,
    },
}

impl Event<'_> {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::PreInit { .. } => EventKind::PreInit,
            Event::PostInit { .. } => EventKind::PostInit,
            Event::PreSave { .. } => EventKind::PreSave,
            Event::PostSave { .. } => EventKind::PostSave,
            Event::PreDelete { .. } => EventKind::PreDelete,
            Event::PostDelete { .. } => EventKind::PostDelete,
            Event::ClassPrepared { .. } => EventKind::ClassPrepared,
            Event::ColumnMangling { .. } => EventKind::ColumnMangling,
        }
    }

    /// Model name the event concerns.
    pub fn model(&self) -> String {
        match self {
            Event::PreInit { model, .. }
            | Event::ClassPrepared { model }
            | Event::ColumnMangling { model, .. } => (*model).to_string(),
            Event::PostInit { instance }
            | Event::PreSave { instance }
            | Event::PostSave { instance, .. }
            | Event::PreDelete { instance }
            | Event::PostDelete { instance } => instance.model(),
        }
    }
}

/// Subscriber callback.
pub type Subscriber = Arc<dyn Fn(&Event<'_>) -> Option<(i32, String)> + Send + Sync>;

/// Handle returned by [`SignalBus::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Publish/subscribe bus shared by every mapper of a registry.
#[derive(Default)]
pub struct SignalBus {
    subscribers: RwLock<Vec<(SubscriptionId, EventKind, Subscriber)>>,
    next_id: AtomicU64,
}

impl SignalBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, kind: EventKind, f: F) -> SubscriptionId
    where
        F: Fn(&Event<'_>) -> Option<(i32, String)> + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, kind, Arc::new(f)));
        id
    }

    /// Subscribe a callback whose return value is irrelevant.
    pub fn connect<F>(&self, kind: EventKind, f: F) -> SubscriptionId
    where
        F: Fn(&Event<'_>) + Send + Sync + 'static,
    {
        self.subscribe(kind, move |event| {
            f(event);
            None
        })
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subs = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = subs.len();
        subs.retain(|(sid, _, _)| *sid != id);
        subs.len() != before
    }

    fn matching(&self, kind: EventKind) -> Vec<Subscriber> {
        // Cloned out so callbacks may subscribe or publish themselves.
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(_, k, _)| *k == kind)
            .map(|(_, _, f)| Arc::clone(f))
            .collect()
    }

    /// Deliver `event`, returning every non-empty answer in subscription order.
    pub fn publish(&self, event: &Event<'_>) -> Vec<(i32, String)> {
        self.matching(event.kind())
            .iter()
            .filter_map(|f| f(event))
            .collect()
    }

    /// Column to emit for `model.field`, after mangling subscribers had
    /// their say.
    pub fn mangle_column(&self, model: &str, field: &str, column: &str) -> String {
        let answers = self.publish(&Event::ColumnMangling {
            model,
            field,
            column,
        });
        answers
            .into_iter()
            .fold(None::<(i32, String)>, |best, (p, name)| match best {
                Some((bp, _)) if bp >= p => best,
                _ => Some((p, name)),
            })
            .map_or_else(|| column.to_string(), |(_, name)| name)
    }
}

impl std::fmt::Debug for SignalBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        f.debug_struct("SignalBus")
            .field("subscribers", &count)
            .finish()
    }
}
