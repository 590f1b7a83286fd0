//! Locale-aware column rewriting.
//!
//! A translated field keeps one column per locale: `title` holds the
//! default text, `title_fr` the French one. [`LocaleColumns`] subscribes to
//! column mangling so every query, insert and update of a translated field
//! addresses the column of the active locale. The mapper core knows nothing
//! about locales; it only asks the signal bus which column to emit.
//!
//! ```rust,ignore
//! let locales = LocaleColumns::new("en").translate("Post", ["title", "body"]);
//! locales.install(registry.signals());
//! locales.activate("fr");
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, PoisonError, RwLock};

use ascetic_mapper::{Event, EventKind, SignalBus, SubscriptionId};

/// Priority used unless [`LocaleColumns::priority`] says otherwise.
pub const DEFAULT_PRIORITY: i32 = 10;

#[derive(Debug)]
struct State {
    active: String,
    fields: BTreeMap<String, BTreeSet<String>>,
}

/// Column-mangling subscriber for translated fields.
///
/// Clones share the active locale, so the handle kept by the application
/// switches what an installed subscriber answers.
#[derive(Debug, Clone)]
pub struct LocaleColumns {
    default_locale: String,
    priority: i32,
    state: Arc<RwLock<State>>,
}

impl LocaleColumns {
    /// Rewriter whose `default_locale` columns carry no suffix.
    pub fn new(default_locale: impl Into<String>) -> Self {
        let default_locale = default_locale.into();
        Self {
            state: Arc::new(RwLock::new(State {
                active: default_locale.clone(),
                fields: BTreeMap::new(),
            })),
            default_locale,
            priority: DEFAULT_PRIORITY,
        }
    }

    /// Mark fields of `model` as translated.
    #[must_use]
    pub fn translate<S: Into<String>>(
        self,
        model: impl Into<String>,
        fields: impl IntoIterator<Item = S>,
    ) -> Self {
        {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            state
                .fields
                .entry(model.into())
                .or_default()
                .extend(fields.into_iter().map(Into::into));
        }
        self
    }

    /// Rank against other mangling subscribers; the highest answer wins.
    #[must_use]
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Switch the locale used for subsequent column lookups.
    pub fn activate(&self, locale: impl Into<String>) {
        let locale = locale.into();
        tracing::debug!(locale = %locale, "activating locale");
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .active = locale;
    }

    /// Go back to the default locale.
    pub fn deactivate(&self) {
        self.activate(self.default_locale.clone());
    }

    pub fn active(&self) -> String {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .active
            .clone()
    }

    /// Column for `model.field` stored in `column`, or `None` to leave it.
    pub fn column_for(&self, model: &str, field: &str, column: &str) -> Option<String> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        if state.active == self.default_locale {
            return None;
        }
        state
            .fields
            .get(model)
            .filter(|fields| fields.contains(field))
            .map(|_| format!("{column}_{}", state.active))
    }

    /// Subscribe to `signals`; unsubscribe with the returned id.
    pub fn install(&self, signals: &SignalBus) -> SubscriptionId {
        let locales = self.clone();
        signals.subscribe(EventKind::ColumnMangling, move |event| match event {
            Event::ColumnMangling {
                model,
                field,
                column,
            } => locales
                .column_for(model, field, column)
                .map(|name| (locales.priority, name)),
            _ => None,
        })
    }
}
