//! Per-kind row filters limiting what a session loads and receives.

use std::collections::HashMap;

use crate::gateway::Filter;
use crate::store::EntityKind;

/// Filters applied to loads, reloads and subscriptions, keyed by kind.
///
/// Kinds without an entry see every row.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    filters: HashMap<EntityKind, Filter>,
}

impl Scope {
    /// No restrictions.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, kind: EntityKind, filter: Filter) -> Self {
        self.filters.insert(kind, filter);
        self
    }

    /// Filter for `kind`.
    #[must_use]
    pub fn filter(&self, kind: EntityKind) -> Filter {
        self.filters.get(&kind).cloned().unwrap_or_default()
    }
}
