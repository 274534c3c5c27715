use std::collections::HashMap;
use std::sync::Arc;

use fabric_types::{EntityKind, FabricError, FabricResult, SubscriberName};
use parking_lot::RwLock;
use tracing::debug;

use crate::subscriber::Subscriber;

/// Subscribers per entity kind, in insertion order.
pub struct SubscriberRegistry {
    by_kind: RwLock<HashMap<EntityKind, Vec<Arc<dyn Subscriber>>>>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self {
            by_kind: RwLock::new(HashMap::new()),
        }
    }

    /// Append a subscriber to `kind`. Names are unique per kind.
    pub fn register(&self, kind: EntityKind, subscriber: Arc<dyn Subscriber>) -> FabricResult<()> {
        let mut by_kind = self.by_kind.write();
        let list = by_kind.entry(kind.clone()).or_default();
        if list.iter().any(|s| s.name() == subscriber.name()) {
            return Err(FabricError::SubscriberConflict {
                kind,
                name: subscriber.name().clone(),
            });
        }
        debug!(kind = %kind, subscriber = %subscriber.name(), "Subscriber registered");
        list.push(subscriber);
        Ok(())
    }

    pub fn unregister(
        &self,
        kind: &EntityKind,
        name: &SubscriberName,
    ) -> FabricResult<Arc<dyn Subscriber>> {
        let mut by_kind = self.by_kind.write();
        let not_found = || FabricError::SubscriberNotFound {
            kind: kind.clone(),
            name: name.clone(),
        };
        let list = by_kind.get_mut(kind).ok_or_else(not_found)?;
        let index = list
            .iter()
            .position(|s| s.name() == name)
            .ok_or_else(not_found)?;
        let removed = list.remove(index);
        if list.is_empty() {
            by_kind.remove(kind);
        }
        debug!(kind = %kind, subscriber = %name, "Subscriber removed");
        Ok(removed)
    }

    /// Subscribers for `kind` in registration order. Empty for unknown kinds.
    pub fn list(&self, kind: &EntityKind) -> Vec<Arc<dyn Subscriber>> {
        self.by_kind.read().get(kind).cloned().unwrap_or_default()
    }

    pub fn names(&self, kind: &EntityKind) -> Vec<SubscriberName> {
        self.by_kind
            .read()
            .get(kind)
            .map(|list| list.iter().map(|s| s.name().clone()).collect())
            .unwrap_or_default()
    }

    /// Kinds with at least one subscriber, sorted.
    pub fn kinds(&self) -> Vec<EntityKind> {
        let mut kinds: Vec<_> = self.by_kind.read().keys().cloned().collect();
        kinds.sort();
        kinds
    }

    pub fn count(&self, kind: &EntityKind) -> usize {
        self.by_kind.read().get(kind).map_or(0, Vec::len)
    }

    pub fn total(&self) -> usize {
        self.by_kind.read().values().map(Vec::len).sum()
    }
}

impl Default for SubscriberRegistry {
    fn default() -> Self {
        Self::new()
    }
}
