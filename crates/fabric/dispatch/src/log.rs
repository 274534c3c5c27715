use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use fabric_types::{EntityId, SyncEvent};
use parking_lot::RwLock;

/// Bounded append-only history of sync events.
///
/// Once `capacity` is reached the oldest events are evicted; `total()` keeps
/// counting every append.
pub struct EventLog {
    events: RwLock<VecDeque<SyncEvent>>,
    capacity: usize,
    total: AtomicU64,
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: RwLock::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
            total: AtomicU64::new(0),
        }
    }

    pub fn append(&self, event: SyncEvent) {
        self.total.fetch_add(1, Ordering::Relaxed);
        if self.capacity == 0 {
            return;
        }
        let mut events = self.events.write();
        while events.len() >= self.capacity {
            events.pop_front();
        }
        events.push_back(event);
    }

    /// The `n` most recent events, oldest first.
    pub fn recent(&self, n: usize) -> Vec<SyncEvent> {
        let events = self.events.read();
        let skip = events.len().saturating_sub(n);
        events.iter().skip(skip).cloned().collect()
    }

    pub fn events_for(&self, entity_id: &EntityId) -> Vec<SyncEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| &e.entity_id == entity_id)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Events appended since creation, including evicted ones.
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn clear(&self) {
        self.events.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fabric_types::{DeliveryOutcome, EntityKind, EntityRecord, SubscriberName, Timestamp};
    use serde_json::json;

    fn event(id: &str, physical: u64) -> SyncEvent {
        let at = Timestamp {
            physical,
            logical: 0,
        };
        let snapshot = EntityRecord::new(
            EntityId::parse(id).unwrap(),
            EntityKind::parse("core").unwrap(),
            json!({}).as_object().cloned().unwrap(),
            "",
            at,
        )
        .snapshot(at);
        SyncEvent::from_outcome(
            &snapshot,
            SubscriberName::parse("a.one").unwrap(),
            DeliveryOutcome::Delivered { strength: 1.0 },
            at,
        )
    }

    #[test]
    fn evicts_oldest_beyond_capacity() {
        let log = EventLog::new(3);
        for i in 0..5 {
            log.append(event("a1", i));
        }
        assert_eq!(log.len(), 3);
        assert_eq!(log.total(), 5);
        let physical: Vec<u64> = log.recent(10).iter().map(|e| e.timestamp.physical).collect();
        assert_eq!(physical, vec![2, 3, 4]);
    }

    #[test]
    fn recent_returns_tail_in_order() {
        let log = EventLog::new(10);
        for i in 0..4 {
            log.append(event("a1", i));
        }
        let physical: Vec<u64> = log.recent(2).iter().map(|e| e.timestamp.physical).collect();
        assert_eq!(physical, vec![2, 3]);
    }

    #[test]
    fn filters_by_entity() {
        let log = EventLog::new(10);
        log.append(event("a1", 1));
        log.append(event("b2", 2));
        log.append(event("a1", 3));
        assert_eq!(log.events_for(&EntityId::parse("a1").unwrap()).len(), 2);
        log.clear();
        assert!(log.is_empty());
        assert_eq!(log.total(), 3);
    }

    #[test]
    fn zero_capacity_only_counts() {
        let log = EventLog::new(0);
        log.append(event("a1", 1));
        assert!(log.is_empty());
        assert_eq!(log.total(), 1);
    }
}
