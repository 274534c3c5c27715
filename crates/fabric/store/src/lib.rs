//! Fabric Record Store - entity records keyed by identifier
//!
//! The store is an in-memory concurrent map with per-id mutual exclusion:
//! mutations on one id serialize in lock-acquisition order, mutations on
//! different ids proceed in parallel.
//!
//! Mutations are closure based. The closure runs while the id's entry is
//! locked, so it must not call back into the same store.
//!
//! Records marked `Unrecoverable` stay in the store as tombstones: every read
//! or write on them fails with `RecoveryExhausted` until the id is forgotten.

#![deny(unsafe_code)]

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use fabric_types::{EntityId, EntityRecord, FabricError, FabricResult, RecordHealth};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// What `register` does when the id is already present.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicatePolicy {
    /// Fail with `AlreadyExists`
    #[default]
    Reject,
    /// Replace the existing record
    Overwrite,
}

/// Result of a successful registration.
#[derive(Clone, Debug)]
pub struct Registered {
    pub record: EntityRecord,
    /// The record that was replaced under `DuplicatePolicy::Overwrite`
    pub replaced: Option<EntityRecord>,
}

/// Record counts by health.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCounts {
    pub nominal: usize,
    pub degraded: usize,
    pub unrecoverable: usize,
}

impl HealthCounts {
    pub fn total(&self) -> usize {
        self.nominal + self.degraded + self.unrecoverable
    }
}

fn tombstone_error(id: &EntityId) -> FabricError {
    FabricError::exhausted(
        id.clone(),
        "entity is unrecoverable; forget it before registering again",
    )
}

/// In-memory record store
pub struct RecordStore {
    records: DashMap<EntityId, EntityRecord>,
    policy: DuplicatePolicy,
}

impl RecordStore {
    pub fn new(policy: DuplicatePolicy) -> Self {
        Self {
            records: DashMap::new(),
            policy,
        }
    }

    pub fn policy(&self) -> DuplicatePolicy {
        self.policy
    }

    /// Insert the record produced by `build` under `id`.
    ///
    /// `build` runs with the id's entry locked and only when the insert is
    /// allowed by the duplicate policy.
    pub fn register_with<F>(&self, id: EntityId, build: F) -> FabricResult<Registered>
    where
        F: FnOnce() -> EntityRecord,
    {
        match self.records.entry(id) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_unrecoverable() {
                    return Err(tombstone_error(occupied.key()));
                }
                match self.policy {
                    DuplicatePolicy::Reject => {
                        Err(FabricError::AlreadyExists(occupied.key().clone()))
                    }
                    DuplicatePolicy::Overwrite => {
                        let record = build();
                        debug_assert_eq!(&record.id, occupied.key());
                        let replaced = occupied.insert(record.clone());
                        debug!(entity_id = %record.id, "Record overwritten");
                        Ok(Registered {
                            record,
                            replaced: Some(replaced),
                        })
                    }
                }
            }
            Entry::Vacant(vacant) => {
                let record = build();
                debug_assert_eq!(&record.id, vacant.key());
                vacant.insert(record.clone());
                Ok(Registered {
                    record,
                    replaced: None,
                })
            }
        }
    }

    /// Run `f` on the record with its entry locked.
    ///
    /// Fails with `NotFound` for unknown ids and `RecoveryExhausted` for
    /// tombstones; `f` is not called in either case.
    pub fn update_with<F, T>(&self, id: &EntityId, f: F) -> FabricResult<T>
    where
        F: FnOnce(&mut EntityRecord) -> T,
    {
        let mut entry = self
            .records
            .get_mut(id)
            .ok_or_else(|| FabricError::NotFound(id.clone()))?;
        if entry.is_unrecoverable() {
            return Err(tombstone_error(id));
        }
        Ok(f(entry.value_mut()))
    }

    /// Clone of the live record.
    pub fn get(&self, id: &EntityId) -> FabricResult<EntityRecord> {
        let entry = self
            .records
            .get(id)
            .ok_or_else(|| FabricError::NotFound(id.clone()))?;
        if entry.is_unrecoverable() {
            return Err(tombstone_error(id));
        }
        Ok(entry.value().clone())
    }

    /// Remove a record or tombstone.
    pub fn forget(&self, id: &EntityId) -> FabricResult<EntityRecord> {
        let (_, record) = self
            .records
            .remove(id)
            .ok_or_else(|| FabricError::NotFound(id.clone()))?;
        debug!(entity_id = %id, health = %record.health, "Record forgotten");
        Ok(record)
    }

    pub fn contains(&self, id: &EntityId) -> bool {
        self.records.contains_key(id)
    }

    /// All stored ids, sorted.
    pub fn ids(&self) -> Vec<EntityId> {
        let mut ids: Vec<_> = self.records.iter().map(|r| r.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn health_counts(&self) -> HealthCounts {
        let mut counts = HealthCounts::default();
        for record in self.records.iter() {
            match record.health {
                RecordHealth::Nominal => counts.nominal += 1,
                RecordHealth::Degraded => counts.degraded += 1,
                RecordHealth::Unrecoverable => counts.unrecoverable += 1,
            }
        }
        counts
    }
}

impl Default for RecordStore {
    fn default() -> Self {
        Self::new(DuplicatePolicy::default())
    }
}
