use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::clock::Timestamp;
use crate::ids::{EntityId, EntityKind, SubscriberName};
use crate::record::{EntitySnapshot, Payload};

/// Sync event identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub uuid::Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

/// What a subscriber receives for one delivery.
///
/// The snapshot is shared between all targets of one broadcast and is never
/// a live view of the record.
#[derive(Clone, Debug)]
pub struct SyncNotice {
    pub entity_id: EntityId,
    pub kind: EntityKind,
    pub target: SubscriberName,
    pub snapshot: Arc<EntitySnapshot>,
    pub sent_at: Timestamp,
}

/// Why a single target delivery failed.
#[derive(Error, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum DispatchFailure {
    #[error("timeout")]
    Timeout,

    #[error("cancelled")]
    Cancelled,

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("rejected: {0}")]
    Rejected(String),

    #[error("invalid strength: {0}")]
    InvalidStrength(f64),

    #[error("panicked: {0}")]
    Panicked(String),
}

impl DispatchFailure {
    /// A panicking subscriber is an unexpected fault, not an expected failure.
    pub fn is_fault(&self) -> bool {
        matches!(self, DispatchFailure::Panicked(_))
    }
}

/// Result of one target delivery.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DeliveryOutcome {
    Delivered { strength: f64 },
    Failed { failure: DispatchFailure },
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered { .. })
    }

    /// Strength for delivered outcomes, `0.0` for failures.
    pub fn strength(&self) -> f64 {
        match self {
            DeliveryOutcome::Delivered { strength } => *strength,
            DeliveryOutcome::Failed { .. } => 0.0,
        }
    }

    pub fn failure(&self) -> Option<&DispatchFailure> {
        match self {
            DeliveryOutcome::Delivered { .. } => None,
            DeliveryOutcome::Failed { failure } => Some(failure),
        }
    }
}

/// Append-only record of a finished delivery attempt.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SyncEvent {
    pub id: EventId,
    pub entity_id: EntityId,
    pub target: SubscriberName,
    pub payload_snapshot: Payload,
    pub context_at_send: String,
    /// Synthetic confidence in `[0, 1]`; zero when the delivery failed
    pub delivery_strength: f64,
    pub timestamp: Timestamp,
    pub outcome: DeliveryOutcome,
}

impl SyncEvent {
    pub fn from_outcome(
        snapshot: &EntitySnapshot,
        target: SubscriberName,
        outcome: DeliveryOutcome,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            id: EventId::new(),
            entity_id: snapshot.entity_id.clone(),
            target,
            payload_snapshot: snapshot.payload.clone(),
            context_at_send: snapshot.context.clone(),
            delivery_strength: outcome.strength(),
            timestamp,
            outcome,
        }
    }
}

/// Per-target line of a [`DispatchResult`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TargetReport {
    pub target: SubscriberName,
    pub outcome: DeliveryOutcome,
}

/// Aggregate of one broadcast, in subscriber registration order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DispatchResult {
    pub entity_id: EntityId,
    pub kind: EntityKind,
    pub revision: u64,
    pub reports: Vec<TargetReport>,
}

impl DispatchResult {
    pub fn empty(snapshot: &EntitySnapshot) -> Self {
        Self {
            entity_id: snapshot.entity_id.clone(),
            kind: snapshot.kind.clone(),
            revision: snapshot.revision,
            reports: Vec::new(),
        }
    }

    pub fn delivered(&self) -> impl Iterator<Item = &TargetReport> {
        self.reports.iter().filter(|r| r.outcome.is_delivered())
    }

    pub fn failed(&self) -> impl Iterator<Item = &TargetReport> {
        self.reports.iter().filter(|r| !r.outcome.is_delivered())
    }

    pub fn delivered_count(&self) -> usize {
        self.delivered().count()
    }

    pub fn failed_count(&self) -> usize {
        self.failed().count()
    }

    pub fn all_delivered(&self) -> bool {
        self.reports.iter().all(|r| r.outcome.is_delivered())
    }

    pub fn report_for(&self, target: &str) -> Option<&TargetReport> {
        self.reports.iter().find(|r| r.target.as_str() == target)
    }

    /// Whether any target faulted (panicked) rather than failing normally.
    pub fn faulted(&self) -> bool {
        self.reports
            .iter()
            .any(|r| r.outcome.failure().is_some_and(DispatchFailure::is_fault))
    }
}
