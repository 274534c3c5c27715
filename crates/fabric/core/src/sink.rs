//! Structured operation records and the sinks that receive them.
//!
//! The fabric emits exactly one [`OperationRecord`] per Register, Amplify,
//! Broadcast, Synchronize, Recover and Forget call. Where those records end up
//! is decided by the injected [`OperationSink`].

use std::sync::Arc;

use fabric_types::{EntityId, EntityKind, Metrics, Operation, Timestamp};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// How an operation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationOutcome {
    Succeeded,
    /// A fault occurred and the record was recovered into the degraded band
    Recovered,
    /// Validation, not-found or duplicate: nothing was changed
    Rejected,
    /// Recovery was exhausted; the record is unrecoverable
    Exhausted,
}

impl OperationOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationOutcome::Succeeded => "succeeded",
            OperationOutcome::Recovered => "recovered",
            OperationOutcome::Rejected => "rejected",
            OperationOutcome::Exhausted => "exhausted",
        }
    }
}

impl std::fmt::Display for OperationOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One structured log entry per fabric operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRecord {
    /// Raw id as supplied; may be invalid for rejected operations
    pub entity_id: String,
    pub kind: Option<EntityKind>,
    pub operation: Operation,
    pub outcome: OperationOutcome,
    pub detail: Option<String>,
    pub metrics: Metrics,
    pub timestamp: Timestamp,
}

impl OperationRecord {
    pub fn new(
        entity_id: impl Into<String>,
        operation: Operation,
        outcome: OperationOutcome,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            entity_id: entity_id.into(),
            kind: None,
            operation,
            outcome,
            detail: None,
            metrics: Metrics::new(),
            timestamp,
        }
    }

    pub fn with_kind(mut self, kind: EntityKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn is_for(&self, id: &EntityId) -> bool {
        self.entity_id == id.as_str()
    }
}

/// Receiver of operation records.
pub trait OperationSink: Send + Sync {
    fn record(&self, record: &OperationRecord);
}

/// Emits each record as a `tracing` event under the `fabric::ops` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl OperationSink for TracingSink {
    fn record(&self, record: &OperationRecord) {
        let kind = record.kind.as_ref().map(EntityKind::as_str).unwrap_or("-");
        let detail = record.detail.as_deref().unwrap_or("");
        let metrics = serde_json::to_string(&record.metrics).unwrap_or_default();
        match record.outcome {
            OperationOutcome::Succeeded => info!(
                target: "fabric::ops",
                entity_id = %record.entity_id,
                kind,
                operation = %record.operation,
                outcome = %record.outcome,
                detail,
                metrics = %metrics,
                timestamp = %record.timestamp,
                "Fabric operation"
            ),
            _ => warn!(
                target: "fabric::ops",
                entity_id = %record.entity_id,
                kind,
                operation = %record.operation,
                outcome = %record.outcome,
                detail,
                metrics = %metrics,
                timestamp = %record.timestamp,
                "Fabric operation"
            ),
        }
    }
}

/// In-memory sink for tests
#[derive(Default)]
pub struct MemorySink {
    records: RwLock<Vec<OperationRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<OperationRecord> {
        self.records.read().clone()
    }

    pub fn records_for(&self, id: &EntityId) -> Vec<OperationRecord> {
        self.records
            .read()
            .iter()
            .filter(|r| r.is_for(id))
            .cloned()
            .collect()
    }

    pub fn count(&self, operation: Operation) -> usize {
        self.records
            .read()
            .iter()
            .filter(|r| r.operation == operation)
            .count()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    pub fn clear(&self) {
        self.records.write().clear();
    }
}

impl OperationSink for MemorySink {
    fn record(&self, record: &OperationRecord) {
        self.records.write().push(record.clone());
    }
}

/// Forwards every record to each inner sink in order.
#[derive(Default, Clone)]
pub struct CompositeSink {
    sinks: Vec<Arc<dyn OperationSink>>,
}

impl CompositeSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn OperationSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl OperationSink for CompositeSink {
    fn record(&self, record: &OperationRecord) {
        for sink in &self.sinks {
            sink.record(record);
        }
    }
}
