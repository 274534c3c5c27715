//! Fabric Recovery - restores faulted records into the degraded band
//!
//! Recovery never calls a synthesis strategy. Each declared metric is
//! projected into its degraded band: values inside the band stay, values
//! outside move to the nearest edge, missing or non-finite values take the
//! band midpoint. Projection is a fixed point, so recovering twice yields the
//! same metrics as recovering once.
//!
//! Only fault-triggered recoveries count as attempts. Once a record needs more
//! than [`RecoveryConfig::max_recovery_attempts`] consecutive fault recoveries
//! it becomes an `Unrecoverable` tombstone and recovery fails with
//! `RecoveryExhausted`. A recovery requested by a caller projects the metrics
//! the same way but leaves the attempt count alone, so repeating it converges
//! instead of exhausting the record.

#![deny(unsafe_code)]

use fabric_store::RecordStore;
use fabric_types::{
    EntityId, EntityRecord, FabricClock, FabricError, FabricResult, MetricCatalog, Metrics,
    Operation, RecordHealth, Timestamp,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument};

/// Recovery configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Consecutive recoveries allowed before a record becomes unrecoverable
    #[serde(default = "default_max_recovery_attempts")]
    pub max_recovery_attempts: u32,
}

fn default_max_recovery_attempts() -> u32 {
    5
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_recovery_attempts: default_max_recovery_attempts(),
        }
    }
}

/// What caused a recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecoveryTrigger {
    /// Unexpected fault inside the fabric; consumes one attempt
    Fault,
    /// Explicit caller request; never consumes an attempt
    Request,
}

impl RecoveryTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecoveryTrigger::Fault => "fault",
            RecoveryTrigger::Request => "request",
        }
    }
}

impl std::fmt::Display for RecoveryTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What one successful recovery did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryReport {
    pub entity_id: EntityId,
    pub failed_operation: Operation,
    pub trigger: RecoveryTrigger,
    /// Fault recoveries since the last healthy mutation, this one included
    pub attempt: u32,
    pub metrics: Metrics,
    pub recovered_at: Timestamp,
}

/// Project `metrics` into each declared degraded band.
///
/// Undeclared metrics are dropped.
pub fn degrade(metrics: &Metrics, catalog: &MetricCatalog) -> Metrics {
    catalog
        .iter()
        .map(|spec| {
            let value = metrics
                .get(&spec.name)
                .copied()
                .filter(|v| v.is_finite())
                .map_or_else(|| spec.degraded.midpoint(), |v| spec.degraded.clamp(v));
            (spec.name.clone(), value)
        })
        .collect()
}

/// A recovered record together with what was done to it.
#[derive(Debug, Clone, PartialEq)]
pub struct Recovered {
    pub record: EntityRecord,
    pub report: RecoveryReport,
}

/// Degraded-band recovery policy.
#[derive(Debug, Clone, Default)]
pub struct RecoveryPolicy {
    config: RecoveryConfig,
}

impl RecoveryPolicy {
    pub fn new(config: RecoveryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RecoveryConfig {
        &self.config
    }

    /// Recover `record` in place.
    ///
    /// Intended to run while the caller holds the record's store lock. On
    /// exhaustion the record is left marked `Unrecoverable` and the error is
    /// returned. Only [`RecoveryTrigger::Fault`] can exhaust a record.
    pub fn apply(
        &self,
        record: &mut EntityRecord,
        trigger: RecoveryTrigger,
        failed_operation: Operation,
        at: Timestamp,
        catalog: &MetricCatalog,
    ) -> FabricResult<RecoveryReport> {
        if record.is_unrecoverable() {
            return Err(FabricError::exhausted(
                record.id.clone(),
                "entity is already unrecoverable",
            ));
        }

        let attempt = match trigger {
            RecoveryTrigger::Fault => record.recovery_attempts.saturating_add(1),
            RecoveryTrigger::Request => record.recovery_attempts,
        };
        if trigger == RecoveryTrigger::Fault && attempt > self.config.max_recovery_attempts {
            record.health = RecordHealth::Unrecoverable;
            record.recovery_attempts = attempt;
            record.touch(at);
            error!(
                entity_id = %record.id,
                operation = %failed_operation,
                attempts = attempt - 1,
                "Recovery attempts exhausted; entity is now unrecoverable"
            );
            return Err(FabricError::exhausted(
                record.id.clone(),
                format!(
                    "{} consecutive recoveries exceed the limit of {}",
                    attempt, self.config.max_recovery_attempts
                ),
            ));
        }

        record.metrics = degrade(&record.metrics, catalog);
        record.health = RecordHealth::Degraded;
        record.last_recovery_at = Some(at);
        record.recovery_attempts = attempt;
        record.touch(at);

        info!(
            entity_id = %record.id,
            operation = %failed_operation,
            %trigger,
            attempt,
            "Entity recovered into degraded band"
        );

        Ok(RecoveryReport {
            entity_id: record.id.clone(),
            failed_operation,
            trigger,
            attempt,
            metrics: record.metrics.clone(),
            recovered_at: at,
        })
    }

    /// Recover the stored record under `id`.
    ///
    /// A record that no longer exists cannot be recovered, so an unknown id
    /// fails with `RecoveryExhausted` rather than `NotFound`.
    #[instrument(skip(self, store, clock, catalog), fields(entity_id = %id))]
    pub fn recover(
        &self,
        store: &RecordStore,
        id: &EntityId,
        trigger: RecoveryTrigger,
        failed_operation: Operation,
        clock: &FabricClock,
        catalog: &MetricCatalog,
    ) -> FabricResult<Recovered> {
        let outcome = store.update_with(id, |record| {
            self.apply(record, trigger, failed_operation, clock.now(), catalog)
                .map(|report| Recovered {
                    record: record.clone(),
                    report,
                })
        });
        match outcome {
            Ok(result) => result,
            Err(FabricError::NotFound(id)) => Err(FabricError::exhausted(
                id,
                "entity no longer exists",
            )),
            Err(e) => Err(e),
        }
    }
}
