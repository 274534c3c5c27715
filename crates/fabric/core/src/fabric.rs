//! The fabric facade.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use fabric_dispatch::{
    DispatchConfig, DispatchOptions, DispatchStats, Dispatcher, EventLog, Subscriber,
    SubscriberRegistry,
};
use fabric_recovery::{RecoveryConfig, RecoveryPolicy, RecoveryTrigger};
use fabric_store::{DuplicatePolicy, HealthCounts, RecordStore};
use fabric_synth::{synthesize_guarded, BoundedRandomSynthesizer, SynthesisPhase, Synthesizer};
use fabric_types::{
    validate_context, validate_payload, DispatchResult, EntityId, EntityKind, EntityRecord,
    FabricClock, FabricError, FabricResult, MetricCatalog, Operation, Payload, RecordHealth,
    SubscriberName,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::sink::{OperationOutcome, OperationRecord, OperationSink, TracingSink};

/// Result of a synchronize call: the committed record and the fan-out report.
#[derive(Debug, Clone, PartialEq)]
pub struct Synchronized {
    /// State after the update, and after recovery if a subscriber faulted
    pub record: EntityRecord,
    pub dispatch: DispatchResult,
}

/// Operation counters since the fabric was built.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationStats {
    pub registered: u64,
    pub amplified: u64,
    pub broadcasts: u64,
    pub recoveries: u64,
    pub exhausted: u64,
    pub rejected: u64,
    pub forgotten: u64,
}

#[derive(Default)]
struct OperationCounters {
    registered: AtomicU64,
    amplified: AtomicU64,
    broadcasts: AtomicU64,
    recoveries: AtomicU64,
    exhausted: AtomicU64,
    rejected: AtomicU64,
    forgotten: AtomicU64,
}

impl OperationCounters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> OperationStats {
        OperationStats {
            registered: self.registered.load(Ordering::Relaxed),
            amplified: self.amplified.load(Ordering::Relaxed),
            broadcasts: self.broadcasts.load(Ordering::Relaxed),
            recoveries: self.recoveries.load(Ordering::Relaxed),
            exhausted: self.exhausted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            forgotten: self.forgotten.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of a fabric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FabricStats {
    pub records: HealthCounts,
    pub subscribers: usize,
    pub operations: OperationStats,
    pub dispatch: DispatchStats,
    pub events_retained: usize,
}

/// How a fan-out ended.
enum FanOut {
    /// Dispatch ran; carries the fault that forced recovery, if any
    Dispatched(Synchronized, Option<String>),
    /// The snapshot was refused and the stored record recovered instead
    Refused {
        error: FabricError,
        record: EntityRecord,
    },
}

/// A mutation that reached the store, possibly via recovery.
struct Committed {
    record: EntityRecord,
    /// Why recovery ran, if it did
    fault: Option<String>,
}

/// Registry, metric synthesis, isolated fan-out and recovery behind one API.
///
/// Validation, not-found and duplicate errors surface immediately. Unexpected
/// faults (a panicking or misbehaving synthesizer, a corrupted record, a
/// panicking subscriber) are recovered inline and the call still succeeds;
/// only `RecoveryExhausted` ends an operation with a fatal error.
pub struct Fabric {
    default_kind: EntityKind,
    catalog: MetricCatalog,
    store: RecordStore,
    registry: SubscriberRegistry,
    dispatcher: Dispatcher,
    recovery: RecoveryPolicy,
    synthesizer: Arc<dyn Synthesizer>,
    clock: Arc<FabricClock>,
    sink: Arc<dyn OperationSink>,
    counters: OperationCounters,
}

impl Fabric {
    pub fn builder() -> FabricBuilder {
        FabricBuilder::new()
    }

    pub fn default_kind(&self) -> &EntityKind {
        &self.default_kind
    }

    pub fn catalog(&self) -> &MetricCatalog {
        &self.catalog
    }

    pub fn clock(&self) -> &Arc<FabricClock> {
        &self.clock
    }

    /// Register a record of the default kind.
    pub fn register(&self, id: &str, payload: Value, context: &str) -> FabricResult<EntityRecord> {
        let kind = self.default_kind.clone();
        self.register_kind(kind, id, payload, context)
    }

    /// Register a record of an explicit kind.
    pub fn register_as(
        &self,
        kind: &str,
        id: &str,
        payload: Value,
        context: &str,
    ) -> FabricResult<EntityRecord> {
        match EntityKind::parse(kind) {
            Ok(kind) => self.register_kind(kind, id, payload, context),
            Err(e) => {
                self.fail(id, None, Operation::Register, &e);
                Err(e)
            }
        }
    }

    #[instrument(skip(self, payload, context), fields(kind = %kind))]
    fn register_kind(
        &self,
        kind: EntityKind,
        id: &str,
        payload: Value,
        context: &str,
    ) -> FabricResult<EntityRecord> {
        let result = self.try_register(kind.clone(), id, payload, context);
        self.finish(id, Some(kind), Operation::Register, result)
    }

    fn try_register(
        &self,
        kind: EntityKind,
        id: &str,
        payload: Value,
        context: &str,
    ) -> FabricResult<Committed> {
        let (id, payload, context) = parse_request(id, payload, context)?;

        let mut fault = None;
        let mut exhausted = None;
        let registered = self.store.register_with(id.clone(), || {
            let mut record = EntityRecord::new(id, kind, payload, context, self.clock.now());
            match synthesize_guarded(
                self.synthesizer.as_ref(),
                &record,
                SynthesisPhase::Fresh,
                &self.catalog,
            ) {
                Ok(metrics) => record.metrics = metrics,
                Err(e) => {
                    let at = self.clock.now();
                    let recovered = self.recovery.apply(
                        &mut record,
                        RecoveryTrigger::Fault,
                        Operation::Register,
                        at,
                        &self.catalog,
                    );
                    exhausted = recovered.err();
                    fault = Some(e.to_string());
                }
            }
            record
        })?;

        if let Some(err) = exhausted {
            return Err(err);
        }
        if let Some(replaced) = &registered.replaced {
            debug!(entity_id = %replaced.id, revision = replaced.revision, "Replaced existing record");
        }
        Ok(Committed {
            record: registered.record,
            fault,
        })
    }

    /// Replace payload and context of an existing record and drift its
    /// metrics.
    #[instrument(skip(self, payload, context))]
    pub fn amplify(&self, id: &str, payload: Value, context: &str) -> FabricResult<EntityRecord> {
        let result = self.try_amplify(id, payload, context);
        let kind = result.as_ref().ok().map(|c| c.record.kind.clone());
        self.finish(id, kind, Operation::Amplify, result)
    }

    /// Same as [`Fabric::amplify`].
    pub fn update(&self, id: &str, payload: Value, context: &str) -> FabricResult<EntityRecord> {
        self.amplify(id, payload, context)
    }

    fn try_amplify(&self, id: &str, payload: Value, context: &str) -> FabricResult<Committed> {
        let (id, payload, context) = parse_request(id, payload, context)?;

        self.store.update_with(&id, |record| -> FabricResult<Committed> {
            let corrupted = !record.verify_signature();
            record.apply(payload, context, self.clock.now());

            let fault = if corrupted {
                Some("signature mismatch: stored record is corrupt".to_string())
            } else {
                match synthesize_guarded(
                    self.synthesizer.as_ref(),
                    record,
                    SynthesisPhase::Amplified,
                    &self.catalog,
                ) {
                    Ok(metrics) => {
                        record.metrics = metrics;
                        record.health = RecordHealth::Nominal;
                        record.recovery_attempts = 0;
                        None
                    }
                    Err(e) => Some(e.to_string()),
                }
            };

            if fault.is_some() {
                let at = self.clock.now();
                self.recovery.apply(
                    record,
                    RecoveryTrigger::Fault,
                    Operation::Amplify,
                    at,
                    &self.catalog,
                )?;
            }
            Ok(Committed {
                record: record.clone(),
                fault,
            })
        })?
    }

    /// Current state of a record. Never creates one.
    pub fn get_state(&self, id: &str) -> FabricResult<EntityRecord> {
        let id = EntityId::parse(id)?;
        self.store.get(&id)
    }

    /// Notify the record's subscribers of its current state.
    pub async fn broadcast(&self, id: &str) -> FabricResult<DispatchResult> {
        self.broadcast_with(id, &DispatchOptions::default()).await
    }

    #[instrument(skip(self, options))]
    pub async fn broadcast_with(
        &self,
        id: &str,
        options: &DispatchOptions,
    ) -> FabricResult<DispatchResult> {
        let record = match EntityId::parse(id).and_then(|id| self.store.get(&id)) {
            Ok(record) => record,
            Err(e) => {
                self.fail(id, None, Operation::Broadcast, &e);
                return Err(e);
            }
        };
        let result = self.fan_out(record, Operation::Broadcast, options).await;
        self.finish_dispatch(id, Operation::Broadcast, result)
            .map(|s| s.dispatch)
    }

    /// Amplify, then notify every subscriber of the record's kind.
    ///
    /// Delivery failures never roll the update back.
    pub async fn synchronize(
        &self,
        id: &str,
        payload: Value,
        context: &str,
    ) -> FabricResult<Synchronized> {
        self.synchronize_with(id, payload, context, &DispatchOptions::default())
            .await
    }

    #[instrument(skip(self, payload, context, options))]
    pub async fn synchronize_with(
        &self,
        id: &str,
        payload: Value,
        context: &str,
        options: &DispatchOptions,
    ) -> FabricResult<Synchronized> {
        let record = self.amplify(id, payload, context)?;
        let result = self.fan_out(record, Operation::Synchronize, options).await;
        self.finish_dispatch(id, Operation::Synchronize, result)
    }

    async fn fan_out(
        &self,
        record: EntityRecord,
        operation: Operation,
        options: &DispatchOptions,
    ) -> FabricResult<FanOut> {
        let subscribers = self.registry.list(&record.kind);
        let snapshot = record.snapshot(self.clock.now());

        match self.dispatcher.broadcast(snapshot, &subscribers, options).await {
            Ok(dispatch) if dispatch.faulted() => {
                let fault = dispatch
                    .failed()
                    .filter_map(|r| r.outcome.failure().filter(|f| f.is_fault()))
                    .map(|f| f.to_string())
                    .collect::<Vec<_>>()
                    .join("; ");
                let recovered = self.recovery.recover(
                    &self.store,
                    &record.id,
                    RecoveryTrigger::Fault,
                    operation,
                    &self.clock,
                    &self.catalog,
                )?;
                Ok(FanOut::Dispatched(
                    Synchronized {
                        record: recovered.record,
                        dispatch,
                    },
                    Some(fault),
                ))
            }
            Ok(dispatch) => Ok(FanOut::Dispatched(Synchronized { record, dispatch }, None)),
            Err(error) => {
                warn!(entity_id = %record.id, %error, "Snapshot rejected by dispatcher");
                let recovered = self.recovery.recover(
                    &self.store,
                    &record.id,
                    RecoveryTrigger::Fault,
                    operation,
                    &self.clock,
                    &self.catalog,
                )?;
                Ok(FanOut::Refused {
                    error,
                    record: recovered.record,
                })
            }
        }
    }

    /// Recover a record explicitly after a fault detected by the caller.
    ///
    /// Requested recoveries never consume the fault budget, so repeating one
    /// leaves the metrics where the first call put them.
    #[instrument(skip(self))]
    pub fn recover(&self, id: &str, failed_operation: Operation) -> FabricResult<EntityRecord> {
        let result = EntityId::parse(id).and_then(|id| {
            self.recovery.recover(
                &self.store,
                &id,
                RecoveryTrigger::Request,
                failed_operation,
                &self.clock,
                &self.catalog,
            )
        });
        match result {
            Ok(recovered) => {
                OperationCounters::bump(&self.counters.recoveries);
                self.emit(
                    OperationRecord::new(
                        id,
                        Operation::Recover,
                        OperationOutcome::Recovered,
                        self.clock.now(),
                    )
                    .with_kind(recovered.record.kind.clone())
                    .with_detail(format!(
                        "{} after {} ({} fault recoveries)",
                        recovered.report.trigger, failed_operation, recovered.report.attempt
                    ))
                    .with_metrics(recovered.record.metrics.clone()),
                );
                Ok(recovered.record)
            }
            Err(e) => {
                self.fail(id, None, Operation::Recover, &e);
                Err(e)
            }
        }
    }

    /// Remove a record or an unrecoverable tombstone.
    #[instrument(skip(self))]
    pub fn forget(&self, id: &str) -> FabricResult<EntityRecord> {
        match EntityId::parse(id).and_then(|id| self.store.forget(&id)) {
            Ok(record) => {
                OperationCounters::bump(&self.counters.forgotten);
                self.emit(
                    OperationRecord::new(
                        id,
                        Operation::Forget,
                        OperationOutcome::Succeeded,
                        self.clock.now(),
                    )
                    .with_kind(record.kind.clone())
                    .with_detail(format!("health was {}", record.health)),
                );
                Ok(record)
            }
            Err(e) => {
                self.fail(id, None, Operation::Forget, &e);
                Err(e)
            }
        }
    }

    pub fn subscribe(&self, kind: &str, subscriber: Arc<dyn Subscriber>) -> FabricResult<()> {
        self.registry.register(EntityKind::parse(kind)?, subscriber)
    }

    pub fn unsubscribe(&self, kind: &str, name: &str) -> FabricResult<Arc<dyn Subscriber>> {
        self.registry
            .unregister(&EntityKind::parse(kind)?, &SubscriberName::parse(name)?)
    }

    pub fn subscribers(&self, kind: &str) -> FabricResult<Vec<SubscriberName>> {
        Ok(self.registry.names(&EntityKind::parse(kind)?))
    }

    pub fn events(&self) -> &Arc<EventLog> {
        self.dispatcher.log()
    }

    pub fn contains(&self, id: &str) -> bool {
        EntityId::parse(id).is_ok_and(|id| self.store.contains(&id))
    }

    pub fn ids(&self) -> Vec<EntityId> {
        self.store.ids()
    }

    pub fn stats(&self) -> FabricStats {
        FabricStats {
            records: self.store.health_counts(),
            subscribers: self.registry.total(),
            operations: self.counters.snapshot(),
            dispatch: self.dispatcher.stats(),
            events_retained: self.dispatcher.log().len(),
        }
    }

    fn emit(&self, record: OperationRecord) {
        self.sink.record(&record);
    }

    fn fail(&self, id: &str, kind: Option<EntityKind>, operation: Operation, error: &FabricError) {
        let outcome = if error.is_fatal() {
            OperationCounters::bump(&self.counters.exhausted);
            OperationOutcome::Exhausted
        } else {
            OperationCounters::bump(&self.counters.rejected);
            OperationOutcome::Rejected
        };
        let mut record = OperationRecord::new(id, operation, outcome, self.clock.now())
            .with_detail(error.to_string());
        record.kind = kind;
        self.emit(record);
    }

    fn finish(
        &self,
        id: &str,
        kind: Option<EntityKind>,
        operation: Operation,
        result: FabricResult<Committed>,
    ) -> FabricResult<EntityRecord> {
        let committed = match result {
            Ok(committed) => committed,
            Err(e) => {
                self.fail(id, kind, operation, &e);
                return Err(e);
            }
        };

        match operation {
            Operation::Register => OperationCounters::bump(&self.counters.registered),
            _ => OperationCounters::bump(&self.counters.amplified),
        }
        let mut entry = OperationRecord::new(
            id,
            operation,
            OperationOutcome::Succeeded,
            self.clock.now(),
        )
        .with_kind(committed.record.kind.clone())
        .with_metrics(committed.record.metrics.clone());
        if let Some(fault) = committed.fault {
            OperationCounters::bump(&self.counters.recoveries);
            entry.outcome = OperationOutcome::Recovered;
            entry.detail = Some(fault);
        }
        self.emit(entry);
        Ok(committed.record)
    }

    fn finish_dispatch(
        &self,
        id: &str,
        operation: Operation,
        result: FabricResult<FanOut>,
    ) -> FabricResult<Synchronized> {
        let (synchronized, fault) = match result {
            Ok(FanOut::Dispatched(synchronized, fault)) => (synchronized, fault),
            Ok(FanOut::Refused { error, record }) => {
                OperationCounters::bump(&self.counters.recoveries);
                self.emit(
                    OperationRecord::new(
                        id,
                        operation,
                        OperationOutcome::Recovered,
                        self.clock.now(),
                    )
                    .with_kind(record.kind.clone())
                    .with_detail(error.to_string())
                    .with_metrics(record.metrics.clone()),
                );
                return Err(error);
            }
            Err(e) => {
                self.fail(id, None, operation, &e);
                return Err(e);
            }
        };

        OperationCounters::bump(&self.counters.broadcasts);
        let dispatch = &synchronized.dispatch;
        let mut entry = OperationRecord::new(
            id,
            operation,
            OperationOutcome::Succeeded,
            self.clock.now(),
        )
        .with_kind(dispatch.kind.clone())
        .with_detail(format!(
            "delivered {} of {}",
            dispatch.delivered_count(),
            dispatch.reports.len()
        ))
        .with_metrics(synchronized.record.metrics.clone());
        if let Some(fault) = fault {
            OperationCounters::bump(&self.counters.recoveries);
            entry.outcome = OperationOutcome::Recovered;
            entry.detail = Some(format!("{}; {}", entry.detail.unwrap_or_default(), fault));
        }
        self.emit(entry);
        Ok(synchronized)
    }
}

fn parse_request(
    id: &str,
    payload: Value,
    context: &str,
) -> FabricResult<(EntityId, Payload, String)> {
    let id = EntityId::parse(id)?;
    let payload = match payload {
        Value::Object(map) => map,
        other => {
            return Err(FabricError::validation(format!(
                "payload must be a JSON object, got {}",
                json_type(&other)
            )))
        }
    };
    validate_payload(&payload)?;
    validate_context(context)?;
    Ok((id, payload, context.to_string()))
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Builder for [`Fabric`].
pub struct FabricBuilder {
    default_kind: Option<EntityKind>,
    catalog: MetricCatalog,
    duplicate_policy: DuplicatePolicy,
    dispatch: DispatchConfig,
    recovery: RecoveryConfig,
    synthesizer: Option<Arc<dyn Synthesizer>>,
    sink: Option<Arc<dyn OperationSink>>,
    subscribers: Vec<(EntityKind, Arc<dyn Subscriber>)>,
}

impl FabricBuilder {
    pub fn new() -> Self {
        Self {
            default_kind: None,
            catalog: MetricCatalog::default(),
            duplicate_policy: DuplicatePolicy::default(),
            dispatch: DispatchConfig::default(),
            recovery: RecoveryConfig::default(),
            synthesizer: None,
            sink: None,
            subscribers: Vec::new(),
        }
    }

    pub fn kind(mut self, kind: EntityKind) -> Self {
        self.default_kind = Some(kind);
        self
    }

    pub fn catalog(mut self, catalog: MetricCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn duplicate_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.duplicate_policy = policy;
        self
    }

    pub fn dispatch_config(mut self, config: DispatchConfig) -> Self {
        self.dispatch = config;
        self
    }

    pub fn recovery_config(mut self, config: RecoveryConfig) -> Self {
        self.recovery = config;
        self
    }

    pub fn synthesizer(mut self, synthesizer: Arc<dyn Synthesizer>) -> Self {
        self.synthesizer = Some(synthesizer);
        self
    }

    pub fn sink(mut self, sink: Arc<dyn OperationSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn subscriber(mut self, kind: EntityKind, subscriber: Arc<dyn Subscriber>) -> Self {
        self.subscribers.push((kind, subscriber));
        self
    }

    pub fn build(self) -> FabricResult<Fabric> {
        let default_kind = self.default_kind.unwrap_or_default();
        if self.catalog.is_empty() {
            return Err(FabricError::InvalidCatalog("catalog is empty".into()));
        }

        let clock = Arc::new(FabricClock::new());
        let registry = SubscriberRegistry::new();
        for (kind, subscriber) in self.subscribers {
            registry.register(kind, subscriber)?;
        }

        Ok(Fabric {
            default_kind,
            catalog: self.catalog,
            store: RecordStore::new(self.duplicate_policy),
            registry,
            dispatcher: Dispatcher::new(self.dispatch, Arc::clone(&clock)),
            recovery: RecoveryPolicy::new(self.recovery),
            synthesizer: self
                .synthesizer
                .unwrap_or_else(|| Arc::new(BoundedRandomSynthesizer::default())),
            clock,
            sink: self.sink.unwrap_or_else(|| Arc::new(TracingSink)),
            counters: OperationCounters::default(),
        })
    }
}

impl Default for FabricBuilder {
    fn default() -> Self {
        Self::new()
    }
}
