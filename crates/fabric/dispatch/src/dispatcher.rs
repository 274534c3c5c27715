use std::any::Any;
use std::future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use fabric_types::{
    DeliveryOutcome, DispatchFailure, DispatchResult, EntitySnapshot, FabricClock, FabricResult,
    SyncEvent, SyncNotice, TargetReport,
};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::log::EventLog;
use crate::subscriber::Subscriber;

/// Dispatcher configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Per-target delivery timeout
    #[serde(default = "default_delivery_timeout_ms")]
    pub delivery_timeout_ms: u64,

    /// Sync events kept in the event log
    #[serde(default = "default_event_retention")]
    pub event_retention: usize,

    /// Deliveries running at once across all broadcasts
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
}

fn default_delivery_timeout_ms() -> u64 {
    250
}

fn default_event_retention() -> usize {
    4096
}

fn default_max_in_flight() -> usize {
    64
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            delivery_timeout_ms: default_delivery_timeout_ms(),
            event_retention: default_event_retention(),
            max_in_flight: default_max_in_flight(),
        }
    }
}

impl DispatchConfig {
    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.delivery_timeout_ms)
    }
}

/// Per-call overrides for one broadcast.
#[derive(Debug, Clone, Default)]
pub struct DispatchOptions {
    /// Replaces the configured per-target timeout
    pub timeout: Option<Duration>,
    /// Absolute cut-off shared by all targets
    pub deadline: Option<Instant>,
    pub cancel: Option<CancellationToken>,
}

impl DispatchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// Delivery counters since the dispatcher was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchStats {
    pub broadcasts: u64,
    pub delivered: u64,
    pub failed: u64,
    pub timeouts: u64,
    pub panics: u64,
}

#[derive(Default)]
struct Counters {
    broadcasts: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
    timeouts: AtomicU64,
    panics: AtomicU64,
}

impl Counters {
    fn record(&self, outcome: &DeliveryOutcome) {
        match outcome {
            DeliveryOutcome::Delivered { .. } => {
                self.delivered.fetch_add(1, Ordering::Relaxed);
            }
            DeliveryOutcome::Failed { failure } => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                match failure {
                    DispatchFailure::Timeout => {
                        self.timeouts.fetch_add(1, Ordering::Relaxed);
                    }
                    DispatchFailure::Panicked(_) => {
                        self.panics.fetch_add(1, Ordering::Relaxed);
                    }
                    _ => {}
                }
            }
        }
    }

    fn snapshot(&self) -> DispatchStats {
        DispatchStats {
            broadcasts: self.broadcasts.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            panics: self.panics.load(Ordering::Relaxed),
        }
    }
}

/// Fans one snapshot out to a list of subscribers.
///
/// Every target runs as its own task with its own timeout. A slow, failing
/// or panicking target only affects its own report.
pub struct Dispatcher {
    config: DispatchConfig,
    clock: Arc<FabricClock>,
    log: Arc<EventLog>,
    permits: Arc<Semaphore>,
    counters: Counters,
}

impl Dispatcher {
    pub fn new(config: DispatchConfig, clock: Arc<FabricClock>) -> Self {
        let log = Arc::new(EventLog::new(config.event_retention));
        let permits = Arc::new(Semaphore::new(config.max_in_flight.max(1)));
        Self {
            config,
            clock,
            log,
            permits,
            counters: Counters::default(),
        }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub fn log(&self) -> &Arc<EventLog> {
        &self.log
    }

    pub fn stats(&self) -> DispatchStats {
        self.counters.snapshot()
    }

    /// Deliver `snapshot` to every subscriber and wait for all outcomes.
    ///
    /// Reports come back in the order of `subscribers`. The only error is a
    /// snapshot that fails its own signature check.
    pub async fn broadcast(
        &self,
        snapshot: EntitySnapshot,
        subscribers: &[Arc<dyn Subscriber>],
        options: &DispatchOptions,
    ) -> FabricResult<DispatchResult> {
        snapshot.verify()?;
        self.counters.broadcasts.fetch_add(1, Ordering::Relaxed);

        let mut result = DispatchResult::empty(&snapshot);
        if subscribers.is_empty() {
            debug!(entity_id = %snapshot.entity_id, "No subscribers for kind");
            return Ok(result);
        }

        let snapshot = Arc::new(snapshot);
        let timeout = options
            .timeout
            .unwrap_or_else(|| self.config.delivery_timeout());

        let handles = subscribers.iter().map(|subscriber| {
            let notice = SyncNotice {
                entity_id: snapshot.entity_id.clone(),
                kind: snapshot.kind.clone(),
                target: subscriber.name().clone(),
                snapshot: Arc::clone(&snapshot),
                sent_at: self.clock.now(),
            };
            tokio::spawn(deliver(
                Arc::clone(subscriber),
                notice,
                timeout,
                options.deadline,
                options.cancel.clone(),
                Arc::clone(&self.permits),
            ))
        });
        let joined = join_all(handles).await;

        for (subscriber, joined) in subscribers.iter().zip(joined) {
            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(e) if e.is_panic() => {
                    let message = panic_message(e.into_panic());
                    warn!(
                        entity_id = %snapshot.entity_id,
                        subscriber = %subscriber.name(),
                        message = %message,
                        "Subscriber panicked during delivery"
                    );
                    DeliveryOutcome::Failed {
                        failure: DispatchFailure::Panicked(message),
                    }
                }
                Err(_) => DeliveryOutcome::Failed {
                    failure: DispatchFailure::Cancelled,
                },
            };

            if let DeliveryOutcome::Failed { failure } = &outcome {
                debug!(
                    entity_id = %snapshot.entity_id,
                    subscriber = %subscriber.name(),
                    %failure,
                    "Delivery failed"
                );
            }

            self.counters.record(&outcome);
            self.log.append(SyncEvent::from_outcome(
                &snapshot,
                subscriber.name().clone(),
                outcome.clone(),
                self.clock.now(),
            ));
            result.reports.push(TargetReport {
                target: subscriber.name().clone(),
                outcome,
            });
        }

        debug!(
            entity_id = %result.entity_id,
            revision = result.revision,
            delivered = result.delivered_count(),
            failed = result.failed_count(),
            "Broadcast complete"
        );
        Ok(result)
    }
}

async fn deliver(
    subscriber: Arc<dyn Subscriber>,
    notice: SyncNotice,
    timeout: Duration,
    deadline: Option<Instant>,
    cancel: Option<CancellationToken>,
    permits: Arc<Semaphore>,
) -> DeliveryOutcome {
    let failed = |failure| DeliveryOutcome::Failed { failure };

    let cancelled = async {
        match &cancel {
            Some(token) => token.cancelled().await,
            None => future::pending().await,
        }
    };
    let expired = async {
        match deadline {
            Some(at) => tokio::time::sleep_until(at).await,
            None => future::pending().await,
        }
    };
    let attempt = async {
        // Closed semaphore only happens on shutdown
        let Ok(_permit) = permits.acquire().await else {
            return failed(DispatchFailure::Cancelled);
        };
        match tokio::time::timeout(timeout, subscriber.notify(&notice)).await {
            Ok(Ok(strength)) if strength.is_finite() => DeliveryOutcome::Delivered {
                strength: strength.clamp(0.0, 1.0),
            },
            Ok(Ok(strength)) => failed(DispatchFailure::InvalidStrength(strength)),
            Ok(Err(e)) => failed(DispatchFailure::Rejected(e.to_string())),
            Err(_) => failed(DispatchFailure::Timeout),
        }
    };

    tokio::select! {
        biased;
        _ = cancelled => failed(DispatchFailure::Cancelled),
        _ = expired => failed(DispatchFailure::DeadlineExceeded),
        outcome = attempt => outcome,
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
