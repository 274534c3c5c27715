//! Core types for the Entity Fabric.
//!
//! The fabric stores entity records under validated identifiers, derives a
//! catalog of bounded health metrics for each record, and fans every update
//! out to the subscribers registered for the record's kind. This crate holds
//! the vocabulary shared by every other fabric crate:
//!
//! - [`EntityId`], [`EntityKind`], [`SubscriberName`]: validated identifiers
//! - [`EntityRecord`] and [`EntitySnapshot`]: stored state and its immutable copy
//! - [`MetricCatalog`]: declared metric bands (bounds, nominal, degraded)
//! - [`SyncNotice`], [`SyncEvent`], [`DispatchResult`]: fan-out vocabulary
//! - [`FabricClock`]: strictly monotonic hybrid logical timestamps
//! - [`FabricError`]: the error taxonomy

#![deny(unsafe_code)]

pub mod clock;
pub mod error;
pub mod event;
pub mod ids;
pub mod metrics;
pub mod operation;
pub mod record;

pub use clock::{FabricClock, Timestamp};
pub use error::{FabricError, FabricResult};
pub use event::{
    DeliveryOutcome, DispatchFailure, DispatchResult, EventId, SyncEvent, SyncNotice, TargetReport,
};
pub use ids::{EntityId, EntityKind, SubscriberName};
pub use metrics::{MetricCatalog, MetricRange, MetricSpec, MetricViolation, Metrics};
pub use operation::Operation;
pub use record::{
    validate_context, validate_payload, EntityRecord, EntitySnapshot, Payload, RecordHealth,
    Signature,
};
