//! Entity Fabric
//!
//! One generic implementation of the registry / bounded-metric synthesis /
//! isolated fan-out / self-healing recovery pattern:
//!
//! ```text
//! caller -> Fabric::register / amplify
//!             -> RecordStore write (per-id lock)
//!             -> Synthesizer (guarded)         -- fault --> RecoveryPolicy
//!        -> Fabric::synchronize
//!             -> Dispatcher::broadcast(snapshot, subscribers of kind)
//!                  -> one task per subscriber, each with its own timeout
//!                                              -- panic --> RecoveryPolicy
//! ```
//!
//! Every operation emits one [`OperationRecord`] to the configured
//! [`OperationSink`]. A [`Bootstrap`] turns a [`FabricConfig`] into a wired
//! fabric using a static [`SubscriberFactory`].
//!
//! # Example
//!
//! ```no_run
//! use fabric_core::Fabric;
//! use serde_json::json;
//!
//! # async fn example() -> fabric_core::FabricResult<()> {
//! let fabric = Fabric::builder().build()?;
//! fabric.register("a1", json!({"x": 1}), "primary")?;
//! let synced = fabric.synchronize("a1", json!({"x": 2}), "secondary").await?;
//! assert_eq!(synced.record.context, "secondary");
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]

pub mod bootstrap;
pub mod config;
pub mod fabric;
pub mod sink;

pub use bootstrap::{Bootstrap, SubscriberConstructor, SubscriberFactory};
pub use config::{FabricConfig, KindConfig, SynthesizerConfig, SynthesizerKind};
pub use fabric::{Fabric, FabricBuilder, FabricStats, OperationStats, Synchronized};
pub use sink::{CompositeSink, MemorySink, OperationOutcome, OperationRecord, OperationSink, TracingSink};

// Re-export the vocabulary callers need alongside the facade.
pub use fabric_dispatch::{
    ChannelSubscriber, DispatchConfig, DispatchOptions, DispatchStats, NoopSubscriber,
    NotifyError, Subscriber, TracingSubscriber,
};
pub use fabric_recovery::RecoveryConfig;
pub use fabric_store::DuplicatePolicy;
pub use fabric_synth::{BoundedRandomSynthesizer, DeterministicSynthesizer, Synthesizer};
pub use fabric_types::*;
pub use tokio_util::sync::CancellationToken;
