//! Fabric Dispatch - subscriber registry and synchronization fan-out
//!
//! - [`Subscriber`]: the capability a collaborator implements to receive
//!   [`SyncNotice`](fabric_types::SyncNotice)s
//! - [`SubscriberRegistry`]: ordered subscriber lists per entity kind
//! - [`Dispatcher`]: delivers one snapshot to every subscriber concurrently,
//!   each with its own timeout, and aggregates a
//!   [`DispatchResult`](fabric_types::DispatchResult)
//! - [`EventLog`]: bounded, append-only history of finished deliveries
//!
//! One target's failure never prevents delivery to the others, and target
//! failures are reported as values, never raised.

#![deny(unsafe_code)]

pub mod builtin;
pub mod dispatcher;
pub mod log;
pub mod registry;
pub mod subscriber;

pub use builtin::{ChannelSubscriber, NoopSubscriber, TracingSubscriber};
pub use dispatcher::{DispatchConfig, DispatchOptions, DispatchStats, Dispatcher};
pub use log::EventLog;
pub use registry::SubscriberRegistry;
pub use subscriber::{NotifyError, Subscriber};
