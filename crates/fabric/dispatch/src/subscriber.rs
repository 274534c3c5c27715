use async_trait::async_trait;
use fabric_types::{SubscriberName, SyncNotice};
use thiserror::Error;

/// Failure reported by a subscriber for one notice.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NotifyError {
    #[error("{0}")]
    Rejected(String),

    #[error("subscriber unavailable: {0}")]
    Unavailable(String),
}

/// A named collaborator notified when an entity of its kind changes.
///
/// `notify` acknowledges with a delivery strength (expected in `[0, 1]`;
/// finite values outside are clamped, non-finite values fail the delivery)
/// or fails. It may be invoked concurrently with other subscribers and is
/// dropped mid-flight on timeout, deadline or cancellation.
#[async_trait]
pub trait Subscriber: Send + Sync {
    fn name(&self) -> &SubscriberName;

    async fn notify(&self, notice: &SyncNotice) -> Result<f64, NotifyError>;
}
