//! Ready-made subscribers.

use async_trait::async_trait;
use fabric_types::{SubscriberName, SyncNotice};
use tokio::sync::mpsc;
use tracing::info;

use crate::subscriber::{NotifyError, Subscriber};

/// Forwards every notice into a bounded channel.
///
/// Never waits for capacity: a full or closed channel fails the delivery.
pub struct ChannelSubscriber {
    name: SubscriberName,
    tx: mpsc::Sender<SyncNotice>,
}

impl ChannelSubscriber {
    pub fn new(name: SubscriberName, buffer: usize) -> (Self, mpsc::Receiver<SyncNotice>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self { name, tx }, rx)
    }
}

#[async_trait]
impl Subscriber for ChannelSubscriber {
    fn name(&self) -> &SubscriberName {
        &self.name
    }

    async fn notify(&self, notice: &SyncNotice) -> Result<f64, NotifyError> {
        self.tx.try_send(notice.clone()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => NotifyError::Unavailable("channel full".into()),
            mpsc::error::TrySendError::Closed(_) => {
                NotifyError::Unavailable("channel closed".into())
            }
        })?;
        Ok(1.0)
    }
}

/// Logs each notice at info level and acknowledges with a fixed strength.
pub struct TracingSubscriber {
    name: SubscriberName,
    strength: f64,
}

impl TracingSubscriber {
    pub fn new(name: SubscriberName) -> Self {
        Self::with_strength(name, 1.0)
    }

    pub fn with_strength(name: SubscriberName, strength: f64) -> Self {
        Self { name, strength }
    }
}

#[async_trait]
impl Subscriber for TracingSubscriber {
    fn name(&self) -> &SubscriberName {
        &self.name
    }

    async fn notify(&self, notice: &SyncNotice) -> Result<f64, NotifyError> {
        info!(
            target: "fabric::sync",
            subscriber = %self.name,
            entity_id = %notice.entity_id,
            kind = %notice.kind,
            revision = notice.snapshot.revision,
            context = %notice.snapshot.context,
            "Entity synchronized"
        );
        Ok(self.strength)
    }
}

/// Accepts everything with full strength.
pub struct NoopSubscriber {
    name: SubscriberName,
}

impl NoopSubscriber {
    pub fn new(name: SubscriberName) -> Self {
        Self { name }
    }
}

#[async_trait]
impl Subscriber for NoopSubscriber {
    fn name(&self) -> &SubscriberName {
        &self.name
    }

    async fn notify(&self, _notice: &SyncNotice) -> Result<f64, NotifyError> {
        Ok(1.0)
    }
}
