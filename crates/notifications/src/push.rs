use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use crate::notification::Notification;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("push delivery failed: {0}")]
pub struct PushError(pub String);

/// Device push delivery (FCM, APNs, ...).
#[async_trait]
pub trait PushGateway: Send + Sync {
    async fn push(&self, notification: &Notification) -> Result<(), PushError>;
}

/// Gateway that only logs. Used when no push provider is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPushGateway;

#[async_trait]
impl PushGateway for NoopPushGateway {
    async fn push(&self, notification: &Notification) -> Result<(), PushError> {
        debug!(
            notification_id = %notification.id,
            recipient_id = %notification.recipient_id,
            "push gateway disabled; skipping delivery"
        );
        Ok(())
    }
}
