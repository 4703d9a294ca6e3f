use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use thiserror::Error;

use leasehold_core::UserId;

use crate::notification::Notification;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotificationStoreError {
    #[error("notification storage error: {0}")]
    Storage(String),
}

/// Persistent notification inbox.
#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Store `notification`. Returns `false` when `idempotency_key` was
    /// already used, in which case nothing is written.
    async fn insert(
        &self,
        notification: Notification,
        idempotency_key: Option<&str>,
    ) -> Result<bool, NotificationStoreError>;

    /// Notifications for one user, oldest first.
    async fn list_for(&self, recipient_id: UserId) -> Result<Vec<Notification>, NotificationStoreError>;
}

#[async_trait]
impl<S> NotificationStore for Arc<S>
where
    S: NotificationStore + ?Sized,
{
    async fn insert(
        &self,
        notification: Notification,
        idempotency_key: Option<&str>,
    ) -> Result<bool, NotificationStoreError> {
        (**self).insert(notification, idempotency_key).await
    }

    async fn list_for(&self, recipient_id: UserId) -> Result<Vec<Notification>, NotificationStoreError> {
        (**self).list_for(recipient_id).await
    }
}

#[derive(Debug, Default)]
struct Inbox {
    notifications: Vec<Notification>,
    seen_keys: HashSet<String>,
}

/// In-memory inbox for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryNotificationStore {
    inner: RwLock<Inbox>,
}

impl InMemoryNotificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|i| i.notifications.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl NotificationStore for InMemoryNotificationStore {
    async fn insert(
        &self,
        notification: Notification,
        idempotency_key: Option<&str>,
    ) -> Result<bool, NotificationStoreError> {
        let mut inbox = self
            .inner
            .write()
            .map_err(|_| NotificationStoreError::Storage("lock poisoned".to_string()))?;

        if let Some(key) = idempotency_key {
            if !inbox.seen_keys.insert(key.to_string()) {
                return Ok(false);
            }
        }

        inbox.notifications.push(notification);
        Ok(true)
    }

    async fn list_for(&self, recipient_id: UserId) -> Result<Vec<Notification>, NotificationStoreError> {
        let inbox = self
            .inner
            .read()
            .map_err(|_| NotificationStoreError::Storage("lock poisoned".to_string()))?;

        Ok(inbox
            .notifications
            .iter()
            .filter(|n| n.recipient_id == recipient_id)
            .cloned()
            .collect())
    }
}
