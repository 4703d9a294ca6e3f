use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use leasehold_core::UserId;
use leasehold_events::{EventHandler, HandlerRegistry, HandlerResult};

use crate::notification::{Notification, NotificationKind};
use crate::push::PushGateway;
use crate::store::NotificationStore;

/// Payload fields a notification event may carry. Anything else is ignored.
#[derive(Debug, Deserialize)]
struct NotificationPayload {
    recipient_id: UserId,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    idempotency_key: Option<String>,
}

/// Turns one event type into an in-app notification plus a push.
pub struct NotificationHandler {
    kind: NotificationKind,
    store: Arc<dyn NotificationStore>,
    push: Arc<dyn PushGateway>,
}

impl NotificationHandler {
    pub fn new(
        kind: NotificationKind,
        store: Arc<dyn NotificationStore>,
        push: Arc<dyn PushGateway>,
    ) -> Self {
        Self { kind, store, push }
    }

    pub fn kind(&self) -> NotificationKind {
        self.kind
    }

    fn build(&self, payload: &JsonValue) -> anyhow::Result<(Notification, Option<String>)> {
        let parsed = NotificationPayload::deserialize(payload)
            .with_context(|| format!("invalid {} payload", self.kind.event_type()))?;

        let notification = Notification::new(
            parsed.recipient_id,
            self.kind,
            parsed.title.unwrap_or_else(|| self.kind.default_title().to_string()),
            parsed.body.unwrap_or_else(|| self.kind.default_body().to_string()),
        );
        Ok((notification, parsed.idempotency_key))
    }
}

#[async_trait]
impl EventHandler for NotificationHandler {
    async fn handle(&self, event_type: &str, payload: &JsonValue) -> HandlerResult {
        let (notification, key) = self.build(payload)?;

        let inserted = self
            .store
            .insert(notification.clone(), key.as_deref())
            .await
            .context("failed to store notification")?;

        if !inserted {
            // Already delivered by an earlier attempt.
            debug!(event_type, idempotency_key = ?key, "duplicate notification skipped");
            return Ok(());
        }

        if let Err(err) = self.push.push(&notification).await {
            warn!(
                event_type,
                notification_id = %notification.id,
                recipient_id = %notification.recipient_id,
                error = %err,
                "push delivery failed; notification stored"
            );
        }

        Ok(())
    }
}

/// Register a [`NotificationHandler`] for every [`NotificationKind`].
pub fn register_defaults(
    registry: &mut HandlerRegistry,
    store: Arc<dyn NotificationStore>,
    push: Arc<dyn PushGateway>,
) {
    for kind in NotificationKind::ALL {
        registry.register(
            kind.event_type(),
            Arc::new(NotificationHandler::new(
                kind,
                Arc::clone(&store),
                Arc::clone(&push),
            )),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::push::{NoopPushGateway, PushError};
    use crate::store::{InMemoryNotificationStore, NotificationStoreError};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FailingPush(AtomicUsize);

    #[async_trait]
    impl PushGateway for FailingPush {
        async fn push(&self, _: &Notification) -> Result<(), PushError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Err(PushError("gateway unreachable".to_string()))
        }
    }

    struct BrokenStore;

    #[async_trait]
    impl NotificationStore for BrokenStore {
        async fn insert(&self, _: Notification, _: Option<&str>) -> Result<bool, NotificationStoreError> {
            Err(NotificationStoreError::Storage("disk full".to_string()))
        }

        async fn list_for(&self, _: UserId) -> Result<Vec<Notification>, NotificationStoreError> {
            Ok(Vec::new())
        }
    }

    fn handler_with(
        kind: NotificationKind,
        store: Arc<dyn NotificationStore>,
        push: Arc<dyn PushGateway>,
    ) -> NotificationHandler {
        NotificationHandler::new(kind, store, push)
    }

    #[tokio::test]
    async fn stores_notification_with_default_copy() {
        let store = Arc::new(InMemoryNotificationStore::new());
        let user = UserId::new();
        let handler = handler_with(
            NotificationKind::PaymentSucceeded,
            store.clone(),
            Arc::new(NoopPushGateway),
        );

        handler
            .handle("Payment.Succeeded", &json!({"recipient_id": user.to_string(), "amount": 950}))
            .await
            .unwrap();

        let inbox = store.list_for(user).await.unwrap();
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].kind, NotificationKind::PaymentSucceeded);
        assert_eq!(inbox[0].title, "Payment received");
    }

    #[tokio::test]
    async fn payload_title_and_body_override_defaults() {
        let store = Arc::new(InMemoryNotificationStore::new());
        let user = UserId::new();
        let handler = handler_with(NotificationKind::LeaseSigned, store.clone(), Arc::new(NoopPushGateway));

        handler
            .handle(
                "Lease.Signed",
                &json!({"recipient_id": user.to_string(), "title": "Welcome home", "body": "Keys on Friday"}),
            )
            .await
            .unwrap();

        let inbox = store.list_for(user).await.unwrap();
        assert_eq!(inbox[0].title, "Welcome home");
        assert_eq!(inbox[0].body, "Keys on Friday");
    }

    #[tokio::test]
    async fn missing_recipient_fails_the_event() {
        let handler = handler_with(
            NotificationKind::PaymentOverdue,
            Arc::new(InMemoryNotificationStore::new()),
            Arc::new(NoopPushGateway),
        );

        let err = handler.handle("Payment.Overdue", &json!({"amount": 10})).await.unwrap_err();
        assert!(err.to_string().contains("invalid Payment.Overdue payload"));
    }

    #[tokio::test]
    async fn storage_failure_fails_the_event() {
        let handler = handler_with(
            NotificationKind::PaymentOverdue,
            Arc::new(BrokenStore),
            Arc::new(NoopPushGateway),
        );

        let err = handler
            .handle("Payment.Overdue", &json!({"recipient_id": UserId::new().to_string()}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("disk full"));
    }

    #[tokio::test]
    async fn push_failure_is_best_effort() {
        let store = Arc::new(InMemoryNotificationStore::new());
        let push = Arc::new(FailingPush(AtomicUsize::new(0)));
        let handler = handler_with(NotificationKind::LegislationUpdated, store.clone(), push.clone());

        handler
            .handle("Legislation.Updated", &json!({"recipient_id": UserId::new().to_string()}))
            .await
            .unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(push.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn redelivery_with_same_key_does_not_duplicate() {
        let store = Arc::new(InMemoryNotificationStore::new());
        let push = Arc::new(FailingPush(AtomicUsize::new(0)));
        let handler = handler_with(NotificationKind::PaymentSucceeded, store.clone(), push.clone());
        let payload = json!({"recipient_id": UserId::new().to_string(), "idempotency_key": "pay-123"});

        handler.handle("Payment.Succeeded", &payload).await.unwrap();
        handler.handle("Payment.Succeeded", &payload).await.unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(push.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn register_defaults_covers_every_kind() {
        let mut registry = HandlerRegistry::new();
        register_defaults(
            &mut registry,
            Arc::new(InMemoryNotificationStore::new()),
            Arc::new(NoopPushGateway),
        );

        assert_eq!(
            registry.event_types(),
            vec!["Lease.Signed", "Legislation.Updated", "Payment.Overdue", "Payment.Succeeded"]
        );
    }
}
