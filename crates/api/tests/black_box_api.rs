use std::sync::Arc;

use reqwest::StatusCode;
use serde_json::{json, Value};

use leasehold_api::app::{build_app, services, AppServices};
use leasehold_core::UserId;
use leasehold_infra::DispatcherConfig;
use leasehold_notifications::NotificationStore;

struct TestServer {
    base_url: String,
    services: Arc<AppServices>,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn(config: DispatcherConfig) -> Self {
        // Same router as prod, in-memory store, ephemeral port.
        let services = Arc::new(services::in_memory_services(config).unwrap());
        let app = build_app(services.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            services,
            handle,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn enqueue(client: &reqwest::Client, srv: &TestServer, body: Value) -> Value {
    let res = client
        .post(srv.url("/outbox/events"))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    res.json().await.unwrap()
}

async fn dispatch(client: &reqwest::Client, srv: &TestServer) -> Value {
    let res = client.post(srv.url("/outbox/dispatch")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    res.json().await.unwrap()
}

#[tokio::test]
async fn health_is_public() {
    let srv = TestServer::spawn(DispatcherConfig::default()).await;
    let res = reqwest::get(srv.url("/health")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn enqueue_dispatch_and_inspect() {
    let srv = TestServer::spawn(DispatcherConfig::default()).await;
    let client = reqwest::Client::new();
    let tenant = UserId::new();

    let created = enqueue(
        &client,
        &srv,
        json!({
            "event_type": "Payment.Succeeded",
            "payload": {"recipient_id": tenant.to_string(), "amount": 1450}
        }),
    )
    .await;
    assert_eq!(created["status"], "pending");
    assert_eq!(created["retry_count"], 0);
    let id = created["id"].as_str().unwrap().to_string();

    let due: Value = client
        .get(srv.url("/outbox/due"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(due["count"], 1);

    let summary = dispatch(&client, &srv).await;
    assert_eq!(
        summary,
        json!({"processed": 1, "failed": 0, "unrecorded": 0, "total": 1, "deferred": 0})
    );

    let event: Value = client
        .get(srv.url(&format!("/outbox/events/{id}")))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(event["status"], "completed");

    let inbox = srv.services.notifications.list_for(tenant).await.unwrap();
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].title, "Payment received");

    let stats: Value = client
        .get(srv.url("/outbox/stats"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["completed"], 1);
    assert_eq!(stats["pending"], 0);
}

#[tokio::test]
async fn failing_event_shows_up_in_failed_listing() {
    let srv = TestServer::spawn(DispatcherConfig::default()).await;
    let client = reqwest::Client::new();

    // No recipient_id: the notification handler rejects it.
    enqueue(
        &client,
        &srv,
        json!({"event_type": "Payment.Overdue", "payload": {}, "max_retries": 1}),
    )
    .await;

    let summary = dispatch(&client, &srv).await;
    assert_eq!(summary["failed"], 1);

    let failed: Value = client
        .get(srv.url("/outbox/events?status=failed"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(failed["count"], 1);
    let event = &failed["events"][0];
    assert_eq!(event["retry_count"], 1);
    assert!(
        event["error_message"]
            .as_str()
            .unwrap()
            .contains("recipient_id")
    );
}

#[tokio::test]
async fn unknown_event_types_are_completed() {
    let srv = TestServer::spawn(DispatcherConfig::default()).await;
    let client = reqwest::Client::new();

    enqueue(&client, &srv, json!({"event_type": "Maintenance.Requested", "payload": {}})).await;

    let summary = dispatch(&client, &srv).await;
    assert_eq!(summary["processed"], 1);

    let completed: Value = client
        .get(srv.url("/outbox/events?status=completed"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(completed["count"], 1);
}

#[tokio::test]
async fn bad_requests_are_rejected() {
    let srv = TestServer::spawn(DispatcherConfig::default()).await;
    let client = reqwest::Client::new();

    let res = client
        .post(srv.url("/outbox/events"))
        .json(&json!({"event_type": "   ", "payload": {}}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "validation_error");

    let res = client.get(srv.url("/outbox/events/not-a-uuid")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = client
        .get(srv.url(&format!("/outbox/events/{}", leasehold_core::OutboxEventId::new())))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = client
        .get(srv.url("/outbox/events?status=archived"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn scheduled_events_are_not_due_yet() {
    let srv = TestServer::spawn(DispatcherConfig::default()).await;
    let client = reqwest::Client::new();
    let later = chrono::Utc::now() + chrono::Duration::hours(1);

    enqueue(
        &client,
        &srv,
        json!({"event_type": "Lease.Signed", "payload": {}, "scheduled_at": later}),
    )
    .await;

    let summary = dispatch(&client, &srv).await;
    assert_eq!(summary["total"], 0);

    let stats: Value = client
        .get(srv.url("/outbox/stats"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["pending"], 1);
}
