//! End-to-end dispatcher scenarios against the in-memory outbox.
//!
//! Covers the full lifecycle: enqueue → claim → handle → complete / retry / fail,
//! plus batch limits, scheduling and concurrent runs.

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use chrono::{DateTime, Duration, Utc};
    use proptest::prelude::*;
    use serde_json::json;

    use leasehold_core::OutboxEventId;
    use leasehold_events::{EventStatus, HandlerError, HandlerRegistry, NewOutboxEvent};

    use crate::config::DispatcherConfig;
    use crate::outbox::{Dispatcher, InMemoryOutboxStore, OutboxStore};

    fn failing_registry(event_type: &str) -> HandlerRegistry {
        let mut registry = HandlerRegistry::new();
        registry.register_fn(event_type, |_, _| Err(HandlerError::failed("downstream 500")));
        registry
    }

    fn counting_registry(event_type: &str, calls: Arc<AtomicUsize>) -> HandlerRegistry {
        let mut registry = HandlerRegistry::new();
        registry.register_fn(event_type, move |_, _| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        registry
    }

    async fn enqueue_past(store: &InMemoryOutboxStore, event_type: &str, n: usize) -> DateTime<Utc> {
        let now = Utc::now();
        for i in 0..n {
            store
                .enqueue(
                    NewOutboxEvent::new(event_type, json!({"seq": i}))
                        .scheduled_at(now - Duration::seconds(60)),
                )
                .await
                .unwrap();
        }
        now
    }

    #[tokio::test]
    async fn persistent_failure_ends_in_failed_after_max_retries() {
        let store = InMemoryOutboxStore::arc();
        let event = store
            .enqueue(NewOutboxEvent::new("Payment.Overdue", json!({"invoice": 9})))
            .await
            .unwrap();
        let dispatcher = Dispatcher::new(
            Arc::clone(&store),
            failing_registry("Payment.Overdue"),
            DispatcherConfig::default(),
        )
        .unwrap();

        let mut now = Utc::now();
        for expected_retry in 1..=3u32 {
            let summary = dispatcher.run_once_at(now).await.unwrap();
            assert_eq!(summary.total, 1);
            assert_eq!(summary.failed, 1);

            let current = store.get(event.id).await.unwrap().unwrap();
            assert_eq!(current.retry_count, expected_retry);
            assert_eq!(current.error_message.as_deref(), Some("downstream 500"));

            if expected_retry < 3 {
                assert_eq!(current.status, EventStatus::Pending);
                // 2^retry minutes on the default 60s base, counted from the failure.
                let wait = Duration::minutes(1 << expected_retry);
                assert!(current.scheduled_at >= now + wait);
                assert!(current.scheduled_at < now + wait + Duration::seconds(5));
                now = current.scheduled_at;
            } else {
                assert_eq!(current.status, EventStatus::Failed);
            }
        }

        // Terminal: later runs leave it alone.
        let later = dispatcher.run_once_at(now + Duration::days(1)).await.unwrap();
        assert_eq!(later.total, 0);
    }

    #[tokio::test]
    async fn future_events_wait_for_their_schedule() {
        let store = InMemoryOutboxStore::arc();
        let calls = Arc::new(AtomicUsize::new(0));
        let now = Utc::now();
        store
            .enqueue(
                NewOutboxEvent::new("Lease.Signed", json!({"lease": 3}))
                    .scheduled_at(now + Duration::seconds(120)),
            )
            .await
            .unwrap();

        let dispatcher = Dispatcher::new(
            Arc::clone(&store),
            counting_registry("Lease.Signed", Arc::clone(&calls)),
            DispatcherConfig::default(),
        )
        .unwrap();

        let early = dispatcher.run_once_at(now + Duration::seconds(119)).await.unwrap();
        assert_eq!(early.total, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let on_time = dispatcher.run_once_at(now + Duration::seconds(120)).await.unwrap();
        assert_eq!(on_time.total, 1);
        assert_eq!(on_time.processed, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn batch_limit_splits_backlog_across_runs() {
        let store = InMemoryOutboxStore::arc();
        let calls = Arc::new(AtomicUsize::new(0));
        let now = enqueue_past(&store, "Lease.Signed", 51).await;

        let dispatcher = Dispatcher::new(
            Arc::clone(&store),
            counting_registry("Lease.Signed", Arc::clone(&calls)),
            DispatcherConfig::default(),
        )
        .unwrap();

        let first = dispatcher.run_once_at(now).await.unwrap();
        assert_eq!(first.total, 50);
        assert_eq!(first.processed, 50);
        assert_eq!(store.stats().await.unwrap().pending, 1);

        let second = dispatcher.run_once_at(now).await.unwrap();
        assert_eq!(second.total, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 51);
        assert_eq!(store.stats().await.unwrap().completed, 51);
    }

    #[tokio::test]
    async fn first_attempt_success_completes_once() {
        let store = InMemoryOutboxStore::arc();
        let calls = Arc::new(AtomicUsize::new(0));
        let event = store
            .enqueue(NewOutboxEvent::new("Payment.Succeeded", json!({"amount": 1200})))
            .await
            .unwrap();

        let dispatcher = Dispatcher::new(
            Arc::clone(&store),
            counting_registry("Payment.Succeeded", Arc::clone(&calls)),
            DispatcherConfig::default(),
        )
        .unwrap();

        let summary = dispatcher.run_once().await.unwrap();
        assert_eq!(summary.processed, 1);
        assert_eq!(summary.failed, 0);

        let stored = store.get(event.id).await.unwrap().unwrap();
        assert_eq!(stored.status, EventStatus::Completed);
        assert_eq!(stored.retry_count, 0);
        assert!(stored.error_message.is_none());

        assert_eq!(dispatcher.run_once().await.unwrap().total, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_runs_never_double_deliver() {
        let store = InMemoryOutboxStore::arc();
        let now = enqueue_past(&store, "Legislation.Updated", 40).await;

        let seen: Arc<Mutex<HashMap<i64, usize>>> = Arc::default();
        let mut registry = HandlerRegistry::new();
        let counter = Arc::clone(&seen);
        registry.register_fn("Legislation.Updated", move |_, payload| {
            let seq = payload["seq"].as_i64().unwrap_or(-1);
            *counter.lock().unwrap().entry(seq).or_default() += 1;
            Ok(())
        });

        let config = DispatcherConfig::default().with_batch_limit(15);
        let dispatchers: Vec<_> = (0..4)
            .map(|_| {
                let dispatcher =
                    Dispatcher::new(Arc::clone(&store), registry.clone(), config.clone());
                Arc::new(dispatcher.unwrap())
            })
            .collect();

        let runs: Vec<_> = dispatchers
            .iter()
            .map(|d| {
                let d = Arc::clone(d);
                tokio::spawn(async move { d.run_once_at(now).await })
            })
            .collect();

        let mut claimed = 0;
        for run in runs {
            claimed += run.await.unwrap().unwrap().total;
        }

        // 4 x 15 capacity covers the 40 events; each claimed exactly once.
        assert_eq!(claimed, 40);
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 40);
        assert!(seen.values().all(|&n| n == 1));
    }

    #[tokio::test]
    async fn per_event_max_retries_overrides_default() {
        let store = InMemoryOutboxStore::arc();
        let event = store
            .enqueue(NewOutboxEvent::new("Payment.Overdue", json!({})).with_max_retries(1))
            .await
            .unwrap();
        let dispatcher = Dispatcher::new(
            Arc::clone(&store),
            failing_registry("Payment.Overdue"),
            DispatcherConfig::default(),
        )
        .unwrap();

        dispatcher.run_once().await.unwrap();

        let stored = store.get(event.id).await.unwrap().unwrap();
        assert_eq!(stored.status, EventStatus::Failed);
        assert_eq!(stored.retry_count, 1);
    }

    /// Drive one failing event to a terminal state, recording `retry_count`
    /// after every run.
    async fn retry_trace(max_retries: u32) -> (Vec<u32>, EventStatus) {
        let store = InMemoryOutboxStore::arc();
        let event = store
            .enqueue(NewOutboxEvent::new("Payment.Overdue", json!({})).with_max_retries(max_retries))
            .await
            .unwrap();
        let id: OutboxEventId = event.id;
        let dispatcher = Dispatcher::new(
            Arc::clone(&store),
            failing_registry("Payment.Overdue"),
            DispatcherConfig::default(),
        )
        .unwrap();

        let mut now = Utc::now();
        let mut trace = Vec::new();
        loop {
            dispatcher.run_once_at(now).await.unwrap();
            let current = store.get(id).await.unwrap().unwrap();
            trace.push(current.retry_count);
            if current.status.is_terminal() {
                return (trace, current.status);
            }
            now = current.scheduled_at;
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn each_failure_adds_exactly_one_retry(max_retries in 1u32..8) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            let (trace, status) = rt.block_on(retry_trace(max_retries));

            prop_assert_eq!(status, EventStatus::Failed);
            prop_assert_eq!(trace, (1..=max_retries).collect::<Vec<_>>());
        }
    }
}
