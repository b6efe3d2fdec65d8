//! End-to-end pipeline: persist → publish → worker → dispatch handler →
//! provider, with the row tagged on success and the DLQ catching exhaustion.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use courier_core::metrics::Metrics;
use courier_core::queue::{MemoryQueue, Queue};
use courier_core::types::{Channel, OutboundMessageEvent};
use courier_providers::{
    DispatchHandler, DispatchResult, Outcome, OutboundMessage, Provider, ProviderBreakers,
    ProviderRegistry,
};
use courier_store::{MemoryStore, MessageStore, SharedStore};
use courier_worker::{republish_unrouted, Handler, Options, Worker};
use tokio_util::sync::CancellationToken;

/// Fails a fixed number of times, then succeeds.
struct FlakyProvider {
    failures: usize,
    calls: AtomicUsize,
}

#[async_trait]
impl Provider for FlakyProvider {
    fn name(&self) -> &str {
        "sms-mms"
    }

    async fn dispatch(&self, _msg: &OutboundMessage) -> DispatchResult {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let outcome = if call <= self.failures {
            Outcome::Error
        } else {
            Outcome::Success
        };
        DispatchResult {
            provider_name: "sms-mms".to_string(),
            outcome,
        }
    }
}

fn dispatch_worker(
    queue: Arc<MemoryQueue>,
    store: Arc<MemoryStore>,
    provider: Arc<FlakyProvider>,
    metrics: Arc<Metrics>,
    opts: Options,
) -> Arc<Worker> {
    let mut registry = ProviderRegistry::new();
    registry.insert(Channel::Sms, provider);
    let handler = Arc::new(DispatchHandler::new(
        Arc::new(registry),
        ProviderBreakers::default(),
        store as SharedStore,
        metrics.clone(),
    ));
    let handler: Handler = Arc::new(move |evt: OutboundMessageEvent| {
        let handler = handler.clone();
        Box::pin(async move { handler.handle(evt).await })
    });
    Arc::new(Worker::with_options(
        queue as Arc<dyn Queue>,
        handler,
        opts,
        Some(metrics),
    ))
}

async fn intake(store: &MemoryStore, queue: &MemoryQueue, body: &str) -> String {
    let id = store
        .insert_outbound(Channel::Sms, "+15550001", "+15550002", body, "2025-11-14T12:00:00Z")
        .await
        .unwrap();
    let mut metadata = HashMap::new();
    metadata.insert(
        "message_id".to_string(),
        serde_json::Value::String(id.clone()),
    );
    let event = OutboundMessageEvent {
        schema_version: 1,
        channel: Channel::Sms,
        customer_id: "1".to_string(),
        from: "+15550001".to_string(),
        to: "+15550002".to_string(),
        subject: None,
        body: body.to_string(),
        sent_at: None,
        idempotency_key: None,
        metadata,
    };
    queue.publish(event).await.unwrap();
    id
}

#[tokio::test]
async fn flaky_provider_retries_then_tags_the_row() {
    let queue = Arc::new(MemoryQueue::new(32));
    let store = Arc::new(MemoryStore::new());
    let provider = Arc::new(FlakyProvider {
        failures: 2,
        calls: AtomicUsize::new(0),
    });
    let metrics = Arc::new(Metrics::new().unwrap());
    let worker = dispatch_worker(
        queue.clone(),
        store.clone(),
        provider.clone(),
        metrics.clone(),
        Options {
            max_attempts: 5,
            max_age: Duration::from_secs(3600),
            backoff_base: Duration::from_millis(10),
            backoff_cap: Duration::from_millis(20),
        },
    );

    let shutdown = CancellationToken::new();
    tokio::spawn(worker.clone().run(shutdown.clone()));

    intake(&store, &queue, "eventually delivered").await;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !store.list_unrouted_outbound(10).await.unwrap().is_empty() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "row should be tagged after the provider recovers"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    assert_eq!(worker.dlq_len(), 0);
    assert_eq!(metrics.retry_total.get(), 2);
    assert_eq!(metrics.provider_success.with_label_values(&["sms-mms"]).get(), 1);
    assert_eq!(metrics.worker_processed.get(), 1);

    shutdown.cancel();
}

#[tokio::test]
async fn exhausted_retries_reach_the_dlq_with_the_row_left_untagged() {
    let queue = Arc::new(MemoryQueue::new(32));
    let store = Arc::new(MemoryStore::new());
    let provider = Arc::new(FlakyProvider {
        failures: usize::MAX,
        calls: AtomicUsize::new(0),
    });
    let metrics = Arc::new(Metrics::new().unwrap());
    let worker = dispatch_worker(
        queue.clone(),
        store.clone(),
        provider,
        metrics.clone(),
        Options {
            max_attempts: 3,
            max_age: Duration::from_secs(3600),
            backoff_base: Duration::from_millis(5),
            backoff_cap: Duration::from_millis(10),
        },
    );

    let shutdown = CancellationToken::new();
    tokio::spawn(worker.clone().run(shutdown.clone()));

    intake(&store, &queue, "never delivered").await;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while worker.dlq_len() != 1 {
        assert!(
            tokio::time::Instant::now() < deadline,
            "event should be promoted to the DLQ"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(metrics.dlq_total.get(), 1);
    // The message row survives untagged for operators to reconcile.
    assert_eq!(store.list_unrouted_outbound(10).await.unwrap().len(), 1);

    shutdown.cancel();
}

#[tokio::test]
async fn reconciliation_replays_rows_the_queue_lost() {
    let store = Arc::new(MemoryStore::new());
    // A row persisted before a crash: present in the store, absent from the
    // (fresh) queue.
    let dropped_queue = MemoryQueue::new(8);
    intake(&store, &dropped_queue, "lost publication").await;

    let fresh_queue: Arc<dyn Queue> = Arc::new(MemoryQueue::new(8));
    let shared: SharedStore = store.clone();
    let replayed = republish_unrouted(&shared, &fresh_queue, 100).await.unwrap();
    assert_eq!(replayed, 1);
    assert_eq!(fresh_queue.depth(), 1);

    let delivery = fresh_queue.receive().await.unwrap();
    assert_eq!(delivery.event.body, "lost publication");
    assert!(delivery.event.message_id().is_some());
}
