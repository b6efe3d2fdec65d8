use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use courier_core::metrics::Metrics;
use courier_core::types::{Channel, OutboundMessageEvent};
use courier_providers::{
    BreakerState, CircuitBreaker, DispatchHandler, DispatchResult, Outcome, OutboundMessage,
    Provider, ProviderBreakers, ProviderRegistry,
};
use courier_store::{MemoryStore, MessageStore, SharedStore};

struct ScriptedProvider {
    name: &'static str,
    outcome: Outcome,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    fn new(name: &'static str, outcome: Outcome) -> Arc<Self> {
        Arc::new(Self {
            name,
            outcome,
            calls: AtomicUsize::new(0),
        })
    }

    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        self.name
    }

    async fn dispatch(&self, _msg: &OutboundMessage) -> DispatchResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        DispatchResult {
            provider_name: self.name.to_string(),
            outcome: self.outcome,
        }
    }
}

fn event(channel: Channel, message_id: Option<&str>) -> OutboundMessageEvent {
    let mut metadata = HashMap::new();
    if let Some(id) = message_id {
        metadata.insert(
            "message_id".to_string(),
            serde_json::Value::String(id.to_string()),
        );
    }
    OutboundMessageEvent {
        schema_version: 1,
        channel,
        customer_id: "1".to_string(),
        from: "+15550001".to_string(),
        to: "+15550002".to_string(),
        subject: None,
        body: "dispatch me".to_string(),
        sent_at: None,
        idempotency_key: None,
        metadata,
    }
}

fn handler(
    provider: Arc<ScriptedProvider>,
    breakers: ProviderBreakers,
) -> (DispatchHandler, Arc<Metrics>, SharedStore) {
    let mut registry = ProviderRegistry::new();
    registry.insert(Channel::Sms, provider.clone());
    registry.insert(Channel::Mms, provider);
    let metrics = Arc::new(Metrics::new().unwrap());
    let store: SharedStore = Arc::new(MemoryStore::new());
    let h = DispatchHandler::new(Arc::new(registry), breakers, store.clone(), metrics.clone());
    (h, metrics, store)
}

#[tokio::test]
async fn unmapped_channel_is_dropped_silently() {
    let provider = ScriptedProvider::new("sms-mms", Outcome::Success);
    let (h, metrics, _) = handler(provider.clone(), ProviderBreakers::default());

    // Email was never registered.
    let result = h.handle(event(Channel::Email, None)).await;
    assert!(result.is_ok(), "invalid routing acks instead of retrying");
    assert_eq!(metrics.invalid_routing.get(), 1);
    assert_eq!(provider.call_count(), 0);
}

#[tokio::test]
async fn success_tags_the_persisted_row() {
    let store = MemoryStore::new();
    let id = store
        .insert_outbound(Channel::Sms, "+15550001", "+15550002", "dispatch me", "2025-11-14T12:00:00Z")
        .await
        .unwrap();
    let store: SharedStore = Arc::new(store);

    let provider = ScriptedProvider::new("sms-mms", Outcome::Success);
    let mut registry = ProviderRegistry::new();
    registry.insert(Channel::Sms, provider.clone());
    let metrics = Arc::new(Metrics::new().unwrap());
    let h = DispatchHandler::new(
        Arc::new(registry),
        ProviderBreakers::default(),
        store.clone(),
        metrics.clone(),
    );

    h.handle(event(Channel::Sms, Some(&id))).await.unwrap();

    assert_eq!(metrics.provider_attempts.with_label_values(&["sms-mms"]).get(), 1);
    assert_eq!(metrics.provider_success.with_label_values(&["sms-mms"]).get(), 1);
    assert!(
        store.list_unrouted_outbound(10).await.unwrap().is_empty(),
        "row should be tagged with its provider"
    );
}

#[tokio::test]
async fn retryable_outcomes_surface_as_errors() {
    for outcome in [Outcome::RateLimited, Outcome::Error, Outcome::Timeout] {
        let provider = ScriptedProvider::new("sms-mms", outcome);
        let (h, metrics, _) = handler(provider, ProviderBreakers::default());

        let result = h.handle(event(Channel::Sms, None)).await;
        assert!(result.is_err(), "{:?} should trigger the retry path", outcome);
        match outcome {
            Outcome::RateLimited => {
                assert_eq!(metrics.provider_rate_limited.with_label_values(&["sms-mms"]).get(), 1)
            }
            _ => assert_eq!(metrics.provider_error.with_label_values(&["sms-mms"]).get(), 1),
        }
    }
}

#[tokio::test]
async fn open_breaker_short_circuits_without_calling_the_provider() {
    let provider = ScriptedProvider::new("sms-mms", Outcome::Success);
    let breaker = CircuitBreaker::new(1, Duration::from_secs(60));
    breaker.record_failure();
    assert_eq!(breaker.state(), BreakerState::Open);

    let mut map = HashMap::new();
    map.insert("sms-mms".to_string(), breaker);
    let (h, metrics, _) = handler(provider.clone(), ProviderBreakers::new(map));

    let result = h.handle(event(Channel::Sms, None)).await;
    assert!(result.is_ok(), "breaker-open drops are acked");
    assert_eq!(metrics.provider_breaker_open.get(), 1);
    assert_eq!(provider.call_count(), 0);
}

#[tokio::test]
async fn repeated_failures_trip_the_breaker_and_record_the_transition() {
    let provider = ScriptedProvider::new("sms-mms", Outcome::Error);
    let breaker = CircuitBreaker::new(3, Duration::from_secs(60));
    let mut map = HashMap::new();
    map.insert("sms-mms".to_string(), breaker.clone());
    let (h, metrics, _) = handler(provider.clone(), ProviderBreakers::new(map));

    for _ in 0..3 {
        let _ = h.handle(event(Channel::Sms, None)).await;
    }
    assert_eq!(breaker.state(), BreakerState::Open);
    assert_eq!(metrics.provider_breaker_transition.get(), 1);
    assert_eq!(provider.call_count(), 3);

    // Fourth event never reaches the provider.
    let _ = h.handle(event(Channel::Sms, None)).await;
    assert_eq!(provider.call_count(), 3);
    assert_eq!(metrics.provider_breaker_open.get(), 1);
}

#[tokio::test]
async fn rate_limiting_counts_against_the_breaker() {
    let provider = ScriptedProvider::new("sms-mms", Outcome::RateLimited);
    let breaker = CircuitBreaker::new(2, Duration::from_secs(60));
    let mut map = HashMap::new();
    map.insert("sms-mms".to_string(), breaker.clone());
    let (h, metrics, _) = handler(provider.clone(), ProviderBreakers::new(map));

    let _ = h.handle(event(Channel::Sms, None)).await;
    assert_eq!(breaker.state(), BreakerState::Closed);
    let _ = h.handle(event(Channel::Sms, None)).await;
    assert_eq!(
        breaker.state(),
        BreakerState::Open,
        "rate-limited outcomes are non-success and trip the breaker"
    );
    assert_eq!(metrics.provider_breaker_transition.get(), 1);

    // Open breaker now short-circuits before the provider.
    let _ = h.handle(event(Channel::Sms, None)).await;
    assert_eq!(provider.call_count(), 2);
}
