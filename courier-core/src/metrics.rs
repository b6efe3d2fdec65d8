use anyhow::{anyhow, Result};
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

/// Process-wide metrics registry. Wired once at startup; counters are cheap
/// to increment from any task.
pub struct Metrics {
    registry: Registry,
    pub worker_processed: IntCounter,
    pub enqueue_attempt: IntCounter,
    pub enqueue_success: IntCounter,
    pub enqueue_failure: IntCounter,
    pub queue_depth: IntGauge,
    pub retry_total: IntCounter,
    pub dlq_total: IntCounter,
    pub provider_attempts: IntCounterVec,
    pub provider_success: IntCounterVec,
    pub provider_rate_limited: IntCounterVec,
    pub provider_error: IntCounterVec,
    pub invalid_routing: IntCounter,
    pub provider_breaker_transition: IntCounter,
    pub provider_breaker_open: IntCounter,
}

impl Metrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let worker_processed =
            IntCounter::new("worker_processed", "Count of events processed by the worker")?;
        let enqueue_attempt =
            IntCounter::new("enqueue_attempt_total", "How many enqueue attempts were made")?;
        let enqueue_success =
            IntCounter::new("enqueue_success_total", "How many enqueue operations succeeded")?;
        let enqueue_failure =
            IntCounter::new("enqueue_failure_total", "How many enqueue operations failed")?;
        let queue_depth = IntGauge::new("queue_depth", "Approximate depth of the events queue")?;
        let retry_total = IntCounter::new("retry_total", "Total number of worker retries")?;
        let dlq_total = IntCounter::new("dlq_total", "Total number of events moved to the DLQ")?;

        let provider_attempts = IntCounterVec::new(
            Opts::new("provider_attempts_total", "Provider dispatch attempts"),
            &["provider"],
        )?;
        let provider_success = IntCounterVec::new(
            Opts::new("provider_success_total", "Provider dispatch successes"),
            &["provider"],
        )?;
        let provider_rate_limited = IntCounterVec::new(
            Opts::new("provider_rate_limited_total", "Provider rate-limited outcomes"),
            &["provider"],
        )?;
        let provider_error = IntCounterVec::new(
            Opts::new("provider_error_total", "Provider error and timeout outcomes"),
            &["provider"],
        )?;
        let invalid_routing = IntCounter::new(
            "invalid_routing",
            "Outbound events with no routable channel or provider",
        )?;
        let provider_breaker_transition = IntCounter::new(
            "provider_breaker_transition_total",
            "Circuit breaker state transitions",
        )?;
        let provider_breaker_open = IntCounter::new(
            "provider_breaker_open_total",
            "Dispatches short-circuited by an open breaker",
        )?;

        registry.register(Box::new(worker_processed.clone()))?;
        registry.register(Box::new(enqueue_attempt.clone()))?;
        registry.register(Box::new(enqueue_success.clone()))?;
        registry.register(Box::new(enqueue_failure.clone()))?;
        registry.register(Box::new(queue_depth.clone()))?;
        registry.register(Box::new(retry_total.clone()))?;
        registry.register(Box::new(dlq_total.clone()))?;
        registry.register(Box::new(provider_attempts.clone()))?;
        registry.register(Box::new(provider_success.clone()))?;
        registry.register(Box::new(provider_rate_limited.clone()))?;
        registry.register(Box::new(provider_error.clone()))?;
        registry.register(Box::new(invalid_routing.clone()))?;
        registry.register(Box::new(provider_breaker_transition.clone()))?;
        registry.register(Box::new(provider_breaker_open.clone()))?;

        Ok(Self {
            registry,
            worker_processed,
            enqueue_attempt,
            enqueue_success,
            enqueue_failure,
            queue_depth,
            retry_total,
            dlq_total,
            provider_attempts,
            provider_success,
            provider_rate_limited,
            provider_error,
            invalid_routing,
            provider_breaker_transition,
            provider_breaker_open,
        })
    }

    pub fn record_provider_attempt(&self, provider: &str) {
        self.provider_attempts.with_label_values(&[provider]).inc();
    }

    pub fn record_provider_success(&self, provider: &str) {
        self.provider_success.with_label_values(&[provider]).inc();
    }

    pub fn record_provider_rate_limited(&self, provider: &str) {
        self.provider_rate_limited.with_label_values(&[provider]).inc();
    }

    pub fn record_provider_error(&self, provider: &str) {
        self.provider_error.with_label_values(&[provider]).inc();
    }

    /// Render the Prometheus text exposition format.
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buf = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buf)
            .map_err(|e| anyhow!("failed to encode metrics: {}", e))?;
        String::from_utf8(buf).map_err(|e| anyhow!("metrics output was not utf-8: {}", e))
    }
}
