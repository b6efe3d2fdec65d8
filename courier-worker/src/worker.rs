use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing;

use courier_core::config::WorkerConfig;
use courier_core::metrics::Metrics;
use courier_core::queue::{Delivery, Queue};
use courier_core::types::{DeadLetter, OutboundMessageEvent};

/// Processes a single outbound event; an error puts the event on the retry
/// path.
pub type Handler = Arc<
    dyn Fn(OutboundMessageEvent) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>
        + Send
        + Sync,
>;

const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Retry, backoff and DLQ policy.
#[derive(Debug, Clone)]
pub struct Options {
    pub max_attempts: u32,
    pub max_age: Duration,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            max_age: Duration::from_secs(72 * 3600),
            backoff_base: Duration::from_millis(200),
            backoff_cap: Duration::from_secs(5),
        }
    }
}

impl Options {
    pub fn from_config(cfg: &WorkerConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts.max(1),
            max_age: Duration::from_secs(cfg.max_age_hours * 3600),
            backoff_base: Duration::from_millis(cfg.backoff_base_ms),
            backoff_cap: Duration::from_millis(cfg.backoff_cap_ms),
        }
    }

    /// Capped exponential backoff: `min(base * 2^(attempt-1), cap)`.
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.backoff_base
            .saturating_mul(factor)
            .min(self.backoff_cap)
    }
}

struct RetryState {
    attempts: HashMap<String, u32>,
    first_seen: HashMap<String, DateTime<Utc>>,
    dlq: Vec<DeadLetter>,
}

/// Consumes the queue and drives events through the handler. Retry state is
/// keyed by the event's idempotency key so attempts aggregate across
/// re-enqueued copies of the same logical message; it is dropped on any
/// terminal outcome (ack or DLQ promotion).
pub struct Worker {
    queue: Arc<dyn Queue>,
    handler: Handler,
    opts: Options,
    metrics: Option<Arc<Metrics>>,
    state: Mutex<RetryState>,
}

impl Worker {
    pub fn new(queue: Arc<dyn Queue>, handler: Handler) -> Self {
        Self::with_options(queue, handler, Options::default(), None)
    }

    pub fn with_options(
        queue: Arc<dyn Queue>,
        handler: Handler,
        opts: Options,
        metrics: Option<Arc<Metrics>>,
    ) -> Self {
        Self {
            queue,
            handler,
            opts,
            metrics,
            state: Mutex::new(RetryState {
                attempts: HashMap::new(),
                first_seen: HashMap::new(),
                dlq: Vec::new(),
            }),
        }
    }

    pub fn dlq_len(&self) -> usize {
        self.state.lock().unwrap().dlq.len()
    }

    pub fn dlq_snapshot(&self) -> Vec<DeadLetter> {
        self.state.lock().unwrap().dlq.clone()
    }

    /// Number of idempotency keys currently carrying retry state.
    pub fn tracked_keys(&self) -> usize {
        self.state.lock().unwrap().attempts.len()
    }

    /// Drop retry entries older than `max_age`. Runs periodically from the
    /// loop so keys whose events were lost (queue dropped, never redelivered)
    /// do not accumulate forever.
    pub fn sweep_expired(&self) {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.opts.max_age)
                .unwrap_or_else(|_| chrono::Duration::hours(72));
        let mut state = self.state.lock().unwrap();
        let expired: Vec<String> = state
            .first_seen
            .iter()
            .filter(|(_, seen)| **seen <= cutoff)
            .map(|(k, _)| k.clone())
            .collect();
        for key in expired {
            state.attempts.remove(&key);
            state.first_seen.remove(&key);
            tracing::debug!(key = %key, "swept expired retry state");
        }
    }

    /// Receive→handle loop. Exits on cancellation or queue closure; scheduled
    /// re-publishes in flight are abandoned with it.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut sweep = tokio::time::interval(SWEEP_INTERVAL);
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("worker shutting down");
                    return;
                }
                _ = sweep.tick() => {
                    self.sweep_expired();
                }
                received = self.queue.receive() => {
                    match received {
                        Ok(delivery) => self.process(delivery).await,
                        Err(_) => {
                            tracing::info!("queue closed; worker exiting");
                            return;
                        }
                    }
                }
            }
        }
    }

    async fn process(&self, delivery: Delivery) {
        let result = (self.handler)(delivery.event.clone()).await;
        let key = delivery.event.idempotency_key();

        match result {
            Ok(()) => {
                {
                    let mut state = self.state.lock().unwrap();
                    state.attempts.remove(&key);
                    state.first_seen.remove(&key);
                }
                if let Some(m) = &self.metrics {
                    m.worker_processed.inc();
                }
                delivery.ack();
            }
            Err(err) => self.handle_failure(delivery, key, err).await,
        }
    }

    async fn handle_failure(&self, delivery: Delivery, key: String, err: anyhow::Error) {
        let now = Utc::now();
        let (attempts, first_seen) = {
            let mut state = self.state.lock().unwrap();
            let attempts = *state
                .attempts
                .entry(key.clone())
                .and_modify(|a| *a += 1)
                .or_insert(1);
            let first_seen = *state.first_seen.entry(key.clone()).or_insert(now);
            (attempts, first_seen)
        };

        if let Some(m) = &self.metrics {
            m.retry_total.inc();
        }

        let aged_out = now.signed_duration_since(first_seen).to_std().unwrap_or_default()
            >= self.opts.max_age;
        if attempts >= self.opts.max_attempts || aged_out {
            {
                let mut state = self.state.lock().unwrap();
                state.dlq.push(DeadLetter {
                    event: delivery.event.clone(),
                    attempts,
                    first_seen,
                    last_error: err.to_string(),
                    at: now,
                });
                state.attempts.remove(&key);
                state.first_seen.remove(&key);
            }
            if let Some(m) = &self.metrics {
                m.dlq_total.inc();
            }
            tracing::warn!(attempts, error = %err, "event moved to DLQ");
            // Ack so the exhausted event is never redelivered.
            delivery.ack();
            return;
        }

        let backoff = self.opts.backoff_for_attempt(attempts);
        let queue = self.queue.clone();
        let event = delivery.event.clone();
        // Re-publish from an independent timer so the receive loop keeps
        // draining while this event waits out its backoff.
        tokio::spawn(async move {
            tokio::time::sleep(backoff).await;
            if queue.publish(event).await.is_err() {
                tracing::warn!("queue closed before scheduled retry could re-publish");
            }
        });

        tracing::warn!(attempts, backoff_ms = backoff.as_millis() as u64, error = %err, "handler failed; retry scheduled");
        delivery.nack(&err);
    }
}
