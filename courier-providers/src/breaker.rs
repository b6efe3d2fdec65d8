use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// Failure-count circuit breaker with a cooldown window. Consecutive
/// failures trip it Open; after the cooldown a single probe in HalfOpen
/// decides between reset and re-open. Safe for concurrent dispatchers.
#[derive(Clone)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    recovery_timeout: Duration,
    inner: Arc<Mutex<Inner>>,
}

struct Inner {
    failures: u32,
    state: BreakerState,
    opened_at: Option<Instant>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            recovery_timeout,
            inner: Arc::new(Mutex::new(Inner {
                failures: 0,
                state: BreakerState::Closed,
                opened_at: None,
            })),
        }
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().unwrap().state
    }

    /// State to act on for the next call. An Open breaker past its cooldown
    /// moves to HalfOpen here, admitting the probe.
    pub fn before_call(&self) -> BreakerState {
        let mut inner = self.inner.lock().unwrap();
        if inner.state == BreakerState::Open {
            if let Some(opened) = inner.opened_at {
                if opened.elapsed() >= self.recovery_timeout {
                    inner.state = BreakerState::HalfOpen;
                }
            }
        }
        inner.state
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.failures = 0;
        inner.state = BreakerState::Closed;
        inner.opened_at = None;
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            // A failed probe re-opens immediately.
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Open;
                inner.opened_at = Some(Instant::now());
            }
            _ => {
                inner.failures += 1;
                if inner.failures >= self.failure_threshold {
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }
        }
    }
}

/// Per-provider breakers, immutable after construction.
#[derive(Clone, Default)]
pub struct ProviderBreakers {
    inner: Arc<HashMap<String, CircuitBreaker>>,
}

impl ProviderBreakers {
    pub fn new(map: HashMap<String, CircuitBreaker>) -> Self {
        Self {
            inner: Arc::new(map),
        }
    }

    pub fn get(&self, name: &str) -> Option<&CircuitBreaker> {
        self.inner.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
