use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::Mutex;

use courier_core::config::ProviderConfig;

use crate::registry::{DispatchResult, Outcome, OutboundMessage, Provider};

const SIMULATED_LATENCY: Duration = Duration::from_millis(5);

/// Cumulative outcome thresholds over a 0..100 roll.
#[derive(Debug, Clone, Copy)]
struct OutcomeProfile {
    timeout_pct: u32,
    error_pct: u32,
    ratelimit_pct: u32,
}

impl OutcomeProfile {
    fn new(timeout_pct: u32, error_pct: u32, ratelimit_pct: u32) -> Self {
        Self {
            timeout_pct: timeout_pct.min(100),
            error_pct: error_pct.min(100),
            ratelimit_pct: ratelimit_pct.min(100),
        }
    }

    fn pick(&self, roll: u32) -> Outcome {
        if roll < self.timeout_pct {
            Outcome::Timeout
        } else if roll < self.timeout_pct + self.error_pct {
            Outcome::Error
        } else if roll < self.timeout_pct + self.error_pct + self.ratelimit_pct {
            Outcome::RateLimited
        } else {
            Outcome::Success
        }
    }
}

/// The PRNG is seeded once at construction and advances under the mutex, so
/// a fixed seed replays the same outcome sequence.
struct Roller {
    rng: Mutex<fastrand::Rng>,
}

impl Roller {
    fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => fastrand::Rng::with_seed(s),
            None => fastrand::Rng::new(),
        };
        Self {
            rng: Mutex::new(rng),
        }
    }

    async fn roll(&self) -> u32 {
        self.rng.lock().await.u32(0..100)
    }
}

/// Simulated SMS/MMS carrier.
pub struct MockSmsProvider {
    profile: OutcomeProfile,
    roller: Roller,
}

impl MockSmsProvider {
    pub fn new(cfg: &ProviderConfig) -> Self {
        Self {
            profile: OutcomeProfile::new(cfg.timeout_pct, cfg.error_pct, cfg.ratelimit_pct),
            roller: Roller::new(cfg.sms_seed.or(cfg.seed)),
        }
    }
}

#[async_trait]
impl Provider for MockSmsProvider {
    fn name(&self) -> &str {
        "sms-mms"
    }

    async fn dispatch(&self, msg: &OutboundMessage) -> DispatchResult {
        tokio::time::sleep(SIMULATED_LATENCY).await;
        let outcome = self.profile.pick(self.roller.roll().await);
        tracing::debug!(
            provider = self.name(),
            channel = %msg.channel,
            to = %msg.to,
            outcome = outcome.as_str(),
            "mock dispatch"
        );
        DispatchResult {
            provider_name: self.name().to_string(),
            outcome,
        }
    }
}

/// Simulated email relay.
pub struct MockEmailProvider {
    profile: OutcomeProfile,
    roller: Roller,
}

impl MockEmailProvider {
    pub fn new(cfg: &ProviderConfig) -> Self {
        Self {
            profile: OutcomeProfile::new(cfg.timeout_pct, cfg.error_pct, cfg.ratelimit_pct),
            roller: Roller::new(cfg.email_seed.or(cfg.seed)),
        }
    }
}

#[async_trait]
impl Provider for MockEmailProvider {
    fn name(&self) -> &str {
        "email"
    }

    async fn dispatch(&self, msg: &OutboundMessage) -> DispatchResult {
        tokio::time::sleep(SIMULATED_LATENCY).await;
        let outcome = self.profile.pick(self.roller.roll().await);
        tracing::debug!(
            provider = self.name(),
            channel = %msg.channel,
            to = %msg.to,
            outcome = outcome.as_str(),
            "mock dispatch"
        );
        DispatchResult {
            provider_name: self.name().to_string(),
            outcome,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_core::types::Channel;

    fn cfg(timeout: u32, error: u32, ratelimit: u32, seed: Option<u64>) -> ProviderConfig {
        ProviderConfig {
            timeout_pct: timeout,
            error_pct: error,
            ratelimit_pct: ratelimit,
            seed,
            sms_seed: None,
            email_seed: None,
        }
    }

    fn msg() -> OutboundMessage {
        OutboundMessage {
            channel: Channel::Sms,
            to: "+15550002".to_string(),
            from: "+15550001".to_string(),
            body: "roll".to_string(),
            attachments: Vec::new(),
        }
    }

    #[test]
    fn profile_thresholds_are_cumulative() {
        let p = OutcomeProfile::new(10, 20, 30);
        assert_eq!(p.pick(0), Outcome::Timeout);
        assert_eq!(p.pick(9), Outcome::Timeout);
        assert_eq!(p.pick(10), Outcome::Error);
        assert_eq!(p.pick(29), Outcome::Error);
        assert_eq!(p.pick(30), Outcome::RateLimited);
        assert_eq!(p.pick(59), Outcome::RateLimited);
        assert_eq!(p.pick(60), Outcome::Success);
        assert_eq!(p.pick(99), Outcome::Success);
    }

    #[tokio::test]
    async fn zero_percentages_always_succeed() {
        let provider = MockSmsProvider::new(&cfg(0, 0, 0, Some(42)));
        for _ in 0..10 {
            let res = provider.dispatch(&msg()).await;
            assert_eq!(res.outcome, Outcome::Success);
            assert_eq!(res.provider_name, "sms-mms");
        }
    }

    #[tokio::test]
    async fn seeded_providers_replay_the_same_sequence() {
        let a = MockSmsProvider::new(&cfg(25, 25, 25, Some(7)));
        let b = MockSmsProvider::new(&cfg(25, 25, 25, Some(7)));
        for _ in 0..20 {
            assert_eq!(a.dispatch(&msg()).await.outcome, b.dispatch(&msg()).await.outcome);
        }
    }

    #[tokio::test]
    async fn full_error_rate_never_succeeds() {
        let provider = MockEmailProvider::new(&cfg(0, 100, 0, Some(3)));
        for _ in 0..10 {
            assert_eq!(provider.dispatch(&msg()).await.outcome, Outcome::Error);
        }
    }
}
