use anyhow::{anyhow, Result};
use std::sync::Arc;
use tracing;

use courier_core::metrics::Metrics;
use courier_core::types::OutboundMessageEvent;
use courier_store::SharedStore;

use crate::breaker::{BreakerState, ProviderBreakers};
use crate::registry::{Outcome, OutboundMessage, ProviderRegistry};

/// Routes an outbound event to its provider, records the outcome, and tags
/// the persisted row with the provider that handled it.
///
/// Error contract toward the worker: `Err` exactly when the provider result
/// is retryable (RateLimited, Error, Timeout). Success and the drop cases
/// (no routable provider, breaker open) return `Ok` so the worker acks.
pub struct DispatchHandler {
    registry: Arc<ProviderRegistry>,
    breakers: ProviderBreakers,
    store: SharedStore,
    metrics: Arc<Metrics>,
}

impl DispatchHandler {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        breakers: ProviderBreakers,
        store: SharedStore,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            registry,
            breakers,
            store,
            metrics,
        }
    }

    pub async fn handle(&self, evt: OutboundMessageEvent) -> Result<()> {
        let Some(provider) = self.registry.get(evt.channel) else {
            self.metrics.invalid_routing.inc();
            tracing::warn!(channel = %evt.channel, "no provider registered for channel; dropping event");
            return Ok(());
        };

        self.metrics.record_provider_attempt(provider.name());

        let breaker = self.breakers.get(provider.name());
        if let Some(br) = breaker {
            if br.before_call() == BreakerState::Open {
                self.metrics.provider_breaker_open.inc();
                tracing::info!(provider = provider.name(), "breaker open; short-circuiting dispatch");
                return Ok(());
            }
        }

        let msg = OutboundMessage {
            channel: evt.channel,
            to: evt.to.clone(),
            from: evt.from.clone(),
            body: evt.body.clone(),
            attachments: attachments_from(&evt),
        };

        let before = breaker.map(|br| br.state());
        let result = provider.dispatch(&msg).await;

        match result.outcome {
            Outcome::Success => {
                self.metrics.record_provider_success(&result.provider_name);
                if let Some(br) = breaker {
                    br.record_success();
                }
                self.observe_transition(provider.name(), before, breaker.map(|br| br.state()));

                if let Some(message_id) = evt.message_id() {
                    if let Err(e) = self
                        .store
                        .set_outbound_provider(message_id, &result.provider_name)
                        .await
                    {
                        tracing::warn!(
                            message_id,
                            provider = %result.provider_name,
                            error = %e,
                            "failed to tag message with provider"
                        );
                    }
                }
                Ok(())
            }
            Outcome::RateLimited => {
                self.metrics.record_provider_rate_limited(&result.provider_name);
                if let Some(br) = breaker {
                    br.record_failure();
                }
                self.observe_transition(provider.name(), before, breaker.map(|br| br.state()));
                Err(anyhow!("provider {} rate limited", result.provider_name))
            }
            Outcome::Error | Outcome::Timeout => {
                self.metrics.record_provider_error(&result.provider_name);
                if let Some(br) = breaker {
                    br.record_failure();
                }
                self.observe_transition(provider.name(), before, breaker.map(|br| br.state()));
                Err(anyhow!(
                    "provider {} dispatch failed: {}",
                    result.provider_name,
                    result.outcome.as_str()
                ))
            }
        }
    }

    fn observe_transition(
        &self,
        provider: &str,
        before: Option<BreakerState>,
        after: Option<BreakerState>,
    ) {
        if let (Some(before), Some(after)) = (before, after) {
            if before != after {
                self.metrics.provider_breaker_transition.inc();
                tracing::info!(provider, ?before, ?after, "breaker state transitioned");
            }
        }
    }
}

fn attachments_from(evt: &OutboundMessageEvent) -> Vec<String> {
    evt.metadata
        .get("attachments")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|a| a.as_str().map(|s| s.to_string()))
                .collect()
        })
        .unwrap_or_default()
}
