use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing;

use courier_core::queue::Queue;
use courier_core::types::{Channel, OutboundMessageEvent};

use crate::handlers::ApiState;

/// Outbound acceptance: persist the row, then publish the event.
///
/// The ordering is deliberate. A publish lost after a successful persist
/// leaves a row the reconciliation pass can replay; a publish without a row
/// would be invisible. Either failure counts as `enqueue_failure` and maps
/// to an internal error at the HTTP layer.
pub async fn accept_outbound(
    state: &ApiState,
    channel: Channel,
    from: &str,
    to: &str,
    body: &str,
    timestamp: &str,
    attachments: &[String],
) -> Result<()> {
    let metrics = &state.ctx.metrics;
    metrics.enqueue_attempt.inc();
    crate::egress::warn_on_disallowed_hosts(&state.ctx.config.server.ssrf_allowlist, attachments);

    let message_id = match state
        .store
        .insert_outbound(channel, from, to, body, timestamp)
        .await
    {
        Ok(id) => id,
        Err(e) => {
            metrics.enqueue_failure.inc();
            tracing::error!(error = %e, %channel, "failed to persist outbound message");
            return Err(e.into());
        }
    };

    let sent_at: Option<DateTime<Utc>> = DateTime::parse_from_rfc3339(timestamp.trim())
        .ok()
        .map(|t| t.with_timezone(&Utc));

    let mut metadata = HashMap::new();
    metadata.insert(
        "message_id".to_string(),
        serde_json::Value::String(message_id),
    );
    if !attachments.is_empty() {
        metadata.insert(
            "attachments".to_string(),
            serde_json::Value::from(attachments.to_vec()),
        );
    }

    let mut event = OutboundMessageEvent {
        schema_version: 1,
        channel,
        customer_id: String::new(),
        from: from.to_string(),
        to: to.to_string(),
        subject: None,
        body: body.to_string(),
        sent_at,
        idempotency_key: None,
        metadata,
    };
    event.idempotency_key = Some(event.idempotency_key());

    if let Err(e) = state.ctx.queue.publish(event).await {
        metrics.enqueue_failure.inc();
        tracing::error!(error = %e, %channel, "failed to publish outbound event");
        return Err(e.into());
    }

    metrics.enqueue_success.inc();
    Ok(())
}
