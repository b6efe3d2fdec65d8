use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;

use courier_core::types::{truncate_to_second, Channel, OutboundMessageEvent};

/// Store failures, split by whether a retry can reasonably succeed.
/// Pool acquisition, dropped connections and serialization conflicts are
/// retryable; everything else (missing schema, constraint violations other
/// than the idempotency one) is fatal.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("query failed: {0}")]
    Query(String),
}

impl StoreError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

#[derive(Debug, Clone)]
pub struct ConversationRecord {
    pub id: String,
    pub key: String,
    pub channel: String,
    pub participant_a: String,
    pub participant_b: String,
    pub message_count: u32,
    pub last_activity_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct MessageRecord {
    pub id: String,
    pub direction: String,
    pub channel: String,
    pub from: String,
    pub to: String,
    pub body: String,
    pub sent_at: DateTime<Utc>,
}

/// Persistence contract shared by the Postgres and in-memory stores.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist an outbound message: body dedupe by content, conversation
    /// upsert keyed by (channel, participant pair), then an idempotent
    /// message insert on (conversation, outbound, sent_at, body). Returns
    /// the message identifier, existing or new.
    async fn insert_outbound(
        &self,
        channel: Channel,
        from: &str,
        to: &str,
        body: &str,
        timestamp: &str,
    ) -> Result<String, StoreError>;

    /// Tag a persisted outbound row with the provider that handled it.
    /// Returns whether a matching provider row existed. Idempotent.
    async fn set_outbound_provider(
        &self,
        message_id: &str,
        provider_name: &str,
    ) -> Result<bool, StoreError>;

    /// Page of conversations ordered by last activity descending, plus the
    /// total count.
    async fn list_conversations(
        &self,
        page: u32,
        size: u32,
    ) -> Result<(Vec<ConversationRecord>, u64), StoreError>;

    /// Page of messages for one conversation in ascending timestamp order.
    /// A non-numeric conversation id yields an empty page, not an error.
    async fn list_messages(
        &self,
        conversation_id: &str,
        page: u32,
        size: u32,
    ) -> Result<(Vec<MessageRecord>, u64), StoreError>;

    /// Append a provider webhook to the inbound-event log, deduplicating on
    /// (channel, provider_message_id) when the id is present. Succeeds on
    /// duplicates so webhooks can be retried safely.
    async fn append_inbound_event(
        &self,
        channel: Channel,
        payload: serde_json::Value,
        from: &str,
        to: &str,
        provider_message_id: Option<&str>,
    ) -> Result<(), StoreError>;

    /// Outbound rows never tagged with a provider, re-materialized as events
    /// for the reconciliation pass after a queue restart.
    async fn list_unrouted_outbound(
        &self,
        limit: i64,
    ) -> Result<Vec<OutboundMessageEvent>, StoreError>;
}

pub type SharedStore = Arc<dyn MessageStore>;

/// Parse an ISO 8601 timestamp, substituting now() when it does not parse.
/// The substitution keeps lenient producers flowing at the cost of a weaker
/// idempotency key for their retries.
pub fn parse_sent_at(raw: &str) -> DateTime<Utc> {
    let parsed = DateTime::parse_from_rfc3339(raw.trim())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now());
    truncate_to_second(parsed)
}

/// Clamp pagination inputs: page defaults to 1, size to [1, 50].
pub fn clamp_paging(page: u32, size: u32) -> (u32, u32) {
    let page = if page == 0 { 1 } else { page };
    let size = match size {
        0 => 50,
        s if s > 50 => 50,
        s => s,
    };
    (page, size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn parse_sent_at_truncates_to_second() {
        let ts = parse_sent_at("2025-11-14T12:00:00.750Z");
        assert_eq!(ts.nanosecond(), 0);
        assert_eq!(ts.to_rfc3339(), "2025-11-14T12:00:00+00:00");
    }

    #[test]
    fn parse_sent_at_falls_back_to_now_on_garbage() {
        let before = Utc::now();
        let ts = parse_sent_at("not-a-timestamp");
        assert!(ts >= truncate_to_second(before) - chrono::Duration::seconds(1));
    }

    #[test]
    fn clamp_paging_bounds() {
        assert_eq!(clamp_paging(0, 0), (1, 50));
        assert_eq!(clamp_paging(3, 9999), (3, 50));
        assert_eq!(clamp_paging(1, 10), (1, 10));
    }
}
