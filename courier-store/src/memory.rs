use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use courier_core::types::{Channel, OutboundMessageEvent};

use crate::normalize::{conversation_key, normalized_pair};
use crate::store::{
    clamp_paging, parse_sent_at, ConversationRecord, MessageRecord, MessageStore, StoreError,
};

/// Full-semantics in-memory store. Carries the same contract as the Postgres
/// store (body dedupe, conversation upsert, outbound idempotency, inbound
/// event dedupe, pagination) so the gateway runs and tests without a
/// database.
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

struct Inner {
    conversations: Vec<Conversation>,
    bodies: Vec<(i64, String)>,
    messages: Vec<Message>,
    inbound: Vec<InboundEvent>,
    providers: Vec<(i64, String)>,
    next_conversation_id: i64,
    next_body_id: i64,
    next_message_id: i64,
}

struct Conversation {
    id: i64,
    channel: Channel,
    key: String,
    participant_a: String,
    participant_b: String,
    message_count: u32,
    last_activity_at: DateTime<Utc>,
}

struct Message {
    id: i64,
    conversation_id: i64,
    body_id: Option<i64>,
    provider_id: Option<i64>,
    direction: &'static str,
    channel: Channel,
    from: String,
    to: String,
    sent_at: DateTime<Utc>,
}

#[allow(dead_code)]
struct InboundEvent {
    event_type: &'static str,
    payload: serde_json::Value,
    channel: Channel,
    from: String,
    to: String,
    provider_message_id: Option<String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                conversations: Vec::new(),
                bodies: Vec::new(),
                messages: Vec::new(),
                inbound: Vec::new(),
                // Bootstrap providers mirror the seeded rows a fresh
                // database carries.
                providers: vec![(1, "sms-mms".to_string()), (2, "email".to_string())],
                next_conversation_id: 1,
                next_body_id: 1,
                next_message_id: 1,
            }),
        }
    }

    /// Test hook: number of distinct message bodies stored.
    pub async fn body_count(&self) -> usize {
        self.inner.lock().await.bodies.len()
    }

    /// Test hook: number of message rows.
    pub async fn message_count(&self) -> usize {
        self.inner.lock().await.messages.len()
    }

    /// Test hook: number of inbound event rows.
    pub async fn inbound_event_count(&self) -> usize {
        self.inner.lock().await.inbound.len()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Inner {
    fn body_id_for(&mut self, body: &str) -> Option<i64> {
        if body.is_empty() {
            return None;
        }
        if let Some((id, _)) = self.bodies.iter().find(|(_, b)| b == body) {
            return Some(*id);
        }
        let id = self.next_body_id;
        self.next_body_id += 1;
        self.bodies.push((id, body.to_string()));
        Some(id)
    }

    fn conversation_for(
        &mut self,
        channel: Channel,
        from: &str,
        to: &str,
        activity: DateTime<Utc>,
    ) -> usize {
        let key = conversation_key(channel, from, to);
        if let Some(idx) = self.conversations.iter().position(|c| c.key == key) {
            return idx;
        }
        let (a, b) = normalized_pair(channel, from, to);
        let id = self.next_conversation_id;
        self.next_conversation_id += 1;
        self.conversations.push(Conversation {
            id,
            channel,
            key,
            participant_a: a,
            participant_b: b,
            message_count: 0,
            last_activity_at: activity,
        });
        self.conversations.len() - 1
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn insert_outbound(
        &self,
        channel: Channel,
        from: &str,
        to: &str,
        body: &str,
        timestamp: &str,
    ) -> Result<String, StoreError> {
        let sent_at = parse_sent_at(timestamp);
        let mut inner = self.inner.lock().await;

        let body_id = inner.body_id_for(body);
        let conv_idx = inner.conversation_for(channel, from, to, sent_at);
        let conv_id = inner.conversations[conv_idx].id;

        if let Some(existing) = inner.messages.iter().find(|m| {
            m.conversation_id == conv_id
                && m.direction == "outbound"
                && m.sent_at == sent_at
                && m.body_id == body_id
        }) {
            return Ok(existing.id.to_string());
        }

        let id = inner.next_message_id;
        inner.next_message_id += 1;
        inner.messages.push(Message {
            id,
            conversation_id: conv_id,
            body_id,
            provider_id: None,
            direction: "outbound",
            channel,
            from: from.to_string(),
            to: to.to_string(),
            sent_at,
        });

        let conv = &mut inner.conversations[conv_idx];
        conv.message_count += 1;
        if conv.last_activity_at < sent_at {
            conv.last_activity_at = sent_at;
        }

        Ok(id.to_string())
    }

    async fn set_outbound_provider(
        &self,
        message_id: &str,
        provider_name: &str,
    ) -> Result<bool, StoreError> {
        let Ok(id) = message_id.parse::<i64>() else {
            return Ok(false);
        };
        let mut inner = self.inner.lock().await;
        let Some(provider_id) = inner
            .providers
            .iter()
            .find(|(_, name)| name == provider_name)
            .map(|(pid, _)| *pid)
        else {
            return Ok(false);
        };
        if let Some(message) = inner.messages.iter_mut().find(|m| m.id == id) {
            message.provider_id = Some(provider_id);
        }
        Ok(true)
    }

    async fn list_conversations(
        &self,
        page: u32,
        size: u32,
    ) -> Result<(Vec<ConversationRecord>, u64), StoreError> {
        let (page, size) = clamp_paging(page, size);
        let inner = self.inner.lock().await;

        let mut ordered: Vec<&Conversation> = inner.conversations.iter().collect();
        ordered.sort_by(|a, b| b.last_activity_at.cmp(&a.last_activity_at));

        let total = ordered.len() as u64;
        let items = paged(&ordered, page, size)
            .iter()
            .map(|c| ConversationRecord {
                id: c.id.to_string(),
                key: c.key.clone(),
                channel: c.channel.as_str().to_string(),
                participant_a: c.participant_a.clone(),
                participant_b: c.participant_b.clone(),
                message_count: c.message_count,
                last_activity_at: c.last_activity_at,
            })
            .collect();
        Ok((items, total))
    }

    async fn list_messages(
        &self,
        conversation_id: &str,
        page: u32,
        size: u32,
    ) -> Result<(Vec<MessageRecord>, u64), StoreError> {
        let (page, size) = clamp_paging(page, size);
        let Ok(conv_id) = conversation_id.parse::<i64>() else {
            return Ok((Vec::new(), 0));
        };
        let inner = self.inner.lock().await;

        let mut ordered: Vec<&Message> = inner
            .messages
            .iter()
            .filter(|m| m.conversation_id == conv_id)
            .collect();
        ordered.sort_by(|a, b| a.sent_at.cmp(&b.sent_at));

        let total = ordered.len() as u64;
        let items = paged(&ordered, page, size)
            .iter()
            .map(|m| {
                let body = m
                    .body_id
                    .and_then(|bid| inner.bodies.iter().find(|(id, _)| *id == bid))
                    .map(|(_, b)| b.clone())
                    .unwrap_or_default();
                MessageRecord {
                    id: m.id.to_string(),
                    direction: m.direction.to_string(),
                    channel: m.channel.as_str().to_string(),
                    from: m.from.clone(),
                    to: m.to.clone(),
                    body,
                    sent_at: m.sent_at,
                }
            })
            .collect();
        Ok((items, total))
    }

    async fn append_inbound_event(
        &self,
        channel: Channel,
        payload: serde_json::Value,
        from: &str,
        to: &str,
        provider_message_id: Option<&str>,
    ) -> Result<(), StoreError> {
        let pmid = provider_message_id.map(str::trim).filter(|s| !s.is_empty());
        let mut inner = self.inner.lock().await;

        if let Some(pmid) = pmid {
            let duplicate = inner
                .inbound
                .iter()
                .any(|e| e.channel == channel && e.provider_message_id.as_deref() == Some(pmid));
            if duplicate {
                return Ok(());
            }
        }

        inner.inbound.push(InboundEvent {
            event_type: match channel {
                Channel::Sms | Channel::Mms => "sms_received",
                Channel::Email => "email_received",
            },
            payload,
            channel,
            from: from.to_string(),
            to: to.to_string(),
            provider_message_id: pmid.map(|s| s.to_string()),
        });
        Ok(())
    }

    async fn list_unrouted_outbound(
        &self,
        limit: i64,
    ) -> Result<Vec<OutboundMessageEvent>, StoreError> {
        let inner = self.inner.lock().await;
        let events = inner
            .messages
            .iter()
            .filter(|m| m.direction == "outbound" && m.provider_id.is_none())
            .take(limit.max(0) as usize)
            .map(|m| {
                let body = m
                    .body_id
                    .and_then(|bid| inner.bodies.iter().find(|(id, _)| *id == bid))
                    .map(|(_, b)| b.clone())
                    .unwrap_or_default();
                let mut metadata = std::collections::HashMap::new();
                metadata.insert(
                    "message_id".to_string(),
                    serde_json::Value::String(m.id.to_string()),
                );
                OutboundMessageEvent {
                    schema_version: 1,
                    channel: m.channel,
                    customer_id: String::new(),
                    from: m.from.clone(),
                    to: m.to.clone(),
                    subject: None,
                    body,
                    sent_at: Some(m.sent_at),
                    idempotency_key: None,
                    metadata,
                }
            })
            .collect();
        Ok(events)
    }
}

fn paged<'a, T>(rows: &'a [&'a T], page: u32, size: u32) -> &'a [&'a T] {
    let start = ((page - 1) as usize).saturating_mul(size as usize);
    let start = start.min(rows.len());
    let end = (start + size as usize).min(rows.len());
    &rows[start..end]
}
