use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};

use courier_store::{ConversationRecord, MessageRecord};

use crate::snippet::make_snippet;

const SNIPPET_GRAPHEMES: usize = 120;

/// Outbound SMS/MMS submission; webhooks reuse the shape with the provider's
/// message id attached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmsRequest {
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub to: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachments: Option<Vec<String>>,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messaging_provider_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailRequest {
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub to: String,
    #[serde(default)]
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachments: Option<Vec<String>>,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xillio_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct Accepted {
    pub status: &'static str,
}

impl Accepted {
    pub fn new() -> Self {
        Self { status: "accepted" }
    }
}

impl Default for Accepted {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ConversationDto {
    pub id: String,
    pub key: String,
    pub channel: String,
    pub participant_a: String,
    pub participant_b: String,
    pub message_count: u32,
    pub last_activity_at: String,
}

impl From<ConversationRecord> for ConversationDto {
    fn from(rec: ConversationRecord) -> Self {
        Self {
            id: rec.id,
            key: rec.key,
            channel: rec.channel,
            participant_a: rec.participant_a,
            participant_b: rec.participant_b,
            message_count: rec.message_count,
            last_activity_at: rec
                .last_activity_at
                .to_rfc3339_opts(SecondsFormat::Secs, true),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageDto {
    pub id: String,
    pub direction: String,
    pub channel: String,
    pub from: String,
    pub to: String,
    pub body: String,
    pub snippet: String,
    pub timestamp: String,
}

impl From<MessageRecord> for MessageDto {
    fn from(rec: MessageRecord) -> Self {
        let snippet = make_snippet(&rec.body, SNIPPET_GRAPHEMES);
        Self {
            id: rec.id,
            direction: rec.direction,
            channel: rec.channel,
            from: rec.from,
            to: rec.to,
            body: rec.body,
            snippet,
            timestamp: rec.sent_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PageMeta {
    pub page: u32,
    pub page_size: u32,
    pub total: u64,
}

#[derive(Debug, Serialize)]
pub struct ListResponse<T> {
    pub items: Vec<T>,
    pub meta: PageMeta,
}
