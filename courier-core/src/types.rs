use chrono::{DateTime, SecondsFormat, Timelike, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;

/// Transport class of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Sms,
    Mms,
    Email,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Sms => "sms",
            Channel::Mms => "mms",
            Channel::Email => "email",
        }
    }

    pub fn parse(raw: &str) -> Option<Channel> {
        match raw {
            "sms" => Some(Channel::Sms),
            "mms" => Some(Channel::Mms),
            "email" => Some(Channel::Email),
            _ => None,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized outbound event enqueued by the intake path after the message
/// row has been persisted. `metadata["message_id"]` carries the persisted
/// identifier so the dispatch handler can tag the row with its provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessageEvent {
    pub schema_version: u32,
    pub channel: Channel,
    pub customer_id: String,
    pub from: String,
    pub to: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl OutboundMessageEvent {
    /// Derive the idempotency key:
    /// `sha256("<channel>|<from>|<to>|<ts-to-second-or-empty>|sha256(body)")`,
    /// hex-encoded. Stable across re-deliveries of the same logical message;
    /// any reshaping of body or timestamp produces a different key.
    pub fn idempotency_key(&self) -> String {
        let ts = match self.sent_at {
            Some(t) => truncate_to_second(t).to_rfc3339_opts(SecondsFormat::Secs, true),
            None => String::new(),
        };
        let body_hash = hex::encode(Sha256::digest(self.body.as_bytes()));
        let base = format!(
            "{}|{}|{}|{}|{}",
            self.channel, self.from, self.to, ts, body_hash
        );
        hex::encode(Sha256::digest(base.as_bytes()))
    }

    pub fn message_id(&self) -> Option<&str> {
        self.metadata.get("message_id").and_then(|v| v.as_str())
    }
}

pub fn truncate_to_second(t: DateTime<Utc>) -> DateTime<Utc> {
    t.with_nanosecond(0).unwrap_or(t)
}

/// An event whose retry budget was exhausted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetter {
    pub event: OutboundMessageEvent,
    pub attempts: u32,
    pub first_seen: DateTime<Utc>,
    pub last_error: String,
    pub at: DateTime<Utc>,
}
