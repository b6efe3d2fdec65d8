use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel_async::RunQueryDsl;
use std::sync::Arc;
use tracing;

use courier_core::db::{DbConnection, DbPool};
use courier_core::schema::{conversations, inbound_events, message_bodies, messages, providers};
use courier_core::types::{Channel, OutboundMessageEvent};

use crate::normalize::{conversation_key, normalized_pair};
use crate::store::{
    clamp_paging, parse_sent_at, ConversationRecord, MessageRecord, MessageStore, StoreError,
};

// Single bootstrap customer until multi-tenancy lands in the auth layer.
const BOOTSTRAP_CUSTOMER_ID: i64 = 1;

/// PostgreSQL-backed store.
pub struct PgStore {
    pool: Arc<DbPool>,
}

impl PgStore {
    pub fn new(pool: Arc<DbPool>) -> Self {
        Self { pool }
    }

    async fn conn(&self) -> Result<DbConnection, StoreError> {
        self.pool
            .get()
            .await
            .map_err(|e| StoreError::Unavailable(format!("pool checkout failed: {}", e)))
    }

    async fn body_id_for(
        &self,
        conn: &mut DbConnection,
        body: &str,
    ) -> Result<Option<i64>, StoreError> {
        if body.is_empty() {
            return Ok(None);
        }

        let inserted: Option<i64> = diesel::insert_into(message_bodies::table)
            .values(message_bodies::body.eq(body))
            .on_conflict(message_bodies::body)
            .do_nothing()
            .returning(message_bodies::id)
            .get_result(conn)
            .await
            .optional()
            .map_err(map_query_err)?;

        if let Some(id) = inserted {
            return Ok(Some(id));
        }

        let existing: i64 = message_bodies::table
            .filter(message_bodies::body.eq(body))
            .select(message_bodies::id)
            .first(conn)
            .await
            .map_err(map_query_err)?;
        Ok(Some(existing))
    }

    async fn conversation_id_for(
        &self,
        conn: &mut DbConnection,
        channel: Channel,
        from: &str,
        to: &str,
        activity: DateTime<Utc>,
    ) -> Result<i64, StoreError> {
        let key = conversation_key(channel, from, to);

        let existing: Option<i64> = conversations::table
            .filter(conversations::key.eq(&key))
            .select(conversations::id)
            .first(conn)
            .await
            .optional()
            .map_err(map_query_err)?;
        if let Some(id) = existing {
            return Ok(id);
        }

        let (a, b) = normalized_pair(channel, from, to);
        diesel::insert_into(conversations::table)
            .values((
                conversations::customer_id.eq(BOOTSTRAP_CUSTOMER_ID),
                conversations::channel.eq(channel.as_str()),
                conversations::key.eq(&key),
                conversations::participant_a.eq(&a),
                conversations::participant_b.eq(&b),
                conversations::message_count.eq(0),
                conversations::last_activity_at.eq(activity),
            ))
            .on_conflict((
                conversations::channel,
                conversations::participant_a,
                conversations::participant_b,
            ))
            .do_nothing()
            .execute(conn)
            .await
            .map_err(map_query_err)?;

        // Re-select: a concurrent insert may have won the conflict.
        conversations::table
            .filter(conversations::key.eq(&key))
            .select(conversations::id)
            .first(conn)
            .await
            .map_err(map_query_err)
    }

    async fn find_existing_outbound(
        &self,
        conn: &mut DbConnection,
        conversation_id: i64,
        sent_at: DateTime<Utc>,
        body_id: Option<i64>,
    ) -> Result<Option<i64>, StoreError> {
        let query = messages::table
            .filter(messages::conversation_id.eq(conversation_id))
            .filter(messages::direction.eq("outbound"))
            .filter(messages::sent_at.eq(sent_at))
            .select(messages::id);
        let found = match body_id {
            Some(bid) => {
                query
                    .filter(messages::body_id.eq(bid))
                    .first(conn)
                    .await
                    .optional()
            }
            None => {
                query
                    .filter(messages::body_id.is_null())
                    .first(conn)
                    .await
                    .optional()
            }
        };
        found.map_err(map_query_err)
    }
}

#[async_trait]
impl MessageStore for PgStore {
    async fn insert_outbound(
        &self,
        channel: Channel,
        from: &str,
        to: &str,
        body: &str,
        timestamp: &str,
    ) -> Result<String, StoreError> {
        let sent_at = parse_sent_at(timestamp);
        let mut conn = self.conn().await?;

        let body_id = self.body_id_for(&mut conn, body).await?;
        let conv_id = self
            .conversation_id_for(&mut conn, channel, from, to, sent_at)
            .await?;

        if let Some(id) = self
            .find_existing_outbound(&mut conn, conv_id, sent_at, body_id)
            .await?
        {
            return Ok(id.to_string());
        }

        let inserted: Result<i64, DieselError> = diesel::insert_into(messages::table)
            .values((
                messages::conversation_id.eq(conv_id),
                messages::body_id.eq(body_id),
                messages::direction.eq("outbound"),
                messages::channel.eq(channel.as_str()),
                messages::from_participant.eq(from),
                messages::to_participant.eq(to),
                messages::sent_at.eq(sent_at),
            ))
            .returning(messages::id)
            .get_result(&mut conn)
            .await;

        let message_id = match inserted {
            Ok(id) => id,
            // A concurrent duplicate hit the uniqueness constraint first;
            // the existing row is the answer.
            Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => self
                .find_existing_outbound(&mut conn, conv_id, sent_at, body_id)
                .await?
                .ok_or_else(|| {
                    StoreError::Query("duplicate insert lost its winning row".to_string())
                })?,
            Err(e) => return Err(map_query_err(e)),
        };

        diesel::update(conversations::table.filter(conversations::id.eq(conv_id)))
            .set(conversations::message_count.eq(conversations::message_count + 1))
            .execute(&mut conn)
            .await
            .map_err(map_query_err)?;
        diesel::update(
            conversations::table
                .filter(conversations::id.eq(conv_id))
                .filter(conversations::last_activity_at.lt(sent_at)),
        )
        .set(conversations::last_activity_at.eq(sent_at))
        .execute(&mut conn)
        .await
        .map_err(map_query_err)?;

        tracing::debug!(message_id, conversation_id = conv_id, "outbound message persisted");
        Ok(message_id.to_string())
    }

    async fn set_outbound_provider(
        &self,
        message_id: &str,
        provider_name: &str,
    ) -> Result<bool, StoreError> {
        let Ok(id) = message_id.parse::<i64>() else {
            return Ok(false);
        };
        let mut conn = self.conn().await?;

        let provider_id: Option<i64> = providers::table
            .filter(providers::name.eq(provider_name))
            .select(providers::id)
            .first(&mut conn)
            .await
            .optional()
            .map_err(map_query_err)?;
        let Some(provider_id) = provider_id else {
            return Ok(false);
        };

        diesel::update(messages::table.filter(messages::id.eq(id)))
            .set(messages::provider_id.eq(provider_id))
            .execute(&mut conn)
            .await
            .map_err(map_query_err)?;
        Ok(true)
    }

    async fn list_conversations(
        &self,
        page: u32,
        size: u32,
    ) -> Result<(Vec<ConversationRecord>, u64), StoreError> {
        let (page, size) = clamp_paging(page, size);
        let mut conn = self.conn().await?;

        let total: i64 = conversations::table
            .count()
            .get_result(&mut conn)
            .await
            .map_err(map_query_err)?;

        let rows: Vec<(i64, String, String, String, String, i32, DateTime<Utc>)> =
            conversations::table
                .order(conversations::last_activity_at.desc())
                .limit(size as i64)
                .offset(((page - 1) as i64) * size as i64)
                .select((
                    conversations::id,
                    conversations::key,
                    conversations::channel,
                    conversations::participant_a,
                    conversations::participant_b,
                    conversations::message_count,
                    conversations::last_activity_at,
                ))
                .load(&mut conn)
                .await
                .map_err(map_query_err)?;

        let items = rows
            .into_iter()
            .map(
                |(id, key, channel, participant_a, participant_b, count, last_activity_at)| {
                    ConversationRecord {
                        id: id.to_string(),
                        key,
                        channel,
                        participant_a,
                        participant_b,
                        message_count: count.max(0) as u32,
                        last_activity_at,
                    }
                },
            )
            .collect();
        Ok((items, total.max(0) as u64))
    }

    async fn list_messages(
        &self,
        conversation_id: &str,
        page: u32,
        size: u32,
    ) -> Result<(Vec<MessageRecord>, u64), StoreError> {
        let (page, size) = clamp_paging(page, size);
        // Identifiers are numeric; anything else cannot match a row.
        let Ok(conv_id) = conversation_id.parse::<i64>() else {
            return Ok((Vec::new(), 0));
        };
        let mut conn = self.conn().await?;

        let total: i64 = messages::table
            .filter(messages::conversation_id.eq(conv_id))
            .count()
            .get_result(&mut conn)
            .await
            .map_err(map_query_err)?;

        let rows: Vec<(i64, String, String, String, String, DateTime<Utc>, Option<String>)> =
            messages::table
                .left_join(message_bodies::table)
                .filter(messages::conversation_id.eq(conv_id))
                .order(messages::sent_at.asc())
                .limit(size as i64)
                .offset(((page - 1) as i64) * size as i64)
                .select((
                    messages::id,
                    messages::direction,
                    messages::channel,
                    messages::from_participant,
                    messages::to_participant,
                    messages::sent_at,
                    message_bodies::body.nullable(),
                ))
                .load(&mut conn)
                .await
                .map_err(map_query_err)?;

        let items = rows
            .into_iter()
            .map(|(id, direction, channel, from, to, sent_at, body)| MessageRecord {
                id: id.to_string(),
                direction,
                channel,
                from,
                to,
                body: body.unwrap_or_default(),
                sent_at,
            })
            .collect();
        Ok((items, total.max(0) as u64))
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
        let mut conn = self.conn().await?;

        if let Some(pmid) = pmid {
            let duplicate: Option<i64> = inbound_events::table
                .filter(inbound_events::channel.eq(channel.as_str()))
                .filter(inbound_events::provider_message_id.eq(pmid))
                .select(inbound_events::id)
                .first(&mut conn)
                .await
                .optional()
                .map_err(map_query_err)?;
            if duplicate.is_some() {
                return Ok(());
            }
        }

        let event_type = match channel {
            Channel::Sms | Channel::Mms => "sms_received",
            Channel::Email => "email_received",
        };
        let inserted = diesel::insert_into(inbound_events::table)
            .values((
                inbound_events::event_type.eq(event_type),
                inbound_events::payload.eq(payload),
                inbound_events::available_at.eq(Utc::now()),
                inbound_events::status.eq("pending"),
                inbound_events::channel.eq(channel.as_str()),
                inbound_events::from_participant.eq(from),
                inbound_events::to_participant.eq(to),
                inbound_events::provider_message_id.eq(pmid),
            ))
            .execute(&mut conn)
            .await;

        match inserted {
            Ok(_) => Ok(()),
            // A concurrent webhook retry won the insert; success either way.
            Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => Ok(()),
            Err(e) => Err(map_query_err(e)),
        }
    }

    async fn list_unrouted_outbound(
        &self,
        limit: i64,
    ) -> Result<Vec<OutboundMessageEvent>, StoreError> {
        let mut conn = self.conn().await?;

        let rows: Vec<(i64, String, String, String, DateTime<Utc>, Option<String>)> =
            messages::table
                .left_join(message_bodies::table)
                .filter(messages::direction.eq("outbound"))
                .filter(messages::provider_id.is_null())
                .order(messages::id.asc())
                .limit(limit.max(0))
                .select((
                    messages::id,
                    messages::channel,
                    messages::from_participant,
                    messages::to_participant,
                    messages::sent_at,
                    message_bodies::body.nullable(),
                ))
                .load(&mut conn)
                .await
                .map_err(map_query_err)?;

        let events = rows
            .into_iter()
            .filter_map(|(id, channel, from, to, sent_at, body)| {
                let channel = Channel::parse(&channel)?;
                let mut metadata = std::collections::HashMap::new();
                metadata.insert(
                    "message_id".to_string(),
                    serde_json::Value::String(id.to_string()),
                );
                Some(OutboundMessageEvent {
                    schema_version: 1,
                    channel,
                    customer_id: String::new(),
                    from,
                    to,
                    subject: None,
                    body: body.unwrap_or_default(),
                    sent_at: Some(sent_at),
                    idempotency_key: None,
                    metadata,
                })
            })
            .collect();
        Ok(events)
    }
}

fn map_query_err(e: DieselError) -> StoreError {
    match &e {
        DieselError::DatabaseError(DatabaseErrorKind::ClosedConnection, info) => {
            StoreError::Unavailable(info.message().to_string())
        }
        DieselError::DatabaseError(DatabaseErrorKind::SerializationFailure, info) => {
            StoreError::Unavailable(info.message().to_string())
        }
        other => StoreError::Query(other.to_string()),
    }
}
