use axum::body::Bytes;
use axum::extract::{Extension, Path, Query};
use axum::http::header::{HeaderMap, ACCEPT, CONTENT_TYPE};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use std::collections::HashMap;

use courier_core::queue::Queue;
use courier_core::types::Channel;
use courier_core::GatewayContext;
use courier_store::SharedStore;

use crate::errors::error_response;
use crate::intake::accept_outbound;
use crate::models::{
    Accepted, ConversationDto, EmailRequest, ListResponse, MessageDto, PageMeta, SmsRequest,
};

/// Request-handling state: the process context plus the store selected at
/// startup.
#[derive(Clone)]
pub struct ApiState {
    pub ctx: GatewayContext,
    pub store: SharedStore,
}

const MAX_PAGE_SIZE: u32 = 50;

fn is_json_content(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_ascii_lowercase().starts_with("application/json"))
        .unwrap_or(false)
}

fn accepts_json(headers: &HeaderMap) -> bool {
    match headers.get(ACCEPT).and_then(|v| v.to_str().ok()) {
        // Absent Accept means no preference.
        None => true,
        Some(raw) => {
            let raw = raw.to_ascii_lowercase();
            raw.split(',').map(|part| part.trim()).any(|part| {
                part.starts_with("application/json")
                    || part.starts_with("application/*")
                    || part.starts_with("*/*")
            })
        }
    }
}

/// page defaults to 1 (non-positive input included); page_size (alias
/// pageSize) defaults to 50 and clamps to [1, 50].
fn parse_paging(params: &HashMap<String, String>) -> (u32, u32) {
    let page = params
        .get("page")
        .and_then(|v| v.parse::<i64>().ok())
        .filter(|n| *n > 0)
        .map(|n| n as u32)
        .unwrap_or(1);

    let raw_size = params.get("page_size").or_else(|| params.get("pageSize"));
    let size = match raw_size.and_then(|v| v.parse::<i64>().ok()) {
        Some(n) if n > 0 && n <= MAX_PAGE_SIZE as i64 => n as u32,
        _ => MAX_PAGE_SIZE,
    };
    (page, size)
}

fn validate_sms(req: &SmsRequest) -> Result<Channel, &'static str> {
    match req.kind.trim().to_ascii_lowercase().as_str() {
        "sms" => Ok(Channel::Sms),
        "mms" => {
            if req.attachments.as_deref().unwrap_or_default().is_empty() {
                Err("mms requires at least one attachment")
            } else {
                Ok(Channel::Mms)
            }
        }
        _ => Err("invalid type"),
    }
}

pub async fn send_sms(
    Extension(state): Extension<ApiState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if !is_json_content(&headers) {
        return error_response(StatusCode::UNSUPPORTED_MEDIA_TYPE, "unsupported media type");
    }
    let req: SmsRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(_) => return error_response(StatusCode::BAD_REQUEST, "invalid json body"),
    };
    let channel = match validate_sms(&req) {
        Ok(c) => c,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, msg),
    };

    let attachments = req.attachments.unwrap_or_default();
    match accept_outbound(
        &state,
        channel,
        &req.from,
        &req.to,
        &req.body,
        &req.timestamp,
        &attachments,
    )
    .await
    {
        Ok(()) => (StatusCode::ACCEPTED, Json(Accepted::new())).into_response(),
        Err(_) => error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to enqueue message"),
    }
}

pub async fn send_email(
    Extension(state): Extension<ApiState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if !is_json_content(&headers) {
        return error_response(StatusCode::UNSUPPORTED_MEDIA_TYPE, "unsupported media type");
    }
    let req: EmailRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(_) => return error_response(StatusCode::BAD_REQUEST, "invalid json body"),
    };
    if req.body.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "empty body");
    }

    let attachments = req.attachments.unwrap_or_default();
    match accept_outbound(
        &state,
        Channel::Email,
        &req.from,
        &req.to,
        &req.body,
        &req.timestamp,
        &attachments,
    )
    .await
    {
        Ok(()) => (StatusCode::ACCEPTED, Json(Accepted::new())).into_response(),
        Err(_) => error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to enqueue message"),
    }
}

pub async fn webhook_sms(
    Extension(state): Extension<ApiState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if !is_json_content(&headers) {
        return error_response(StatusCode::UNSUPPORTED_MEDIA_TYPE, "unsupported media type");
    }
    let req: SmsRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(_) => return error_response(StatusCode::BAD_REQUEST, "invalid json body"),
    };
    let channel = match validate_sms(&req) {
        Ok(c) => c,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, msg),
    };

    let payload = match serde_json::to_value(&req) {
        Ok(v) => v,
        Err(_) => return error_response(StatusCode::BAD_REQUEST, "invalid json body"),
    };
    match state
        .store
        .append_inbound_event(
            channel,
            payload,
            &req.from,
            &req.to,
            req.messaging_provider_id.as_deref(),
        )
        .await
    {
        Ok(()) => (StatusCode::ACCEPTED, Json(Accepted::new())).into_response(),
        Err(_) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "failed to persist inbound event",
        ),
    }
}

pub async fn webhook_email(
    Extension(state): Extension<ApiState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if !is_json_content(&headers) {
        return error_response(StatusCode::UNSUPPORTED_MEDIA_TYPE, "unsupported media type");
    }
    let req: EmailRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(_) => return error_response(StatusCode::BAD_REQUEST, "invalid json body"),
    };
    if req.body.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "empty body");
    }

    let payload = match serde_json::to_value(&req) {
        Ok(v) => v,
        Err(_) => return error_response(StatusCode::BAD_REQUEST, "invalid json body"),
    };
    match state
        .store
        .append_inbound_event(
            Channel::Email,
            payload,
            &req.from,
            &req.to,
            req.xillio_id.as_deref(),
        )
        .await
    {
        Ok(()) => (StatusCode::ACCEPTED, Json(Accepted::new())).into_response(),
        Err(_) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "failed to persist inbound event",
        ),
    }
}

pub async fn list_conversations(
    Extension(state): Extension<ApiState>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    if !accepts_json(&headers) {
        return StatusCode::NOT_ACCEPTABLE.into_response();
    }
    let (page, size) = parse_paging(&params);

    match state.store.list_conversations(page, size).await {
        Ok((items, total)) => {
            let items: Vec<ConversationDto> = items.into_iter().map(Into::into).collect();
            Json(ListResponse {
                items,
                meta: PageMeta {
                    page,
                    page_size: size,
                    total,
                },
            })
            .into_response()
        }
        Err(_) => error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to list conversations"),
    }
}

pub async fn list_conversation_messages(
    Extension(state): Extension<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    if !accepts_json(&headers) {
        return StatusCode::NOT_ACCEPTABLE.into_response();
    }
    let (page, size) = parse_paging(&params);

    match state.store.list_messages(&id, page, size).await {
        Ok((items, total)) => {
            let items: Vec<MessageDto> = items.into_iter().map(Into::into).collect();
            Json(ListResponse {
                items,
                meta: PageMeta {
                    page,
                    page_size: size,
                    total,
                },
            })
            .into_response()
        }
        Err(_) => error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to list messages"),
    }
}

pub async fn health() -> &'static str {
    "ok"
}

pub async fn metrics_exposition(Extension(state): Extension<ApiState>) -> Response {
    // Refresh the gauge on scrape so it tracks the live queue.
    state
        .ctx
        .metrics
        .queue_depth
        .set(state.ctx.queue.depth() as i64);

    match state.ctx.metrics.render() {
        Ok(text) => (
            StatusCode::OK,
            [(CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(_) => error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to render metrics"),
    }
}
