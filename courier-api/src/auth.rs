use axum::extract::{ConnectInfo, Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing;

use courier_core::config::AuthConfig;

use crate::errors::error_response;

/// Static bearer-token auth with TTL'd sessions and per-client failure
/// throttling. When disabled the middleware is a passthrough.
#[derive(Clone)]
pub struct AuthState {
    enabled: bool,
    tokens: Arc<HashSet<String>>,
    session_ttl: Duration,
    max_failures: u32,
    backoff: Duration,
    inner: Arc<Mutex<Sessions>>,
}

struct Sessions {
    expiries: HashMap<String, Instant>,
    failures: HashMap<String, u32>,
}

impl AuthState {
    pub fn from_config(cfg: &AuthConfig) -> Self {
        Self {
            enabled: cfg.enabled,
            tokens: Arc::new(cfg.tokens.iter().cloned().collect()),
            session_ttl: Duration::from_secs(cfg.session_ttl_seconds),
            max_failures: cfg.max_failures,
            backoff: Duration::from_secs(cfg.backoff_seconds),
            inner: Arc::new(Mutex::new(Sessions {
                expiries: HashMap::new(),
                failures: HashMap::new(),
            })),
        }
    }

    fn track_failure(&self, client: &str) {
        let mut inner = self.inner.lock().unwrap();
        *inner.failures.entry(client.to_string()).or_insert(0) += 1;
    }

    fn exceeded_failures(&self, client: &str) -> bool {
        let inner = self.inner.lock().unwrap();
        self.max_failures > 0
            && inner.failures.get(client).copied().unwrap_or(0) >= self.max_failures
    }

    fn session_expired(&self, token: &str) -> bool {
        let inner = self.inner.lock().unwrap();
        match inner.expiries.get(token) {
            Some(expiry) => Instant::now() > *expiry,
            // No session yet: first use, not expired.
            None => false,
        }
    }

    fn refresh_session(&self, token: &str) {
        if self.session_ttl.is_zero() {
            return;
        }
        let mut inner = self.inner.lock().unwrap();
        inner
            .expiries
            .insert(token.to_string(), Instant::now() + self.session_ttl);
    }
}

fn extract_bearer(header: Option<&str>) -> Option<&str> {
    let raw = header?.trim();
    if raw.len() < 7 || !raw[..7].eq_ignore_ascii_case("bearer ") {
        return None;
    }
    let token = raw[7..].trim();
    (!token.is_empty()).then_some(token)
}

fn client_key(req: &Request) -> String {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip().to_string())
        .unwrap_or_else(|| "local".to_string())
}

pub async fn auth_middleware(State(auth): State<AuthState>, req: Request, next: Next) -> Response {
    if !auth.enabled {
        return next.run(req).await;
    }

    let client = client_key(&req);
    let header = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    let Some(token) = extract_bearer(header) else {
        auth.track_failure(&client);
        return error_response(StatusCode::UNAUTHORIZED, "missing bearer token");
    };

    if auth.exceeded_failures(&client) {
        let retry_after = auth.backoff.as_secs().to_string();
        return (
            StatusCode::TOO_MANY_REQUESTS,
            [("Retry-After", retry_after)],
            axum::Json(serde_json::json!({"error": "too many auth failures"})),
        )
            .into_response();
    }

    if !auth.tokens.contains(token) {
        auth.track_failure(&client);
        tracing::debug!(client = %client, "rejected invalid bearer token");
        return error_response(StatusCode::UNAUTHORIZED, "invalid token");
    }

    if auth.session_expired(token) {
        // Signal expiry, then refresh so the next attempt succeeds.
        auth.refresh_session(token);
        return error_response(StatusCode::UNAUTHORIZED, "session expired");
    }

    auth.refresh_session(token);
    next.run(req).await
}
