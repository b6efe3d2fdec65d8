use anyhow::Result;
use axum::{
    extract::Extension,
    middleware,
    routing::{get, post},
    Router,
};
use std::env;
use std::net::SocketAddr;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tracing;

use courier_core::GatewayContext;
use courier_store::SharedStore;

use crate::auth::{auth_middleware, AuthState};
use crate::handlers::{self, ApiState};
use crate::rate_limit::{rate_limit_middleware, RateLimiter};

/// Assemble the full router. Health and metrics stay public behind the
/// public rate limit; everything under /api additionally passes the
/// protected rate limit and (when enabled) bearer auth.
pub fn router(ctx: GatewayContext, store: SharedStore) -> Router {
    let state = ApiState {
        ctx: ctx.clone(),
        store,
    };

    let public_rl = RateLimiter::new(
        ctx.config.rate_limit.public_rps,
        ctx.config.rate_limit.public_burst,
    );
    let protected_rl = RateLimiter::new(
        ctx.config.rate_limit.protected_rps,
        ctx.config.rate_limit.protected_burst,
    );
    let auth_state = AuthState::from_config(&ctx.config.auth);

    let api = Router::new()
        .route("/api/messages/sms", post(handlers::send_sms))
        .route("/api/messages/email", post(handlers::send_email))
        .route("/api/webhooks/sms", post(handlers::webhook_sms))
        .route("/api/webhooks/email", post(handlers::webhook_email))
        .route("/api/conversations", get(handlers::list_conversations))
        .route(
            "/api/conversations/:id/messages",
            get(handlers::list_conversation_messages),
        )
        .layer(middleware::from_fn_with_state(auth_state, auth_middleware))
        .layer(middleware::from_fn_with_state(
            protected_rl,
            rate_limit_middleware,
        ));

    Router::new()
        .route("/healthz", get(handlers::health))
        .route("/metrics", get(handlers::metrics_exposition))
        .merge(api)
        .layer(
            ServiceBuilder::new()
                .layer(Extension(state))
                .layer(middleware::from_fn_with_state(
                    public_rl,
                    rate_limit_middleware,
                ))
                .layer(cors_layer()),
        )
}

// Allow specific origins from CORS_ORIGINS, or fall back to permissive for
// development with a warning.
fn cors_layer() -> CorsLayer {
    if let Ok(origins) = env::var("CORS_ORIGINS") {
        let parsed: Vec<axum::http::HeaderValue> = origins
            .split(',')
            .filter_map(|origin| origin.trim().parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(parsed)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        tracing::warn!("CORS_ORIGINS not set; using permissive CORS");
        CorsLayer::permissive()
    }
}

pub async fn run(ctx: GatewayContext, store: SharedStore, shutdown: CancellationToken) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", ctx.config.server.host, ctx.config.server.port)
        .parse()?;
    let app = router(ctx, store);

    tracing::info!("Starting API server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { shutdown.cancelled().await })
    .await?;

    Ok(())
}
