use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing;
use tracing_subscriber;

use courier_core::queue::Queue;
use courier_core::types::Channel;
use courier_core::{Config, GatewayContext};
use courier_providers::{
    CircuitBreaker, DispatchHandler, MockEmailProvider, MockSmsProvider, ProviderBreakers,
    ProviderRegistry,
};
use courier_store::{MemoryStore, PgStore, SharedStore};
use courier_worker::{republish_unrouted, Handler, Options, Worker};

const BREAKER_FAILURE_THRESHOLD: u32 = 5;
const BREAKER_COOLDOWN: Duration = Duration::from_secs(30);
const RECONCILE_BATCH: i64 = 1000;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(config.server.log_level.clone())
            }),
        )
        .init();

    tracing::info!("Starting Courier messaging gateway");

    let ctx = GatewayContext::new(config).await?;

    let store: SharedStore = match &ctx.db_pool {
        Some(pool) => Arc::new(PgStore::new(pool.clone())),
        None => {
            tracing::info!("DATABASE_URL not set; using in-memory store");
            Arc::new(MemoryStore::new())
        }
    };

    // Providers and their breakers. SMS and MMS share one carrier mock.
    let sms = Arc::new(MockSmsProvider::new(&ctx.config.provider));
    let email = Arc::new(MockEmailProvider::new(&ctx.config.provider));
    let mut registry = ProviderRegistry::new();
    registry.insert(Channel::Sms, sms.clone());
    registry.insert(Channel::Mms, sms);
    registry.insert(Channel::Email, email);

    let mut breakers = HashMap::new();
    breakers.insert(
        "sms-mms".to_string(),
        CircuitBreaker::new(BREAKER_FAILURE_THRESHOLD, BREAKER_COOLDOWN),
    );
    breakers.insert(
        "email".to_string(),
        CircuitBreaker::new(BREAKER_FAILURE_THRESHOLD, BREAKER_COOLDOWN),
    );

    let dispatch = Arc::new(DispatchHandler::new(
        Arc::new(registry),
        ProviderBreakers::new(breakers),
        store.clone(),
        ctx.metrics.clone(),
    ));
    let handler: Handler = Arc::new(move |evt| {
        let dispatch = dispatch.clone();
        Box::pin(async move { dispatch.handle(evt).await })
    });

    let queue: Arc<dyn Queue> = ctx.queue.clone();
    let worker = Arc::new(Worker::with_options(
        queue.clone(),
        handler,
        Options::from_config(&ctx.config.worker),
        Some(ctx.metrics.clone()),
    ));

    let shutdown = CancellationToken::new();

    tokio::spawn(worker.run(shutdown.clone()));

    // Mirror queue depth into the gauge.
    {
        let ctx = ctx.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(1));
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    _ = tick.tick() => {
                        ctx.metrics.queue_depth.set(ctx.queue.depth() as i64);
                    }
                }
            }
        });
    }

    if ctx.config.worker.reconcile_on_start {
        match republish_unrouted(&store, &queue, RECONCILE_BATCH).await {
            Ok(n) => tracing::info!(republished = n, "startup reconciliation finished"),
            Err(e) => tracing::warn!(error = %e, "startup reconciliation failed"),
        }
    }

    // SIGINT closes the queue and cancels the worker; the server drains.
    {
        let ctx = ctx.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown signal received");
                ctx.queue.close();
                shutdown.cancel();
            }
        });
    }

    courier_api::run(ctx, store, shutdown).await
}
