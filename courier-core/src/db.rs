use anyhow::{anyhow, Context, Result};
use diesel_async::pooled_connection::deadpool::{Object, Pool};
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::AsyncPgConnection;
use std::sync::Arc;
use std::time::Duration;
use tracing;

use crate::config::DatabaseConfig;

pub type DbPool = Pool<AsyncPgConnection>;
pub type DbConnection = Object<AsyncPgConnection>;

// Waits between connectivity probes after the first; worst case the gateway
// spends ~15s refusing to start against an unreachable database.
const PROBE_WAITS: [Duration; 4] = [
    Duration::from_secs(1),
    Duration::from_secs(2),
    Duration::from_secs(4),
    Duration::from_secs(8),
];

const CHECKOUT_TIMEOUT: Duration = Duration::from_secs(10);

/// Build the deadpool-backed pool and probe it until a connection checks
/// out. The gateway never starts half-connected: intake would accept rows it
/// cannot persist.
pub async fn create_pool(config: &DatabaseConfig) -> Result<Arc<DbPool>> {
    let url = config
        .url
        .as_deref()
        .ok_or_else(|| anyhow!("DATABASE_URL is not configured"))?;

    tracing::info!(
        url = %redact_credentials(url),
        max_connections = config.max_connections,
        "connecting to database"
    );

    let manager = AsyncDieselConnectionManager::<AsyncPgConnection>::new(url);
    let pool = Pool::builder(manager)
        .max_size(config.max_connections as usize)
        .build()
        .context("failed to build connection pool")?;

    let mut waits = PROBE_WAITS.iter();
    loop {
        match tokio::time::timeout(CHECKOUT_TIMEOUT, pool.get()).await {
            Ok(Ok(_conn)) => {
                tracing::info!("database reachable");
                return Ok(Arc::new(pool));
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "database connection probe failed");
            }
            Err(_) => {
                tracing::warn!(timeout_secs = CHECKOUT_TIMEOUT.as_secs(), "database connection probe timed out");
            }
        }

        match waits.next() {
            Some(wait) => tokio::time::sleep(*wait).await,
            None => {
                return Err(anyhow!(
                    "database unreachable after {} probes",
                    PROBE_WAITS.len() + 1
                ))
            }
        }
    }
}

/// Replace the userinfo portion of a connection URL so logs never carry
/// credentials, whether or not a password is present.
fn redact_credentials(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://****@{}", &url[..scheme_end], &url[at + 1..])
        }
        _ => url.to_string(),
    }
}
