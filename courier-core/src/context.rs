use std::sync::Arc;

use anyhow::Result;

use crate::config::Config;
use crate::db::{create_pool, DbPool};
use crate::metrics::Metrics;
use crate::queue::MemoryQueue;

/// Shared process context wired once at startup. Request handlers and workers
/// clone it; nothing re-assigns it after boot.
#[derive(Clone)]
pub struct GatewayContext {
    pub config: Arc<Config>,
    pub db_pool: Option<Arc<DbPool>>,
    pub metrics: Arc<Metrics>,
    pub queue: Arc<MemoryQueue>,
}

impl GatewayContext {
    pub async fn new(config: Config) -> Result<Self> {
        let db_pool = match config.database.url {
            Some(_) => Some(create_pool(&config.database).await?),
            None => None,
        };
        let metrics = Arc::new(Metrics::new()?);
        let queue = Arc::new(MemoryQueue::new(config.queue.capacity));

        Ok(GatewayContext {
            config: Arc::new(config),
            db_pool,
            metrics,
            queue,
        })
    }

    /// Context without a database, used by tests and in-memory deployments.
    pub fn in_memory(config: Config) -> Result<Self> {
        let metrics = Arc::new(Metrics::new()?);
        let queue = Arc::new(MemoryQueue::new(config.queue.capacity));
        Ok(GatewayContext {
            config: Arc::new(config),
            db_pool: None,
            metrics,
            queue,
        })
    }
}
