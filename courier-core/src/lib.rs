pub mod config;
pub mod context;
pub mod db;
pub mod metrics;
pub mod queue;
pub mod schema;
pub mod types;

pub use config::Config;
pub use context::GatewayContext;
pub use db::DbPool;
pub use metrics::Metrics;
pub use queue::{Delivery, MemoryQueue, Queue, QueueClosed};
pub use types::{Channel, DeadLetter, OutboundMessageEvent};
