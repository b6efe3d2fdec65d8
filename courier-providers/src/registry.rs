use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use courier_core::types::Channel;

/// Result class of a provider dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    RateLimited,
    Error,
    Timeout,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::RateLimited => "rate_limited",
            Outcome::Error => "error",
            Outcome::Timeout => "timeout",
        }
    }
}

#[derive(Debug, Clone)]
pub struct DispatchResult {
    pub provider_name: String,
    pub outcome: Outcome,
}

/// Fields a provider needs to send one message.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub channel: Channel,
    pub to: String,
    pub from: String,
    pub body: String,
    pub attachments: Vec<String>,
}

/// A channel-specific dispatcher with a stable name.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;
    async fn dispatch(&self, msg: &OutboundMessage) -> DispatchResult;
}

/// Maps each channel to the single provider handling it. Built once at
/// startup and read-only afterwards.
#[derive(Default)]
pub struct ProviderRegistry {
    map: HashMap<Channel, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, channel: Channel, provider: Arc<dyn Provider>) {
        self.map.insert(channel, provider);
    }

    pub fn get(&self, channel: Channel) -> Option<Arc<dyn Provider>> {
        self.map.get(&channel).cloned()
    }
}
