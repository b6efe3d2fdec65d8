pub mod breaker;
pub mod dispatch;
pub mod mock;
pub mod registry;

pub use breaker::{BreakerState, CircuitBreaker, ProviderBreakers};
pub use dispatch::DispatchHandler;
pub use mock::{MockEmailProvider, MockSmsProvider};
pub use registry::{DispatchResult, Outcome, OutboundMessage, Provider, ProviderRegistry};
