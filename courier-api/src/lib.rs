pub mod auth;
pub mod egress;
pub mod errors;
pub mod handlers;
pub mod intake;
pub mod models;
pub mod rate_limit;
pub mod server;
pub mod snippet;

pub use handlers::ApiState;
pub use server::{router, run};
