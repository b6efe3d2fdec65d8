pub mod reconcile;
pub mod worker;

pub use reconcile::republish_unrouted;
pub use worker::{Handler, Options, Worker};
