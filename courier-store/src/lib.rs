pub mod memory;
pub mod normalize;
pub mod pg;
pub mod store;

pub use memory::MemoryStore;
pub use pg::PgStore;
pub use store::{ConversationRecord, MessageRecord, MessageStore, SharedStore, StoreError};
