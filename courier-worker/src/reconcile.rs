use anyhow::Result;
use std::sync::Arc;
use tracing;

use courier_core::queue::Queue;
use courier_store::SharedStore;

/// Re-publish outbound rows that were persisted but never tagged with a
/// provider. The intake path persists before publishing, so rows without a
/// provider are exactly the events a dropped queue may have lost; replaying
/// them restores at-least-once delivery after a restart. Duplicate replays
/// are safe: the worker keys retry state by idempotency key and tagging is
/// idempotent.
pub async fn republish_unrouted(
    store: &SharedStore,
    queue: &Arc<dyn Queue>,
    limit: i64,
) -> Result<usize> {
    let events = store.list_unrouted_outbound(limit).await?;
    let mut published = 0usize;
    for mut event in events {
        event.idempotency_key = Some(event.idempotency_key());
        if queue.publish(event).await.is_err() {
            tracing::warn!("queue closed during reconciliation; stopping");
            break;
        }
        published += 1;
    }
    if published > 0 {
        tracing::info!(published, "re-published unrouted outbound messages");
    }
    Ok(published)
}
