use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use courier_core::{Channel, MemoryQueue, OutboundMessageEvent, Queue, QueueClosed};

fn event(body: &str) -> OutboundMessageEvent {
    OutboundMessageEvent {
        schema_version: 1,
        channel: Channel::Sms,
        customer_id: "1".to_string(),
        from: "+15550001".to_string(),
        to: "+15550002".to_string(),
        subject: None,
        body: body.to_string(),
        sent_at: None,
        idempotency_key: None,
        metadata: HashMap::new(),
    }
}

#[tokio::test]
async fn preserves_fifo_order_for_single_producer() {
    let q = MemoryQueue::new(8);
    q.publish(event("first")).await.unwrap();
    q.publish(event("second")).await.unwrap();
    q.publish(event("third")).await.unwrap();
    assert_eq!(q.depth(), 3);

    assert_eq!(q.receive().await.unwrap().event.body, "first");
    assert_eq!(q.receive().await.unwrap().event.body, "second");
    assert_eq!(q.receive().await.unwrap().event.body, "third");
    assert_eq!(q.depth(), 0);
}

#[tokio::test]
async fn publish_returns_attached_idempotency_key() {
    let q = MemoryQueue::new(4);
    let mut evt = event("keyed");
    evt.idempotency_key = Some("abc123".to_string());
    assert_eq!(q.publish(evt).await.unwrap(), "abc123");
    assert_eq!(q.publish(event("unkeyed")).await.unwrap(), "");
}

#[tokio::test]
async fn close_rejects_publish_but_drains_receivers() {
    let q = MemoryQueue::new(4);
    q.publish(event("buffered")).await.unwrap();
    q.close();
    q.close(); // idempotent

    assert_eq!(q.publish(event("late")).await.unwrap_err(), QueueClosed);

    // Buffered event still drains, then closure is observed.
    assert_eq!(q.receive().await.unwrap().event.body, "buffered");
    assert_eq!(q.receive().await.unwrap_err(), QueueClosed);
}

#[tokio::test]
async fn publish_suspends_when_full_until_space_frees() {
    let q = Arc::new(MemoryQueue::new(1));
    q.publish(event("occupying")).await.unwrap();

    let q2 = q.clone();
    let blocked = tokio::spawn(async move { q2.publish(event("waiting")).await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!blocked.is_finished(), "publish should block while full");

    assert_eq!(q.receive().await.unwrap().event.body, "occupying");
    blocked.await.unwrap().unwrap();
    assert_eq!(q.receive().await.unwrap().event.body, "waiting");
}

#[tokio::test]
async fn receive_suspends_until_an_event_arrives() {
    let q = Arc::new(MemoryQueue::new(4));
    let q2 = q.clone();
    let receiver = tokio::spawn(async move { q2.receive().await });

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(!receiver.is_finished(), "receive should block while empty");

    q.publish(event("arrived")).await.unwrap();
    assert_eq!(receiver.await.unwrap().unwrap().event.body, "arrived");
}
