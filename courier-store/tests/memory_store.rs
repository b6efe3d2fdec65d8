use courier_core::types::Channel;
use courier_store::{MemoryStore, MessageStore};

#[tokio::test]
async fn duplicate_outbound_submissions_collapse_to_one_row() {
    let store = MemoryStore::new();
    let first = store
        .insert_outbound(
            Channel::Sms,
            "+15551234567",
            "+15557654321",
            "hello",
            "2025-11-14T12:00:00Z",
        )
        .await
        .unwrap();
    let second = store
        .insert_outbound(
            Channel::Sms,
            "+15551234567",
            "+15557654321",
            "hello",
            "2025-11-14T12:00:00Z",
        )
        .await
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(store.message_count().await, 1);
}

#[tokio::test]
async fn subsecond_timestamps_collapse_into_the_same_row() {
    let store = MemoryStore::new();
    let a = store
        .insert_outbound(Channel::Sms, "+1", "+2", "hi", "2025-11-14T12:00:00.100Z")
        .await
        .unwrap();
    let b = store
        .insert_outbound(Channel::Sms, "+1", "+2", "hi", "2025-11-14T12:00:00.900Z")
        .await
        .unwrap();
    assert_eq!(a, b);
    assert_eq!(store.message_count().await, 1);
}

#[tokio::test]
async fn identical_bodies_share_one_body_row() {
    let store = MemoryStore::new();
    store
        .insert_outbound(Channel::Sms, "+1", "+2", "same body", "2025-11-14T12:00:00Z")
        .await
        .unwrap();
    store
        .insert_outbound(Channel::Sms, "+1", "+2", "same body", "2025-11-14T12:00:05Z")
        .await
        .unwrap();
    store
        .insert_outbound(Channel::Sms, "+3", "+4", "same body", "2025-11-14T12:00:10Z")
        .await
        .unwrap();

    assert_eq!(store.message_count().await, 3);
    assert_eq!(store.body_count().await, 1);
}

#[tokio::test]
async fn reversed_participants_reuse_the_conversation() {
    let store = MemoryStore::new();
    store
        .insert_outbound(Channel::Sms, "+15550001", "+15550002", "a", "2025-11-14T12:00:00Z")
        .await
        .unwrap();
    store
        .insert_outbound(Channel::Sms, "+15550002", "+15550001", "b", "2025-11-14T12:01:00Z")
        .await
        .unwrap();

    let (items, total) = store.list_conversations(1, 50).await.unwrap();
    assert_eq!(total, 1);
    assert_eq!(items[0].message_count, 2);
}

#[tokio::test]
async fn pagination_covers_the_full_ordered_set() {
    let store = MemoryStore::new();
    for i in 0..7u32 {
        let from = format!("+1555000{}", i);
        let ts = format!("2025-11-14T12:00:{:02}Z", i);
        store
            .insert_outbound(Channel::Sms, &from, "+15559999", "hi", &ts)
            .await
            .unwrap();
    }

    let (page1, total1) = store.list_conversations(1, 3).await.unwrap();
    let (page2, total2) = store.list_conversations(2, 3).await.unwrap();
    let (page3, _) = store.list_conversations(3, 3).await.unwrap();
    let (page4, _) = store.list_conversations(4, 3).await.unwrap();

    assert_eq!(total1, 7);
    assert_eq!(total2, 7);
    assert_eq!(page1.len(), 3);
    assert_eq!(page2.len(), 3);
    assert_eq!(page3.len(), 1);
    assert!(page4.is_empty(), "past-the-end page is empty, not an error");

    let all: Vec<_> = page1.iter().chain(&page2).chain(&page3).collect();
    for pair in all.windows(2) {
        assert!(
            pair[0].last_activity_at >= pair[1].last_activity_at,
            "pages are ordered by last activity descending"
        );
    }
    let mut ids: Vec<_> = all.iter().map(|c| c.id.clone()).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 7, "union of pages equals the full set");
}

#[tokio::test]
async fn messages_list_orders_ascending_and_tolerates_bad_ids() {
    let store = MemoryStore::new();
    store
        .insert_outbound(Channel::Sms, "+1", "+2", "later", "2025-11-14T12:05:00Z")
        .await
        .unwrap();
    store
        .insert_outbound(Channel::Sms, "+1", "+2", "earlier", "2025-11-14T12:00:00Z")
        .await
        .unwrap();

    let (convs, _) = store.list_conversations(1, 50).await.unwrap();
    let (msgs, total) = store.list_messages(&convs[0].id, 1, 50).await.unwrap();
    assert_eq!(total, 2);
    assert_eq!(msgs[0].body, "earlier");
    assert_eq!(msgs[1].body, "later");

    let (empty, total) = store.list_messages("not-a-number", 1, 50).await.unwrap();
    assert!(empty.is_empty());
    assert_eq!(total, 0);
}

#[tokio::test]
async fn inbound_events_dedupe_on_provider_message_id() {
    let store = MemoryStore::new();
    let payload = serde_json::json!({"type": "sms", "body": "inbound"});

    for _ in 0..3 {
        store
            .append_inbound_event(Channel::Sms, payload.clone(), "+2", "+1", Some("SM123"))
            .await
            .unwrap();
    }
    assert_eq!(store.inbound_event_count().await, 1);

    // Without a provider id there is nothing to dedupe on.
    store
        .append_inbound_event(Channel::Sms, payload.clone(), "+2", "+1", None)
        .await
        .unwrap();
    store
        .append_inbound_event(Channel::Sms, payload.clone(), "+2", "+1", Some("  "))
        .await
        .unwrap();
    assert_eq!(store.inbound_event_count().await, 3);

    // Same id on a different channel is a distinct event.
    store
        .append_inbound_event(Channel::Email, payload, "a@x.com", "b@x.com", Some("SM123"))
        .await
        .unwrap();
    assert_eq!(store.inbound_event_count().await, 4);
}

#[tokio::test]
async fn provider_tagging_reports_whether_the_provider_exists() {
    let store = MemoryStore::new();
    let id = store
        .insert_outbound(Channel::Sms, "+1", "+2", "tag me", "2025-11-14T12:00:00Z")
        .await
        .unwrap();

    assert!(store.set_outbound_provider(&id, "sms-mms").await.unwrap());
    // Repeat calls are safe.
    assert!(store.set_outbound_provider(&id, "sms-mms").await.unwrap());
    assert!(!store.set_outbound_provider(&id, "carrier-pigeon").await.unwrap());
    assert!(!store.set_outbound_provider("bogus", "sms-mms").await.unwrap());

    // Tagged rows no longer show up for reconciliation.
    let unrouted = store.list_unrouted_outbound(10).await.unwrap();
    assert!(unrouted.is_empty());
}

#[tokio::test]
async fn unrouted_rows_become_replayable_events() {
    let store = MemoryStore::new();
    let id = store
        .insert_outbound(Channel::Email, "a@x.com", "b@x.com", "replay", "2025-11-14T12:00:00Z")
        .await
        .unwrap();

    let events = store.list_unrouted_outbound(10).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].channel, Channel::Email);
    assert_eq!(events[0].body, "replay");
    assert_eq!(events[0].message_id(), Some(id.as_str()));
}
