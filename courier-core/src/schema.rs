use diesel::{allow_tables_to_appear_in_same_query, joinable, table};

table! {
    customers (id) {
        id -> BigInt,
        name -> Text,
        created_at -> Timestamptz,
    }
}

table! {
    providers (id) {
        id -> BigInt,
        customer_id -> BigInt,
        kind -> Text,
        name -> Text,
        created_at -> Timestamptz,
    }
}

table! {
    conversations (id) {
        id -> BigInt,
        customer_id -> BigInt,
        channel -> Text,
        key -> Text,
        participant_a -> Text,
        participant_b -> Text,
        message_count -> Integer,
        last_activity_at -> Timestamptz,
        external_key -> Nullable<Text>,
        created_at -> Timestamptz,
    }
}

table! {
    message_bodies (id) {
        id -> BigInt,
        body -> Text,
    }
}

table! {
    messages (id) {
        id -> BigInt,
        conversation_id -> BigInt,
        body_id -> Nullable<BigInt>,
        provider_id -> Nullable<BigInt>,
        direction -> Text,
        channel -> Text,
        from_participant -> Text,
        to_participant -> Text,
        sent_at -> Timestamptz,
        created_at -> Timestamptz,
    }
}

table! {
    inbound_events (id) {
        id -> BigInt,
        event_type -> Text,
        payload -> Jsonb,
        available_at -> Timestamptz,
        status -> Text,
        channel -> Text,
        from_participant -> Text,
        to_participant -> Text,
        provider_message_id -> Nullable<Text>,
    }
}

joinable!(providers -> customers (customer_id));
joinable!(conversations -> customers (customer_id));
joinable!(messages -> conversations (conversation_id));
joinable!(messages -> message_bodies (body_id));
joinable!(messages -> providers (provider_id));

allow_tables_to_appear_in_same_query!(
    customers,
    providers,
    conversations,
    message_bodies,
    messages,
    inbound_events,
);
