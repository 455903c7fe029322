// SQLite schema definitions, kept in sync with the migrations in manager.rs

diesel::table! {
    messages (telegram_message_id) {
        telegram_message_id -> BigInt,
        chatwoot_conversation_id -> BigInt,
        chatwoot_account_id -> Nullable<BigInt>,
        chatwoot_message_id -> Nullable<BigInt>,
    }
}

diesel::table! {
    topics (chatwoot_conversation_id) {
        chatwoot_conversation_id -> BigInt,
        chatwoot_account_id -> Nullable<BigInt>,
        telegram_topic_id -> BigInt,
        topic_name -> Nullable<Text>,
        created_at -> Nullable<Text>,
    }
}

diesel::table! {
    schema_version (id) {
        id -> Integer,
        version -> Integer,
        updated_at -> Nullable<Text>,
    }
}

diesel::allow_tables_to_appear_in_same_query!(messages, topics);
