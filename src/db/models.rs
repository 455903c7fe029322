use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Links one message the bridge posted to Telegram with the Chatwoot
/// conversation it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageMapping {
    pub telegram_message_id: i64,
    pub conversation_id: i64,
    pub account_id: Option<i64>,
    pub chatwoot_message_id: Option<i64>,
}

impl MessageMapping {
    pub fn new(
        telegram_message_id: i64,
        conversation_id: i64,
        account_id: Option<i64>,
        chatwoot_message_id: Option<i64>,
    ) -> Self {
        Self {
            telegram_message_id,
            conversation_id,
            account_id,
            chatwoot_message_id,
        }
    }
}

/// The forum topic opened for a Chatwoot conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadMapping {
    pub conversation_id: i64,
    pub account_id: Option<i64>,
    pub thread_id: i64,
    pub thread_name: String,
    pub created_at: DateTime<Utc>,
}

impl ThreadMapping {
    pub fn new(
        conversation_id: i64,
        account_id: Option<i64>,
        thread_id: i64,
        thread_name: impl Into<String>,
    ) -> Self {
        Self {
            conversation_id,
            account_id,
            thread_id,
            thread_name: thread_name.into(),
            created_at: Utc::now(),
        }
    }
}
