use async_trait::async_trait;

use super::DatabaseError;
use super::models::{MessageMapping, ThreadMapping};

#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn get_message_mapping(
        &self,
        telegram_message_id: i64,
    ) -> Result<Option<MessageMapping>, DatabaseError>;
    async fn upsert_message_mapping(&self, mapping: &MessageMapping) -> Result<(), DatabaseError>;
}

#[async_trait]
pub trait ThreadStore: Send + Sync {
    async fn get_by_conversation(
        &self,
        conversation_id: i64,
    ) -> Result<Option<ThreadMapping>, DatabaseError>;
    async fn get_by_thread(&self, thread_id: i64) -> Result<Option<ThreadMapping>, DatabaseError>;
    async fn upsert_thread_mapping(&self, mapping: &ThreadMapping) -> Result<(), DatabaseError>;
    async fn delete_thread_mapping(&self, conversation_id: i64) -> Result<(), DatabaseError>;
}
