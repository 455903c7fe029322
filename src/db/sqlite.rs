use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;

use super::DatabaseError;
use super::manager::Pool;
use super::models::{MessageMapping, ThreadMapping};
use crate::db::schema_sqlite::{messages, topics};

fn datetime_to_string(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

// Rows written by older deployments carry SQLite's `CURRENT_TIMESTAMP` format
// instead of RFC 3339.
fn string_to_datetime(s: &str) -> Result<DateTime<Utc>, DatabaseError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .map(|naive| naive.and_utc())
        .map_err(|e| DatabaseError::Query(format!("invalid datetime format: {}", e)))
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = messages)]
struct DbMessageMapping {
    telegram_message_id: i64,
    chatwoot_conversation_id: i64,
    chatwoot_account_id: Option<i64>,
    chatwoot_message_id: Option<i64>,
}

impl From<DbMessageMapping> for MessageMapping {
    fn from(value: DbMessageMapping) -> Self {
        Self {
            telegram_message_id: value.telegram_message_id,
            conversation_id: value.chatwoot_conversation_id,
            account_id: value.chatwoot_account_id,
            chatwoot_message_id: value.chatwoot_message_id,
        }
    }
}

#[derive(Insertable)]
#[diesel(table_name = messages)]
struct NewMessageMapping {
    telegram_message_id: i64,
    chatwoot_conversation_id: i64,
    chatwoot_account_id: Option<i64>,
    chatwoot_message_id: Option<i64>,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = topics)]
struct DbThreadMapping {
    chatwoot_conversation_id: i64,
    chatwoot_account_id: Option<i64>,
    telegram_topic_id: i64,
    topic_name: Option<String>,
    created_at: Option<String>,
}

impl DbThreadMapping {
    fn to_thread_mapping(&self) -> Result<ThreadMapping, DatabaseError> {
        Ok(ThreadMapping {
            conversation_id: self.chatwoot_conversation_id,
            account_id: self.chatwoot_account_id,
            thread_id: self.telegram_topic_id,
            thread_name: self.topic_name.clone().unwrap_or_default(),
            created_at: match self.created_at.as_deref() {
                Some(value) => string_to_datetime(value)?,
                None => Utc::now(),
            },
        })
    }
}

#[derive(Insertable)]
#[diesel(table_name = topics)]
struct NewThreadMapping<'a> {
    chatwoot_conversation_id: i64,
    chatwoot_account_id: Option<i64>,
    telegram_topic_id: i64,
    topic_name: Option<&'a str>,
    created_at: Option<String>,
}

/// Runs a closure against a pooled connection on the blocking thread pool.
async fn interact<F, T>(pool: &Pool, f: F) -> Result<T, DatabaseError>
where
    F: FnOnce(&mut SqliteConnection) -> Result<T, DatabaseError> + Send + 'static,
    T: Send + 'static,
{
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || {
        let mut conn = pool
            .get()
            .map_err(|e| DatabaseError::Connection(e.to_string()))?;
        f(&mut conn)
    })
    .await
    .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
}

pub struct SqliteMessageStore {
    pool: Pool,
}

impl SqliteMessageStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl super::MessageStore for SqliteMessageStore {
    async fn get_message_mapping(
        &self,
        telegram_message_id_param: i64,
    ) -> Result<Option<MessageMapping>, DatabaseError> {
        interact(&self.pool, move |conn| {
            use crate::db::schema_sqlite::messages::dsl::*;
            messages
                .filter(telegram_message_id.eq(telegram_message_id_param))
                .select(DbMessageMapping::as_select())
                .first::<DbMessageMapping>(conn)
                .optional()
                .map(|row| row.map(MessageMapping::from))
                .map_err(|e| DatabaseError::Query(e.to_string()))
        })
        .await
    }

    async fn upsert_message_mapping(&self, mapping: &MessageMapping) -> Result<(), DatabaseError> {
        let row = NewMessageMapping {
            telegram_message_id: mapping.telegram_message_id,
            chatwoot_conversation_id: mapping.conversation_id,
            chatwoot_account_id: mapping.account_id,
            chatwoot_message_id: mapping.chatwoot_message_id,
        };
        interact(&self.pool, move |conn| {
            diesel::replace_into(messages::table)
                .values(&row)
                .execute(conn)
                .map(|_| ())
                .map_err(|e| DatabaseError::Query(e.to_string()))
        })
        .await
    }
}

pub struct SqliteThreadStore {
    pool: Pool,
}

impl SqliteThreadStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl super::ThreadStore for SqliteThreadStore {
    async fn get_by_conversation(
        &self,
        conversation_id: i64,
    ) -> Result<Option<ThreadMapping>, DatabaseError> {
        interact(&self.pool, move |conn| {
            use crate::db::schema_sqlite::topics::dsl::*;
            topics
                .filter(chatwoot_conversation_id.eq(conversation_id))
                .select(DbThreadMapping::as_select())
                .first::<DbThreadMapping>(conn)
                .optional()
                .map_err(|e| DatabaseError::Query(e.to_string()))?
                .map(|m| m.to_thread_mapping())
                .transpose()
        })
        .await
    }

    async fn get_by_thread(&self, thread_id: i64) -> Result<Option<ThreadMapping>, DatabaseError> {
        interact(&self.pool, move |conn| {
            use crate::db::schema_sqlite::topics::dsl::*;
            topics
                .filter(telegram_topic_id.eq(thread_id))
                .select(DbThreadMapping::as_select())
                .first::<DbThreadMapping>(conn)
                .optional()
                .map_err(|e| DatabaseError::Query(e.to_string()))?
                .map(|m| m.to_thread_mapping())
                .transpose()
        })
        .await
    }

    async fn upsert_thread_mapping(&self, mapping: &ThreadMapping) -> Result<(), DatabaseError> {
        let mapping = mapping.clone();
        interact(&self.pool, move |conn| {
            let row = NewThreadMapping {
                chatwoot_conversation_id: mapping.conversation_id,
                chatwoot_account_id: mapping.account_id,
                telegram_topic_id: mapping.thread_id,
                topic_name: Some(mapping.thread_name.as_str()),
                created_at: Some(datetime_to_string(&mapping.created_at)),
            };
            diesel::replace_into(topics::table)
                .values(&row)
                .execute(conn)
                .map(|_| ())
                .map_err(|e| DatabaseError::Query(e.to_string()))
        })
        .await
    }

    async fn delete_thread_mapping(&self, conversation_id: i64) -> Result<(), DatabaseError> {
        interact(&self.pool, move |conn| {
            use crate::db::schema_sqlite::topics::dsl::*;
            diesel::delete(topics.filter(chatwoot_conversation_id.eq(conversation_id)))
                .execute(conn)
                .map(|_| ())
                .map_err(|e| DatabaseError::Query(e.to_string()))
        })
        .await
    }
}
