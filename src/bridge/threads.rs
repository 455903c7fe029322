use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::db::{DatabaseError, ThreadMapping, ThreadStore};
use crate::telegram::{ChatTarget, MessengerApi, SendOptions, TopicTransition};

use super::BridgeSettings;
use super::logic::{WELCOME_TEXT, topic_name};

/// Owns the conversation to forum topic mapping and the topic lifecycle.
pub struct ThreadManager {
    settings: BridgeSettings,
    messenger: Arc<dyn MessengerApi>,
    store: Arc<dyn ThreadStore>,
    // One lookup-then-create at a time per conversation.
    create_locks: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl ThreadManager {
    pub fn new(
        settings: BridgeSettings,
        messenger: Arc<dyn MessengerApi>,
        store: Arc<dyn ThreadStore>,
    ) -> Self {
        Self {
            settings,
            messenger,
            store,
            create_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the topic for `conversation_id`, creating it on first use.
    ///
    /// `None` means thread mode is off or the topic could not be created;
    /// callers then fall back to the admin chat.
    pub async fn ensure_thread(
        &self,
        conversation_id: i64,
        account_id: i64,
        sender_name: &str,
    ) -> Option<i64> {
        let forum_chat_id = self.settings.forum_chat_id?;

        if let Some(thread_id) = self.mapped_thread(conversation_id).await.ok()? {
            return Some(thread_id);
        }

        let lock = self.creation_lock(conversation_id).await;
        let created = {
            let _guard = lock.lock().await;
            self.create_thread(forum_chat_id, conversation_id, account_id, sender_name)
                .await
        };
        self.release_creation_lock(conversation_id, lock).await;

        let (thread_id, fresh) = created?;
        if fresh {
            let options = SendOptions::html()
                .with_markup(self.settings.thread_keyboard(conversation_id, account_id));
            let target = ChatTarget::thread(forum_chat_id, thread_id);
            if let Err(err) = self.messenger.send_message(target, WELCOME_TEXT, &options).await {
                warn!("failed to post welcome message in topic {}: {}", thread_id, err);
            }
        }
        Some(thread_id)
    }

    async fn mapped_thread(&self, conversation_id: i64) -> Result<Option<i64>, DatabaseError> {
        self.store
            .get_by_conversation(conversation_id)
            .await
            .map(|mapping| mapping.map(|mapping| mapping.thread_id))
            .inspect_err(|err| {
                error!(
                    "thread lookup for conversation {} failed: {}",
                    conversation_id, err
                )
            })
    }

    // Runs under the conversation's creation lock. The flag is true when
    // this call created the topic.
    async fn create_thread(
        &self,
        forum_chat_id: i64,
        conversation_id: i64,
        account_id: i64,
        sender_name: &str,
    ) -> Option<(i64, bool)> {
        if let Some(thread_id) = self.mapped_thread(conversation_id).await.ok()? {
            return Some((thread_id, false));
        }

        let name = topic_name(sender_name, conversation_id);
        let topic = match self.messenger.create_forum_topic(forum_chat_id, &name).await {
            Ok(topic) => topic,
            Err(err) => {
                warn!(
                    "failed to create topic for conversation {}: {}",
                    conversation_id, err
                );
                return None;
            }
        };
        let thread_id = topic.message_thread_id;
        info!(
            "created topic {} ({}) for conversation {}",
            thread_id, name, conversation_id
        );

        let mapping = ThreadMapping::new(conversation_id, Some(account_id), thread_id, name);
        if let Err(err) = self.store.upsert_thread_mapping(&mapping).await {
            error!(
                "failed to persist topic {} for conversation {}, topic is orphaned: {}",
                thread_id, conversation_id, err
            );
            return None;
        }
        Some((thread_id, true))
    }

    async fn creation_lock(&self, conversation_id: i64) -> Arc<Mutex<()>> {
        self.create_locks
            .lock()
            .await
            .entry(conversation_id)
            .or_default()
            .clone()
    }

    async fn release_creation_lock(&self, conversation_id: i64, lock: Arc<Mutex<()>>) {
        let mut locks = self.create_locks.lock().await;
        // The map and `lock` hold the only references once no one else waits.
        if Arc::strong_count(&lock) <= 2 {
            locks.remove(&conversation_id);
        }
    }

    /// Closes the conversation's topic. Returns `false` when there was no
    /// live topic to close.
    pub async fn close(&self, conversation_id: i64) -> Result<bool> {
        let Some((forum_chat_id, mapping)) = self.lookup(conversation_id).await? else {
            return Ok(false);
        };

        match self
            .messenger
            .close_forum_topic(forum_chat_id, mapping.thread_id)
            .await
        {
            Ok(TopicTransition::Changed) => {
                info!(
                    "closed topic {} for conversation {}",
                    mapping.thread_id, conversation_id
                );
                Ok(true)
            }
            Ok(TopicTransition::AlreadyInState) => {
                debug!("topic {} was already closed", mapping.thread_id);
                Ok(true)
            }
            Err(err) if err.is_thread_deleted() => {
                self.invalidate(conversation_id).await?;
                Ok(false)
            }
            Err(err) => Err(err).context("failed to close forum topic"),
        }
    }

    /// Reopens the conversation's topic. Returns `false` when there was no
    /// live topic to reopen.
    pub async fn reopen(&self, conversation_id: i64) -> Result<bool> {
        let Some((forum_chat_id, mapping)) = self.lookup(conversation_id).await? else {
            return Ok(false);
        };

        match self
            .messenger
            .reopen_forum_topic(forum_chat_id, mapping.thread_id)
            .await
        {
            Ok(TopicTransition::Changed) => {
                info!(
                    "reopened topic {} for conversation {}",
                    mapping.thread_id, conversation_id
                );
                Ok(true)
            }
            Ok(TopicTransition::AlreadyInState) => {
                debug!("topic {} was already open", mapping.thread_id);
                Ok(true)
            }
            Err(err) if err.is_thread_deleted() => {
                self.invalidate(conversation_id).await?;
                Ok(false)
            }
            Err(err) => Err(err).context("failed to reopen forum topic"),
        }
    }

    /// Closes the topic on a best-effort basis and drops its mapping, so
    /// the next message for the conversation opens a fresh topic.
    pub async fn close_and_forget(&self, conversation_id: i64) -> Result<bool> {
        let Some((forum_chat_id, mapping)) = self.lookup(conversation_id).await? else {
            return Ok(false);
        };

        if let Err(err) = self
            .messenger
            .close_forum_topic(forum_chat_id, mapping.thread_id)
            .await
        {
            warn!("failed to close topic {}: {}", mapping.thread_id, err);
        }
        self.invalidate(conversation_id).await?;
        info!(
            "closed and forgot topic {} for conversation {}",
            mapping.thread_id, conversation_id
        );
        Ok(true)
    }

    /// Forgets a topic that Telegram no longer knows about.
    pub async fn invalidate(&self, conversation_id: i64) -> Result<()> {
        self.store
            .delete_thread_mapping(conversation_id)
            .await
            .with_context(|| format!("failed to drop topic mapping of conversation {conversation_id}"))
    }

    pub async fn conversation_for_thread(&self, thread_id: i64) -> Result<Option<ThreadMapping>> {
        Ok(self.store.get_by_thread(thread_id).await?)
    }

    async fn lookup(&self, conversation_id: i64) -> Result<Option<(i64, ThreadMapping)>> {
        let Some(forum_chat_id) = self.settings.forum_chat_id else {
            return Ok(None);
        };
        let mapping = self.store.get_by_conversation(conversation_id).await?;
        Ok(mapping.map(|mapping| (forum_chat_id, mapping)))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::testing::{FakeMessenger, MessengerCall, TopicState, settings};

    struct UnwritableStore(Arc<dyn ThreadStore>);

    #[async_trait]
    impl ThreadStore for UnwritableStore {
        async fn get_by_conversation(
            &self,
            conversation_id: i64,
        ) -> Result<Option<ThreadMapping>, DatabaseError> {
            self.0.get_by_conversation(conversation_id).await
        }

        async fn get_by_thread(&self, thread_id: i64) -> Result<Option<ThreadMapping>, DatabaseError> {
            self.0.get_by_thread(thread_id).await
        }

        async fn upsert_thread_mapping(&self, _mapping: &ThreadMapping) -> Result<(), DatabaseError> {
            Err(DatabaseError::Query("disk I/O error".to_string()))
        }

        async fn delete_thread_mapping(&self, conversation_id: i64) -> Result<(), DatabaseError> {
            self.0.delete_thread_mapping(conversation_id).await
        }
    }

    const FORUM: i64 = -100500;

    async fn manager(thread_mode: bool) -> (tempfile::TempDir, Arc<FakeMessenger>, ThreadManager) {
        let (dir, db) = crate::db::manager::tests::migrated_database().await;
        let messenger = FakeMessenger::new();
        let manager = ThreadManager::new(settings(thread_mode), messenger.clone(), db.thread_store());
        (dir, messenger, manager)
    }

    #[tokio::test]
    async fn creates_topic_once_and_posts_welcome() {
        let (_dir, messenger, manager) = manager(true).await;

        let first = manager.ensure_thread(42, 7, "Alice").await.unwrap();
        let second = manager.ensure_thread(42, 7, "Alice").await.unwrap();
        assert_eq!(first, second);

        let created: Vec<_> = messenger
            .calls()
            .into_iter()
            .filter(|call| matches!(call, MessengerCall::CreateTopic { .. }))
            .collect();
        assert_eq!(
            created,
            vec![MessengerCall::CreateTopic {
                chat_id: FORUM,
                name: "🗨️ Alice #42".to_string(),
                thread_id: first,
            }]
        );

        let texts = messenger.texts();
        assert_eq!(texts.len(), 1);
        assert_eq!(texts[0].0, ChatTarget::thread(FORUM, first));
        assert_eq!(texts[0].1, WELCOME_TEXT);

        let mapping = manager.conversation_for_thread(first).await.unwrap().unwrap();
        assert_eq!(mapping.conversation_id, 42);
        assert_eq!(mapping.account_id, Some(7));
    }

    #[tokio::test]
    async fn concurrent_first_messages_share_one_topic() {
        let (_dir, messenger, manager) = manager(true).await;
        let manager = Arc::new(manager);

        let handles: Vec<_> = (0..5)
            .map(|_| {
                let manager = manager.clone();
                tokio::spawn(async move { manager.ensure_thread(42, 7, "Alice").await })
            })
            .collect();
        let mut threads = Vec::new();
        for handle in handles {
            threads.push(handle.await.unwrap().unwrap());
        }
        threads.dedup();
        assert_eq!(threads.len(), 1);

        let created = messenger
            .calls()
            .into_iter()
            .filter(|call| matches!(call, MessengerCall::CreateTopic { .. }))
            .count();
        assert_eq!(created, 1);
        assert!(manager.create_locks.lock().await.is_empty());
    }

    #[tokio::test]
    async fn topic_creation_does_not_block_other_conversations() {
        let (_dir, messenger, manager) = manager(true).await;
        let manager = Arc::new(manager);
        let existing = manager.ensure_thread(2, 7, "Bob").await.unwrap();

        let gate = messenger.hold_topic_creation();
        let creating = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.ensure_thread(1, 7, "Alice").await })
        };
        tokio::task::yield_now().await;

        let looked_up = tokio::time::timeout(Duration::from_secs(1), manager.ensure_thread(2, 7, "Bob"))
            .await
            .expect("lookup waited on another conversation's topic");
        assert_eq!(looked_up, Some(existing));

        gate.notify_one();
        let created = creating.await.unwrap().unwrap();
        assert_ne!(created, existing);
        assert_eq!(messenger.topic_attempts(), 2);
    }

    #[tokio::test]
    async fn unsaved_topic_is_not_used() {
        let (_dir, db) = crate::db::manager::tests::migrated_database().await;
        let messenger = FakeMessenger::new();
        let store = Arc::new(UnwritableStore(db.thread_store()));
        let manager = ThreadManager::new(settings(true), messenger.clone(), store);

        assert_eq!(manager.ensure_thread(42, 7, "Alice").await, None);
        assert_eq!(messenger.topic_attempts(), 1);
        assert!(messenger.texts().is_empty());
    }

    #[tokio::test]
    async fn admin_mode_never_creates_topics() {
        let (_dir, messenger, manager) = manager(false).await;
        assert_eq!(manager.ensure_thread(42, 7, "Alice").await, None);
        assert!(!manager.close(42).await.unwrap());
        assert!(messenger.calls().is_empty());
    }

    #[tokio::test]
    async fn creation_failure_yields_none() {
        let (_dir, messenger, manager) = manager(true).await;
        messenger.set_fail_topic_creation(true);
        assert_eq!(manager.ensure_thread(42, 7, "Alice").await, None);
        assert!(messenger.texts().is_empty());
    }

    #[tokio::test]
    async fn close_and_reopen_are_idempotent() {
        let (_dir, messenger, manager) = manager(true).await;
        let thread_id = manager.ensure_thread(42, 7, "Alice").await.unwrap();

        assert!(manager.reopen(42).await.unwrap());
        assert_eq!(messenger.topic_state(thread_id), Some(TopicState::Open));

        assert!(manager.close(42).await.unwrap());
        assert!(manager.close(42).await.unwrap());
        assert_eq!(messenger.topic_state(thread_id), Some(TopicState::Closed));

        assert!(manager.reopen(42).await.unwrap());
        assert_eq!(messenger.topic_state(thread_id), Some(TopicState::Open));
    }

    #[tokio::test]
    async fn deleted_topic_is_forgotten_on_close() {
        let (_dir, messenger, manager) = manager(true).await;
        let thread_id = manager.ensure_thread(42, 7, "Alice").await.unwrap();
        messenger.delete_topic(thread_id);

        assert!(!manager.close(42).await.unwrap());
        assert!(manager.conversation_for_thread(thread_id).await.unwrap().is_none());

        let replacement = manager.ensure_thread(42, 7, "Alice").await.unwrap();
        assert_ne!(replacement, thread_id);
    }

    #[tokio::test]
    async fn close_and_forget_drops_mapping() {
        let (_dir, messenger, manager) = manager(true).await;
        let thread_id = manager.ensure_thread(42, 7, "Alice").await.unwrap();

        assert!(manager.close_and_forget(42).await.unwrap());
        assert_eq!(messenger.topic_state(thread_id), Some(TopicState::Closed));
        assert!(manager.conversation_for_thread(thread_id).await.unwrap().is_none());
        assert!(!manager.close_and_forget(42).await.unwrap());
    }
}
