use std::sync::Arc;

use anyhow::Result;
use tracing::warn;

use crate::chatwoot::HelpdeskApi;
use crate::config::{AttachmentConfig, ChatwootConfig, Config};
use crate::db::{MessageMapping, MessageStore, ThreadStore};
use crate::media::AttachmentTransfer;
use crate::telegram::{InlineKeyboardMarkup, MessengerApi};

pub mod action;
pub mod inbound;
pub mod logic;
pub mod outbound;
pub mod threads;

use self::logic::{admin_keyboard, link_keyboard, thread_keyboard};
use self::threads::ThreadManager;

/// Routing settings the bridge needs at runtime, lifted out of [`Config`].
#[derive(Debug, Clone)]
pub struct BridgeSettings {
    pub admin_chat_id: i64,
    pub forum_chat_id: Option<i64>,
    pub chatwoot: ChatwootConfig,
}

impl BridgeSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            admin_chat_id: config.telegram.admin_id,
            forum_chat_id: config.telegram.forum_chat_id.filter(|id| *id != 0),
            chatwoot: config.chatwoot.clone(),
        }
    }

    pub fn thread_mode(&self) -> bool {
        self.forum_chat_id.is_some()
    }

    pub fn mode_name(&self) -> &'static str {
        if self.thread_mode() { "threads" } else { "admin" }
    }

    /// The mapping's account when known, otherwise the configured one.
    pub fn account_or_default(&self, account_id: Option<i64>) -> i64 {
        account_id.unwrap_or(self.chatwoot.account_id)
    }

    pub fn conversation_url(&self, account_id: i64, conversation_id: i64) -> String {
        self.chatwoot.conversation_url(account_id, conversation_id)
    }

    pub(crate) fn thread_keyboard(&self, conversation_id: i64, account_id: i64) -> InlineKeyboardMarkup {
        thread_keyboard(
            conversation_id,
            account_id,
            &self.conversation_url(account_id, conversation_id),
        )
    }

    pub(crate) fn admin_keyboard(&self, conversation_id: i64, account_id: i64) -> InlineKeyboardMarkup {
        admin_keyboard(
            conversation_id,
            account_id,
            &self.conversation_url(account_id, conversation_id),
        )
    }

    pub(crate) fn link_keyboard(&self, conversation_id: i64, account_id: i64) -> InlineKeyboardMarkup {
        link_keyboard(&self.conversation_url(account_id, conversation_id))
    }
}

pub struct BridgeCore {
    settings: BridgeSettings,
    messenger: Arc<dyn MessengerApi>,
    helpdesk: Arc<dyn HelpdeskApi>,
    messages: Arc<dyn MessageStore>,
    threads: ThreadManager,
    attachments: AttachmentTransfer,
}

impl BridgeCore {
    pub fn new(
        settings: BridgeSettings,
        attachment_config: &AttachmentConfig,
        messenger: Arc<dyn MessengerApi>,
        helpdesk: Arc<dyn HelpdeskApi>,
        messages: Arc<dyn MessageStore>,
        thread_store: Arc<dyn ThreadStore>,
    ) -> Result<Self> {
        let attachments = AttachmentTransfer::new(
            attachment_config,
            &settings.chatwoot.access_token,
            messenger.clone(),
            messages.clone(),
        )?;
        let threads = ThreadManager::new(settings.clone(), messenger.clone(), thread_store);

        Ok(Self {
            settings,
            messenger,
            helpdesk,
            messages,
            threads,
            attachments,
        })
    }

    pub fn settings(&self) -> &BridgeSettings {
        &self.settings
    }

    pub fn threads(&self) -> &ThreadManager {
        &self.threads
    }

    // A lost mapping only costs the ability to reply to that one message.
    async fn record_mapping(&self, mapping: MessageMapping) {
        if let Err(err) = self.messages.upsert_message_mapping(&mapping).await {
            warn!(
                "failed to record mapping for telegram message {}: {}",
                mapping.telegram_message_id, err
            );
        }
    }
}
