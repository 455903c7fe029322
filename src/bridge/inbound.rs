use anyhow::{Context, Result, anyhow};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::chatwoot::{MessageCreated, StatusChanged, WebhookEvent};
use crate::media::MappingOrigin;
use crate::telegram::{ChatTarget, InlineKeyboardMarkup, SendOptions};

use super::BridgeCore;
use super::logic::{UNKNOWN_SENDER, format_inbound_text};

impl BridgeCore {
    /// Entry point for one Chatwoot webhook body. Never fails; every
    /// problem is logged and the event dropped.
    pub async fn handle_webhook(&self, payload: Value) {
        match WebhookEvent::parse(&payload) {
            Ok(WebhookEvent::MessageCreated(event)) => {
                if let Err(err) = self.relay_inbound(&event).await {
                    error!(
                        "failed to relay message for conversation {}: {:#}",
                        event.conversation_id, err
                    );
                }
            }
            Ok(WebhookEvent::StatusChanged(event)) => self.handle_status_changed(&event).await,
            Ok(WebhookEvent::Ignored(reason)) => debug!("ignoring webhook: {}", reason),
            Err(err) => warn!("dropping malformed webhook: {}", err),
        }
    }

    /// Posts a Chatwoot message into Telegram, followed by its attachments,
    /// and returns the id of the main Telegram message.
    pub async fn relay_inbound(&self, event: &MessageCreated) -> Result<i64> {
        let sender_name = event.sender.name.as_deref().unwrap_or(UNKNOWN_SENDER);
        let text = format_inbound_text(event);
        let origin = MappingOrigin {
            conversation_id: event.conversation_id,
            account_id: Some(event.account_id),
            chatwoot_message_id: event.message_id,
        };

        let (target, keyboard) = self
            .destination(event.conversation_id, event.account_id, sender_name)
            .await;
        let options = SendOptions::html().with_markup(keyboard);

        let message_id = match self.messenger.send_message(target, &text, &options).await {
            Ok(message_id) => message_id,
            Err(err) if err.is_thread_deleted() && target.thread_id.is_some() => {
                warn!(
                    "topic {:?} of conversation {} is gone, recreating it",
                    target.thread_id, event.conversation_id
                );
                return self
                    .resend_to_new_thread(event, sender_name, &text, &options, origin)
                    .await;
            }
            Err(err) => return Err(err).context("failed to send message to telegram"),
        };

        self.record_mapping(origin.mapping(message_id)).await;
        debug!(
            "relayed chatwoot message {:?} of conversation {} as telegram message {}",
            event.message_id, event.conversation_id, message_id
        );

        if !event.attachments.is_empty() {
            let outcomes = self
                .attachments
                .relay_all(target, &event.attachments, origin)
                .await;
            debug!(
                "relayed {} attachment(s) for conversation {}: {:?}",
                event.attachments.len(),
                event.conversation_id,
                outcomes
            );
        }

        Ok(message_id)
    }

    // Attachments are not replayed after a recovery.
    async fn resend_to_new_thread(
        &self,
        event: &MessageCreated,
        sender_name: &str,
        text: &str,
        options: &SendOptions,
        origin: MappingOrigin,
    ) -> Result<i64> {
        self.threads.invalidate(event.conversation_id).await?;

        let forum_chat_id = self
            .settings
            .forum_chat_id
            .ok_or_else(|| anyhow!("thread mode is not configured"))?;
        let thread_id = self
            .threads
            .ensure_thread(event.conversation_id, event.account_id, sender_name)
            .await
            .ok_or_else(|| anyhow!("could not recreate topic"))?;

        let message_id = self
            .messenger
            .send_message(ChatTarget::thread(forum_chat_id, thread_id), text, options)
            .await
            .context("failed to resend message to recreated topic")?;
        self.record_mapping(origin.mapping(message_id)).await;
        info!(
            "resent message for conversation {} into new topic {}",
            event.conversation_id, thread_id
        );
        Ok(message_id)
    }

    async fn destination(
        &self,
        conversation_id: i64,
        account_id: i64,
        sender_name: &str,
    ) -> (ChatTarget, InlineKeyboardMarkup) {
        if let Some(forum_chat_id) = self.settings.forum_chat_id
            && let Some(thread_id) = self
                .threads
                .ensure_thread(conversation_id, account_id, sender_name)
                .await
        {
            return (
                ChatTarget::thread(forum_chat_id, thread_id),
                self.settings.thread_keyboard(conversation_id, account_id),
            );
        }

        (
            ChatTarget::chat(self.settings.admin_chat_id),
            self.settings.admin_keyboard(conversation_id, account_id),
        )
    }

    pub async fn handle_status_changed(&self, event: &StatusChanged) {
        if !event.is_resolved() || !self.settings.thread_mode() {
            debug!(
                "status of conversation {} is now {:?}",
                event.conversation_id, event.status
            );
            return;
        }

        match self.threads.close(event.conversation_id).await {
            Ok(true) => info!(
                "conversation {} resolved in chatwoot, topic closed",
                event.conversation_id
            ),
            Ok(false) => debug!(
                "conversation {} resolved but has no topic",
                event.conversation_id
            ),
            Err(err) => error!(
                "failed to close topic of conversation {}: {:#}",
                event.conversation_id, err
            ),
        }
    }
}
