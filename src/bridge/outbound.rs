use anyhow::Result;
use tracing::{debug, error, info, warn};

use crate::chatwoot::ConversationStatus;
use crate::telegram::{
    CallbackQuery, EditOutcome, InlineKeyboardMarkup, Message, SendOptions, Update,
};

use super::BridgeCore;
use super::action::ActionToken;
use super::logic::{
    ANSWER_CLOSED, ANSWER_EXPIRED, ANSWER_FAILED, ANSWER_REOPENED, ANSWER_RESOLVED,
    MAPPING_NOT_FOUND, REPLY_REQUIRED, SEND_FAILED, STATUS_CLOSED, STATUS_REOPENED,
    STATUS_RESOLVED, entities_to_html, resolved_notice, with_status_line,
};

/// Where a staff message should go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReplyRoute {
    Conversation {
        conversation_id: i64,
        account_id: Option<i64>,
    },
    MissingReply,
    UnknownMapping,
}

impl BridgeCore {
    pub async fn handle_update(&self, update: Update) {
        if let Some(message) = update.message {
            self.handle_staff_message(&message).await;
        } else if let Some(query) = update.callback_query {
            self.handle_callback(&query).await;
        }
    }

    fn is_authorized(&self, user_id: i64, chat_id: Option<i64>) -> bool {
        user_id == self.settings.admin_chat_id
            || (chat_id.is_some() && chat_id == self.settings.forum_chat_id)
    }

    /// Relays a staff text message into its Chatwoot conversation.
    pub async fn handle_staff_message(&self, message: &Message) {
        let Some(text) = message.text.as_deref().filter(|t| !t.trim().is_empty()) else {
            return;
        };
        let Some(from) = message.from.as_ref() else {
            return;
        };
        if from.is_bot || !self.is_authorized(from.id, Some(message.chat.id)) {
            debug!(
                "ignoring message from {} in chat {}",
                from.id, message.chat.id
            );
            return;
        }

        let route = match self.route_reply(message).await {
            Ok(route) => route,
            Err(err) => {
                error!("failed to look up reply target: {:#}", err);
                self.reply(message, SEND_FAILED).await;
                return;
            }
        };

        let (conversation_id, account_id) = match route {
            ReplyRoute::Conversation {
                conversation_id,
                account_id,
            } => (conversation_id, self.settings.account_or_default(account_id)),
            ReplyRoute::MissingReply => return self.reply(message, REPLY_REQUIRED).await,
            ReplyRoute::UnknownMapping => return self.reply(message, MAPPING_NOT_FOUND).await,
        };

        match self
            .helpdesk
            .create_message(account_id, conversation_id, text)
            .await
        {
            Ok(chatwoot_id) => debug!(
                "posted telegram message {} to conversation {} as {:?}",
                message.message_id, conversation_id, chatwoot_id
            ),
            Err(err) => {
                error!(
                    "failed to post to conversation {}: {}",
                    conversation_id, err
                );
                self.reply(message, SEND_FAILED).await;
            }
        }
    }

    // The topic a message was written in wins over the message it replies to.
    async fn route_reply(&self, message: &Message) -> Result<ReplyRoute> {
        if self.settings.forum_chat_id == Some(message.chat.id)
            && let Some(thread_id) = message.message_thread_id
            && let Some(mapping) = self.threads.conversation_for_thread(thread_id).await?
        {
            return Ok(ReplyRoute::Conversation {
                conversation_id: mapping.conversation_id,
                account_id: mapping.account_id,
            });
        }

        let Some(replied) = message.reply_to_message.as_deref() else {
            return Ok(ReplyRoute::MissingReply);
        };
        Ok(
            match self.messages.get_message_mapping(replied.message_id).await? {
                Some(mapping) => ReplyRoute::Conversation {
                    conversation_id: mapping.conversation_id,
                    account_id: mapping.account_id,
                },
                None => ReplyRoute::UnknownMapping,
            },
        )
    }

    async fn reply(&self, message: &Message, text: &str) {
        if let Err(err) = self
            .messenger
            .send_message(message.reply_target(), text, &SendOptions::default())
            .await
        {
            warn!("failed to reply in chat {}: {}", message.chat.id, err);
        }
    }

    /// Executes an inline keyboard action. The query is always answered.
    pub async fn handle_callback(&self, query: &CallbackQuery) {
        let chat_id = query.message.as_ref().map(|m| m.chat.id);
        if !self.is_authorized(query.from.id, chat_id) {
            debug!("ignoring callback from {}", query.from.id);
            return;
        }

        let token = query
            .data
            .as_deref()
            .and_then(|data| data.parse::<ActionToken>().ok());
        let answer = match token {
            None => ANSWER_EXPIRED,
            Some(token) => match self.run_action(token, query).await {
                Ok(answer) => answer,
                Err(err) => {
                    error!("action {} failed: {:#}", token, err);
                    ANSWER_FAILED
                }
            },
        };

        if let Err(err) = self
            .messenger
            .answer_callback_query(&query.id, Some(answer))
            .await
        {
            warn!("failed to answer callback {}: {}", query.id, err);
        }
    }

    async fn run_action(&self, token: ActionToken, query: &CallbackQuery) -> Result<&'static str> {
        match token {
            ActionToken::LegacyResolve => self.legacy_resolve(query).await,
            ActionToken::Resolve {
                conversation_id,
                account_id,
            } => self.resolve(query, conversation_id, account_id).await,
            ActionToken::Reopen {
                conversation_id,
                account_id,
            } => self.reopen(query, conversation_id, account_id).await,
            ActionToken::Close {
                conversation_id,
                account_id,
            } => self.close(query, conversation_id, account_id).await,
        }
    }

    async fn legacy_resolve(&self, query: &CallbackQuery) -> Result<&'static str> {
        let Some(message) = query.message.as_ref() else {
            return Ok(ANSWER_EXPIRED);
        };
        let Some(mapping) = self.messages.get_message_mapping(message.message_id).await? else {
            return Ok(ANSWER_EXPIRED);
        };
        self.resolve(query, mapping.conversation_id, mapping.account_id)
            .await
    }

    async fn resolve(
        &self,
        query: &CallbackQuery,
        conversation_id: i64,
        account_id: Option<i64>,
    ) -> Result<&'static str> {
        let account_id = self.settings.account_or_default(account_id);
        self.helpdesk
            .toggle_status(account_id, conversation_id, ConversationStatus::Resolved)
            .await?;
        info!("conversation {} resolved from telegram", conversation_id);

        if let Err(err) = self.threads.close(conversation_id).await {
            warn!(
                "conversation {} resolved but its topic stayed open: {:#}",
                conversation_id, err
            );
        }

        let Some(message) = query.message.as_ref() else {
            return Ok(ANSWER_RESOLVED);
        };
        if self.in_forum(message) {
            let keyboard = self.settings.thread_keyboard(conversation_id, account_id);
            self.update_control(message, STATUS_RESOLVED, &keyboard).await;
        } else {
            self.log_edit(
                message,
                self.messenger
                    .edit_reply_markup(message.chat.id, message.message_id, None)
                    .await,
            );
            if let Err(err) = self
                .messenger
                .send_message(
                    message.reply_target(),
                    &resolved_notice(conversation_id),
                    &SendOptions::default(),
                )
                .await
            {
                warn!("failed to post resolve notice: {}", err);
            }
        }
        Ok(ANSWER_RESOLVED)
    }

    async fn reopen(
        &self,
        query: &CallbackQuery,
        conversation_id: i64,
        account_id: Option<i64>,
    ) -> Result<&'static str> {
        let account_id = self.settings.account_or_default(account_id);
        self.helpdesk
            .toggle_status(account_id, conversation_id, ConversationStatus::Open)
            .await?;
        info!("conversation {} reopened from telegram", conversation_id);

        if let Err(err) = self.threads.reopen(conversation_id).await {
            warn!(
                "conversation {} reopened but its topic stayed closed: {:#}",
                conversation_id, err
            );
        }

        if let Some(message) = query.message.as_ref() {
            if self.in_forum(message) {
                let keyboard = self.settings.thread_keyboard(conversation_id, account_id);
                self.update_control(message, STATUS_REOPENED, &keyboard).await;
            } else {
                let keyboard = self.settings.admin_keyboard(conversation_id, account_id);
                self.log_edit(
                    message,
                    self.messenger
                        .edit_reply_markup(message.chat.id, message.message_id, Some(&keyboard))
                        .await,
                );
            }
        }
        Ok(ANSWER_REOPENED)
    }

    async fn close(
        &self,
        query: &CallbackQuery,
        conversation_id: i64,
        account_id: Option<i64>,
    ) -> Result<&'static str> {
        self.threads.close_and_forget(conversation_id).await?;

        if let Some(message) = query.message.as_ref() {
            let account_id = self.settings.account_or_default(account_id);
            let keyboard = self.settings.link_keyboard(conversation_id, account_id);
            self.update_control(message, STATUS_CLOSED, &keyboard).await;
        }
        Ok(ANSWER_CLOSED)
    }

    fn in_forum(&self, message: &Message) -> bool {
        self.settings.forum_chat_id == Some(message.chat.id)
    }

    async fn update_control(&self, message: &Message, status: &str, keyboard: &InlineKeyboardMarkup) {
        let outcome = match message.text.as_deref() {
            Some(text) => {
                self.messenger
                    .edit_message_text(
                        message.chat.id,
                        message.message_id,
                        &with_status_line(&entities_to_html(text, &message.entities), status),
                        Some(keyboard),
                    )
                    .await
            }
            None => {
                self.messenger
                    .edit_reply_markup(message.chat.id, message.message_id, Some(keyboard))
                    .await
            }
        };
        self.log_edit(message, outcome);
    }

    fn log_edit<E: std::fmt::Display>(&self, message: &Message, outcome: Result<EditOutcome, E>) {
        match outcome {
            Ok(EditOutcome::Edited) => {}
            Ok(EditOutcome::Unchanged) => debug!(
                "control message {} already up to date",
                message.message_id
            ),
            Err(err) => warn!(
                "failed to update control message {}: {}",
                message.message_id, err
            ),
        }
    }
}
