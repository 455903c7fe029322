//! In-memory stand-ins for the Telegram and Chatwoot clients, plus a
//! fully wired bridge for scenario tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::Notify;

use crate::bridge::{BridgeCore, BridgeSettings};
use crate::chatwoot::{ChatwootError, ConversationStatus, HelpdeskApi};
use crate::config::{AttachmentConfig, ChatwootConfig};
use crate::db::DatabaseManager;
use crate::db::manager::tests::migrated_database;
use crate::media::SendKind;
use crate::telegram::{
    CallbackQuery, Chat, ChatTarget, EditOutcome, ForumTopic, InlineKeyboardMarkup, InputMedia,
    Message, MessengerApi, SendOptions, TelegramError, TopicTransition, User,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SentItem {
    Text {
        target: ChatTarget,
        text: String,
        options: SendOptions,
        message_id: i64,
    },
    Media {
        target: ChatTarget,
        kind: SendKind,
        media: InputMedia,
        message_id: i64,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessengerCall {
    CreateTopic { chat_id: i64, name: String, thread_id: i64 },
    CloseTopic { chat_id: i64, thread_id: i64 },
    ReopenTopic { chat_id: i64, thread_id: i64 },
    EditMarkup { chat_id: i64, message_id: i64, markup: Option<InlineKeyboardMarkup> },
    EditText { chat_id: i64, message_id: i64, text: String, markup: Option<InlineKeyboardMarkup> },
    AnswerCallback { id: String, text: Option<String> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicState {
    Open,
    Closed,
}

#[derive(Default)]
struct MessengerState {
    next_message_id: i64,
    next_thread_id: i64,
    sent: Vec<SentItem>,
    calls: Vec<MessengerCall>,
    topics: HashMap<i64, TopicState>,
    deleted_topics: HashSet<i64>,
    last_edit: HashMap<i64, (Option<String>, Option<InlineKeyboardMarkup>)>,
    fail_url_media: bool,
    fail_uploads: bool,
    fail_texts: bool,
    fail_topic_creation: bool,
    topic_attempts: usize,
    topic_gate: Option<Arc<Notify>>,
}

pub struct FakeMessenger {
    state: Mutex<MessengerState>,
}

impl FakeMessenger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(MessengerState {
                next_message_id: 100,
                next_thread_id: 900,
                ..MessengerState::default()
            }),
        })
    }

    pub fn sent(&self) -> Vec<SentItem> {
        self.state.lock().unwrap().sent.clone()
    }

    pub fn texts(&self) -> Vec<(ChatTarget, String)> {
        self.sent()
            .into_iter()
            .filter_map(|item| match item {
                SentItem::Text { target, text, .. } => Some((target, text)),
                SentItem::Media { .. } => None,
            })
            .collect()
    }

    pub fn calls(&self) -> Vec<MessengerCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn answers(&self) -> Vec<Option<String>> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                MessengerCall::AnswerCallback { text, .. } => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn topic_state(&self, thread_id: i64) -> Option<TopicState> {
        self.state.lock().unwrap().topics.get(&thread_id).copied()
    }

    pub fn delete_topic(&self, thread_id: i64) {
        let mut state = self.state.lock().unwrap();
        state.topics.remove(&thread_id);
        state.deleted_topics.insert(thread_id);
    }

    pub fn set_fail_url_media(&self, fail: bool) {
        self.state.lock().unwrap().fail_url_media = fail;
    }

    pub fn set_fail_uploads(&self, fail: bool) {
        self.state.lock().unwrap().fail_uploads = fail;
    }

    pub fn set_fail_texts(&self, fail: bool) {
        self.state.lock().unwrap().fail_texts = fail;
    }

    pub fn set_fail_topic_creation(&self, fail: bool) {
        self.state.lock().unwrap().fail_topic_creation = fail;
    }

    /// Every `createForumTopic` call, failed ones included.
    pub fn topic_attempts(&self) -> usize {
        self.state.lock().unwrap().topic_attempts
    }

    /// Holds topic creation until the returned gate is notified.
    pub fn hold_topic_creation(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.state.lock().unwrap().topic_gate = Some(gate.clone());
        gate
    }
}

fn api_error(description: &str) -> TelegramError {
    TelegramError::from_api(400, format!("Bad Request: {description}"))
}

impl MessengerState {
    fn check_target(&self, target: ChatTarget) -> Result<(), TelegramError> {
        match target.thread_id {
            Some(thread_id) if self.deleted_topics.contains(&thread_id) => {
                Err(api_error("message thread not found"))
            }
            _ => Ok(()),
        }
    }

    fn next_id(&mut self) -> i64 {
        self.next_message_id += 1;
        self.next_message_id
    }

    fn transition(
        &mut self,
        thread_id: i64,
        wanted: TopicState,
    ) -> Result<TopicTransition, TelegramError> {
        if self.deleted_topics.contains(&thread_id) {
            return Err(api_error("TOPIC_DELETED"));
        }
        let current = self.topics.insert(thread_id, wanted);
        if current == Some(wanted) || (current.is_none() && wanted == TopicState::Open) {
            Err(api_error("TOPIC_NOT_MODIFIED"))
        } else {
            Ok(TopicTransition::Changed)
        }
    }

    fn edit(
        &mut self,
        message_id: i64,
        text: Option<String>,
        markup: Option<InlineKeyboardMarkup>,
    ) -> Result<EditOutcome, TelegramError> {
        let edit = (text, markup);
        if self.last_edit.get(&message_id) == Some(&edit) {
            return Err(api_error("message is not modified"));
        }
        self.last_edit.insert(message_id, edit);
        Ok(EditOutcome::Edited)
    }
}

#[async_trait]
impl MessengerApi for FakeMessenger {
    async fn send_message(
        &self,
        target: ChatTarget,
        text: &str,
        options: &SendOptions,
    ) -> Result<i64, TelegramError> {
        let mut state = self.state.lock().unwrap();
        state.check_target(target)?;
        if state.fail_texts {
            return Err(api_error("chat not found"));
        }
        let message_id = state.next_id();
        state.sent.push(SentItem::Text {
            target,
            text: text.to_string(),
            options: options.clone(),
            message_id,
        });
        Ok(message_id)
    }

    async fn send_media(
        &self,
        target: ChatTarget,
        kind: SendKind,
        media: InputMedia,
    ) -> Result<i64, TelegramError> {
        let mut state = self.state.lock().unwrap();
        state.check_target(target)?;
        let fails = match &media {
            InputMedia::Url(_) => state.fail_url_media,
            InputMedia::Upload { .. } => state.fail_uploads,
        };
        if fails {
            return Err(api_error("wrong file identifier/HTTP URL specified"));
        }
        let message_id = state.next_id();
        state.sent.push(SentItem::Media {
            target,
            kind,
            media,
            message_id,
        });
        Ok(message_id)
    }

    async fn create_forum_topic(
        &self,
        chat_id: i64,
        name: &str,
    ) -> Result<ForumTopic, TelegramError> {
        let gate = self.state.lock().unwrap().topic_gate.clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let mut state = self.state.lock().unwrap();
        state.topic_attempts += 1;
        if state.fail_topic_creation {
            return Err(api_error("not enough rights to create a topic"));
        }
        state.next_thread_id += 1;
        let thread_id = state.next_thread_id;
        state.topics.insert(thread_id, TopicState::Open);
        state.calls.push(MessengerCall::CreateTopic {
            chat_id,
            name: name.to_string(),
            thread_id,
        });
        Ok(ForumTopic {
            message_thread_id: thread_id,
            name: name.to_string(),
        })
    }

    async fn close_forum_topic(
        &self,
        chat_id: i64,
        thread_id: i64,
    ) -> Result<TopicTransition, TelegramError> {
        let mut state = self.state.lock().unwrap();
        state
            .calls
            .push(MessengerCall::CloseTopic { chat_id, thread_id });
        match state.transition(thread_id, TopicState::Closed) {
            Err(err) if err.is_topic_not_modified() => Ok(TopicTransition::AlreadyInState),
            other => other,
        }
    }

    async fn reopen_forum_topic(
        &self,
        chat_id: i64,
        thread_id: i64,
    ) -> Result<TopicTransition, TelegramError> {
        let mut state = self.state.lock().unwrap();
        state
            .calls
            .push(MessengerCall::ReopenTopic { chat_id, thread_id });
        match state.transition(thread_id, TopicState::Open) {
            Err(err) if err.is_topic_not_modified() => Ok(TopicTransition::AlreadyInState),
            other => other,
        }
    }

    async fn edit_reply_markup(
        &self,
        chat_id: i64,
        message_id: i64,
        markup: Option<&InlineKeyboardMarkup>,
    ) -> Result<EditOutcome, TelegramError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(MessengerCall::EditMarkup {
            chat_id,
            message_id,
            markup: markup.cloned(),
        });
        match state.edit(message_id, None, markup.cloned()) {
            Err(err) if err.is_message_not_modified() => Ok(EditOutcome::Unchanged),
            other => other,
        }
    }

    async fn edit_message_text(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
        markup: Option<&InlineKeyboardMarkup>,
    ) -> Result<EditOutcome, TelegramError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(MessengerCall::EditText {
            chat_id,
            message_id,
            text: text.to_string(),
            markup: markup.cloned(),
        });
        match state.edit(message_id, Some(text.to_string()), markup.cloned()) {
            Err(err) if err.is_message_not_modified() => Ok(EditOutcome::Unchanged),
            other => other,
        }
    }

    async fn answer_callback_query(
        &self,
        callback_query_id: &str,
        text: Option<&str>,
    ) -> Result<(), TelegramError> {
        self.state
            .lock()
            .unwrap()
            .calls
            .push(MessengerCall::AnswerCallback {
                id: callback_query_id.to_string(),
                text: text.map(ToOwned::to_owned),
            });
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HelpdeskCall {
    Message {
        account_id: i64,
        conversation_id: i64,
        content: String,
    },
    Status {
        account_id: i64,
        conversation_id: i64,
        status: ConversationStatus,
    },
}

#[derive(Default)]
pub struct FakeHelpdesk {
    calls: Mutex<Vec<HelpdeskCall>>,
    fail: Mutex<bool>,
}

impl FakeHelpdesk {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<HelpdeskCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn set_fail(&self, fail: bool) {
        *self.fail.lock().unwrap() = fail;
    }

    fn check(&self) -> Result<(), ChatwootError> {
        if *self.fail.lock().unwrap() {
            Err(ChatwootError::Status {
                status: 500,
                body: "internal error".to_string(),
            })
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl HelpdeskApi for FakeHelpdesk {
    async fn create_message(
        &self,
        account_id: i64,
        conversation_id: i64,
        content: &str,
    ) -> Result<Option<i64>, ChatwootError> {
        self.check()?;
        let mut calls = self.calls.lock().unwrap();
        calls.push(HelpdeskCall::Message {
            account_id,
            conversation_id,
            content: content.to_string(),
        });
        Ok(Some(5000 + calls.len() as i64))
    }

    async fn toggle_status(
        &self,
        account_id: i64,
        conversation_id: i64,
        status: ConversationStatus,
    ) -> Result<(), ChatwootError> {
        self.check()?;
        self.calls.lock().unwrap().push(HelpdeskCall::Status {
            account_id,
            conversation_id,
            status,
        });
        Ok(())
    }
}

pub const ADMIN: i64 = 111;
pub const FORUM: i64 = -100500;
pub const ACCOUNT: i64 = 7;

pub fn settings(thread_mode: bool) -> BridgeSettings {
    BridgeSettings {
        admin_chat_id: ADMIN,
        forum_chat_id: thread_mode.then_some(FORUM),
        chatwoot: ChatwootConfig {
            base_url: "https://chatwoot.example".to_string(),
            access_token: "cw-token".to_string(),
            account_id: ACCOUNT,
        },
    }
}

/// A bridge wired to the fakes and a migrated temporary database.
pub struct Harness {
    pub bridge: BridgeCore,
    pub messenger: Arc<FakeMessenger>,
    pub helpdesk: Arc<FakeHelpdesk>,
    pub db: DatabaseManager,
    _dir: TempDir,
}

pub async fn harness(thread_mode: bool) -> Harness {
    let (dir, db) = migrated_database().await;
    let messenger = FakeMessenger::new();
    let helpdesk = FakeHelpdesk::new();
    let bridge = BridgeCore::new(
        settings(thread_mode),
        &AttachmentConfig::default(),
        messenger.clone(),
        helpdesk.clone(),
        db.message_store(),
        db.thread_store(),
    )
    .unwrap();

    Harness {
        bridge,
        messenger,
        helpdesk,
        db,
        _dir: dir,
    }
}

fn user(id: i64) -> User {
    User {
        id,
        is_bot: false,
        first_name: format!("user{id}"),
        username: None,
    }
}

fn chat(id: i64) -> Chat {
    Chat {
        id,
        kind: if id < 0 { "supergroup" } else { "private" }.to_string(),
        is_forum: (id < 0).then_some(true),
    }
}

fn bare_message(message_id: i64, chat_id: i64, text: Option<&str>) -> Message {
    Message {
        message_id,
        message_thread_id: None,
        from: None,
        chat: chat(chat_id),
        text: text.map(ToOwned::to_owned),
        reply_to_message: None,
        is_topic_message: None,
        entities: Vec::new(),
    }
}

pub fn staff_message(
    from: i64,
    chat_id: i64,
    thread_id: Option<i64>,
    text: &str,
    reply_to: Option<i64>,
) -> Message {
    Message {
        message_id: 5000,
        message_thread_id: thread_id,
        from: Some(user(from)),
        reply_to_message: reply_to.map(|id| Box::new(bare_message(id, chat_id, None))),
        is_topic_message: thread_id.map(|_| true),
        ..bare_message(5000, chat_id, Some(text))
    }
}

pub fn callback(
    from: i64,
    chat_id: i64,
    message_id: i64,
    text: Option<&str>,
    data: &str,
) -> CallbackQuery {
    CallbackQuery {
        id: format!("cb-{message_id}"),
        from: user(from),
        message: Some(bare_message(message_id, chat_id, text)),
        data: Some(data.to_string()),
    }
}
