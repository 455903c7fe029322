use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::debug;

use crate::config::TelegramConfig;
use crate::media::SendKind;

pub mod poller;
pub mod types;

pub use self::poller::UpdatePoller;
pub use self::types::{
    CallbackQuery, Chat, ChatTarget, EditOutcome, ForumTopic, InlineKeyboardButton,
    InlineKeyboardMarkup, InputMedia, Message, MessageEntity, ParseMode, SendOptions,
    TopicTransition, Update, User,
};
use self::types::ApiResponse;

const REQUEST_TIMEOUT_SECONDS: u64 = 60;
const UPLOAD_TIMEOUT_SECONDS: u64 = 300;
const POLL_TIMEOUT_GRACE_SECONDS: u64 = 15;

#[derive(Debug, Error)]
pub enum TelegramError {
    #[error("telegram request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("telegram topic no longer exists: {0}")]
    ThreadDeleted(String),

    #[error("telegram api error {code}: {description}")]
    Api { code: i64, description: String },

    #[error("unexpected telegram response: {0}")]
    InvalidResponse(String),
}

impl TelegramError {
    pub fn from_api(code: i64, description: String) -> Self {
        let lowered = description.to_ascii_lowercase();
        if description.contains("TOPIC_DELETED") || lowered.contains("message thread not found")
        {
            TelegramError::ThreadDeleted(description)
        } else {
            TelegramError::Api { code, description }
        }
    }

    pub fn is_thread_deleted(&self) -> bool {
        matches!(self, TelegramError::ThreadDeleted(_))
    }

    pub fn is_message_not_modified(&self) -> bool {
        matches!(self, TelegramError::Api { description, .. }
            if description.contains("message is not modified"))
    }

    pub fn is_topic_not_modified(&self) -> bool {
        matches!(self, TelegramError::Api { description, .. }
            if description.contains("TOPIC_NOT_MODIFIED"))
    }
}

/// The subset of the Bot API the relays depend on.
#[async_trait]
pub trait MessengerApi: Send + Sync {
    async fn send_message(
        &self,
        target: ChatTarget,
        text: &str,
        options: &SendOptions,
    ) -> Result<i64, TelegramError>;

    async fn send_media(
        &self,
        target: ChatTarget,
        kind: SendKind,
        media: InputMedia,
    ) -> Result<i64, TelegramError>;

    async fn create_forum_topic(&self, chat_id: i64, name: &str)
    -> Result<ForumTopic, TelegramError>;

    async fn close_forum_topic(
        &self,
        chat_id: i64,
        thread_id: i64,
    ) -> Result<TopicTransition, TelegramError>;

    async fn reopen_forum_topic(
        &self,
        chat_id: i64,
        thread_id: i64,
    ) -> Result<TopicTransition, TelegramError>;

    async fn edit_reply_markup(
        &self,
        chat_id: i64,
        message_id: i64,
        markup: Option<&InlineKeyboardMarkup>,
    ) -> Result<EditOutcome, TelegramError>;

    async fn edit_message_text(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
        markup: Option<&InlineKeyboardMarkup>,
    ) -> Result<EditOutcome, TelegramError>;

    async fn answer_callback_query(
        &self,
        callback_query_id: &str,
        text: Option<&str>,
    ) -> Result<(), TelegramError>;
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    message_id: i64,
}

pub struct TelegramClient {
    http: reqwest::Client,
    api_url: String,
    token: SecretString,
}

impl TelegramClient {
    pub fn new(config: &TelegramConfig) -> Result<Self, TelegramError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("chatwoot-bridge-telegram/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            http,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            token: SecretString::from(config.bot_token.clone()),
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!(
            "{}/bot{}/{}",
            self.api_url,
            self.token.expose_secret(),
            method
        )
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, body: &Value) -> Result<T, TelegramError> {
        self.call_with_timeout(method, body, Duration::from_secs(REQUEST_TIMEOUT_SECONDS))
            .await
    }

    async fn call_with_timeout<T: DeserializeOwned>(
        &self,
        method: &str,
        body: &Value,
        timeout: Duration,
    ) -> Result<T, TelegramError> {
        debug!("telegram call method={}", method);
        let response = self
            .http
            .post(self.method_url(method))
            .timeout(timeout)
            .json(body)
            .send()
            .await?;
        Self::decode(method, response).await
    }

    async fn decode<T: DeserializeOwned>(
        method: &str,
        response: reqwest::Response,
    ) -> Result<T, TelegramError> {
        let status = response.status();
        let bytes = response.bytes().await?;
        let parsed: ApiResponse<T> = serde_json::from_slice(&bytes).map_err(|e| {
            TelegramError::InvalidResponse(format!("{method} returned {status}: {e}"))
        })?;

        if !parsed.ok {
            return Err(TelegramError::from_api(
                parsed.error_code.unwrap_or(i64::from(status.as_u16())),
                parsed.description.unwrap_or_default(),
            ));
        }

        parsed
            .result
            .ok_or_else(|| TelegramError::InvalidResponse(format!("{method} returned no result")))
    }

    pub async fn get_me(&self) -> Result<User, TelegramError> {
        self.call("getMe", &json!({})).await
    }

    pub async fn get_updates(
        &self,
        offset: Option<i64>,
        timeout_secs: u64,
    ) -> Result<Vec<Update>, TelegramError> {
        let mut body = json!({
            "timeout": timeout_secs,
            "allowed_updates": ["message", "callback_query"],
        });
        if let Some(offset) = offset {
            body["offset"] = json!(offset);
        }
        self.call_with_timeout(
            "getUpdates",
            &body,
            Duration::from_secs(timeout_secs + POLL_TIMEOUT_GRACE_SECONDS),
        )
        .await
    }

    fn edit_result(result: Result<Value, TelegramError>) -> Result<EditOutcome, TelegramError> {
        match result {
            Ok(_) => Ok(EditOutcome::Edited),
            Err(err) if err.is_message_not_modified() => Ok(EditOutcome::Unchanged),
            Err(err) => Err(err),
        }
    }

    fn topic_result(result: Result<bool, TelegramError>) -> Result<TopicTransition, TelegramError> {
        match result {
            Ok(_) => Ok(TopicTransition::Changed),
            Err(err) if err.is_topic_not_modified() => Ok(TopicTransition::AlreadyInState),
            Err(err) => Err(err),
        }
    }
}

fn target_body(target: ChatTarget) -> Value {
    let mut body = json!({ "chat_id": target.chat_id });
    if let Some(thread_id) = target.thread_id {
        body["message_thread_id"] = json!(thread_id);
    }
    body
}

#[async_trait]
impl MessengerApi for TelegramClient {
    async fn send_message(
        &self,
        target: ChatTarget,
        text: &str,
        options: &SendOptions,
    ) -> Result<i64, TelegramError> {
        let mut body = target_body(target);
        body["text"] = json!(text);
        body["link_preview_options"] = json!({ "is_disabled": true });
        if let Some(mode) = options.parse_mode {
            body["parse_mode"] = json!(mode.as_str());
        }
        if let Some(markup) = &options.reply_markup {
            body["reply_markup"] = json!(markup);
        }

        let sent: SentMessage = self.call("sendMessage", &body).await?;
        Ok(sent.message_id)
    }

    async fn send_media(
        &self,
        target: ChatTarget,
        kind: SendKind,
        media: InputMedia,
    ) -> Result<i64, TelegramError> {
        let sent: SentMessage = match media {
            InputMedia::Url(url) => {
                let mut body = target_body(target);
                body[kind.field()] = json!(url);
                self.call(kind.api_method(), &body).await?
            }
            InputMedia::Upload { bytes, file_name } => {
                let mut form = Form::new().text("chat_id", target.chat_id.to_string());
                if let Some(thread_id) = target.thread_id {
                    form = form.text("message_thread_id", thread_id.to_string());
                }
                form = form.part(kind.field(), Part::bytes(bytes).file_name(file_name));

                debug!("telegram upload method={}", kind.api_method());
                let response = self
                    .http
                    .post(self.method_url(kind.api_method()))
                    .timeout(Duration::from_secs(UPLOAD_TIMEOUT_SECONDS))
                    .multipart(form)
                    .send()
                    .await?;
                Self::decode(kind.api_method(), response).await?
            }
        };
        Ok(sent.message_id)
    }

    async fn create_forum_topic(
        &self,
        chat_id: i64,
        name: &str,
    ) -> Result<ForumTopic, TelegramError> {
        self.call(
            "createForumTopic",
            &json!({ "chat_id": chat_id, "name": name }),
        )
        .await
    }

    async fn close_forum_topic(
        &self,
        chat_id: i64,
        thread_id: i64,
    ) -> Result<TopicTransition, TelegramError> {
        Self::topic_result(
            self.call(
                "closeForumTopic",
                &json!({ "chat_id": chat_id, "message_thread_id": thread_id }),
            )
            .await,
        )
    }

    async fn reopen_forum_topic(
        &self,
        chat_id: i64,
        thread_id: i64,
    ) -> Result<TopicTransition, TelegramError> {
        Self::topic_result(
            self.call(
                "reopenForumTopic",
                &json!({ "chat_id": chat_id, "message_thread_id": thread_id }),
            )
            .await,
        )
    }

    async fn edit_reply_markup(
        &self,
        chat_id: i64,
        message_id: i64,
        markup: Option<&InlineKeyboardMarkup>,
    ) -> Result<EditOutcome, TelegramError> {
        let empty = InlineKeyboardMarkup::default();
        let body = json!({
            "chat_id": chat_id,
            "message_id": message_id,
            "reply_markup": markup.unwrap_or(&empty),
        });
        Self::edit_result(self.call("editMessageReplyMarkup", &body).await)
    }

    async fn edit_message_text(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
        markup: Option<&InlineKeyboardMarkup>,
    ) -> Result<EditOutcome, TelegramError> {
        let mut body = json!({
            "chat_id": chat_id,
            "message_id": message_id,
            "text": text,
            "parse_mode": ParseMode::Html.as_str(),
            "link_preview_options": { "is_disabled": true },
        });
        if let Some(markup) = markup {
            body["reply_markup"] = json!(markup);
        }
        Self::edit_result(self.call("editMessageText", &body).await)
    }

    async fn answer_callback_query(
        &self,
        callback_query_id: &str,
        text: Option<&str>,
    ) -> Result<(), TelegramError> {
        let mut body = json!({ "callback_query_id": callback_query_id });
        if let Some(text) = text {
            body["text"] = json!(text);
        }
        let _: bool = self.call("answerCallbackQuery", &body).await?;
        Ok(())
    }
}
