use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::debug;

use crate::config::ChatwootConfig;

pub mod webhook;

pub use self::webhook::{
    Attachment, MalformedEvent, MessageCreated, MessageDirection, Sender, StatusChanged,
    WebhookEvent,
};

const REQUEST_TIMEOUT_SECONDS: u64 = 30;

#[derive(Debug, Error)]
pub enum ChatwootError {
    #[error("chatwoot request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("chatwoot returned {status}: {body}")]
    Status { status: u16, body: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationStatus {
    Open,
    Resolved,
}

impl ConversationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationStatus::Open => "open",
            ConversationStatus::Resolved => "resolved",
        }
    }
}

#[async_trait]
pub trait HelpdeskApi: Send + Sync {
    /// Posts a public agent message. Returns the new Chatwoot message id when
    /// the response carries one.
    async fn create_message(
        &self,
        account_id: i64,
        conversation_id: i64,
        content: &str,
    ) -> Result<Option<i64>, ChatwootError>;

    async fn toggle_status(
        &self,
        account_id: i64,
        conversation_id: i64,
        status: ConversationStatus,
    ) -> Result<(), ChatwootError>;
}

pub struct ChatwootClient {
    http: reqwest::Client,
    base_url: String,
    access_token: SecretString,
}

impl ChatwootClient {
    pub fn new(config: &ChatwootConfig) -> Result<Self, ChatwootError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("chatwoot-bridge-telegram/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECONDS))
            .build()?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            access_token: SecretString::from(config.access_token.clone()),
        })
    }

    fn conversation_url(&self, account_id: i64, conversation_id: i64, action: &str) -> String {
        format!(
            "{}/api/v1/accounts/{}/conversations/{}/{}",
            self.base_url, account_id, conversation_id, action
        )
    }

    async fn post(&self, url: String, body: Value) -> Result<Value, ChatwootError> {
        debug!("chatwoot request url={}", url);
        let response = self
            .http
            .post(url)
            .header("api_access_token", self.access_token.expose_secret())
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChatwootError::Status {
                status: status.as_u16(),
                body,
            });
        }

        // some deployments answer with an empty body
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }
}

#[async_trait]
impl HelpdeskApi for ChatwootClient {
    async fn create_message(
        &self,
        account_id: i64,
        conversation_id: i64,
        content: &str,
    ) -> Result<Option<i64>, ChatwootError> {
        let url = self.conversation_url(account_id, conversation_id, "messages");
        let created = self
            .post(
                url,
                json!({
                    "content": content,
                    "message_type": "outgoing",
                    "private": false,
                }),
            )
            .await?;
        Ok(created.get("id").and_then(Value::as_i64))
    }

    async fn toggle_status(
        &self,
        account_id: i64,
        conversation_id: i64,
        status: ConversationStatus,
    ) -> Result<(), ChatwootError> {
        let url = self.conversation_url(account_id, conversation_id, "toggle_status");
        self.post(url, json!({ "status": status.as_str() })).await?;
        Ok(())
    }
}
