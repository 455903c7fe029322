use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MalformedEvent {
    #[error("webhook payload is not a JSON object")]
    NotAnObject,

    #[error("webhook payload has no `event` field")]
    MissingEventKind,

    #[error("webhook payload is missing {0}")]
    MissingField(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageDirection {
    /// Written by the customer.
    Incoming,
    /// Written by an agent or an automation.
    Outgoing,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sender {
    pub name: Option<String>,
    pub email: Option<String>,
}

/// A Chatwoot attachment descriptor. Every field is optional; Chatwoot
/// versions disagree on which ones they send.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Attachment {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub file_type: Option<String>,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub file_size: Option<u64>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub data_url: Option<String>,
    #[serde(default)]
    pub file_url: Option<String>,
    #[serde(default)]
    pub download_url: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub thumb_url: Option<String>,
}

impl Attachment {
    pub fn declared_size(&self) -> Option<u64> {
        self.file_size.or(self.size)
    }

    /// Best source for the file, in preference order. Empty strings are
    /// skipped.
    pub fn candidate_url(&self) -> Option<&str> {
        [
            &self.data_url,
            &self.file_url,
            &self.download_url,
            &self.url,
            &self.thumb_url,
        ]
        .into_iter()
        .filter_map(|url| url.as_deref())
        .map(str::trim)
        .find(|url| !url.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageCreated {
    pub message_id: Option<i64>,
    pub direction: MessageDirection,
    pub conversation_id: i64,
    pub account_id: i64,
    pub content: Option<String>,
    pub sender: Sender,
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChanged {
    pub conversation_id: i64,
    pub status: Option<String>,
}

impl StatusChanged {
    pub fn is_resolved(&self) -> bool {
        self.status.as_deref() == Some("resolved")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookEvent {
    MessageCreated(MessageCreated),
    StatusChanged(StatusChanged),
    /// A well-formed event the bridge does not act on.
    Ignored(String),
}

impl WebhookEvent {
    pub fn parse(payload: &Value) -> Result<Self, MalformedEvent> {
        let object = payload.as_object().ok_or(MalformedEvent::NotAnObject)?;
        let kind = object
            .get("event")
            .and_then(Value::as_str)
            .ok_or(MalformedEvent::MissingEventKind)?;

        match kind {
            "message_created" => parse_message_created(payload),
            "conversation_status_changed" => parse_status_changed(payload),
            other => Ok(WebhookEvent::Ignored(format!("event {other}"))),
        }
    }
}

fn parse_message_created(payload: &Value) -> Result<WebhookEvent, MalformedEvent> {
    let direction = match payload.get("message_type").and_then(Value::as_str) {
        Some("incoming") => MessageDirection::Incoming,
        Some("outgoing") => MessageDirection::Outgoing,
        other => {
            return Ok(WebhookEvent::Ignored(format!(
                "message_type {}",
                other.unwrap_or("<none>")
            )));
        }
    };

    let conversation_id = id_at(payload, &["conversation", "id"])
        .ok_or(MalformedEvent::MissingField("conversation.id"))?;
    let account_id =
        id_at(payload, &["account", "id"]).ok_or(MalformedEvent::MissingField("account.id"))?;

    Ok(WebhookEvent::MessageCreated(MessageCreated {
        message_id: id_at(payload, &["id"]),
        direction,
        conversation_id,
        account_id,
        content: text_at(payload, &["content"]),
        sender: Sender {
            name: text_at(payload, &["sender", "name"]),
            email: text_at(payload, &["sender", "email"]),
        },
        attachments: attachments_of(payload),
    }))
}

fn parse_status_changed(payload: &Value) -> Result<WebhookEvent, MalformedEvent> {
    let conversation_id = id_at(payload, &["id"])
        .or_else(|| id_at(payload, &["conversation", "id"]))
        .ok_or(MalformedEvent::MissingField("id"))?;

    Ok(WebhookEvent::StatusChanged(StatusChanged {
        conversation_id,
        status: text_at(payload, &["status"]),
    }))
}

fn value_at<'a>(payload: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(payload, |value, key| value.get(key))
}

// Chatwoot sends numeric ids, but some proxies stringify them.
fn id_at(payload: &Value, path: &[&str]) -> Option<i64> {
    let value = value_at(payload, path)?;
    value
        .as_i64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
        .filter(|id| *id > 0)
}

fn text_at(payload: &Value, path: &[&str]) -> Option<String> {
    value_at(payload, path)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .map(ToOwned::to_owned)
}

fn attachments_of(payload: &Value) -> Vec<Attachment> {
    let raw = payload
        .get("attachments")
        .and_then(Value::as_array)
        .or_else(|| value_at(payload, &["message", "attachments"]).and_then(Value::as_array));

    raw.map(|items| {
        items
            .iter()
            .filter_map(|item| match serde_json::from_value::<Attachment>(item.clone()) {
                Ok(attachment) => Some(attachment),
                Err(err) => {
                    warn!("skipping unreadable attachment descriptor: {}", err);
                    None
                }
            })
            .collect()
    })
    .unwrap_or_default()
}
