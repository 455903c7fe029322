use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    pub result: Option<T>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub error_code: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chat {
    pub id: i64,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub is_forum: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub message_id: i64,
    #[serde(default)]
    pub message_thread_id: Option<i64>,
    #[serde(default)]
    pub from: Option<User>,
    pub chat: Chat,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub reply_to_message: Option<Box<Message>>,
    #[serde(default)]
    pub is_topic_message: Option<bool>,
    #[serde(default)]
    pub entities: Vec<MessageEntity>,
}

/// Formatting span of a message text. Offsets count UTF-16 code units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEntity {
    #[serde(rename = "type")]
    pub kind: String,
    pub offset: usize,
    pub length: usize,
}

impl Message {
    /// Where a reply to this message should go: same chat, same topic.
    pub fn reply_target(&self) -> ChatTarget {
        ChatTarget {
            chat_id: self.chat.id,
            thread_id: self
                .message_thread_id
                .filter(|_| self.is_topic_message == Some(true)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: User,
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub data: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ForumTopic {
    pub message_thread_id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineKeyboardButton {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl InlineKeyboardButton {
    pub fn callback(text: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            callback_data: Some(data.into()),
            url: None,
        }
    }

    pub fn link(text: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            callback_data: None,
            url: Some(url.into()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineKeyboardMarkup {
    pub inline_keyboard: Vec<Vec<InlineKeyboardButton>>,
}

impl InlineKeyboardMarkup {
    pub fn new(rows: Vec<Vec<InlineKeyboardButton>>) -> Self {
        Self {
            inline_keyboard: rows,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.inline_keyboard.iter().all(Vec::is_empty)
    }

    /// Every callback token carried by the keyboard, in display order.
    pub fn callback_tokens(&self) -> Vec<&str> {
        self.inline_keyboard
            .iter()
            .flatten()
            .filter_map(|button| button.callback_data.as_deref())
            .collect()
    }
}

/// A chat plus an optional forum topic inside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChatTarget {
    pub chat_id: i64,
    pub thread_id: Option<i64>,
}

impl ChatTarget {
    pub fn chat(chat_id: i64) -> Self {
        Self {
            chat_id,
            thread_id: None,
        }
    }

    pub fn thread(chat_id: i64, thread_id: i64) -> Self {
        Self {
            chat_id,
            thread_id: Some(thread_id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseMode {
    Html,
}

impl ParseMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParseMode::Html => "HTML",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendOptions {
    pub parse_mode: Option<ParseMode>,
    pub reply_markup: Option<InlineKeyboardMarkup>,
}

impl SendOptions {
    pub fn html() -> Self {
        Self {
            parse_mode: Some(ParseMode::Html),
            reply_markup: None,
        }
    }

    pub fn with_markup(mut self, markup: InlineKeyboardMarkup) -> Self {
        self.reply_markup = Some(markup);
        self
    }
}

/// Media handed to one of the `send*` methods: either a URL Telegram fetches
/// itself or bytes uploaded as multipart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputMedia {
    Url(String),
    Upload { bytes: Vec<u8>, file_name: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditOutcome {
    Edited,
    /// Telegram rejected the edit because nothing would change.
    Unchanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicTransition {
    Changed,
    /// The topic was already open (or closed) before the call.
    AlreadyInState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_forum_reply_update() {
        let raw = r#"{
            "update_id": 10,
            "message": {
                "message_id": 55,
                "message_thread_id": 900,
                "is_topic_message": true,
                "from": {"id": 1, "is_bot": false, "first_name": "Staff"},
                "chat": {"id": -100123, "type": "supergroup", "is_forum": true},
                "text": "on it",
                "reply_to_message": {
                    "message_id": 40,
                    "chat": {"id": -100123, "type": "supergroup"}
                }
            }
        }"#;
        let update: Update = serde_json::from_str(raw).unwrap();
        let message = update.message.unwrap();
        assert_eq!(message.message_thread_id, Some(900));
        assert_eq!(message.reply_to_message.unwrap().message_id, 40);
        assert_eq!(message.chat.kind, "supergroup");
        assert!(update.callback_query.is_none());
    }

    #[test]
    fn keyboard_buttons_skip_absent_fields() {
        let markup = InlineKeyboardMarkup::new(vec![vec![
            InlineKeyboardButton::callback("Resolve", "resolve:1:2"),
            InlineKeyboardButton::link("Open", "https://example.com"),
        ]]);
        let value = serde_json::to_value(&markup).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"inline_keyboard": [[
                {"text": "Resolve", "callback_data": "resolve:1:2"},
                {"text": "Open", "url": "https://example.com"}
            ]]})
        );
        assert_eq!(markup.callback_tokens(), vec!["resolve:1:2"]);
        assert!(InlineKeyboardMarkup::default().is_empty());
    }
}
