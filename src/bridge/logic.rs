use crate::chatwoot::{MessageCreated, MessageDirection};
use crate::telegram::{InlineKeyboardButton, InlineKeyboardMarkup, MessageEntity};

use super::action::ActionToken;

pub(crate) const UNKNOWN_SENDER: &str = "Unknown";
pub(crate) const WELCOME_TEXT: &str =
    "💬 <b>New conversation started</b>\n\nUse the buttons below to manage this conversation.";

pub(crate) const REPLY_REQUIRED: &str = "Please reply to a customer message to answer it.";
pub(crate) const MAPPING_NOT_FOUND: &str =
    "No conversation is linked to that message. It may have expired or was not sent by this bot.";
pub(crate) const SEND_FAILED: &str = "Failed to send the message to Chatwoot, check the bridge logs.";

pub(crate) const ANSWER_RESOLVED: &str = "Conversation resolved ✅";
pub(crate) const ANSWER_REOPENED: &str = "Conversation reopened 🔓";
pub(crate) const ANSWER_CLOSED: &str = "Topic closed 🔒";
pub(crate) const ANSWER_FAILED: &str = "Action failed, check the bridge logs.";
pub(crate) const ANSWER_EXPIRED: &str = "This message has expired or is unknown.";

pub(crate) const STATUS_RESOLVED: &str = "✅ Resolved";
pub(crate) const STATUS_REOPENED: &str = "🔓 Reopened";
pub(crate) const STATUS_CLOSED: &str = "🔒 Topic closed";

const STATUS_MARKER: &str = "\n\nStatus: ";
// Telegram caps topic names at 128 characters.
const MAX_TOPIC_NAME_CHARS: usize = 128;

pub(crate) fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        push_escaped(&mut escaped, c);
    }
    escaped
}

fn push_escaped(out: &mut String, c: char) {
    match c {
        '&' => out.push_str("&amp;"),
        '<' => out.push_str("&lt;"),
        '>' => out.push_str("&gt;"),
        '"' => out.push_str("&quot;"),
        _ => out.push(c),
    }
}

fn html_tag(kind: &str) -> Option<&'static str> {
    match kind {
        "bold" => Some("b"),
        "italic" => Some("i"),
        "underline" => Some("u"),
        "strikethrough" => Some("s"),
        "code" => Some("code"),
        _ => None,
    }
}

/// Rebuilds HTML from a received message's plain text and its formatting
/// entities, so an edit keeps the original markup. Other entity kinds are
/// dropped.
pub(crate) fn entities_to_html(text: &str, entities: &[MessageEntity]) -> String {
    let total = text.encode_utf16().count();
    let mut spans: Vec<(usize, usize, &str)> = entities
        .iter()
        .filter_map(|entity| {
            let tag = html_tag(&entity.kind)?;
            let end = (entity.offset + entity.length).min(total);
            (entity.offset < end).then_some((entity.offset, end, tag))
        })
        .collect();
    // Outer spans open first and close last.
    spans.sort_by(|a, b| a.0.cmp(&b.0).then(b.1.cmp(&a.1)));

    let mut html = String::with_capacity(text.len());
    let mut position = 0;
    let mut chars = text.chars();
    loop {
        for (_, _, tag) in spans.iter().rev().filter(|span| span.1 == position) {
            html.push_str("</");
            html.push_str(tag);
            html.push('>');
        }
        for (_, _, tag) in spans.iter().filter(|span| span.0 == position) {
            html.push('<');
            html.push_str(tag);
            html.push('>');
        }
        let Some(c) = chars.next() else { break };
        push_escaped(&mut html, c);
        position += c.len_utf16();
    }
    html
}

/// Renders a Chatwoot message as Telegram HTML.
pub(crate) fn format_inbound_text(event: &MessageCreated) -> String {
    let name = escape_html(event.sender.name.as_deref().unwrap_or(UNKNOWN_SENDER));
    let content = match event.content.as_deref() {
        Some(content) => escape_html(content),
        None if !event.attachments.is_empty() => "[attachment]".to_string(),
        None => "[no content]".to_string(),
    };

    let mut text = match event.direction {
        MessageDirection::Incoming => {
            let email = event
                .sender
                .email
                .as_deref()
                .map(|email| format!(" ({})", escape_html(email)))
                .unwrap_or_default();
            format!("👤 <b>{name}</b>{email}\n💬 {content}")
        }
        MessageDirection::Outgoing => format!("🤖 <b>{name}</b> (agent)\n📤 {content}"),
    };

    if !event.attachments.is_empty() {
        text.push_str(&format!("\n📎 Attachments: {}", event.attachments.len()));
    }
    text
}

pub(crate) fn topic_name(sender: &str, conversation_id: i64) -> String {
    let suffix = format!(" #{conversation_id}");
    let budget = MAX_TOPIC_NAME_CHARS - "🗨️ ".chars().count() - suffix.chars().count();
    let sender: String = sender.chars().take(budget).collect();
    format!("🗨️ {sender}{suffix}")
}

fn open_in_chatwoot(url: &str) -> Vec<InlineKeyboardButton> {
    vec![InlineKeyboardButton::link("📱 Open in Chatwoot", url)]
}

pub(crate) fn thread_keyboard(
    conversation_id: i64,
    account_id: i64,
    conversation_url: &str,
) -> InlineKeyboardMarkup {
    let account_id = Some(account_id);
    InlineKeyboardMarkup::new(vec![
        vec![
            InlineKeyboardButton::callback(
                "✅ Resolve",
                ActionToken::Resolve {
                    conversation_id,
                    account_id,
                }
                .to_string(),
            ),
            InlineKeyboardButton::callback(
                "🔓 Reopen",
                ActionToken::Reopen {
                    conversation_id,
                    account_id,
                }
                .to_string(),
            ),
        ],
        vec![InlineKeyboardButton::callback(
            "🔒 Close topic",
            ActionToken::Close {
                conversation_id,
                account_id,
            }
            .to_string(),
        )],
        open_in_chatwoot(conversation_url),
    ])
}

pub(crate) fn admin_keyboard(
    conversation_id: i64,
    account_id: i64,
    conversation_url: &str,
) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![
        vec![InlineKeyboardButton::callback(
            "✅ Resolve",
            ActionToken::Resolve {
                conversation_id,
                account_id: Some(account_id),
            }
            .to_string(),
        )],
        open_in_chatwoot(conversation_url),
    ])
}

pub(crate) fn link_keyboard(conversation_url: &str) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![open_in_chatwoot(conversation_url)])
}

/// Replaces (or appends) the trailing status line of a control message.
pub(crate) fn with_status_line(text: &str, status: &str) -> String {
    let body = match text.rfind(STATUS_MARKER) {
        Some(index) => &text[..index],
        None => text,
    };
    format!("{body}{STATUS_MARKER}{status}")
}

pub(crate) fn resolved_notice(conversation_id: i64) -> String {
    format!("Conversation #{conversation_id} marked as resolved.")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chatwoot::{Attachment, Sender};

    fn event(direction: MessageDirection) -> MessageCreated {
        MessageCreated {
            message_id: Some(1),
            direction,
            conversation_id: 42,
            account_id: 7,
            content: Some("hello".to_string()),
            sender: Sender {
                name: Some("Alice".to_string()),
                email: Some("alice@example.com".to_string()),
            },
            attachments: Vec::new(),
        }
    }

    #[test]
    fn formats_customer_message() {
        let text = format_inbound_text(&event(MessageDirection::Incoming));
        assert_eq!(text, "👤 <b>Alice</b> (alice@example.com)\n💬 hello");
    }

    #[test]
    fn formats_agent_message_with_attachment_hint() {
        let mut event = event(MessageDirection::Outgoing);
        event.attachments = vec![Attachment::default(), Attachment::default()];
        let text = format_inbound_text(&event);
        assert_eq!(text, "🤖 <b>Alice</b> (agent)\n📤 hello\n📎 Attachments: 2");
    }

    #[test]
    fn fills_in_missing_content_and_sender() {
        let mut event = event(MessageDirection::Incoming);
        event.content = None;
        event.sender = Sender::default();
        assert_eq!(format_inbound_text(&event), "👤 <b>Unknown</b>\n💬 [no content]");

        event.attachments = vec![Attachment::default()];
        assert!(format_inbound_text(&event).contains("💬 [attachment]"));
    }

    #[test]
    fn escapes_user_supplied_html() {
        let mut event = event(MessageDirection::Incoming);
        event.content = Some("<script>&</script>".to_string());
        event.sender.name = Some("<b>Mallory</b>".to_string());
        let text = format_inbound_text(&event);
        assert!(text.contains("&lt;script&gt;&amp;&lt;/script&gt;"));
        assert!(text.contains("<b>&lt;b&gt;Mallory&lt;/b&gt;</b>"));
    }

    #[test]
    fn keyboards_match_mode() {
        let url = "https://chatwoot.example/app/accounts/7/conversations/42";
        assert_eq!(
            thread_keyboard(42, 7, url).callback_tokens(),
            vec!["resolve:42:7", "reopen:42:7", "close:42:7"]
        );
        assert_eq!(admin_keyboard(42, 7, url).callback_tokens(), vec!["resolve:42:7"]);

        let link = &admin_keyboard(42, 7, url).inline_keyboard[1][0];
        assert_eq!(link.url.as_deref(), Some(url));
        assert!(link_keyboard(url).callback_tokens().is_empty());
    }

    fn entity(kind: &str, offset: usize, length: usize) -> MessageEntity {
        MessageEntity {
            kind: kind.to_string(),
            offset,
            length,
        }
    }

    #[test]
    fn rebuilds_bold_name_after_emoji() {
        let html = entities_to_html(
            "👤 Alice (a@x.io)\n💬 1 < 2",
            &[entity("bold", 3, 5), entity("mention", 10, 3)],
        );
        assert_eq!(html, "👤 <b>Alice</b> (a@x.io)\n💬 1 &lt; 2");
    }

    #[test]
    fn nested_entities_close_inner_first() {
        assert_eq!(
            entities_to_html("ab", &[entity("italic", 0, 1), entity("bold", 0, 2)]),
            "<b><i>a</i>b</b>"
        );
        assert_eq!(entities_to_html("ab", &[entity("bold", 1, 40)]), "a<b>b</b>");
        assert_eq!(entities_to_html("a&b", &[]), "a&amp;b");
    }

    #[test]
    fn status_line_is_replaced_not_stacked() {
        let once = with_status_line("👤 Alice\n💬 hi", STATUS_RESOLVED);
        let twice = with_status_line(&once, STATUS_RESOLVED);
        assert_eq!(once, twice);
        assert_eq!(once, "👤 Alice\n💬 hi\n\nStatus: ✅ Resolved");

        let reopened = with_status_line(&once, STATUS_REOPENED);
        assert_eq!(reopened, "👤 Alice\n💬 hi\n\nStatus: 🔓 Reopened");
    }

    #[test]
    fn topic_name_stays_within_telegram_limit() {
        assert_eq!(topic_name("Alice", 42), "🗨️ Alice #42");
        let long = "x".repeat(500);
        assert!(topic_name(&long, 123456).chars().count() <= MAX_TOPIC_NAME_CHARS);
        assert!(topic_name(&long, 123456).ends_with(" #123456"));
    }
}
