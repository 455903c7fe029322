use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use futures::{FutureExt, StreamExt, stream};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use reqwest::redirect::Policy;
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::chatwoot::Attachment;
use crate::config::AttachmentConfig;
use crate::db::{MessageMapping, MessageStore};
use crate::telegram::{ChatTarget, InputMedia, MessengerApi, SendOptions};

const MIB: u64 = 1024 * 1024;

static DATA_URL_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^data:([^;,]+);base64,(.*)$").expect("valid data url regex"));

#[derive(Debug, Error)]
pub enum AttachmentError {
    #[error("attachment has no usable url")]
    NoSource,

    #[error("attachment data url is not of the form data:<mime>;base64,<payload>")]
    InvalidDataUrl,

    #[error("download from {url} failed: {reason}")]
    Download { url: String, reason: String },

    #[error("download exceeded {limit} bytes")]
    TooLarge { limit: u64 },

    #[error("failed to construct HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// How a file is rendered in Telegram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SendKind {
    Photo,
    Video,
    Audio,
    Document,
}

impl SendKind {
    pub fn classify(file_type: Option<&str>, mime_type: Option<&str>) -> Self {
        let file_type = file_type.unwrap_or_default().to_ascii_lowercase();
        let mime_type = mime_type.unwrap_or_default().to_ascii_lowercase();

        if file_type == "image" || mime_type.starts_with("image/") {
            SendKind::Photo
        } else if file_type == "video" || mime_type.starts_with("video/") {
            SendKind::Video
        } else if file_type == "audio" || mime_type.starts_with("audio/") {
            SendKind::Audio
        } else {
            SendKind::Document
        }
    }

    pub fn api_method(&self) -> &'static str {
        match self {
            SendKind::Photo => "sendPhoto",
            SendKind::Video => "sendVideo",
            SendKind::Audio => "sendAudio",
            SendKind::Document => "sendDocument",
        }
    }

    /// Name of the request field carrying the file.
    pub fn field(&self) -> &'static str {
        match self {
            SendKind::Photo => "photo",
            SendKind::Video => "video",
            SendKind::Audio => "audio",
            SendKind::Document => "document",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedData {
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

pub fn parse_data_url(url: &str) -> Result<DecodedData, AttachmentError> {
    let captures = DATA_URL_REGEX
        .captures(url)
        .ok_or(AttachmentError::InvalidDataUrl)?;
    let mime_type = captures[1].trim().to_string();
    let payload: String = captures[2].chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = STANDARD
        .decode(payload.as_bytes())
        .map_err(|_| AttachmentError::InvalidDataUrl)?;

    Ok(DecodedData { mime_type, bytes })
}

/// The Chatwoot message an attachment belongs to. Copied onto every mapping
/// the engine records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MappingOrigin {
    pub conversation_id: i64,
    pub account_id: Option<i64>,
    pub chatwoot_message_id: Option<i64>,
}

impl MappingOrigin {
    pub(crate) fn mapping(&self, telegram_message_id: i64) -> MessageMapping {
        MessageMapping::new(
            telegram_message_id,
            self.conversation_id,
            self.account_id,
            self.chatwoot_message_id,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentOutcome {
    /// Telegram fetched the file from its URL.
    Direct(i64),
    Uploaded(i64),
    Oversized(i64),
    DownloadFailed(i64),
    UploadFailed(i64),
    /// Even the fallback notice could not be sent.
    Dropped,
}

impl AttachmentOutcome {
    pub fn message_id(&self) -> Option<i64> {
        match self {
            AttachmentOutcome::Direct(id)
            | AttachmentOutcome::Uploaded(id)
            | AttachmentOutcome::Oversized(id)
            | AttachmentOutcome::DownloadFailed(id)
            | AttachmentOutcome::UploadFailed(id) => Some(*id),
            AttachmentOutcome::Dropped => None,
        }
    }
}

#[derive(Debug)]
struct Fetched {
    bytes: Vec<u8>,
    size: u64,
    mime_type: Option<String>,
    source_url: Option<String>,
}

pub struct AttachmentTransfer {
    http: Client,
    access_token: SecretString,
    max_file_size: u64,
    concurrency: usize,
    messenger: Arc<dyn MessengerApi>,
    messages: Arc<dyn MessageStore>,
}

impl AttachmentTransfer {
    pub fn new(
        config: &AttachmentConfig,
        access_token: &str,
        messenger: Arc<dyn MessengerApi>,
        messages: Arc<dyn MessageStore>,
    ) -> Result<Self, AttachmentError> {
        let http = Client::builder()
            .user_agent(concat!("chatwoot-bridge-telegram/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.download_timeout_secs))
            .redirect(Policy::limited(config.max_redirects))
            .pool_max_idle_per_host(16)
            .build()?;

        Ok(Self {
            http,
            access_token: SecretString::from(access_token.to_string()),
            max_file_size: config.max_file_size,
            concurrency: config.concurrency.max(1),
            messenger,
            messages,
        })
    }

    fn byte_cap(&self) -> u64 {
        self.max_file_size + MIB
    }

    /// Relays every attachment to `target` with bounded concurrency. Each
    /// attachment succeeds or degrades on its own; the call waits for all.
    pub async fn relay_all(
        &self,
        target: ChatTarget,
        attachments: &[Attachment],
        origin: MappingOrigin,
    ) -> Vec<AttachmentOutcome> {
        if attachments.is_empty() {
            return Vec::new();
        }

        let jobs: Vec<_> = attachments
            .iter()
            .map(|attachment| self.relay_one(target, attachment, origin).boxed())
            .collect();
        stream::iter(jobs)
            .buffer_unordered(self.concurrency)
            .collect()
            .await
    }

    pub async fn relay_one(
        &self,
        target: ChatTarget,
        attachment: &Attachment,
        origin: MappingOrigin,
    ) -> AttachmentOutcome {
        let source = attachment.candidate_url().map(ToOwned::to_owned);
        let name = display_name(attachment, source.as_deref());

        if let Some(url) = source.as_deref().filter(|url| !is_data_url(url)) {
            let kind = SendKind::classify(
                attachment.file_type.as_deref(),
                attachment.content_type.as_deref(),
            );
            match self
                .messenger
                .send_media(target, kind, InputMedia::Url(url.to_string()))
                .await
            {
                Ok(message_id) => {
                    debug!("attachment {} sent by url as {:?}", name, kind);
                    self.record(origin, message_id).await;
                    return AttachmentOutcome::Direct(message_id);
                }
                Err(err) => {
                    warn!(
                        "telegram could not fetch attachment url, downloading instead: {}",
                        err
                    );
                }
            }
        }

        let fetched = match self.fetch(attachment, source.as_deref()).await {
            Ok(fetched) => fetched,
            Err(err) => {
                error!("attachment {} download failed: {}", name, err);
                let text = download_failed_notice(&name, source.as_deref());
                return self
                    .notify(target, &text, origin, AttachmentOutcome::DownloadFailed)
                    .await;
            }
        };

        let link = fetched.source_url.as_deref().or(source.as_deref());
        if fetched.size == 0 || fetched.size > self.max_file_size {
            warn!(
                "attachment {} is {} bytes, limit is {}",
                name, fetched.size, self.max_file_size
            );
            let text = oversized_notice(&name, fetched.size, link);
            return self
                .notify(target, &text, origin, AttachmentOutcome::Oversized)
                .await;
        }

        let mime_type = resolve_mime(
            fetched.mime_type.as_deref(),
            attachment.content_type.as_deref(),
            &name,
            &fetched.bytes,
        );
        let kind = SendKind::classify(attachment.file_type.as_deref(), mime_type.as_deref());
        let upload = InputMedia::Upload {
            bytes: fetched.bytes,
            file_name: name.clone(),
        };

        match self.messenger.send_media(target, kind, upload).await {
            Ok(message_id) => {
                debug!("attachment {} uploaded as {:?}", name, kind);
                self.record(origin, message_id).await;
                AttachmentOutcome::Uploaded(message_id)
            }
            Err(err) => {
                error!("attachment {} upload failed: {}", name, err);
                let text = upload_failed_notice(&name, link);
                self.notify(target, &text, origin, AttachmentOutcome::UploadFailed)
                    .await
            }
        }
    }

    async fn fetch(
        &self,
        attachment: &Attachment,
        source: Option<&str>,
    ) -> Result<Fetched, AttachmentError> {
        let url = source.ok_or(AttachmentError::NoSource)?;

        if is_data_url(url) {
            let decoded = parse_data_url(url)?;
            return Ok(Fetched {
                size: decoded.bytes.len() as u64,
                bytes: decoded.bytes,
                mime_type: Some(decoded.mime_type),
                source_url: None,
            });
        }

        if let Some(declared) = attachment.declared_size()
            && declared > self.max_file_size
        {
            debug!("skipping download of {} declared at {} bytes", url, declared);
            return Ok(Fetched {
                bytes: Vec::new(),
                size: declared,
                mime_type: None,
                source_url: Some(url.to_string()),
            });
        }

        self.download(url).await
    }

    async fn download(&self, url: &str) -> Result<Fetched, AttachmentError> {
        debug!("downloading attachment from {}", url);
        let failed = |reason: String| AttachmentError::Download {
            url: url.to_string(),
            reason,
        };

        let mut response = self
            .http
            .get(url)
            .header("api_access_token", self.access_token.expose_secret())
            .send()
            .await
            .map_err(|e| failed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(failed(format!("status {status}")));
        }

        let cap = self.byte_cap();
        if let Some(length) = response.content_length()
            && length > cap
        {
            return Err(AttachmentError::TooLarge { limit: cap });
        }

        let mime_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(ToOwned::to_owned);

        let mut bytes = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(|e| failed(e.to_string()))? {
            if (bytes.len() + chunk.len()) as u64 > cap {
                return Err(AttachmentError::TooLarge { limit: cap });
            }
            bytes.extend_from_slice(&chunk);
        }

        debug!("downloaded {} bytes from {}", bytes.len(), url);
        Ok(Fetched {
            size: bytes.len() as u64,
            bytes,
            mime_type,
            source_url: Some(url.to_string()),
        })
    }

    async fn notify(
        &self,
        target: ChatTarget,
        text: &str,
        origin: MappingOrigin,
        outcome: fn(i64) -> AttachmentOutcome,
    ) -> AttachmentOutcome {
        match self
            .messenger
            .send_message(target, text, &SendOptions::default())
            .await
        {
            Ok(message_id) => {
                self.record(origin, message_id).await;
                outcome(message_id)
            }
            Err(err) => {
                error!("failed to send attachment notice: {}", err);
                AttachmentOutcome::Dropped
            }
        }
    }

    async fn record(&self, origin: MappingOrigin, message_id: i64) {
        if let Err(err) = self
            .messages
            .upsert_message_mapping(&origin.mapping(message_id))
            .await
        {
            error!(
                "failed to store mapping for telegram message {}: {}",
                message_id, err
            );
        }
    }
}

fn is_data_url(url: &str) -> bool {
    url.starts_with("data:")
}

fn link_line(label: &str, url: Option<&str>) -> String {
    match url.filter(|url| !is_data_url(url)) {
        Some(url) => format!("\n{label}: {url}"),
        None => String::new(),
    }
}

fn oversized_notice(name: &str, size: u64, url: Option<&str>) -> String {
    format!(
        "📎 Attachment is too large to forward to Telegram ({}MB)\nFile: {}{}",
        size.div_ceil(MIB),
        name,
        link_line("Download", url)
    )
}

fn download_failed_notice(name: &str, url: Option<&str>) -> String {
    format!(
        "📎 Attachment download failed: {}{}",
        name,
        link_line("Link", url)
    )
}

fn upload_failed_notice(name: &str, url: Option<&str>) -> String {
    format!(
        "📎 Attachment upload failed: {}{}",
        name,
        link_line("Link", url)
    )
}

fn display_name(attachment: &Attachment, source: Option<&str>) -> String {
    attachment
        .file_name
        .as_deref()
        .and_then(sanitize_filename)
        .or_else(|| {
            source
                .filter(|url| !is_data_url(url))
                .and_then(filename_from_url)
        })
        .or_else(|| attachment.id.map(|id| format!("attachment-{id}")))
        .unwrap_or_else(|| "attachment".to_string())
}

fn filename_from_url(url: &str) -> Option<String> {
    if let Ok(parsed) = reqwest::Url::parse(url)
        && let Some(segment) = parsed.path_segments().and_then(|mut s| s.next_back())
        && let Some(name) = sanitize_filename(segment)
    {
        return Some(name);
    }

    None
}

fn sanitize_filename(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let basename = trimmed.rsplit(['/', '\\']).next().unwrap_or(trimmed).trim();
    let cleaned: String = basename.chars().filter(|c| !c.is_control()).collect();

    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

/// Picks the most specific MIME type available for an upload: the response
/// header, then Chatwoot's declared type, then the file name, then magic
/// bytes.
fn resolve_mime(
    header_value: Option<&str>,
    declared: Option<&str>,
    filename: &str,
    data: &[u8],
) -> Option<String> {
    let informative = |value: Option<&str>| {
        value
            .and_then(|v| v.split(';').next())
            .map(str::trim)
            .filter(|v| !v.is_empty() && *v != "application/octet-stream")
            .map(ToOwned::to_owned)
    };

    informative(header_value)
        .or_else(|| informative(declared))
        .or_else(|| guess_mime_from_filename(filename).map(ToOwned::to_owned))
        .or_else(|| sniff_mime(data).map(ToOwned::to_owned))
}

fn guess_mime_from_filename(filename: &str) -> Option<&'static str> {
    let ext = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())?;

    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        "mp4" => Some("video/mp4"),
        "mov" => Some("video/quicktime"),
        "mp3" => Some("audio/mpeg"),
        "m4a" => Some("audio/mp4"),
        "ogg" => Some("audio/ogg"),
        "pdf" => Some("application/pdf"),
        _ => None,
    }
}

fn sniff_mime(data: &[u8]) -> Option<&'static str> {
    if data.len() >= 8 && data[..8] == [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A] {
        return Some("image/png");
    }
    if data.len() >= 3 && data[..3] == [0xFF, 0xD8, 0xFF] {
        return Some("image/jpeg");
    }
    if data.len() >= 6 && (&data[..6] == b"GIF87a" || &data[..6] == b"GIF89a") {
        return Some("image/gif");
    }
    if data.len() >= 12 && &data[..4] == b"RIFF" && &data[8..12] == b"WEBP" {
        return Some("image/webp");
    }
    if data.len() >= 5 && &data[..5] == b"%PDF-" {
        return Some("application/pdf");
    }

    None
}
