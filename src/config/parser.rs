use std::path::Path;

use serde::Deserialize;

use super::ConfigError;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub chatwoot: ChatwootConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub attachments: AttachmentConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BridgeConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_webhook_path")]
    pub webhook_path: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            webhook_path: default_webhook_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramConfig {
    #[serde(default, alias = "token")]
    pub bot_token: String,
    #[serde(default)]
    pub admin_id: i64,
    /// Forum supergroup that receives one topic per conversation. Leaving it
    /// unset routes everything to the admin chat.
    #[serde(default)]
    pub forum_chat_id: Option<i64>,
    #[serde(default = "default_telegram_api_url")]
    pub api_url: String,
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            admin_id: 0,
            forum_chat_id: None,
            api_url: default_telegram_api_url(),
            poll_timeout_secs: default_poll_timeout_secs(),
        }
    }
}

impl TelegramConfig {
    pub fn thread_mode(&self) -> bool {
        self.forum_chat_id.is_some()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatwootConfig {
    #[serde(default = "default_chatwoot_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub account_id: i64,
}

impl Default for ChatwootConfig {
    fn default() -> Self {
        Self {
            base_url: default_chatwoot_base_url(),
            access_token: String::new(),
            account_id: 0,
        }
    }
}

impl ChatwootConfig {
    pub fn conversation_url(&self, account_id: i64, conversation_id: i64) -> String {
        format!(
            "{}/app/accounts/{}/conversations/{}",
            self.base_url.trim_end_matches('/'),
            account_id,
            conversation_id
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_filename", alias = "path")]
    pub filename: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            filename: default_database_filename(),
            max_connections: default_max_connections(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

impl DatabaseConfig {
    pub fn sqlite_path(&self) -> String {
        self.filename
            .strip_prefix("sqlite://")
            .unwrap_or(&self.filename)
            .to_string()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AttachmentConfig {
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    #[serde(default = "default_attachment_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,
}

impl Default for AttachmentConfig {
    fn default() -> Self {
        Self {
            max_file_size: default_max_file_size(),
            concurrency: default_attachment_concurrency(),
            download_timeout_secs: default_download_timeout_secs(),
            max_redirects: default_max_redirects(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Reads the YAML file when present, then layers environment variables on
    /// top. A missing file is not an error so env-only deployments work.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = if path.as_ref().exists() {
            let content = std::fs::read_to_string(&path)?;
            serde_yaml::from_str(&content)?
        } else {
            Config::default()
        };
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.telegram.bot_token.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "telegram.bot_token cannot be empty (set TELEGRAM_TOKEN)".to_string(),
            ));
        }
        if looks_like_placeholder_token(&self.telegram.bot_token) {
            return Err(ConfigError::InvalidConfig(
                "telegram.bot_token is still using a placeholder value; set a real bot token"
                    .to_string(),
            ));
        }

        if self.telegram.admin_id == 0 {
            return Err(ConfigError::InvalidConfig(
                "telegram.admin_id must be set (set TELEGRAM_ADMIN_ID)".to_string(),
            ));
        }

        if self.chatwoot.access_token.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "chatwoot.access_token cannot be empty (set CHATWOOT_ACCESS_TOKEN)".to_string(),
            ));
        }

        if self.chatwoot.account_id <= 0 {
            return Err(ConfigError::InvalidConfig(
                "chatwoot.account_id must be a positive integer (set CHATWOOT_ACCOUNT_ID)"
                    .to_string(),
            ));
        }

        if let Err(err) = url::Url::parse(&self.chatwoot.base_url) {
            return Err(ConfigError::InvalidConfig(format!(
                "chatwoot.base_url is not a valid URL: {err}"
            )));
        }

        if let Err(err) = url::Url::parse(&self.telegram.api_url) {
            return Err(ConfigError::InvalidConfig(format!(
                "telegram.api_url is not a valid URL: {err}"
            )));
        }

        if self.database.sqlite_path().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "database.filename cannot be empty".to_string(),
            ));
        }

        if self.database.max_connections == 0 {
            return Err(ConfigError::InvalidConfig(
                "database.max_connections must be at least 1".to_string(),
            ));
        }

        if self.attachments.concurrency == 0 {
            return Err(ConfigError::InvalidConfig(
                "attachments.concurrency must be at least 1".to_string(),
            ));
        }

        if self.attachments.max_file_size == 0 {
            return Err(ConfigError::InvalidConfig(
                "attachments.max_file_size must be greater than zero".to_string(),
            ));
        }

        if self.bridge.port == 0 {
            return Err(ConfigError::InvalidConfig(
                "bridge.port must be between 1 and 65535".to_string(),
            ));
        }

        Ok(())
    }

    fn normalize(&mut self) {
        self.telegram.bot_token = self.telegram.bot_token.trim().to_string();
        self.chatwoot.access_token = self.chatwoot.access_token.trim().to_string();
        self.chatwoot.base_url = self.chatwoot.base_url.trim_end_matches('/').to_string();
        self.telegram.api_url = self.telegram.api_url.trim_end_matches('/').to_string();
        self.bridge.webhook_path = self.bridge.webhook_path.trim_matches('/').to_string();
        if self.bridge.webhook_path.is_empty() {
            self.bridge.webhook_path = default_webhook_path();
        }
    }

    fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(value) = lookup("PORT") {
            self.bridge.port = parse_env("PORT", &value)?;
        }
        if let Some(value) = lookup("BIND_ADDRESS") {
            self.bridge.bind_address = value;
        }
        if let Some(value) = lookup("TELEGRAM_TOKEN") {
            self.telegram.bot_token = value;
        }
        if let Some(value) = lookup("TELEGRAM_ADMIN_ID") {
            self.telegram.admin_id = parse_env("TELEGRAM_ADMIN_ID", &value)?;
        }
        if let Some(value) = lookup("TELEGRAM_FORUM_CHAT_ID") {
            self.telegram.forum_chat_id = Some(parse_env("TELEGRAM_FORUM_CHAT_ID", &value)?);
        }
        if let Some(value) = lookup("TELEGRAM_API_URL") {
            self.telegram.api_url = value;
        }
        if let Some(value) = lookup("CHATWOOT_ACCESS_TOKEN") {
            self.chatwoot.access_token = value;
        }
        if let Some(value) = lookup("CHATWOOT_BASE_URL") {
            self.chatwoot.base_url = value;
        }
        if let Some(value) = lookup("CHATWOOT_ACCOUNT_ID") {
            self.chatwoot.account_id = parse_env("CHATWOOT_ACCOUNT_ID", &value)?;
        }
        if let Some(value) = lookup("DB_PATH") {
            self.database.filename = value;
        }

        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidConfig(format!("{key} has an invalid value: {value}")))
}

fn default_port() -> u16 {
    3000
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_webhook_path() -> String {
    "webhook".to_string()
}

fn default_telegram_api_url() -> String {
    "https://api.telegram.org".to_string()
}

fn default_poll_timeout_secs() -> u64 {
    30
}

fn default_chatwoot_base_url() -> String {
    "https://app.chatwoot.com".to_string()
}

fn default_database_filename() -> String {
    "mappings.db".to_string()
}

fn default_max_connections() -> u32 {
    4
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

// Telegram's Bot API rejects uploads above 50 MB; stay a few megabytes below.
fn default_max_file_size() -> u64 {
    45 * 1024 * 1024
}

fn default_attachment_concurrency() -> usize {
    2
}

fn default_download_timeout_secs() -> u64 {
    20
}

fn default_max_redirects() -> usize {
    5
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn looks_like_placeholder_token(token: &str) -> bool {
    let lower = token.trim().to_ascii_lowercase();
    lower == "your_telegram_bot_token"
        || lower == "your_bot_token_here"
        || lower == "your_bot_token"
        || lower == "your-token-here"
        || lower == "changeme"
}
