pub use self::parser::{
    AttachmentConfig, BridgeConfig, ChatwootConfig, Config, DatabaseConfig, LoggingConfig,
    TelegramConfig,
};
pub use self::validator::ConfigError;

mod parser;
mod validator;
