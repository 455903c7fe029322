use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl LogFormat {
    pub fn from_config(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Pretty
        }
    }
}

/// Installs the global subscriber. `RUST_LOG` wins over the configured level.
pub fn init_tracing(config: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);

    let installed = match LogFormat::from_config(&config.format) {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
    };
    if let Err(err) = installed {
        eprintln!("tracing subscriber was already installed: {err}");
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::LogFormat;

    #[test_case("json", LogFormat::Json ; "json")]
    #[test_case(" JSON ", LogFormat::Json ; "json any case")]
    #[test_case("pretty", LogFormat::Pretty ; "pretty")]
    #[test_case("compact", LogFormat::Pretty ; "unknown falls back to pretty")]
    fn picks_log_format(value: &str, expected: LogFormat) {
        assert_eq!(LogFormat::from_config(value), expected);
    }
}
