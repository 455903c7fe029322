use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "chatwoot-bridge-telegram")]
#[command(about = "Chatwoot-Telegram Bridge", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    #[arg(short, long, env = "CONFIG_PATH", default_value = "config.yaml")]
    pub config: PathBuf,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    #[command(about = "Validate the configuration file and exit")]
    ValidateConfig,

    #[command(about = "Bring the mapping store up to the current schema and exit")]
    Migrate,
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[test]
    fn runs_bridge_without_subcommand() {
        let cli = Cli::try_parse_from(["chatwoot-bridge-telegram", "--config", "bridge.yaml"]).unwrap();
        assert_eq!(cli.command, None);
        assert_eq!(cli.config, PathBuf::from("bridge.yaml"));
    }

    #[test]
    fn parses_subcommands() {
        let cli = Cli::try_parse_from(["chatwoot-bridge-telegram", "validate-config"]).unwrap();
        assert_eq!(cli.command, Some(Commands::ValidateConfig));

        let cli = Cli::try_parse_from(["chatwoot-bridge-telegram", "-c", "x.yaml", "migrate"]).unwrap();
        assert_eq!(cli.command, Some(Commands::Migrate));
        assert_eq!(cli.config, PathBuf::from("x.yaml"));
    }

    #[test]
    fn rejects_unknown_subcommand() {
        assert!(Cli::try_parse_from(["chatwoot-bridge-telegram", "generate-registration"]).is_err());
    }
}
