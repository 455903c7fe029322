#![forbid(unsafe_code)]
#![allow(dead_code)]

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

mod bridge;
mod chatwoot;
mod cli;
mod config;
mod db;
mod media;
mod telegram;
#[cfg(test)]
mod testing;
mod utils;
mod web;

use bridge::{BridgeCore, BridgeSettings};
use chatwoot::ChatwootClient;
use cli::{Cli, Commands};
use config::Config;
use db::DatabaseManager;
use telegram::{TelegramClient, UpdatePoller};
use web::WebServer;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Arc::new(Config::load_from_file(&cli.config)?);
    utils::logging::init_tracing(&config.logging);

    match cli.command {
        Some(Commands::ValidateConfig) => {
            info!(
                "configuration {} is valid mode={}",
                cli.config.display(),
                BridgeSettings::from_config(&config).mode_name()
            );
            Ok(())
        }
        Some(Commands::Migrate) => {
            let db_manager = DatabaseManager::new(&config.database).await?;
            let version = db_manager.migrate().await?;
            info!("mapping store is at schema version {}", version);
            Ok(())
        }
        None => run(config).await,
    }
}

async fn run(config: Arc<Config>) -> Result<()> {
    let settings = BridgeSettings::from_config(&config);
    info!(
        "chatwoot-telegram bridge starting up mode={}",
        settings.mode_name()
    );

    let db_manager = DatabaseManager::new(&config.database).await?;
    db_manager.migrate().await?;

    let telegram_client = Arc::new(TelegramClient::new(&config.telegram)?);
    let chatwoot_client = Arc::new(ChatwootClient::new(&config.chatwoot)?);

    let bridge = Arc::new(BridgeCore::new(
        settings,
        &config.attachments,
        telegram_client.clone(),
        chatwoot_client,
        db_manager.message_store(),
        db_manager.thread_store(),
    )?);

    let web_server = WebServer::new(config.clone(), bridge.clone());
    let poller = UpdatePoller::new(
        telegram_client,
        bridge,
        config.telegram.poll_timeout_secs,
    );

    let web_handle = tokio::spawn(async move {
        if let Err(e) = web_server.start().await {
            error!("web server error: {}", e);
        }
    });

    let poller_handle = tokio::spawn(async move {
        poller.wait_until_ready().await;
        poller.run().await;
    });

    tokio::pin!(web_handle);
    tokio::pin!(poller_handle);

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("received Ctrl+C, beginning shutdown");
        },
        _ = &mut web_handle => {
            info!("web server task exited, beginning shutdown");
        },
        _ = &mut poller_handle => {
            info!("telegram poller exited, beginning shutdown");
        },
    }

    web_handle.abort();
    poller_handle.abort();

    info!("chatwoot-telegram bridge shutting down");
    Ok(())
}
