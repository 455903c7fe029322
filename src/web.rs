use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use once_cell::sync::OnceCell;
use salvo::prelude::*;
use tracing::info;

use crate::bridge::BridgeCore;
use crate::config::Config;

mod health;
mod webhook;

use health::{get_status, health_check};
use webhook::receive_webhook;

#[derive(Clone)]
pub struct WebState {
    pub bridge: Arc<BridgeCore>,
    pub started_at: Instant,
}

static WEB_STATE: OnceCell<WebState> = OnceCell::new();

pub fn web_state() -> Option<&'static WebState> {
    WEB_STATE.get()
}

#[derive(Clone)]
pub struct WebServer {
    config: Arc<Config>,
}

impl WebServer {
    pub fn new(config: Arc<Config>, bridge: Arc<BridgeCore>) -> Self {
        let _ = WEB_STATE.set(WebState {
            bridge,
            started_at: Instant::now(),
        });

        Self { config }
    }

    pub async fn start(&self) -> Result<()> {
        let bind_addr = format!(
            "{}:{}",
            self.config.bridge.bind_address, self.config.bridge.port
        );
        info!(
            "starting web server on {} webhook_path={}",
            bind_addr, self.config.bridge.webhook_path
        );

        let acceptor = TcpListener::new(bind_addr).bind().await;
        Server::new(acceptor)
            .serve(root_router(&self.config.bridge.webhook_path))
            .await;

        Ok(())
    }
}

pub fn root_router(webhook_path: &str) -> Router {
    Router::new()
        .push(Router::with_path("health").get(health_check))
        .push(Router::with_path("status").get(get_status))
        .push(Router::with_path(route_path(webhook_path)).post(receive_webhook))
}

fn route_path(path: &str) -> String {
    let trimmed = path.trim().trim_matches('/');
    if trimmed.is_empty() {
        "webhook".to_string()
    } else {
        trimmed.to_string()
    }
}
