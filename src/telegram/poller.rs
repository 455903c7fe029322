use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info};

use super::{TelegramClient, User};
use crate::bridge::BridgeCore;

const INITIAL_RETRY_SECONDS: u64 = 2;
const MAX_RETRY_SECONDS: u64 = 300;

fn next_retry(current: u64) -> u64 {
    (current * 2).min(MAX_RETRY_SECONDS)
}

/// Long-polls `getUpdates` and hands every update to the bridge on its own
/// task.
pub struct UpdatePoller {
    client: Arc<TelegramClient>,
    bridge: Arc<BridgeCore>,
    timeout_secs: u64,
}

impl UpdatePoller {
    pub fn new(client: Arc<TelegramClient>, bridge: Arc<BridgeCore>, timeout_secs: u64) -> Self {
        Self {
            client,
            bridge,
            timeout_secs,
        }
    }

    /// Retries `getMe` until the token is accepted.
    pub async fn wait_until_ready(&self) -> User {
        let mut retry_seconds = INITIAL_RETRY_SECONDS;
        loop {
            match self.client.get_me().await {
                Ok(me) => {
                    info!(
                        "telegram bot ready id={} username={}",
                        me.id,
                        me.username.as_deref().unwrap_or("-")
                    );
                    return me;
                }
                Err(err) => {
                    error!(
                        "failed to reach telegram: {err}. retrying in {} seconds",
                        retry_seconds
                    );
                    tokio::time::sleep(Duration::from_secs(retry_seconds)).await;
                    retry_seconds = next_retry(retry_seconds);
                }
            }
        }
    }

    pub async fn run(self) {
        let mut offset: Option<i64> = None;
        let mut retry_seconds = INITIAL_RETRY_SECONDS;

        info!("telegram update polling started");
        loop {
            match self.client.get_updates(offset, self.timeout_secs).await {
                Ok(updates) => {
                    retry_seconds = INITIAL_RETRY_SECONDS;
                    if !updates.is_empty() {
                        debug!("received {} telegram updates", updates.len());
                    }
                    for update in updates {
                        offset = Some(update.update_id + 1);
                        let bridge = self.bridge.clone();
                        tokio::spawn(async move {
                            bridge.handle_update(update).await;
                        });
                    }
                }
                Err(err) => {
                    error!(
                        "telegram getUpdates failed: {err}. retrying in {} seconds",
                        retry_seconds
                    );
                    tokio::time::sleep(Duration::from_secs(retry_seconds)).await;
                    retry_seconds = next_retry(retry_seconds);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{INITIAL_RETRY_SECONDS, MAX_RETRY_SECONDS, next_retry};

    #[test]
    fn retry_delay_doubles_up_to_cap() {
        let mut delay = INITIAL_RETRY_SECONDS;
        let mut seen = vec![delay];
        for _ in 0..10 {
            delay = next_retry(delay);
            seen.push(delay);
        }
        assert_eq!(&seen[..5], &[2, 4, 8, 16, 32]);
        assert_eq!(*seen.last().unwrap(), MAX_RETRY_SECONDS);
    }
}
