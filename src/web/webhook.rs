use salvo::prelude::*;
use serde_json::Value;
use tracing::{error, warn};

use crate::web::web_state;

const MAX_WEBHOOK_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Acknowledges every delivery with 200, then relays it on its own task.
#[handler]
pub async fn receive_webhook(req: &mut Request, res: &mut Response) {
    let body = match req.payload_with_max_size(MAX_WEBHOOK_BODY_BYTES).await {
        Ok(body) => decode_body(body),
        Err(err) => {
            warn!("failed to read webhook body: {}", err);
            None
        }
    };
    res.render("OK");

    let Some(payload) = body else {
        return;
    };
    let Some(state) = web_state() else {
        error!("webhook received before the bridge was ready");
        return;
    };

    let bridge = state.bridge.clone();
    tokio::spawn(async move {
        bridge.handle_webhook(payload).await;
    });
}

fn decode_body(body: &[u8]) -> Option<Value> {
    match serde_json::from_slice(body) {
        Ok(payload) => Some(payload),
        Err(err) => {
            warn!("webhook body is not valid JSON: {}", err);
            None
        }
    }
}
