use salvo::prelude::*;
use serde_json::{Value, json};

use crate::web::web_state;

#[handler]
pub async fn health_check(res: &mut Response) {
    res.render("OK");
}

#[handler]
pub async fn get_status(res: &mut Response) {
    let Some(state) = web_state() else {
        res.status_code(StatusCode::SERVICE_UNAVAILABLE);
        res.render(Json(json!({"status": "starting"})));
        return;
    };

    res.render(Json(status_payload(
        state.started_at.elapsed().as_secs(),
        state.bridge.settings().mode_name(),
    )));
}

fn status_payload(uptime_seconds: u64, mode: &str) -> Value {
    json!({
        "status": "running",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": uptime_seconds,
        "mode": mode,
    })
}
