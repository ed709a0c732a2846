use axum::{Extension, Json};
use serde::Serialize;
use waha_relay::BridgeStatus;

use super::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigView {
    pub ok: bool,
    pub api_url: String,
    pub has_api_key: bool,
    pub webhook_token_set: bool,
    pub ws: BridgeStatus,
}

/// `GET /api/waha/config`: what the gateway talks to, never the key itself.
pub async fn get_config(
    Extension(state): Extension<AppState>,
) -> Json<ConfigView> {
    Json(ConfigView {
        ok: true,
        api_url: state.api_url.clone(),
        has_api_key: state.has_api_key,
        webhook_token_set: state.webhook_token_set,
        ws: state.bridge.status(),
    })
}
