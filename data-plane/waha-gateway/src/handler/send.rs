use axum::{Extension, Json};
use bytes::Bytes;
use serde_json::{Value, json};
use tracing::info;

use super::AppState;
use crate::command::{CommandError, SendCommand};
use crate::error::GatewayError;

/// `POST /api/waha/send`. The body is decoded by hand so malformed JSON
/// gets the same error shape as a failed validation.
#[axum::debug_handler]
pub async fn send_message(
    Extension(state): Extension<AppState>,
    body: Bytes,
) -> Result<Json<Value>, GatewayError> {
    let raw: Value =
        serde_json::from_slice(&body).map_err(|_| CommandError::Body)?;
    let command = SendCommand::parse(&raw)?;
    let call = command.to_call();
    info!(path = call.path, "forwarding send command");
    let data = state.client.post(&call).await?;
    Ok(Json(json!({ "ok": true, "data": data })))
}
