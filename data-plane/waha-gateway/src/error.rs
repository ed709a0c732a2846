use axum::response::IntoResponse;
use http::StatusCode;
use waha_relay::BridgeError;

use crate::command::CommandError;
use crate::provider::ProviderError;

#[derive(thiserror::Error, Debug)]
pub enum GatewayError {
    #[error(transparent)]
    InvalidCommand(#[from] CommandError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("Upstream bridge error: {0}")]
    Bridge(#[from] BridgeError),
}

impl GatewayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::InvalidCommand(_) => StatusCode::BAD_REQUEST,
            GatewayError::Provider(_) => StatusCode::BAD_GATEWAY,
            GatewayError::Bridge(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> axum::response::Response {
        let code = self.status_code();
        let body =
            serde_json::json!({ "ok": false, "error": self.to_string() });
        let mut resp = (code, body.to_string()).into_response();
        resp.headers_mut().insert(
            http::header::CONTENT_TYPE,
            http::HeaderValue::from_static("application/json"),
        );
        resp
    }
}
