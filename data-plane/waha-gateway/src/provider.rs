use reqwest::{Client, Response};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use crate::command::ProviderCall;

pub const API_KEY_HEADER: &str = "X-Api-Key";

#[derive(thiserror::Error, Debug)]
pub enum ProviderError {
    #[error("WAHA request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),
    /// Non-2xx reply; `message` is what the caller sees.
    #[error("{message}")]
    ApiError { status: u16, message: String },
}

/// REST client for the provider's send endpoints.
#[derive(Clone)]
pub struct WahaClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl WahaClient {
    pub fn new(
        base_url: &str,
        api_key: Option<&str>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .user_agent(concat!("waha-gateway/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim().trim_end_matches('/').to_string(),
            api_key: api_key.map(str::to_string),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Perform one call. Never retried.
    pub async fn post(
        &self,
        call: &ProviderCall,
    ) -> Result<Value, ProviderError> {
        let url = format!("{}{}", self.base_url, call.path);
        debug!(path = call.path, "sending provider request");
        let mut request = self.client.post(&url).json(&call.body);
        if let Some(key) = &self.api_key {
            request = request.header(API_KEY_HEADER, key);
        }
        let response = request.send().await?;
        self.handle_response(call.path, response).await
    }

    async fn handle_response(
        &self,
        path: &str,
        response: Response,
    ) -> Result<Value, ProviderError> {
        let status = response.status();
        let text = response.text().await?;
        let data = parse_body(&text);
        if status.is_success() {
            return Ok(data);
        }
        let message = error_message(&data, status.as_u16());
        warn!(
            path,
            status = status.as_u16(),
            %message,
            "provider rejected request"
        );
        Err(ProviderError::ApiError {
            status: status.as_u16(),
            message,
        })
    }
}

/// JSON when it parses, raw text otherwise; empty bodies are `null`.
fn parse_body(text: &str) -> Value {
    if text.is_empty() {
        return Value::Null;
    }
    serde_json::from_str(text)
        .unwrap_or_else(|_| Value::String(text.to_string()))
}

fn error_message(data: &Value, status: u16) -> String {
    match data.as_object().and_then(|o| o.get("message")) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) => "WAHA error".to_string(),
        Some(other) => other.to_string(),
        None => format!("WAHA error ({status})"),
    }
}
