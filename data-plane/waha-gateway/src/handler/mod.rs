use axum::routing::{get, post};
use axum::{Extension, Router};
use http::StatusCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use waha_relay::{EventBus, PublisherOptions, UpstreamBridge};

use crate::conf::Config;
use crate::error::GatewayError;
use crate::provider::WahaClient;

mod config;
mod events;
mod send;

/// Shared per-process state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub bridge: Arc<UpstreamBridge>,
    pub client: Arc<WahaClient>,
    pub stream: PublisherOptions,
    pub api_url: String,
    pub has_api_key: bool,
    pub webhook_token_set: bool,
    /// Cancelled on process shutdown; ends every open event stream.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn from_config(config: &Config) -> Result<Self, GatewayError> {
        let bus = Arc::new(EventBus::new(config.event_buffer_capacity));
        let bridge = Arc::new(UpstreamBridge::new(config.bridge.clone(), bus)?);
        let client = WahaClient::new(
            &config.bridge.api_url,
            config.bridge.api_key(),
            config.request_timeout(),
        )?;
        Ok(Self::new(config, bridge, client))
    }

    /// Assemble state around an already built bridge (tests inject one with
    /// a scripted connector).
    pub fn new(
        config: &Config,
        bridge: Arc<UpstreamBridge>,
        client: WahaClient,
    ) -> Self {
        Self {
            bridge,
            client: Arc::new(client),
            stream: config.publisher_options(),
            api_url: config.bridge.api_url.clone(),
            has_api_key: config.bridge.api_key().is_some(),
            webhook_token_set: config.webhook_token_set(),
            shutdown: CancellationToken::new(),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/api/waha/events", get(events::stream_events))
        .route("/api/waha/config", get(config::get_config))
        .route("/api/waha/send", post(send::send_message))
        .fallback(no_found)
        .layer(Extension(state))
        .layer(TraceLayer::new_for_http())
}

use axum::response::IntoResponse;
use axum::response::Response;

pub async fn no_found() -> Result<bytes::Bytes, Response> {
    Err((StatusCode::NOT_FOUND, String::from("NOT FOUND")).into_response())
}

pub async fn healthz() -> Result<bytes::Bytes, Response> {
    Ok(bytes::Bytes::from_static(b"ok"))
}

pub async fn readyz() -> Result<bytes::Bytes, Response> {
    Ok(bytes::Bytes::from_static(b"ready"))
}
