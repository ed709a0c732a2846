pub mod command;
mod conf;
mod error;
mod handler;
pub mod provider;

pub use conf::{Config, ConfigError};
pub use error::GatewayError;
pub use handler::{AppState, build_router};
use tokio::net::TcpListener;
use tracing::info;
use waha_observability::{TracingConfig, setup_tracing};

pub async fn start_server(
    config: Config,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let log_level =
        std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let tracing_config = TracingConfig::new(
        "waha-gateway",
        &log_level,
        config.log_format.as_deref(),
    );
    setup_tracing(tracing_config)?;

    let state = AppState::from_config(&config)?;
    let bridge = state.bridge.clone();
    let streams = state.shutdown.clone();
    let router = build_router(state);

    let listener =
        TcpListener::bind(format!("0.0.0.0:{}", config.http_port)).await?;
    info!("start server on port {:?}", config.http_port);
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            info!("shutdown signal received; closing event streams");
            streams.cancel();
        })
        .await?;
    bridge.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(
            tokio::signal::unix::SignalKind::terminate(),
        )
        .expect("failed to install signal handler")
        .recv()
        .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
