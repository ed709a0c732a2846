#[derive(thiserror::Error, Debug)]
pub enum BridgeError {
    #[error("Invalid upstream url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("Unsupported upstream scheme: {0}")]
    UnsupportedScheme(String),
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("Transport closed")]
    Closed,
}

/// Failure of a single subscriber to accept an envelope. Contained by the
/// bus; never affects delivery to other subscribers.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("consumer closed")]
    Closed,
    #[error("consumer full")]
    Full,
    #[error("subscriber panicked")]
    Panicked,
    #[error("Error: {0}")]
    Other(String),
}
