use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::debug;
use url::Url;

use crate::error::BridgeError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Bytes),
    Ping,
    Pong,
    Close,
}

/// One live upstream connection. Dropped (never reused) when the session
/// ends.
#[async_trait::async_trait]
pub trait Transport: Send {
    /// `None` once the peer is gone.
    async fn next_frame(&mut self) -> Option<Result<Frame, BridgeError>>;

    async fn ping(&mut self) -> Result<(), BridgeError>;

    async fn close(&mut self);
}

#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        url: &Url,
    ) -> Result<Box<dyn Transport>, BridgeError>;
}

/// WebSocket connector backed by `tokio-tungstenite`.
#[derive(Debug, Clone, Default)]
pub struct WsConnector;

#[async_trait::async_trait]
impl Connector for WsConnector {
    async fn connect(
        &self,
        url: &Url,
    ) -> Result<Box<dyn Transport>, BridgeError> {
        let (ws, resp) = tokio_tungstenite::connect_async(url.as_str()).await?;
        debug!(status = %resp.status(), "websocket handshake complete");
        Ok(Box::new(WsTransport { ws }))
    }
}

struct WsTransport {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait::async_trait]
impl Transport for WsTransport {
    async fn next_frame(&mut self) -> Option<Result<Frame, BridgeError>> {
        loop {
            let msg = match self.ws.next().await? {
                Ok(msg) => msg,
                Err(e) => return Some(Err(e.into())),
            };
            let frame = match msg {
                Message::Text(text) => Frame::Text(text.as_str().to_owned()),
                Message::Binary(data) => Frame::Binary(data),
                Message::Ping(_) => Frame::Ping,
                Message::Pong(_) => Frame::Pong,
                Message::Close(reason) => {
                    debug!(?reason, "upstream sent close frame");
                    Frame::Close
                }
                Message::Frame(_) => continue,
            };
            return Some(Ok(frame));
        }
    }

    async fn ping(&mut self) -> Result<(), BridgeError> {
        self.ws.send(Message::Ping(Bytes::new())).await?;
        Ok(())
    }

    async fn close(&mut self) {
        let _ = self.ws.close(None).await;
    }
}
