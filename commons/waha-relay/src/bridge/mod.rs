//! Upstream bridge: owns the single realtime connection to the provider,
//! turns inbound frames into envelopes and publishes them on the bus.
//!
//! Lifecycle: `Idle -> Connecting -> Open -> Closing -> ReconnectPending ->
//! Connecting ...` for as long as the process runs. `Stopped` is only
//! reached through [`UpstreamBridge::shutdown`].

mod backoff;
mod config;
mod transport;

pub use backoff::Backoff;
pub use config::{API_KEY_PARAM, BridgeConfig, redact};
pub use transport::{Connector, Frame, Transport, WsConnector};

use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::bus::{EventBus, lock};
use crate::envelope::{EventEnvelope, normalize};
use crate::error::BridgeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BridgeState {
    Idle,
    Connecting,
    Open,
    Closing,
    ReconnectPending,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeStatus {
    pub started: bool,
    pub connected: bool,
    /// Feed address with the access key masked.
    pub url: String,
    pub state: BridgeState,
    /// Delay before the next reconnect attempt.
    pub backoff_ms: u64,
}

enum SessionEnd {
    Closed,
    Failed(BridgeError),
    Cancelled,
}

pub struct UpstreamBridge {
    config: BridgeConfig,
    url: Url,
    redacted_url: String,
    suppressed: Vec<String>,
    bus: Arc<EventBus>,
    connector: Arc<dyn Connector>,
    started: AtomicBool,
    state: watch::Sender<BridgeState>,
    backoff_ms: AtomicU64,
    token: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl UpstreamBridge {
    /// Bridge over a real websocket connection.
    pub fn new(
        config: BridgeConfig,
        bus: Arc<EventBus>,
    ) -> Result<Self, BridgeError> {
        Self::with_connector(config, bus, Arc::new(WsConnector))
    }

    pub fn with_connector(
        config: BridgeConfig,
        bus: Arc<EventBus>,
        connector: Arc<dyn Connector>,
    ) -> Result<Self, BridgeError> {
        let url = config.feed_url()?;
        let redacted_url = redact(&url);
        let (state, _) = watch::channel(BridgeState::Idle);
        Ok(Self {
            suppressed: config.suppressed_events(),
            backoff_ms: AtomicU64::new(config.backoff_floor_ms),
            config,
            url,
            redacted_url,
            bus,
            connector,
            started: AtomicBool::new(false),
            state,
            token: CancellationToken::new(),
            task: Mutex::new(None),
        })
    }

    /// Starts the connection loop once. Later calls are no-ops; returns
    /// whether this call did the start.
    pub fn ensure_started(self: &Arc<Self>) -> bool {
        if self.started.swap(true, Ordering::AcqRel) {
            return false;
        }
        if self.token.is_cancelled() {
            return false;
        }
        info!(url = %self.redacted_url, "starting upstream bridge");
        let handle = tokio::spawn(self.clone().run());
        *lock(&self.task) = Some(handle);
        true
    }

    /// Terminal stop: cancels the pending reconnect or open session and
    /// waits for the loop to exit.
    pub async fn shutdown(&self) {
        self.token.cancel();
        let handle = lock(&self.task).take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        self.state.send_replace(BridgeState::Stopped);
        info!("upstream bridge stopped");
    }

    pub fn status(&self) -> BridgeStatus {
        let state = *self.state.borrow();
        BridgeStatus {
            started: self.started.load(Ordering::Acquire),
            connected: state == BridgeState::Open,
            url: self.redacted_url.clone(),
            state,
            backoff_ms: self.backoff_ms.load(Ordering::Relaxed),
        }
    }

    pub fn state(&self) -> BridgeState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<BridgeState> {
        self.state.subscribe()
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Parse one inbound text frame and publish every surviving envelope.
    /// Returns the number published; malformed frames publish nothing.
    pub fn ingest(&self, text: &str) -> usize {
        let parsed: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                debug!(error = %e, "dropping malformed upstream frame");
                return 0;
            }
        };
        let items = match parsed {
            Value::Array(items) => {
                debug!(count = items.len(), "received upstream event batch");
                items
            }
            other => vec![other],
        };
        let mut published = 0;
        for item in items {
            if !item.is_object() {
                debug!("dropping non-object upstream event");
                continue;
            }
            let envelope = normalize(item);
            if self.is_redundant(&envelope) {
                debug!(
                    event = ?envelope.event_type,
                    id = %envelope.id,
                    "skipping redundant generic event"
                );
                continue;
            }
            debug!(
                event = ?envelope.event_type,
                id = %envelope.id,
                "publishing upstream event"
            );
            self.bus.publish(envelope);
            published += 1;
        }
        published
    }

    /// The provider emits a generic class (e.g. `message.any`) alongside the
    /// specific one for every message; the generic copy is dropped outright.
    fn is_redundant(&self, envelope: &EventEnvelope) -> bool {
        envelope
            .event_type()
            .is_some_and(|t| self.suppressed.iter().any(|s| s == t))
    }

    fn set_state(&self, state: BridgeState) {
        self.state.send_replace(state);
    }

    fn record_backoff(&self, delay: Duration) {
        self.backoff_ms
            .store(delay.as_millis() as u64, Ordering::Relaxed);
    }

    async fn run(self: Arc<Self>) {
        let mut backoff = Backoff::new(
            self.config.backoff_floor(),
            self.config.backoff_ceiling(),
        );
        loop {
            self.set_state(BridgeState::Connecting);
            info!(url = %self.redacted_url, "connecting to upstream feed");
            let attempt = tokio::select! {
                res = self.connector.connect(&self.url) => res,
                _ = self.token.cancelled() => break,
            };
            match attempt {
                Ok(transport) => {
                    backoff.reset();
                    self.record_backoff(backoff.peek());
                    self.set_state(BridgeState::Open);
                    info!("upstream feed connected");
                    match self.pump(transport).await {
                        SessionEnd::Closed => info!("upstream feed closed"),
                        SessionEnd::Failed(e) => {
                            warn!(error = %e, "upstream feed failed")
                        }
                        SessionEnd::Cancelled => break,
                    }
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        url = %self.redacted_url,
                        "upstream connect failed"
                    )
                }
            }

            self.set_state(BridgeState::ReconnectPending);
            let delay = backoff.next_delay();
            self.record_backoff(delay);
            info!(
                delay_ms = delay.as_millis() as u64,
                "scheduling upstream reconnect"
            );
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.token.cancelled() => break,
            }
        }
        self.set_state(BridgeState::Stopped);
    }

    async fn pump(&self, mut transport: Box<dyn Transport>) -> SessionEnd {
        let period = self.config.keepalive();
        let mut keepalive =
            tokio::time::interval_at(Instant::now() + period, period);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let end = loop {
            tokio::select! {
                _ = self.token.cancelled() => {
                    self.set_state(BridgeState::Closing);
                    transport.close().await;
                    return SessionEnd::Cancelled;
                }
                _ = keepalive.tick() => {
                    if let Err(e) = transport.ping().await {
                        break SessionEnd::Failed(e);
                    }
                }
                frame = transport.next_frame() => match frame {
                    Some(Ok(Frame::Text(text))) => {
                        self.ingest(&text);
                    }
                    Some(Ok(Frame::Binary(data))) => {
                        match std::str::from_utf8(&data) {
                            Ok(text) => {
                                self.ingest(text);
                            }
                            Err(_) => debug!("dropping non-utf8 binary frame"),
                        }
                    }
                    Some(Ok(Frame::Ping | Frame::Pong)) => {}
                    Some(Ok(Frame::Close)) | None => break SessionEnd::Closed,
                    Some(Err(e)) => break SessionEnd::Failed(e),
                },
            }
        };
        self.set_state(BridgeState::Closing);
        drop(transport);
        end
    }
}
