//! Realtime relay between the WAHA provider feed and browser streams.
//!
//! Data flows `provider -> UpstreamBridge -> EventBus -> StreamPublisher*`.

pub mod bridge;
pub mod bus;
pub mod envelope;
pub mod error;
pub mod publisher;

pub use bridge::{BridgeConfig, BridgeState, BridgeStatus, UpstreamBridge};
pub use bus::{EventBus, EventSink, SubscriptionHandle};
pub use envelope::{EventEnvelope, normalize};
pub use error::{BridgeError, DeliveryError};
pub use publisher::{PublisherOptions, StreamFrame, StreamPublisher};
