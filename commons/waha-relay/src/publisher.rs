use futures_util::Stream;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

use crate::bus::{
    DEFAULT_REPLAY_LIMIT, EventBus, EventSink, SubscriptionHandle, lock,
};
use crate::envelope::EventEnvelope;
use crate::error::DeliveryError;

pub const DEFAULT_KEEPALIVE: Duration = Duration::from_secs(25);
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// One unit written to a consumer's outbound stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamFrame {
    Event(Arc<EventEnvelope>),
    KeepAlive,
}

#[derive(Debug, Clone)]
pub struct PublisherOptions {
    pub replay_limit: usize,
    pub keepalive: Duration,
    pub channel_capacity: usize,
}

impl Default for PublisherOptions {
    fn default() -> Self {
        Self {
            replay_limit: DEFAULT_REPLAY_LIMIT,
            keepalive: DEFAULT_KEEPALIVE,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

struct PublisherInner {
    bus: Arc<EventBus>,
    /// Taken on close so the consumer side observes end-of-stream.
    tx: Mutex<Option<mpsc::Sender<StreamFrame>>>,
    closed: AtomicBool,
    subscription: Mutex<Option<SubscriptionHandle>>,
    keepalive: Mutex<Option<JoinHandle<()>>>,
}

impl PublisherInner {
    fn write(&self, frame: StreamFrame) -> Result<(), DeliveryError> {
        let sent = match lock(&self.tx).as_ref() {
            Some(tx) => tx.try_send(frame),
            None => return Err(DeliveryError::Closed),
        };
        match sent {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                debug!("stream consumer is not keeping up; closing");
                self.close();
                Err(DeliveryError::Full)
            }
            Err(TrySendError::Closed(_)) => {
                self.close();
                Err(DeliveryError::Closed)
            }
        }
    }

    /// Runs the teardown exactly once, whichever path gets here first.
    fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        if let Some(task) = lock(&self.keepalive).take() {
            task.abort();
        }
        if let Some(handle) = lock(&self.subscription).take() {
            self.bus.unsubscribe(handle);
        }
        lock(&self.tx).take();
        debug!("stream publisher closed");
        true
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl EventSink for PublisherInner {
    fn deliver(
        &self,
        envelope: &Arc<EventEnvelope>,
    ) -> Result<(), DeliveryError> {
        self.write(StreamFrame::Event(envelope.clone()))
    }
}

/// Per-consumer adapter: replay, then live events, plus keepalives, as a
/// stream of [`StreamFrame`]s. Dropping it tears the subscription down.
pub struct StreamPublisher {
    inner: Arc<PublisherInner>,
    rx: mpsc::Receiver<StreamFrame>,
}

impl StreamPublisher {
    /// Must be called inside a tokio runtime (spawns the keepalive timer).
    pub fn attach(bus: Arc<EventBus>, options: PublisherOptions) -> Self {
        let capacity = options.channel_capacity.max(options.replay_limit + 1);
        let (tx, rx) = mpsc::channel(capacity);
        let inner = Arc::new(PublisherInner {
            bus: bus.clone(),
            tx: Mutex::new(Some(tx)),
            closed: AtomicBool::new(false),
            subscription: Mutex::new(None),
            keepalive: Mutex::new(None),
        });

        let handle =
            bus.subscribe_with_replay(inner.clone(), options.replay_limit);
        *lock(&inner.subscription) = Some(handle);
        if inner.is_closed() {
            // closed during replay, before the handle was recorded
            if let Some(handle) = lock(&inner.subscription).take() {
                bus.unsubscribe(handle);
            }
        } else {
            let task = tokio::spawn(keepalive_loop(
                Arc::downgrade(&inner),
                options.keepalive,
            ));
            *lock(&inner.keepalive) = Some(task);
            if inner.is_closed() {
                if let Some(task) = lock(&inner.keepalive).take() {
                    task.abort();
                }
            }
        }
        debug!(subscription = handle.id(), "stream publisher attached");
        Self { inner, rx }
    }

    /// Explicit cancellation; same teardown as a write failure.
    pub fn close(&self) {
        self.inner.close();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    pub async fn recv(&mut self) -> Option<StreamFrame> {
        self.rx.recv().await
    }
}

impl Stream for StreamPublisher {
    type Item = StreamFrame;

    fn poll_next(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

impl Drop for StreamPublisher {
    fn drop(&mut self) {
        self.inner.close();
    }
}

async fn keepalive_loop(inner: Weak<PublisherInner>, period: Duration) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let Some(inner) = inner.upgrade() else {
            break;
        };
        if inner.write(StreamFrame::KeepAlive).is_err() {
            break;
        }
    }
}
