use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use crate::envelope::EventEnvelope;
use crate::error::DeliveryError;

pub const DEFAULT_BUFFER_CAPACITY: usize = 200;
pub const DEFAULT_REPLAY_LIMIT: usize = 50;

/// Receiver side of a bus subscription.
///
/// `deliver` runs synchronously inside [`EventBus::publish`], so it must not
/// block or publish back into the same bus.
pub trait EventSink: Send + Sync {
    fn deliver(
        &self,
        envelope: &Arc<EventEnvelope>,
    ) -> Result<(), DeliveryError>;
}

impl<F> EventSink for F
where
    F: Fn(&Arc<EventEnvelope>) -> Result<(), DeliveryError> + Send + Sync,
{
    fn deliver(
        &self,
        envelope: &Arc<EventEnvelope>,
    ) -> Result<(), DeliveryError> {
        self(envelope)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(u64);

impl SubscriptionHandle {
    pub fn id(&self) -> u64 {
        self.0
    }
}

type Subscriber = (SubscriptionHandle, Arc<dyn EventSink>);

struct BusState {
    /// Newest first.
    buffer: VecDeque<Arc<EventEnvelope>>,
    subscribers: Vec<Subscriber>,
    next_id: u64,
}

/// In-process pub/sub hub with a bounded replay buffer.
pub struct EventBus {
    capacity: usize,
    /// Serializes dispatch so every subscriber sees publish order.
    dispatch: Mutex<()>,
    state: Mutex<BusState>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            dispatch: Mutex::new(()),
            state: Mutex::new(BusState {
                buffer: VecDeque::with_capacity(capacity),
                subscribers: Vec::new(),
                next_id: 1,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Buffers the envelope, then notifies every live subscriber in
    /// subscription order. Returns how many subscribers accepted it.
    pub fn publish(&self, envelope: EventEnvelope) -> usize {
        let envelope = Arc::new(envelope);
        let _order = lock(&self.dispatch);
        let subscribers = {
            let mut state = lock(&self.state);
            state.buffer.push_front(envelope.clone());
            state.buffer.truncate(self.capacity);
            state.subscribers.clone()
        };
        let mut delivered = 0;
        for (handle, sink) in &subscribers {
            if deliver_isolated(*handle, sink.as_ref(), &envelope) {
                delivered += 1;
            }
        }
        delivered
    }

    pub fn subscribe(&self, sink: Arc<dyn EventSink>) -> SubscriptionHandle {
        let mut state = lock(&self.state);
        register(&mut state, sink)
    }

    /// Registers `sink` and hands it the most recent `limit` envelopes
    /// (oldest first) before any live envelope can reach it.
    pub fn subscribe_with_replay(
        &self,
        sink: Arc<dyn EventSink>,
        limit: usize,
    ) -> SubscriptionHandle {
        let _order = lock(&self.dispatch);
        let (handle, backlog) = {
            let mut state = lock(&self.state);
            let backlog = snapshot(&state, limit);
            (register(&mut state, sink.clone()), backlog)
        };
        for envelope in &backlog {
            if !deliver_isolated(handle, sink.as_ref(), envelope) {
                break;
            }
        }
        handle
    }

    /// Removes the subscription. Unknown or already removed handles are a
    /// no-op. Returns whether anything was removed.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        let mut state = lock(&self.state);
        let before = state.subscribers.len();
        state.subscribers.retain(|(h, _)| *h != handle);
        before != state.subscribers.len()
    }

    /// Up to `limit` most recent envelopes, oldest first.
    pub fn recent_events(&self, limit: usize) -> Vec<Arc<EventEnvelope>> {
        snapshot(&lock(&self.state), limit)
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.state).subscribers.len()
    }

    pub fn buffered(&self) -> usize {
        lock(&self.state).buffer.len()
    }
}

fn register(
    state: &mut BusState,
    sink: Arc<dyn EventSink>,
) -> SubscriptionHandle {
    let handle = SubscriptionHandle(state.next_id);
    state.next_id += 1;
    state.subscribers.push((handle, sink));
    handle
}

fn snapshot(state: &BusState, limit: usize) -> Vec<Arc<EventEnvelope>> {
    let mut out: Vec<_> = state.buffer.iter().take(limit).cloned().collect();
    out.reverse();
    out
}

fn deliver_isolated(
    handle: SubscriptionHandle,
    sink: &dyn EventSink,
    envelope: &Arc<EventEnvelope>,
) -> bool {
    match catch_unwind(AssertUnwindSafe(|| sink.deliver(envelope))) {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            debug!(
                subscription = handle.0,
                id = %envelope.id,
                error = %e,
                "subscriber rejected event"
            );
            false
        }
        Err(_) => {
            warn!(
                subscription = handle.0,
                id = %envelope.id,
                "subscriber panicked during delivery"
            );
            false
        }
    }
}

pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}
