//! Per-session broadcast bus.
//!
//! Delivery is deliberately weak: fire-and-forget, unordered between
//! subscribers, and lossy for receivers that lag past the channel capacity.
//! The store stays authoritative; anything missed here is recovered by
//! re-reading rows.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::warn;
use uuid::Uuid;

use crate::dto::events::SessionMessage;

/// Registry of per-session broadcast channels. Clones share the registry.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

struct BusInner {
    channels: DashMap<Uuid, broadcast::Sender<SessionMessage>>,
    capacity: usize,
}

impl EventBus {
    /// Create a bus whose channels buffer up to `capacity` messages per
    /// subscriber before older ones are dropped.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                channels: DashMap::new(),
                capacity,
            }),
        }
    }

    fn sender(&self, session_id: Uuid) -> broadcast::Sender<SessionMessage> {
        self.inner
            .channels
            .entry(session_id)
            .or_insert_with(|| broadcast::channel(self.inner.capacity).0)
            .clone()
    }

    /// Send a message to all current subscribers of a session channel.
    /// Delivery failures are non-fatal and never surface to the caller.
    pub fn publish(&self, session_id: Uuid, message: SessionMessage) {
        if self.sender(session_id).send(message).is_err() {
            // Nobody listening; the store remains the source of truth.
            warn!(%session_id, "broadcast dropped: no live subscribers");
        }
    }

    /// Register a new subscriber that will receive subsequent messages.
    pub fn subscribe(&self, session_id: Uuid) -> broadcast::Receiver<SessionMessage> {
        self.sender(session_id).subscribe()
    }

    /// Stream adapter over [`EventBus::subscribe`] for consumers that prefer
    /// `futures::Stream`.
    pub fn stream(&self, session_id: Uuid) -> BroadcastStream<SessionMessage> {
        BroadcastStream::new(self.subscribe(session_id))
    }

    /// Number of live subscribers on a session channel.
    pub fn subscriber_count(&self, session_id: Uuid) -> usize {
        self.inner
            .channels
            .get(&session_id)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }
}
