//! Same-origin publish/subscribe bus shared by replicas living in one runtime.
//!
//! Every publisher stamps frames with its [`PeerId`]; subscribers use
//! [`BusMessage::is_from`] to drop their own publications, matching the
//! semantics of a browser broadcast channel where a sender never hears itself.

use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::broadcast;

const DEFAULT_CAPACITY: usize = 256;

static NEXT_PEER: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerId(pub u64);

impl PeerId {
    /// Allocates a process-unique peer id.
    pub fn next() -> Self {
        PeerId(NEXT_PEER.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub topic: String,
    pub origin: PeerId,
    pub payload: Bytes,
}

impl BusMessage {
    pub fn is_from(&self, peer: PeerId) -> bool {
        self.origin == peer
    }
}

#[derive(Debug, Error)]
pub enum BusError {
    #[error("bus channel closed")]
    Closed,
    #[error("bus receiver lagged, {0} frames dropped")]
    Lagged(u64),
}

pub type BusResult<T> = Result<T, BusError>;

pub trait Bus: Send + Sync {
    fn subscribe(&self, topic: &str) -> broadcast::Receiver<BusMessage>;
    /// Publishes a frame and returns how many subscribers it reached. Publishing
    /// to a topic nobody listens on is not an error.
    fn publish(&self, topic: &str, origin: PeerId, payload: Bytes) -> BusResult<usize>;
}

/// In-process bus with one broadcast channel per topic.
#[derive(Debug)]
pub struct LocalBus {
    capacity: usize,
    topics: parking_lot::RwLock<std::collections::HashMap<String, broadcast::Sender<BusMessage>>>,
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            topics: parking_lot::RwLock::new(std::collections::HashMap::new()),
        }
    }

    fn sender_for(&self, topic: &str) -> broadcast::Sender<BusMessage> {
        if let Some(sender) = self.topics.read().get(topic) {
            return sender.clone();
        }
        let mut guard = self.topics.write();
        guard
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .read()
            .get(topic)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }
}

impl Bus for LocalBus {
    fn subscribe(&self, topic: &str) -> broadcast::Receiver<BusMessage> {
        self.sender_for(topic).subscribe()
    }

    fn publish(&self, topic: &str, origin: PeerId, payload: Bytes) -> BusResult<usize> {
        let sender = self.sender_for(topic);
        if sender.receiver_count() == 0 {
            return Ok(0);
        }
        sender
            .send(BusMessage {
                topic: topic.to_string(),
                origin,
                payload,
            })
            .map_err(|_| BusError::Closed)
    }
}

/// Waits for the next frame on `rx` that was not published by `me`.
pub async fn recv_foreign(
    rx: &mut broadcast::Receiver<BusMessage>,
    me: PeerId,
) -> BusResult<BusMessage> {
    loop {
        match rx.recv().await {
            Ok(msg) if msg.is_from(me) => continue,
            Ok(msg) => return Ok(msg),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                return Err(BusError::Lagged(skipped));
            }
            Err(broadcast::error::RecvError::Closed) => return Err(BusError::Closed),
        }
    }
}
