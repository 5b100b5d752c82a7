use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use replica_bus::{Bus, BusError, BusMessage, PeerId, recv_foreign};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use super::{Inbound, Transport, TransportError, TransportKind};

/// Transport over a same-origin publish/subscribe bus. Frames this peer
/// publishes are never delivered back to it.
pub struct BroadcastTransport {
    bus: Arc<dyn Bus>,
    channel: String,
    peer: PeerId,
    pending: Mutex<Option<broadcast::Receiver<BusMessage>>>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl BroadcastTransport {
    /// Joins `channel` immediately so frames published after construction
    /// are buffered until [`Transport::subscribe`] is called.
    pub fn new(bus: Arc<dyn Bus>, channel: impl Into<String>) -> Self {
        let channel = channel.into();
        let receiver = bus.subscribe(&channel);
        Self {
            bus,
            channel,
            peer: PeerId::next(),
            pending: Mutex::new(Some(receiver)),
            pump: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Transport for BroadcastTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Broadcast
    }

    async fn send(&self, frame: Bytes) -> Result<(), TransportError> {
        let reached = self.bus.publish(&self.channel, self.peer, frame)?;
        trace!(
            target = "replica_sync.transport.broadcast",
            channel = %self.channel,
            reached,
            "published"
        );
        Ok(())
    }

    fn subscribe(&self) -> Result<mpsc::UnboundedReceiver<Inbound>, TransportError> {
        let mut receiver = self
            .pending
            .lock()
            .take()
            .ok_or(TransportError::AlreadySubscribed)?;
        let (tx, rx) = mpsc::unbounded_channel();
        let me = self.peer;
        let channel = self.channel.clone();
        let handle = tokio::spawn(async move {
            loop {
                let item = match recv_foreign(&mut receiver, me).await {
                    Ok(message) => Inbound::Frame(message.payload),
                    Err(BusError::Lagged(skipped)) => {
                        warn!(
                            target = "replica_sync.transport.broadcast",
                            channel = %channel,
                            skipped,
                            "receiver lagged"
                        );
                        Inbound::Lagged(skipped)
                    }
                    Err(err) => {
                        debug!(
                            target = "replica_sync.transport.broadcast",
                            channel = %channel,
                            error = %err,
                            "bus receiver finished"
                        );
                        break;
                    }
                };
                if tx.send(item).is_err() {
                    break;
                }
            }
        });
        *self.pump.lock() = Some(handle);
        Ok(rx)
    }
}

impl Drop for BroadcastTransport {
    fn drop(&mut self) {
        if let Some(handle) = self.pump.lock().take() {
            handle.abort();
        }
    }
}
