use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use replica_bus::{Bus, BusError};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::protocol::{self, Message, ProtocolError};

pub mod broadcast;
pub mod window;

pub use broadcast::BroadcastTransport;
pub use window::{WindowEndpoint, WindowTransport, window_pair};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Paired duplex channel between two windows of the same host.
    WindowChannel,
    /// Same-origin publish/subscribe bus.
    Broadcast,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::WindowChannel => f.write_str("window"),
            TransportKind::Broadcast => f.write_str("broadcast"),
        }
    }
}

/// Item delivered to a transport subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Frame(Bytes),
    /// The underlying channel dropped this many frames.
    Lagged(u64),
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport closed")]
    Closed,
    #[error("transport already has a subscriber")]
    AlreadySubscribed,
    #[error(transparent)]
    Bus(#[from] BusError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Bidirectional frame channel to the peer replica.
#[async_trait]
pub trait Transport: Send + Sync {
    fn kind(&self) -> TransportKind;

    async fn send(&self, frame: Bytes) -> Result<(), TransportError>;

    /// Hands out the receive stream. A transport has exactly one subscriber.
    fn subscribe(&self) -> Result<mpsc::UnboundedReceiver<Inbound>, TransportError>;

    /// Asks the peer for its full state.
    async fn request_bootstrap(&self) -> Result<(), TransportError> {
        let frame = protocol::encode(&Message::RequestInitialState)?;
        self.send(frame).await
    }
}

/// Encodes and sends one message, returning the encoded size.
pub async fn send_message(
    transport: &dyn Transport,
    message: &Message,
) -> Result<usize, TransportError> {
    let frame = protocol::encode(message)?;
    let len = frame.len();
    transport.send(frame).await?;
    Ok(len)
}

/// Drives `handler` with every inbound item from a background task until the
/// transport closes.
pub fn on_receive<F>(
    transport: &dyn Transport,
    mut handler: F,
) -> Result<JoinHandle<()>, TransportError>
where
    F: FnMut(Inbound) + Send + 'static,
{
    let mut rx = transport.subscribe()?;
    Ok(tokio::spawn(async move {
        while let Some(item) = rx.recv().await {
            handler(item);
        }
    }))
}

/// What the host offers at startup.
#[derive(Default)]
pub struct TransportProbe {
    pub window_channel_available: bool,
    pub window: Option<WindowEndpoint>,
    pub bus: Option<Arc<dyn Bus>>,
    pub channel: String,
}

/// Picks the transport once at startup: the window channel when the host
/// signals it and supplies an endpoint, then the broadcast bus, else none.
pub fn select(probe: TransportProbe) -> Option<Arc<dyn Transport>> {
    let TransportProbe {
        window_channel_available,
        window,
        bus,
        channel,
    } = probe;

    if window_channel_available {
        if let Some(endpoint) = window {
            info!(target = "replica_sync.transport", kind = %TransportKind::WindowChannel, "transport selected");
            return Some(Arc::new(WindowTransport::new(endpoint)));
        }
    }
    if let Some(bus) = bus {
        info!(
            target = "replica_sync.transport",
            kind = %TransportKind::Broadcast,
            channel = %channel,
            "transport selected"
        );
        return Some(Arc::new(BroadcastTransport::new(bus, channel)));
    }
    debug!(target = "replica_sync.transport", "no transport available; running standalone");
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use replica_bus::LocalBus;

    #[test_timeout::tokio_timeout_test]
    async fn window_is_preferred_when_signalled() {
        let (left, _right) = window_pair();
        let transport = select(TransportProbe {
            window_channel_available: true,
            window: Some(left),
            bus: Some(Arc::new(LocalBus::new())),
            channel: "test".into(),
        })
        .expect("transport");
        assert_eq!(transport.kind(), TransportKind::WindowChannel);
    }

    #[test_timeout::tokio_timeout_test]
    async fn falls_back_to_bus_without_signal() {
        let (left, _right) = window_pair();
        let transport = select(TransportProbe {
            window_channel_available: false,
            window: Some(left),
            bus: Some(Arc::new(LocalBus::new())),
            channel: "test".into(),
        })
        .expect("transport");
        assert_eq!(transport.kind(), TransportKind::Broadcast);
    }

    #[test_timeout::timeout]
    fn nothing_available_disables_sync() {
        let selected = select(TransportProbe {
            window_channel_available: true,
            ..Default::default()
        });
        assert!(selected.is_none());
    }

    #[test_timeout::tokio_timeout_test]
    async fn on_receive_forwards_frames_to_handler() {
        let (left, right) = window_pair();
        let sender = WindowTransport::new(left);
        let receiver = WindowTransport::new(right);
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
        let _task = on_receive(&receiver, move |item| {
            let _ = seen_tx.send(item);
        })
        .unwrap();

        sender.request_bootstrap().await.unwrap();
        match seen_rx.recv().await {
            Some(Inbound::Frame(frame)) => {
                assert_eq!(protocol::decode(&frame).unwrap(), Message::RequestInitialState);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
