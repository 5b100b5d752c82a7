use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::trace;

use super::{Inbound, Transport, TransportError, TransportKind};

/// One side of a cross-window message channel.
#[derive(Debug)]
pub struct WindowEndpoint {
    tx: mpsc::UnboundedSender<Inbound>,
    rx: mpsc::UnboundedReceiver<Inbound>,
}

/// Creates two connected endpoints. Frames arrive in the order they were sent.
pub fn window_pair() -> (WindowEndpoint, WindowEndpoint) {
    let (left_tx, right_rx) = mpsc::unbounded_channel();
    let (right_tx, left_rx) = mpsc::unbounded_channel();
    (
        WindowEndpoint {
            tx: left_tx,
            rx: left_rx,
        },
        WindowEndpoint {
            tx: right_tx,
            rx: right_rx,
        },
    )
}

pub struct WindowTransport {
    tx: mpsc::UnboundedSender<Inbound>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<Inbound>>>,
}

impl WindowTransport {
    pub fn new(endpoint: WindowEndpoint) -> Self {
        Self {
            tx: endpoint.tx,
            rx: Mutex::new(Some(endpoint.rx)),
        }
    }
}

#[async_trait]
impl Transport for WindowTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::WindowChannel
    }

    async fn send(&self, frame: Bytes) -> Result<(), TransportError> {
        trace!(target = "replica_sync.transport.window", bytes = frame.len(), "send");
        self.tx
            .send(Inbound::Frame(frame))
            .map_err(|_| TransportError::Closed)
    }

    fn subscribe(&self) -> Result<mpsc::UnboundedReceiver<Inbound>, TransportError> {
        self.rx.lock().take().ok_or(TransportError::AlreadySubscribed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_timeout::tokio_timeout_test]
    async fn frames_arrive_in_order_on_the_other_side() {
        let (left, right) = window_pair();
        let left = WindowTransport::new(left);
        let right = WindowTransport::new(right);
        let mut inbox = right.subscribe().unwrap();

        for i in 0..5u8 {
            left.send(Bytes::from(vec![i])).await.unwrap();
        }
        for i in 0..5u8 {
            assert_eq!(inbox.recv().await, Some(Inbound::Frame(Bytes::from(vec![i]))));
        }
        assert!(matches!(right.subscribe(), Err(TransportError::AlreadySubscribed)));
    }

    #[test_timeout::tokio_timeout_test]
    async fn sending_to_a_dropped_peer_fails() {
        let (left, right) = window_pair();
        let left = WindowTransport::new(left);
        drop(right);
        assert!(matches!(
            left.send(Bytes::from_static(b"x")).await,
            Err(TransportError::Closed)
        ));
    }
}
