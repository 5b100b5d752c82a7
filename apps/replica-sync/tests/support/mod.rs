#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use replica_sync::config::SyncConfig;
use replica_sync::model::{Door, DoorOrientation, MapConfig, Snapshot, Token};
use replica_sync::protocol::{self, Message};
use replica_sync::replica::ReplicaHandle;
use replica_sync::transport::{Inbound, Transport, TransportError, TransportKind};
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};

pub fn config() -> SyncConfig {
    SyncConfig::default()
}

/// Three tokens, one closed door and a map.
pub fn scene() -> Snapshot {
    Snapshot {
        tokens: vec![
            Token::new("t1", 0.0, 0.0, "fighter.png"),
            Token::new("t2", 10.0, 10.0, "scout.png"),
            Token::new("t3", 20.0, 20.0, "goblin.png"),
        ],
        doors: vec![Door {
            id: "d1".into(),
            x: 100.0,
            y: 100.0,
            orientation: DoorOrientation::Horizontal,
            is_open: false,
            is_locked: false,
            size: 50.0,
        }],
        map: Some(MapConfig {
            src: "crypt.png".into(),
            x: 0.0,
            y: 0.0,
            width: 1600.0,
            height: 1200.0,
            scale: 1.0,
        }),
        ..Default::default()
    }
}

/// Next decoded message from a raw peer inbox.
pub async fn next_message(inbox: &mut mpsc::UnboundedReceiver<Inbound>) -> Message {
    match timeout(Duration::from_secs(2), inbox.recv()).await {
        Ok(Some(Inbound::Frame(frame))) => protocol::decode(&frame).expect("decodable frame"),
        other => panic!("expected a frame, got {other:?}"),
    }
}

pub async fn wait_for_sync(handle: &ReplicaHandle) {
    for _ in 0..400 {
        if handle.is_synchronized() {
            return;
        }
        sleep(Duration::from_millis(5)).await;
    }
    panic!("{:?} never synchronized", handle.role());
}

/// Lets every pending trailing pass run.
pub async fn settle() {
    sleep(Duration::from_millis(200)).await;
}

/// Transport that records frames and can be told to fail sends.
pub struct FlakyTransport {
    pub failing: AtomicBool,
    attempts: AtomicUsize,
    fail_attempt: AtomicUsize,
    pub sent: Mutex<Vec<Message>>,
    inbox: Mutex<Option<mpsc::UnboundedReceiver<Inbound>>>,
    feed: Mutex<Option<mpsc::UnboundedSender<Inbound>>>,
}

impl FlakyTransport {
    pub fn new() -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            failing: AtomicBool::new(false),
            attempts: AtomicUsize::new(0),
            fail_attempt: AtomicUsize::new(0),
            sent: Mutex::new(Vec::new()),
            inbox: Mutex::new(Some(rx)),
            feed: Mutex::new(Some(tx)),
        })
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Fails only the `nth` send attempt counted from now, starting at 1.
    pub fn fail_nth_send(&self, nth: usize) {
        let done = self.attempts.load(Ordering::SeqCst);
        self.fail_attempt.store(done + nth, Ordering::SeqCst);
    }

    pub fn sent_kinds(&self) -> Vec<&'static str> {
        self.sent.lock().iter().map(|message| message.wire_kind()).collect()
    }
}

#[async_trait]
impl Transport for FlakyTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::WindowChannel
    }

    async fn send(&self, frame: Bytes) -> Result<(), TransportError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if self.failing.load(Ordering::SeqCst)
            || attempt == self.fail_attempt.load(Ordering::SeqCst)
        {
            return Err(TransportError::Closed);
        }
        self.sent.lock().push(protocol::decode(&frame)?);
        Ok(())
    }

    fn subscribe(&self) -> Result<mpsc::UnboundedReceiver<Inbound>, TransportError> {
        self.inbox.lock().take().ok_or(TransportError::AlreadySubscribed)
    }
}
