//! Per-replica sync engine and the handle the host drives it through.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::config::SyncConfig;
use crate::model::Measurement;
use crate::store::SessionStore;
use crate::sync::{SyncStats, SyncStatsSnapshot};
use crate::transport::{Transport, TransportKind};

mod engine;
pub mod policy;

use engine::{Command, SyncEngine};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Control surface; owns the authoritative session state.
    Primary,
    /// Display-only view kept in step with the primary.
    Mirror,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Primary => f.write_str("primary"),
            Role::Mirror => f.write_str("mirror"),
        }
    }
}

/// Starts the sync engine for one replica on the current tokio runtime.
///
/// Without a transport the replica runs standalone: the store keeps working
/// and nothing is sent.
pub fn spawn(
    role: Role,
    store: Arc<SessionStore>,
    transport: Option<Arc<dyn Transport>>,
    config: &SyncConfig,
) -> ReplicaHandle {
    let stats = Arc::new(SyncStats::new(&role.to_string()));
    let synchronized = Arc::new(AtomicBool::new(role == Role::Primary));
    let transport_kind = transport.as_ref().map(|transport| transport.kind());
    let (commands, rx) = mpsc::unbounded_channel();
    let engine = SyncEngine::new(
        role,
        store.clone(),
        transport,
        config,
        stats.clone(),
        synchronized.clone(),
    );
    let task = tokio::spawn(engine.run(rx));
    ReplicaHandle {
        role,
        store,
        transport_kind,
        commands,
        stats,
        synchronized,
        task,
    }
}

pub struct ReplicaHandle {
    role: Role,
    store: Arc<SessionStore>,
    transport_kind: Option<TransportKind>,
    commands: mpsc::UnboundedSender<Command>,
    stats: Arc<SyncStats>,
    synchronized: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl ReplicaHandle {
    pub fn role(&self) -> Role {
        self.role
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// Transport chosen at startup, `None` when running standalone.
    pub fn transport_kind(&self) -> Option<TransportKind> {
        self.transport_kind
    }

    pub fn stats(&self) -> SyncStatsSnapshot {
        self.stats.snapshot()
    }

    /// A primary is always synchronized; a mirror once its first full state
    /// has arrived.
    pub fn is_synchronized(&self) -> bool {
        self.synchronized.load(Ordering::SeqCst)
    }

    /// Toggles a door and sends the new state immediately. Returns the new
    /// open state, or `None` for an unknown door.
    pub async fn toggle_door(&self, id: impl Into<String>) -> Option<bool> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::ToggleDoor {
                id: id.into(),
                reply,
            })
            .ok()?;
        rx.await.ok().flatten()
    }

    /// Updates the measurement overlay and sends it immediately.
    pub fn set_measurement(&self, measurement: Option<Measurement>) {
        let _ = self.commands.send(Command::SetMeasurement(measurement));
    }

    /// Runs a pending trailing pass now instead of at its deadline.
    pub async fn flush(&self) {
        let (done, rx) = oneshot::channel();
        if self.commands.send(Command::Flush(done)).is_ok() {
            let _ = rx.await;
        }
    }

    /// Flushes pending changes and stops the engine.
    pub async fn shutdown(self) {
        let (done, rx) = oneshot::channel();
        if self.commands.send(Command::Shutdown(done)).is_ok() {
            let _ = rx.await;
        }
        let _ = self.task.await;
    }
}

impl fmt::Debug for ReplicaHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplicaHandle")
            .field("role", &self.role)
            .field("transport", &self.transport_kind)
            .field("synchronized", &self.is_synchronized())
            .finish_non_exhaustive()
    }
}
