use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, trace, warn};

use crate::config::SyncConfig;
use crate::model::Measurement;
use crate::protocol::{self, DoorToggle, Message, Operation, ProtocolError};
use crate::store::{SessionStore, Subscription};
use crate::sync::{ApplyOutcome, Baseline, SyncStats, Throttle, ThrottleDecision, apply, detect};
use crate::telemetry::{self, PerfGuard};
use crate::transport::{Inbound, Transport, send_message};

use super::Role;
use super::policy;

pub(crate) enum Command {
    ToggleDoor {
        id: String,
        reply: oneshot::Sender<Option<bool>>,
    },
    SetMeasurement(Option<Measurement>),
    Flush(oneshot::Sender<()>),
    Shutdown(oneshot::Sender<()>),
}

/// One replica's event loop. Owns the baseline; the store is shared with
/// the host.
pub(crate) struct SyncEngine {
    role: Role,
    store: Arc<SessionStore>,
    transport: Option<Arc<dyn Transport>>,
    baseline: Baseline,
    throttle: Throttle,
    bootstrap_deadline: Option<Instant>,
    bootstrap_timeout: std::time::Duration,
    stats: Arc<SyncStats>,
    synchronized: Arc<AtomicBool>,
}

impl SyncEngine {
    pub(crate) fn new(
        role: Role,
        store: Arc<SessionStore>,
        transport: Option<Arc<dyn Transport>>,
        config: &SyncConfig,
        stats: Arc<SyncStats>,
        synchronized: Arc<AtomicBool>,
    ) -> Self {
        Self {
            role,
            store,
            transport,
            baseline: Baseline::new(),
            throttle: Throttle::new(config.throttle_period),
            bootstrap_deadline: None,
            bootstrap_timeout: config.bootstrap_timeout,
            stats,
            synchronized,
        }
    }

    pub(crate) async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        let (tick_tx, mut ticks) = mpsc::unbounded_channel::<()>();
        let _subscription: Subscription = self.store.subscribe(move |_| {
            let _ = tick_tx.send(());
        });

        let mut inbound = match &self.transport {
            Some(transport) => match transport.subscribe() {
                Ok(rx) => Some(rx),
                Err(err) => {
                    warn!(
                        target = "replica_sync.engine",
                        role = %self.role,
                        error = %err,
                        "transport unusable; running standalone"
                    );
                    self.transport = None;
                    None
                }
            },
            None => None,
        };

        self.start().await;

        loop {
            let pass_deadline = self.throttle.deadline();
            let bootstrap_deadline = self.bootstrap_deadline;
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Flush(done)) => {
                        self.flush(&mut ticks).await;
                        let _ = done.send(());
                    }
                    Some(Command::Shutdown(done)) => {
                        self.flush(&mut ticks).await;
                        let _ = done.send(());
                        break;
                    }
                    Some(command) => self.handle_command(command).await,
                    None => {
                        self.flush(&mut ticks).await;
                        break;
                    }
                },
                item = next_inbound(&mut inbound) => match item {
                    Some(Inbound::Frame(frame)) => self.handle_frame(&frame).await,
                    Some(Inbound::Lagged(skipped)) => self.handle_lag(skipped).await,
                    None => {
                        debug!(target = "replica_sync.engine", role = %self.role, "transport closed");
                        inbound = None;
                    }
                },
                Some(()) = ticks.recv() => {
                    let mut burst = false;
                    while ticks.try_recv().is_ok() {
                        burst = true;
                    }
                    self.on_change().await;
                    if burst {
                        // Later changes of the burst still owe a trailing pass.
                        self.on_change().await;
                    }
                }
                _ = sleep_until_some(pass_deadline) => {
                    if self.throttle.fire(Instant::now()) {
                        self.detection_pass().await;
                    }
                }
                _ = sleep_until_some(bootstrap_deadline) => self.bootstrap_expired(),
            }
        }
        debug!(target = "replica_sync.engine", role = %self.role, "engine stopped");
    }

    async fn start(&mut self) {
        let Some(transport) = self.transport.clone() else {
            info!(target = "replica_sync.engine", role = %self.role, "sync disabled; no transport");
            return;
        };
        match self.role {
            Role::Primary => {
                // Send the initial full state for a mirror that is already listening.
                self.on_change().await;
            }
            Role::Mirror => {
                self.bootstrap_deadline = Some(Instant::now() + self.bootstrap_timeout);
                match transport.request_bootstrap().await {
                    Ok(()) => debug!(target = "replica_sync.engine", "bootstrap requested"),
                    Err(err) => warn!(
                        target = "replica_sync.engine",
                        error = %err,
                        "failed to request bootstrap"
                    ),
                }
            }
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::ToggleDoor { id, reply } => {
                let state = self.toggle_door(&id).await;
                let _ = reply.send(state);
            }
            Command::SetMeasurement(measurement) => self.send_measurement(measurement).await,
            Command::Flush(_) | Command::Shutdown(_) => {}
        }
    }

    async fn on_change(&mut self) {
        if self.transport.is_none() {
            return;
        }
        match self.throttle.notify(Instant::now()) {
            ThrottleDecision::Run => self.detection_pass().await,
            ThrottleDecision::Scheduled(at) => {
                trace!(
                    target = "replica_sync.engine",
                    role = %self.role,
                    in_ms = at.saturating_duration_since(Instant::now()).as_millis() as u64,
                    "trailing pass scheduled"
                );
            }
            ThrottleDecision::Coalesced => {}
        }
    }

    /// Runs any pending or not yet noticed pass right away.
    async fn flush(&mut self, ticks: &mut mpsc::UnboundedReceiver<()>) {
        let mut pending = self.throttle.flush(Instant::now());
        while ticks.try_recv().is_ok() {
            pending = true;
        }
        if pending {
            self.detection_pass().await;
        }
    }

    /// Diffs the store against the baseline and sends the result. Each
    /// operation that went out is folded into the baseline, so a pass that
    /// fails halfway resends only the remainder.
    async fn detection_pass(&mut self) {
        let Some(transport) = self.transport.clone() else {
            return;
        };
        if self.role == Role::Mirror && !self.baseline.is_established() {
            trace!(target = "replica_sync.engine", "mirror has no baseline yet; skipping pass");
            return;
        }
        let _perf = PerfGuard::new("sync.detection_pass");
        self.stats.record_pass();

        let current = self.store.snapshot();
        let ops = policy::restrict_outbound(self.role, detect(self.baseline.get(), &current));
        let total = ops.len();

        for op in ops {
            let kind = op.wire_kind();
            let message = Message::Op(op);
            match send_message(transport.as_ref(), &message).await {
                Ok(bytes) => {
                    self.stats.record_sent(bytes);
                    telemetry::record_bytes("sync.frame", bytes);
                    if let Message::Op(sent) = &message {
                        if let Err(err) = self.baseline.absorb(sent) {
                            warn!(target = "replica_sync.engine", kind, error = %err, "baseline could not absorb sent operation");
                        }
                    }
                }
                Err(err) => {
                    warn!(
                        target = "replica_sync.engine",
                        role = %self.role,
                        kind,
                        error = %err,
                        "send failed; unsent changes stay pending"
                    );
                    return;
                }
            }
        }
        if total > 0 {
            debug!(target = "replica_sync.engine", role = %self.role, ops = total, "pass sent");
        }
        self.baseline.commit(current);
    }

    async fn handle_frame(&mut self, frame: &[u8]) {
        let message = match protocol::decode(frame) {
            Ok(message) => message,
            Err(ProtocolError::UnknownKind(kind)) => {
                self.stats.record_ignored();
                warn!(target = "replica_sync.engine", role = %self.role, kind = %kind, "ignoring unknown operation");
                return;
            }
            Err(err) => {
                self.stats.record_ignored();
                warn!(target = "replica_sync.engine", role = %self.role, error = %err, "ignoring undecodable frame");
                return;
            }
        };
        let kind = message.wire_kind();
        let Some(message) = policy::admit_inbound(self.role, message) else {
            self.stats.record_ignored();
            debug!(target = "replica_sync.engine", role = %self.role, kind, "operation not accepted from peer");
            return;
        };
        match message {
            Message::RequestInitialState => self.serve_bootstrap().await,
            Message::Op(op) => self.apply_remote(op),
        }
    }

    async fn serve_bootstrap(&mut self) {
        let Some(transport) = self.transport.clone() else {
            return;
        };
        let snapshot = self.store.snapshot();
        let message = Message::Op(Operation::full_replace(snapshot.clone()));
        match send_message(transport.as_ref(), &message).await {
            Ok(bytes) => {
                self.stats.record_sent(bytes);
                self.stats.record_bootstrap_served();
                // The peer now holds exactly this state.
                self.baseline.commit(snapshot);
                info!(target = "replica_sync.engine", bytes, "bootstrap served");
            }
            Err(err) => warn!(target = "replica_sync.engine", error = %err, "failed to serve bootstrap"),
        }
    }

    fn apply_remote(&mut self, op: Operation) {
        if let Operation::MeasurementUpdate(measurement) = op {
            self.store.set_measurement(measurement);
            self.stats.record_applied();
            return;
        }
        let bootstrap = matches!(op, Operation::FullReplace(_));
        let kind = op.wire_kind();
        match self.store.update(|snapshot| apply(snapshot, &op)) {
            Ok(ApplyOutcome::Applied) => {
                self.stats.record_applied();
                trace!(target = "replica_sync.engine", role = %self.role, kind, "applied");
            }
            Ok(outcome) => {
                debug!(target = "replica_sync.engine", role = %self.role, kind, ?outcome, "operation had no effect");
            }
            Err(err) => {
                warn!(target = "replica_sync.engine", role = %self.role, error = %err, "rejected operation");
                return;
            }
        }
        if let Err(err) = self.baseline.absorb(&op) {
            warn!(target = "replica_sync.engine", error = %err, "baseline could not absorb operation");
        }
        if bootstrap {
            self.bootstrap_deadline = None;
            if !self.synchronized.swap(true, Ordering::SeqCst) {
                info!(target = "replica_sync.engine", role = %self.role, "initial state received");
            }
        }
    }

    async fn toggle_door(&mut self, id: &str) -> Option<bool> {
        let is_open = self.store.toggle_door(id)?;
        let op = Operation::DoorToggle(DoorToggle {
            id: id.to_string(),
            is_open,
        });
        if self.send_eager(&op).await {
            let _ = self.baseline.absorb(&op);
        }
        Some(is_open)
    }

    async fn send_measurement(&mut self, measurement: Option<Measurement>) {
        self.store.set_measurement(measurement.clone());
        self.send_eager(&Operation::MeasurementUpdate(measurement)).await;
    }

    /// Sends an ephemeral operation right away, outside the throttle.
    async fn send_eager(&mut self, op: &Operation) -> bool {
        let Some(transport) = self.transport.clone() else {
            return false;
        };
        if !policy::may_originate(self.role, op) {
            return false;
        }
        match send_message(transport.as_ref(), &Message::Op(op.clone())).await {
            Ok(bytes) => {
                self.stats.record_sent(bytes);
                true
            }
            Err(err) => {
                warn!(target = "replica_sync.engine", kind = op.wire_kind(), error = %err, "eager send failed");
                false
            }
        }
    }

    async fn handle_lag(&mut self, skipped: u64) {
        warn!(target = "replica_sync.engine", role = %self.role, skipped, "missed frames from peer");
        if self.role != Role::Mirror {
            return;
        }
        if let Some(transport) = self.transport.clone() {
            if let Err(err) = transport.request_bootstrap().await {
                warn!(target = "replica_sync.engine", error = %err, "failed to request re-bootstrap");
            }
        }
    }

    fn bootstrap_expired(&mut self) {
        self.bootstrap_deadline = None;
        if !self.synchronized.load(Ordering::SeqCst) {
            warn!(
                target = "replica_sync.engine",
                timeout_ms = self.bootstrap_timeout.as_millis() as u64,
                "no initial state from primary; keeping local snapshot"
            );
        }
    }
}

async fn next_inbound(rx: &mut Option<mpsc::UnboundedReceiver<Inbound>>) -> Option<Inbound> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until_some(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}
