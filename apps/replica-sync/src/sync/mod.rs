//! Change detection and reconciliation between a replica and its peer.
//!
//! A detection pass diffs the live snapshot against the [`Baseline`] and
//! yields [`Operation`](crate::protocol::Operation)s; the receiving side runs
//! them through [`reconcile::apply`] and absorbs them into its own baseline so
//! they never travel back.

pub mod baseline;
pub mod detect;
pub mod reconcile;
pub mod throttle;

use std::sync::atomic::{AtomicU64, Ordering};

use prometheus::IntCounter;

pub use baseline::Baseline;
pub use detect::{detect, diff_fields};
pub use reconcile::{ApplyError, ApplyOutcome, apply};
pub use throttle::{Throttle, ThrottleDecision};

use crate::metrics;

static NEXT_REPLICA: AtomicU64 = AtomicU64::new(1);

/// Counters kept by one replica's engine.
///
/// Each engine holds its own series in the process-wide vectors of
/// [`crate::metrics`], labelled by role and a process-unique replica number.
#[derive(Clone)]
pub struct SyncStats {
    replica: u64,
    detection_passes: IntCounter,
    ops_sent: IntCounter,
    bytes_sent: IntCounter,
    ops_applied: IntCounter,
    frames_ignored: IntCounter,
    bootstraps_served: IntCounter,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStatsSnapshot {
    pub detection_passes: u64,
    pub ops_sent: u64,
    pub ops_applied: u64,
    pub frames_ignored: u64,
    pub bootstraps_served: u64,
    pub bytes_sent: u64,
}

impl SyncStats {
    pub fn new(role: &str) -> Self {
        let replica = NEXT_REPLICA.fetch_add(1, Ordering::Relaxed);
        let id = replica.to_string();
        let labels = [role, id.as_str()];
        Self {
            replica,
            detection_passes: metrics::SYNC_DETECTION_PASSES.with_label_values(&labels),
            ops_sent: metrics::SYNC_OPS_SENT.with_label_values(&labels),
            bytes_sent: metrics::SYNC_BYTES_SENT.with_label_values(&labels),
            ops_applied: metrics::SYNC_OPS_APPLIED.with_label_values(&labels),
            frames_ignored: metrics::SYNC_FRAMES_IGNORED.with_label_values(&labels),
            bootstraps_served: metrics::SYNC_BOOTSTRAPS_SERVED.with_label_values(&labels),
        }
    }

    /// Value of the `replica` label on this engine's series.
    pub fn replica(&self) -> u64 {
        self.replica
    }

    pub fn record_pass(&self) {
        self.detection_passes.inc();
    }

    pub fn record_sent(&self, bytes: usize) {
        self.ops_sent.inc();
        self.bytes_sent.inc_by(bytes as u64);
    }

    pub fn record_applied(&self) {
        self.ops_applied.inc();
    }

    pub fn record_ignored(&self) {
        self.frames_ignored.inc();
    }

    pub fn record_bootstrap_served(&self) {
        self.bootstraps_served.inc();
    }

    pub fn snapshot(&self) -> SyncStatsSnapshot {
        SyncStatsSnapshot {
            detection_passes: self.detection_passes.get(),
            ops_sent: self.ops_sent.get(),
            ops_applied: self.ops_applied.get(),
            frames_ignored: self.frames_ignored.get(),
            bootstraps_served: self.bootstraps_served.get(),
            bytes_sent: self.bytes_sent.get(),
        }
    }
}

impl std::fmt::Debug for SyncStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncStats")
            .field("replica", &self.replica)
            .field("counts", &self.snapshot())
            .finish()
    }
}
