use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};

pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

pub static SYNC_DETECTION_PASSES: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new(
            "replica_sync_detection_passes_total",
            "Detection passes run by a replica engine",
        ),
        &["role", "replica"],
    )
    .unwrap();
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub static SYNC_OPS_SENT: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new("replica_sync_ops_sent_total", "Operations sent to the peer"),
        &["role", "replica"],
    )
    .unwrap();
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub static SYNC_BYTES_SENT: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new("replica_sync_bytes_sent_total", "Encoded frame bytes sent to the peer"),
        &["role", "replica"],
    )
    .unwrap();
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub static SYNC_OPS_APPLIED: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new(
            "replica_sync_ops_applied_total",
            "Peer operations that changed the local snapshot",
        ),
        &["role", "replica"],
    )
    .unwrap();
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub static SYNC_FRAMES_IGNORED: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new(
            "replica_sync_frames_ignored_total",
            "Inbound frames dropped as unknown, undecodable or not accepted",
        ),
        &["role", "replica"],
    )
    .unwrap();
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub static SYNC_BOOTSTRAPS_SERVED: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new(
            "replica_sync_bootstraps_served_total",
            "Full states sent in answer to a bootstrap request",
        ),
        &["role", "replica"],
    )
    .unwrap();
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

/// Renders every registered metric in the text exposition format.
pub fn render() -> String {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    if let Err(err) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        tracing::warn!(target = "replica_sync.metrics", error = %err, "failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
