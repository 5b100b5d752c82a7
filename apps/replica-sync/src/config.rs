use std::env;
use std::time::Duration;

use tracing::warn;

use crate::model::MAX_EXPLORED_REGIONS;

pub const ENV_THROTTLE_MS: &str = "REPLICA_SYNC_THROTTLE_MS";
pub const ENV_BOOTSTRAP_TIMEOUT_MS: &str = "REPLICA_SYNC_BOOTSTRAP_TIMEOUT_MS";
pub const ENV_CHANNEL: &str = "REPLICA_SYNC_CHANNEL";
pub const ENV_WINDOW_CHANNEL: &str = "REPLICA_SYNC_WINDOW_CHANNEL";
pub const ENV_EXPLORED_LIMIT: &str = "REPLICA_SYNC_EXPLORED_LIMIT";

const DEFAULT_THROTTLE: Duration = Duration::from_millis(33);
const DEFAULT_BOOTSTRAP_TIMEOUT: Duration = Duration::from_millis(5000);
const DEFAULT_CHANNEL: &str = "replica-sync";

/// Replica synchronization settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Minimum spacing between detection passes.
    pub throttle_period: Duration,
    /// How long a mirror waits for its first full state before warning.
    pub bootstrap_timeout: Duration,
    /// Bus topic shared by both replicas.
    pub channel: String,
    /// Host signal that a cross-window channel can be used.
    pub window_channel_available: bool,
    pub explored_region_limit: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            throttle_period: DEFAULT_THROTTLE,
            bootstrap_timeout: DEFAULT_BOOTSTRAP_TIMEOUT,
            channel: DEFAULT_CHANNEL.to_string(),
            window_channel_available: false,
            explored_region_limit: MAX_EXPLORED_REGIONS,
        }
    }
}

impl SyncConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            throttle_period: millis(&lookup, ENV_THROTTLE_MS).unwrap_or(defaults.throttle_period),
            bootstrap_timeout: millis(&lookup, ENV_BOOTSTRAP_TIMEOUT_MS)
                .unwrap_or(defaults.bootstrap_timeout),
            channel: lookup(ENV_CHANNEL)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .unwrap_or(defaults.channel),
            window_channel_available: lookup(ENV_WINDOW_CHANNEL)
                .map(|value| truthy(&value))
                .unwrap_or(defaults.window_channel_available),
            explored_region_limit: number(&lookup, ENV_EXPLORED_LIMIT)
                .filter(|limit| *limit > 0)
                .map(|limit| limit as usize)
                .unwrap_or(defaults.explored_region_limit),
        }
    }

    pub fn with_throttle(mut self, period: Duration) -> Self {
        self.throttle_period = period;
        self
    }

    pub fn with_bootstrap_timeout(mut self, timeout: Duration) -> Self {
        self.bootstrap_timeout = timeout;
        self
    }
}

fn number(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<u64> {
    let raw = lookup(key)?;
    match raw.trim().parse::<u64>() {
        Ok(value) => Some(value),
        Err(err) => {
            warn!(target = "replica_sync.config", key, value = %raw, error = %err, "ignoring invalid value");
            None
        }
    }
}

fn millis(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<Duration> {
    number(lookup, key).map(Duration::from_millis)
}

fn truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
