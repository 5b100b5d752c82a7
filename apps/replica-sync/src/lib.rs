pub mod config;
pub mod metrics;
pub mod model;
pub mod protocol;
pub mod replica;
pub mod store;
pub mod sync;
pub mod telemetry;
pub mod transport;
