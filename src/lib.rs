pub mod api;
pub mod api_dispatch;
pub mod ble;
pub mod capture_queue;
pub mod config;
pub mod core;
pub mod correlator;
pub mod crypto;
pub mod db;
pub mod framing;
pub mod motion;
pub mod padding;
pub mod pairing;
pub mod settings;
pub mod status;
pub mod wifi;

use tracing_subscriber::EnvFilter;

/// Installs the process-wide `tracing` subscriber. Called once from
/// `main`; tests install nothing and rely on `tracing`'s no-op default.
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .init();
}
