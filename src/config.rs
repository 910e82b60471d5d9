//! Process-wide configuration: on-disk layout, network bind parameters,
//! and the advertised BLE identifiers. Plain functions and named
//! constants, no builder or environment-variable overlay — this process
//! has one deployment target (the camera itself).

use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

pub const APP_NAME: &str = "daydream-camerad";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// `~/.daydream-camerad/` — settings database and staged capture output
/// live under here.
pub fn app_data_dir() -> PathBuf {
    let home = dirs::home_dir().expect("cannot determine home directory");
    home.join(".daydream-camerad")
}

pub fn settings_db_path() -> PathBuf {
    app_data_dir().join("settings.db")
}

/// Where `GET`/`DELETE /media/<path>` resolves paths against, and where
/// the capture queue writes finished frames.
pub fn media_dir() -> PathBuf {
    app_data_dir().join("media")
}

/// HTTP companion API bind address/port. Loopback-only by default; the
/// camera's own network stack is responsible for exposing it beyond
/// that if a deployment needs it.
pub const HTTP_BIND_IP: IpAddr = IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1));
pub const HTTP_BIND_PORT: u16 = 8443;

/// Platform-assigned 16-bit Bluetooth SIG manufacturer ID used in the
/// rotating advertisement payload.
pub const BLE_MANUFACTURER_ID: u16 = 0xFFFE;

pub fn main_service_uuid() -> uuid::Uuid {
    uuid::Uuid::parse_str("6e400001-b5a3-f393-e0a9-e50e24dcca9e").expect("valid literal UUID")
}

pub fn pairing_service_uuid() -> uuid::Uuid {
    uuid::Uuid::parse_str("6e400002-b5a3-f393-e0a9-e50e24dcca9e").expect("valid literal UUID")
}

/// Default bounded capacity of the capture request queue.
pub const CAPTURE_QUEUE_CAPACITY: usize = 4;

pub const DEFAULT_LOG_FILTER: &str = "info";

pub fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Wall-clock budget given to graceful shutdown after `ctrl_c` before the
/// process gives up waiting on in-flight work.
pub const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(5);
