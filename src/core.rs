//! Process-wide composition root: owns every long-lived component and
//! wires them together once at boot, the way a firmware control daemon
//! builds its dependency graph by hand instead of through a DI
//! container.

use std::sync::Arc;

use crate::ble::BleServer;
use crate::capture_queue::CaptureQueue;
use crate::motion::{GyroSample, MotionIngest, OrientationFilter};
use crate::settings::SettingsStore;
use crate::status::StatusManager;
use crate::wifi::{WifiDriver, WifiStateMachine};

/// Placeholder orientation filter used until a platform sensor-fusion
/// collaborator is plugged in; tracks only the identity orientation, so
/// callers exercising the merge/bias/history plumbing see an orientation
/// without depending on real fusion hardware.
pub struct IdentityOrientationFilter {
    orientation: [f64; 3],
}

impl Default for IdentityOrientationFilter {
    fn default() -> Self {
        Self { orientation: [0.0, 0.0, 0.0] }
    }
}

impl OrientationFilter for IdentityOrientationFilter {
    fn init(&mut self) {}
    fn release(&mut self) {}
    fn push_gyro(&mut self, _sample: &GyroSample) {}
    fn push_accel(&mut self, _sample: &crate::motion::AccelSample) {}
    fn recenter(&mut self) {
        self.orientation = [0.0, 0.0, 0.0];
    }
    fn set_bias(&mut self, _bias: [f64; 3]) {}
    fn read_orientation(&self) -> [f64; 3] {
        self.orientation
    }
}

/// A no-op Wi-Fi driver used where no real STA-management backend is
/// wired in (e.g. tests, or a build without Wi-Fi hardware present).
pub struct NullWifiDriver;

impl WifiDriver for NullWifiDriver {
    fn disconnect(&self) {}
    fn enable_network(&self, _ssid: &str, _passphrase: &str) {}
    fn bind_process_to_network(&self) {}
    fn unbind_process(&self) {}
    fn forget_network(&self, _ssid: &str) {}
}

/// Everything the BLE and HTTP servers need, built once and handed down
/// by `Arc` rather than reached for through a global.
pub struct CameraCore {
    pub settings: Arc<SettingsStore>,
    pub status: Arc<StatusManager>,
    pub capture_queue: Arc<CaptureQueue>,
    pub motion: Arc<MotionIngest>,
    pub wifi: Arc<WifiStateMachine>,
    pub ble: Arc<BleServer>,
    pub media_root: std::path::PathBuf,
}

impl CameraCore {
    /// Boots every component against the given settings store and
    /// media root, generating a local key pair on first run.
    pub fn new(
        settings: Arc<SettingsStore>,
        media_root: std::path::PathBuf,
        wifi_driver: Arc<dyn WifiDriver>,
    ) -> Self {
        let local_keys = settings.local_key_pair_or_generate();
        let status = Arc::new(StatusManager::new());
        let capture_queue = Arc::new(CaptureQueue::new(
            crate::config::CAPTURE_QUEUE_CAPACITY,
            |request: &crate::capture_queue::CaptureRequest| {
                tracing::info!(id = %request.id, path = %request.path, "capture write completed");
            },
        ));
        let motion = Arc::new(MotionIngest::new(Box::new(IdentityOrientationFilter::default())));
        let wifi = WifiStateMachine::new(wifi_driver);
        let ble = Arc::new(BleServer::new(
            local_keys,
            Arc::clone(&settings),
            Arc::clone(&status),
            Arc::clone(&capture_queue),
            Arc::clone(&wifi),
            media_root.clone(),
        ));

        Self { settings, status, capture_queue, motion, wifi, ble, media_root }
    }

    pub fn api_context(&self) -> crate::api::ApiContext {
        crate::api::ApiContext {
            settings: Arc::clone(&self.settings),
            status: Arc::clone(&self.status),
            capture_queue: Arc::clone(&self.capture_queue),
            wifi: Arc::clone(&self.wifi),
            media_root: self.media_root.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn boots_with_generated_key_pair_and_wired_components() {
        let settings = Arc::new(SettingsStore::open_in_memory().unwrap());
        let media_root = std::env::temp_dir();
        let core = CameraCore::new(settings, media_root, Arc::new(NullWifiDriver));
        assert_eq!(core.status.current(), crate::status::StatusSnapshot::default());
        assert_eq!(core.capture_queue.queue_len(), 0);
    }

    #[tokio::test]
    async fn api_context_shares_the_same_underlying_components() {
        let settings = Arc::new(SettingsStore::open_in_memory().unwrap());
        let media_root = std::env::temp_dir();
        let core = CameraCore::new(settings, media_root, Arc::new(NullWifiDriver));
        let ctx = core.api_context();
        assert!(Arc::ptr_eq(&ctx.settings, &core.settings));
        assert!(Arc::ptr_eq(&ctx.capture_queue, &core.capture_queue));
    }
}
