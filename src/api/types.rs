//! Shared HTTP router state, injected into every handler as an
//! `Extension<ApiContext>` (the outermost layer, the same position the
//! router has always held its shared state).

use std::path::PathBuf;
use std::sync::Arc;

use crate::capture_queue::CaptureQueue;
use crate::settings::SettingsStore;
use crate::status::StatusManager;
use crate::wifi::WifiStateMachine;

#[derive(Clone)]
pub struct ApiContext {
    pub settings: Arc<SettingsStore>,
    pub status: Arc<StatusManager>,
    pub capture_queue: Arc<CaptureQueue>,
    pub wifi: Arc<WifiStateMachine>,
    pub media_root: PathBuf,
}
