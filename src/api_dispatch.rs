//! API dispatcher: the stateless request-type switch shared by the BLE
//! socket server and the HTTP router.
//!
//! Reentrant and side-effect-free except through the thread-safe facades
//! (`SettingsStore`, `StatusManager`, `CaptureQueue`, `WifiStateMachine`)
//! it is handed by reference; it never owns locks of its own.

use serde::{Deserialize, Serialize};

use crate::capture_queue::CaptureQueue;
use crate::settings::SettingsStore;
use crate::status::StatusManager;
use crate::wifi::{WifiEvent, WifiStateMachine};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResponseStatus {
    Ok,
    NotSupported,
    InvalidRequest,
    Error,
}

#[derive(Debug, Deserialize)]
pub struct RequestHeader {
    pub request_id: u64,
    pub expiration_timestamp: i64,
}

#[derive(Debug, Serialize)]
pub struct ResponseHeader {
    pub request_id: u64,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApiRequest {
    Status,
    Configure { preferences: serde_json::Value },
    ListMedia { offset: u32, limit: u32 },
    CaptureStart { id: String, path: String },
    CaptureStop,
    WifiConnect { ssid: String, passphrase: String },
    WifiDisconnect { forget: bool },
    UpdateStatus,
}

#[derive(Debug, Serialize)]
pub struct ApiResponse {
    pub header: ResponseHeader,
    pub status: ResponseStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
}

impl ApiResponse {
    fn ok(request_id: u64, body: serde_json::Value) -> Self {
        Self { header: ResponseHeader { request_id }, status: ResponseStatus::Ok, body: Some(body) }
    }

    fn status_only(request_id: u64, status: ResponseStatus) -> Self {
        Self { header: ResponseHeader { request_id }, status, body: None }
    }
}

#[derive(Debug, Serialize, Clone)]
pub struct MediaItem {
    pub path: String,
    pub size: u64,
    pub timestamp_ms: i64,
    pub duration_ms: Option<i64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub checksum: Option<String>,
}

/// A decoded request plus its envelope.
pub struct Envelope {
    pub header: RequestHeader,
    pub request: ApiRequest,
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed request body")]
    Malformed,
    #[error("unrecognized request type")]
    UnrecognizedType { request_id: u64 },
}

/// Shared by the BLE socket server and the HTTP router: parses the
/// envelope header and type tag first, so an unrecognized `type` value
/// can be told apart from a genuinely malformed body (this distinguishes
/// `NOT_SUPPORTED` from `INVALID_REQUEST`).
pub fn decode_envelope(body: &[u8]) -> Result<Envelope, DecodeError> {
    let raw: serde_json::Value = serde_json::from_slice(body).map_err(|_| DecodeError::Malformed)?;
    let header: RequestHeader =
        serde_json::from_value(raw.get("header").cloned().unwrap_or(serde_json::Value::Null))
            .map_err(|_| DecodeError::Malformed)?;

    match serde_json::from_value::<ApiRequest>(raw.clone()) {
        Ok(request) => Ok(Envelope { header, request }),
        Err(_) => Err(DecodeError::UnrecognizedType { request_id: header.request_id }),
    }
}

pub struct ApiDispatcher<'a> {
    pub settings: &'a SettingsStore,
    pub status: &'a StatusManager,
    pub capture_queue: &'a CaptureQueue,
    pub wifi: &'a WifiStateMachine,
    pub media_root: &'a std::path::Path,
}

impl<'a> ApiDispatcher<'a> {
    /// `now_ms` is caller-supplied so the dispatcher stays a pure function
    /// of its inputs, independent of any system clock.
    pub fn dispatch(&self, envelope: Envelope, now_ms: i64) -> ApiResponse {
        let request_id = envelope.header.request_id;
        if envelope.header.expiration_timestamp < now_ms {
            return ApiResponse::status_only(request_id, ResponseStatus::InvalidRequest);
        }

        match envelope.request {
            ApiRequest::Status => self.handle_status(request_id),
            ApiRequest::Configure { preferences } => self.handle_configure(request_id, preferences),
            ApiRequest::ListMedia { offset, limit } => self.handle_list_media(request_id, offset, limit),
            ApiRequest::CaptureStart { id, path } => self.handle_capture_start(request_id, id, path),
            ApiRequest::CaptureStop => self.handle_capture_stop(request_id),
            ApiRequest::WifiConnect { ssid, passphrase } => {
                self.handle_wifi_connect(request_id, ssid, passphrase)
            }
            ApiRequest::WifiDisconnect { forget } => self.handle_wifi_disconnect(request_id, forget),
            ApiRequest::UpdateStatus => self.handle_status(request_id),
        }
    }

    fn handle_status(&self, request_id: u64) -> ApiResponse {
        let snapshot = self.status.current();
        let body = serde_json::json!({
            "pairing_status": format!("{:?}", snapshot.pairing_status),
            "camera_state": format!("{:?}", snapshot.camera_state),
            "connected_device_addresses": snapshot.connected_device_addresses,
            "wifi_state": format!("{:?}", self.wifi.state()),
        });
        ApiResponse::ok(request_id, body)
    }

    fn handle_configure(&self, request_id: u64, preferences: serde_json::Value) -> ApiResponse {
        match self.settings.set_user_preferences(preferences) {
            Ok(()) => ApiResponse::ok(request_id, serde_json::json!({})),
            Err(e) => {
                tracing::error!(error = %e, "failed to persist user preferences");
                ApiResponse::status_only(request_id, ResponseStatus::Error)
            }
        }
    }

    fn handle_list_media(&self, request_id: u64, offset: u32, limit: u32) -> ApiResponse {
        let mut entries = match std::fs::read_dir(self.media_root) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::error!(error = %e, "failed to list media directory");
                return ApiResponse::status_only(request_id, ResponseStatus::Error);
            }
        };

        let mut items = Vec::new();
        while let Some(Ok(entry)) = entries.next() {
            let Ok(metadata) = entry.metadata() else { continue };
            if !metadata.is_file() {
                continue;
            }
            let modified_ms = metadata
                .modified()
                .ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_millis() as i64)
                .unwrap_or(0);
            items.push(MediaItem {
                path: entry.file_name().to_string_lossy().into_owned(),
                size: metadata.len(),
                timestamp_ms: modified_ms,
                duration_ms: None,
                width: None,
                height: None,
                checksum: None,
            });
        }
        items.sort_by(|a, b| a.path.cmp(&b.path));
        let page: Vec<_> =
            items.into_iter().skip(offset as usize).take(limit as usize).collect();
        ApiResponse::ok(request_id, serde_json::json!({ "items": page }))
    }

    fn handle_capture_start(&self, request_id: u64, id: String, path: String) -> ApiResponse {
        if self.capture_queue.is_full() {
            return ApiResponse::status_only(request_id, ResponseStatus::Error);
        }
        let now_ms = chrono::Utc::now().timestamp_millis();
        match self.capture_queue.try_add(id, path, now_ms) {
            Ok(()) => ApiResponse::ok(request_id, serde_json::json!({})),
            Err(_) => ApiResponse::status_only(request_id, ResponseStatus::Error),
        }
    }

    fn handle_capture_stop(&self, request_id: u64) -> ApiResponse {
        ApiResponse::ok(request_id, serde_json::json!({}))
    }

    fn handle_wifi_connect(&self, request_id: u64, ssid: String, passphrase: String) -> ApiResponse {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        self.wifi.request_network(ssid, passphrase, tx);
        if let Ok(Some(event)) = timeout_recv(&mut rx) {
            match event {
                WifiEvent::WifiBusy => return ApiResponse::status_only(request_id, ResponseStatus::Error),
                _ => {}
            }
        }
        ApiResponse::ok(request_id, serde_json::json!({}))
    }

    fn handle_wifi_disconnect(&self, request_id: u64, forget: bool) -> ApiResponse {
        self.wifi.release_network(forget);
        ApiResponse::ok(request_id, serde_json::json!({}))
    }
}

/// Non-blocking peek used only to surface an immediate `WifiBusy`
/// rejection without waiting on the full connection lifecycle.
fn timeout_recv(
    rx: &mut tokio::sync::mpsc::UnboundedReceiver<WifiEvent>,
) -> Result<Option<WifiEvent>, ()> {
    Ok(rx.try_recv().ok())
}
