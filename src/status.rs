//! Internal status manager: reactive fan-in of pairing/connectivity/camera
//! state into an idempotent status snapshot.
//!
//! A single snapshot-recomputing function, guarded by a mutex, runs on
//! every source change; delivery happens only when the recomputed
//! snapshot differs structurally from the last one delivered. There is no
//! observable graph, just a mutation followed by a compare.

use std::collections::BTreeSet;
use std::sync::Mutex;

use crate::pairing::PairingStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraState {
    Active,
    Inactive,
}

/// Status snapshot. Mutated by the pairing state machine, the BLE socket
/// server, and the API dispatcher; a mutation is delivered only when it
/// differs structurally from the last delivered snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub pairing_status: PairingStatus,
    pub camera_state: CameraState,
    pub connected_device_addresses: BTreeSet<String>,
}

impl Default for StatusSnapshot {
    fn default() -> Self {
        Self {
            pairing_status: PairingStatus::NotAdvertising,
            camera_state: CameraState::Inactive,
            connected_device_addresses: BTreeSet::new(),
        }
    }
}

/// Recomputes and dedups `StatusSnapshot`s on every producer update.
/// Recomputation and delivery happen synchronously on the producer's
/// thread, guarded by one mutex, so subscribers never observe
/// a skipped intermediate state.
pub struct StatusManager {
    inner: Mutex<Inner>,
}

struct Inner {
    current: StatusSnapshot,
    last_delivered: Option<StatusSnapshot>,
}

impl StatusManager {
    pub fn new() -> Self {
        Self { inner: Mutex::new(Inner { current: StatusSnapshot::default(), last_delivered: None }) }
    }

    pub fn current(&self) -> StatusSnapshot {
        self.inner.lock().expect("status lock poisoned").current.clone()
    }

    pub fn set_pairing_status(&self, status: PairingStatus) -> Option<StatusSnapshot> {
        self.mutate(|s| s.pairing_status = status)
    }

    pub fn set_camera_state(&self, state: CameraState) -> Option<StatusSnapshot> {
        self.mutate(|s| s.camera_state = state)
    }

    pub fn device_connected(&self, address: &str) -> Option<StatusSnapshot> {
        self.mutate(|s| {
            s.connected_device_addresses.insert(address.to_string());
        })
    }

    pub fn device_disconnected(&self, address: &str) -> Option<StatusSnapshot> {
        self.mutate(|s| {
            s.connected_device_addresses.remove(address);
        })
    }

    /// Apply a mutation and return `Some(snapshot)` only if it differs
    /// (structural equality) from the last delivered snapshot.
    fn mutate<F: FnOnce(&mut StatusSnapshot)>(&self, f: F) -> Option<StatusSnapshot> {
        let mut inner = self.inner.lock().expect("status lock poisoned");
        f(&mut inner.current);
        let candidate = inner.current.clone();
        if inner.last_delivered.as_ref() == Some(&candidate) {
            None
        } else {
            inner.last_delivered = Some(candidate.clone());
            Some(candidate)
        }
    }
}

impl Default for StatusManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_mutation_does_not_redeliver() {
        let mgr = StatusManager::new();
        assert!(mgr.set_camera_state(CameraState::Active).is_some());
        assert!(mgr.set_camera_state(CameraState::Active).is_none());
    }

    #[test]
    fn distinct_mutation_redelivers() {
        let mgr = StatusManager::new();
        assert!(mgr.set_camera_state(CameraState::Active).is_some());
        assert!(mgr.set_camera_state(CameraState::Inactive).is_some());
    }

    #[test]
    fn device_set_changes_trigger_delivery() {
        let mgr = StatusManager::new();
        assert!(mgr.device_connected("AA:BB:CC:DD:EE:FF").is_some());
        assert!(mgr.device_connected("AA:BB:CC:DD:EE:FF").is_none());
        assert!(mgr.device_disconnected("AA:BB:CC:DD:EE:FF").is_some());
    }

    #[test]
    fn monotone_no_duplicate_snapshots_in_sequence() {
        let mgr = StatusManager::new();
        let mut delivered = vec![];
        for status in [
            PairingStatus::Advertising,
            PairingStatus::Advertising,
            PairingStatus::WaitingForUserConfirmation,
            PairingStatus::Paired,
            PairingStatus::Paired,
        ] {
            if let Some(snap) = mgr.set_pairing_status(status) {
                delivered.push(snap);
            }
        }
        for window in delivered.windows(2) {
            assert_ne!(window[0], window[1]);
        }
        assert_eq!(delivered.len(), 3);
    }
}
