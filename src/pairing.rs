//! Pairing state machine: two-step ECDH with out-of-band
//! user confirmation, time-bounded, producing a persistent shared key.
//!
//! A single `Option<Session>` slot with a `created_at: Instant` /
//! elapsed-TTL check enforces "one session at a time". User confirmation
//! is a synchronous flag set by the local UI under the same mutex as
//! every other transition, not a separate message or channel.

use std::time::{Duration, Instant};

use crate::crypto::{self, CryptoError, PublicKeyBytes, SharedSecret};
use crate::settings::SettingsStore;

/// FINALIZE must arrive within this window of INITIATE.
pub const FINALIZE_WINDOW: Duration = Duration::from_secs(10);

/// Published HKDF info label.
const KEY_INFO: &[u8] = b"daydreamcamera-pairing-v1";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PairingError {
    #[error("salt must be exactly 32 bytes")]
    InvalidSalt,
    #[error("a pairing session is already active")]
    SessionAlreadyActive,
    #[error("no session to finalize or confirm")]
    NoActiveSession,
    #[error("finalize request does not match the initiating session")]
    Mismatch,
    #[error("user has not confirmed this pairing yet")]
    NotConfirmed,
    #[error("pairing session has expired")]
    Expired,
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// Pairing state. `Initiated` and `AwaitingFinalize` in the
/// original prose are the same state here — the session itself carries
/// `user_confirmed`, so there is nothing additional to distinguish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingState {
    Idle,
    AwaitingFinalize,
    Paired,
}

/// Status values published to the status manager alongside
/// `PairingState`; `USER_CONFIRMATION_TIMEOUT` has no corresponding
/// `PairingState` variant since it immediately returns to `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingStatus {
    NotAdvertising,
    Advertising,
    WaitingForUserConfirmation,
    UserConfirmationTimeout,
    Paired,
}

/// Ephemeral pairing session. At most one active at a time.
struct Session {
    public_key: PublicKeyBytes,
    salt: [u8; 32],
    initiated_at: Instant,
    user_confirmed: bool,
}

impl Session {
    fn expired(&self) -> bool {
        self.initiated_at.elapsed() > FINALIZE_WINDOW
    }
}

pub struct InitiateRequest {
    pub public_key: PublicKeyBytes,
    pub salt: Vec<u8>,
}

pub struct InitiateResponse {
    pub our_public_key: PublicKeyBytes,
    pub camera_salt: [u8; 32],
}

pub struct FinalizeRequest {
    pub public_key: PublicKeyBytes,
    pub salt: Vec<u8>,
}

/// Pairing state machine, guarded by a single mutex: every
/// transition and timeout check happens under `PairingManager`'s lock.
pub struct PairingManager {
    session: Option<Session>,
    state: PairingState,
}

impl PairingManager {
    pub fn new() -> Self {
        Self { session: None, state: PairingState::Idle }
    }

    pub fn state(&mut self) -> PairingState {
        self.expire_if_needed();
        self.state
    }

    /// Idle --[KEY_EXCHANGE_INITIATE]--> AwaitingFinalize.
    ///
    /// A second INITIATE while a session is already active is rejected
    /// *and* clears the current session.
    pub fn initiate(
        &mut self,
        local_keys: &crate::crypto::LocalKeyPair,
        request: InitiateRequest,
        settings: &SettingsStore,
    ) -> Result<InitiateResponse, PairingError> {
        self.expire_if_needed();

        if self.session.is_some() {
            self.session = None;
            self.state = PairingState::Idle;
            return Err(PairingError::SessionAlreadyActive);
        }

        if request.salt.len() != 32 {
            return Err(PairingError::InvalidSalt);
        }
        let mut host_salt = [0u8; 32];
        host_salt.copy_from_slice(&request.salt);

        let camera_salt_vec = crypto::random(32);
        let mut camera_salt = [0u8; 32];
        camera_salt.copy_from_slice(&camera_salt_vec);

        let combined_salt = xor32(&host_salt, &camera_salt);
        let raw = crypto::derive_shared(local_keys, &request.public_key)?;
        let shared = crypto::hkdf_sha256(&raw.0, &combined_salt, KEY_INFO);

        settings.set_pending_shared_key(&shared).map_err(|_| PairingError::Expired)?;

        self.session = Some(Session {
            public_key: request.public_key,
            salt: host_salt,
            initiated_at: Instant::now(),
            user_confirmed: false,
        });
        self.state = PairingState::AwaitingFinalize;

        Ok(InitiateResponse { our_public_key: local_keys.public_key(), camera_salt })
    }

    /// Local-UI-only: records user confirmation. No response message, no
    /// state transition by itself.
    pub fn confirm(&mut self) -> Result<(), PairingError> {
        self.expire_if_needed();
        match &mut self.session {
            Some(session) => {
                session.user_confirmed = true;
                Ok(())
            }
            None => Err(PairingError::NoActiveSession),
        }
    }

    /// AwaitingFinalize --[KEY_EXCHANGE_FINALIZE]--> Paired, iff the
    /// request matches the initiating session byte-for-byte, the user has
    /// confirmed, and we're within the 10s window.
    ///
    /// A FINALIZE arriving before confirmation is rejected but does *not*
    /// clear the session — the companion may retry once the user confirms.
    pub fn finalize(
        &mut self,
        request: FinalizeRequest,
        settings: &SettingsStore,
    ) -> Result<(), PairingError> {
        self.expire_if_needed();

        let session = self.session.as_ref().ok_or(PairingError::NoActiveSession)?;

        if request.public_key.0 != session.public_key.0 || request.salt != session.salt {
            self.session = None;
            self.state = PairingState::Idle;
            return Err(PairingError::Mismatch);
        }

        if !session.user_confirmed {
            return Err(PairingError::NotConfirmed);
        }

        settings.confirm_shared_key().map_err(|_| PairingError::Expired)?;
        self.session = None;
        self.state = PairingState::Paired;
        Ok(())
    }

    /// Cancel any in-progress session from any state.
    pub fn cancel(&mut self) {
        self.session = None;
        if self.state != PairingState::Paired {
            self.state = PairingState::Idle;
        }
    }

    /// Returns `true` (and transitions to `Idle`) if the active session's
    /// 10s window has elapsed. Open question (a): USER_CONFIRMATION_TIMEOUT
    /// clears the pending shared key immediately, not on the next INITIATE.
    fn expire_if_needed(&mut self) -> bool {
        if let Some(session) = &self.session {
            if session.expired() {
                self.session = None;
                self.state = PairingState::Idle;
                return true;
            }
        }
        false
    }

    /// Poll for timeout and report it as a status transition, clearing the
    /// pending shared key).
    pub fn poll_timeout(&mut self, settings: &SettingsStore) -> Option<PairingStatus> {
        if self.expire_if_needed() {
            let _ = settings.clear_shared_key();
            Some(PairingStatus::UserConfirmationTimeout)
        } else {
            None
        }
    }
}

impl Default for PairingManager {
    fn default() -> Self {
        Self::new()
    }
}

fn xor32(a: &[u8; 32], b: &[u8; 32]) -> [u8; 32] {
    let mut out = [0u8; 32];
    for i in 0..32 {
        out[i] = a[i] ^ b[i];
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::generate_ecdh_keypair;

    fn fresh() -> (PairingManager, crate::crypto::LocalKeyPair, SettingsStore) {
        (PairingManager::new(), generate_ecdh_keypair(), SettingsStore::open_in_memory().unwrap())
    }

    #[test]
    fn successful_pairing_reaches_paired() {
        let (mut mgr, camera_keys, settings) = fresh();
        let host = generate_ecdh_keypair();
        let salt = vec![0xAAu8; 32];

        let resp = mgr
            .initiate(
                &camera_keys,
                InitiateRequest { public_key: host.public_key(), salt: salt.clone() },
                &settings,
            )
            .unwrap();
        assert_eq!(mgr.state(), PairingState::AwaitingFinalize);
        assert!(settings.read().shared_key_pending);

        mgr.confirm().unwrap();
        mgr.finalize(
            FinalizeRequest { public_key: host.public_key(), salt },
            &settings,
        )
        .unwrap();

        assert_eq!(mgr.state(), PairingState::Paired);
        assert!(!settings.read().shared_key_pending);
        let _ = resp;
    }

    #[test]
    fn finalize_before_confirm_is_rejected_but_keeps_session() {
        let (mut mgr, camera_keys, settings) = fresh();
        let host = generate_ecdh_keypair();
        let salt = vec![0x11u8; 32];
        mgr.initiate(
            &camera_keys,
            InitiateRequest { public_key: host.public_key(), salt: salt.clone() },
            &settings,
        )
        .unwrap();

        let err = mgr
            .finalize(FinalizeRequest { public_key: host.public_key(), salt: salt.clone() }, &settings)
            .unwrap_err();
        assert_eq!(err, PairingError::NotConfirmed);
        assert_eq!(mgr.state(), PairingState::AwaitingFinalize);

        // Session survives: confirming now and retrying succeeds.
        mgr.confirm().unwrap();
        mgr.finalize(FinalizeRequest { public_key: host.public_key(), salt }, &settings).unwrap();
        assert_eq!(mgr.state(), PairingState::Paired);
    }

    #[test]
    fn finalize_with_mismatched_salt_clears_session() {
        let (mut mgr, camera_keys, settings) = fresh();
        let host = generate_ecdh_keypair();
        mgr.initiate(
            &camera_keys,
            InitiateRequest { public_key: host.public_key(), salt: vec![1u8; 32] },
            &settings,
        )
        .unwrap();
        mgr.confirm().unwrap();

        let err = mgr
            .finalize(
                FinalizeRequest { public_key: host.public_key(), salt: vec![2u8; 32] },
                &settings,
            )
            .unwrap_err();
        assert_eq!(err, PairingError::Mismatch);
        assert_eq!(mgr.state(), PairingState::Idle);
    }

    #[test]
    fn invalid_salt_length_rejected_without_state_change() {
        let (mut mgr, camera_keys, settings) = fresh();
        let host = generate_ecdh_keypair();
        let err = mgr
            .initiate(
                &camera_keys,
                InitiateRequest { public_key: host.public_key(), salt: vec![0u8; 16] },
                &settings,
            )
            .unwrap_err();
        assert_eq!(err, PairingError::InvalidSalt);
        assert_eq!(mgr.state(), PairingState::Idle);
    }

    #[test]
    fn second_initiate_clears_current_session() {
        let (mut mgr, camera_keys, settings) = fresh();
        let host_a = generate_ecdh_keypair();
        let host_b = generate_ecdh_keypair();
        mgr.initiate(
            &camera_keys,
            InitiateRequest { public_key: host_a.public_key(), salt: vec![1u8; 32] },
            &settings,
        )
        .unwrap();

        let err = mgr
            .initiate(
                &camera_keys,
                InitiateRequest { public_key: host_b.public_key(), salt: vec![2u8; 32] },
                &settings,
            )
            .unwrap_err();
        assert_eq!(err, PairingError::SessionAlreadyActive);
        assert_eq!(mgr.state(), PairingState::Idle);
    }

    #[test]
    fn ecdh_shared_secret_symmetric_for_pairing_kdf() {
        let host = generate_ecdh_keypair();
        let camera = generate_ecdh_keypair();
        let a = crypto::derive_shared(&host, &camera.public_key()).unwrap();
        let b = crypto::derive_shared(&camera, &host.public_key()).unwrap();
        assert_eq!(a.0, b.0);
    }

    #[test]
    fn confirmation_timeout_clears_pending_key_and_reports_status() {
        let (mut mgr, camera_keys, settings) = fresh();
        let host = generate_ecdh_keypair();
        mgr.initiate(
            &camera_keys,
            InitiateRequest { public_key: host.public_key(), salt: vec![1u8; 32] },
            &settings,
        )
        .unwrap();

        // Simulate elapsed time by directly expiring the session field.
        mgr.session.as_mut().unwrap().initiated_at =
            Instant::now() - Duration::from_millis(10_100);

        let status = mgr.poll_timeout(&settings);
        assert_eq!(status, Some(PairingStatus::UserConfirmationTimeout));
        assert_eq!(mgr.state(), PairingState::Idle);
        assert!(!settings.read().shared_key_pending);
        assert!(settings.read().shared_key.is_none());
    }
}
