pub mod aead;
pub mod kdf;
pub mod keys;
pub mod random;

pub use aead::*;
pub use kdf::*;
pub use keys::*;
pub use random::*;

use thiserror::Error;

/// Crypto primitives error taxonomy. No partial results: every
/// failure here is reported as one of these variants, never a raw
/// downstream error from `p256`/`aes_gcm`.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptoError {
    #[error("peer public key is not on the configured curve")]
    BadCurve,
    #[error("peer public key is malformed (wrong length or leading byte)")]
    BadPeerKey,
    #[error("encrypted blob has an unsupported version byte")]
    BadVersion,
    #[error("authentication failed (tag mismatch or wrong key)")]
    AuthFail,
}
