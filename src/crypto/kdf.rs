use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use super::{SharedSecret, SHARED_SECRET_LEN};

/// Single-block (N=1) HKDF-SHA256, required for wire compatibility with the
/// companion. `ikm` is the raw ECDH shared secret;
/// `salt` is `host_salt XOR camera_salt`; `info` is the published
/// `KEY_INFO` context string.
pub fn hkdf_sha256(ikm: &[u8], salt: &[u8], info: &[u8]) -> SharedSecret {
    let hk = Hkdf::<Sha256>::new(Some(salt), ikm);
    let mut out = [0u8; SHARED_SECRET_LEN];
    hk.expand(info, &mut out).expect("32-byte output is within HKDF-SHA256's max length");
    SharedSecret(out)
}

/// HMAC-SHA256 over the byte-concatenation of `parts`, in order. Used both for BLE manufacturer-data tags and HTTP request
/// authentication (method || uri || body).
pub fn hmac_sha256(key: &[u8], parts: &[&[u8]]) -> [u8; 32] {
    let mut mac = Hmac::<Sha256>::new_from_slice(key).expect("HMAC accepts keys of any length");
    for part in parts {
        mac.update(part);
    }
    mac.finalize().into_bytes().into()
}
