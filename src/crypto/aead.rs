use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use zeroize::Zeroize;

use super::{random, CryptoError, SHARED_SECRET_LEN};

const VERSION: u8 = 0x01;
const IV_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// 32-byte symmetric shared key, derived once per pairing and persisted
///. Zeroized on drop.
#[derive(Clone)]
pub struct SharedSecret(pub [u8; SHARED_SECRET_LEN]);

impl Drop for SharedSecret {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// Encrypt `plaintext` under `key`, producing
/// `version(1) || iv(12) || ciphertext_with_tag`.
pub fn encrypt(plaintext: &[u8], key: &SharedSecret) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key.0));
    let iv_bytes = random(IV_LEN);
    let nonce = Nonce::from_slice(&iv_bytes);

    let ciphertext = cipher.encrypt(nonce, plaintext).map_err(|_| CryptoError::AuthFail)?;

    let mut out = Vec::with_capacity(1 + IV_LEN + ciphertext.len());
    out.push(VERSION);
    out.extend_from_slice(&iv_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt a blob produced by [`encrypt`].
///
/// `BadVersion` if the leading byte isn't `0x01`; `AuthFail` on tag
/// mismatch or any blob too short to contain a version byte, IV, and tag.
pub fn decrypt(blob: &[u8], key: &SharedSecret) -> Result<Vec<u8>, CryptoError> {
    if blob.len() < 1 + IV_LEN + TAG_LEN {
        return Err(CryptoError::AuthFail);
    }
    if blob[0] != VERSION {
        return Err(CryptoError::BadVersion);
    }

    let iv = &blob[1..1 + IV_LEN];
    let ciphertext = &blob[1 + IV_LEN..];

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key.0));
    let nonce = Nonce::from_slice(iv);

    cipher.decrypt(nonce, ciphertext).map_err(|_| CryptoError::AuthFail)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(b: u8) -> SharedSecret {
        SharedSecret([b; SHARED_SECRET_LEN])
    }

    #[test]
    fn encrypt_decrypt_round_trip() {
        let k = key(7);
        let plaintext = b"KEY_EXCHANGE_INITIATE payload";
        let blob = encrypt(plaintext, &k).unwrap();
        let decrypted = decrypt(&blob, &k).unwrap();
        assert_eq!(&decrypted, plaintext);
    }

    #[test]
    fn wire_format_has_version_byte_and_iv() {
        let k = key(1);
        let blob = encrypt(b"hi", &k).unwrap();
        assert_eq!(blob[0], 0x01);
        assert!(blob.len() >= 1 + IV_LEN + TAG_LEN + 2);
    }

    #[test]
    fn decrypt_with_wrong_key_fails_auth() {
        let k1 = key(1);
        let k2 = key(2);
        let blob = encrypt(b"secret", &k1).unwrap();
        assert_eq!(decrypt(&blob, &k2).unwrap_err(), CryptoError::AuthFail);
    }

    #[test]
    fn bad_version_byte_rejected() {
        let k = key(1);
        let mut blob = encrypt(b"secret", &k).unwrap();
        blob[0] = 0x02;
        assert_eq!(decrypt(&blob, &k).unwrap_err(), CryptoError::BadVersion);
    }

    #[test]
    fn tampered_ciphertext_fails_auth() {
        let k = key(1);
        let mut blob = encrypt(b"secret data", &k).unwrap();
        let last = blob.len() - 1;
        blob[last] ^= 0xFF;
        assert_eq!(decrypt(&blob, &k).unwrap_err(), CryptoError::AuthFail);
    }

    #[test]
    fn empty_plaintext_round_trips() {
        let k = key(9);
        let blob = encrypt(b"", &k).unwrap();
        assert_eq!(decrypt(&blob, &k).unwrap(), b"");
    }

    #[test]
    fn nonces_are_unique_across_encryptions() {
        let k = key(3);
        let a = encrypt(b"same", &k).unwrap();
        let b = encrypt(b"same", &k).unwrap();
        assert_ne!(&a[1..1 + IV_LEN], &b[1..1 + IV_LEN]);
    }

    #[test]
    fn truncated_blob_fails_auth_not_panic() {
        let k = key(4);
        assert_eq!(decrypt(&[0x01, 0x02], &k).unwrap_err(), CryptoError::AuthFail);
    }
}
