use elliptic_curve::sec1::ToEncodedPoint;
use p256::{PublicKey, SecretKey};
use rand::rngs::OsRng;
use zeroize::Zeroize;

use super::CryptoError;

/// Wire length of an uncompressed NIST P-256 public key: `0x04 || X(32) || Y(32)`.
pub const PUBLIC_KEY_LEN: usize = 65;
/// Length of the raw ECDH shared secret / derived symmetric key.
pub const SHARED_SECRET_LEN: usize = 32;

/// Uncompressed P-256 public key bytes, as advertised and exchanged on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublicKeyBytes(pub [u8; PUBLIC_KEY_LEN]);

impl PublicKeyBytes {
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    fn parse(&self) -> Result<PublicKey, CryptoError> {
        if self.0.len() != PUBLIC_KEY_LEN || self.0[0] != 0x04 {
            return Err(CryptoError::BadPeerKey);
        }
        PublicKey::from_sec1_bytes(&self.0).map_err(|_| CryptoError::BadCurve)
    }
}

impl TryFrom<&[u8]> for PublicKeyBytes {
    type Error = CryptoError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        if bytes.len() != PUBLIC_KEY_LEN || bytes[0] != 0x04 {
            return Err(CryptoError::BadPeerKey);
        }
        let mut buf = [0u8; PUBLIC_KEY_LEN];
        buf.copy_from_slice(bytes);
        Ok(Self(buf))
    }
}

/// Long-lived local ECDH key pair.
///
/// The private scalar zeroizes on drop via `p256::SecretKey`'s own
/// `Zeroize`/`Drop` impl; we additionally zero our cached public bytes
/// since they have no secrecy but no reason to linger either.
pub struct LocalKeyPair {
    private: SecretKey,
    public: PublicKeyBytes,
}

impl LocalKeyPair {
    pub fn public_key(&self) -> PublicKeyBytes {
        self.public
    }

    pub fn private_key_bytes(&self) -> [u8; 32] {
        self.private.to_bytes().into()
    }

    pub fn from_private_bytes(bytes: &[u8; 32]) -> Result<Self, CryptoError> {
        let private = SecretKey::from_slice(bytes).map_err(|_| CryptoError::BadCurve)?;
        let public = encode_public(&private);
        Ok(Self { private, public })
    }
}

impl Drop for LocalKeyPair {
    fn drop(&mut self) {
        self.public.0.zeroize();
    }
}

fn encode_public(private: &SecretKey) -> PublicKeyBytes {
    let point = private.public_key().to_encoded_point(false);
    let mut buf = [0u8; PUBLIC_KEY_LEN];
    buf.copy_from_slice(point.as_bytes());
    PublicKeyBytes(buf)
}

/// Generate a fresh NIST P-256 ECDH key pair.
pub fn generate_ecdh_keypair() -> LocalKeyPair {
    let private = SecretKey::random(&mut OsRng);
    let public = encode_public(&private);
    LocalKeyPair { private, public }
}

/// Raw ECDH shared secret (X coordinate of the shared point), not yet run
/// through HKDF. Zeroized on drop.
pub struct RawSharedSecret(pub [u8; SHARED_SECRET_LEN]);

impl Drop for RawSharedSecret {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// Compute the ECDH shared secret between our private key and a peer's
/// uncompressed public key.
///
/// Rejects a peer key of the wrong length or without the `0x04` uncompressed
/// marker with `BadPeerKey`; rejects a key that doesn't decode to a valid
/// point on the curve with `BadCurve`.
pub fn derive_shared(
    local: &LocalKeyPair,
    peer_public: &PublicKeyBytes,
) -> Result<RawSharedSecret, CryptoError> {
    let peer = peer_public.parse()?;
    let shared = p256::ecdh::diffie_hellman(local.private.to_nonzero_scalar(), peer.as_affine());
    let mut out = [0u8; SHARED_SECRET_LEN];
    out.copy_from_slice(shared.raw_secret_bytes().as_slice());
    Ok(RawSharedSecret(out))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_public_key_is_uncompressed() {
        let kp = generate_ecdh_keypair();
        assert_eq!(kp.public_key().0.len(), PUBLIC_KEY_LEN);
        assert_eq!(kp.public_key().0[0], 0x04);
    }

    #[test]
    fn ecdh_produces_same_shared_secret_both_directions() {
        let a = generate_ecdh_keypair();
        let b = generate_ecdh_keypair();

        let shared_ab = derive_shared(&a, &b.public_key()).unwrap();
        let shared_ba = derive_shared(&b, &a.public_key()).unwrap();

        assert_eq!(shared_ab.0, shared_ba.0);
    }

    #[test]
    fn derive_shared_rejects_wrong_length() {
        let a = generate_ecdh_keypair();
        let bad = PublicKeyBytes::try_from(&[0x04u8; 10][..]);
        assert_eq!(bad.unwrap_err(), CryptoError::BadPeerKey);
        // Also exercise the internal path when constructed directly.
        let mut buf = [0x04u8; PUBLIC_KEY_LEN];
        buf[0] = 0x02;
        let malformed = PublicKeyBytes(buf);
        assert_eq!(derive_shared(&a, &malformed).unwrap_err(), CryptoError::BadPeerKey);
    }

    #[test]
    fn derive_shared_rejects_off_curve_point() {
        let a = generate_ecdh_keypair();
        // Valid prefix/length, but not a point on the curve.
        let mut buf = [0x04u8; PUBLIC_KEY_LEN];
        for (i, b) in buf.iter_mut().enumerate().skip(1) {
            *b = i as u8;
        }
        let bogus = PublicKeyBytes(buf);
        assert_eq!(derive_shared(&a, &bogus).unwrap_err(), CryptoError::BadCurve);
    }

    #[test]
    fn round_trips_private_key_bytes() {
        let kp = generate_ecdh_keypair();
        let bytes = kp.private_key_bytes();
        let restored = LocalKeyPair::from_private_bytes(&bytes).unwrap();
        assert_eq!(restored.public_key(), kp.public_key());
    }
}
