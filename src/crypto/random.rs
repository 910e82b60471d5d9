use rand::rngs::OsRng;
use rand::RngCore;

/// CSPRNG bytes. Used for BLE IVs, camera salts, and
/// manufacturer-data nonces.
pub fn random(n: usize) -> Vec<u8> {
    let mut buf = vec![0u8; n];
    OsRng.fill_bytes(&mut buf);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_has_requested_length() {
        assert_eq!(random(32).len(), 32);
        assert_eq!(random(0).len(), 0);
    }

    #[test]
    fn random_is_not_constant() {
        assert_ne!(random(32), random(32));
    }
}
