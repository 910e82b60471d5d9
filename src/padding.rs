//! Deterministic padding calculator.
//!
//! Conceals the byte length of a sensitive field (e.g. a Wi-Fi passphrase)
//! by padding it to one of a small set of length buckets, so the outer
//! message length no longer reveals exactly how long the field was.

/// Longest sensitive-field length this scheme still conceals precisely;
/// beyond this, the field is truncated rather than given its own bucket.
pub const L_MAX: usize = 64;

/// Byte used to fill padding; never semantically meaningful since the
/// original field length is carried alongside the padded bytes out of band.
const PAD_BYTE: u8 = 0x00;

/// Pad `field` so its length depends only on being `<= L_MAX`, not on its
/// exact value: every length in `0..=L_MAX` pads up to `L_MAX` bytes, and
/// anything longer is truncated to `L_MAX`.
pub fn pad(field: &[u8]) -> Vec<u8> {
    let mut out = field.to_vec();
    out.truncate(L_MAX);
    out.resize(L_MAX, PAD_BYTE);
    out
}

/// Recover a field of known original length from its padded form.
pub fn unpad(padded: &[u8], original_len: usize) -> &[u8] {
    &padded[..original_len.min(padded.len())]
}
