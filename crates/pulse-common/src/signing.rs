//! Shared-secret request integrity: hex-encoded HMAC-SHA256 over the raw
//! request body.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Computes the hex-encoded HMAC-SHA256 of `body` under `key`.
pub fn sign(key: &str, body: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(key.as_bytes()).expect("HMAC can take key of any size");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Verifies a received hex digest against the body.
pub fn verify(key: &str, body: &[u8], received: &str) -> bool {
    constant_time_eq(&sign(key, body), received)
}

/// Constant-time string comparison; always walks every byte for
/// equal-length inputs.
fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify() {
        let digest = sign("k", b"payload");
        assert!(verify("k", b"payload", &digest));
    }

    #[test]
    fn single_byte_mutation_fails() {
        let digest = sign("k", b"payload");
        assert!(!verify("k", b"paxload", &digest));
    }

    #[test]
    fn wrong_key_fails() {
        let digest = sign("k", b"payload");
        assert!(!verify("other", b"payload", &digest));
    }

    #[test]
    fn digest_is_hex() {
        let digest = sign("k", b"payload");
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
