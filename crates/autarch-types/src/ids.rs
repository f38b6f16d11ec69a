//! Cryptographically random, URL-safe identifiers (spec §3 Node invariant:
//! `node_id` ≥ 128 bits of entropy).

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::{rngs::OsRng, RngCore};

/// Generates a fresh 192-bit random id, base64url-encoded (no padding).
/// Used for `node_id` and task ids where unguessability matters.
pub fn random_id() -> String {
    let mut bytes = [0u8; 24];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_and_url_safe() {
        let a = random_id();
        let b = random_id();
        assert_ne!(a, b);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        assert!(a.len() >= 24); // 24 raw bytes -> >=32 chars base64, well above 128 bits
    }
}
