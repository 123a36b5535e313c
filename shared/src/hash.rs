//! Routing hashes computed by clients.
//!
//! The server never derives these itself; it only compares the values that
//! clients put into plaintext fields. Clients that share a password and an
//! application name end up with the same namespace, and encrypted clients hash
//! their room and picture ids so the relay cannot read them back.

use sha2::{Digest, Sha256};

use crate::crypto::CryptKey;

/// SHA-256 over the concatenation of `parts`.
pub fn sha256(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}

/// First four bytes of SHA-256, little-endian.
pub fn digest32(parts: &[&[u8]]) -> u32 {
    let full = sha256(parts);
    u32::from_le_bytes([full[0], full[1], full[2], full[3]])
}

/// Namespace isolating client populations that share one relay.
pub fn namespace_hash(key: Option<&CryptKey>, app_name: &str) -> u32 {
    let password = key.map(CryptKey::password).unwrap_or("");
    digest32(&[password.as_bytes(), app_name.as_bytes()])
}

/// Hash of a room or picture id.
///
/// Plaintext clients send the number as-is so mixed populations keep working;
/// encrypted clients salt it with their namespace.
pub fn num_hash(key: Option<&CryptKey>, namespace: u32, num: u32) -> u32 {
    match key {
        Some(_) => digest32(&[&namespace.to_le_bytes(), &num.to_le_bytes()]),
        None => num,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plaintext_num_hash_is_identity() {
        assert_eq!(num_hash(None, 1234, 42), 42);
    }

    #[test]
    fn test_encrypted_num_hash_depends_on_namespace() {
        let key = CryptKey::derive("k").unwrap();
        let a = num_hash(Some(&key), 1, 42);
        let b = num_hash(Some(&key), 2, 42);
        assert_ne!(a, b);
        assert_eq!(a, num_hash(Some(&key), 1, 42));
    }

    #[test]
    fn test_namespace_separates_keys_and_apps() {
        let k1 = CryptKey::derive("k1").unwrap();
        let k2 = CryptKey::derive("k2").unwrap();
        let plain = namespace_hash(None, "game");
        assert_eq!(plain, namespace_hash(None, "game"));
        assert_ne!(plain, namespace_hash(None, "other"));
        assert_ne!(namespace_hash(Some(&k1), "game"), namespace_hash(Some(&k2), "game"));
        assert_ne!(namespace_hash(Some(&k1), "game"), plain);
    }
}
