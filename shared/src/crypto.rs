//! Shared-secret encryption for packet bodies.
//!
//! A password is stretched into a 256-bit key, bodies are padded to a
//! 16-byte boundary so their exact length does not leak, then sealed with
//! ChaCha20-Poly1305. The sealed blob is `nonce (12 bytes) || ciphertext+tag`.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::RngCore;

use crate::error::CryptoError;
use crate::hash::sha256;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const KEY_LEN: usize = 32;
const PAD_BLOCK: usize = 16;
const PAD_MARKER: u8 = 0x80;

const KDF_SALT: &[u8] = b"roomcast/crypt-key/v1";
const KDF_ROUNDS: u32 = 4096;

/// A derived body-encryption key.
///
/// The password is kept alongside the key because namespace hashes
/// are computed from it.
#[derive(Clone)]
pub struct CryptKey {
    password: String,
    key: [u8; KEY_LEN],
}

impl std::fmt::Debug for CryptKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptKey").finish_non_exhaustive()
    }
}

impl CryptKey {
    /// Derives a key from a shared password. Empty passwords are rejected;
    /// "no encryption" is expressed as `Option::<CryptKey>::None`.
    pub fn derive(password: &str) -> Result<Self, CryptoError> {
        if password.is_empty() {
            return Err(CryptoError::PasswordHash);
        }

        let mut digest = sha256(&[KDF_SALT, password.as_bytes()]);
        for _ in 1..KDF_ROUNDS {
            digest = sha256(&[&digest[..], password.as_bytes()]);
        }

        Ok(Self {
            password: password.to_string(),
            key: digest,
        })
    }

    /// Convenience for configuration values where "" means plaintext.
    pub fn from_config(password: &str) -> Result<Option<Self>, CryptoError> {
        if password.is_empty() {
            Ok(None)
        } else {
            Self::derive(password).map(Some)
        }
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    fn cipher(&self) -> ChaCha20Poly1305 {
        ChaCha20Poly1305::new(Key::from_slice(&self.key))
    }

    /// Pads and seals `plain`, returning `nonce || ciphertext`.
    pub fn encrypt(&self, plain: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let cipher = self.cipher();
        let padded = pad(plain, PAD_BLOCK)?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let sealed = cipher
            .encrypt(nonce, padded.as_slice())
            .map_err(|_| CryptoError::Encrypt)?;

        let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    /// Opens a blob produced by [`CryptKey::encrypt`].
    pub fn decrypt(&self, cipher_data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if cipher_data.len() < NONCE_LEN + TAG_LEN {
            return Err(CryptoError::CipherDataInvalid);
        }
        let cipher = self.cipher();
        let (nonce_bytes, sealed) = cipher_data.split_at(NONCE_LEN);
        let padded = cipher
            .decrypt(Nonce::from_slice(nonce_bytes), sealed)
            .map_err(|_| CryptoError::Decrypt)?;
        unpad(padded, PAD_BLOCK)
    }
}

/// ISO/IEC 7816-4 padding: a 0x80 marker, then zeros up to the block size.
fn pad(data: &[u8], block: usize) -> Result<Vec<u8>, CryptoError> {
    if block == 0 {
        return Err(CryptoError::Pad);
    }
    let padded_len = (data.len() / block + 1) * block;
    let mut out = Vec::with_capacity(padded_len);
    out.extend_from_slice(data);
    out.push(PAD_MARKER);
    out.resize(padded_len, 0);
    Ok(out)
}

fn unpad(mut data: Vec<u8>, block: usize) -> Result<Vec<u8>, CryptoError> {
    if block == 0 || data.is_empty() || data.len() % block != 0 {
        return Err(CryptoError::Unpad);
    }
    let marker = data
        .iter()
        .rposition(|&b| b != 0)
        .ok_or(CryptoError::Unpad)?;
    if data[marker] != PAD_MARKER || data.len() - marker > block {
        return Err(CryptoError::Unpad);
    }
    data.truncate(marker);
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = CryptKey::derive("hunter2").unwrap();
        let sealed = key.encrypt(b"hello room").unwrap();
        assert_eq!(key.decrypt(&sealed).unwrap(), b"hello room");
    }

    #[test]
    fn test_same_password_derives_same_key() {
        let a = CryptKey::derive("k1").unwrap();
        let b = CryptKey::derive("k1").unwrap();
        let sealed = a.encrypt(b"x").unwrap();
        assert_eq!(b.decrypt(&sealed).unwrap(), b"x");
    }

    #[test]
    fn test_wrong_key_fails_to_decrypt() {
        let k1 = CryptKey::derive("k1").unwrap();
        let k2 = CryptKey::derive("k2").unwrap();
        let sealed = k1.encrypt(b"secret").unwrap();
        assert_eq!(k2.decrypt(&sealed), Err(CryptoError::Decrypt));
    }

    #[test]
    fn test_short_cipher_data_is_invalid() {
        let key = CryptKey::derive("k").unwrap();
        assert_eq!(key.decrypt(&[0u8; 8]), Err(CryptoError::CipherDataInvalid));
    }

    #[test]
    fn test_random_nonces_differ() {
        let key = CryptKey::derive("k").unwrap();
        assert_ne!(key.encrypt(b"same").unwrap(), key.encrypt(b"same").unwrap());
    }

    #[test]
    fn test_padding_hides_exact_length() {
        let key = CryptKey::derive("k").unwrap();
        let a = key.encrypt(b"a").unwrap();
        let b = key.encrypt(b"abcdefghijklmn").unwrap();
        assert_eq!(a.len(), b.len());
    }

    #[test]
    fn test_pad_unpad() {
        for len in [0usize, 1, 15, 16, 17, 40] {
            let data = vec![0u8; len];
            let padded = pad(&data, PAD_BLOCK).unwrap();
            assert_eq!(padded.len() % PAD_BLOCK, 0);
            assert!(padded.len() > len);
            assert_eq!(unpad(padded, PAD_BLOCK).unwrap(), data);
        }
        assert_eq!(unpad(vec![0u8; 16], PAD_BLOCK), Err(CryptoError::Unpad));
        assert_eq!(unpad(vec![1u8; 15], PAD_BLOCK), Err(CryptoError::Unpad));
    }

    #[test]
    fn test_empty_password_is_rejected() {
        assert_eq!(CryptKey::derive("").unwrap_err(), CryptoError::PasswordHash);
        assert!(CryptKey::from_config("").unwrap().is_none());
        assert!(CryptKey::from_config("x").unwrap().is_some());
    }
}
