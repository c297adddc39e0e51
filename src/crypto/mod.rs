//! AES-256-GCM section sealing and Argon2id key derivation.
//!
//! Key derivation: Argon2id(password, salt=archive_uuid_bytes) → 32-byte key
//! Sealing:        AES-256-GCM with a *deterministic* nonce derived from
//!                 (section type, vblock index, section-within-vblock index)
//!
//! The nonce tuple is unique within one archive and the key is unique per
//! archive (the UUID salts the KDF), so nonces never repeat under one key.
//! Sealed payload layout: `[ ciphertext | GCM tag (16 B) ]` — no stored
//! nonce.  The GCM tag doubles as the wrong-password self-test: decryption
//! of the first sealed section fails cleanly under a wrong key.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use argon2::{Algorithm, Argon2, Params, Version};
use thiserror::Error;

/// GCM authentication tag length appended to every sealed payload.
pub const TAG_LEN: usize = 16;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Encryption failed")]
    EncryptionFailed,
    #[error("Decryption failed — wrong password or corrupted data")]
    DecryptionFailed,
    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),
}

/// AES-256 key length; also the Argon2 output length.
pub const KEY_LEN: usize = 32;

// Argon2id tuning for archive keys.  A key is derived once per zip or
// unzip session, never per section, so the cost target is offline
// password guessing, not interactive latency: 128 MiB memory and four
// passes keep a GPU farm at well under a thousand guesses per second
// per device.  One lane — the derivation sits on the session open path
// where nothing else runs in parallel anyway.
const KDF_MEMORY_KIB: u32 = 128 * 1024;
const KDF_PASSES:     u32 = 4;
const KDF_LANES:      u32 = 1;

/// Derive a 256-bit key from a password and the 16-byte archive UUID.
/// Salting with the UUID gives each archive a distinct key even when the
/// same password is reused across archives.
pub fn derive_key(password: &str, salt: &[u8]) -> Result<[u8; KEY_LEN], CryptoError> {
    let params = Params::new(KDF_MEMORY_KIB, KDF_PASSES, KDF_LANES, Some(KEY_LEN))
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    let mut key = [0u8; KEY_LEN];
    Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
        .hash_password_into(password.as_bytes(), salt, &mut key)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    Ok(key)
}

/// Build the 12-byte nonce for one section.  The tuple is unique per
/// archive: dictionary/global sections use the reserved vblock index.
pub fn section_nonce(section_type: u16, vblock_i: u32, section_i: u16) -> [u8; 12] {
    let mut n = [0u8; 12];
    n[0..2].copy_from_slice(&section_type.to_le_bytes());
    n[2..6].copy_from_slice(&vblock_i.to_le_bytes());
    n[6..8].copy_from_slice(&section_i.to_le_bytes());
    n[8..12].copy_from_slice(b"bioZ");
    n
}

/// Seal `plaintext`, returning `ciphertext || tag`.
pub fn seal(key: &[u8; 32], nonce: &[u8; 12], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::EncryptionFailed)?;
    cipher
        .encrypt(Nonce::from_slice(nonce), plaintext)
        .map_err(|_| CryptoError::EncryptionFailed)
}

/// Open a payload produced by [`seal`].
pub fn open(key: &[u8; 32], nonce: &[u8; 12], sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if sealed.len() < TAG_LEN {
        return Err(CryptoError::DecryptionFailed);
    }
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::DecryptionFailed)?;
    cipher
        .decrypt(Nonce::from_slice(nonce), sealed)
        .map_err(|_| CryptoError::DecryptionFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_open_roundtrip() {
        let key = derive_key("hunter2", b"0123456789abcdef").unwrap();
        let nonce = section_nonce(3, 7, 2);
        let sealed = seal(&key, &nonce, b"payload bytes").unwrap();
        assert_eq!(open(&key, &nonce, &sealed).unwrap(), b"payload bytes");
    }

    #[test]
    fn wrong_key_fails() {
        let key  = derive_key("hunter2", b"0123456789abcdef").unwrap();
        let bad  = derive_key("hunter3", b"0123456789abcdef").unwrap();
        let nonce = section_nonce(1, 0, 0);
        let sealed = seal(&key, &nonce, b"secret").unwrap();
        assert!(open(&bad, &nonce, &sealed).is_err());
    }

    #[test]
    fn nonce_tuples_are_distinct() {
        assert_ne!(section_nonce(3, 0, 1), section_nonce(3, 1, 0));
        assert_ne!(section_nonce(3, 0, 0), section_nonce(4, 0, 0));
    }
}
