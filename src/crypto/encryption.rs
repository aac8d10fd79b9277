//! AES-256-GCM sealing
//!
//! Sealed layout: `version (1 byte) || nonce (12 bytes) || ciphertext+tag`.
//! Each seal draws a fresh random nonce.

use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};

use crate::error::{SnapkeepError, SnapkeepResult};

use super::DerivedKey;

/// Current envelope version
pub const ENVELOPE_VERSION: u8 = 1;

/// Size of the AES-GCM nonce in bytes (96 bits)
const NONCE_SIZE: usize = 12;

const HEADER_SIZE: usize = 1 + NONCE_SIZE;

/// Encrypt `plaintext` under `key`
pub fn encrypt(plaintext: &[u8], key: &DerivedKey) -> SnapkeepResult<Vec<u8>> {
    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| SnapkeepError::Encryption(format!("Failed to create cipher: {}", e)))?;

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| SnapkeepError::Encryption(format!("Encryption failed: {}", e)))?;

    let mut sealed = Vec::with_capacity(HEADER_SIZE + ciphertext.len());
    sealed.push(ENVELOPE_VERSION);
    sealed.extend_from_slice(&nonce_bytes);
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

/// Decrypt bytes produced by [`encrypt`]
pub fn decrypt(sealed: &[u8], key: &DerivedKey) -> SnapkeepResult<Vec<u8>> {
    if sealed.len() < HEADER_SIZE {
        return Err(SnapkeepError::DecryptionFailure(format!(
            "Sealed payload too short: {} bytes",
            sealed.len()
        )));
    }

    if sealed[0] != ENVELOPE_VERSION {
        return Err(SnapkeepError::DecryptionFailure(format!(
            "Unsupported envelope version: {}",
            sealed[0]
        )));
    }

    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| SnapkeepError::DecryptionFailure(format!("Failed to create cipher: {}", e)))?;

    let nonce = Nonce::from_slice(&sealed[1..HEADER_SIZE]);

    cipher.decrypt(nonce, &sealed[HEADER_SIZE..]).map_err(|_| {
        SnapkeepError::DecryptionFailure(
            "Decryption failed: invalid key or corrupted data".to_string(),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::key_derivation::{derive_key, fast_settings, KeyDerivationParams};

    fn test_key(secret: &[u8]) -> DerivedKey {
        let params = KeyDerivationParams::generate(&fast_settings());
        derive_key(secret, &params).unwrap()
    }

    #[test]
    fn test_encrypt_decrypt() {
        let key = test_key(b"secret");
        let plaintext = b"Hello, World!";

        let sealed = encrypt(plaintext, &key).unwrap();
        assert_eq!(sealed[0], ENVELOPE_VERSION);
        assert_eq!(sealed.len(), HEADER_SIZE + plaintext.len() + 16);

        let opened = decrypt(&sealed, &key).unwrap();
        assert_eq!(plaintext, opened.as_slice());
    }

    #[test]
    fn test_different_nonces() {
        let key = test_key(b"secret");
        let sealed1 = encrypt(b"same", &key).unwrap();
        let sealed2 = encrypt(b"same", &key).unwrap();
        assert_ne!(sealed1, sealed2);
    }

    #[test]
    fn test_wrong_key_fails() {
        let sealed = encrypt(b"Hello", &test_key(b"one")).unwrap();
        let err = decrypt(&sealed, &test_key(b"two")).unwrap_err();
        assert!(matches!(err, SnapkeepError::DecryptionFailure(_)));
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let key = test_key(b"secret");
        let mut sealed = encrypt(b"Hello, World!", &key).unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0xFF;
        assert!(matches!(
            decrypt(&sealed, &key),
            Err(SnapkeepError::DecryptionFailure(_))
        ));
    }

    #[test]
    fn test_short_and_unversioned_input() {
        let key = test_key(b"secret");
        assert!(matches!(
            decrypt(&[1, 2, 3], &key),
            Err(SnapkeepError::DecryptionFailure(_))
        ));

        let mut sealed = encrypt(b"x", &key).unwrap();
        sealed[0] = 9;
        let err = decrypt(&sealed, &key).unwrap_err();
        assert!(err.to_string().contains("Unsupported envelope version"));
    }

    #[test]
    fn test_empty_plaintext() {
        let key = test_key(b"secret");
        let sealed = encrypt(b"", &key).unwrap();
        assert!(decrypt(&sealed, &key).unwrap().is_empty());
    }
}
