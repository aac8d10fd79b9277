//! Cryptographic envelope for snapkeep
//!
//! Sealing uses AES-256-GCM with a key derived by Argon2id from a persisted
//! random secret. Checksums are SHA-256 over the sealed bytes, so integrity
//! can be verified without the key.

mod checksum;
pub mod encryption;
pub mod key_derivation;
mod keyring;

use std::sync::Arc;

pub use checksum::{checksum, verify};
pub use key_derivation::{derive_key, DerivedKey, KeyDerivationParams, KeyDerivationSettings};
pub use keyring::{KeyManager, MASTER_KEY};

use crate::diagnostics::DiagnosticsLog;
use crate::error::SnapkeepResult;
use crate::storage::KvBackend;

/// Seals and opens payloads with the store's persisted key
pub struct CryptoEnvelope {
    keys: KeyManager,
}

impl CryptoEnvelope {
    pub fn new(
        backend: Arc<dyn KvBackend>,
        settings: KeyDerivationSettings,
        diagnostics: Arc<DiagnosticsLog>,
    ) -> Self {
        Self {
            keys: KeyManager::new(backend, settings, diagnostics),
        }
    }

    /// Encrypt `plaintext`, creating the store key on first use
    pub async fn seal(&self, plaintext: &[u8]) -> SnapkeepResult<Vec<u8>> {
        let key = self.keys.get_or_create().await?;
        encryption::encrypt(plaintext, &key)
    }

    /// Decrypt sealed bytes
    ///
    /// Fails with `DecryptionFailure` if the key is absent or malformed, or
    /// if the ciphertext does not authenticate.
    pub async fn open(&self, sealed: &[u8]) -> SnapkeepResult<Vec<u8>> {
        let key = self.keys.get_existing().await?;
        encryption::decrypt(sealed, &key)
    }

}
