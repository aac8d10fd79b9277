//! Key derivation using Argon2id
//!
//! The AES key is never stored. What is stored is a random secret plus the
//! salt and cost parameters; the key is derived from those with Argon2id.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHasher, SaltString},
    Argon2, Params,
};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{SnapkeepError, SnapkeepResult};

/// Configured Argon2 costs used when a new key is generated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyDerivationSettings {
    /// Memory cost in KiB (default: 65536 = 64 MiB)
    pub memory_cost: u32,
    /// Iteration count (default: 3)
    pub time_cost: u32,
    /// Parallelism degree (default: 4)
    pub parallelism: u32,
}

impl Default for KeyDerivationSettings {
    fn default() -> Self {
        Self {
            memory_cost: 65536,
            time_cost: 3,
            parallelism: 4,
        }
    }
}

impl KeyDerivationSettings {
    /// Check the costs against Argon2's own limits
    pub fn validate(&self) -> SnapkeepResult<()> {
        Params::new(self.memory_cost, self.time_cost, self.parallelism, Some(32))
            .map(|_| ())
            .map_err(|e| SnapkeepError::Config(format!("Invalid Argon2 parameters: {}", e)))
    }
}

/// Parameters a key was derived with, persisted next to the secret
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyDerivationParams {
    /// Salt for key derivation (B64 salt string)
    pub salt: String,
    pub memory_cost: u32,
    pub time_cost: u32,
    pub parallelism: u32,
}

impl KeyDerivationParams {
    /// Fresh params with a random salt and the configured costs
    pub fn generate(settings: &KeyDerivationSettings) -> Self {
        let salt = SaltString::generate(&mut OsRng);
        Self {
            salt: salt.to_string(),
            memory_cost: settings.memory_cost,
            time_cost: settings.time_cost,
            parallelism: settings.parallelism,
        }
    }

    /// Whether these params were produced with the given costs
    pub fn matches(&self, settings: &KeyDerivationSettings) -> bool {
        self.memory_cost == settings.memory_cost
            && self.time_cost == settings.time_cost
            && self.parallelism == settings.parallelism
    }
}

/// A derived 256-bit encryption key, zeroed on drop
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct DerivedKey {
    key: [u8; 32],
}

impl DerivedKey {
    /// Get the key bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.key
    }
}

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DerivedKey([REDACTED])")
    }
}

/// Derive an encryption key from the stored secret
///
/// CPU and memory heavy; async callers run it on the blocking pool.
pub fn derive_key(secret: &[u8], params: &KeyDerivationParams) -> SnapkeepResult<DerivedKey> {
    let salt = SaltString::from_b64(&params.salt)
        .map_err(|e| SnapkeepError::DecryptionFailure(format!("Invalid salt: {}", e)))?;

    let argon2_params = Params::new(
        params.memory_cost,
        params.time_cost,
        params.parallelism,
        Some(32),
    )
    .map_err(|e| SnapkeepError::DecryptionFailure(format!("Invalid Argon2 parameters: {}", e)))?;

    let argon2 = Argon2::new(
        argon2::Algorithm::Argon2id,
        argon2::Version::V0x13,
        argon2_params,
    );

    let hash = argon2
        .hash_password(secret, &salt)
        .map_err(|e| SnapkeepError::Encryption(format!("Key derivation failed: {}", e)))?;

    let hash_output = hash
        .hash
        .ok_or_else(|| SnapkeepError::Encryption("No hash output generated".to_string()))?;

    let hash_bytes = hash_output.as_bytes();
    if hash_bytes.len() < 32 {
        return Err(SnapkeepError::Encryption(
            "Hash output too short for AES-256 key".to_string(),
        ));
    }

    let mut key = [0u8; 32];
    key.copy_from_slice(&hash_bytes[..32]);

    Ok(DerivedKey { key })
}

#[cfg(test)]
pub(crate) fn fast_settings() -> KeyDerivationSettings {
    KeyDerivationSettings {
        memory_cost: 64,
        time_cost: 1,
        parallelism: 1,
    }
}
