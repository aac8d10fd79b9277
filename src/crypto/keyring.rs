//! Persisted encryption key
//!
//! One key per store, generated on first seal and kept in the `keys` table.
//! There is no rotation: losing the stored key makes every existing backup
//! unrecoverable.

use std::sync::Arc;

use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::aead::OsRng;
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};
use zeroize::Zeroizing;

use crate::diagnostics::{DiagnosticEntry, DiagnosticEvent, DiagnosticsLog};
use crate::error::{SnapkeepError, SnapkeepResult};
use crate::storage::{KvBackend, KEYS_TABLE};

use super::key_derivation::{derive_key, DerivedKey, KeyDerivationParams, KeyDerivationSettings};

/// Storage key of the master key record
pub const MASTER_KEY: &str = "master";

const KEY_RECORD_VERSION: u8 = 1;
const SECRET_LEN: usize = 32;

/// Key record as persisted
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredKey {
    version: u8,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    created_at: DateTime<Utc>,
    /// Base64 encoded random secret
    secret: String,
    params: KeyDerivationParams,
}

impl StoredKey {
    fn secret_bytes(&self) -> SnapkeepResult<Zeroizing<Vec<u8>>> {
        let secret = Zeroizing::new(STANDARD.decode(&self.secret).map_err(|e| {
            SnapkeepError::DecryptionFailure(format!("Stored key is malformed: {}", e))
        })?);
        if secret.len() != SECRET_LEN {
            return Err(SnapkeepError::DecryptionFailure(format!(
                "Stored key is malformed: expected {} secret bytes, got {}",
                SECRET_LEN,
                secret.len()
            )));
        }
        Ok(secret)
    }
}

/// Loads, creates and caches the derived encryption key
pub struct KeyManager {
    backend: Arc<dyn KvBackend>,
    settings: KeyDerivationSettings,
    diagnostics: Arc<DiagnosticsLog>,
    cached: Mutex<Option<Arc<DerivedKey>>>,
}

impl KeyManager {
    pub fn new(
        backend: Arc<dyn KvBackend>,
        settings: KeyDerivationSettings,
        diagnostics: Arc<DiagnosticsLog>,
    ) -> Self {
        Self {
            backend,
            settings,
            diagnostics,
            cached: Mutex::new(None),
        }
    }

    /// The key for sealing, generated and persisted if none exists yet
    pub async fn get_or_create(&self) -> SnapkeepResult<Arc<DerivedKey>> {
        let mut cached = self.cached.lock().await;
        if let Some(key) = cached.as_ref() {
            return Ok(Arc::clone(key));
        }

        let stored = match self.load_stored().await? {
            Some(stored) => stored,
            None => self.create().await?,
        };

        let key = Arc::new(self.derive(&stored).await?);
        *cached = Some(Arc::clone(&key));
        Ok(key)
    }

    /// The key for opening; fails if none has ever been created
    pub async fn get_existing(&self) -> SnapkeepResult<Arc<DerivedKey>> {
        let mut cached = self.cached.lock().await;
        if let Some(key) = cached.as_ref() {
            return Ok(Arc::clone(key));
        }

        let stored = self.load_stored().await?.ok_or_else(|| {
            SnapkeepError::DecryptionFailure("Encryption key is absent".to_string())
        })?;

        let key = Arc::new(self.derive(&stored).await?);
        *cached = Some(Arc::clone(&key));
        Ok(key)
    }

    /// Whether a key has been persisted
    pub async fn exists(&self) -> SnapkeepResult<bool> {
        Ok(self.backend.get(KEYS_TABLE, MASTER_KEY).await?.is_some())
    }

    async fn load_stored(&self) -> SnapkeepResult<Option<StoredKey>> {
        let Some(bytes) = self.backend.get(KEYS_TABLE, MASTER_KEY).await? else {
            return Ok(None);
        };

        let stored: StoredKey = serde_json::from_slice(&bytes).map_err(|e| {
            SnapkeepError::DecryptionFailure(format!("Stored key is malformed: {}", e))
        })?;

        if stored.version != KEY_RECORD_VERSION {
            return Err(SnapkeepError::DecryptionFailure(format!(
                "Unsupported key version: {}",
                stored.version
            )));
        }

        if !stored.params.matches(&self.settings) {
            warn!(
                stored_memory_cost = stored.params.memory_cost,
                stored_time_cost = stored.params.time_cost,
                stored_parallelism = stored.params.parallelism,
                configured_memory_cost = self.settings.memory_cost,
                configured_time_cost = self.settings.time_cost,
                configured_parallelism = self.settings.parallelism,
                "Key derivation parameters differ from configuration, using stored parameters"
            );
        }

        Ok(Some(stored))
    }

    async fn create(&self) -> SnapkeepResult<StoredKey> {
        let mut secret = Zeroizing::new([0u8; SECRET_LEN]);
        OsRng.fill_bytes(&mut secret[..]);

        let stored = StoredKey {
            version: KEY_RECORD_VERSION,
            created_at: Utc::now(),
            secret: STANDARD.encode(&secret[..]),
            params: KeyDerivationParams::generate(&self.settings),
        };

        let json = serde_json::to_vec(&stored)
            .map_err(|e| SnapkeepError::Json(format!("Failed to serialize key: {}", e)))?;
        self.backend.put(KEYS_TABLE, MASTER_KEY, &json).await?;

        info!("Generated new encryption key");
        self.diagnostics
            .record(DiagnosticEntry::new(DiagnosticEvent::KeyCreated).with_details(
                serde_json::json!({
                    "memory_cost": stored.params.memory_cost,
                    "time_cost": stored.params.time_cost,
                    "parallelism": stored.params.parallelism,
                }),
            ))
            .await;

        Ok(stored)
    }

    async fn derive(&self, stored: &StoredKey) -> SnapkeepResult<DerivedKey> {
        let secret = stored.secret_bytes()?;
        let params = stored.params.clone();
        tokio::task::spawn_blocking(move || derive_key(&secret, &params))
            .await
            .map_err(|e| SnapkeepError::Encryption(format!("Key derivation task failed: {}", e)))?
    }
}
