//! File-backed secure store with AES-256-GCM encryption at rest

use crate::error::{DeviceError, Result};
use crate::secure_store::SecureStore;
use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use async_trait::async_trait;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::debug;
use zeroize::Zeroizing;

/// One encrypted value as written to disk
#[derive(Serialize, Deserialize, Clone)]
struct EncryptedEntry {
    /// Nonce used for this value
    nonce: [u8; 12],
    /// Ciphertext plus auth tag; the entry key is bound as associated data
    ciphertext: Vec<u8>,
}

/// Secure store persisted as a single JSON document of encrypted entries.
///
/// # Security
/// - Values are encrypted with AES-256-GCM under a key derived from a
///   device-specific secret with SHA-256
/// - The entry key is authenticated as associated data, so ciphertexts
///   cannot be swapped between keys
/// - The derived key is zeroed on drop
pub struct EncryptedFileStore {
    path: PathBuf,
    encryption_key: Zeroizing<[u8; 32]>,
    /// Serializes read-modify-write cycles within this process
    write_lock: Mutex<()>,
}

impl EncryptedFileStore {
    /// Create a store at `path` keyed by `device_key`.
    ///
    /// `device_key` should come from the platform keystore (iOS Keychain,
    /// Android Keystore); it is hashed to derive the AES-256 key.
    pub fn new(path: impl Into<PathBuf>, device_key: &[u8]) -> Self {
        let hash = Sha256::digest(device_key);

        let mut encryption_key = Zeroizing::new([0u8; 32]);
        encryption_key.copy_from_slice(&hash);

        Self {
            path: path.into(),
            encryption_key,
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn cipher(&self) -> Result<Aes256Gcm> {
        Aes256Gcm::new_from_slice(&self.encryption_key[..])
            .map_err(|e| DeviceError::EncryptionFailed(format!("Failed to create cipher: {}", e)))
    }

    fn encrypt(&self, key: &str, plaintext: &[u8]) -> Result<EncryptedEntry> {
        let cipher = self.cipher()?;

        let mut nonce_bytes = [0u8; 12];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, Payload { msg: plaintext, aad: key.as_bytes() })
            .map_err(|e| DeviceError::EncryptionFailed(format!("Encryption failed: {}", e)))?;

        Ok(EncryptedEntry {
            nonce: nonce_bytes,
            ciphertext,
        })
    }

    fn decrypt(&self, key: &str, entry: &EncryptedEntry) -> Result<Vec<u8>> {
        let cipher = self.cipher()?;
        let nonce = Nonce::from_slice(&entry.nonce);

        cipher
            .decrypt(nonce, Payload { msg: &entry.ciphertext, aad: key.as_bytes() })
            .map_err(|e| DeviceError::DecryptionFailed(format!("Decryption failed: {}", e)))
    }

    async fn load_entries(&self) -> Result<HashMap<String, EncryptedEntry>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_entries(&self, entries: &HashMap<String, EncryptedEntry>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        // Write then rename so a crash never leaves a truncated document
        let tmp_path = self.path.with_extension("tmp");
        tokio::fs::write(&tmp_path, serde_json::to_vec(entries)?).await?;
        tokio::fs::rename(&tmp_path, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl SecureStore for EncryptedFileStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self.load_entries().await?;

        let Some(entry) = entries.get(key) else {
            return Ok(None);
        };

        let plaintext = self.decrypt(key, entry)?;
        let value = String::from_utf8(plaintext)
            .map_err(|e| DeviceError::DecryptionFailed(format!("Stored value is not UTF-8: {}", e)))?;

        Ok(Some(value))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let mut entries = self.load_entries().await?;
        entries.insert(key.to_string(), self.encrypt(key, value.as_bytes())?);
        self.write_entries(&entries).await?;

        debug!(key = key, path = %self.path.display(), "Secure store entry written");
        Ok(())
    }
}
