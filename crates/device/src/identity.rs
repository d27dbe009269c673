// Device Identity Manager - produces and persists the installation's identity

use crate::error::Result;
use crate::secure_store::SecureStore;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Builder;

/// Fixed secure-store key holding the device identity
pub const DEVICE_ID_KEY: &str = "secure_deviceid";

/// Opaque identifier of one app installation.
///
/// Formatted as a lowercase hyphenated UUID v4. Values read back from storage
/// are kept verbatim, so identities written by older clients stay valid.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceIdentity(String);

impl DeviceIdentity {
    /// Generate a fresh identity from 16 random bytes.
    ///
    /// The version nibble is forced to 4 and the two high bits of the
    /// clock-sequence byte to `10`, giving 122 bits of entropy.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);

        let uuid = Builder::from_random_bytes(bytes).into_uuid();
        DeviceIdentity(uuid.hyphenated().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Encoding written to the secure store (a JSON string)
    fn to_stored(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.0)?)
    }

    /// Decode a stored value: JSON string first, raw text as fallback.
    /// Blank values count as absent.
    fn from_stored(raw: &str) -> Option<Self> {
        let value = serde_json::from_str::<String>(raw).unwrap_or_else(|_| raw.to_string());
        let value = value.trim();

        if value.is_empty() {
            None
        } else {
            Some(DeviceIdentity(value.to_string()))
        }
    }
}

impl std::fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceIdentity {
    fn from(value: &str) -> Self {
        DeviceIdentity(value.to_string())
    }
}

/// Diagnostic view of the local identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub device_id: String,
    /// Whether an identity was already persisted before this lookup
    pub is_stored: bool,
}

/// Owns the device identity and its persistence
#[derive(Clone)]
pub struct DeviceIdentityManager {
    store: Arc<dyn SecureStore>,
}

impl DeviceIdentityManager {
    pub fn new(store: Arc<dyn SecureStore>) -> Self {
        Self { store }
    }

    /// Return the persisted identity, creating it on first use.
    ///
    /// Never fails: when the secure store misbehaves a fresh identity is
    /// generated, persisted if possible, and returned either way. A store that
    /// keeps failing therefore yields a different identity per call.
    pub async fn get_or_create_identity(&self) -> DeviceIdentity {
        match self.load_or_create().await {
            Ok(identity) => identity,
            Err(e) => {
                error!(error = %e, "Error managing device ID, falling back to a fresh identity");

                let fallback = DeviceIdentity::generate();
                if let Err(store_error) = self.persist(&fallback).await {
                    error!(error = %store_error, "Error storing fallback device ID");
                }
                fallback
            }
        }
    }

    /// Report the identity together with whether it was already stored
    pub async fn device_info(&self) -> DeviceInfo {
        let stored = match self.store.get(DEVICE_ID_KEY).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "Error getting device info");
                return DeviceInfo {
                    device_id: "error".to_string(),
                    is_stored: false,
                };
            }
        };

        let is_stored = stored
            .as_deref()
            .and_then(DeviceIdentity::from_stored)
            .is_some();
        let identity = self.get_or_create_identity().await;

        DeviceInfo {
            device_id: identity.to_string(),
            is_stored,
        }
    }

    async fn load_or_create(&self) -> Result<DeviceIdentity> {
        if let Some(raw) = self.store.get(DEVICE_ID_KEY).await? {
            if let Some(identity) = DeviceIdentity::from_stored(&raw) {
                debug!(device_id = %identity, "Existing device ID found");
                return Ok(identity);
            }
            warn!("Stored device ID is blank, replacing it");
        }

        let identity = DeviceIdentity::generate();
        self.persist(&identity).await?;
        info!("New device ID created");
        debug!(device_id = %identity, "New device ID value");

        Ok(identity)
    }

    async fn persist(&self, identity: &DeviceIdentity) -> Result<()> {
        self.store.set(DEVICE_ID_KEY, &identity.to_stored()?).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secure_store::MemorySecureStore;
    use proptest::prelude::*;
    use uuid::Uuid;

    fn manager() -> (Arc<MemorySecureStore>, DeviceIdentityManager) {
        let store = Arc::new(MemorySecureStore::new());
        let manager = DeviceIdentityManager::new(store.clone());
        (store, manager)
    }

    #[test]
    fn test_generate_layout() {
        let identity = DeviceIdentity::generate();
        let text = identity.as_str();

        assert_eq!(text.len(), 36);
        assert_eq!(text.to_lowercase(), text);

        let parsed = Uuid::parse_str(text).unwrap();
        assert_eq!(parsed.get_version_num(), 4);
        assert_eq!(parsed.get_variant(), uuid::Variant::RFC4122);
        assert_eq!(&text[14..15], "4");
        assert!(matches!(&text[19..20], "8" | "9" | "a" | "b"));
    }

    #[test]
    fn test_stored_encoding_is_json_string() {
        let identity = DeviceIdentity::from("0f8fad5b-d9cb-469f-a165-70867728950e");
        assert_eq!(
            identity.to_stored().unwrap(),
            "\"0f8fad5b-d9cb-469f-a165-70867728950e\""
        );
    }

    #[test]
    fn test_from_stored_accepts_raw_value() {
        let identity = DeviceIdentity::from_stored("legacy-device-id").unwrap();
        assert_eq!(identity.as_str(), "legacy-device-id");
    }

    #[test]
    fn test_from_stored_rejects_blank() {
        assert!(DeviceIdentity::from_stored("").is_none());
        assert!(DeviceIdentity::from_stored("\"  \"").is_none());
    }

    #[tokio::test]
    async fn test_identity_is_stable() {
        let (store, manager) = manager();

        let first = manager.get_or_create_identity().await;
        let second = manager.get_or_create_identity().await;

        assert_eq!(first, second);
        assert_eq!(
            store.raw(DEVICE_ID_KEY).await,
            Some(format!("\"{}\"", first))
        );
    }

    #[tokio::test]
    async fn test_blank_stored_value_is_replaced() {
        let (store, manager) = manager();
        store.set(DEVICE_ID_KEY, "\"\"").await.unwrap();

        let identity = manager.get_or_create_identity().await;
        assert!(!identity.as_str().is_empty());
        assert_eq!(store.raw(DEVICE_ID_KEY).await, Some(format!("\"{}\"", identity)));
    }

    #[tokio::test]
    async fn test_read_failure_falls_back_and_persists() {
        let (store, manager) = manager();
        store.set_fail_reads(true);

        let identity = manager.get_or_create_identity().await;

        // The fallback was written even though the read failed
        assert_eq!(store.raw(DEVICE_ID_KEY).await, Some(format!("\"{}\"", identity)));
    }

    #[tokio::test]
    async fn test_write_failure_yields_ephemeral_identities() {
        let (store, manager) = manager();
        store.set_fail_writes(true);

        let first = manager.get_or_create_identity().await;
        let second = manager.get_or_create_identity().await;

        assert_ne!(first, second);
        assert_eq!(store.raw(DEVICE_ID_KEY).await, None);
    }

    #[tokio::test]
    async fn test_device_info() {
        let (store, manager) = manager();

        let info = manager.device_info().await;
        assert!(!info.is_stored);

        let again = manager.device_info().await;
        assert!(again.is_stored);
        assert_eq!(info.device_id, again.device_id);

        store.set_fail_reads(true);
        let broken = manager.device_info().await;
        assert_eq!(broken.device_id, "error");
        assert!(!broken.is_stored);
    }

    proptest! {
        #[test]
        fn prop_generated_identities_are_v4(_seed in any::<u8>()) {
            let identity = DeviceIdentity::generate();
            let parsed = Uuid::parse_str(identity.as_str()).unwrap();
            prop_assert_eq!(parsed.get_version_num(), 4);
            prop_assert_eq!(parsed.hyphenated().to_string(), identity.as_str());
        }
    }
}
