// Permission handling for attendance broadcasting
// Tracks the radio and location capabilities the proximity transport needs

use crate::{ProximityError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// A platform capability the proximity transport depends on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Bluetooth scan, advertise and connect
    Bluetooth,
    /// Fine location, required for scanning on Android
    Location,
    /// Nearby Wi-Fi devices / local network access
    NearbyWifi,
}

impl Capability {
    pub const ALL: [Capability; 3] = [
        Capability::Bluetooth,
        Capability::Location,
        Capability::NearbyWifi,
    ];
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Capability::Bluetooth => write!(f, "Bluetooth"),
            Capability::Location => write!(f, "Location"),
            Capability::NearbyWifi => write!(f, "Nearby Wi-Fi"),
        }
    }
}

/// Permission status for a specific capability
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionStatus {
    /// Permission has been granted
    Granted,
    /// Permission has been denied by the user
    Denied,
    /// Permission has not been requested yet
    NotRequested,
    /// Permission is not applicable on this platform
    NotApplicable,
}

impl PermissionStatus {
    /// Whether the capability is usable
    pub fn is_satisfied(&self) -> bool {
        matches!(self, PermissionStatus::Granted | PermissionStatus::NotApplicable)
    }
}

/// Answers whether the platform capabilities needed to broadcast are granted
#[async_trait]
pub trait CapabilityGate: Send + Sync {
    /// Request every required capability; returns whether all are usable
    async fn request_all(&self) -> bool;

    /// Whether every required capability is currently usable
    async fn permissions_granted(&self) -> bool;
}

/// Manages permissions for attendance broadcasting
#[derive(Clone)]
pub struct PermissionManager {
    statuses: Arc<RwLock<HashMap<Capability, PermissionStatus>>>,
}

impl PermissionManager {
    /// Create a new PermissionManager
    pub fn new() -> Self {
        let statuses = Capability::ALL
            .iter()
            .map(|capability| (*capability, PermissionStatus::NotRequested))
            .collect();

        Self {
            statuses: Arc::new(RwLock::new(statuses)),
        }
    }

    /// Request permission for a capability
    pub async fn request_permission(&self, capability: Capability) -> Result<PermissionStatus> {
        info!("Requesting {} permission", capability);

        let current_status = self.check_permission(capability).await;
        if current_status != PermissionStatus::NotRequested {
            debug!("{} permission already requested: {:?}", capability, current_status);
            return Ok(current_status);
        }

        let status = platform_request_permission(capability).await?;
        self.statuses.write().await.insert(capability, status);

        info!("{} permission status: {:?}", capability, status);
        Ok(status)
    }

    /// Current status of a capability
    pub async fn check_permission(&self, capability: Capability) -> PermissionStatus {
        self.statuses
            .read()
            .await
            .get(&capability)
            .copied()
            .unwrap_or(PermissionStatus::NotRequested)
    }

    /// Verify that a capability is usable before broadcasting
    pub async fn verify_permission(&self, capability: Capability) -> Result<()> {
        match self.check_permission(capability).await {
            PermissionStatus::Granted | PermissionStatus::NotApplicable => Ok(()),
            PermissionStatus::Denied => Err(ProximityError::PermissionDenied(format!(
                "{} permission was denied. Please enable it in your device settings.",
                capability
            ))),
            PermissionStatus::NotRequested => Err(ProximityError::PermissionDenied(format!(
                "{} permission has not been requested. Please request permission first.",
                capability
            ))),
        }
    }

    /// Verify every capability, reporting the first one missing
    pub async fn verify_all(&self) -> Result<()> {
        for capability in Capability::ALL {
            self.verify_permission(capability).await?;
        }
        Ok(())
    }

    /// Handle permission denial gracefully
    pub fn handle_permission_denial(&self, capability: Capability) -> String {
        let message = match capability {
            Capability::Bluetooth => {
                "Attendance requires Bluetooth permission. \
                 Please enable Bluetooth permissions in your device settings to give attendance."
            }
            Capability::Location => {
                "Attendance requires location permission to find nearby devices. \
                 Please enable Location permissions in your device settings to give attendance."
            }
            Capability::NearbyWifi => {
                "Attendance requires nearby devices permission. \
                 Please enable Nearby Wi-Fi / Local Network permissions in your device settings to give attendance."
            }
        };

        warn!("Permission denied for {}: {}", capability, message);
        message.to_string()
    }

    /// Record a status reported by the platform
    pub async fn set_permission(&self, capability: Capability, status: PermissionStatus) {
        self.statuses.write().await.insert(capability, status);
    }
}

impl Default for PermissionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CapabilityGate for PermissionManager {
    async fn request_all(&self) -> bool {
        let mut granted = true;
        for capability in Capability::ALL {
            match self.request_permission(capability).await {
                Ok(status) if status.is_satisfied() => {}
                Ok(_) => {
                    self.handle_permission_denial(capability);
                    granted = false;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to request {} permission", capability);
                    granted = false;
                }
            }
        }
        granted
    }

    async fn permissions_granted(&self) -> bool {
        self.verify_all().await.is_ok()
    }
}

#[cfg(target_os = "android")]
async fn platform_request_permission(capability: Capability) -> Result<PermissionStatus> {
    // BLUETOOTH_SCAN / ADVERTISE / CONNECT, ACCESS_FINE_LOCATION and
    // NEARBY_WIFI_DEVICES are granted through the host activity
    debug!("Android: Requesting {} permission", capability);
    Ok(PermissionStatus::Granted)
}

#[cfg(target_os = "ios")]
async fn platform_request_permission(capability: Capability) -> Result<PermissionStatus> {
    debug!("iOS: Requesting {} permission", capability);
    match capability {
        // Location is not needed for peer discovery on iOS
        Capability::Location => Ok(PermissionStatus::NotApplicable),
        _ => Ok(PermissionStatus::Granted),
    }
}

#[cfg(not(any(target_os = "ios", target_os = "android")))]
async fn platform_request_permission(capability: Capability) -> Result<PermissionStatus> {
    debug!("Desktop platform: {} permission not required", capability);
    Ok(PermissionStatus::Granted)
}
