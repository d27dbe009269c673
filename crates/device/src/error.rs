//! Error types for device identity and binding operations

use crate::binding::ConflictReport;
use thiserror::Error;

/// Result type for device operations
pub type Result<T> = std::result::Result<T, DeviceError>;

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Secure storage error: {0}")]
    Storage(String),

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("Record store error: {0}")]
    RecordStore(String),

    #[error("Student record not found: {0}")]
    StudentNotFound(String),

    #[error("Device binding conflict: {}", .0.message)]
    BindingConflict(ConflictReport),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl DeviceError {
    /// Whether the error comes from the remote record store rather than from
    /// this device. Such failures must never be mistaken for a conflict.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, DeviceError::RecordStore(_))
    }
}

impl From<std::io::Error> for DeviceError {
    fn from(err: std::io::Error) -> Self {
        DeviceError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for DeviceError {
    fn from(err: serde_json::Error) -> Self {
        DeviceError::SerializationError(err.to_string())
    }
}
