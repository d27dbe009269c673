//! Device identity and student binding.
//!
//! A single installation owns one [`DeviceIdentity`], persisted in a
//! [`SecureStore`]. The [`DeviceBindingValidator`] binds that identity to at
//! most one student record and rejects conflicting bindings; the
//! [`LoginGate`] runs the conflict scan right after authentication.

pub mod error;
pub mod secure_store;
pub mod encrypted_store;
pub mod identity;
pub mod record_store;
pub mod binding;
pub mod login;

pub use error::{DeviceError, Result};
pub use secure_store::{MemorySecureStore, SecureStore};
pub use encrypted_store::EncryptedFileStore;
pub use identity::{DeviceIdentity, DeviceIdentityManager, DeviceInfo, DEVICE_ID_KEY};
pub use record_store::{InMemoryStudentStore, PgStudentStore, StudentRecordStore};
pub use binding::{BindingOutcome, BindingResult, ConflictReport, DeviceBindingValidator};
pub use login::{AuthSession, LoginGate};
