// Device Binding Validator - binds a device identity to one student record

use crate::identity::{DeviceIdentity, DeviceIdentityManager};
use crate::record_store::StudentRecordStore;
use serde::{Deserialize, Serialize};
use shared::config::ConflictDisclosure;
use shared::models::{AuthIdentity, StudentRecord};
use std::sync::Arc;
use tracing::{error, info, warn};

/// How a validation call ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BindingOutcome {
    /// The record was unbound and now carries this device
    Registered,
    /// The record was already bound to this device
    Validated,
    /// No record exists for the authenticated user
    NoStudentRecord,
    /// The record is bound to a different device
    Mismatch,
    /// This device wrote the binding but another device overwrote it
    LateConflict,
    /// The record store could not be read or written
    StoreError,
}

impl BindingOutcome {
    pub fn is_valid(&self) -> bool {
        matches!(self, BindingOutcome::Registered | BindingOutcome::Validated)
    }

    /// Outcomes after which the authenticated session must be torn down
    pub fn requires_sign_out(&self) -> bool {
        matches!(self, BindingOutcome::NoStudentRecord | BindingOutcome::LateConflict)
    }
}

impl std::fmt::Display for BindingOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BindingOutcome::Registered => write!(f, "registered"),
            BindingOutcome::Validated => write!(f, "validated"),
            BindingOutcome::NoStudentRecord => write!(f, "no_student_record"),
            BindingOutcome::Mismatch => write!(f, "mismatch"),
            BindingOutcome::LateConflict => write!(f, "late_conflict"),
            BindingOutcome::StoreError => write!(f, "store_error"),
        }
    }
}

/// Result of one bind-or-validate call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingResult {
    pub is_valid: bool,
    pub message: String,
    pub device_id: String,
    pub outcome: BindingOutcome,
}

impl BindingResult {
    fn new(outcome: BindingOutcome, message: impl Into<String>, device: &DeviceIdentity) -> Self {
        Self {
            is_valid: outcome.is_valid(),
            message: message.into(),
            device_id: device.to_string(),
            outcome,
        }
    }
}

/// Result of the login-time conflict scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictReport {
    pub has_conflict: bool,
    pub message: String,
    /// Records bound to this device that the caller does not own
    pub conflicting_records: Vec<StudentRecord>,
    /// The scan could not run; treated as no conflict
    pub lookup_failed: bool,
}

impl ConflictReport {
    fn clear(message: impl Into<String>) -> Self {
        Self {
            has_conflict: false,
            message: message.into(),
            conflicting_records: Vec::new(),
            lookup_failed: false,
        }
    }
}

/// Decides whether this device may act on behalf of a student
#[derive(Clone)]
pub struct DeviceBindingValidator {
    identity: DeviceIdentityManager,
    records: Arc<dyn StudentRecordStore>,
    disclosure: ConflictDisclosure,
}

impl DeviceBindingValidator {
    pub fn new(identity: DeviceIdentityManager, records: Arc<dyn StudentRecordStore>) -> Self {
        Self {
            identity,
            records,
            disclosure: ConflictDisclosure::default(),
        }
    }

    pub fn with_disclosure(mut self, disclosure: ConflictDisclosure) -> Self {
        self.disclosure = disclosure;
        self
    }

    pub fn identity(&self) -> &DeviceIdentityManager {
        &self.identity
    }

    pub fn records(&self) -> &Arc<dyn StudentRecordStore> {
        &self.records
    }

    /// Bind this device to the student, or confirm an existing binding.
    ///
    /// Binding uses the store's conditional write followed by a re-read, so a
    /// concurrent claim from another device is detected rather than silently
    /// overwritten.
    pub async fn validate(&self, auth_user_id: &str) -> BindingResult {
        let local = self.identity.get_or_create_identity().await;
        info!(user_id = %auth_user_id, "Validating device for user");

        let student = match self.records.get_by_user_id(auth_user_id).await {
            Ok(Some(student)) => student,
            Ok(None) => {
                warn!(user_id = %auth_user_id, "No student record found");
                return BindingResult::new(
                    BindingOutcome::NoStudentRecord,
                    "No student record found. Please contact admin.",
                    &local,
                );
            }
            Err(e) => {
                error!(user_id = %auth_user_id, error = %e, "Error fetching student");
                return BindingResult::new(
                    BindingOutcome::StoreError,
                    "Error fetching student information. Please contact admin.",
                    &local,
                );
            }
        };

        match student.device_id.as_deref() {
            None => self.register(&student, &local).await,
            Some(bound) if bound == local.as_str() => {
                info!(student = %student.name, "Device validation successful");
                BindingResult::new(
                    BindingOutcome::Validated,
                    "Device validated successfully.",
                    &local,
                )
            }
            Some(_) => self.mismatch(&student, &local),
        }
    }

    async fn register(&self, student: &StudentRecord, local: &DeviceIdentity) -> BindingResult {
        info!(student = %student.name, "No device ID registered for student, registering current device");

        let claimed = match self
            .records
            .update_device_id_if_unbound(&student.auth_user_id, local.as_str())
            .await
        {
            Ok(claimed) => claimed,
            Err(e) => {
                error!(user_id = %student.auth_user_id, error = %e, "Error registering device");
                return BindingResult::new(
                    BindingOutcome::StoreError,
                    "Error registering device. Please try again.",
                    local,
                );
            }
        };

        // Confirm the binding that is actually stored now
        let current = match self.records.get_by_user_id(&student.auth_user_id).await {
            Ok(Some(current)) => current,
            Ok(None) => {
                warn!(user_id = %student.auth_user_id, "Student record disappeared during registration");
                return BindingResult::new(
                    BindingOutcome::NoStudentRecord,
                    "No student record found. Please contact admin.",
                    local,
                );
            }
            Err(e) => {
                error!(user_id = %student.auth_user_id, error = %e, "Error confirming device registration");
                return BindingResult::new(
                    BindingOutcome::StoreError,
                    "Error registering device. Please try again.",
                    local,
                );
            }
        };

        match current.device_id.as_deref() {
            Some(bound) if bound == local.as_str() => {
                if claimed {
                    info!(student = %student.name, "Device registered successfully");
                    BindingResult::new(
                        BindingOutcome::Registered,
                        "Device registered successfully.",
                        local,
                    )
                } else {
                    BindingResult::new(
                        BindingOutcome::Validated,
                        "Device validated successfully.",
                        local,
                    )
                }
            }
            Some(_) if claimed => {
                warn!(user_id = %student.auth_user_id, "Device binding overwritten by another device after registration");
                BindingResult::new(
                    BindingOutcome::LateConflict,
                    format!(
                        "Another device registered for {} at the same time. Please sign in again or contact admin.",
                        self.describe(&current)
                    ),
                    local,
                )
            }
            Some(_) => self.mismatch(&current, local),
            None => {
                warn!(user_id = %student.auth_user_id, "Device registration did not persist");
                BindingResult::new(
                    BindingOutcome::StoreError,
                    "Error registering device. Please try again.",
                    local,
                )
            }
        }
    }

    fn mismatch(&self, student: &StudentRecord, local: &DeviceIdentity) -> BindingResult {
        warn!(student = %student.name, "Device mismatch for student");

        BindingResult::new(
            BindingOutcome::Mismatch,
            format!(
                "This device is not authorized for {}. Please use your registered device or contact admin to reset your device registration.",
                self.describe(student)
            ),
            local,
        )
    }

    /// Scan for other students already bound to this device.
    ///
    /// Fails open: a lookup error is reported with `lookup_failed` set and
    /// no conflict, so connectivity problems never block a legitimate login.
    pub async fn check_conflicts(
        &self,
        local: &DeviceIdentity,
        auth: &AuthIdentity,
    ) -> ConflictReport {
        let bound = match self.records.list_by_device_id(local.as_str()).await {
            Ok(bound) => bound,
            Err(e) => {
                error!(error = %e, "Error checking device conflict");
                return ConflictReport {
                    lookup_failed: true,
                    ..ConflictReport::clear("Device ownership could not be verified.")
                };
            }
        };

        let others: Vec<StudentRecord> = bound
            .iter()
            .filter(|record| !auth.owns(record))
            .cloned()
            .collect();

        if bound.len() <= 1 && others.is_empty() {
            return ConflictReport::clear(if bound.is_empty() {
                "Device is not registered to any student."
            } else {
                "Device is registered to this student."
            });
        }

        let conflicting_records = if others.is_empty() { bound } else { others };
        warn!(
            user_id = %auth.user_id,
            conflicts = conflicting_records.len(),
            "Device already registered to another student"
        );

        ConflictReport {
            has_conflict: true,
            message: self.conflict_message(&conflicting_records),
            conflicting_records,
            lookup_failed: false,
        }
    }

    /// Clear a student's device binding (admin function)
    pub async fn reset_device_for_student(&self, auth_user_id: &str) -> bool {
        match self.records.clear_device_id(auth_user_id).await {
            Ok(true) => {
                info!(user_id = %auth_user_id, "Device reset successfully");
                true
            }
            Ok(false) => {
                warn!(user_id = %auth_user_id, "No student record to reset");
                false
            }
            Err(e) => {
                error!(user_id = %auth_user_id, error = %e, "Error resetting device");
                false
            }
        }
    }

    fn describe(&self, student: &StudentRecord) -> String {
        match self.disclosure {
            ConflictDisclosure::Full => student.display_label(),
            ConflictDisclosure::Redacted => "this student account".to_string(),
        }
    }

    fn conflict_message(&self, conflicting: &[StudentRecord]) -> String {
        match self.disclosure {
            ConflictDisclosure::Full => {
                let names: Vec<String> = conflicting.iter().map(StudentRecord::display_label).collect();
                format!(
                    "This device is already registered to {}. Each device can only be used by one student.",
                    names.join(", ")
                )
            }
            ConflictDisclosure::Redacted => {
                "This device is already registered to another student. Each device can only be used by one student."
                    .to_string()
            }
        }
    }
}
