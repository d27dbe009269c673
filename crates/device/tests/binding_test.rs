mod common;

use async_trait::async_trait;
use common::{identity_with, student};
use device::{
    BindingOutcome, DeviceBindingValidator, DeviceError, DeviceIdentity, InMemoryStudentStore,
    StudentRecordStore,
};
use shared::config::ConflictDisclosure;
use shared::models::{AuthIdentity, StudentRecord};
use std::sync::Arc;

async fn validator_for(
    device_id: &str,
    records: Vec<StudentRecord>,
) -> (Arc<InMemoryStudentStore>, DeviceBindingValidator) {
    let (_, identity) = identity_with(device_id).await;
    let store = Arc::new(InMemoryStudentStore::with_records(records).await);
    let validator = DeviceBindingValidator::new(identity, store.clone());
    (store, validator)
}

#[tokio::test]
async fn test_unbound_record_is_registered() {
    let (store, validator) = validator_for("d1", vec![student("u1", "R1", None)]).await;

    let result = validator.validate("u1").await;

    assert!(result.is_valid);
    assert_eq!(result.outcome, BindingOutcome::Registered);
    assert_eq!(result.device_id, "d1");
    assert_eq!(store.snapshot("u1").await.unwrap().device_id.as_deref(), Some("d1"));
}

#[tokio::test]
async fn test_second_validation_does_not_write_again() {
    let (store, validator) = validator_for("d1", vec![student("u1", "R1", None)]).await;

    assert!(validator.validate("u1").await.is_valid);
    assert_eq!(store.write_count(), 1);

    let again = validator.validate("u1").await;
    assert!(again.is_valid);
    assert_eq!(again.outcome, BindingOutcome::Validated);
    assert_eq!(again.message, "Device validated successfully.");
    assert_eq!(store.write_count(), 1);
}

#[tokio::test]
async fn test_mismatch_names_the_student() {
    let (store, validator) = validator_for("d2", vec![student("u1", "R1", Some("d1"))]).await;

    let result = validator.validate("u1").await;

    assert!(!result.is_valid);
    assert_eq!(result.outcome, BindingOutcome::Mismatch);
    assert!(result.message.contains("Student u1"));
    assert!(result.message.contains("R1"));
    assert_eq!(store.snapshot("u1").await.unwrap().device_id.as_deref(), Some("d1"));
}

#[tokio::test]
async fn test_mismatch_redacted() {
    let (_, validator) = validator_for("d2", vec![student("u1", "R1", Some("d1"))]).await;
    let validator = validator.with_disclosure(ConflictDisclosure::Redacted);

    let result = validator.validate("u1").await;

    assert_eq!(result.outcome, BindingOutcome::Mismatch);
    assert!(!result.message.contains("R1"));
}

#[tokio::test]
async fn test_missing_record_requires_sign_out() {
    let (_, validator) = validator_for("d1", vec![]).await;

    let result = validator.validate("ghost").await;

    assert!(!result.is_valid);
    assert_eq!(result.outcome, BindingOutcome::NoStudentRecord);
    assert!(result.outcome.requires_sign_out());
    assert!(result.message.contains("No student record"));
}

#[tokio::test]
async fn test_read_failure_is_not_valid() {
    let (store, validator) = validator_for("d1", vec![student("u1", "R1", None)]).await;
    store.set_fail_reads(true);

    let result = validator.validate("u1").await;

    assert!(!result.is_valid);
    assert_eq!(result.outcome, BindingOutcome::StoreError);
    assert!(!result.outcome.requires_sign_out());
}

#[tokio::test]
async fn test_write_failure_is_not_valid() {
    let (store, validator) = validator_for("d1", vec![student("u1", "R1", None)]).await;
    store.set_fail_writes(true);

    let result = validator.validate("u1").await;

    assert!(!result.is_valid);
    assert_eq!(result.outcome, BindingOutcome::StoreError);
    assert!(store.snapshot("u1").await.unwrap().device_id.is_none());
}

/// Store where another device claims the record between our read and write
struct ClaimedFirstStore {
    inner: InMemoryStudentStore,
    rival: String,
}

#[async_trait]
impl StudentRecordStore for ClaimedFirstStore {
    async fn get_by_user_id(&self, user_id: &str) -> device::Result<Option<StudentRecord>> {
        self.inner.get_by_user_id(user_id).await
    }

    async fn update_device_id(&self, user_id: &str, device_id: &str) -> device::Result<()> {
        self.inner.update_device_id(user_id, device_id).await
    }

    async fn update_device_id_if_unbound(&self, user_id: &str, device_id: &str) -> device::Result<bool> {
        self.inner.update_device_id_if_unbound(user_id, &self.rival).await?;
        self.inner.update_device_id_if_unbound(user_id, device_id).await
    }

    async fn list_by_device_id(&self, device_id: &str) -> device::Result<Vec<StudentRecord>> {
        self.inner.list_by_device_id(device_id).await
    }

    async fn clear_device_id(&self, user_id: &str) -> device::Result<bool> {
        self.inner.clear_device_id(user_id).await
    }
}

#[tokio::test]
async fn test_lost_claim_is_reported_as_mismatch() {
    let (_, identity) = identity_with("d1").await;
    let store = Arc::new(ClaimedFirstStore {
        inner: InMemoryStudentStore::with_records([student("u1", "R1", None)]).await,
        rival: "d-rival".to_string(),
    });
    let validator = DeviceBindingValidator::new(identity, store.clone());

    let result = validator.validate("u1").await;

    assert!(!result.is_valid);
    assert_eq!(result.outcome, BindingOutcome::Mismatch);
    assert_eq!(store.inner.snapshot("u1").await.unwrap().device_id.as_deref(), Some("d-rival"));
}

/// Store that accepts our write and then lets a rival overwrite it
struct OverwrittenStore {
    inner: InMemoryStudentStore,
    rival: String,
}

#[async_trait]
impl StudentRecordStore for OverwrittenStore {
    async fn get_by_user_id(&self, user_id: &str) -> device::Result<Option<StudentRecord>> {
        self.inner.get_by_user_id(user_id).await
    }

    async fn update_device_id(&self, user_id: &str, device_id: &str) -> device::Result<()> {
        self.inner.update_device_id(user_id, device_id).await
    }

    async fn update_device_id_if_unbound(&self, user_id: &str, device_id: &str) -> device::Result<bool> {
        let claimed = self.inner.update_device_id_if_unbound(user_id, device_id).await?;
        self.inner.update_device_id(user_id, &self.rival).await?;
        Ok(claimed)
    }

    async fn list_by_device_id(&self, device_id: &str) -> device::Result<Vec<StudentRecord>> {
        self.inner.list_by_device_id(device_id).await
    }

    async fn clear_device_id(&self, user_id: &str) -> device::Result<bool> {
        self.inner.clear_device_id(user_id).await
    }
}

#[tokio::test]
async fn test_overwritten_claim_is_late_conflict() {
    let (_, identity) = identity_with("d1").await;
    let store = Arc::new(OverwrittenStore {
        inner: InMemoryStudentStore::with_records([student("u1", "R1", None)]).await,
        rival: "d-rival".to_string(),
    });
    let validator = DeviceBindingValidator::new(identity, store);

    let result = validator.validate("u1").await;

    assert!(!result.is_valid);
    assert_eq!(result.outcome, BindingOutcome::LateConflict);
    assert!(result.outcome.requires_sign_out());
}

#[tokio::test]
async fn test_conflict_scan_with_shared_device() {
    let (_, validator) = validator_for(
        "d1",
        vec![student("u1", "R1", Some("d1")), student("u2", "R2", Some("d1"))],
    )
    .await;
    let local = DeviceIdentity::from("d1");

    let report = validator.check_conflicts(&local, &AuthIdentity::new("u2", "u2@x")).await;

    assert!(report.has_conflict);
    assert!(!report.lookup_failed);
    assert_eq!(report.conflicting_records.len(), 1);
    assert_eq!(report.conflicting_records[0].auth_user_id, "u1");
    assert!(report.message.contains("Student u1 (R1)"));
}

#[tokio::test]
async fn test_conflict_scan_names_other_owner_for_either_caller() {
    let (_, validator) = validator_for(
        "d1",
        vec![student("u1", "R1", Some("d1")), student("u2", "R2", Some("d1"))],
    )
    .await;
    let local = DeviceIdentity::from("d1");

    for (caller, other) in [("u1", "u2"), ("u2", "u1")] {
        let auth = AuthIdentity::new(caller, format!("{}@x", caller));
        let report = validator.check_conflicts(&local, &auth).await;

        assert!(report.has_conflict);
        let owners: Vec<&str> = report
            .conflicting_records
            .iter()
            .map(|r| r.auth_user_id.as_str())
            .collect();
        assert_eq!(owners, vec![other]);
    }
}

#[tokio::test]
async fn test_conflict_scan_matches_owner_by_email() {
    let (_, validator) = validator_for("d1", vec![student("u1", "R1", Some("d1"))]).await;
    let local = DeviceIdentity::from("d1");

    let report = validator
        .check_conflicts(&local, &AuthIdentity::new("different-id", "U1@X"))
        .await;

    assert!(!report.has_conflict);
}

#[tokio::test]
async fn test_conflict_scan_without_bindings() {
    let (_, validator) = validator_for("d1", vec![student("u1", "R1", None)]).await;
    let local = DeviceIdentity::from("d1");

    let report = validator.check_conflicts(&local, &AuthIdentity::new("u1", "u1@x")).await;

    assert!(!report.has_conflict);
    assert!(report.conflicting_records.is_empty());
}

#[tokio::test]
async fn test_conflict_scan_own_binding_is_clear() {
    let (_, validator) = validator_for("d1", vec![student("u1", "R1", Some("d1"))]).await;
    let local = DeviceIdentity::from("d1");

    let report = validator.check_conflicts(&local, &AuthIdentity::new("u1", "u1@x")).await;

    assert!(!report.has_conflict);
}

#[tokio::test]
async fn test_conflict_scan_other_owner() {
    let (_, validator) = validator_for("d1", vec![student("u1", "R1", Some("d1"))]).await;
    let local = DeviceIdentity::from("d1");

    let report = validator.check_conflicts(&local, &AuthIdentity::new("u9", "u9@x")).await;

    assert!(report.has_conflict);
    assert_eq!(report.conflicting_records[0].auth_user_id, "u1");
}

#[tokio::test]
async fn test_conflict_scan_fails_open() {
    let (store, validator) = validator_for("d1", vec![student("u1", "R1", Some("d1"))]).await;
    store.set_fail_lists(true);
    let local = DeviceIdentity::from("d1");

    let report = validator.check_conflicts(&local, &AuthIdentity::new("u9", "u9@x")).await;

    assert!(!report.has_conflict);
    assert!(report.lookup_failed);
}

#[tokio::test]
async fn test_conflict_message_redacted() {
    let (_, validator) = validator_for("d1", vec![student("u1", "R1", Some("d1"))]).await;
    let validator = validator.with_disclosure(ConflictDisclosure::Redacted);
    let local = DeviceIdentity::from("d1");

    let report = validator.check_conflicts(&local, &AuthIdentity::new("u9", "u9@x")).await;

    assert!(report.has_conflict);
    assert!(!report.message.contains("R1"));
    assert!(report.message.contains("another student"));
}

#[tokio::test]
async fn test_reset_device_for_student() {
    let (store, validator) = validator_for("d2", vec![student("u1", "R1", Some("d1"))]).await;

    assert!(validator.reset_device_for_student("u1").await);
    assert!(!validator.reset_device_for_student("ghost").await);

    // The next validation binds the new device
    let result = validator.validate("u1").await;
    assert_eq!(result.outcome, BindingOutcome::Registered);
    assert_eq!(store.snapshot("u1").await.unwrap().device_id.as_deref(), Some("d2"));
}

#[tokio::test]
async fn test_reset_reports_store_failure() {
    let (store, validator) = validator_for("d1", vec![student("u1", "R1", Some("d1"))]).await;
    store.set_fail_writes(true);

    assert!(!validator.reset_device_for_student("u1").await);
}

#[test]
fn test_binding_conflict_error_message() {
    let report = device::ConflictReport {
        has_conflict: true,
        message: "This device is already registered to Student u1 (R1).".to_string(),
        conflicting_records: vec![student("u1", "R1", Some("d1"))],
        lookup_failed: false,
    };

    let error = DeviceError::BindingConflict(report);
    assert!(error.to_string().contains("Student u1 (R1)"));
    assert!(!error.is_connectivity());
}
