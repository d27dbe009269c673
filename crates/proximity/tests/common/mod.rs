#![allow(dead_code)]

use async_trait::async_trait;
use device::{
    AuthSession, DeviceBindingValidator, DeviceIdentityManager, InMemoryStudentStore,
    LoginGate, MemorySecureStore, SecureStore, DEVICE_ID_KEY,
};
use proximity::{
    AppEvent, AttendanceController, AttendanceSession, MemoryTransport, PermissionManager,
    SessionConfig, SessionPreconditions, SessionState,
};
use shared::models::{AuthIdentity, StudentRecord};
use shared::EventBus;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

pub const FACULTY: &str = "faculty-phone";

pub fn student(user_id: &str, roll: &str, device_id: Option<&str>) -> StudentRecord {
    StudentRecord {
        record_id: Uuid::new_v4(),
        auth_user_id: user_id.to_string(),
        name: format!("Student {}", user_id),
        email: format!("{}@x", user_id),
        roll_number: roll.to_string(),
        program_id: "cs".to_string(),
        current_year: 3,
        device_id: device_id.map(str::to_string),
        updated_at: None,
    }
}

pub fn ready(roll: &str) -> SessionPreconditions {
    SessionPreconditions {
        permissions_granted: true,
        binding_valid: true,
        roll_number: Some(roll.to_string()),
    }
}

pub fn instant_config() -> SessionConfig {
    SessionConfig {
        discovery_delay: Duration::ZERO,
        ..SessionConfig::default()
    }
}

pub fn session_over(transport: &Arc<MemoryTransport>) -> Arc<AttendanceSession> {
    Arc::new(AttendanceSession::new(transport.clone(), instant_config()))
}

/// Poll until the session reaches `expected`
pub async fn wait_for_state(session: &AttendanceSession, expected: &SessionState) {
    for _ in 0..200 {
        if session.state().await == *expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!(
        "session never reached {:?}, still {:?}",
        expected,
        session.state().await
    );
}

/// Auth backend double that records sign-outs
pub struct FakeAuth {
    user: Mutex<Option<AuthIdentity>>,
    sign_outs: AtomicUsize,
}

impl FakeAuth {
    pub fn signed_in(user_id: &str) -> Arc<Self> {
        Arc::new(Self {
            user: Mutex::new(Some(AuthIdentity::new(user_id, format!("{}@x", user_id)))),
            sign_outs: AtomicUsize::new(0),
        })
    }

    pub fn signed_out() -> Arc<Self> {
        Arc::new(Self {
            user: Mutex::new(None),
            sign_outs: AtomicUsize::new(0),
        })
    }

    pub fn sign_outs(&self) -> usize {
        self.sign_outs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AuthSession for FakeAuth {
    async fn current_user(&self) -> device::Result<Option<AuthIdentity>> {
        Ok(self.user.lock().unwrap().clone())
    }

    async fn sign_out(&self) -> device::Result<()> {
        self.sign_outs.fetch_add(1, Ordering::SeqCst);
        *self.user.lock().unwrap() = None;
        Ok(())
    }
}

pub struct Harness {
    pub controller: AttendanceController,
    pub transport: Arc<MemoryTransport>,
    pub records: Arc<InMemoryStudentStore>,
    pub auth: Arc<FakeAuth>,
    pub permissions: Arc<PermissionManager>,
    pub bus: EventBus<AppEvent>,
}

/// Controller over in-memory collaborators, on a device holding `device_id`
pub async fn harness(
    device_id: &str,
    records: Vec<StudentRecord>,
    auth: Arc<FakeAuth>,
) -> Harness {
    let secure_store = Arc::new(MemorySecureStore::new());
    secure_store
        .set(DEVICE_ID_KEY, &format!("\"{}\"", device_id))
        .await
        .unwrap();

    let records = Arc::new(InMemoryStudentStore::with_records(records).await);
    let validator =
        DeviceBindingValidator::new(DeviceIdentityManager::new(secure_store), records.clone());
    let gate = LoginGate::new(validator, auth.clone());

    let transport = Arc::new(MemoryTransport::new());
    let permissions = Arc::new(PermissionManager::new());
    let bus = EventBus::new();

    let controller = AttendanceController::new(
        gate,
        permissions.clone(),
        session_over(&transport),
        bus.clone(),
    );

    Harness {
        controller,
        transport,
        records,
        auth,
        permissions,
        bus,
    }
}
