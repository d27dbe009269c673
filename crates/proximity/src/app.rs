// Application wiring from configuration

use crate::controller::{AppEvent, AttendanceController};
use crate::permissions::PermissionManager;
use crate::session::{AttendanceSession, SessionConfig};
use crate::transport::ProximityTransport;
use device::{
    AuthSession, DeviceBindingValidator, DeviceIdentityManager, EncryptedFileStore,
    InMemoryStudentStore, LoginGate, MemorySecureStore, PgStudentStore, SecureStore,
    StudentRecordStore,
};
use shared::config::Config;
use shared::EventBus;
use std::sync::Arc;
use tracing::{info, warn};

/// Everything a screen needs to drive attendance
pub struct App {
    pub controller: AttendanceController,
    pub bus: EventBus<AppEvent>,
    pub permissions: Arc<PermissionManager>,
}

/// Build the attendance stack.
///
/// Installs the configured log subscriber if none is set. Uses PostgreSQL
/// when a database URL is configured and the encrypted file store when a
/// device key is; otherwise falls back to in-memory stores.
pub async fn bootstrap(
    config: &Config,
    transport: Arc<dyn ProximityTransport>,
    auth: Arc<dyn AuthSession>,
) -> anyhow::Result<App> {
    shared::logging::init(config.logging.format);

    let secure_store: Arc<dyn SecureStore> = match &config.device_store.key {
        Some(key) => {
            info!(path = %config.device_store.path.display(), "Using encrypted device store");
            Arc::new(EncryptedFileStore::new(
                config.device_store.path.clone(),
                key.as_bytes(),
            ))
        }
        None => {
            warn!("DEVICE_STORE_KEY not set, device identity will not persist across restarts");
            Arc::new(MemorySecureStore::new())
        }
    };

    let records: Arc<dyn StudentRecordStore> = match &config.database.url {
        Some(url) => {
            let pool = database::create_pool(url, config.database.max_connections).await?;
            database::run_migrations(&pool).await?;
            Arc::new(PgStudentStore::new(pool))
        }
        None => {
            warn!("DATABASE_URL not set, using in-memory student records");
            Arc::new(InMemoryStudentStore::new())
        }
    };

    let validator = DeviceBindingValidator::new(DeviceIdentityManager::new(secure_store), records)
        .with_disclosure(config.binding.conflict_disclosure);
    let gate = LoginGate::new(validator, auth);

    let session = Arc::new(AttendanceSession::new(
        transport,
        SessionConfig::from(&config.proximity),
    ));
    let permissions = Arc::new(PermissionManager::new());
    let bus = EventBus::new();

    let controller =
        AttendanceController::new(gate, permissions.clone(), session, bus.clone());

    Ok(App {
        controller,
        bus,
        permissions,
    })
}
