#![allow(dead_code)]

use device::{DeviceIdentityManager, MemorySecureStore, SecureStore, DEVICE_ID_KEY};
use shared::models::StudentRecord;
use std::sync::Arc;
use uuid::Uuid;

pub fn student(user_id: &str, roll: &str, device_id: Option<&str>) -> StudentRecord {
    StudentRecord {
        record_id: Uuid::new_v4(),
        auth_user_id: user_id.to_string(),
        name: format!("Student {}", user_id),
        email: format!("{}@x", user_id),
        roll_number: roll.to_string(),
        program_id: "cs".to_string(),
        current_year: 2,
        device_id: device_id.map(str::to_string),
        updated_at: None,
    }
}

/// Identity manager whose store already holds `device_id`
pub async fn identity_with(device_id: &str) -> (Arc<MemorySecureStore>, DeviceIdentityManager) {
    let store = Arc::new(MemorySecureStore::new());
    store
        .set(DEVICE_ID_KEY, &format!("\"{}\"", device_id))
        .await
        .unwrap();
    let manager = DeviceIdentityManager::new(store.clone());
    (store, manager)
}
