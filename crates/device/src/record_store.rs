// Remote student record store abstraction and adapters

use crate::error::{DeviceError, Result};
use async_trait::async_trait;
use chrono::Utc;
use database::DbPool;
use shared::models::StudentRecord;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Queryable store of student records keyed by authenticated user id
#[async_trait]
pub trait StudentRecordStore: Send + Sync {
    /// Read the record of an authenticated user
    async fn get_by_user_id(&self, user_id: &str) -> Result<Option<StudentRecord>>;

    /// Unconditionally set the bound device id
    async fn update_device_id(&self, user_id: &str, device_id: &str) -> Result<()>;

    /// Set the bound device id only if none is bound yet.
    /// Returns whether this call performed the write.
    async fn update_device_id_if_unbound(&self, user_id: &str, device_id: &str) -> Result<bool>;

    /// List every record bound to a device id
    async fn list_by_device_id(&self, device_id: &str) -> Result<Vec<StudentRecord>>;

    /// Remove the device binding (admin reset). Returns whether a record changed.
    async fn clear_device_id(&self, user_id: &str) -> Result<bool>;
}

/// PostgreSQL-backed record store
#[derive(Clone)]
pub struct PgStudentStore {
    pool: DbPool,
}

impl PgStudentStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn record_store_error(err: anyhow::Error) -> DeviceError {
    DeviceError::RecordStore(err.to_string())
}

#[async_trait]
impl StudentRecordStore for PgStudentStore {
    async fn get_by_user_id(&self, user_id: &str) -> Result<Option<StudentRecord>> {
        database::get_student_by_user_id(&self.pool, user_id)
            .await
            .map_err(record_store_error)
    }

    async fn update_device_id(&self, user_id: &str, device_id: &str) -> Result<()> {
        let updated = database::update_student_device_id(&self.pool, user_id, device_id)
            .await
            .map_err(record_store_error)?;

        if updated == 0 {
            return Err(DeviceError::StudentNotFound(user_id.to_string()));
        }
        Ok(())
    }

    async fn update_device_id_if_unbound(&self, user_id: &str, device_id: &str) -> Result<bool> {
        database::claim_student_device_id(&self.pool, user_id, device_id)
            .await
            .map_err(record_store_error)
    }

    async fn list_by_device_id(&self, device_id: &str) -> Result<Vec<StudentRecord>> {
        database::list_students_by_device_id(&self.pool, device_id)
            .await
            .map_err(record_store_error)
    }

    async fn clear_device_id(&self, user_id: &str) -> Result<bool> {
        database::clear_student_device_id(&self.pool, user_id)
            .await
            .map_err(record_store_error)
    }
}

/// In-memory record store for tests and local development.
///
/// Each operation class can be made to fail to simulate backend outages, and
/// device-id writes are counted.
#[derive(Default)]
pub struct InMemoryStudentStore {
    records: Arc<RwLock<HashMap<String, StudentRecord>>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    fail_lists: AtomicBool,
    writes: AtomicUsize,
}

impl InMemoryStudentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store pre-populated with records
    pub async fn with_records(records: impl IntoIterator<Item = StudentRecord>) -> Self {
        let store = Self::new();
        for record in records {
            store.insert(record).await;
        }
        store
    }

    /// Insert or replace a record, keyed by its auth user id
    pub async fn insert(&self, record: StudentRecord) {
        self.records
            .write()
            .await
            .insert(record.auth_user_id.clone(), record);
    }

    /// Snapshot of a record, bypassing failure injection
    pub async fn snapshot(&self, user_id: &str) -> Option<StudentRecord> {
        self.records.read().await.get(user_id).cloned()
    }

    /// Number of device-id writes performed so far
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_lists(&self, fail: bool) {
        self.fail_lists.store(fail, Ordering::SeqCst);
    }

    fn check(&self, flag: &AtomicBool, operation: &str) -> Result<()> {
        if flag.load(Ordering::SeqCst) {
            return Err(DeviceError::RecordStore(format!("{} unavailable", operation)));
        }
        Ok(())
    }

    fn write_device_id(&self, record: &mut StudentRecord, device_id: Option<&str>) {
        record.device_id = device_id.map(str::to_string);
        record.updated_at = Some(Utc::now());
        self.writes.fetch_add(1, Ordering::SeqCst);
        debug!(user_id = %record.auth_user_id, bound = device_id.is_some(), "Student device id written");
    }
}

#[async_trait]
impl StudentRecordStore for InMemoryStudentStore {
    async fn get_by_user_id(&self, user_id: &str) -> Result<Option<StudentRecord>> {
        self.check(&self.fail_reads, "read")?;
        Ok(self.records.read().await.get(user_id).cloned())
    }

    async fn update_device_id(&self, user_id: &str, device_id: &str) -> Result<()> {
        self.check(&self.fail_writes, "update")?;

        let mut records = self.records.write().await;
        let record = records
            .get_mut(user_id)
            .ok_or_else(|| DeviceError::StudentNotFound(user_id.to_string()))?;

        self.write_device_id(record, Some(device_id));
        Ok(())
    }

    async fn update_device_id_if_unbound(&self, user_id: &str, device_id: &str) -> Result<bool> {
        self.check(&self.fail_writes, "update")?;

        let mut records = self.records.write().await;
        match records.get_mut(user_id) {
            Some(record) if record.device_id.is_none() => {
                self.write_device_id(record, Some(device_id));
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_by_device_id(&self, device_id: &str) -> Result<Vec<StudentRecord>> {
        self.check(&self.fail_lists, "list")?;

        let records = self.records.read().await;
        let mut bound: Vec<StudentRecord> = records
            .values()
            .filter(|record| record.device_id.as_deref() == Some(device_id))
            .cloned()
            .collect();
        bound.sort_by(|a, b| a.roll_number.cmp(&b.roll_number));

        Ok(bound)
    }

    async fn clear_device_id(&self, user_id: &str) -> Result<bool> {
        self.check(&self.fail_writes, "update")?;

        let mut records = self.records.write().await;
        match records.get_mut(user_id) {
            Some(record) => {
                self.write_device_id(record, None);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
