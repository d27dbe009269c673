use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// Student models
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentRecord {
    pub record_id: Uuid,
    /// Id of the authenticated account this record belongs to
    pub auth_user_id: String,
    pub name: String,
    pub email: String,
    pub roll_number: String,
    pub program_id: String,
    pub current_year: i32,
    /// Device identity bound to this student, if any
    pub device_id: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl StudentRecord {
    /// "Name (roll)" form used in conflict and mismatch messages
    pub fn display_label(&self) -> String {
        format!("{} ({})", self.name, self.roll_number)
    }
}

// Auth models
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthIdentity {
    pub user_id: String,
    pub email: String,
}

impl AuthIdentity {
    pub fn new(user_id: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            email: email.into(),
        }
    }

    /// Whether a student record belongs to this authenticated identity.
    /// Matches on user id, falling back to a case-insensitive email match.
    pub fn owns(&self, record: &StudentRecord) -> bool {
        record.auth_user_id == self.user_id
            || (!self.email.is_empty() && record.email.eq_ignore_ascii_case(&self.email))
    }
}
