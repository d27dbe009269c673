use chrono::Utc;
use shared::models::StudentRecord;
use tokio_postgres::Row;
use crate::DbPool;

const STUDENT_COLUMNS: &str =
    "id, user_id, name, email, roll_number, program_id, current_year, device_id, updated_at";

fn student_from_row(r: &Row) -> StudentRecord {
    StudentRecord {
        record_id: r.get(0),
        auth_user_id: r.get(1),
        name: r.get(2),
        email: r.get(3),
        roll_number: r.get(4),
        program_id: r.get(5),
        current_year: r.get(6),
        device_id: r.get(7),
        updated_at: r.get(8),
    }
}

// ============================================================================
// Student Lookups
// ============================================================================

/// Get the student record for an authenticated user
pub async fn get_student_by_user_id(
    pool: &DbPool,
    user_id: &str,
) -> anyhow::Result<Option<StudentRecord>> {
    let client = pool.get().await?;

    let row = client
        .query_opt(
            &format!("SELECT {} FROM students WHERE user_id = $1", STUDENT_COLUMNS),
            &[&user_id],
        )
        .await?;

    Ok(row.as_ref().map(student_from_row))
}

/// List every student record bound to a device identity
pub async fn list_students_by_device_id(
    pool: &DbPool,
    device_id: &str,
) -> anyhow::Result<Vec<StudentRecord>> {
    let client = pool.get().await?;

    let rows = client
        .query(
            &format!(
                "SELECT {} FROM students WHERE device_id = $1 ORDER BY roll_number",
                STUDENT_COLUMNS
            ),
            &[&device_id],
        )
        .await?;

    Ok(rows.iter().map(student_from_row).collect())
}

// ============================================================================
// Device Binding Writes
// ============================================================================

/// Unconditionally set the device id of a student; returns affected row count
pub async fn update_student_device_id(
    pool: &DbPool,
    user_id: &str,
    device_id: &str,
) -> anyhow::Result<u64> {
    let client = pool.get().await?;

    let updated = client
        .execute(
            "UPDATE students SET device_id = $1, updated_at = $2 WHERE user_id = $3",
            &[&device_id, &Utc::now(), &user_id],
        )
        .await?;

    Ok(updated)
}

/// Set the device id only if the student has none yet.
/// Returns false when the student is missing or already bound.
pub async fn claim_student_device_id(
    pool: &DbPool,
    user_id: &str,
    device_id: &str,
) -> anyhow::Result<bool> {
    let client = pool.get().await?;

    let updated = client
        .execute(
            "UPDATE students SET device_id = $1, updated_at = $2
             WHERE user_id = $3 AND device_id IS NULL",
            &[&device_id, &Utc::now(), &user_id],
        )
        .await?;

    Ok(updated == 1)
}

/// Clear the device binding of a student (admin reset)
pub async fn clear_student_device_id(pool: &DbPool, user_id: &str) -> anyhow::Result<bool> {
    let client = pool.get().await?;

    let updated = client
        .execute(
            "UPDATE students SET device_id = NULL, updated_at = $1 WHERE user_id = $2",
            &[&Utc::now(), &user_id],
        )
        .await?;

    Ok(updated == 1)
}
