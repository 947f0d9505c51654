use chrono::Utc;
use sqlx::{Pool, Sqlite};
use tracing::{info, instrument};

use crate::error::AppError;
use crate::models::{DbSystemConfig, SystemConfig};

#[instrument(skip(pool))]
pub async fn get_system_config(pool: &Pool<Sqlite>) -> Result<SystemConfig, AppError> {
    info!("Reading system configuration");
    let row = sqlx::query_as::<_, DbSystemConfig>(
        "SELECT attendance_enabled, updated_at, updated_by FROM system_config WHERE id = 1",
    )
    .fetch_optional(pool)
    .await?;

    match row {
        Some(config) => Ok(SystemConfig::from(config)),
        _ => Err(AppError::Internal(
            "System configuration row is missing".to_string(),
        )),
    }
}

#[instrument(skip(pool))]
pub async fn set_attendance_enabled(
    pool: &Pool<Sqlite>,
    enabled: bool,
    updated_by: i64,
) -> Result<SystemConfig, AppError> {
    info!("Updating attendance registration toggle");
    sqlx::query(
        "INSERT INTO system_config (id, attendance_enabled, updated_at, updated_by) \
         VALUES (1, ?1, ?2, ?3) ON CONFLICT (id) DO UPDATE SET \
         attendance_enabled = ?1, updated_at = ?2, updated_by = ?3",
    )
    .bind(enabled)
    .bind(Utc::now().naive_utc())
    .bind(updated_by)
    .execute(pool)
    .await?;

    get_system_config(pool).await
}
