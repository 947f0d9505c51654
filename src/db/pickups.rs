use chrono::{NaiveDate, NaiveTime};
use sqlx::{Pool, Sqlite};
use tracing::{info, instrument};

use super::{get_student, require_family_of};
use crate::error::AppError;
use crate::models::{DbPickup, Pickup};

const PICKUP_SELECT: &str = "SELECT p.id, p.student_id, \
     s.first_name || ' ' || s.last_name AS student_name, p.family_member_id, \
     f.first_name || ' ' || f.last_name AS family_member_name, p.recorded_by, p.course_id, \
     p.date, p.picked_up_at FROM pickups p JOIN students s ON s.id = p.student_id \
     JOIN family_members f ON f.id = p.family_member_id";

#[derive(Debug, Clone, Copy, Default)]
pub struct PickupFilter {
    pub course_id: Option<i64>,
    pub date: Option<NaiveDate>,
    pub staff_id: Option<i64>,
}

/// Stores the student's current course alongside the pickup.
#[instrument(skip(pool))]
pub async fn record_pickup(
    pool: &Pool<Sqlite>,
    student_id: i64,
    family_member_id: i64,
    recorded_by: i64,
    date: NaiveDate,
    picked_up_at: NaiveTime,
) -> Result<i64, AppError> {
    info!("Recording pickup");
    let student = get_student(pool, student_id).await?;
    require_family_of(
        pool,
        family_member_id,
        student_id,
        "Family member is not authorized to pick up this student",
    )
    .await?;

    let res = sqlx::query(
        "INSERT INTO pickups (student_id, family_member_id, recorded_by, course_id, date, \
         picked_up_at) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(student_id)
    .bind(family_member_id)
    .bind(recorded_by)
    .bind(student.course_id)
    .bind(date)
    .bind(picked_up_at)
    .execute(pool)
    .await?;

    Ok(res.last_insert_rowid())
}

#[instrument(skip(pool))]
pub async fn get_pickup(pool: &Pool<Sqlite>, pickup_id: i64) -> Result<Pickup, AppError> {
    let row = sqlx::query_as::<_, DbPickup>(&format!("{} WHERE p.id = ?", PICKUP_SELECT))
        .bind(pickup_id)
        .fetch_optional(pool)
        .await?;

    match row {
        Some(pickup) => Ok(Pickup::from(pickup)),
        _ => Err(AppError::NotFound(format!(
            "Pickup with id {} not found",
            pickup_id
        ))),
    }
}

#[instrument(skip(pool))]
pub async fn list_pickups(
    pool: &Pool<Sqlite>,
    filter: PickupFilter,
) -> Result<Vec<Pickup>, AppError> {
    info!("Listing pickups");
    let rows = sqlx::query_as::<_, DbPickup>(&format!(
        "{} WHERE (?1 IS NULL OR p.course_id = ?1) AND (?2 IS NULL OR p.date = ?2) \
         AND (?3 IS NULL OR p.course_id IN (SELECT course_id FROM course_staff WHERE user_id = ?3)) \
         ORDER BY p.date DESC, p.picked_up_at DESC",
        PICKUP_SELECT
    ))
    .bind(filter.course_id)
    .bind(filter.date)
    .bind(filter.staff_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(Pickup::from).collect())
}
