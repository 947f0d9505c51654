use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use sqlx::{Pool, QueryBuilder, Sqlite};
use tracing::{info, instrument};

use crate::error::AppError;
use crate::models::{
    DbDirectorNotice, DbStaffAttendance, DbStudentAttendance, DirectorNotice, NoticeKind,
    StaffAttendance, StudentAttendance,
};

const STUDENT_ATTENDANCE_SELECT: &str = "SELECT a.id, a.student_id, \
     s.first_name || ' ' || s.last_name AS student_name, a.course_id, a.marked_by, a.date, \
     a.present, a.arrived_at FROM student_attendance a JOIN students s ON s.id = a.student_id";

const STAFF_ATTENDANCE_SELECT: &str = "SELECT sa.id, sa.user_id, \
     u.first_name || ' ' || u.last_name AS staff_name, sa.course_id, c.name AS course_name, \
     sa.date, sa.arrived_at, sa.departed_at, sa.absent FROM staff_attendance sa \
     JOIN users u ON u.id = sa.user_id JOIN courses c ON c.id = sa.course_id";

const NOTICE_SELECT: &str = "SELECT n.id, n.user_id, \
     u.first_name || ' ' || u.last_name AS staff_name, n.course_id, c.name AS course_name, \
     n.date, n.kind, n.requested_at, n.processed, n.processed_by, n.processed_at \
     FROM director_notices n JOIN users u ON u.id = n.user_id JOIN courses c ON c.id = n.course_id";

#[derive(Debug, Clone, Copy)]
pub struct AttendanceEntry {
    pub student_id: i64,
    pub present: bool,
    pub arrived_at: Option<NaiveTime>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AttendanceFilter {
    pub course_id: Option<i64>,
    pub date: Option<NaiveDate>,
    pub staff_id: Option<i64>,
}

/// Upserts one row per (student, date). Returns `(created, updated)`.
#[instrument(skip(pool, entries), fields(entries = entries.len()))]
pub async fn register_student_attendance(
    pool: &Pool<Sqlite>,
    course_id: i64,
    date: NaiveDate,
    marked_by: i64,
    entries: &[AttendanceEntry],
) -> Result<(u64, u64), AppError> {
    info!("Registering student attendance");

    let mut tx = pool.begin().await?;
    let mut created = 0;
    let mut updated = 0;

    for entry in entries {
        let enrolled: Option<(Option<i64>,)> =
            sqlx::query_as("SELECT course_id FROM students WHERE id = ?")
                .bind(entry.student_id)
                .fetch_optional(&mut *tx)
                .await?;

        if !matches!(enrolled, Some((Some(id),)) if id == course_id) {
            return Err(AppError::Validation(format!(
                "Student {} does not belong to this course",
                entry.student_id
            )));
        }

        let arrived_at = if entry.present { entry.arrived_at } else { None };

        let existing: Option<(i64,)> =
            sqlx::query_as("SELECT id FROM student_attendance WHERE student_id = ? AND date = ?")
                .bind(entry.student_id)
                .bind(date)
                .fetch_optional(&mut *tx)
                .await?;

        match existing {
            Some((id,)) => {
                sqlx::query(
                    "UPDATE student_attendance SET present = ?, arrived_at = ?, marked_by = ?, \
                     course_id = ? WHERE id = ?",
                )
                .bind(entry.present)
                .bind(arrived_at)
                .bind(marked_by)
                .bind(course_id)
                .bind(id)
                .execute(&mut *tx)
                .await?;
                updated += 1;
            }
            _ => {
                sqlx::query(
                    "INSERT INTO student_attendance (student_id, course_id, marked_by, date, \
                     present, arrived_at) VALUES (?, ?, ?, ?, ?, ?)",
                )
                .bind(entry.student_id)
                .bind(course_id)
                .bind(marked_by)
                .bind(date)
                .bind(entry.present)
                .bind(arrived_at)
                .execute(&mut *tx)
                .await?;
                created += 1;
            }
        }
    }

    tx.commit().await?;
    Ok((created, updated))
}

#[instrument(skip(pool))]
pub async fn list_student_attendance(
    pool: &Pool<Sqlite>,
    filter: AttendanceFilter,
) -> Result<Vec<StudentAttendance>, AppError> {
    info!("Listing student attendance");
    let rows = sqlx::query_as::<_, DbStudentAttendance>(&format!(
        "{} WHERE (?1 IS NULL OR a.course_id = ?1) AND (?2 IS NULL OR a.date = ?2) \
         AND (?3 IS NULL OR a.course_id IN (SELECT course_id FROM course_staff WHERE user_id = ?3)) \
         ORDER BY a.date DESC, s.last_name, s.first_name",
        STUDENT_ATTENDANCE_SELECT
    ))
    .bind(filter.course_id)
    .bind(filter.date)
    .bind(filter.staff_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(StudentAttendance::from).collect())
}

/// Students enrolled in the course with no attendance row for the date.
#[instrument(skip(pool))]
pub async fn students_missing_attendance(
    pool: &Pool<Sqlite>,
    course_id: i64,
    date: NaiveDate,
) -> Result<Vec<i64>, AppError> {
    let rows: Vec<(i64,)> = sqlx::query_as(
        "SELECT s.id FROM students s WHERE s.course_id = ? AND NOT EXISTS \
         (SELECT 1 FROM student_attendance a WHERE a.student_id = s.id AND a.date = ?) \
         ORDER BY s.id",
    )
    .bind(course_id)
    .bind(date)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|(id,)| id).collect())
}

#[instrument(skip(pool, student_ids), fields(count = student_ids.len()))]
pub async fn insert_student_absences(
    pool: &Pool<Sqlite>,
    course_id: i64,
    date: NaiveDate,
    marked_by: i64,
    student_ids: &[i64],
) -> Result<u64, AppError> {
    if student_ids.is_empty() {
        return Ok(0);
    }

    info!("Inserting student absences");
    let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
        "INSERT INTO student_attendance (student_id, course_id, marked_by, date, present) ",
    );
    builder.push_values(student_ids, |mut row, student_id| {
        row.push_bind(*student_id)
            .push_bind(course_id)
            .push_bind(marked_by)
            .push_bind(date)
            .push_bind(false);
    });

    let res = builder.build().execute(pool).await?;
    Ok(res.rows_affected())
}

/// Returns `(total, absences)` over the date range.
#[instrument(skip(pool))]
pub async fn student_attendance_counts(
    pool: &Pool<Sqlite>,
    from: NaiveDate,
    to: NaiveDate,
    course_id: Option<i64>,
    staff_id: Option<i64>,
) -> Result<(i64, i64), AppError> {
    info!("Counting student attendance");
    let (total, absences): (i64, Option<i64>) = sqlx::query_as(
        "SELECT COUNT(*), SUM(CASE WHEN present THEN 0 ELSE 1 END) FROM student_attendance \
         WHERE date BETWEEN ?1 AND ?2 AND (?3 IS NULL OR course_id = ?3) \
         AND (?4 IS NULL OR course_id IN (SELECT course_id FROM course_staff WHERE user_id = ?4))",
    )
    .bind(from)
    .bind(to)
    .bind(course_id)
    .bind(staff_id)
    .fetch_one(pool)
    .await?;

    Ok((total, absences.unwrap_or_default()))
}

#[instrument(skip(pool))]
pub async fn get_staff_record(
    pool: &Pool<Sqlite>,
    user_id: i64,
    course_id: i64,
    date: NaiveDate,
) -> Result<Option<StaffAttendance>, AppError> {
    let row = sqlx::query_as::<_, DbStaffAttendance>(&format!(
        "{} WHERE sa.user_id = ? AND sa.course_id = ? AND sa.date = ?",
        STAFF_ATTENDANCE_SELECT
    ))
    .bind(user_id)
    .bind(course_id)
    .bind(date)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(StaffAttendance::from))
}

#[instrument(skip(pool))]
pub async fn set_staff_arrival(
    pool: &Pool<Sqlite>,
    user_id: i64,
    course_id: i64,
    date: NaiveDate,
    arrived_at: NaiveTime,
) -> Result<(), AppError> {
    info!("Recording staff arrival");
    sqlx::query(
        "INSERT INTO staff_attendance (user_id, course_id, date, arrived_at, absent) \
         VALUES (?, ?, ?, ?, FALSE) ON CONFLICT (user_id, course_id, date) \
         DO UPDATE SET arrived_at = excluded.arrived_at, absent = FALSE",
    )
    .bind(user_id)
    .bind(course_id)
    .bind(date)
    .bind(arrived_at)
    .execute(pool)
    .await?;

    Ok(())
}

#[instrument(skip(pool))]
pub async fn set_staff_departure(
    pool: &Pool<Sqlite>,
    record_id: i64,
    departed_at: NaiveTime,
) -> Result<(), AppError> {
    info!("Recording staff departure");
    sqlx::query("UPDATE staff_attendance SET departed_at = ? WHERE id = ?")
        .bind(departed_at)
        .bind(record_id)
        .execute(pool)
        .await?;

    Ok(())
}

#[instrument(skip(pool))]
pub async fn set_staff_absent(
    pool: &Pool<Sqlite>,
    user_id: i64,
    course_id: i64,
    date: NaiveDate,
) -> Result<(), AppError> {
    info!("Marking staff member absent");
    sqlx::query(
        "INSERT INTO staff_attendance (user_id, course_id, date, absent) VALUES (?, ?, ?, TRUE) \
         ON CONFLICT (user_id, course_id, date) \
         DO UPDATE SET absent = TRUE, arrived_at = NULL, departed_at = NULL",
    )
    .bind(user_id)
    .bind(course_id)
    .bind(date)
    .execute(pool)
    .await?;

    Ok(())
}

#[instrument(skip(pool))]
pub async fn list_staff_records(
    pool: &Pool<Sqlite>,
    user_id: i64,
    date: NaiveDate,
) -> Result<Vec<StaffAttendance>, AppError> {
    info!("Listing staff records for date");
    let rows = sqlx::query_as::<_, DbStaffAttendance>(&format!(
        "{} WHERE sa.user_id = ? AND sa.date = ? ORDER BY c.name",
        STAFF_ATTENDANCE_SELECT
    ))
    .bind(user_id)
    .bind(date)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(StaffAttendance::from).collect())
}

#[instrument(skip(pool))]
pub async fn list_staff_absences(
    pool: &Pool<Sqlite>,
    user_id: Option<i64>,
    from: NaiveDate,
    to: NaiveDate,
) -> Result<Vec<StaffAttendance>, AppError> {
    info!("Listing staff absences");
    let rows = sqlx::query_as::<_, DbStaffAttendance>(&format!(
        "{} WHERE sa.absent = TRUE AND sa.date BETWEEN ?1 AND ?2 \
         AND (?3 IS NULL OR sa.user_id = ?3) ORDER BY sa.date DESC, c.name, staff_name",
        STAFF_ATTENDANCE_SELECT
    ))
    .bind(from)
    .bind(to)
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(StaffAttendance::from).collect())
}

/// Staff assigned to the course with no attendance row for the date and no
/// unprocessed notice to the director for that course and date.
#[instrument(skip(pool))]
pub async fn staff_missing_attendance(
    pool: &Pool<Sqlite>,
    course_id: i64,
    date: NaiveDate,
) -> Result<Vec<i64>, AppError> {
    let rows: Vec<(i64,)> = sqlx::query_as(
        "SELECT cs.user_id FROM course_staff cs WHERE cs.course_id = ?1 \
         AND NOT EXISTS (SELECT 1 FROM staff_attendance sa WHERE sa.user_id = cs.user_id \
             AND sa.course_id = ?1 AND sa.date = ?2) \
         AND NOT EXISTS (SELECT 1 FROM director_notices n WHERE n.user_id = cs.user_id \
             AND n.course_id = ?1 AND n.date = ?2 AND n.processed = FALSE) \
         ORDER BY cs.user_id",
    )
    .bind(course_id)
    .bind(date)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|(id,)| id).collect())
}

#[instrument(skip(pool, user_ids), fields(count = user_ids.len()))]
pub async fn insert_staff_absences(
    pool: &Pool<Sqlite>,
    course_id: i64,
    date: NaiveDate,
    user_ids: &[i64],
) -> Result<u64, AppError> {
    if user_ids.is_empty() {
        return Ok(0);
    }

    info!("Inserting staff absences");
    let mut builder: QueryBuilder<Sqlite> =
        QueryBuilder::new("INSERT INTO staff_attendance (user_id, course_id, date, absent) ");
    builder.push_values(user_ids, |mut row, user_id| {
        row.push_bind(*user_id)
            .push_bind(course_id)
            .push_bind(date)
            .push_bind(true);
    });

    let res = builder.build().execute(pool).await?;
    Ok(res.rows_affected())
}

#[instrument(skip(pool))]
pub async fn get_director_notice(
    pool: &Pool<Sqlite>,
    notice_id: i64,
) -> Result<DirectorNotice, AppError> {
    let row = sqlx::query_as::<_, DbDirectorNotice>(&format!("{} WHERE n.id = ?", NOTICE_SELECT))
        .bind(notice_id)
        .fetch_optional(pool)
        .await?;

    match row {
        Some(notice) => Ok(DirectorNotice::from(notice)),
        _ => Err(AppError::NotFound(format!(
            "Notice with id {} not found",
            notice_id
        ))),
    }
}

#[instrument(skip(pool))]
pub async fn find_director_notice(
    pool: &Pool<Sqlite>,
    user_id: i64,
    course_id: i64,
    date: NaiveDate,
    kind: NoticeKind,
) -> Result<Option<DirectorNotice>, AppError> {
    let row = sqlx::query_as::<_, DbDirectorNotice>(&format!(
        "{} WHERE n.user_id = ? AND n.course_id = ? AND n.date = ? AND n.kind = ?",
        NOTICE_SELECT
    ))
    .bind(user_id)
    .bind(course_id)
    .bind(date)
    .bind(kind.as_str())
    .fetch_optional(pool)
    .await?;

    Ok(row.map(DirectorNotice::from))
}

#[instrument(skip(pool))]
pub async fn create_director_notice(
    pool: &Pool<Sqlite>,
    user_id: i64,
    course_id: i64,
    date: NaiveDate,
    kind: NoticeKind,
    requested_at: NaiveTime,
) -> Result<i64, AppError> {
    info!("Creating notice to director");
    let res = sqlx::query(
        "INSERT INTO director_notices (user_id, course_id, date, kind, requested_at) \
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(user_id)
    .bind(course_id)
    .bind(date)
    .bind(kind.as_str())
    .bind(requested_at)
    .execute(pool)
    .await?;

    Ok(res.last_insert_rowid())
}

#[instrument(skip(pool))]
pub async fn refresh_director_notice(
    pool: &Pool<Sqlite>,
    notice_id: i64,
    requested_at: NaiveTime,
) -> Result<(), AppError> {
    sqlx::query("UPDATE director_notices SET requested_at = ? WHERE id = ? AND processed = FALSE")
        .bind(requested_at)
        .bind(notice_id)
        .execute(pool)
        .await?;

    Ok(())
}

#[instrument(skip(pool))]
pub async fn list_pending_notices(pool: &Pool<Sqlite>) -> Result<Vec<DirectorNotice>, AppError> {
    info!("Listing pending notices");
    let rows = sqlx::query_as::<_, DbDirectorNotice>(&format!(
        "{} WHERE n.processed = FALSE ORDER BY n.date, n.requested_at",
        NOTICE_SELECT
    ))
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(DirectorNotice::from).collect())
}

#[instrument(skip(pool))]
pub async fn mark_notice_processed(
    pool: &Pool<Sqlite>,
    notice_id: i64,
    processed_by: i64,
    processed_at: NaiveDateTime,
) -> Result<(), AppError> {
    info!("Marking notice processed");
    sqlx::query(
        "UPDATE director_notices SET processed = TRUE, processed_by = ?, processed_at = ? \
         WHERE id = ?",
    )
    .bind(processed_by)
    .bind(processed_at)
    .bind(notice_id)
    .execute(pool)
    .await?;

    Ok(())
}
