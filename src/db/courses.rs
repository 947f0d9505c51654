use chrono::NaiveDate;
use sqlx::{Pool, Sqlite};
use tracing::{info, instrument};

use crate::auth::{DbUser, User};
use crate::error::AppError;
use crate::models::{Course, DbCourse, DbSchoolYear, SchoolYear, Shift};

const COURSE_SELECT: &str = "SELECT c.id, c.name, c.shift, c.capacity, c.schedule, c.room_age, \
     c.school_year_id, c.monthly_fee_cents, c.due_day, \
     (SELECT COUNT(*) FROM students s WHERE s.course_id = c.id) AS enrolled \
     FROM courses c";

#[derive(Debug, Clone)]
pub struct NewCourse {
    pub name: String,
    pub shift: Shift,
    pub capacity: i64,
    pub schedule: String,
    pub room_age: i64,
    pub school_year_id: Option<i64>,
    pub monthly_fee_cents: i64,
    pub due_day: u32,
}

#[instrument(skip(pool))]
pub async fn create_school_year(
    pool: &Pool<Sqlite>,
    starts_on: NaiveDate,
    ends_on: NaiveDate,
) -> Result<i64, AppError> {
    info!("Creating school year");

    if ends_on < starts_on {
        return Err(AppError::Validation(
            "School year must end after it starts".to_string(),
        ));
    }

    let res = sqlx::query("INSERT INTO school_years (starts_on, ends_on) VALUES (?, ?)")
        .bind(starts_on)
        .bind(ends_on)
        .execute(pool)
        .await?;

    Ok(res.last_insert_rowid())
}

#[instrument(skip(pool))]
pub async fn list_school_years(pool: &Pool<Sqlite>) -> Result<Vec<SchoolYear>, AppError> {
    info!("Listing school years");
    let rows = sqlx::query_as::<_, DbSchoolYear>(
        "SELECT id, starts_on, ends_on FROM school_years ORDER BY starts_on DESC",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(SchoolYear::from).collect())
}

#[instrument(skip(pool))]
pub async fn create_course(pool: &Pool<Sqlite>, course: &NewCourse) -> Result<i64, AppError> {
    info!("Creating course");

    let res = sqlx::query(
        "INSERT INTO courses (name, shift, capacity, schedule, room_age, school_year_id, \
         monthly_fee_cents, due_day) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&course.name)
    .bind(course.shift.as_str())
    .bind(course.capacity)
    .bind(&course.schedule)
    .bind(course.room_age)
    .bind(course.school_year_id)
    .bind(course.monthly_fee_cents)
    .bind(course.due_day)
    .execute(pool)
    .await?;

    Ok(res.last_insert_rowid())
}

#[instrument(skip(pool))]
pub async fn update_course(
    pool: &Pool<Sqlite>,
    course_id: i64,
    course: &NewCourse,
) -> Result<(), AppError> {
    info!("Updating course");

    let current = get_course(pool, course_id).await?;
    if course.capacity < current.enrolled {
        return Err(AppError::Validation(format!(
            "Capacity cannot be lower than the {} students already enrolled",
            current.enrolled
        )));
    }

    sqlx::query(
        "UPDATE courses SET name = ?, shift = ?, capacity = ?, schedule = ?, room_age = ?, \
         school_year_id = ?, monthly_fee_cents = ?, due_day = ? WHERE id = ?",
    )
    .bind(&course.name)
    .bind(course.shift.as_str())
    .bind(course.capacity)
    .bind(&course.schedule)
    .bind(course.room_age)
    .bind(course.school_year_id)
    .bind(course.monthly_fee_cents)
    .bind(course.due_day)
    .bind(course_id)
    .execute(pool)
    .await?;

    Ok(())
}

#[instrument(skip(pool))]
pub async fn delete_course(pool: &Pool<Sqlite>, course_id: i64) -> Result<(), AppError> {
    info!("Deleting course");
    let res = sqlx::query("DELETE FROM courses WHERE id = ?")
        .bind(course_id)
        .execute(pool)
        .await?;

    if res.rows_affected() == 0 {
        return Err(AppError::NotFound(format!(
            "Course with id {} not found",
            course_id
        )));
    }

    Ok(())
}

#[instrument(skip(pool))]
pub async fn get_course(pool: &Pool<Sqlite>, course_id: i64) -> Result<Course, AppError> {
    info!("Fetching course by ID");
    let row = sqlx::query_as::<_, DbCourse>(&format!("{} WHERE c.id = ?", COURSE_SELECT))
        .bind(course_id)
        .fetch_optional(pool)
        .await?;

    match row {
        Some(course) => Ok(Course::from(course)),
        _ => Err(AppError::NotFound(format!(
            "Course with id {} not found",
            course_id
        ))),
    }
}

#[instrument(skip(pool))]
pub async fn list_courses(pool: &Pool<Sqlite>) -> Result<Vec<Course>, AppError> {
    info!("Listing all courses");
    let rows = sqlx::query_as::<_, DbCourse>(&format!("{} ORDER BY c.name", COURSE_SELECT))
        .fetch_all(pool)
        .await?;

    Ok(rows.into_iter().map(Course::from).collect())
}

#[instrument(skip(pool))]
pub async fn list_courses_for_staff(
    pool: &Pool<Sqlite>,
    user_id: i64,
) -> Result<Vec<Course>, AppError> {
    info!("Listing courses assigned to staff member");
    let rows = sqlx::query_as::<_, DbCourse>(&format!(
        "{} JOIN course_staff cs ON cs.course_id = c.id WHERE cs.user_id = ? ORDER BY c.name",
        COURSE_SELECT
    ))
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(Course::from).collect())
}

#[instrument(skip(pool))]
pub async fn is_staff_assigned(
    pool: &Pool<Sqlite>,
    course_id: i64,
    user_id: i64,
) -> Result<bool, AppError> {
    let row: Option<(i64,)> =
        sqlx::query_as("SELECT 1 FROM course_staff WHERE course_id = ? AND user_id = ?")
            .bind(course_id)
            .bind(user_id)
            .fetch_optional(pool)
            .await?;

    Ok(row.is_some())
}

async fn require_teacher(pool: &Pool<Sqlite>, user_id: i64) -> Result<(), AppError> {
    let row: Option<(i64,)> =
        sqlx::query_as("SELECT id FROM users WHERE id = ? AND is_teacher = TRUE")
            .bind(user_id)
            .fetch_optional(pool)
            .await?;

    match row {
        Some(_) => Ok(()),
        _ => Err(AppError::NotFound(
            "User does not exist or is not a teacher".to_string(),
        )),
    }
}

#[instrument(skip(pool))]
pub async fn assign_staff(
    pool: &Pool<Sqlite>,
    course_id: i64,
    user_id: i64,
) -> Result<(), AppError> {
    info!("Assigning staff to course");
    get_course(pool, course_id).await?;
    require_teacher(pool, user_id).await?;

    sqlx::query("INSERT OR IGNORE INTO course_staff (course_id, user_id) VALUES (?, ?)")
        .bind(course_id)
        .bind(user_id)
        .execute(pool)
        .await?;

    Ok(())
}

#[instrument(skip(pool))]
pub async fn unassign_staff(
    pool: &Pool<Sqlite>,
    course_id: i64,
    user_id: i64,
) -> Result<(), AppError> {
    info!("Removing staff from course");
    get_course(pool, course_id).await?;
    require_teacher(pool, user_id).await?;

    sqlx::query("DELETE FROM course_staff WHERE course_id = ? AND user_id = ?")
        .bind(course_id)
        .bind(user_id)
        .execute(pool)
        .await?;

    Ok(())
}

/// Staff assigned to the course, lowest user id first.
#[instrument(skip(pool))]
pub async fn list_course_staff(
    pool: &Pool<Sqlite>,
    course_id: i64,
) -> Result<Vec<User>, AppError> {
    info!("Listing course staff");
    let rows = sqlx::query_as::<_, DbUser>(
        "SELECT u.id, u.username, u.first_name, u.last_name, u.email, u.dni, u.phone, \
         u.address, u.birth_date, u.is_teacher, u.is_director \
         FROM users u JOIN course_staff cs ON cs.user_id = u.id \
         WHERE cs.course_id = ? ORDER BY u.id",
    )
    .bind(course_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(User::from).collect())
}
