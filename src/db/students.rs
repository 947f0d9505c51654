use chrono::NaiveDate;
use sqlx::{Pool, Sqlite};
use tracing::{info, instrument};

use super::get_course;
use crate::error::AppError;
use crate::models::{DbFamilyMember, DbStudent, FamilyMember, Relationship, Student};

const STUDENT_SELECT: &str = "SELECT s.id, s.first_name, s.last_name, s.dni, s.birth_date, \
     s.course_id, c.name AS course_name FROM students s LEFT JOIN courses c ON c.id = s.course_id";

const FAMILY_MEMBER_COLUMNS: &str =
    "id, student_id, first_name, last_name, dni, phone, address, email, relationship";

#[derive(Debug, Clone)]
pub struct NewStudent {
    pub first_name: String,
    pub last_name: String,
    pub dni: String,
    pub birth_date: NaiveDate,
    pub course_id: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct NewFamilyMember {
    pub student_id: i64,
    pub first_name: String,
    pub last_name: String,
    pub dni: String,
    pub phone: String,
    pub address: String,
    pub email: String,
    pub relationship: Relationship,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StudentFilter {
    pub course_id: Option<i64>,
    /// Restrict to courses this staff member is assigned to.
    pub staff_id: Option<i64>,
}

async fn ensure_free_place(pool: &Pool<Sqlite>, course_id: i64) -> Result<(), AppError> {
    let course = get_course(pool, course_id).await?;
    if course.free_places <= 0 {
        return Err(AppError::Validation(
            "No places available in this course".to_string(),
        ));
    }
    Ok(())
}

#[instrument(skip(pool))]
pub async fn create_student(pool: &Pool<Sqlite>, student: &NewStudent) -> Result<i64, AppError> {
    info!("Creating student");

    if let Some(course_id) = student.course_id {
        ensure_free_place(pool, course_id).await?;
    }

    let res = sqlx::query(
        "INSERT INTO students (first_name, last_name, dni, birth_date, course_id) \
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&student.first_name)
    .bind(&student.last_name)
    .bind(&student.dni)
    .bind(student.birth_date)
    .bind(student.course_id)
    .execute(pool)
    .await?;

    Ok(res.last_insert_rowid())
}

#[instrument(skip(pool))]
pub async fn update_student(
    pool: &Pool<Sqlite>,
    student_id: i64,
    student: &NewStudent,
) -> Result<(), AppError> {
    info!("Updating student");

    let current = get_student(pool, student_id).await?;
    if let Some(course_id) = student.course_id {
        if current.course_id != Some(course_id) {
            ensure_free_place(pool, course_id).await?;
        }
    }

    sqlx::query(
        "UPDATE students SET first_name = ?, last_name = ?, dni = ?, birth_date = ?, \
         course_id = ? WHERE id = ?",
    )
    .bind(&student.first_name)
    .bind(&student.last_name)
    .bind(&student.dni)
    .bind(student.birth_date)
    .bind(student.course_id)
    .bind(student_id)
    .execute(pool)
    .await?;

    Ok(())
}

#[instrument(skip(pool))]
pub async fn delete_student(pool: &Pool<Sqlite>, student_id: i64) -> Result<(), AppError> {
    info!("Deleting student");
    let res = sqlx::query("DELETE FROM students WHERE id = ?")
        .bind(student_id)
        .execute(pool)
        .await?;

    if res.rows_affected() == 0 {
        return Err(AppError::NotFound(format!(
            "Student with id {} not found",
            student_id
        )));
    }

    Ok(())
}

#[instrument(skip(pool))]
pub async fn get_student(pool: &Pool<Sqlite>, student_id: i64) -> Result<Student, AppError> {
    info!("Fetching student by ID");
    let row = sqlx::query_as::<_, DbStudent>(&format!("{} WHERE s.id = ?", STUDENT_SELECT))
        .bind(student_id)
        .fetch_optional(pool)
        .await?;

    match row {
        Some(student) => Ok(Student::from(student)),
        _ => Err(AppError::NotFound(format!(
            "Student with id {} not found",
            student_id
        ))),
    }
}

#[instrument(skip(pool))]
pub async fn list_students(
    pool: &Pool<Sqlite>,
    filter: StudentFilter,
) -> Result<Vec<Student>, AppError> {
    info!("Listing students");
    let rows = sqlx::query_as::<_, DbStudent>(&format!(
        "{} WHERE (?1 IS NULL OR s.course_id = ?1) \
         AND (?2 IS NULL OR s.course_id IN (SELECT course_id FROM course_staff WHERE user_id = ?2)) \
         ORDER BY s.last_name, s.first_name",
        STUDENT_SELECT
    ))
    .bind(filter.course_id)
    .bind(filter.staff_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(Student::from).collect())
}

#[instrument(skip(pool))]
pub async fn create_family_member(
    pool: &Pool<Sqlite>,
    member: &NewFamilyMember,
) -> Result<i64, AppError> {
    info!("Creating family member");
    get_student(pool, member.student_id).await?;

    let res = sqlx::query(
        "INSERT INTO family_members (student_id, first_name, last_name, dni, phone, address, \
         email, relationship) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(member.student_id)
    .bind(&member.first_name)
    .bind(&member.last_name)
    .bind(&member.dni)
    .bind(&member.phone)
    .bind(&member.address)
    .bind(&member.email)
    .bind(member.relationship.as_str())
    .execute(pool)
    .await?;

    Ok(res.last_insert_rowid())
}

#[instrument(skip(pool))]
pub async fn get_family_member(
    pool: &Pool<Sqlite>,
    member_id: i64,
) -> Result<FamilyMember, AppError> {
    info!("Fetching family member by ID");
    let row = sqlx::query_as::<_, DbFamilyMember>(&format!(
        "SELECT {} FROM family_members WHERE id = ?",
        FAMILY_MEMBER_COLUMNS
    ))
    .bind(member_id)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(member) => Ok(FamilyMember::from(member)),
        _ => Err(AppError::NotFound(format!(
            "Family member with id {} not found",
            member_id
        ))),
    }
}

#[instrument(skip(pool))]
pub async fn list_family_members(
    pool: &Pool<Sqlite>,
    student_id: i64,
) -> Result<Vec<FamilyMember>, AppError> {
    info!("Listing family members of student");
    let rows = sqlx::query_as::<_, DbFamilyMember>(&format!(
        "SELECT {} FROM family_members WHERE student_id = ? ORDER BY id",
        FAMILY_MEMBER_COLUMNS
    ))
    .bind(student_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(FamilyMember::from).collect())
}

/// Fails with a validation error unless the family member is linked to the student.
#[instrument(skip(pool))]
pub async fn require_family_of(
    pool: &Pool<Sqlite>,
    family_member_id: i64,
    student_id: i64,
    message: &str,
) -> Result<FamilyMember, AppError> {
    let member = get_family_member(pool, family_member_id).await?;
    if member.student_id != student_id {
        return Err(AppError::Validation(message.to_string()));
    }
    Ok(member)
}
