use rocket::State;
use rocket::serde::json::Json;
use serde::Deserialize;
use sqlx::{Pool, Sqlite};
use validator::Validate;

use super::{ApiResult, CreatedResponse, MessageResponse, staff_filter};
use crate::auth::{Permission, User};
use crate::db::{
    NewFamilyMember, NewStudent, StudentFilter, create_family_member, create_student,
    delete_student, get_student, list_family_members, list_students, update_student,
};
use crate::error::AppError;
use crate::models::{FamilyMember, Relationship, Student};
use crate::validation::{JsonValidateExt, parse_date};

#[derive(Debug, Deserialize, Validate)]
pub struct StudentRequest {
    #[validate(length(min = 1, message = "First name is required"))]
    pub first_name: String,
    #[validate(length(min = 1, message = "Last name is required"))]
    pub last_name: String,
    #[validate(length(min = 6, max = 12, message = "DNI must be 6-12 characters"))]
    pub dni: String,
    pub birth_date: String,
    pub course_id: Option<i64>,
}

impl StudentRequest {
    fn into_new_student(self) -> Result<NewStudent, AppError> {
        Ok(NewStudent {
            birth_date: parse_date(&self.birth_date)?,
            first_name: self.first_name.trim().to_string(),
            last_name: self.last_name.trim().to_string(),
            dni: self.dni,
            course_id: self.course_id,
        })
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct FamilyMemberRequest {
    #[validate(length(min = 1, message = "First name is required"))]
    pub first_name: String,
    #[validate(length(min = 1, message = "Last name is required"))]
    pub last_name: String,
    #[validate(length(min = 6, max = 12, message = "DNI must be 6-12 characters"))]
    pub dni: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub address: String,
    #[validate(email(message = "Invalid email address"))]
    pub email: Option<String>,
    #[serde(default)]
    pub relationship: Relationship,
}

/// Directors reach every student; teachers only students enrolled in one of
/// their courses.
async fn require_student_access(
    user: &User,
    db: &Pool<Sqlite>,
    student: &Student,
) -> Result<(), AppError> {
    if user.has_permission(Permission::ViewAllCourses) {
        return Ok(());
    }

    match student.course_id {
        Some(course_id) => user.require_course_access(db, course_id).await,
        None => Err(AppError::Authorization(
            "You are not assigned to this student's course".to_string(),
        )),
    }
}

#[get("/students?<course_id>")]
pub async fn api_list_students(
    user: User,
    course_id: Option<i64>,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Vec<Student>> {
    user.require_permission(Permission::ViewAssignedStudents)?;

    let filter = StudentFilter {
        course_id,
        staff_id: staff_filter(&user),
    };
    Ok(Json(list_students(db, filter).await?))
}

#[get("/students/<student_id>")]
pub async fn api_get_student(
    user: User,
    student_id: i64,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Student> {
    user.require_permission(Permission::ViewAssignedStudents)?;

    let student = get_student(db, student_id).await?;
    require_student_access(&user, db, &student).await?;
    Ok(Json(student))
}

#[post("/students", data = "<request>")]
pub async fn api_create_student(
    user: User,
    request: Json<StudentRequest>,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<CreatedResponse> {
    user.require_permission(Permission::ManageStudents)?;

    let student = request.validate_custom()?.into_new_student()?;
    let id = create_student(db, &student).await?;
    Ok(Json(CreatedResponse { id }))
}

#[put("/students/<student_id>", data = "<request>")]
pub async fn api_update_student(
    user: User,
    student_id: i64,
    request: Json<StudentRequest>,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Student> {
    user.require_permission(Permission::EditAssignedStudents)?;

    let current = get_student(db, student_id).await?;
    require_student_access(&user, db, &current).await?;

    let student = request.validate_custom()?.into_new_student()?;
    if let Some(course_id) = student.course_id {
        user.require_course_access(db, course_id).await?;
    }

    update_student(db, student_id, &student).await?;
    Ok(Json(get_student(db, student_id).await?))
}

#[delete("/students/<student_id>")]
pub async fn api_delete_student(
    user: User,
    student_id: i64,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<MessageResponse> {
    user.require_permission(Permission::ManageStudents)?;

    delete_student(db, student_id).await?;
    Ok(MessageResponse::ok("Student deleted"))
}

#[get("/students/<student_id>/family")]
pub async fn api_list_family_members(
    user: User,
    student_id: i64,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Vec<FamilyMember>> {
    user.require_permission(Permission::ViewAssignedStudents)?;

    let student = get_student(db, student_id).await?;
    require_student_access(&user, db, &student).await?;
    Ok(Json(list_family_members(db, student_id).await?))
}

#[post("/students/<student_id>/family", data = "<request>")]
pub async fn api_create_family_member(
    user: User,
    student_id: i64,
    request: Json<FamilyMemberRequest>,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<CreatedResponse> {
    user.require_permission(Permission::RegisterFamilyMembers)?;

    let student = get_student(db, student_id).await?;
    require_student_access(&user, db, &student).await?;

    let request = request.validate_custom()?;
    let member = NewFamilyMember {
        student_id,
        first_name: request.first_name.trim().to_string(),
        last_name: request.last_name.trim().to_string(),
        dni: request.dni,
        phone: request.phone,
        address: request.address,
        email: request.email.unwrap_or_default(),
        relationship: request.relationship,
    };

    let id = create_family_member(db, &member).await?;
    Ok(Json(CreatedResponse { id }))
}
