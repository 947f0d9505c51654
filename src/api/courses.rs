use rocket::State;
use rocket::serde::json::Json;
use serde::Deserialize;
use sqlx::{Pool, Sqlite};
use validator::Validate;

use super::{ApiResult, CreatedResponse, MessageResponse, course_scope};
use crate::attendance::courses_in_scope;
use crate::auth::{Permission, User};
use crate::db::{
    NewCourse, assign_staff, create_course, create_school_year, delete_course, get_course,
    list_course_staff, list_courses_for_staff, list_school_years, unassign_staff, update_course,
};
use crate::error::AppError;
use crate::models::{Course, SchoolYear, Shift};
use crate::schedule::parse_schedule;
use crate::validation::{JsonValidateExt, parse_date};

#[derive(Debug, Deserialize)]
pub struct SchoolYearRequest {
    pub starts_on: String,
    pub ends_on: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CourseRequest {
    #[validate(length(min = 1, max = 100, message = "Course name is required"))]
    pub name: String,
    #[serde(default)]
    pub shift: Shift,
    #[validate(range(min = 1, message = "Capacity must be at least 1"))]
    pub capacity: i64,
    #[validate(length(min = 1, message = "Schedule is required"))]
    pub schedule: String,
    #[validate(range(min = 0, max = 5, message = "Room age must be between 0 and 5"))]
    pub room_age: i64,
    pub school_year_id: Option<i64>,
    #[validate(range(min = 0, message = "Monthly fee cannot be negative"))]
    #[serde(default)]
    pub monthly_fee_cents: i64,
    #[validate(range(min = 1, max = 28, message = "Due day must be between 1 and 28"))]
    #[serde(default = "default_due_day")]
    pub due_day: u32,
}

fn default_due_day() -> u32 {
    10
}

impl CourseRequest {
    fn into_new_course(self) -> Result<NewCourse, AppError> {
        if parse_schedule(&self.schedule).is_none() {
            return Err(AppError::Validation(
                "Schedule must look like HH:MM - HH:MM".to_string(),
            ));
        }

        Ok(NewCourse {
            name: self.name.trim().to_string(),
            shift: self.shift,
            capacity: self.capacity,
            schedule: self.schedule,
            room_age: self.room_age,
            school_year_id: self.school_year_id,
            monthly_fee_cents: self.monthly_fee_cents,
            due_day: self.due_day,
        })
    }
}

#[get("/school-years")]
pub async fn api_list_school_years(
    _user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Vec<SchoolYear>> {
    Ok(Json(list_school_years(db).await?))
}

#[post("/school-years", data = "<request>")]
pub async fn api_create_school_year(
    user: User,
    request: Json<SchoolYearRequest>,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<CreatedResponse> {
    user.require_permission(Permission::ManageSchoolYears)?;

    let id = create_school_year(
        db,
        parse_date(&request.starts_on)?,
        parse_date(&request.ends_on)?,
    )
    .await?;
    Ok(Json(CreatedResponse { id }))
}

#[get("/courses")]
pub async fn api_list_courses(user: User, db: &State<Pool<Sqlite>>) -> ApiResult<Vec<Course>> {
    user.require_any_permission(&[Permission::ViewAllCourses, Permission::ViewAssignedCourses])?;
    Ok(Json(courses_in_scope(db, course_scope(&user)).await?))
}

#[get("/courses/mine")]
pub async fn api_my_courses(user: User, db: &State<Pool<Sqlite>>) -> ApiResult<Vec<Course>> {
    Ok(Json(list_courses_for_staff(db, user.id).await?))
}

#[get("/courses/<course_id>")]
pub async fn api_get_course(
    user: User,
    course_id: i64,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Course> {
    let course = get_course(db, course_id).await?;
    user.require_course_access(db, course_id).await?;
    Ok(Json(course))
}

#[post("/courses", data = "<request>")]
pub async fn api_create_course(
    user: User,
    request: Json<CourseRequest>,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<CreatedResponse> {
    user.require_permission(Permission::ManageCourses)?;

    let course = request.validate_custom()?.into_new_course()?;
    let id = create_course(db, &course).await?;
    Ok(Json(CreatedResponse { id }))
}

#[put("/courses/<course_id>", data = "<request>")]
pub async fn api_update_course(
    user: User,
    course_id: i64,
    request: Json<CourseRequest>,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Course> {
    user.require_permission(Permission::ManageCourses)?;

    let course = request.validate_custom()?.into_new_course()?;
    update_course(db, course_id, &course).await?;
    Ok(Json(get_course(db, course_id).await?))
}

#[delete("/courses/<course_id>")]
pub async fn api_delete_course(
    user: User,
    course_id: i64,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<MessageResponse> {
    user.require_permission(Permission::ManageCourses)?;

    delete_course(db, course_id).await?;
    Ok(MessageResponse::ok("Course deleted"))
}

#[get("/courses/<course_id>/staff")]
pub async fn api_list_course_staff(
    user: User,
    course_id: i64,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Vec<User>> {
    get_course(db, course_id).await?;
    user.require_course_access(db, course_id).await?;
    Ok(Json(list_course_staff(db, course_id).await?))
}

#[post("/courses/<course_id>/staff/<user_id>")]
pub async fn api_assign_staff(
    user: User,
    course_id: i64,
    user_id: i64,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<MessageResponse> {
    user.require_permission(Permission::AssignStaff)?;

    assign_staff(db, course_id, user_id).await?;
    Ok(MessageResponse::ok("Staff member assigned"))
}

#[delete("/courses/<course_id>/staff/<user_id>")]
pub async fn api_unassign_staff(
    user: User,
    course_id: i64,
    user_id: i64,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<MessageResponse> {
    user.require_permission(Permission::AssignStaff)?;

    unassign_staff(db, course_id, user_id).await?;
    Ok(MessageResponse::ok("Staff member removed"))
}
