use chrono::NaiveDate;
use rocket::Request;
use rocket::http::Status;
use rocket::response::status::Custom;
use rocket::serde::json::Json;
use serde::Serialize;

use crate::attendance::{CourseScope, WEEKEND_MESSAGE, is_weekend, local_now};
use crate::auth::{Permission, User};
use crate::error::AppError;
use crate::validation::{ToValidationResponse, ValidationResponse, parse_date};

pub mod attendance;
pub mod auth;
pub mod config;
pub mod courses;
pub mod pickups;
pub mod staff;
pub mod students;
pub mod tuition;

pub type ApiResult<T> = Result<Json<T>, AppError>;

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub success: bool,
    pub message: String,
}

impl MessageResponse {
    pub fn ok(message: impl Into<String>) -> Json<Self> {
        Json(Self {
            success: true,
            message: message.into(),
        })
    }
}

#[derive(Debug, Serialize)]
pub struct CreatedResponse {
    pub id: i64,
}

/// Directors see every course; teachers only the ones they are assigned to.
pub fn course_scope(user: &User) -> CourseScope {
    if user.has_permission(Permission::ViewAllCourses) {
        CourseScope::All
    } else {
        CourseScope::AssignedTo(user.id)
    }
}

pub fn staff_filter(user: &User) -> Option<i64> {
    match course_scope(user) {
        CourseScope::All => None,
        CourseScope::AssignedTo(id) => Some(id),
    }
}

pub fn today() -> NaiveDate {
    local_now().date()
}

/// Parses an optional `YYYY-MM-DD` value, falling back to today.
pub fn date_or_today(value: Option<&str>) -> Result<NaiveDate, AppError> {
    match value {
        Some(value) => parse_date(value),
        None => Ok(today()),
    }
}

/// Absence marking only runs for past or current weekdays.
pub fn require_markable_date(date: NaiveDate, today: NaiveDate) -> Result<(), AppError> {
    if date > today {
        return Err(AppError::Validation(
            "Cannot process a future date".to_string(),
        ));
    }
    if is_weekend(date) {
        return Err(AppError::Validation(WEEKEND_MESSAGE.to_string()));
    }
    Ok(())
}

#[get("/health")]
pub fn health() -> &'static str {
    "OK"
}

#[catch(400)]
pub fn bad_request(_req: &Request) -> Custom<Json<ValidationResponse>> {
    Status::BadRequest.to_validation_response()
}

#[catch(404)]
pub fn not_found(_req: &Request) -> Custom<Json<ValidationResponse>> {
    Status::NotFound.to_validation_response()
}

#[catch(422)]
pub fn unprocessable(_req: &Request) -> Custom<Json<ValidationResponse>> {
    Status::UnprocessableEntity.to_validation_response()
}

#[catch(500)]
pub fn internal_error(_req: &Request) -> Custom<Json<ValidationResponse>> {
    Status::InternalServerError.to_validation_response()
}
