use rocket::State;
use rocket::serde::json::Json;
use serde::Deserialize;
use sqlx::{Pool, Sqlite};

use super::{ApiResult, date_or_today, staff_filter};
use crate::attendance::local_now;
use crate::auth::{Permission, User};
use crate::db::{PickupFilter, get_pickup, get_student, list_pickups, record_pickup};
use crate::error::AppError;
use crate::models::Pickup;
use crate::validation::{parse_date, parse_time};

#[derive(Debug, Deserialize)]
pub struct PickupRequest {
    pub student_id: i64,
    pub family_member_id: i64,
    pub date: Option<String>,
    pub time: Option<String>,
}

#[post("/pickups", data = "<request>")]
pub async fn api_record_pickup(
    user: User,
    request: Json<PickupRequest>,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Pickup> {
    user.require_permission(Permission::RecordPickups)?;

    let student = get_student(db, request.student_id).await?;
    if !user.has_permission(Permission::ViewAllCourses) {
        let Some(course_id) = student.course_id else {
            return Err(AppError::Authorization(
                "You are not assigned to this student's course".to_string(),
            ));
        };
        user.require_course_access(db, course_id).await?;
    }

    let date = date_or_today(request.date.as_deref())?;
    let time = match request.time.as_deref() {
        Some(value) => parse_time(value)?,
        None => local_now().time(),
    };

    let id = record_pickup(
        db,
        request.student_id,
        request.family_member_id,
        user.id,
        date,
        time,
    )
    .await?;
    Ok(Json(get_pickup(db, id).await?))
}

#[get("/pickups?<course_id>&<date>")]
pub async fn api_list_pickups(
    user: User,
    course_id: Option<i64>,
    date: Option<&str>,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Vec<Pickup>> {
    user.require_permission(Permission::RecordPickups)?;

    let filter = PickupFilter {
        course_id,
        date: date.map(parse_date).transpose()?,
        staff_id: staff_filter(&user),
    };
    Ok(Json(list_pickups(db, filter).await?))
}
