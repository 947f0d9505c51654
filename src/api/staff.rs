use rocket::State;
use rocket::serde::json::Json;
use serde::Deserialize;
use sqlx::{Pool, Sqlite};

use super::{ApiResult, date_or_today};
use crate::attendance::local_now;
use crate::auth::{Permission, User};
use crate::db::{get_course, list_pending_notices, list_staff_absences, list_staff_records};
use crate::error::AppError;
use crate::models::{DirectorNotice, NoticeKind, StaffAttendance};
use crate::staff::{
    StaffAbsenceReport, mark_staff_absent, notify_director, process_notice, record_arrival,
    record_departure, staff_absence_report,
};
use crate::validation::{parse_date, parse_time};

#[derive(Debug, Deserialize)]
pub struct StaffTimeRequest {
    pub course_id: i64,
    /// Defaults to the current local time.
    pub time: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct NoticeRequest {
    pub course_id: i64,
    pub kind: NoticeKind,
}

#[derive(Debug, Deserialize)]
pub struct StaffAbsentRequest {
    pub staff_id: i64,
    pub course_id: i64,
}

#[post("/staff/arrival", data = "<request>")]
pub async fn api_record_arrival(
    user: User,
    request: Json<StaffTimeRequest>,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<StaffAttendance> {
    user.require_permission(Permission::RecordOwnAttendance)?;
    get_course(db, request.course_id).await?;

    let now = local_now();
    let time = match request.time.as_deref() {
        Some(value) => parse_time(value)?,
        None => now.time(),
    };

    let record = record_arrival(db, user.id, request.course_id, now.date(), time).await?;
    Ok(Json(record))
}

#[post("/staff/departure", data = "<request>")]
pub async fn api_record_departure(
    user: User,
    request: Json<StaffTimeRequest>,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<StaffAttendance> {
    user.require_permission(Permission::RecordOwnAttendance)?;
    get_course(db, request.course_id).await?;

    let now = local_now();
    let time = match request.time.as_deref() {
        Some(value) => parse_time(value)?,
        None => now.time(),
    };

    let record = record_departure(db, user.id, request.course_id, now.date(), time).await?;
    Ok(Json(record))
}

#[post("/staff/notices", data = "<request>")]
pub async fn api_notify_director(
    user: User,
    request: Json<NoticeRequest>,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<DirectorNotice> {
    user.require_permission(Permission::NotifyDirector)?;
    get_course(db, request.course_id).await?;

    let notice = notify_director(db, user.id, request.course_id, request.kind, local_now()).await?;
    Ok(Json(notice))
}

#[get("/staff/today")]
pub async fn api_my_records_today(
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Vec<StaffAttendance>> {
    user.require_permission(Permission::RecordOwnAttendance)?;
    Ok(Json(list_staff_records(db, user.id, local_now().date()).await?))
}

#[get("/staff/absences?<from>&<to>")]
pub async fn api_my_absences(
    user: User,
    from: &str,
    to: &str,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Vec<StaffAttendance>> {
    user.require_permission(Permission::RecordOwnAttendance)?;

    let (from, to) = (parse_date(from)?, parse_date(to)?);
    if from > to {
        return Err(AppError::Validation(
            "Start date must not be after end date".to_string(),
        ));
    }
    Ok(Json(list_staff_absences(db, Some(user.id), from, to).await?))
}

#[get("/staff/notices/pending")]
pub async fn api_pending_notices(
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Vec<DirectorNotice>> {
    user.require_permission(Permission::ProcessNotices)?;
    Ok(Json(list_pending_notices(db).await?))
}

#[post("/staff/notices/<notice_id>/process")]
pub async fn api_process_notice(
    user: User,
    notice_id: i64,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<DirectorNotice> {
    user.require_permission(Permission::ProcessNotices)?;
    Ok(Json(process_notice(db, notice_id, user.id, local_now()).await?))
}

#[post("/staff/absent", data = "<request>")]
pub async fn api_mark_staff_absent(
    user: User,
    request: Json<StaffAbsentRequest>,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<StaffAttendance> {
    user.require_permission(Permission::ManageStaffAttendance)?;
    get_course(db, request.course_id).await?;

    let record =
        mark_staff_absent(db, request.staff_id, request.course_id, local_now().date()).await?;
    Ok(Json(record))
}

#[get("/staff/absence-report?<date>")]
pub async fn api_staff_absence_report(
    user: User,
    date: Option<&str>,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<StaffAbsenceReport> {
    user.require_permission(Permission::ManageStaffAttendance)?;
    Ok(Json(staff_absence_report(db, date_or_today(date)?).await?))
}
