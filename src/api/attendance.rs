use rocket::State;
use rocket::serde::json::Json;
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Sqlite};
use tracing::info;

use super::{ApiResult, course_scope, date_or_today, require_markable_date, staff_filter, today};
use crate::attendance::{
    AttendanceStatistics, BatchOutcome, CourseScheduleStatus, CourseScope, MarkMode, MarkOutcome,
    Subject, attendance_statistics, local_now, mark_absences_all, mark_student_absences,
    schedule_status,
};
use crate::auth::{Permission, User};
use crate::db::{
    AttendanceEntry, AttendanceFilter, get_course, list_student_attendance,
    register_student_attendance,
};
use crate::env::AppConfig;
use crate::error::AppError;
use crate::models::StudentAttendance;
use crate::validation::{parse_date, parse_time};

#[derive(Debug, Deserialize)]
pub struct AttendanceEntryRequest {
    pub student_id: i64,
    pub present: bool,
    pub arrived_at: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RegisterAttendanceRequest {
    pub course_id: i64,
    pub date: Option<String>,
    pub entries: Vec<AttendanceEntryRequest>,
}

#[derive(Debug, Serialize)]
pub struct RegisterAttendanceResponse {
    pub success: bool,
    pub created: u64,
    pub updated: u64,
}

#[post("/attendance/students", data = "<request>")]
pub async fn api_register_attendance(
    user: User,
    request: Json<RegisterAttendanceRequest>,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<RegisterAttendanceResponse> {
    user.require_permission(Permission::RegisterStudentAttendance)?;

    let request = request.into_inner();
    get_course(db, request.course_id).await?;
    user.require_course_access(db, request.course_id).await?;

    let date = date_or_today(request.date.as_deref())?;
    if date > today() {
        return Err(AppError::Validation(
            "Cannot register attendance for a future date".to_string(),
        ));
    }
    if request.entries.is_empty() {
        return Err(AppError::Validation(
            "At least one attendance entry is required".to_string(),
        ));
    }

    let entries = request
        .entries
        .iter()
        .map(|entry| {
            Ok(AttendanceEntry {
                student_id: entry.student_id,
                present: entry.present,
                arrived_at: entry.arrived_at.as_deref().map(parse_time).transpose()?,
            })
        })
        .collect::<Result<Vec<_>, AppError>>()?;

    let (created, updated) =
        register_student_attendance(db, request.course_id, date, user.id, &entries).await?;

    Ok(Json(RegisterAttendanceResponse {
        success: true,
        created,
        updated,
    }))
}

#[get("/attendance/students?<course_id>&<date>")]
pub async fn api_list_attendance(
    user: User,
    course_id: Option<i64>,
    date: Option<&str>,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Vec<StudentAttendance>> {
    user.require_permission(Permission::ViewAssignedStudents)?;

    let filter = AttendanceFilter {
        course_id,
        date: date.map(parse_date).transpose()?,
        staff_id: staff_filter(&user),
    };
    Ok(Json(list_student_attendance(db, filter).await?))
}

/// Marks absences over every course the caller can see.
#[post("/attendance/absences/mark?<date>")]
pub async fn api_mark_absences(
    user: User,
    date: Option<&str>,
    db: &State<Pool<Sqlite>>,
    config: &State<AppConfig>,
) -> ApiResult<BatchOutcome> {
    user.require_permission(Permission::RegisterStudentAttendance)?;

    let now = local_now();
    let date = date_or_today(date)?;
    require_markable_date(date, now.date())?;

    let outcome = mark_absences_all(
        db,
        Subject::Students,
        course_scope(&user),
        date,
        config.absence_grace_minutes,
        now,
        MarkMode::Scheduled,
    )
    .await?;

    info!(total_marked = outcome.total_marked, "Absence marking finished");
    Ok(Json(outcome))
}

#[post("/attendance/courses/<course_id>/absences/mark?<date>")]
pub async fn api_mark_course_absences(
    user: User,
    course_id: i64,
    date: Option<&str>,
    db: &State<Pool<Sqlite>>,
    config: &State<AppConfig>,
) -> ApiResult<MarkOutcome> {
    user.require_permission(Permission::RegisterStudentAttendance)?;
    mark_one_course(&user, course_id, date, db, config, MarkMode::Scheduled).await
}

#[post("/attendance/courses/<course_id>/absences/force?<date>")]
pub async fn api_force_mark_absences(
    user: User,
    course_id: i64,
    date: Option<&str>,
    db: &State<Pool<Sqlite>>,
    config: &State<AppConfig>,
) -> ApiResult<MarkOutcome> {
    user.require_permission(Permission::ForceMarkAbsences)?;
    mark_one_course(&user, course_id, date, db, config, MarkMode::Forced).await
}

async fn mark_one_course(
    user: &User,
    course_id: i64,
    date: Option<&str>,
    db: &Pool<Sqlite>,
    config: &AppConfig,
    mode: MarkMode,
) -> ApiResult<MarkOutcome> {
    let course = get_course(db, course_id).await?;
    user.require_course_access(db, course_id).await?;

    let now = local_now();
    let date = date_or_today(date)?;
    require_markable_date(date, now.date())?;

    let outcome = mark_student_absences(
        db,
        &course,
        date,
        config.absence_grace_minutes,
        now,
        mode,
    )
    .await?;
    Ok(Json(outcome))
}

#[post("/attendance/staff-absences/mark?<date>")]
pub async fn api_mark_staff_absences(
    user: User,
    date: Option<&str>,
    db: &State<Pool<Sqlite>>,
    config: &State<AppConfig>,
) -> ApiResult<BatchOutcome> {
    user.require_permission(Permission::ManageStaffAttendance)?;

    let now = local_now();
    let date = date_or_today(date)?;
    require_markable_date(date, now.date())?;

    let outcome = mark_absences_all(
        db,
        Subject::Staff,
        CourseScope::All,
        date,
        config.absence_grace_minutes,
        now,
        MarkMode::Scheduled,
    )
    .await?;
    Ok(Json(outcome))
}

#[get("/attendance/schedule-status")]
pub async fn api_schedule_status(
    user: User,
    db: &State<Pool<Sqlite>>,
    config: &State<AppConfig>,
) -> ApiResult<Vec<CourseScheduleStatus>> {
    user.require_any_permission(&[Permission::ViewAllCourses, Permission::ViewAssignedCourses])?;

    let statuses = schedule_status(
        db,
        course_scope(&user),
        config.absence_grace_minutes,
        local_now(),
    )
    .await?;
    Ok(Json(statuses))
}

#[get("/attendance/statistics?<from>&<to>&<course_id>")]
pub async fn api_attendance_statistics(
    user: User,
    from: &str,
    to: &str,
    course_id: Option<i64>,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<AttendanceStatistics> {
    user.require_permission(Permission::ViewAssignedStudents)?;

    if let Some(course_id) = course_id {
        get_course(db, course_id).await?;
        user.require_course_access(db, course_id).await?;
    }

    let statistics = attendance_statistics(
        db,
        parse_date(from)?,
        parse_date(to)?,
        course_id,
        course_scope(&user),
    )
    .await?;
    Ok(Json(statistics))
}
