use rocket::State;
use rocket::serde::json::Json;
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Sqlite};
use tracing::info;

use super::ApiResult;
use crate::auth::{Permission, User};
use crate::db::{get_system_config, set_attendance_enabled};
use crate::models::SystemConfig;

#[derive(Debug, Deserialize)]
pub struct AttendanceToggleRequest {
    pub enabled: bool,
}

#[derive(Debug, Serialize)]
pub struct AttendanceStatus {
    pub enabled: bool,
    pub message: String,
}

#[get("/config")]
pub async fn api_get_config(user: User, db: &State<Pool<Sqlite>>) -> ApiResult<SystemConfig> {
    user.require_permission(Permission::ManageSystemConfig)?;
    Ok(Json(get_system_config(db).await?))
}

#[post("/config/attendance/toggle")]
pub async fn api_toggle_attendance(
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<SystemConfig> {
    user.require_permission(Permission::ManageSystemConfig)?;

    let current = get_system_config(db).await?;
    let config = set_attendance_enabled(db, !current.attendance_enabled, user.id).await?;

    info!(enabled = config.attendance_enabled, "Attendance registration toggled");
    Ok(Json(config))
}

#[put("/config/attendance", data = "<request>")]
pub async fn api_set_attendance(
    user: User,
    request: Json<AttendanceToggleRequest>,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<SystemConfig> {
    user.require_permission(Permission::ManageSystemConfig)?;
    Ok(Json(set_attendance_enabled(db, request.enabled, user.id).await?))
}

#[get("/config/attendance/status")]
pub async fn api_attendance_status(
    _user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<AttendanceStatus> {
    let config = get_system_config(db).await?;
    let message = if config.attendance_enabled {
        "Attendance registration is enabled"
    } else {
        "Attendance registration is currently disabled"
    };

    Ok(Json(AttendanceStatus {
        enabled: config.attendance_enabled,
        message: message.to_string(),
    }))
}
