use chrono::{Duration, Utc};
use rocket::State;
use rocket::http::{Cookie, CookieJar, SameSite};
use rocket::serde::json::Json;
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Sqlite};
use std::sync::Arc;
use tracing::{info, instrument};
use validator::Validate;

use super::{ApiResult, CreatedResponse, MessageResponse};
use crate::auth::{Permission, SESSION_COOKIE, User, UserSession};
use crate::db::{
    NewUser, authenticate_user, create_user, create_user_session, get_user, invalidate_session,
    list_users, set_user_capabilities, update_user_password, username_exists, verify_password,
};
use crate::env::AppConfig;
use crate::error::AppError;
use crate::mail::Mailer;
use crate::recovery::{
    ResetTokenStatus, remind_username, request_password_reset, reset_password,
    verify_reset_token,
};
use crate::validation::{JsonValidateExt, parse_optional_date};

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(length(min = 1, message = "Username is required"))]
    pub username: String,
    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub success: bool,
    pub user: User,
}

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(length(min = 3, max = 150, message = "Username must be 3-150 characters"))]
    pub username: String,
    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    pub password: String,
    #[validate(length(min = 1, message = "First name is required"))]
    pub first_name: String,
    #[validate(length(min = 1, message = "Last name is required"))]
    pub last_name: String,
    #[validate(email(message = "Invalid email address"))]
    pub email: String,
    #[validate(length(min = 6, max = 12, message = "DNI must be 6-12 characters"))]
    pub dni: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub address: String,
    pub birth_date: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    pub new_password: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct RecoveryEmailRequest {
    #[validate(email(message = "Invalid email address"))]
    pub email: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct VerifyTokenRequest {
    #[validate(length(min = 1, message = "Token is required"))]
    pub token: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ResetPasswordRequest {
    #[validate(length(min = 1, message = "Token is required"))]
    pub token: String,
    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    pub new_password: String,
}

#[derive(Debug, Deserialize)]
pub struct CapabilitiesRequest {
    pub is_teacher: bool,
    pub is_director: bool,
}

#[derive(Debug, Serialize)]
pub struct UsernameAvailability {
    pub username: String,
    pub available: bool,
}

#[post("/login", data = "<login>")]
#[instrument(skip_all)]
pub async fn api_login(
    login: Json<LoginRequest>,
    cookies: &CookieJar<'_>,
    db: &State<Pool<Sqlite>>,
    config: &State<AppConfig>,
) -> ApiResult<LoginResponse> {
    let login = login.validate_custom()?;

    let Some(user) = authenticate_user(db, &login.username, &login.password).await? else {
        return Err(AppError::Authentication(
            "Invalid username or password".to_string(),
        ));
    };

    let token = UserSession::generate_token();
    let expires_at = Utc::now() + Duration::hours(config.session_ttl_hours);

    create_user_session(db, user.id, &token, expires_at.naive_utc()).await?;

    let cookie = Cookie::build((SESSION_COOKIE, token))
        .same_site(SameSite::Lax)
        .http_only(true)
        .max_age(rocket::time::Duration::hours(config.session_ttl_hours));
    cookies.add_private(cookie);

    info!(username = %user.username, "User logged in");
    Ok(Json(LoginResponse {
        success: true,
        user,
    }))
}

#[post("/logout")]
pub async fn api_logout(
    cookies: &CookieJar<'_>,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<MessageResponse> {
    if let Some(cookie) = cookies.get_private(SESSION_COOKIE) {
        invalidate_session(db, cookie.value()).await?;
    }
    cookies.remove_private(Cookie::build(SESSION_COOKIE));

    Ok(MessageResponse::ok("Logged out"))
}

#[get("/me")]
pub async fn api_me(user: User) -> ApiResult<User> {
    Ok(Json(user))
}

#[post("/register", data = "<request>")]
#[instrument(skip_all)]
pub async fn api_register_user(
    request: Json<RegisterRequest>,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<CreatedResponse> {
    let request = request.validate_custom()?;

    let new_user = NewUser {
        username: request.username.trim().to_string(),
        password: request.password,
        first_name: request.first_name,
        last_name: request.last_name,
        email: request.email,
        dni: request.dni,
        phone: request.phone,
        address: request.address,
        birth_date: parse_optional_date(request.birth_date.as_deref())?,
        is_teacher: false,
        is_director: false,
    };

    let id = create_user(db, &new_user).await?;
    Ok(Json(CreatedResponse { id }))
}

#[get("/users/check-username?<username>&<exclude_id>")]
pub async fn api_check_username(
    username: &str,
    exclude_id: Option<i64>,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<UsernameAvailability> {
    let username = username.trim();
    if username.is_empty() {
        return Err(AppError::Validation("Username is required".to_string()));
    }

    let taken = username_exists(db, username, exclude_id).await?;
    Ok(Json(UsernameAvailability {
        username: username.to_string(),
        available: !taken,
    }))
}

#[get("/users")]
pub async fn api_list_users(_user: User, db: &State<Pool<Sqlite>>) -> ApiResult<Vec<User>> {
    Ok(Json(list_users(db).await?))
}

#[put("/users/<user_id>/capabilities", data = "<request>")]
pub async fn api_set_capabilities(
    user: User,
    user_id: i64,
    request: Json<CapabilitiesRequest>,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<User> {
    user.require_permission(Permission::EditUserCapabilities)?;

    set_user_capabilities(db, user_id, request.is_teacher, request.is_director).await?;
    Ok(Json(get_user(db, user_id).await?))
}

#[post("/change-password", data = "<request>")]
pub async fn api_change_password(
    user: User,
    request: Json<ChangePasswordRequest>,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<MessageResponse> {
    let request = request.validate_custom()?;

    if !verify_password(db, user.id, &request.current_password).await? {
        return Err(AppError::Validation(
            "Current password is incorrect".to_string(),
        ));
    }

    update_user_password(db, user.id, &request.new_password).await?;
    Ok(MessageResponse::ok("Password updated"))
}

#[post("/auth/forgot-password", data = "<request>")]
#[instrument(skip_all)]
pub async fn api_forgot_password(
    request: Json<RecoveryEmailRequest>,
    db: &State<Pool<Sqlite>>,
    config: &State<AppConfig>,
    mailer: &State<Arc<dyn Mailer>>,
) -> ApiResult<MessageResponse> {
    let request = request.validate_custom()?;

    request_password_reset(
        db,
        mailer.inner().as_ref(),
        &config.mail_from,
        &request.email,
        Utc::now().naive_utc(),
    )
    .await?;
    Ok(MessageResponse::ok(
        "If the email is registered, a recovery code has been sent to it",
    ))
}

#[post("/auth/forgot-username", data = "<request>")]
#[instrument(skip_all)]
pub async fn api_forgot_username(
    request: Json<RecoveryEmailRequest>,
    db: &State<Pool<Sqlite>>,
    config: &State<AppConfig>,
    mailer: &State<Arc<dyn Mailer>>,
) -> ApiResult<MessageResponse> {
    let request = request.validate_custom()?;

    remind_username(
        db,
        mailer.inner().as_ref(),
        &config.mail_from,
        &request.email,
    )
    .await?;
    Ok(MessageResponse::ok(
        "If the email is registered, the username has been sent to it",
    ))
}

#[post("/auth/verify-reset-token", data = "<request>")]
#[instrument(skip_all)]
pub async fn api_verify_reset_token(
    request: Json<VerifyTokenRequest>,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<ResetTokenStatus> {
    let request = request.validate_custom()?;
    Ok(Json(
        verify_reset_token(db, &request.token, Utc::now().naive_utc()).await?,
    ))
}

#[post("/auth/reset-password", data = "<request>")]
#[instrument(skip_all)]
pub async fn api_reset_password(
    request: Json<ResetPasswordRequest>,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<MessageResponse> {
    let request = request.validate_custom()?;

    reset_password(
        db,
        &request.token,
        &request.new_password,
        Utc::now().naive_utc(),
    )
    .await?;
    Ok(MessageResponse::ok("Password updated. You can now log in"))
}
