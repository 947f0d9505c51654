use chrono::NaiveDateTime;
use serde::Serialize;
use sqlx::{Pool, Sqlite};
use tracing::{info, instrument, warn};

use crate::auth::PasswordResetToken;
use crate::db::{
    create_reset_token, find_user_by_email, get_reset_token, get_user, invalidate_reset_tokens,
    redeem_reset_token,
};
use crate::error::AppError;
use crate::mail::{Mailer, recovery_code_message, username_reminder_message};

const CODE_ATTEMPTS: usize = 5;

#[derive(Debug, Clone, Serialize)]
pub struct ResetTokenStatus {
    pub valid: bool,
    pub username: String,
}

/// Issues a fresh recovery code and mails it. Earlier unused codes for the
/// same account stop working. Unknown addresses are not an error.
#[instrument(skip(pool, mailer))]
pub async fn request_password_reset(
    pool: &Pool<Sqlite>,
    mailer: &dyn Mailer,
    from: &str,
    email: &str,
    now: NaiveDateTime,
) -> Result<(), AppError> {
    info!("Password reset requested");
    let Some(user) = find_user_by_email(pool, email).await? else {
        warn!("Password reset requested for unknown email");
        return Ok(());
    };

    invalidate_reset_tokens(pool, user.id).await?;

    let mut issued = None;
    for _ in 0..CODE_ATTEMPTS {
        let code = PasswordResetToken::generate_code();
        match create_reset_token(pool, user.id, &code, now).await {
            Ok(_) => {
                issued = Some(code);
                break;
            }
            Err(AppError::Conflict(_)) => continue,
            Err(err) => return Err(err),
        }
    }
    let code = issued.ok_or_else(|| {
        AppError::Internal("Could not allocate a unique recovery code".to_string())
    })?;

    mailer.send(&recovery_code_message(from, &user, &code))?;
    info!(user_id = user.id, "Recovery code sent");
    Ok(())
}

#[instrument(skip(pool, mailer))]
pub async fn remind_username(
    pool: &Pool<Sqlite>,
    mailer: &dyn Mailer,
    from: &str,
    email: &str,
) -> Result<(), AppError> {
    info!("Username reminder requested");
    let Some(user) = find_user_by_email(pool, email).await? else {
        warn!("Username reminder requested for unknown email");
        return Ok(());
    };

    mailer.send(&username_reminder_message(from, &user))?;
    info!(user_id = user.id, "Username reminder sent");
    Ok(())
}

async fn usable_token(
    pool: &Pool<Sqlite>,
    token: &str,
    now: NaiveDateTime,
) -> Result<PasswordResetToken, AppError> {
    let token = token.trim();
    if token.is_empty() {
        return Err(AppError::Validation("Token is required".to_string()));
    }

    let Some(reset_token) = get_reset_token(pool, token).await?.filter(|t| !t.used) else {
        return Err(AppError::Validation(
            "Invalid or already used token".to_string(),
        ));
    };

    if reset_token.is_expired(now) {
        return Err(AppError::Validation(
            "The token has expired. Request a new recovery code".to_string(),
        ));
    }

    Ok(reset_token)
}

#[instrument(skip(pool, token))]
pub async fn verify_reset_token(
    pool: &Pool<Sqlite>,
    token: &str,
    now: NaiveDateTime,
) -> Result<ResetTokenStatus, AppError> {
    info!("Verifying password reset token");
    let reset_token = usable_token(pool, token, now).await?;
    let user = get_user(pool, reset_token.user_id).await?;

    Ok(ResetTokenStatus {
        valid: true,
        username: user.username,
    })
}

/// Sets a new password from a recovery code; the code is spent on success.
#[instrument(skip(pool, token, new_password))]
pub async fn reset_password(
    pool: &Pool<Sqlite>,
    token: &str,
    new_password: &str,
    now: NaiveDateTime,
) -> Result<(), AppError> {
    info!("Resetting password with recovery code");
    let reset_token = usable_token(pool, token, now).await?;

    let password_hash = bcrypt::hash(new_password, bcrypt::DEFAULT_COST)?;
    if !redeem_reset_token(pool, reset_token.id, reset_token.user_id, &password_hash).await? {
        return Err(AppError::Validation(
            "Invalid or already used token".to_string(),
        ));
    }

    info!(user_id = reset_token.user_id, "Password reset");
    Ok(())
}
