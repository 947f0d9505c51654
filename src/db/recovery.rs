use chrono::NaiveDateTime;
use sqlx::{Pool, Sqlite};
use tracing::{info, instrument};

use super::users::USER_COLUMNS;
use crate::auth::{DbPasswordResetToken, DbUser, PasswordResetToken, User};
use crate::error::AppError;

/// Emails are not unique; the oldest account wins.
#[instrument(skip(pool))]
pub async fn find_user_by_email(
    pool: &Pool<Sqlite>,
    email: &str,
) -> Result<Option<User>, AppError> {
    info!("Finding user by email");
    let row = sqlx::query_as::<_, DbUser>(&format!(
        "SELECT {} FROM users WHERE email = ? COLLATE NOCASE ORDER BY id LIMIT 1",
        USER_COLUMNS
    ))
    .bind(email.trim())
    .fetch_optional(pool)
    .await?;

    Ok(row.map(User::from))
}

#[instrument(skip(pool))]
pub async fn invalidate_reset_tokens(
    pool: &Pool<Sqlite>,
    user_id: i64,
) -> Result<u64, AppError> {
    info!("Invalidating outstanding reset tokens");
    let res = sqlx::query(
        "UPDATE password_reset_tokens SET used = TRUE WHERE user_id = ? AND used = FALSE",
    )
    .bind(user_id)
    .execute(pool)
    .await?;

    Ok(res.rows_affected())
}

#[instrument(skip(pool, token))]
pub async fn create_reset_token(
    pool: &Pool<Sqlite>,
    user_id: i64,
    token: &str,
    created_at: NaiveDateTime,
) -> Result<i64, AppError> {
    info!("Creating password reset token");
    let res = sqlx::query(
        "INSERT INTO password_reset_tokens (user_id, token, created_at) VALUES (?, ?, ?)",
    )
    .bind(user_id)
    .bind(token)
    .bind(created_at)
    .execute(pool)
    .await?;

    Ok(res.last_insert_rowid())
}

#[instrument(skip(pool, token))]
pub async fn get_reset_token(
    pool: &Pool<Sqlite>,
    token: &str,
) -> Result<Option<PasswordResetToken>, AppError> {
    info!("Getting password reset token");
    let row = sqlx::query_as::<_, DbPasswordResetToken>(
        "SELECT id, user_id, token, created_at, used FROM password_reset_tokens WHERE token = ?",
    )
    .bind(token)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(PasswordResetToken::from))
}

/// Consumes the token and stores the new hash together. Returns false when
/// the token was already used, leaving the password untouched.
#[instrument(skip(pool, password_hash))]
pub async fn redeem_reset_token(
    pool: &Pool<Sqlite>,
    token_id: i64,
    user_id: i64,
    password_hash: &str,
) -> Result<bool, AppError> {
    info!("Redeeming password reset token");
    let mut tx = pool.begin().await?;

    let claimed =
        sqlx::query("UPDATE password_reset_tokens SET used = TRUE WHERE id = ? AND used = FALSE")
            .bind(token_id)
            .execute(&mut *tx)
            .await?;
    if claimed.rows_affected() == 0 {
        return Ok(false);
    }

    sqlx::query("UPDATE users SET password = ? WHERE id = ?")
        .bind(password_hash)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(true)
}
