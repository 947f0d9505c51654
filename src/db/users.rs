use chrono::NaiveDate;
use sqlx::{Pool, Sqlite};
use tracing::{info, instrument};

use crate::auth::{DbUser, User};
use crate::error::AppError;

pub(crate) const USER_COLUMNS: &str = "id, username, first_name, last_name, email, dni, phone, address, \
     birth_date, is_teacher, is_director";

#[derive(Debug, Clone, Default)]
pub struct NewUser {
    pub username: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub dni: String,
    pub phone: String,
    pub address: String,
    pub birth_date: Option<NaiveDate>,
    pub is_teacher: bool,
    pub is_director: bool,
}

#[instrument(skip(pool))]
pub async fn get_user(pool: &Pool<Sqlite>, id: i64) -> Result<User, AppError> {
    info!("Fetching user by ID");
    let row = sqlx::query_as::<_, DbUser>(&format!(
        "SELECT {} FROM users WHERE id = ?",
        USER_COLUMNS
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(user) => Ok(User::from(user)),
        _ => Err(AppError::NotFound(format!(
            "User with id {} not found in database",
            id
        ))),
    }
}

#[instrument(skip(pool))]
pub async fn find_user_by_username(
    pool: &Pool<Sqlite>,
    username: &str,
) -> Result<Option<User>, AppError> {
    info!("Finding user by username");
    let row = sqlx::query_as::<_, DbUser>(&format!(
        "SELECT {} FROM users WHERE username = ?",
        USER_COLUMNS
    ))
    .bind(username)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(User::from))
}

#[instrument(skip(pool, password))]
pub async fn authenticate_user(
    pool: &Pool<Sqlite>,
    username: &str,
    password: &str,
) -> Result<Option<User>, AppError> {
    info!("Authenticating user");
    let hash: Option<(i64, String)> =
        sqlx::query_as("SELECT id, password FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(pool)
            .await?;

    match hash {
        Some((id, hash)) => match bcrypt::verify(password, &hash) {
            Ok(true) => Ok(Some(get_user(pool, id).await?)),
            _ => Ok(None),
        },
        _ => Ok(None),
    }
}

#[instrument(skip(pool, password))]
pub async fn verify_password(
    pool: &Pool<Sqlite>,
    user_id: i64,
    password: &str,
) -> Result<bool, AppError> {
    info!("Verifying user password");
    let hash: Option<(String,)> = sqlx::query_as("SELECT password FROM users WHERE id = ?")
        .bind(user_id)
        .fetch_optional(pool)
        .await?;

    match hash {
        Some((hash,)) => Ok(bcrypt::verify(password, &hash).unwrap_or(false)),
        _ => Err(AppError::NotFound(format!("User with id {} not found", user_id))),
    }
}

#[instrument(skip(pool))]
pub async fn username_exists(
    pool: &Pool<Sqlite>,
    username: &str,
    exclude_id: Option<i64>,
) -> Result<bool, AppError> {
    info!("Checking username availability");
    let existing: Option<(i64,)> =
        sqlx::query_as("SELECT id FROM users WHERE username = ? AND id != ?")
            .bind(username)
            .bind(exclude_id.unwrap_or(-1))
            .fetch_optional(pool)
            .await?;

    Ok(existing.is_some())
}

#[instrument(skip(pool))]
pub async fn dni_exists(pool: &Pool<Sqlite>, dni: &str) -> Result<bool, AppError> {
    let existing: Option<(i64,)> = sqlx::query_as("SELECT id FROM users WHERE dni = ?")
        .bind(dni)
        .fetch_optional(pool)
        .await?;

    Ok(existing.is_some())
}

#[instrument(skip_all, fields(username = %user.username))]
pub async fn create_user(pool: &Pool<Sqlite>, user: &NewUser) -> Result<i64, AppError> {
    info!("Creating new user");

    if username_exists(pool, &user.username, None).await? {
        return Err(AppError::Conflict(format!(
            "Username '{}' already exists",
            user.username
        )));
    }

    if dni_exists(pool, &user.dni).await? {
        return Err(AppError::Conflict(format!(
            "A user with DNI {} already exists",
            user.dni
        )));
    }

    let hashed_password = bcrypt::hash(&user.password, bcrypt::DEFAULT_COST)?;

    let res = sqlx::query(
        "INSERT INTO users (username, password, first_name, last_name, email, dni, phone, \
         address, birth_date, is_teacher, is_director) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&user.username)
    .bind(hashed_password)
    .bind(&user.first_name)
    .bind(&user.last_name)
    .bind(&user.email)
    .bind(&user.dni)
    .bind(&user.phone)
    .bind(&user.address)
    .bind(user.birth_date)
    .bind(user.is_teacher)
    .bind(user.is_director)
    .execute(pool)
    .await?;

    Ok(res.last_insert_rowid())
}

#[instrument(skip(pool))]
pub async fn list_users(pool: &Pool<Sqlite>) -> Result<Vec<User>, AppError> {
    info!("Listing users");
    let rows = sqlx::query_as::<_, DbUser>(&format!(
        "SELECT {} FROM users ORDER BY last_name, first_name",
        USER_COLUMNS
    ))
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(User::from).collect())
}

#[instrument(skip(pool))]
pub async fn set_user_capabilities(
    pool: &Pool<Sqlite>,
    user_id: i64,
    is_teacher: bool,
    is_director: bool,
) -> Result<(), AppError> {
    info!("Updating user capabilities");
    let res = sqlx::query("UPDATE users SET is_teacher = ?, is_director = ? WHERE id = ?")
        .bind(is_teacher)
        .bind(is_director)
        .bind(user_id)
        .execute(pool)
        .await?;

    if res.rows_affected() == 0 {
        return Err(AppError::NotFound(format!(
            "User with id {} not found",
            user_id
        )));
    }

    Ok(())
}

#[instrument(skip_all, fields(user_id))]
pub async fn update_user_password(
    pool: &Pool<Sqlite>,
    user_id: i64,
    new_password: &str,
) -> Result<(), AppError> {
    info!("Updating user password");
    let hashed_password = bcrypt::hash(new_password, bcrypt::DEFAULT_COST)?;

    sqlx::query("UPDATE users SET password = ? WHERE id = ?")
        .bind(hashed_password)
        .bind(user_id)
        .execute(pool)
        .await?;

    Ok(())
}

#[instrument(skip(pool))]
pub async fn director_exists(pool: &Pool<Sqlite>) -> Result<bool, AppError> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users WHERE is_director = TRUE")
        .fetch_one(pool)
        .await?;

    Ok(count > 0)
}
