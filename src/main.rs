#[macro_use]
extern crate rocket;

mod api;
mod attendance;
mod auth;
mod db;
mod env;
mod error;
mod mail;
mod models;
mod recovery;
mod schedule;
mod scheduler;
mod staff;
mod telemetry;
mod tuition;
mod validation;
#[cfg(test)]
mod test;

use std::sync::Arc;

use api::attendance::{
    api_attendance_statistics, api_force_mark_absences, api_list_attendance, api_mark_absences,
    api_mark_course_absences, api_mark_staff_absences, api_register_attendance,
    api_schedule_status,
};
use api::auth::{
    api_change_password, api_check_username, api_forgot_password, api_forgot_username,
    api_list_users, api_login, api_logout, api_me, api_register_user, api_reset_password,
    api_set_capabilities, api_verify_reset_token,
};
use api::config::{
    api_attendance_status, api_get_config, api_set_attendance, api_toggle_attendance,
};
use api::courses::{
    api_assign_staff, api_create_course, api_create_school_year, api_delete_course,
    api_get_course, api_list_course_staff, api_list_courses, api_list_school_years,
    api_my_courses, api_unassign_staff, api_update_course,
};
use api::pickups::{api_list_pickups, api_record_pickup};
use api::staff::{
    api_mark_staff_absent, api_my_absences, api_my_records_today, api_notify_director,
    api_pending_notices, api_process_notice, api_record_arrival, api_record_departure,
    api_staff_absence_report,
};
use api::students::{
    api_create_family_member, api_create_student, api_delete_student, api_get_student,
    api_list_family_members, api_list_students, api_update_student,
};
use api::tuition::{
    api_debts_by_student, api_dues_summary, api_ensure_due_notice, api_generate_dues,
    api_list_due_notices, api_list_payments, api_notice_debtors, api_payment_statistics, api_process_notice_overdue,
    api_process_overdue, api_record_payment, api_send_reminders, api_settle_debtor,
};
use api::{bad_request, health, internal_error, not_found, unprocessable};
use auth::{forbidden_api, unauthorized_api};
use db::{NewUser, create_user, director_exists};
use env::{AppConfig, ConfigError, InitialDirector, load_environment};
use error::AppError;
use mail::{LogMailer, Mailer};
use rocket::{Build, Rocket};
use sqlx::SqlitePool;
use telemetry::{TelemetryFairing, init_tracing};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("{0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("Migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("Application error: {0}")]
    App(#[from] AppError),
    #[error("{0}")]
    Rocket(Box<rocket::Error>),
}

impl From<rocket::Error> for Error {
    fn from(value: rocket::Error) -> Self {
        Error::Rocket(Box::new(value))
    }
}

/// Creates the configured director account when the database has none.
pub async fn bootstrap_director(
    pool: &SqlitePool,
    director: &InitialDirector,
) -> Result<bool, AppError> {
    if director_exists(pool).await? {
        return Ok(false);
    }

    let user = NewUser {
        username: director.username.clone(),
        password: director.password.clone(),
        first_name: "School".to_string(),
        last_name: "Director".to_string(),
        is_director: true,
        ..Default::default()
    };
    create_user(pool, &user).await?;

    info!(username = %director.username, "Created initial director account");
    Ok(true)
}

#[rocket::main]
async fn main() -> Result<(), Error> {
    if let Err(e) = load_environment() {
        eprintln!("Failed to load environment files: {}", e);
    }

    let config = AppConfig::from_env()?;
    init_tracing(&config);

    let pool = SqlitePool::connect(&config.database_url).await?;

    info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Migrations completed successfully");

    match &config.initial_director {
        Some(director) => {
            bootstrap_director(&pool, director).await?;
        }
        None => {
            if !director_exists(&pool).await? {
                warn!("No director account exists and none is configured");
            }
        }
    }

    if config.scheduler_enabled {
        scheduler::spawn(pool.clone(), config.clone());
    }

    let mailer: Arc<dyn Mailer> = Arc::new(LogMailer);
    let _rocket = init_rocket(pool, config, mailer).await.launch().await?;

    Ok(())
}

pub async fn init_rocket(
    pool: SqlitePool,
    config: AppConfig,
    mailer: Arc<dyn Mailer>,
) -> Rocket<Build> {
    info!("Starting kinder-admin");

    rocket::build()
        .manage(pool)
        .manage(config)
        .manage(mailer)
        .mount(
            "/api",
            routes![
                health,
                api_login,
                api_logout,
                api_me,
                api_register_user,
                api_check_username,
                api_list_users,
                api_set_capabilities,
                api_change_password,
                api_forgot_password,
                api_forgot_username,
                api_verify_reset_token,
                api_reset_password,
                api_list_school_years,
                api_create_school_year,
                api_list_courses,
                api_my_courses,
                api_get_course,
                api_create_course,
                api_update_course,
                api_delete_course,
                api_list_course_staff,
                api_assign_staff,
                api_unassign_staff,
                api_list_students,
                api_get_student,
                api_create_student,
                api_update_student,
                api_delete_student,
                api_list_family_members,
                api_create_family_member,
                api_register_attendance,
                api_list_attendance,
                api_mark_absences,
                api_mark_course_absences,
                api_force_mark_absences,
                api_mark_staff_absences,
                api_schedule_status,
                api_attendance_statistics,
                api_record_arrival,
                api_record_departure,
                api_notify_director,
                api_my_records_today,
                api_my_absences,
                api_pending_notices,
                api_process_notice,
                api_mark_staff_absent,
                api_staff_absence_report,
                api_get_config,
                api_toggle_attendance,
                api_set_attendance,
                api_attendance_status,
                api_record_pickup,
                api_list_pickups,
                api_generate_dues,
                api_ensure_due_notice,
                api_list_due_notices,
                api_process_overdue,
                api_process_notice_overdue,
                api_notice_debtors,
                api_settle_debtor,
                api_dues_summary,
                api_debts_by_student,
                api_payment_statistics,
                api_record_payment,
                api_list_payments,
                api_send_reminders,
            ],
        )
        .register(
            "/api",
            catchers![
                bad_request,
                unauthorized_api,
                forbidden_api,
                not_found,
                unprocessable,
                internal_error
            ],
        )
        .attach(TelemetryFairing)
}
