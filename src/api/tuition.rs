use rocket::State;
use rocket::serde::json::Json;
use serde::Deserialize;
use sqlx::{Pool, Sqlite};
use std::sync::Arc;
use tracing::info;

use super::{ApiResult, date_or_today, today};
use crate::attendance::local_now;
use crate::auth::{Permission, User};
use crate::db::{
    DebtFilter, DueNoticeFilter, PaymentFilter, list_due_notices, list_payments,
};
use crate::env::AppConfig;
use crate::error::AppError;
use crate::mail::{Mailer, ReminderKind, ReminderOutcome, send_reminders};
use crate::models::{Debtor, DueNotice, Payment, PaymentStatus};
use crate::tuition::{
    DuesSummary, EnsuredDueNotice, NewPayment, NoticeDebtors, NoticeOverdueOutcome,
    OverdueOutcome, PaymentStatistics, StudentDebtSummary, YearDuesOutcome, debts_by_student,
    dues_summary, ensure_due_notice, generate_year_dues, notice_debtors, payment_statistics, process_notice_overdue,
    process_overdue, record_payment, settle_debtor,
};
use crate::validation::{parse_date, parse_optional_date};

#[derive(Debug, Deserialize)]
pub struct PaymentRequest {
    pub student_id: i64,
    pub due_notice_id: i64,
    pub family_member_id: i64,
    pub paid_on: Option<String>,
    pub amount_cents: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct ReminderRequest {
    pub kind: ReminderKind,
    pub date: Option<String>,
}

#[post("/tuition/courses/<course_id>/dues/<year>")]
pub async fn api_generate_dues(
    user: User,
    course_id: i64,
    year: i32,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<YearDuesOutcome> {
    user.require_permission(Permission::ManageTuition)?;

    if !(2000..=2100).contains(&year) {
        return Err(AppError::Validation(format!("Invalid year: {}", year)));
    }
    Ok(Json(generate_year_dues(db, course_id, year).await?))
}

#[post("/tuition/courses/<course_id>/dues/<year>/<month>")]
pub async fn api_ensure_due_notice(
    user: User,
    course_id: i64,
    year: i32,
    month: u32,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<EnsuredDueNotice> {
    user.require_permission(Permission::ManageTuition)?;

    if !(2000..=2100).contains(&year) {
        return Err(AppError::Validation(format!("Invalid year: {}", year)));
    }
    Ok(Json(ensure_due_notice(db, course_id, month, year).await?))
}

#[get("/tuition/notices?<course_id>&<year>&<month>&<overdue>")]
pub async fn api_list_due_notices(
    user: User,
    course_id: Option<i64>,
    year: Option<i32>,
    month: Option<u32>,
    overdue: Option<bool>,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Vec<DueNotice>> {
    user.require_permission(Permission::ManageTuition)?;

    let filter = DueNoticeFilter {
        course_id,
        year,
        month,
        overdue_as_of: overdue.unwrap_or(false).then(today),
    };
    Ok(Json(list_due_notices(db, filter).await?))
}

#[post("/tuition/overdue?<as_of>")]
pub async fn api_process_overdue(
    user: User,
    as_of: Option<&str>,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<OverdueOutcome> {
    user.require_permission(Permission::ManageTuition)?;

    let now = local_now();
    let as_of = date_or_today(as_of)?;
    if as_of > now.date() {
        return Err(AppError::Validation(
            "Cannot process a future date".to_string(),
        ));
    }

    let outcome = process_overdue(db, as_of, now).await?;
    info!(total_flagged = outcome.total_flagged, "Overdue processing finished");
    Ok(Json(outcome))
}

#[post("/tuition/notices/<notice_id>/overdue?<as_of>")]
pub async fn api_process_notice_overdue(
    user: User,
    notice_id: i64,
    as_of: Option<&str>,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<NoticeOverdueOutcome> {
    user.require_permission(Permission::ManageTuition)?;

    let now = local_now();
    let as_of = date_or_today(as_of)?;
    if as_of > now.date() {
        return Err(AppError::Validation(
            "Cannot process a future date".to_string(),
        ));
    }
    Ok(Json(process_notice_overdue(db, notice_id, as_of, now).await?))
}

#[get("/tuition/notices/<notice_id>/debtors")]
pub async fn api_notice_debtors(
    user: User,
    notice_id: i64,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<NoticeDebtors> {
    user.require_permission(Permission::ManageTuition)?;
    Ok(Json(notice_debtors(db, notice_id, today()).await?))
}

#[post("/tuition/debtors/<debtor_id>/settle")]
pub async fn api_settle_debtor(
    user: User,
    debtor_id: i64,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Debtor> {
    user.require_all_permissions(&[Permission::ManageTuition, Permission::RecordPayments])?;
    Ok(Json(settle_debtor(db, debtor_id, local_now()).await?))
}

#[get("/tuition/summary")]
pub async fn api_dues_summary(user: User, db: &State<Pool<Sqlite>>) -> ApiResult<DuesSummary> {
    user.require_permission(Permission::ViewFinancialStatistics)?;
    Ok(Json(dues_summary(db, today()).await?))
}

#[get("/tuition/debts?<course_id>&<include_paid>")]
pub async fn api_debts_by_student(
    user: User,
    course_id: Option<i64>,
    include_paid: Option<bool>,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<StudentDebtSummary> {
    user.require_permission(Permission::ViewFinancialStatistics)?;

    let filter = DebtFilter {
        course_id,
        include_paid: include_paid.unwrap_or(false),
    };
    Ok(Json(debts_by_student(db, filter).await?))
}

#[get("/tuition/statistics?<from>&<to>")]
pub async fn api_payment_statistics(
    user: User,
    from: Option<&str>,
    to: Option<&str>,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<PaymentStatistics> {
    user.require_permission(Permission::ViewFinancialStatistics)?;

    let statistics =
        payment_statistics(db, parse_optional_date(from)?, parse_optional_date(to)?).await?;
    Ok(Json(statistics))
}

#[post("/tuition/payments", data = "<request>")]
pub async fn api_record_payment(
    user: User,
    request: Json<PaymentRequest>,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Payment> {
    user.require_permission(Permission::RecordPayments)?;

    if request.amount_cents.is_some_and(|amount| amount <= 0) {
        return Err(AppError::Validation(
            "Payment amount must be positive".to_string(),
        ));
    }

    let payment = NewPayment {
        student_id: request.student_id,
        due_notice_id: request.due_notice_id,
        family_member_id: request.family_member_id,
        paid_on: date_or_today(request.paid_on.as_deref())?,
        amount_cents: request.amount_cents,
    };
    Ok(Json(record_payment(db, &payment, local_now()).await?))
}

#[get("/tuition/payments?<student_id>&<due_notice_id>&<status>&<from>&<to>")]
pub async fn api_list_payments(
    user: User,
    student_id: Option<i64>,
    due_notice_id: Option<i64>,
    status: Option<&str>,
    from: Option<&str>,
    to: Option<&str>,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Vec<Payment>> {
    user.require_permission(Permission::RecordPayments)?;

    let filter = PaymentFilter {
        student_id,
        due_notice_id,
        status: status.map(str::parse::<PaymentStatus>).transpose()?,
        from: from.map(parse_date).transpose()?,
        to: to.map(parse_date).transpose()?,
    };
    Ok(Json(list_payments(db, filter).await?))
}

#[post("/tuition/reminders", data = "<request>")]
pub async fn api_send_reminders(
    user: User,
    request: Json<ReminderRequest>,
    db: &State<Pool<Sqlite>>,
    config: &State<AppConfig>,
    mailer: &State<Arc<dyn Mailer>>,
) -> ApiResult<ReminderOutcome> {
    user.require_permission(Permission::SendReminders)?;

    let date = date_or_today(request.date.as_deref())?;
    let outcome = send_reminders(
        db,
        mailer.inner().as_ref(),
        &config.mail_from,
        request.kind,
        date,
    )
    .await?;
    Ok(Json(outcome))
}
