use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use sqlx::{Pool, Sqlite};
use std::collections::HashMap;
use tracing::{info, instrument};

use crate::error::AppError;
use crate::models::{
    DbDebtor, DbDueNotice, DbPayment, Debtor, DueNotice, Payment, PaymentStatus,
};

const NOTICE_SELECT: &str = "SELECT d.id, d.course_id, c.name AS course_name, d.month, d.year, \
     d.amount_cents, d.due_date FROM due_notices d JOIN courses c ON c.id = d.course_id";

const DEBTOR_SELECT: &str = "SELECT b.id, b.student_id, \
     s.first_name || ' ' || s.last_name AS student_name, b.due_notice_id, b.due_date, \
     b.flagged_at, b.days_late, b.amount_owed_cents, b.paid, b.paid_at \
     FROM debtors b JOIN students s ON s.id = b.student_id";

const PAYMENT_SELECT: &str = "SELECT p.id, p.student_id, \
     s.first_name || ' ' || s.last_name AS student_name, p.due_notice_id, p.family_member_id, \
     p.paid_on, p.amount_cents, p.status, p.days_late \
     FROM payments p JOIN students s ON s.id = p.student_id";

#[derive(Debug, Clone, Copy, Default)]
pub struct DueNoticeFilter {
    pub course_id: Option<i64>,
    pub year: Option<i32>,
    pub month: Option<u32>,
    /// Only notices whose due date is strictly before this date.
    pub overdue_as_of: Option<NaiveDate>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PaymentFilter {
    pub student_id: Option<i64>,
    pub due_notice_id: Option<i64>,
    pub status: Option<PaymentStatus>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DebtFilter {
    pub course_id: Option<i64>,
    pub include_paid: bool,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct StudentDebt {
    pub student_id: i64,
    pub student_name: String,
    pub course_name: Option<String>,
    pub debts: i64,
    pub total_owed_cents: i64,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct MonthlyPayments {
    pub month: String,
    pub payments: i64,
    pub on_time: i64,
    pub late: i64,
    pub collected_cents: i64,
}

#[derive(Debug, Clone, Copy, sqlx::FromRow)]
pub struct UnpaidStudent {
    pub id: i64,
}

#[instrument(skip(pool))]
pub async fn get_due_notice(pool: &Pool<Sqlite>, notice_id: i64) -> Result<DueNotice, AppError> {
    info!("Fetching due notice by ID");
    let row = sqlx::query_as::<_, DbDueNotice>(&format!("{} WHERE d.id = ?", NOTICE_SELECT))
        .bind(notice_id)
        .fetch_optional(pool)
        .await?;

    match row {
        Some(notice) => Ok(DueNotice::from(notice)),
        _ => Err(AppError::NotFound(format!(
            "Due notice with id {} not found",
            notice_id
        ))),
    }
}

#[instrument(skip(pool))]
pub async fn list_due_notices(
    pool: &Pool<Sqlite>,
    filter: DueNoticeFilter,
) -> Result<Vec<DueNotice>, AppError> {
    info!("Listing due notices");
    let rows = sqlx::query_as::<_, DbDueNotice>(&format!(
        "{} WHERE (?1 IS NULL OR d.course_id = ?1) AND (?2 IS NULL OR d.year = ?2) \
         AND (?3 IS NULL OR d.month = ?3) AND (?4 IS NULL OR d.due_date < ?4) \
         ORDER BY d.year DESC, d.month DESC, c.name",
        NOTICE_SELECT
    ))
    .bind(filter.course_id)
    .bind(filter.year)
    .bind(filter.month)
    .bind(filter.overdue_as_of)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(DueNotice::from).collect())
}

/// Returns true when a new row was written.
#[instrument(skip(pool))]
pub async fn insert_due_notice_if_absent(
    pool: &Pool<Sqlite>,
    course_id: i64,
    month: u32,
    year: i32,
    amount_cents: i64,
    due_date: NaiveDate,
) -> Result<bool, AppError> {
    let res = sqlx::query(
        "INSERT INTO due_notices (course_id, month, year, amount_cents, due_date) \
         VALUES (?, ?, ?, ?, ?) ON CONFLICT (course_id, month, year) DO NOTHING",
    )
    .bind(course_id)
    .bind(month)
    .bind(year)
    .bind(amount_cents)
    .bind(due_date)
    .execute(pool)
    .await?;

    Ok(res.rows_affected() > 0)
}

/// Students of the notice's course with no payment recorded against it.
#[instrument(skip(pool))]
pub async fn unpaid_students(
    pool: &Pool<Sqlite>,
    notice_id: i64,
    course_id: i64,
) -> Result<Vec<UnpaidStudent>, AppError> {
    let rows = sqlx::query_as::<_, UnpaidStudent>(
        "SELECT s.id FROM students s WHERE s.course_id = ? AND NOT EXISTS \
         (SELECT 1 FROM payments p WHERE p.student_id = s.id AND p.due_notice_id = ?) \
         ORDER BY s.id",
    )
    .bind(course_id)
    .bind(notice_id)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Creates the debtor row, or refreshes `days_late` on an unpaid existing one.
/// Returns true when a new row was written.
#[instrument(skip(pool))]
pub async fn upsert_debtor(
    pool: &Pool<Sqlite>,
    student_id: i64,
    notice: &DueNotice,
    days_late: i64,
    flagged_at: NaiveDateTime,
) -> Result<bool, AppError> {
    let res = sqlx::query(
        "INSERT INTO debtors (student_id, due_notice_id, due_date, flagged_at, days_late, \
         amount_owed_cents) VALUES (?, ?, ?, ?, ?, ?) \
         ON CONFLICT (student_id, due_notice_id) DO NOTHING",
    )
    .bind(student_id)
    .bind(notice.id)
    .bind(notice.due_date)
    .bind(flagged_at)
    .bind(days_late)
    .bind(notice.amount_cents)
    .execute(pool)
    .await?;

    if res.rows_affected() > 0 {
        return Ok(true);
    }

    sqlx::query(
        "UPDATE debtors SET days_late = ? WHERE student_id = ? AND due_notice_id = ? \
         AND paid = FALSE",
    )
    .bind(days_late)
    .bind(student_id)
    .bind(notice.id)
    .execute(pool)
    .await?;

    Ok(false)
}

#[instrument(skip(pool))]
pub async fn get_debtor(pool: &Pool<Sqlite>, debtor_id: i64) -> Result<Debtor, AppError> {
    let row = sqlx::query_as::<_, DbDebtor>(&format!("{} WHERE b.id = ?", DEBTOR_SELECT))
        .bind(debtor_id)
        .fetch_optional(pool)
        .await?;

    match row {
        Some(debtor) => Ok(Debtor::from(debtor)),
        _ => Err(AppError::NotFound(format!(
            "Debtor with id {} not found",
            debtor_id
        ))),
    }
}

#[instrument(skip(pool))]
pub async fn list_debtors_for_notice(
    pool: &Pool<Sqlite>,
    notice_id: i64,
) -> Result<Vec<Debtor>, AppError> {
    let rows = sqlx::query_as::<_, DbDebtor>(&format!(
        "{} WHERE b.due_notice_id = ? ORDER BY s.last_name, s.first_name",
        DEBTOR_SELECT
    ))
    .bind(notice_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(Debtor::from).collect())
}

/// Resolves an open debtor row, freezing `days_late`. Returns false when the
/// row was already paid.
#[instrument(skip(pool))]
pub async fn mark_debtor_paid(
    pool: &Pool<Sqlite>,
    debtor_id: i64,
    paid_at: NaiveDateTime,
    days_late: i64,
) -> Result<bool, AppError> {
    info!("Settling debtor");
    let res = sqlx::query(
        "UPDATE debtors SET paid = TRUE, paid_at = ?, days_late = ? WHERE id = ? AND paid = FALSE",
    )
    .bind(paid_at)
    .bind(days_late)
    .bind(debtor_id)
    .execute(pool)
    .await?;

    Ok(res.rows_affected() > 0)
}

/// Count of unpaid debtor rows keyed by due notice.
#[instrument(skip(pool))]
pub async fn outstanding_debtors_by_notice(
    pool: &Pool<Sqlite>,
) -> Result<HashMap<i64, i64>, AppError> {
    let rows: Vec<(i64, i64)> = sqlx::query_as(
        "SELECT due_notice_id, COUNT(*) FROM debtors WHERE paid = FALSE GROUP BY due_notice_id",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().collect())
}

#[instrument(skip(pool))]
pub async fn debts_grouped_by_student(
    pool: &Pool<Sqlite>,
    filter: DebtFilter,
) -> Result<Vec<StudentDebt>, AppError> {
    info!("Aggregating debts by student");
    let rows = sqlx::query_as::<_, StudentDebt>(
        "SELECT s.id AS student_id, s.first_name || ' ' || s.last_name AS student_name, \
         c.name AS course_name, COUNT(b.id) AS debts, \
         COALESCE(SUM(b.amount_owed_cents), 0) AS total_owed_cents \
         FROM debtors b JOIN students s ON s.id = b.student_id \
         LEFT JOIN courses c ON c.id = s.course_id \
         WHERE (?1 = TRUE OR b.paid = FALSE) AND (?2 IS NULL OR s.course_id = ?2) \
         GROUP BY s.id ORDER BY total_owed_cents DESC, student_name",
    )
    .bind(filter.include_paid)
    .bind(filter.course_id)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

#[instrument(skip(pool))]
pub async fn get_payment(pool: &Pool<Sqlite>, payment_id: i64) -> Result<Payment, AppError> {
    let row = sqlx::query_as::<_, DbPayment>(&format!("{} WHERE p.id = ?", PAYMENT_SELECT))
        .bind(payment_id)
        .fetch_optional(pool)
        .await?;

    match row {
        Some(payment) => Ok(Payment::from(payment)),
        _ => Err(AppError::NotFound(format!(
            "Payment with id {} not found",
            payment_id
        ))),
    }
}

#[instrument(skip(pool))]
pub async fn list_payments(
    pool: &Pool<Sqlite>,
    filter: PaymentFilter,
) -> Result<Vec<Payment>, AppError> {
    info!("Listing payments");
    let rows = sqlx::query_as::<_, DbPayment>(&format!(
        "{} WHERE (?1 IS NULL OR p.student_id = ?1) AND (?2 IS NULL OR p.due_notice_id = ?2) \
         AND (?3 IS NULL OR p.status = ?3) AND (?4 IS NULL OR p.paid_on >= ?4) \
         AND (?5 IS NULL OR p.paid_on <= ?5) ORDER BY p.paid_on DESC, p.id DESC",
        PAYMENT_SELECT
    ))
    .bind(filter.student_id)
    .bind(filter.due_notice_id)
    .bind(filter.status.map(|s| s.as_str()))
    .bind(filter.from)
    .bind(filter.to)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(Payment::from).collect())
}

#[instrument(skip(pool))]
pub async fn payments_by_month(
    pool: &Pool<Sqlite>,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
) -> Result<Vec<MonthlyPayments>, AppError> {
    info!("Aggregating payments by month");
    let rows = sqlx::query_as::<_, MonthlyPayments>(
        "SELECT strftime('%Y-%m', paid_on) AS month, COUNT(*) AS payments, \
         SUM(CASE WHEN status = 'on_time' THEN 1 ELSE 0 END) AS on_time, \
         SUM(CASE WHEN status = 'late' THEN 1 ELSE 0 END) AS late, \
         COALESCE(SUM(amount_cents), 0) AS collected_cents FROM payments \
         WHERE (?1 IS NULL OR paid_on >= ?1) AND (?2 IS NULL OR paid_on <= ?2) \
         GROUP BY month ORDER BY month",
    )
    .bind(from)
    .bind(to)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
