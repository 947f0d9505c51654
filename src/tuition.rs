use chrono::{Datelike, NaiveDate, NaiveDateTime};
use serde::Serialize;
use sqlx::{Pool, Sqlite};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{info, instrument};

use crate::attendance::{is_weekend, percentage};
use crate::db::{
    DebtFilter, DueNoticeFilter, MonthlyPayments, StudentDebt, StudentFilter, debts_grouped_by_student,
    get_course, get_debtor, get_due_notice, get_payment, get_student, insert_due_notice_if_absent,
    list_debtors_for_notice, list_due_notices, list_students, mark_debtor_paid,
    outstanding_debtors_by_notice, payments_by_month, require_family_of, unpaid_students,
    upsert_debtor,
};
use crate::error::AppError;
use crate::models::{Debtor, DueNotice, Payment, PaymentStatus};

pub fn last_day_of_month(year: i32, month: u32) -> Option<NaiveDate> {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)?.pred_opt()
}

/// The configured day, pulled back to the last day of short months.
pub fn due_date_for(due_day: u32, month: u32, year: i32) -> Option<NaiveDate> {
    let last = last_day_of_month(year, month)?;
    NaiveDate::from_ymd_opt(year, month, due_day.clamp(1, last.day()))
}

/// On-time when paid on or before the due date; otherwise late by the
/// number of whole days past it.
pub fn payment_status(paid_on: NaiveDate, due_date: NaiveDate) -> (PaymentStatus, i64) {
    let days_late = (paid_on - due_date).num_days();
    if days_late > 0 {
        (PaymentStatus::Late, days_late)
    } else {
        (PaymentStatus::OnTime, 0)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct YearDuesOutcome {
    pub course_id: i64,
    pub year: i32,
    pub created: u32,
    pub existing: u32,
}

#[instrument(skip(pool))]
pub async fn generate_year_dues(
    pool: &Pool<Sqlite>,
    course_id: i64,
    year: i32,
) -> Result<YearDuesOutcome, AppError> {
    info!("Generating yearly due notices");
    let course = get_course(pool, course_id).await?;

    let mut created = 0;
    let mut existing = 0;

    for month in 1..=12 {
        let due_date = due_date_for(course.due_day, month, year)
            .ok_or_else(|| AppError::Validation(format!("Invalid year {}", year)))?;

        if insert_due_notice_if_absent(
            pool,
            course.id,
            month,
            year,
            course.monthly_fee_cents,
            due_date,
        )
        .await?
        {
            created += 1;
        } else {
            existing += 1;
        }
    }

    info!(created, existing, "Yearly due notices generated");
    Ok(YearDuesOutcome {
        course_id: course.id,
        year,
        created,
        existing,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct EnsuredDueNotice {
    pub notice: DueNotice,
    pub created: bool,
}

/// Get-or-create for one month of a course's billing year.
#[instrument(skip(pool))]
pub async fn ensure_due_notice(
    pool: &Pool<Sqlite>,
    course_id: i64,
    month: u32,
    year: i32,
) -> Result<EnsuredDueNotice, AppError> {
    info!("Ensuring due notice");
    if !(1..=12).contains(&month) {
        return Err(AppError::Validation(format!("Invalid month: {}", month)));
    }

    let course = get_course(pool, course_id).await?;
    let due_date = due_date_for(course.due_day, month, year)
        .ok_or_else(|| AppError::Validation(format!("Invalid year {}", year)))?;

    let created = insert_due_notice_if_absent(
        pool,
        course.id,
        month,
        year,
        course.monthly_fee_cents,
        due_date,
    )
    .await?;

    let notice = list_due_notices(
        pool,
        DueNoticeFilter {
            course_id: Some(course.id),
            year: Some(year),
            month: Some(month),
            ..Default::default()
        },
    )
    .await?
    .into_iter()
    .next()
    .ok_or_else(|| {
        AppError::Internal(format!(
            "Due notice for {}/{} missing after insert",
            month, year
        ))
    })?;

    info!(notice_id = notice.id, created, "Due notice ensured");
    Ok(EnsuredDueNotice { notice, created })
}

#[derive(Debug, Clone, Serialize)]
pub struct NoticeOverdueOutcome {
    pub due_notice_id: i64,
    pub course_name: String,
    pub month: u32,
    pub year: i32,
    pub is_overdue: bool,
    pub days_overdue: i64,
    pub flagged: u64,
    pub refreshed: u64,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct OverdueOutcome {
    pub success: bool,
    pub message: String,
    pub as_of: NaiveDate,
    pub notices_processed: u64,
    pub total_flagged: u64,
    pub total_refreshed: u64,
    pub results: Vec<NoticeOverdueOutcome>,
}

async fn flag_notice_debtors(
    pool: &Pool<Sqlite>,
    notice: &DueNotice,
    as_of: NaiveDate,
    flagged_at: NaiveDateTime,
) -> Result<NoticeOverdueOutcome, AppError> {
    let days_overdue = notice.days_overdue(as_of);
    let mut outcome = NoticeOverdueOutcome {
        due_notice_id: notice.id,
        course_name: notice.course_name.clone(),
        month: notice.month,
        year: notice.year,
        is_overdue: notice.is_overdue(as_of),
        days_overdue,
        flagged: 0,
        refreshed: 0,
        message: String::new(),
    };

    if !outcome.is_overdue {
        outcome.message = "Notice is not overdue yet".to_string();
        return Ok(outcome);
    }

    for student in unpaid_students(pool, notice.id, notice.course_id).await? {
        if upsert_debtor(pool, student.id, notice, days_overdue, flagged_at).await? {
            outcome.flagged += 1;
        } else {
            outcome.refreshed += 1;
        }
    }

    outcome.message = format!(
        "Flagged {} new debtors, refreshed {}",
        outcome.flagged, outcome.refreshed
    );
    Ok(outcome)
}

/// Flags unpaid students on every notice due before `as_of`.
#[instrument(skip(pool))]
pub async fn process_overdue(
    pool: &Pool<Sqlite>,
    as_of: NaiveDate,
    flagged_at: NaiveDateTime,
) -> Result<OverdueOutcome, AppError> {
    info!("Processing overdue notices");

    if is_weekend(as_of) {
        return Ok(OverdueOutcome {
            success: false,
            message: "Overdue notices are not processed on weekends".to_string(),
            as_of,
            notices_processed: 0,
            total_flagged: 0,
            total_refreshed: 0,
            results: Vec::new(),
        });
    }

    let notices = list_due_notices(
        pool,
        DueNoticeFilter {
            overdue_as_of: Some(as_of),
            ..Default::default()
        },
    )
    .await?;

    let mut results = Vec::with_capacity(notices.len());
    let mut total_flagged = 0;
    let mut total_refreshed = 0;
    let mut notices_processed = 0;

    for notice in &notices {
        let outcome = flag_notice_debtors(pool, notice, as_of, flagged_at).await?;
        if outcome.flagged + outcome.refreshed > 0 {
            notices_processed += 1;
        }
        total_flagged += outcome.flagged;
        total_refreshed += outcome.refreshed;
        results.push(outcome);
    }

    Ok(OverdueOutcome {
        success: true,
        message: format!(
            "Completed: {} notices processed, {} new debtors",
            notices_processed, total_flagged
        ),
        as_of,
        notices_processed,
        total_flagged,
        total_refreshed,
        results,
    })
}

#[instrument(skip(pool))]
pub async fn process_notice_overdue(
    pool: &Pool<Sqlite>,
    notice_id: i64,
    as_of: NaiveDate,
    flagged_at: NaiveDateTime,
) -> Result<NoticeOverdueOutcome, AppError> {
    info!("Processing single overdue notice");
    let notice = get_due_notice(pool, notice_id).await?;
    flag_notice_debtors(pool, &notice, as_of, flagged_at).await
}

#[derive(Debug, Clone)]
pub struct NewPayment {
    pub student_id: i64,
    pub due_notice_id: i64,
    pub family_member_id: i64,
    pub paid_on: NaiveDate,
    pub amount_cents: Option<i64>,
}

/// Stores the payment and resolves any open debtor row for the same
/// student and notice in one transaction.
#[instrument(skip(pool))]
pub async fn record_payment(
    pool: &Pool<Sqlite>,
    payment: &NewPayment,
    now: NaiveDateTime,
) -> Result<Payment, AppError> {
    info!("Recording payment");

    let student = get_student(pool, payment.student_id).await?;
    let notice = get_due_notice(pool, payment.due_notice_id).await?;
    require_family_of(
        pool,
        payment.family_member_id,
        student.id,
        "Family member does not belong to this student",
    )
    .await?;

    if student.course_id != Some(notice.course_id) {
        return Err(AppError::Validation(
            "Due notice does not belong to the student's course".to_string(),
        ));
    }

    let amount_cents = payment.amount_cents.unwrap_or(notice.amount_cents);
    if amount_cents < 0 {
        return Err(AppError::Validation(
            "Amount must not be negative".to_string(),
        ));
    }

    let (status, days_late) = payment_status(payment.paid_on, notice.due_date);

    let mut tx = pool.begin().await?;

    let res = sqlx::query(
        "INSERT INTO payments (student_id, due_notice_id, family_member_id, paid_on, \
         amount_cents, status, days_late) VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(student.id)
    .bind(notice.id)
    .bind(payment.family_member_id)
    .bind(payment.paid_on)
    .bind(amount_cents)
    .bind(status.as_str())
    .bind(days_late)
    .execute(&mut *tx)
    .await?;
    let payment_id = res.last_insert_rowid();

    let resolved = sqlx::query(
        "UPDATE debtors SET paid = TRUE, paid_at = ?, days_late = ? \
         WHERE student_id = ? AND due_notice_id = ? AND paid = FALSE",
    )
    .bind(now)
    .bind(days_late)
    .bind(student.id)
    .bind(notice.id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    info!(
        payment_id,
        status = status.as_str(),
        days_late,
        debtors_resolved = resolved.rows_affected(),
        "Payment recorded"
    );

    get_payment(pool, payment_id).await
}

/// Manual resolution; days late freeze at their value on `now`.
#[instrument(skip(pool))]
pub async fn settle_debtor(
    pool: &Pool<Sqlite>,
    debtor_id: i64,
    now: NaiveDateTime,
) -> Result<Debtor, AppError> {
    info!("Settling debtor manually");
    let debtor = get_debtor(pool, debtor_id).await?;

    let days_late = (now.date() - debtor.due_date).num_days().max(0);
    if !mark_debtor_paid(pool, debtor.id, now, days_late).await? {
        return Err(AppError::Validation(
            "This debt has already been paid".to_string(),
        ));
    }

    get_debtor(pool, debtor.id).await
}

#[derive(Debug, Clone, Serialize)]
pub struct NoticeDebtorEntry {
    pub student_id: i64,
    pub student_name: String,
    pub debtor_id: Option<i64>,
    pub flagged: bool,
    pub days_late: i64,
    pub amount_owed_cents: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct NoticeDebtors {
    pub notice: DueNotice,
    pub is_overdue: bool,
    pub days_overdue: i64,
    pub debtors: Vec<NoticeDebtorEntry>,
}

#[instrument(skip(pool))]
pub async fn notice_debtors(
    pool: &Pool<Sqlite>,
    notice_id: i64,
    today: NaiveDate,
) -> Result<NoticeDebtors, AppError> {
    info!("Listing debtors of notice");
    let notice = get_due_notice(pool, notice_id).await?;

    let unpaid: HashSet<i64> = unpaid_students(pool, notice.id, notice.course_id)
        .await?
        .into_iter()
        .map(|s| s.id)
        .collect();

    let flagged: HashMap<i64, Debtor> = list_debtors_for_notice(pool, notice.id)
        .await?
        .into_iter()
        .map(|d| (d.student_id, d))
        .collect();

    let students = list_students(
        pool,
        StudentFilter {
            course_id: Some(notice.course_id),
            ..Default::default()
        },
    )
    .await?;

    let days_overdue = notice.days_overdue(today);
    let debtors = students
        .into_iter()
        .filter(|s| unpaid.contains(&s.id))
        .map(|student| match flagged.get(&student.id) {
            Some(debtor) => NoticeDebtorEntry {
                student_id: student.id,
                student_name: student.full_name(),
                debtor_id: Some(debtor.id),
                flagged: true,
                days_late: debtor.days_late,
                amount_owed_cents: debtor.amount_owed_cents,
            },
            None => NoticeDebtorEntry {
                student_id: student.id,
                student_name: student.full_name(),
                debtor_id: None,
                flagged: false,
                days_late: days_overdue,
                amount_owed_cents: notice.amount_cents,
            },
        })
        .collect();

    Ok(NoticeDebtors {
        is_overdue: notice.is_overdue(today),
        days_overdue,
        notice,
        debtors,
    })
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct CourseDues {
    pub course_id: i64,
    pub course_name: String,
    pub total: u64,
    pub overdue: u64,
    pub current: u64,
    pub outstanding_debtors: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DuesSummary {
    pub date: NaiveDate,
    pub total: u64,
    pub overdue: u64,
    pub current: u64,
    pub courses: Vec<CourseDues>,
}

#[instrument(skip(pool))]
pub async fn dues_summary(pool: &Pool<Sqlite>, today: NaiveDate) -> Result<DuesSummary, AppError> {
    info!("Summarising dues by course");
    let notices = list_due_notices(pool, DueNoticeFilter::default()).await?;
    let outstanding = outstanding_debtors_by_notice(pool).await?;

    let mut by_course: BTreeMap<i64, CourseDues> = BTreeMap::new();
    for notice in &notices {
        let entry = by_course.entry(notice.course_id).or_insert_with(|| CourseDues {
            course_id: notice.course_id,
            course_name: notice.course_name.clone(),
            ..Default::default()
        });

        entry.total += 1;
        if notice.is_overdue(today) {
            entry.overdue += 1;
            entry.outstanding_debtors += outstanding.get(&notice.id).copied().unwrap_or_default();
        } else {
            entry.current += 1;
        }
    }

    let courses: Vec<CourseDues> = by_course.into_values().collect();

    Ok(DuesSummary {
        date: today,
        total: courses.iter().map(|c| c.total).sum(),
        overdue: courses.iter().map(|c| c.overdue).sum(),
        current: courses.iter().map(|c| c.current).sum(),
        courses,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct StudentDebtSummary {
    pub students: usize,
    pub total_owed_cents: i64,
    pub debts: Vec<StudentDebt>,
}

#[instrument(skip(pool))]
pub async fn debts_by_student(
    pool: &Pool<Sqlite>,
    filter: DebtFilter,
) -> Result<StudentDebtSummary, AppError> {
    info!("Summarising debts by student");
    let debts = debts_grouped_by_student(pool, filter).await?;

    Ok(StudentDebtSummary {
        students: debts.len(),
        total_owed_cents: debts.iter().map(|d| d.total_owed_cents).sum(),
        debts,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentStatistics {
    pub total_payments: i64,
    pub on_time: i64,
    pub late: i64,
    pub on_time_percentage: f64,
    pub total_collected_cents: i64,
    pub by_month: Vec<MonthlyPayments>,
}

#[instrument(skip(pool))]
pub async fn payment_statistics(
    pool: &Pool<Sqlite>,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
) -> Result<PaymentStatistics, AppError> {
    info!("Computing payment statistics");

    if let (Some(from), Some(to)) = (from, to) {
        if from > to {
            return Err(AppError::Validation(
                "Start date must not be after end date".to_string(),
            ));
        }
    }

    let by_month = payments_by_month(pool, from, to).await?;
    let total_payments: i64 = by_month.iter().map(|m| m.payments).sum();
    let on_time: i64 = by_month.iter().map(|m| m.on_time).sum();

    Ok(PaymentStatistics {
        total_payments,
        on_time,
        late: by_month.iter().map(|m| m.late).sum(),
        on_time_percentage: percentage(on_time, total_payments),
        total_collected_cents: by_month.iter().map(|m| m.collected_cents).sum(),
        by_month,
    })
}
