use chrono::NaiveDateTime;
use sqlx::{Pool, Sqlite};
use std::time::Duration;
use tracing::{error, info, instrument};

use crate::attendance::{CourseScope, MarkMode, Subject, local_now, mark_absences_all};
use crate::db::clean_expired_sessions;
use crate::env::AppConfig;
use crate::tuition::process_overdue;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct JobReport {
    pub sessions_cleaned: u64,
    pub student_absences: u64,
    pub staff_absences: u64,
    pub debtors_flagged: u64,
    pub failures: u32,
}

/// One pass of the periodic work. Every step runs even when an earlier one
/// fails; failures are logged and counted.
#[instrument(skip(pool, config))]
pub async fn run_jobs(pool: &Pool<Sqlite>, config: &AppConfig, now: NaiveDateTime) -> JobReport {
    let mut report = JobReport::default();
    let today = now.date();

    match clean_expired_sessions(pool).await {
        Ok(count) => {
            if count > 0 {
                info!("Cleaned up {} expired sessions", count);
            }
            report.sessions_cleaned = count;
        }
        Err(e) => {
            error!("Failed to clean expired sessions: {}", e);
            report.failures += 1;
        }
    }

    for subject in [Subject::Students, Subject::Staff] {
        let outcome = mark_absences_all(
            pool,
            subject,
            CourseScope::All,
            today,
            config.absence_grace_minutes,
            now,
            MarkMode::Scheduled,
        )
        .await;

        match outcome {
            Ok(outcome) => {
                info!(subject = ?subject, "{}", outcome.message);
                match subject {
                    Subject::Students => report.student_absences = outcome.total_marked,
                    Subject::Staff => report.staff_absences = outcome.total_marked,
                }
            }
            Err(e) => {
                error!(subject = ?subject, "Failed to mark absences: {}", e);
                report.failures += 1;
            }
        }
    }

    match process_overdue(pool, today, now).await {
        Ok(outcome) => {
            info!("{}", outcome.message);
            report.debtors_flagged = outcome.total_flagged;
        }
        Err(e) => {
            error!("Failed to process overdue notices: {}", e);
            report.failures += 1;
        }
    }

    report
}

pub fn spawn(pool: Pool<Sqlite>, config: AppConfig) {
    let period = Duration::from_secs(config.scheduler_interval_secs);

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(5)).await;

        loop {
            let report = run_jobs(&pool, &config, local_now()).await;
            if report.failures > 0 {
                error!(failures = report.failures, "Scheduled run finished with failures");
            }

            tokio::time::sleep(period).await;
        }
    });
}
