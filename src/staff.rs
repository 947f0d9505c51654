use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::Serialize;
use sqlx::{Pool, Sqlite};
use std::collections::BTreeMap;
use tracing::{info, instrument, warn};

use crate::db::{
    create_director_notice, find_director_notice, get_director_notice, get_staff_record,
    get_system_config, is_staff_assigned, list_staff_absences, mark_notice_processed,
    refresh_director_notice, set_staff_absent, set_staff_arrival, set_staff_departure,
};
use crate::error::AppError;
use crate::models::{DirectorNotice, NoticeKind, StaffAttendance};

async fn require_registration_enabled(pool: &Pool<Sqlite>) -> Result<(), AppError> {
    let config = get_system_config(pool).await?;
    if !config.attendance_enabled {
        warn!("Attendance registration attempted while disabled");
        return Err(AppError::Authorization(
            "Attendance registration is currently disabled".to_string(),
        ));
    }
    Ok(())
}

async fn require_assignment(
    pool: &Pool<Sqlite>,
    user_id: i64,
    course_id: i64,
) -> Result<(), AppError> {
    if !is_staff_assigned(pool, course_id, user_id).await? {
        return Err(AppError::Authorization(
            "You are not assigned to this course".to_string(),
        ));
    }
    Ok(())
}

async fn apply_arrival(
    pool: &Pool<Sqlite>,
    user_id: i64,
    course_id: i64,
    date: NaiveDate,
    time: NaiveTime,
) -> Result<StaffAttendance, AppError> {
    if let Some(record) = get_staff_record(pool, user_id, course_id, date).await? {
        if record.arrived_at.is_some() {
            return Err(AppError::Validation(
                "Arrival already recorded for this day".to_string(),
            ));
        }
    }

    set_staff_arrival(pool, user_id, course_id, date, time).await?;
    get_staff_record(pool, user_id, course_id, date)
        .await?
        .ok_or_else(|| AppError::Internal("Arrival record was not stored".to_string()))
}

async fn apply_departure(
    pool: &Pool<Sqlite>,
    user_id: i64,
    course_id: i64,
    date: NaiveDate,
    time: NaiveTime,
) -> Result<StaffAttendance, AppError> {
    let record = get_staff_record(pool, user_id, course_id, date).await?;
    let Some((record, arrived_at)) = record.and_then(|r| r.arrived_at.map(|at| (r, at))) else {
        return Err(AppError::Validation(
            "No arrival recorded for this day".to_string(),
        ));
    };

    if record.departed_at.is_some() {
        return Err(AppError::Validation(
            "Departure already recorded for this day".to_string(),
        ));
    }

    if time < arrived_at {
        return Err(AppError::Validation(
            "Departure time cannot be before arrival time".to_string(),
        ));
    }

    set_staff_departure(pool, record.id, time).await?;
    Ok(StaffAttendance {
        departed_at: Some(time),
        ..record
    })
}

#[instrument(skip(pool))]
pub async fn record_arrival(
    pool: &Pool<Sqlite>,
    user_id: i64,
    course_id: i64,
    date: NaiveDate,
    time: NaiveTime,
) -> Result<StaffAttendance, AppError> {
    info!("Staff recording own arrival");
    require_registration_enabled(pool).await?;
    require_assignment(pool, user_id, course_id).await?;
    apply_arrival(pool, user_id, course_id, date, time).await
}

#[instrument(skip(pool))]
pub async fn record_departure(
    pool: &Pool<Sqlite>,
    user_id: i64,
    course_id: i64,
    date: NaiveDate,
    time: NaiveTime,
) -> Result<StaffAttendance, AppError> {
    info!("Staff recording own departure");
    require_registration_enabled(pool).await?;
    require_assignment(pool, user_id, course_id).await?;
    apply_departure(pool, user_id, course_id, date, time).await
}

/// Get-or-create today's pending notice, stamped with the current time.
#[instrument(skip(pool))]
pub async fn notify_director(
    pool: &Pool<Sqlite>,
    user_id: i64,
    course_id: i64,
    kind: NoticeKind,
    now: NaiveDateTime,
) -> Result<DirectorNotice, AppError> {
    info!("Staff notifying director");
    require_assignment(pool, user_id, course_id).await?;

    let date = now.date();
    let time = now.time();

    if kind == NoticeKind::Departure {
        let arrived = get_staff_record(pool, user_id, course_id, date)
            .await?
            .is_some_and(|r| r.arrived_at.is_some());
        if !arrived {
            return Err(AppError::Validation(
                "Cannot notify a departure without a recorded arrival".to_string(),
            ));
        }
    }

    let notice_id = match find_director_notice(pool, user_id, course_id, date, kind).await? {
        Some(notice) if notice.processed => {
            return Err(AppError::Validation(
                "This notice has already been processed".to_string(),
            ));
        }
        Some(notice) => {
            refresh_director_notice(pool, notice.id, time).await?;
            notice.id
        }
        None => create_director_notice(pool, user_id, course_id, date, kind, time).await?,
    };

    get_director_notice(pool, notice_id).await
}

/// Applies the stamped time as arrival or departure and closes the notice.
#[instrument(skip(pool))]
pub async fn process_notice(
    pool: &Pool<Sqlite>,
    notice_id: i64,
    processed_by: i64,
    now: NaiveDateTime,
) -> Result<DirectorNotice, AppError> {
    info!("Processing notice to director");
    let notice = get_director_notice(pool, notice_id).await?;

    if notice.processed {
        return Err(AppError::Validation(
            "This notice has already been processed".to_string(),
        ));
    }

    match notice.kind {
        NoticeKind::Arrival => {
            apply_arrival(
                pool,
                notice.user_id,
                notice.course_id,
                notice.date,
                notice.requested_at,
            )
            .await?
        }
        NoticeKind::Departure => {
            apply_departure(
                pool,
                notice.user_id,
                notice.course_id,
                notice.date,
                notice.requested_at,
            )
            .await?
        }
    };

    mark_notice_processed(pool, notice.id, processed_by, now).await?;
    get_director_notice(pool, notice.id).await
}

#[instrument(skip(pool))]
pub async fn mark_staff_absent(
    pool: &Pool<Sqlite>,
    staff_id: i64,
    course_id: i64,
    date: NaiveDate,
) -> Result<StaffAttendance, AppError> {
    info!("Director marking staff member absent");

    if !is_staff_assigned(pool, course_id, staff_id).await? {
        return Err(AppError::Validation(
            "Staff member is not assigned to this course".to_string(),
        ));
    }

    if let Some(record) = get_staff_record(pool, staff_id, course_id, date).await? {
        if record.absent {
            return Err(AppError::Validation(
                "Staff member is already marked absent for this day".to_string(),
            ));
        }
    }

    set_staff_absent(pool, staff_id, course_id, date).await?;
    get_staff_record(pool, staff_id, course_id, date)
        .await?
        .ok_or_else(|| AppError::Internal("Absence record was not stored".to_string()))
}

#[derive(Debug, Clone, Serialize)]
pub struct CourseAbsences {
    pub course_id: i64,
    pub course_name: String,
    pub absent_staff: Vec<StaffAttendance>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StaffAbsenceReport {
    pub date: NaiveDate,
    pub total_absences: usize,
    pub courses: Vec<CourseAbsences>,
}

#[instrument(skip(pool))]
pub async fn staff_absence_report(
    pool: &Pool<Sqlite>,
    date: NaiveDate,
) -> Result<StaffAbsenceReport, AppError> {
    info!("Building staff absence report");
    let absences = list_staff_absences(pool, None, date, date).await?;
    let total_absences = absences.len();

    let mut grouped: BTreeMap<(String, i64), Vec<StaffAttendance>> = BTreeMap::new();
    for record in absences {
        grouped
            .entry((record.course_name.clone(), record.course_id))
            .or_default()
            .push(record);
    }

    let courses = grouped
        .into_iter()
        .map(|((course_name, course_id), absent_staff)| CourseAbsences {
            course_id,
            course_name,
            absent_staff,
        })
        .collect();

    Ok(StaffAbsenceReport {
        date,
        total_absences,
        courses,
    })
}
