use chrono::{Datelike, Duration, Local, NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use serde::Serialize;
use sqlx::{Pool, Sqlite};
use tracing::{info, instrument, warn};

use crate::db::{
    insert_staff_absences, insert_student_absences, list_course_staff, list_courses,
    list_courses_for_staff, staff_missing_attendance, student_attendance_counts,
    students_missing_attendance,
};
use crate::error::AppError;
use crate::models::Course;
use crate::schedule::parse_schedule;

pub const DEFAULT_GRACE_MINUTES: i64 = 30;

pub const WEEKEND_MESSAGE: &str = "Absences are not processed on weekends";
const CLASS_NOT_ENDED_MESSAGE: &str = "Class has not ended yet for this course";
const ALREADY_PROCESSED_MESSAGE: &str = "Absences already processed for this course";

/// Local wall-clock time; course schedules are written in local time.
pub fn local_now() -> NaiveDateTime {
    Local::now().naive_local()
}

pub fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Any date other than `now`'s date counts as ended. For today the class has
/// ended once `now` reaches the parsed end time plus the grace period; a
/// schedule that cannot be parsed never ends.
pub fn has_class_ended(
    course: &Course,
    date: NaiveDate,
    grace_minutes: i64,
    now: NaiveDateTime,
) -> bool {
    if date != now.date() {
        return true;
    }

    match parse_schedule(&course.schedule) {
        Some(hours) => now >= date.and_time(hours.end) + Duration::minutes(grace_minutes),
        None => false,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkMode {
    Scheduled,
    /// Skips the class-ended check.
    Forced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subject {
    Students,
    Staff,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CourseScope {
    All,
    AssignedTo(i64),
}

#[derive(Debug, Clone, Serialize)]
pub struct MarkOutcome {
    pub course_id: i64,
    pub course_name: String,
    pub marked: u64,
    pub message: String,
}

impl MarkOutcome {
    fn skipped(course: &Course, message: &str) -> Self {
        Self {
            course_id: course.id,
            course_name: course.name.clone(),
            marked: 0,
            message: message.to_string(),
        }
    }

    fn marked(course: &Course, marked: u64, what: &str) -> Self {
        Self {
            course_id: course.id,
            course_name: course.name.clone(),
            marked,
            message: format!("Marked {} {} absences", marked, what),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchOutcome {
    pub success: bool,
    pub message: String,
    pub date: NaiveDate,
    pub total_marked: u64,
    pub courses_processed: u64,
    pub results: Vec<MarkOutcome>,
}

/// Flags every enrolled student without a record for `date` as absent,
/// attributing the rows to the first staff member assigned to the course.
#[instrument(skip(pool, course), fields(course_id = course.id))]
pub async fn mark_student_absences(
    pool: &Pool<Sqlite>,
    course: &Course,
    date: NaiveDate,
    grace_minutes: i64,
    now: NaiveDateTime,
    mode: MarkMode,
) -> Result<MarkOutcome, AppError> {
    info!("Marking student absences");

    if is_weekend(date) {
        return Ok(MarkOutcome::skipped(course, WEEKEND_MESSAGE));
    }

    if mode == MarkMode::Scheduled
        && date == now.date()
        && !has_class_ended(course, date, grace_minutes, now)
    {
        return Ok(MarkOutcome::skipped(course, CLASS_NOT_ENDED_MESSAGE));
    }

    let staff = list_course_staff(pool, course.id).await?;
    let Some(marker) = staff.first() else {
        return Ok(MarkOutcome::skipped(
            course,
            "No staff assigned to this course",
        ));
    };

    let missing = students_missing_attendance(pool, course.id, date).await?;
    if missing.is_empty() {
        return Ok(MarkOutcome::skipped(
            course,
            "All students already have an attendance record",
        ));
    }

    let marked = insert_student_absences(pool, course.id, date, marker.id, &missing).await?;
    info!(marked, "Student absences marked");

    Ok(MarkOutcome::marked(course, marked, "student"))
}

/// Flags assigned staff without a record for `date` as absent, leaving out
/// anyone with an unprocessed notice to the director for that day.
#[instrument(skip(pool, course), fields(course_id = course.id))]
pub async fn mark_staff_absences(
    pool: &Pool<Sqlite>,
    course: &Course,
    date: NaiveDate,
    grace_minutes: i64,
    now: NaiveDateTime,
) -> Result<MarkOutcome, AppError> {
    info!("Marking staff absences");

    if is_weekend(date) {
        return Ok(MarkOutcome::skipped(course, WEEKEND_MESSAGE));
    }

    if date == now.date() && !has_class_ended(course, date, grace_minutes, now) {
        return Ok(MarkOutcome::skipped(course, CLASS_NOT_ENDED_MESSAGE));
    }

    let missing = staff_missing_attendance(pool, course.id, date).await?;
    if missing.is_empty() {
        return Ok(MarkOutcome::skipped(
            course,
            "All staff have an attendance record or a pending notice",
        ));
    }

    let marked = insert_staff_absences(pool, course.id, date, &missing).await?;
    info!(marked, "Staff absences marked");

    Ok(MarkOutcome::marked(course, marked, "staff"))
}

pub async fn courses_in_scope(
    pool: &Pool<Sqlite>,
    scope: CourseScope,
) -> Result<Vec<Course>, AppError> {
    match scope {
        CourseScope::All => list_courses(pool).await,
        CourseScope::AssignedTo(user_id) => list_courses_for_staff(pool, user_id).await,
    }
}

/// Runs the marker over every course in scope. A unique violation on one
/// course means a concurrent run got there first; it is reported and the
/// batch carries on.
#[instrument(skip(pool))]
pub async fn mark_absences_all(
    pool: &Pool<Sqlite>,
    subject: Subject,
    scope: CourseScope,
    date: NaiveDate,
    grace_minutes: i64,
    now: NaiveDateTime,
    mode: MarkMode,
) -> Result<BatchOutcome, AppError> {
    info!("Marking absences across courses");

    if is_weekend(date) {
        return Ok(BatchOutcome {
            success: false,
            message: WEEKEND_MESSAGE.to_string(),
            date,
            total_marked: 0,
            courses_processed: 0,
            results: Vec::new(),
        });
    }

    let courses = courses_in_scope(pool, scope).await?;
    let mut results = Vec::with_capacity(courses.len());
    let mut total_marked = 0;
    let mut courses_processed = 0;

    for course in &courses {
        let outcome = match subject {
            Subject::Students => {
                mark_student_absences(pool, course, date, grace_minutes, now, mode).await
            }
            Subject::Staff => mark_staff_absences(pool, course, date, grace_minutes, now).await,
        };

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(err) if err.is_conflict() => {
                warn!(course_id = course.id, "Absences were marked concurrently");
                MarkOutcome::skipped(course, ALREADY_PROCESSED_MESSAGE)
            }
            Err(err) => return Err(err),
        };

        if outcome.marked > 0 {
            total_marked += outcome.marked;
            courses_processed += 1;
        }
        results.push(outcome);
    }

    Ok(BatchOutcome {
        success: true,
        message: format!(
            "Completed: {} courses processed, {} absences marked",
            courses_processed, total_marked
        ),
        date,
        total_marked,
        courses_processed,
        results,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct CourseScheduleStatus {
    pub course_id: i64,
    pub course_name: String,
    pub schedule: String,
    pub class_end: Option<NaiveTime>,
    pub class_ended: bool,
    pub students_without_record: usize,
    pub can_mark: bool,
}

#[instrument(skip(pool))]
pub async fn schedule_status(
    pool: &Pool<Sqlite>,
    scope: CourseScope,
    grace_minutes: i64,
    now: NaiveDateTime,
) -> Result<Vec<CourseScheduleStatus>, AppError> {
    info!("Building schedule status");
    let today = now.date();
    let courses = courses_in_scope(pool, scope).await?;
    let mut statuses = Vec::with_capacity(courses.len());

    for course in courses {
        let class_end = parse_schedule(&course.schedule).map(|hours| hours.end);
        let class_ended = has_class_ended(&course, today, grace_minutes, now);
        let missing = students_missing_attendance(pool, course.id, today).await?;

        statuses.push(CourseScheduleStatus {
            course_id: course.id,
            can_mark: class_ended && !is_weekend(today) && !missing.is_empty(),
            course_name: course.name,
            schedule: course.schedule,
            class_end,
            class_ended,
            students_without_record: missing.len(),
        });
    }

    Ok(statuses)
}

#[derive(Debug, Clone, Serialize)]
pub struct AttendanceStatistics {
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub course_id: Option<i64>,
    pub total: i64,
    pub absences: i64,
    pub presences: i64,
    pub absence_percentage: f64,
    pub presence_percentage: f64,
}

pub fn percentage(part: i64, total: i64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    ((part as f64 / total as f64) * 10_000.0).round() / 100.0
}

#[instrument(skip(pool))]
pub async fn attendance_statistics(
    pool: &Pool<Sqlite>,
    from: NaiveDate,
    to: NaiveDate,
    course_id: Option<i64>,
    scope: CourseScope,
) -> Result<AttendanceStatistics, AppError> {
    info!("Computing attendance statistics");

    if from > to {
        return Err(AppError::Validation(
            "Start date must not be after end date".to_string(),
        ));
    }

    let staff_id = match scope {
        CourseScope::All => None,
        CourseScope::AssignedTo(user_id) => Some(user_id),
    };

    let (total, absences) = student_attendance_counts(pool, from, to, course_id, staff_id).await?;
    let presences = total - absences;

    Ok(AttendanceStatistics {
        from,
        to,
        course_id,
        total,
        absences,
        presences,
        absence_percentage: percentage(absences, total),
        presence_percentage: percentage(presences, total),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Shift;

    fn course(schedule: &str) -> Course {
        Course {
            id: 1,
            name: "Room A".to_string(),
            shift: Shift::Morning,
            capacity: 20,
            schedule: schedule.to_string(),
            room_age: 4,
            school_year_id: None,
            monthly_fee_cents: 1_500_000,
            due_day: 10,
            enrolled: 0,
            free_places: 20,
        }
    }

    fn at(date: &str, time: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(&format!("{} {}", date, time), "%Y-%m-%d %H:%M").unwrap()
    }

    fn day(date: &str) -> NaiveDate {
        NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_weekend_detection() {
        assert!(is_weekend(day("2025-04-12")));
        assert!(is_weekend(day("2025-04-13")));
        assert!(!is_weekend(day("2025-04-11")));
        assert!(!is_weekend(day("2025-04-14")));
    }

    #[test]
    fn test_past_dates_have_always_ended() {
        let now = at("2025-04-11", "07:00");
        assert!(has_class_ended(&course("08:00 - 12:00"), day("2025-04-10"), 30, now));
        assert!(has_class_ended(&course("garbage"), day("2025-04-10"), 30, now));
    }

    #[test]
    fn test_today_respects_grace_period() {
        let c = course("08:00 - 12:00");
        let today = day("2025-04-11");
        assert!(!has_class_ended(&c, today, 30, at("2025-04-11", "12:00")));
        assert!(!has_class_ended(&c, today, 30, at("2025-04-11", "12:29")));
        assert!(has_class_ended(&c, today, 30, at("2025-04-11", "12:30")));
        assert!(has_class_ended(&c, today, 0, at("2025-04-11", "12:00")));
    }

    #[test]
    fn test_grace_past_midnight_does_not_wrap() {
        let c = course("19:00 - 23:50");
        let today = day("2025-04-11");
        assert!(!has_class_ended(&c, today, 30, at("2025-04-11", "23:55")));
    }

    #[test]
    fn test_unparseable_schedule_never_ends_today() {
        let c = course("mornings");
        assert!(!has_class_ended(&c, day("2025-04-11"), 30, at("2025-04-11", "23:59")));
    }

    #[test]
    fn test_percentage_rounds_to_two_decimals() {
        assert_eq!(percentage(1, 3), 33.33);
        assert_eq!(percentage(2, 3), 66.67);
        assert_eq!(percentage(0, 0), 0.0);
    }
}
