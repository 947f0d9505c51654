use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Sqlite};
use std::str::FromStr;
use tracing::{info, instrument, warn};

use crate::auth::{RESET_TOKEN_TTL_HOURS, User};
use crate::db::{StudentFilter, list_courses, list_family_members, list_students};
use crate::error::AppError;
use crate::models::{Course, FamilyMember, Student};
use crate::tuition::due_date_for;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailMessage {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Outbound mail delivery.
pub trait Mailer: Send + Sync {
    fn send(&self, message: &MailMessage) -> Result<(), AppError>;
}

/// Writes each message to the tracing output instead of delivering it.
pub struct LogMailer;

impl Mailer for LogMailer {
    fn send(&self, message: &MailMessage) -> Result<(), AppError> {
        info!(
            from = %message.from,
            to = %message.to,
            subject = %message.subject,
            body = %message.body,
            "Outgoing mail"
        );
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReminderKind {
    MonthStart,
    DueSoon,
}

impl FromStr for ReminderKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "month_start" => Ok(ReminderKind::MonthStart),
            "due_soon" => Ok(ReminderKind::DueSoon),
            _ => Err(AppError::Validation(format!(
                "Reminder kind must be 'month_start' or 'due_soon', got '{}'",
                s
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReminderOutcome {
    pub kind: ReminderKind,
    pub date: NaiveDate,
    pub sent: u64,
    pub failed: u64,
    pub message: String,
}

pub fn format_cents(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let cents = cents.abs();
    format!("{}{}.{:02}", sign, cents / 100, cents % 100)
}

pub fn reminder_message(
    from: &str,
    kind: ReminderKind,
    course: &Course,
    student: &Student,
    member: &FamilyMember,
    due_date: NaiveDate,
) -> MailMessage {
    let period = format!("{:02}/{}", due_date.month(), due_date.year());
    let subject = match kind {
        ReminderKind::MonthStart => format!("Tuition for {} is now open", period),
        ReminderKind::DueSoon => format!("Tuition for {} is due today", period),
    };

    let body = format!(
        "Dear {},\n\nThe monthly tuition of {} for {} ({}) is ${} and is due on {}.\n\
         If you have already paid, please disregard this message.\n\nKindergarten office",
        member.full_name(),
        period,
        student.full_name(),
        course.name,
        format_cents(course.monthly_fee_cents),
        due_date.format("%Y-%m-%d"),
    );

    MailMessage {
        from: from.to_string(),
        to: member.email.clone(),
        subject,
        body,
    }
}

pub fn recovery_code_message(from: &str, user: &User, code: &str) -> MailMessage {
    let body = format!(
        "Hello {},\n\nYour password recovery code is: {}\n\
         The code is valid for {} hours and can be used once.\n\
         If you did not request it, you can ignore this message.\n\nKindergarten office",
        user.full_name(),
        code,
        RESET_TOKEN_TTL_HOURS,
    );

    MailMessage {
        from: from.to_string(),
        to: user.email.clone(),
        subject: "Password recovery code".to_string(),
        body,
    }
}

pub fn username_reminder_message(from: &str, user: &User) -> MailMessage {
    let body = format!(
        "Hello {},\n\nYour username is: {}\n\nKindergarten office",
        user.full_name(),
        user.username,
    );

    MailMessage {
        from: from.to_string(),
        to: user.email.clone(),
        subject: "Your username".to_string(),
        body,
    }
}

/// Month-start reminders go out on day 1; due-soon reminders on each
/// course's due date. Every family member with an email gets one message
/// per enrolled student.
#[instrument(skip(pool, mailer))]
pub async fn send_reminders(
    pool: &Pool<Sqlite>,
    mailer: &dyn Mailer,
    from: &str,
    kind: ReminderKind,
    date: NaiveDate,
) -> Result<ReminderOutcome, AppError> {
    info!("Sending tuition reminders");

    let mut outcome = ReminderOutcome {
        kind,
        date,
        sent: 0,
        failed: 0,
        message: String::new(),
    };

    if kind == ReminderKind::MonthStart && date.day() != 1 {
        outcome.message =
            "Month-start reminders are only sent on the first day of the month".to_string();
        return Ok(outcome);
    }

    let mut courses_matched = 0;
    for course in list_courses(pool).await? {
        let Some(due_date) = due_date_for(course.due_day, date.month(), date.year()) else {
            continue;
        };
        if kind == ReminderKind::DueSoon && due_date != date {
            continue;
        }
        courses_matched += 1;

        let students = list_students(
            pool,
            StudentFilter {
                course_id: Some(course.id),
                ..Default::default()
            },
        )
        .await?;

        for student in &students {
            for member in list_family_members(pool, student.id).await? {
                if member.email.trim().is_empty() {
                    continue;
                }

                let message = reminder_message(from, kind, &course, student, &member, due_date);
                match mailer.send(&message) {
                    Ok(()) => outcome.sent += 1,
                    Err(err) => {
                        warn!(to = %message.to, error = %err, "Failed to send reminder");
                        outcome.failed += 1;
                    }
                }
            }
        }
    }

    outcome.message = if courses_matched == 0 {
        "No course is due on this date".to_string()
    } else {
        format!(
            "Sent {} reminders, {} failed",
            outcome.sent, outcome.failed
        )
    };

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Relationship, Shift};

    #[test]
    fn test_format_cents() {
        assert_eq!(format_cents(1_500_000), "15000.00");
        assert_eq!(format_cents(1_005), "10.05");
        assert_eq!(format_cents(0), "0.00");
        assert_eq!(format_cents(-250), "-2.50");
    }

    #[test]
    fn test_reminder_message_addresses_family_member() {
        let course = Course {
            id: 1,
            name: "Room A".into(),
            shift: Shift::Morning,
            capacity: 20,
            schedule: "08:00 - 12:00".into(),
            room_age: 4,
            school_year_id: None,
            monthly_fee_cents: 1_250_050,
            due_day: 10,
            enrolled: 1,
            free_places: 19,
        };
        let student = Student {
            id: 3,
            first_name: "Tomas".into(),
            last_name: "Perez".into(),
            dni: "50111222".into(),
            birth_date: NaiveDate::from_ymd_opt(2020, 5, 1).unwrap(),
            course_id: Some(1),
            course_name: Some("Room A".into()),
        };
        let member = FamilyMember {
            id: 9,
            student_id: 3,
            first_name: "Ana".into(),
            last_name: "Perez".into(),
            dni: "28111222".into(),
            phone: String::new(),
            address: String::new(),
            email: "ana@example.com".into(),
            relationship: Relationship::Mother,
        };

        let message = reminder_message(
            "office@kinder-admin.local",
            ReminderKind::DueSoon,
            &course,
            &student,
            &member,
            NaiveDate::from_ymd_opt(2025, 4, 10).unwrap(),
        );

        assert_eq!(message.to, "ana@example.com");
        assert_eq!(message.subject, "Tuition for 04/2025 is due today");
        assert!(message.body.starts_with("Dear Ana Perez,"));
        assert!(message.body.contains("$12500.50"));
        assert!(message.body.contains("Tomas Perez (Room A)"));
    }
}
