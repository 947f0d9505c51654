use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Shift {
    #[default]
    Morning,
    Intermediate,
    Afternoon,
}

impl Shift {
    pub fn as_str(&self) -> &'static str {
        match self {
            Shift::Morning => "morning",
            Shift::Intermediate => "intermediate",
            Shift::Afternoon => "afternoon",
        }
    }
}

impl FromStr for Shift {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "morning" => Ok(Shift::Morning),
            "intermediate" => Ok(Shift::Intermediate),
            "afternoon" => Ok(Shift::Afternoon),
            _ => Err(AppError::Validation(format!("Unknown shift: {}", s))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relationship {
    Father,
    Mother,
    Grandfather,
    Grandmother,
    UncleAunt,
    Sibling,
    #[default]
    Other,
}

impl Relationship {
    pub fn as_str(&self) -> &'static str {
        match self {
            Relationship::Father => "father",
            Relationship::Mother => "mother",
            Relationship::Grandfather => "grandfather",
            Relationship::Grandmother => "grandmother",
            Relationship::UncleAunt => "uncle_aunt",
            Relationship::Sibling => "sibling",
            Relationship::Other => "other",
        }
    }
}

impl FromStr for Relationship {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "father" => Ok(Relationship::Father),
            "mother" => Ok(Relationship::Mother),
            "grandfather" => Ok(Relationship::Grandfather),
            "grandmother" => Ok(Relationship::Grandmother),
            "uncle_aunt" => Ok(Relationship::UncleAunt),
            "sibling" => Ok(Relationship::Sibling),
            "other" => Ok(Relationship::Other),
            _ => Err(AppError::Validation(format!("Unknown relationship: {}", s))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    Arrival,
    Departure,
}

impl NoticeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NoticeKind::Arrival => "arrival",
            NoticeKind::Departure => "departure",
        }
    }
}

impl FromStr for NoticeKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "arrival" => Ok(NoticeKind::Arrival),
            "departure" => Ok(NoticeKind::Departure),
            _ => Err(AppError::Validation(format!(
                "Notice kind must be 'arrival' or 'departure', got '{}'",
                s
            ))),
        }
    }
}

impl fmt::Display for NoticeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    #[default]
    OnTime,
    Late,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::OnTime => "on_time",
            PaymentStatus::Late => "late",
        }
    }
}

impl FromStr for PaymentStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "on_time" => Ok(PaymentStatus::OnTime),
            "late" => Ok(PaymentStatus::Late),
            _ => Err(AppError::Validation(format!("Unknown payment status: {}", s))),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SchoolYear {
    pub id: i64,
    pub starts_on: NaiveDate,
    pub ends_on: NaiveDate,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbSchoolYear {
    pub id: Option<i64>,
    pub starts_on: Option<NaiveDate>,
    pub ends_on: Option<NaiveDate>,
}

impl From<DbSchoolYear> for SchoolYear {
    fn from(db: DbSchoolYear) -> Self {
        Self {
            id: db.id.unwrap_or_default(),
            starts_on: db.starts_on.unwrap_or_default(),
            ends_on: db.ends_on.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Course {
    pub id: i64,
    pub name: String,
    pub shift: Shift,
    pub capacity: i64,
    pub schedule: String,
    pub room_age: i64,
    pub school_year_id: Option<i64>,
    pub monthly_fee_cents: i64,
    pub due_day: u32,
    pub enrolled: i64,
    pub free_places: i64,
}

#[derive(sqlx::FromRow, Clone, Default)]
pub struct DbCourse {
    pub id: Option<i64>,
    pub name: Option<String>,
    pub shift: Option<String>,
    pub capacity: Option<i64>,
    pub schedule: Option<String>,
    pub room_age: Option<i64>,
    pub school_year_id: Option<i64>,
    pub monthly_fee_cents: Option<i64>,
    pub due_day: Option<i64>,
    pub enrolled: Option<i64>,
}

impl From<DbCourse> for Course {
    fn from(db: DbCourse) -> Self {
        let capacity = db.capacity.unwrap_or(1);
        let enrolled = db.enrolled.unwrap_or_default();
        Self {
            id: db.id.unwrap_or_default(),
            name: db.name.unwrap_or_default(),
            shift: db
                .shift
                .as_deref()
                .and_then(|s| s.parse().ok())
                .unwrap_or_default(),
            capacity,
            schedule: db.schedule.unwrap_or_default(),
            room_age: db.room_age.unwrap_or_default(),
            school_year_id: db.school_year_id,
            monthly_fee_cents: db.monthly_fee_cents.unwrap_or_default(),
            due_day: db.due_day.unwrap_or(10) as u32,
            enrolled,
            free_places: (capacity - enrolled).max(0),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Student {
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
    pub dni: String,
    pub birth_date: NaiveDate,
    pub course_id: Option<i64>,
    pub course_name: Option<String>,
}

impl Student {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbStudent {
    pub id: Option<i64>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub dni: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub course_id: Option<i64>,
    pub course_name: Option<String>,
}

impl From<DbStudent> for Student {
    fn from(db: DbStudent) -> Self {
        Self {
            id: db.id.unwrap_or_default(),
            first_name: db.first_name.unwrap_or_default(),
            last_name: db.last_name.unwrap_or_default(),
            dni: db.dni.unwrap_or_default(),
            birth_date: db.birth_date.unwrap_or_default(),
            course_id: db.course_id,
            course_name: db.course_name,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct FamilyMember {
    pub id: i64,
    pub student_id: i64,
    pub first_name: String,
    pub last_name: String,
    pub dni: String,
    pub phone: String,
    pub address: String,
    pub email: String,
    pub relationship: Relationship,
}

impl FamilyMember {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbFamilyMember {
    pub id: Option<i64>,
    pub student_id: Option<i64>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub dni: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub email: Option<String>,
    pub relationship: Option<String>,
}

impl From<DbFamilyMember> for FamilyMember {
    fn from(db: DbFamilyMember) -> Self {
        Self {
            id: db.id.unwrap_or_default(),
            student_id: db.student_id.unwrap_or_default(),
            first_name: db.first_name.unwrap_or_default(),
            last_name: db.last_name.unwrap_or_default(),
            dni: db.dni.unwrap_or_default(),
            phone: db.phone.unwrap_or_default(),
            address: db.address.unwrap_or_default(),
            email: db.email.unwrap_or_default(),
            relationship: db
                .relationship
                .as_deref()
                .and_then(|s| s.parse().ok())
                .unwrap_or_default(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StudentAttendance {
    pub id: i64,
    pub student_id: i64,
    pub student_name: String,
    pub course_id: i64,
    pub marked_by: i64,
    pub date: NaiveDate,
    pub present: bool,
    pub arrived_at: Option<NaiveTime>,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbStudentAttendance {
    pub id: Option<i64>,
    pub student_id: Option<i64>,
    pub student_name: Option<String>,
    pub course_id: Option<i64>,
    pub marked_by: Option<i64>,
    pub date: Option<NaiveDate>,
    pub present: Option<bool>,
    pub arrived_at: Option<NaiveTime>,
}

impl From<DbStudentAttendance> for StudentAttendance {
    fn from(db: DbStudentAttendance) -> Self {
        Self {
            id: db.id.unwrap_or_default(),
            student_id: db.student_id.unwrap_or_default(),
            student_name: db.student_name.unwrap_or_default(),
            course_id: db.course_id.unwrap_or_default(),
            marked_by: db.marked_by.unwrap_or_default(),
            date: db.date.unwrap_or_default(),
            present: db.present.unwrap_or_default(),
            arrived_at: db.arrived_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StaffAttendance {
    pub id: i64,
    pub user_id: i64,
    pub staff_name: String,
    pub course_id: i64,
    pub course_name: String,
    pub date: NaiveDate,
    pub arrived_at: Option<NaiveTime>,
    pub departed_at: Option<NaiveTime>,
    pub absent: bool,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbStaffAttendance {
    pub id: Option<i64>,
    pub user_id: Option<i64>,
    pub staff_name: Option<String>,
    pub course_id: Option<i64>,
    pub course_name: Option<String>,
    pub date: Option<NaiveDate>,
    pub arrived_at: Option<NaiveTime>,
    pub departed_at: Option<NaiveTime>,
    pub absent: Option<bool>,
}

impl From<DbStaffAttendance> for StaffAttendance {
    fn from(db: DbStaffAttendance) -> Self {
        Self {
            id: db.id.unwrap_or_default(),
            user_id: db.user_id.unwrap_or_default(),
            staff_name: db.staff_name.unwrap_or_default(),
            course_id: db.course_id.unwrap_or_default(),
            course_name: db.course_name.unwrap_or_default(),
            date: db.date.unwrap_or_default(),
            arrived_at: db.arrived_at,
            departed_at: db.departed_at,
            absent: db.absent.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DirectorNotice {
    pub id: i64,
    pub user_id: i64,
    pub staff_name: String,
    pub course_id: i64,
    pub course_name: String,
    pub date: NaiveDate,
    pub kind: NoticeKind,
    pub requested_at: NaiveTime,
    pub processed: bool,
    pub processed_by: Option<i64>,
    pub processed_at: Option<NaiveDateTime>,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbDirectorNotice {
    pub id: Option<i64>,
    pub user_id: Option<i64>,
    pub staff_name: Option<String>,
    pub course_id: Option<i64>,
    pub course_name: Option<String>,
    pub date: Option<NaiveDate>,
    pub kind: Option<String>,
    pub requested_at: Option<NaiveTime>,
    pub processed: Option<bool>,
    pub processed_by: Option<i64>,
    pub processed_at: Option<NaiveDateTime>,
}

impl From<DbDirectorNotice> for DirectorNotice {
    fn from(db: DbDirectorNotice) -> Self {
        Self {
            id: db.id.unwrap_or_default(),
            user_id: db.user_id.unwrap_or_default(),
            staff_name: db.staff_name.unwrap_or_default(),
            course_id: db.course_id.unwrap_or_default(),
            course_name: db.course_name.unwrap_or_default(),
            date: db.date.unwrap_or_default(),
            kind: db
                .kind
                .as_deref()
                .and_then(|s| s.parse().ok())
                .unwrap_or(NoticeKind::Arrival),
            requested_at: db.requested_at.unwrap_or_default(),
            processed: db.processed.unwrap_or_default(),
            processed_by: db.processed_by,
            processed_at: db.processed_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SystemConfig {
    pub attendance_enabled: bool,
    pub updated_at: Option<NaiveDateTime>,
    pub updated_by: Option<i64>,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbSystemConfig {
    pub attendance_enabled: Option<bool>,
    pub updated_at: Option<NaiveDateTime>,
    pub updated_by: Option<i64>,
}

impl From<DbSystemConfig> for SystemConfig {
    fn from(db: DbSystemConfig) -> Self {
        Self {
            attendance_enabled: db.attendance_enabled.unwrap_or(true),
            updated_at: db.updated_at,
            updated_by: db.updated_by,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Pickup {
    pub id: i64,
    pub student_id: i64,
    pub student_name: String,
    pub family_member_id: i64,
    pub family_member_name: String,
    pub recorded_by: i64,
    pub course_id: Option<i64>,
    pub date: NaiveDate,
    pub picked_up_at: NaiveTime,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbPickup {
    pub id: Option<i64>,
    pub student_id: Option<i64>,
    pub student_name: Option<String>,
    pub family_member_id: Option<i64>,
    pub family_member_name: Option<String>,
    pub recorded_by: Option<i64>,
    pub course_id: Option<i64>,
    pub date: Option<NaiveDate>,
    pub picked_up_at: Option<NaiveTime>,
}

impl From<DbPickup> for Pickup {
    fn from(db: DbPickup) -> Self {
        Self {
            id: db.id.unwrap_or_default(),
            student_id: db.student_id.unwrap_or_default(),
            student_name: db.student_name.unwrap_or_default(),
            family_member_id: db.family_member_id.unwrap_or_default(),
            family_member_name: db.family_member_name.unwrap_or_default(),
            recorded_by: db.recorded_by.unwrap_or_default(),
            course_id: db.course_id,
            date: db.date.unwrap_or_default(),
            picked_up_at: db.picked_up_at.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DueNotice {
    pub id: i64,
    pub course_id: i64,
    pub course_name: String,
    pub month: u32,
    pub year: i32,
    pub amount_cents: i64,
    pub due_date: NaiveDate,
}

impl DueNotice {
    pub fn is_overdue(&self, today: NaiveDate) -> bool {
        today > self.due_date
    }

    pub fn days_overdue(&self, today: NaiveDate) -> i64 {
        (today - self.due_date).num_days().max(0)
    }
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbDueNotice {
    pub id: Option<i64>,
    pub course_id: Option<i64>,
    pub course_name: Option<String>,
    pub month: Option<i64>,
    pub year: Option<i64>,
    pub amount_cents: Option<i64>,
    pub due_date: Option<NaiveDate>,
}

impl From<DbDueNotice> for DueNotice {
    fn from(db: DbDueNotice) -> Self {
        Self {
            id: db.id.unwrap_or_default(),
            course_id: db.course_id.unwrap_or_default(),
            course_name: db.course_name.unwrap_or_default(),
            month: db.month.unwrap_or(1) as u32,
            year: db.year.unwrap_or_default() as i32,
            amount_cents: db.amount_cents.unwrap_or_default(),
            due_date: db.due_date.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Debtor {
    pub id: i64,
    pub student_id: i64,
    pub student_name: String,
    pub due_notice_id: i64,
    pub due_date: NaiveDate,
    pub flagged_at: NaiveDateTime,
    pub days_late: i64,
    pub amount_owed_cents: i64,
    pub paid: bool,
    pub paid_at: Option<NaiveDateTime>,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbDebtor {
    pub id: Option<i64>,
    pub student_id: Option<i64>,
    pub student_name: Option<String>,
    pub due_notice_id: Option<i64>,
    pub due_date: Option<NaiveDate>,
    pub flagged_at: Option<NaiveDateTime>,
    pub days_late: Option<i64>,
    pub amount_owed_cents: Option<i64>,
    pub paid: Option<bool>,
    pub paid_at: Option<NaiveDateTime>,
}

impl From<DbDebtor> for Debtor {
    fn from(db: DbDebtor) -> Self {
        Self {
            id: db.id.unwrap_or_default(),
            student_id: db.student_id.unwrap_or_default(),
            student_name: db.student_name.unwrap_or_default(),
            due_notice_id: db.due_notice_id.unwrap_or_default(),
            due_date: db.due_date.unwrap_or_default(),
            flagged_at: db.flagged_at.unwrap_or_default(),
            days_late: db.days_late.unwrap_or_default(),
            amount_owed_cents: db.amount_owed_cents.unwrap_or_default(),
            paid: db.paid.unwrap_or_default(),
            paid_at: db.paid_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Payment {
    pub id: i64,
    pub student_id: i64,
    pub student_name: String,
    pub due_notice_id: i64,
    pub family_member_id: i64,
    pub paid_on: NaiveDate,
    pub amount_cents: i64,
    pub status: PaymentStatus,
    pub days_late: i64,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbPayment {
    pub id: Option<i64>,
    pub student_id: Option<i64>,
    pub student_name: Option<String>,
    pub due_notice_id: Option<i64>,
    pub family_member_id: Option<i64>,
    pub paid_on: Option<NaiveDate>,
    pub amount_cents: Option<i64>,
    pub status: Option<String>,
    pub days_late: Option<i64>,
}

impl From<DbPayment> for Payment {
    fn from(db: DbPayment) -> Self {
        Self {
            id: db.id.unwrap_or_default(),
            student_id: db.student_id.unwrap_or_default(),
            student_name: db.student_name.unwrap_or_default(),
            due_notice_id: db.due_notice_id.unwrap_or_default(),
            family_member_id: db.family_member_id.unwrap_or_default(),
            paid_on: db.paid_on.unwrap_or_default(),
            amount_cents: db.amount_cents.unwrap_or_default(),
            status: db
                .status
                .as_deref()
                .and_then(|s| s.parse().ok())
                .unwrap_or_default(),
            days_late: db.days_late.unwrap_or_default(),
        }
    }
}
