use std::collections::HashMap;
use std::sync::{Arc, Mutex, Once};

use chrono::NaiveDate;
use rocket::http::{ContentType, Status};
use rocket::local::asynchronous::Client;
use serde_json::json;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Sqlite};

use crate::db::{
    NewCourse, NewFamilyMember, NewStudent, NewUser, assign_staff, create_course,
    create_family_member, create_student, create_user,
};
use crate::env::AppConfig;
use crate::error::AppError;
use crate::init_rocket;
use crate::mail::{MailMessage, Mailer};
use crate::models::{Relationship, Shift};

static INIT: Once = Once::new();
pub static STANDARD_PASSWORD: &str = "password123";

pub fn day(value: &str) -> NaiveDate {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").unwrap()
}

/// Single-connection in-memory database with the schema applied.
pub async fn memory_pool() -> Result<Pool<Sqlite>, AppError> {
    INIT.call_once(|| {
        let _ = env_logger::builder()
            .parse_filters("debug")
            .is_test(true)
            .try_init();
    });

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;
    Ok(pool)
}

struct TestUser {
    username: String,
    is_teacher: bool,
    is_director: bool,
}

struct TestCourse {
    name: String,
    schedule: String,
    capacity: i64,
    due_day: u32,
    staff: Vec<String>,
}

struct TestStudent {
    first_name: String,
    course: Option<String>,
}

struct TestFamilyMember {
    first_name: String,
    student: String,
    email: String,
}

#[derive(Default)]
pub struct TestDbBuilder {
    users: Vec<TestUser>,
    courses: Vec<TestCourse>,
    students: Vec<TestStudent>,
    family: Vec<TestFamilyMember>,
}

impl TestDbBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn director(mut self, username: &str) -> Self {
        self.users.push(TestUser {
            username: username.to_string(),
            is_teacher: false,
            is_director: true,
        });
        self
    }

    pub fn teacher(mut self, username: &str) -> Self {
        self.users.push(TestUser {
            username: username.to_string(),
            is_teacher: true,
            is_director: false,
        });
        self
    }

    /// A user with no capabilities yet.
    pub fn user(mut self, username: &str) -> Self {
        self.users.push(TestUser {
            username: username.to_string(),
            is_teacher: false,
            is_director: false,
        });
        self
    }

    pub fn course(mut self, name: &str, schedule: &str, staff: &[&str]) -> Self {
        self.courses.push(TestCourse {
            name: name.to_string(),
            schedule: schedule.to_string(),
            capacity: 20,
            due_day: 10,
            staff: staff.iter().map(|s| s.to_string()).collect(),
        });
        self
    }

    pub fn course_with_capacity(mut self, name: &str, capacity: i64) -> Self {
        self.courses.push(TestCourse {
            name: name.to_string(),
            schedule: "08:00 - 12:00".to_string(),
            capacity,
            due_day: 10,
            staff: Vec::new(),
        });
        self
    }

    pub fn student(mut self, first_name: &str, course: Option<&str>) -> Self {
        self.students.push(TestStudent {
            first_name: first_name.to_string(),
            course: course.map(String::from),
        });
        self
    }

    pub fn family_member(mut self, first_name: &str, student: &str, email: &str) -> Self {
        self.family.push(TestFamilyMember {
            first_name: first_name.to_string(),
            student: student.to_string(),
            email: email.to_string(),
        });
        self
    }

    pub async fn build(self) -> Result<TestDb, AppError> {
        let pool = memory_pool().await?;

        let mut users = HashMap::new();
        let mut courses = HashMap::new();
        let mut students = HashMap::new();
        let mut family = HashMap::new();

        for (i, user) in self.users.iter().enumerate() {
            let new_user = NewUser {
                username: user.username.clone(),
                password: STANDARD_PASSWORD.to_string(),
                first_name: user.username.clone(),
                last_name: "Staff".to_string(),
                email: format!("{}@example.com", user.username),
                dni: format!("{}", 30_000_000 + i),
                is_teacher: user.is_teacher,
                is_director: user.is_director,
                ..Default::default()
            };
            users.insert(user.username.clone(), create_user(&pool, &new_user).await?);
        }

        for course in &self.courses {
            let new_course = NewCourse {
                name: course.name.clone(),
                shift: Shift::Morning,
                capacity: course.capacity,
                schedule: course.schedule.clone(),
                room_age: 4,
                school_year_id: None,
                monthly_fee_cents: 1_500_000,
                due_day: course.due_day,
            };
            let course_id = create_course(&pool, &new_course).await?;

            for username in &course.staff {
                let user_id = users.get(username).copied().ok_or_else(|| {
                    AppError::NotFound(format!("Test user {} was not declared", username))
                })?;
                assign_staff(&pool, course_id, user_id).await?;
            }
            courses.insert(course.name.clone(), course_id);
        }

        for (i, student) in self.students.iter().enumerate() {
            let new_student = NewStudent {
                first_name: student.first_name.clone(),
                last_name: "Child".to_string(),
                dni: format!("{}", 50_000_000 + i),
                birth_date: day("2020-06-15"),
                course_id: student.course.as_ref().and_then(|c| courses.get(c).copied()),
            };
            students.insert(
                student.first_name.clone(),
                create_student(&pool, &new_student).await?,
            );
        }

        for (i, member) in self.family.iter().enumerate() {
            let student_id = students.get(&member.student).copied().ok_or_else(|| {
                AppError::NotFound(format!("Test student {} was not declared", member.student))
            })?;
            let new_member = NewFamilyMember {
                student_id,
                first_name: member.first_name.clone(),
                last_name: "Parent".to_string(),
                dni: format!("{}", 20_000_000 + i),
                phone: String::new(),
                address: String::new(),
                email: member.email.clone(),
                relationship: Relationship::Mother,
            };
            family.insert(
                member.first_name.clone(),
                create_family_member(&pool, &new_member).await?,
            );
        }

        Ok(TestDb {
            pool,
            users,
            courses,
            students,
            family,
        })
    }
}

pub struct TestDb {
    pub pool: Pool<Sqlite>,
    users: HashMap<String, i64>,
    courses: HashMap<String, i64>,
    students: HashMap<String, i64>,
    family: HashMap<String, i64>,
}

impl TestDb {
    pub fn user_id(&self, username: &str) -> i64 {
        self.users[username]
    }

    pub fn course_id(&self, name: &str) -> i64 {
        self.courses[name]
    }

    pub fn student_id(&self, first_name: &str) -> i64 {
        self.students[first_name]
    }

    pub fn family_member_id(&self, first_name: &str) -> i64 {
        self.family[first_name]
    }
}

/// Two teachers, a director, two morning courses and three students.
pub async fn create_standard_test_db() -> TestDb {
    TestDbBuilder::new()
        .director("director")
        .teacher("teacher_a")
        .teacher("teacher_b")
        .course("Room A", "08:00 - 12:00", &["teacher_a"])
        .course("Room B", "13:00 - 17:00", &["teacher_b"])
        .student("Tomas", Some("Room A"))
        .student("Lucia", Some("Room A"))
        .student("Mateo", Some("Room B"))
        .family_member("Ana", "Tomas", "ana@example.com")
        .family_member("Jorge", "Mateo", "")
        .build()
        .await
        .expect("Failed to build test database")
}

/// Keeps every message instead of delivering it.
#[derive(Default)]
pub struct RecordingMailer {
    pub sent: Mutex<Vec<MailMessage>>,
}

impl Mailer for RecordingMailer {
    fn send(&self, message: &MailMessage) -> Result<(), AppError> {
        self.sent
            .lock()
            .map_err(|_| AppError::ExternalService("mailer lock poisoned".to_string()))?
            .push(message.clone());
        Ok(())
    }
}

pub fn test_config() -> AppConfig {
    AppConfig {
        database_url: "sqlite::memory:".to_string(),
        scheduler_enabled: false,
        ..Default::default()
    }
}

pub async fn setup_test_client(test_db: &TestDb) -> Client {
    let mailer: Arc<dyn Mailer> = Arc::new(RecordingMailer::default());
    let rocket = init_rocket(test_db.pool.clone(), test_config(), mailer).await;
    Client::tracked(rocket)
        .await
        .expect("valid rocket instance")
}

/// Logs in through the API; the tracked client keeps the session cookie.
pub async fn login_test_user(client: &Client, username: &str) {
    let response = client
        .post("/api/login")
        .header(ContentType::JSON)
        .body(
            json!({
                "username": username,
                "password": STANDARD_PASSWORD
            })
            .to_string(),
        )
        .dispatch()
        .await;

    assert_eq!(
        response.status(),
        Status::Ok,
        "login failed for {}",
        username
    );
}
