#[cfg(test)]
mod tests {
    use chrono::{Duration, NaiveDateTime};

    use crate::auth::{Capability, Permission};
    use crate::bootstrap_director;
    use crate::db::{
        NewStudent, NewUser, assign_staff, authenticate_user, create_student, create_user,
        director_exists, find_user_by_username, get_course, get_user, set_user_capabilities,
        update_user_password, username_exists, verify_password,
    };
    use crate::env::InitialDirector;
    use crate::error::AppError;
    use crate::recovery::{
        remind_username, request_password_reset, reset_password, verify_reset_token,
    };
    use crate::test::utils::{
        RecordingMailer, STANDARD_PASSWORD, TestDbBuilder, create_standard_test_db, day,
    };

    const OFFICE: &str = "office@kinder-admin.local";

    fn at(value: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M").unwrap()
    }

    fn last_code(mailer: &RecordingMailer) -> String {
        let sent = mailer.sent.lock().unwrap();
        let body = &sent.last().expect("a recovery mail").body;
        let start = body.find("code is: ").expect("code in body") + "code is: ".len();
        body[start..start + 6].to_string()
    }

    fn new_user(username: &str, dni: &str) -> NewUser {
        NewUser {
            username: username.to_string(),
            password: STANDARD_PASSWORD.to_string(),
            first_name: "Maria".to_string(),
            last_name: "Gomez".to_string(),
            email: format!("{}@example.com", username),
            dni: dni.to_string(),
            ..Default::default()
        }
    }

    #[rocket::async_test]
    async fn test_duplicate_username_and_dni_conflict() {
        let test_db = create_standard_test_db().await;

        create_user(&test_db.pool, &new_user("maria", "40111222"))
            .await
            .unwrap();

        let err = create_user(&test_db.pool, &new_user("maria", "40111333"))
            .await
            .unwrap_err();
        assert!(err.is_conflict());

        let err = create_user(&test_db.pool, &new_user("maria_g", "40111222"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(msg) if msg.contains("40111222")));

        assert!(username_exists(&test_db.pool, "maria", None).await.unwrap());
        let id = find_user_by_username(&test_db.pool, "maria")
            .await
            .unwrap()
            .map(|u| u.id);
        assert!(!username_exists(&test_db.pool, "maria", id).await.unwrap());
    }

    #[rocket::async_test]
    async fn test_authentication_checks_password() {
        let test_db = create_standard_test_db().await;

        let user = authenticate_user(&test_db.pool, "teacher_a", STANDARD_PASSWORD)
            .await
            .unwrap()
            .expect("valid credentials");
        assert_eq!(user.id, test_db.user_id("teacher_a"));
        assert!(user.is_teacher());
        assert!(!user.is_director());

        assert!(
            authenticate_user(&test_db.pool, "teacher_a", "wrong-password")
                .await
                .unwrap()
                .is_none()
        );
        assert!(
            authenticate_user(&test_db.pool, "nobody", STANDARD_PASSWORD)
                .await
                .unwrap()
                .is_none()
        );

        update_user_password(&test_db.pool, user.id, "new-password-1")
            .await
            .unwrap();
        assert!(verify_password(&test_db.pool, user.id, "new-password-1").await.unwrap());
        assert!(!verify_password(&test_db.pool, user.id, STANDARD_PASSWORD).await.unwrap());
    }

    #[rocket::async_test]
    async fn test_capabilities_grant_permissions() {
        let test_db = TestDbBuilder::new()
            .user("newcomer")
            .build()
            .await
            .unwrap();
        let id = test_db.user_id("newcomer");

        let user = get_user(&test_db.pool, id).await.unwrap();
        assert!(user.capabilities.is_empty());
        assert!(!user.has_permission(Permission::ViewAssignedCourses));

        set_user_capabilities(&test_db.pool, id, true, true).await.unwrap();
        let user = get_user(&test_db.pool, id).await.unwrap();
        assert!(user.has_capability(Capability::Teacher));
        assert!(user.has_capability(Capability::Director));
        assert!(user.has_permission(Permission::RecordOwnAttendance));
        assert!(user.has_permission(Permission::ManageSystemConfig));

        set_user_capabilities(&test_db.pool, id, true, false).await.unwrap();
        let user = get_user(&test_db.pool, id).await.unwrap();
        assert!(matches!(
            user.require_permission(Permission::ManageCourses),
            Err(AppError::Authorization(_))
        ));

        let err = set_user_capabilities(&test_db.pool, 9_999, true, false)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[rocket::async_test]
    async fn test_director_bootstrap_runs_once() {
        let test_db = TestDbBuilder::new().build().await.unwrap();
        assert!(!director_exists(&test_db.pool).await.unwrap());

        let director = InitialDirector {
            username: "principal".to_string(),
            password: "a-long-password".to_string(),
        };

        assert!(bootstrap_director(&test_db.pool, &director).await.unwrap());
        assert!(director_exists(&test_db.pool).await.unwrap());
        assert!(!bootstrap_director(&test_db.pool, &director).await.unwrap());

        let user = authenticate_user(&test_db.pool, "principal", "a-long-password")
            .await
            .unwrap()
            .expect("bootstrap credentials");
        assert_eq!(user.full_name(), "School Director");
        assert!(user.is_director());
    }

    #[rocket::async_test]
    async fn test_only_teachers_are_assigned_to_courses() {
        let test_db = create_standard_test_db().await;

        let err = assign_staff(
            &test_db.pool,
            test_db.course_id("Room A"),
            test_db.user_id("director"),
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            AppError::NotFound(msg) if msg == "User does not exist or is not a teacher"
        ));

        let user = get_user(&test_db.pool, test_db.user_id("teacher_a")).await.unwrap();
        let course = get_course(&test_db.pool, test_db.course_id("Room A")).await.unwrap();
        user.require_course_access(&test_db.pool, course.id).await.unwrap();

        let other = get_user(&test_db.pool, test_db.user_id("teacher_b")).await.unwrap();
        assert!(matches!(
            other.require_course_access(&test_db.pool, course.id).await,
            Err(AppError::Authorization(_))
        ));
    }

    #[rocket::async_test]
    async fn test_full_course_rejects_students() {
        let test_db = TestDbBuilder::new()
            .course_with_capacity("Tiny Room", 1)
            .student("Bruno", Some("Tiny Room"))
            .build()
            .await
            .unwrap();

        let course = get_course(&test_db.pool, test_db.course_id("Tiny Room"))
            .await
            .unwrap();
        assert_eq!(course.enrolled, 1);
        assert_eq!(course.free_places, 0);

        let err = create_student(
            &test_db.pool,
            &NewStudent {
                first_name: "Carla".to_string(),
                last_name: "Child".to_string(),
                dni: "51000000".to_string(),
                birth_date: day("2020-02-01"),
                course_id: Some(course.id),
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            AppError::Validation(msg) if msg == "No places available in this course"
        ));
    }

    #[rocket::async_test]
    async fn test_recovery_for_unknown_email_sends_nothing() {
        let test_db = create_standard_test_db().await;
        let mailer = RecordingMailer::default();
        let now = at("2025-04-10 08:00");

        request_password_reset(&test_db.pool, &mailer, OFFICE, "nobody@example.com", now)
            .await
            .unwrap();
        remind_username(&test_db.pool, &mailer, OFFICE, "nobody@example.com")
            .await
            .unwrap();
        assert!(mailer.sent.lock().unwrap().is_empty());

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM password_reset_tokens")
            .fetch_one(&test_db.pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[rocket::async_test]
    async fn test_password_reset_with_recovery_code() {
        let test_db = create_standard_test_db().await;
        let mailer = RecordingMailer::default();
        let now = at("2025-04-10 08:00");

        request_password_reset(&test_db.pool, &mailer, OFFICE, "Teacher_A@example.com", now)
            .await
            .unwrap();
        {
            let sent = mailer.sent.lock().unwrap();
            assert_eq!(sent.len(), 1);
            assert_eq!(sent[0].to, "teacher_a@example.com");
            assert_eq!(sent[0].from, OFFICE);
            assert_eq!(sent[0].subject, "Password recovery code");
        }
        let code = last_code(&mailer);
        assert!(code.chars().all(|c| c.is_ascii_digit()));

        let status = verify_reset_token(&test_db.pool, &code, now + Duration::hours(1))
            .await
            .unwrap();
        assert!(status.valid);
        assert_eq!(status.username, "teacher_a");

        reset_password(&test_db.pool, &code, "fresh-password", now + Duration::hours(2))
            .await
            .unwrap();

        let user_id = test_db.user_id("teacher_a");
        assert!(verify_password(&test_db.pool, user_id, "fresh-password").await.unwrap());
        assert!(!verify_password(&test_db.pool, user_id, STANDARD_PASSWORD).await.unwrap());
        let stored: (String,) = sqlx::query_as("SELECT password FROM users WHERE id = ?")
            .bind(user_id)
            .fetch_one(&test_db.pool)
            .await
            .unwrap();
        assert_ne!(stored.0, "fresh-password");
        assert!(stored.0.starts_with("$2"));
    }

    #[rocket::async_test]
    async fn test_recovery_code_cannot_be_reused() {
        let test_db = create_standard_test_db().await;
        let mailer = RecordingMailer::default();
        let now = at("2025-04-10 08:00");

        request_password_reset(&test_db.pool, &mailer, OFFICE, "teacher_b@example.com", now)
            .await
            .unwrap();
        let code = last_code(&mailer);

        reset_password(&test_db.pool, &code, "first-new-password", now)
            .await
            .unwrap();

        let err = reset_password(&test_db.pool, &code, "second-new-password", now)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::Validation(msg) if msg == "Invalid or already used token"
        ));

        let err = verify_reset_token(&test_db.pool, &code, now).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let user_id = test_db.user_id("teacher_b");
        assert!(verify_password(&test_db.pool, user_id, "first-new-password").await.unwrap());
    }

    #[rocket::async_test]
    async fn test_expired_recovery_code_is_rejected() {
        let test_db = create_standard_test_db().await;
        let mailer = RecordingMailer::default();
        let now = at("2025-04-10 08:00");

        request_password_reset(&test_db.pool, &mailer, OFFICE, "teacher_a@example.com", now)
            .await
            .unwrap();
        let code = last_code(&mailer);
        let later = now + Duration::hours(25);

        let err = verify_reset_token(&test_db.pool, &code, later).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::Validation(msg) if msg.contains("expired")
        ));

        let err = reset_password(&test_db.pool, &code, "fresh-password", later)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let user_id = test_db.user_id("teacher_a");
        assert!(verify_password(&test_db.pool, user_id, STANDARD_PASSWORD).await.unwrap());
    }

    #[rocket::async_test]
    async fn test_new_recovery_code_replaces_previous_one() {
        let test_db = create_standard_test_db().await;
        let mailer = RecordingMailer::default();
        let now = at("2025-04-10 08:00");

        request_password_reset(&test_db.pool, &mailer, OFFICE, "teacher_a@example.com", now)
            .await
            .unwrap();
        let first = last_code(&mailer);

        request_password_reset(
            &test_db.pool,
            &mailer,
            OFFICE,
            "teacher_a@example.com",
            now + Duration::minutes(5),
        )
        .await
        .unwrap();
        let second = last_code(&mailer);
        assert_ne!(first, second);

        let err = verify_reset_token(&test_db.pool, &first, now).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert!(verify_reset_token(&test_db.pool, &second, now).await.is_ok());
    }

    #[rocket::async_test]
    async fn test_username_reminder_is_mailed() {
        let test_db = create_standard_test_db().await;
        let mailer = RecordingMailer::default();

        remind_username(&test_db.pool, &mailer, OFFICE, "teacher_b@example.com")
            .await
            .unwrap();

        let sent = mailer.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "teacher_b@example.com");
        assert!(sent[0].body.contains("Your username is: teacher_b"));
    }
}
