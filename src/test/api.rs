#[cfg(test)]
mod tests {
    use rocket::http::{ContentType, Cookie, Status};
    use serde_json::{Value, json};

    use crate::auth::SESSION_COOKIE;
    use crate::test::utils::{
        STANDARD_PASSWORD, create_standard_test_db, login_test_user, setup_test_client,
    };

    async fn body_json(response: rocket::local::asynchronous::LocalResponse<'_>) -> Value {
        let body = response.into_string().await.unwrap_or_default();
        serde_json::from_str(&body).unwrap()
    }

    #[rocket::async_test]
    async fn test_login_api() {
        let test_db = create_standard_test_db().await;
        let client = setup_test_client(&test_db).await;

        let response = client
            .post("/api/login")
            .header(ContentType::JSON)
            .body(
                json!({
                    "username": "teacher_a",
                    "password": STANDARD_PASSWORD
                })
                .to_string(),
            )
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::Ok);
        assert!(response.cookies().get(SESSION_COOKIE).is_some());

        let body = body_json(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["user"]["username"], "teacher_a");
        assert_eq!(body["user"]["capabilities"], json!(["teacher"]));

        let response = client
            .post("/api/login")
            .header(ContentType::JSON)
            .body(
                json!({
                    "username": "teacher_a",
                    "password": "wrong_password"
                })
                .to_string(),
            )
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::Unauthorized);
        let body = body_json(response).await;
        assert_eq!(
            body["errors"]["authentication"][0],
            "Invalid username or password"
        );
    }

    #[rocket::async_test]
    async fn test_auth_required_apis() {
        let test_db = create_standard_test_db().await;
        let client = setup_test_client(&test_db).await;

        let endpoints = [
            "/api/me",
            "/api/courses",
            "/api/students",
            "/api/attendance/schedule-status",
            "/api/tuition/summary",
        ];

        for endpoint in endpoints {
            let response = client.get(endpoint).dispatch().await;
            assert_eq!(
                response.status(),
                Status::Unauthorized,
                "Endpoint {} did not require authentication",
                endpoint
            );
        }

        let response = client
            .get("/api/me")
            .private_cookie(Cookie::new(SESSION_COOKIE, "forged-token"))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Unauthorized);
    }

    #[rocket::async_test]
    async fn test_logout_ends_session() {
        let test_db = create_standard_test_db().await;
        let client = setup_test_client(&test_db).await;
        login_test_user(&client, "teacher_a").await;

        assert_eq!(client.get("/api/me").dispatch().await.status(), Status::Ok);

        let response = client.post("/api/logout").dispatch().await;
        assert_eq!(response.status(), Status::Ok);

        assert_eq!(
            client.get("/api/me").dispatch().await.status(),
            Status::Unauthorized
        );
    }

    #[rocket::async_test]
    async fn test_teacher_cannot_manage_courses() {
        let test_db = create_standard_test_db().await;
        let client = setup_test_client(&test_db).await;
        login_test_user(&client, "teacher_a").await;

        let response = client
            .post("/api/courses")
            .header(ContentType::JSON)
            .body(
                json!({
                    "name": "Room C",
                    "capacity": 15,
                    "schedule": "08:00 - 12:00",
                    "room_age": 3
                })
                .to_string(),
            )
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Forbidden);

        let response = client.get("/api/courses").dispatch().await;
        assert_eq!(response.status(), Status::Ok);
        let courses = body_json(response).await;
        let courses = courses.as_array().unwrap();
        assert_eq!(courses.len(), 1);
        assert_eq!(courses[0]["name"], "Room A");

        let room_b = test_db.course_id("Room B");
        let response = client
            .get(format!("/api/courses/{}", room_b))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Forbidden);
    }

    #[rocket::async_test]
    async fn test_director_creates_course() {
        let test_db = create_standard_test_db().await;
        let client = setup_test_client(&test_db).await;
        login_test_user(&client, "director").await;

        let response = client
            .post("/api/courses")
            .header(ContentType::JSON)
            .body(
                json!({
                    "name": "Room C",
                    "shift": "afternoon",
                    "capacity": 15,
                    "schedule": "13:00 - 17:00",
                    "room_age": 3,
                    "monthly_fee_cents": 1_200_000
                })
                .to_string(),
            )
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);
        let id = body_json(response).await["id"].as_i64().unwrap();

        let response = client.get(format!("/api/courses/{}", id)).dispatch().await;
        assert_eq!(response.status(), Status::Ok);
        let course = body_json(response).await;
        assert_eq!(course["name"], "Room C");
        assert_eq!(course["due_day"], 10);
        assert_eq!(course["free_places"], 15);

        let response = client
            .post("/api/courses")
            .header(ContentType::JSON)
            .body(
                json!({
                    "name": "Room D",
                    "capacity": 15,
                    "schedule": "mornings",
                    "room_age": 3
                })
                .to_string(),
            )
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::BadRequest);

        let response = client.get("/api/courses").dispatch().await;
        assert_eq!(body_json(response).await.as_array().unwrap().len(), 3);
    }

    #[rocket::async_test]
    async fn test_register_and_check_username() {
        let test_db = create_standard_test_db().await;
        let client = setup_test_client(&test_db).await;

        let response = client
            .get("/api/users/check-username?username=newteacher")
            .dispatch()
            .await;
        assert_eq!(body_json(response).await["available"], true);

        let response = client
            .post("/api/register")
            .header(ContentType::JSON)
            .body(
                json!({
                    "username": "newteacher",
                    "password": "short",
                    "first_name": "Laura",
                    "last_name": "Diaz",
                    "email": "laura@example.com",
                    "dni": "41222333"
                })
                .to_string(),
            )
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::UnprocessableEntity);

        let response = client
            .post("/api/register")
            .header(ContentType::JSON)
            .body(
                json!({
                    "username": "newteacher",
                    "password": "long-enough-password",
                    "first_name": "Laura",
                    "last_name": "Diaz",
                    "email": "laura@example.com",
                    "dni": "41222333"
                })
                .to_string(),
            )
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);
        let id = body_json(response).await["id"].as_i64().unwrap();

        let response = client
            .get("/api/users/check-username?username=newteacher")
            .dispatch()
            .await;
        assert_eq!(body_json(response).await["available"], false);

        let response = client
            .get(format!(
                "/api/users/check-username?username=newteacher&exclude_id={}",
                id
            ))
            .dispatch()
            .await;
        assert_eq!(body_json(response).await["available"], true);
    }

    #[rocket::async_test]
    async fn test_weekend_marking_is_rejected() {
        let test_db = create_standard_test_db().await;
        let client = setup_test_client(&test_db).await;
        login_test_user(&client, "director").await;

        let response = client
            .post("/api/attendance/absences/mark?date=2025-04-12")
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::BadRequest);

        let response = client
            .post("/api/attendance/absences/mark?date=2999-01-04")
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::BadRequest);

        let response = client
            .post("/api/attendance/absences/mark?date=2025-04-10")
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);
        let body = body_json(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["total_marked"], 3);
    }

    #[rocket::async_test]
    async fn test_disabled_attendance_blocks_arrival() {
        let test_db = create_standard_test_db().await;

        let director = setup_test_client(&test_db).await;
        login_test_user(&director, "director").await;
        let teacher = setup_test_client(&test_db).await;
        login_test_user(&teacher, "teacher_a").await;

        let response = director.post("/api/config/attendance/toggle").dispatch().await;
        assert_eq!(response.status(), Status::Ok);
        assert_eq!(body_json(response).await["attendance_enabled"], false);

        let response = teacher.get("/api/config/attendance/status").dispatch().await;
        assert_eq!(body_json(response).await["enabled"], false);

        let response = teacher
            .post("/api/staff/arrival")
            .header(ContentType::JSON)
            .body(
                json!({
                    "course_id": test_db.course_id("Room A"),
                    "time": "07:50"
                })
                .to_string(),
            )
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Forbidden);

        let response = teacher.post("/api/config/attendance/toggle").dispatch().await;
        assert_eq!(response.status(), Status::Forbidden);
    }

    #[rocket::async_test]
    async fn test_health() {
        let test_db = create_standard_test_db().await;
        let client = setup_test_client(&test_db).await;

        let response = client.get("/api/health").dispatch().await;
        assert_eq!(response.status(), Status::Ok);
        assert_eq!(response.into_string().await.unwrap(), "OK");
    }

    #[rocket::async_test]
    async fn test_account_recovery_is_public() {
        let test_db = create_standard_test_db().await;
        let client = setup_test_client(&test_db).await;

        for (endpoint, email) in [
            ("/api/auth/forgot-password", "teacher_a@example.com"),
            ("/api/auth/forgot-password", "nobody@example.com"),
            ("/api/auth/forgot-username", "nobody@example.com"),
        ] {
            let response = client
                .post(endpoint)
                .header(ContentType::JSON)
                .body(json!({ "email": email }).to_string())
                .dispatch()
                .await;
            assert_eq!(response.status(), Status::Ok, "{} {}", endpoint, email);
            let body = body_json(response).await;
            assert_eq!(body["success"], true);
        }

        let response = client
            .post("/api/auth/reset-password")
            .header(ContentType::JSON)
            .body(
                json!({
                    "token": "000000-not-issued",
                    "new_password": "fresh-password"
                })
                .to_string(),
            )
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::BadRequest);

        let response = client
            .post("/api/auth/verify-reset-token")
            .header(ContentType::JSON)
            .body(json!({ "token": "000000-not-issued" }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::BadRequest);
    }
}
