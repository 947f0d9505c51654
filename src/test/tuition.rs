#[cfg(test)]
mod tests {
    use chrono::NaiveDateTime;

    use crate::db::{
        DebtFilter, DueNoticeFilter, PaymentFilter, get_debtor, list_debtors_for_notice,
        list_due_notices, list_payments, mark_debtor_paid,
    };
    use crate::error::AppError;
    use crate::mail::{ReminderKind, send_reminders};
    use crate::models::{DueNotice, PaymentStatus};
    use crate::test::utils::{RecordingMailer, TestDb, TestDbBuilder, day};
    use crate::tuition::{
        NewPayment, debts_by_student, dues_summary, ensure_due_notice, generate_year_dues,
        notice_debtors,
        payment_statistics, process_overdue, record_payment, settle_debtor,
    };

    fn at(value: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M").unwrap()
    }

    async fn billed_db() -> TestDb {
        let test_db = TestDbBuilder::new()
            .director("director")
            .teacher("teacher_a")
            .course("Room A", "08:00 - 12:00", &["teacher_a"])
            .student("Tomas", Some("Room A"))
            .student("Lucia", Some("Room A"))
            .family_member("Ana", "Tomas", "ana@example.com")
            .family_member("Pedro", "Lucia", "pedro@example.com")
            .build()
            .await
            .expect("Failed to build test database");

        generate_year_dues(&test_db.pool, test_db.course_id("Room A"), 2025)
            .await
            .unwrap();
        test_db
    }

    async fn notice_for(test_db: &TestDb, month: u32) -> DueNotice {
        list_due_notices(
            &test_db.pool,
            DueNoticeFilter {
                course_id: Some(test_db.course_id("Room A")),
                year: Some(2025),
                month: Some(month),
                ..Default::default()
            },
        )
        .await
        .unwrap()
        .remove(0)
    }

    #[rocket::async_test]
    async fn test_year_dues_are_generated_once() {
        let test_db = billed_db().await;
        let room_a = test_db.course_id("Room A");

        let notices = list_due_notices(
            &test_db.pool,
            DueNoticeFilter {
                course_id: Some(room_a),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(notices.len(), 12);
        assert!(notices.iter().all(|n| n.amount_cents == 1_500_000));

        let february = notice_for(&test_db, 2).await;
        assert_eq!(february.due_date, day("2025-02-10"));

        let again = generate_year_dues(&test_db.pool, room_a, 2025).await.unwrap();
        assert_eq!(again.created, 0);
        assert_eq!(again.existing, 12);
    }

    #[rocket::async_test]
    async fn test_overdue_flags_each_unpaid_student_once() {
        let test_db = billed_db().await;

        let outcome = process_overdue(&test_db.pool, day("2025-04-11"), at("2025-04-11 06:00"))
            .await
            .unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.notices_processed, 4);
        assert_eq!(outcome.total_flagged, 8);

        let april = notice_for(&test_db, 4).await;
        let debtors = list_debtors_for_notice(&test_db.pool, april.id).await.unwrap();
        assert_eq!(debtors.len(), 2);
        assert!(debtors.iter().all(|d| d.days_late == 1 && !d.paid));
        assert!(debtors.iter().all(|d| d.amount_owed_cents == 1_500_000));

        let january = notice_for(&test_db, 1).await;
        let debtors = list_debtors_for_notice(&test_db.pool, january.id).await.unwrap();
        assert!(debtors.iter().all(|d| d.days_late == 91));

        let rerun = process_overdue(&test_db.pool, day("2025-04-14"), at("2025-04-14 06:00"))
            .await
            .unwrap();
        assert_eq!(rerun.total_flagged, 0);
        assert_eq!(rerun.total_refreshed, 8);

        let debtors = list_debtors_for_notice(&test_db.pool, april.id).await.unwrap();
        assert_eq!(debtors.len(), 2);
        assert!(debtors.iter().all(|d| d.days_late == 4));
    }

    #[rocket::async_test]
    async fn test_overdue_on_weekend_is_rejected() {
        let test_db = billed_db().await;

        let outcome = process_overdue(&test_db.pool, day("2025-04-12"), at("2025-04-12 06:00"))
            .await
            .unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.total_flagged, 0);
        assert_eq!(
            outcome.message,
            "Overdue notices are not processed on weekends"
        );
    }

    #[rocket::async_test]
    async fn test_payment_resolves_debtor() {
        let test_db = billed_db().await;
        let tomas = test_db.student_id("Tomas");
        let ana = test_db.family_member_id("Ana");
        let april = notice_for(&test_db, 4).await;

        process_overdue(&test_db.pool, day("2025-04-11"), at("2025-04-11 06:00"))
            .await
            .unwrap();

        let payment = record_payment(
            &test_db.pool,
            &NewPayment {
                student_id: tomas,
                due_notice_id: april.id,
                family_member_id: ana,
                paid_on: day("2025-04-12"),
                amount_cents: None,
            },
            at("2025-04-12 10:00"),
        )
        .await
        .unwrap();
        assert_eq!(payment.status, PaymentStatus::Late);
        assert_eq!(payment.days_late, 2);
        assert_eq!(payment.amount_cents, 1_500_000);

        let debtors = list_debtors_for_notice(&test_db.pool, april.id).await.unwrap();
        let resolved = debtors.iter().find(|d| d.student_id == tomas).unwrap();
        assert!(resolved.paid);
        assert_eq!(resolved.days_late, 2);
        assert_eq!(resolved.paid_at, Some(at("2025-04-12 10:00")));

        let rerun = process_overdue(&test_db.pool, day("2025-04-14"), at("2025-04-14 06:00"))
            .await
            .unwrap();
        assert_eq!(rerun.total_flagged, 0);
        assert_eq!(rerun.total_refreshed, 7);

        let duplicate = record_payment(
            &test_db.pool,
            &NewPayment {
                student_id: tomas,
                due_notice_id: april.id,
                family_member_id: ana,
                paid_on: day("2025-04-14"),
                amount_cents: None,
            },
            at("2025-04-14 10:00"),
        )
        .await
        .unwrap_err();
        assert!(matches!(duplicate, AppError::Conflict(_)));
    }

    #[rocket::async_test]
    async fn test_on_time_payment_and_family_check() {
        let test_db = billed_db().await;
        let may = notice_for(&test_db, 5).await;

        let payment = record_payment(
            &test_db.pool,
            &NewPayment {
                student_id: test_db.student_id("Tomas"),
                due_notice_id: may.id,
                family_member_id: test_db.family_member_id("Ana"),
                paid_on: day("2025-05-10"),
                amount_cents: Some(1_400_000),
            },
            at("2025-05-10 09:00"),
        )
        .await
        .unwrap();
        assert_eq!(payment.status, PaymentStatus::OnTime);
        assert_eq!(payment.days_late, 0);
        assert_eq!(payment.amount_cents, 1_400_000);

        let err = record_payment(
            &test_db.pool,
            &NewPayment {
                student_id: test_db.student_id("Lucia"),
                due_notice_id: may.id,
                family_member_id: test_db.family_member_id("Ana"),
                paid_on: day("2025-05-10"),
                amount_cents: None,
            },
            at("2025-05-10 09:00"),
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            AppError::Validation(msg) if msg == "Family member does not belong to this student"
        ));

        let payments = list_payments(
            &test_db.pool,
            PaymentFilter {
                status: Some(PaymentStatus::OnTime),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(payments.len(), 1);
    }

    #[rocket::async_test]
    async fn test_manual_settlement() {
        let test_db = billed_db().await;
        let april = notice_for(&test_db, 4).await;

        process_overdue(&test_db.pool, day("2025-04-11"), at("2025-04-11 06:00"))
            .await
            .unwrap();

        let debtor = list_debtors_for_notice(&test_db.pool, april.id)
            .await
            .unwrap()
            .into_iter()
            .find(|d| d.student_id == test_db.student_id("Lucia"))
            .unwrap();

        let settled = settle_debtor(&test_db.pool, debtor.id, at("2025-04-15 11:00"))
            .await
            .unwrap();
        assert!(settled.paid);
        assert_eq!(settled.days_late, 5);

        let err = settle_debtor(&test_db.pool, debtor.id, at("2025-04-16 11:00"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::Validation(msg) if msg == "This debt has already been paid"
        ));
    }

    #[rocket::async_test]
    async fn test_paid_debtor_is_never_settled_again() {
        let test_db = billed_db().await;
        let april = notice_for(&test_db, 4).await;
        let tomas = test_db.student_id("Tomas");

        process_overdue(&test_db.pool, day("2025-04-11"), at("2025-04-11 06:00"))
            .await
            .unwrap();
        let debtor = list_debtors_for_notice(&test_db.pool, april.id)
            .await
            .unwrap()
            .into_iter()
            .find(|d| d.student_id == tomas)
            .unwrap();

        record_payment(
            &test_db.pool,
            &NewPayment {
                student_id: tomas,
                due_notice_id: april.id,
                family_member_id: test_db.family_member_id("Ana"),
                paid_on: day("2025-04-13"),
                amount_cents: None,
            },
            at("2025-04-13 10:00"),
        )
        .await
        .unwrap();

        let err = settle_debtor(&test_db.pool, debtor.id, at("2025-04-20 10:00"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::Validation(msg) if msg == "This debt has already been paid"
        ));

        assert!(
            !mark_debtor_paid(&test_db.pool, debtor.id, at("2025-04-20 10:00"), 10)
                .await
                .unwrap()
        );

        let debtor = get_debtor(&test_db.pool, debtor.id).await.unwrap();
        assert_eq!(debtor.days_late, 3);
        assert_eq!(debtor.paid_at, Some(at("2025-04-13 10:00")));
    }

    #[rocket::async_test]
    async fn test_statistics() {
        let test_db = billed_db().await;
        let april = notice_for(&test_db, 4).await;
        let march = notice_for(&test_db, 3).await;

        process_overdue(&test_db.pool, day("2025-04-11"), at("2025-04-11 06:00"))
            .await
            .unwrap();

        for (notice, paid_on) in [(&march, "2025-03-05"), (&april, "2025-04-14")] {
            record_payment(
                &test_db.pool,
                &NewPayment {
                    student_id: test_db.student_id("Tomas"),
                    due_notice_id: notice.id,
                    family_member_id: test_db.family_member_id("Ana"),
                    paid_on: day(paid_on),
                    amount_cents: None,
                },
                at("2025-04-14 10:00"),
            )
            .await
            .unwrap();
        }

        let summary = dues_summary(&test_db.pool, day("2025-04-11")).await.unwrap();
        assert_eq!(summary.total, 12);
        assert_eq!(summary.overdue, 4);
        assert_eq!(summary.current, 8);
        assert_eq!(summary.courses.len(), 1);
        assert_eq!(summary.courses[0].outstanding_debtors, 6);

        let debts = debts_by_student(&test_db.pool, DebtFilter::default())
            .await
            .unwrap();
        assert_eq!(debts.students, 2);
        let lucia = debts
            .debts
            .iter()
            .find(|d| d.student_id == test_db.student_id("Lucia"))
            .unwrap();
        assert_eq!(lucia.debts, 4);
        assert_eq!(lucia.total_owed_cents, 6_000_000);

        let statistics = payment_statistics(&test_db.pool, None, None).await.unwrap();
        assert_eq!(statistics.total_payments, 2);
        assert_eq!(statistics.on_time, 1);
        assert_eq!(statistics.late, 1);
        assert_eq!(statistics.on_time_percentage, 50.0);
        assert_eq!(statistics.total_collected_cents, 3_000_000);
        assert_eq!(statistics.by_month.len(), 2);
        assert_eq!(statistics.by_month[0].month, "2025-03");

        let debtors = notice_debtors(&test_db.pool, april.id, day("2025-04-11"))
            .await
            .unwrap();
        assert!(debtors.is_overdue);
        assert_eq!(debtors.days_overdue, 1);
        assert_eq!(debtors.debtors.len(), 1);
        assert_eq!(debtors.debtors[0].student_id, test_db.student_id("Lucia"));
    }

    #[rocket::async_test]
    async fn test_reminders_follow_calendar() {
        let test_db = billed_db().await;
        let mailer = RecordingMailer::default();

        let outcome = send_reminders(
            &test_db.pool,
            &mailer,
            "office@kinder-admin.local",
            ReminderKind::DueSoon,
            day("2025-04-10"),
        )
        .await
        .unwrap();
        assert_eq!(outcome.sent, 2);
        assert_eq!(outcome.failed, 0);

        let sent = mailer.sent.lock().unwrap();
        assert!(sent.iter().any(|m| m.to == "ana@example.com"));
        assert!(sent.iter().all(|m| m.subject == "Tuition for 04/2025 is due today"));
        drop(sent);

        let outcome = send_reminders(
            &test_db.pool,
            &mailer,
            "office@kinder-admin.local",
            ReminderKind::DueSoon,
            day("2025-04-11"),
        )
        .await
        .unwrap();
        assert_eq!(outcome.sent, 0);
        assert_eq!(outcome.message, "No course is due on this date");

        let outcome = send_reminders(
            &test_db.pool,
            &mailer,
            "office@kinder-admin.local",
            ReminderKind::MonthStart,
            day("2025-04-02"),
        )
        .await
        .unwrap();
        assert_eq!(outcome.sent, 0);

        let outcome = send_reminders(
            &test_db.pool,
            &mailer,
            "office@kinder-admin.local",
            ReminderKind::MonthStart,
            day("2025-04-01"),
        )
        .await
        .unwrap();
        assert_eq!(outcome.sent, 2);
    }

    #[rocket::async_test]
    async fn test_single_due_notice_is_created_once() {
        let test_db = billed_db().await;
        let room_a = test_db.course_id("Room A");

        let existing = ensure_due_notice(&test_db.pool, room_a, 4, 2025).await.unwrap();
        assert!(!existing.created);
        assert_eq!(existing.notice.id, notice_for(&test_db, 4).await.id);

        let first = ensure_due_notice(&test_db.pool, room_a, 2, 2026).await.unwrap();
        assert!(first.created);
        assert_eq!(first.notice.due_date, day("2026-02-10"));
        assert_eq!(first.notice.amount_cents, 1_500_000);

        let again = ensure_due_notice(&test_db.pool, room_a, 2, 2026).await.unwrap();
        assert!(!again.created);
        assert_eq!(again.notice.id, first.notice.id);

        let year = generate_year_dues(&test_db.pool, room_a, 2026).await.unwrap();
        assert_eq!(year.created, 11);
        assert_eq!(year.existing, 1);

        let err = ensure_due_notice(&test_db.pool, room_a, 13, 2026)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let err = ensure_due_notice(&test_db.pool, 9999, 2, 2026).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
