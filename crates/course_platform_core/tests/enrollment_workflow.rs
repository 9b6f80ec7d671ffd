mod common;

use common::{course_input, harness, lockstep_workflow, seed};
use course_platform_core::{
    CatalogRepository, EnrollmentError, EnrollmentLedger, EnrollmentResult, EnrollmentStatus,
    GatewayError, Learner, NewEnrollment, PaymentStatus, PortError,
};
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

#[tokio::test]
async fn free_enrollment_twice_creates_one_row() {
    let h = harness();
    let course = seed(&h.store, course_input("Free Rust", Decimal::ZERO)).await;
    let learner = Learner::new(Uuid::new_v4());

    let first = h.workflow.enroll_free(&learner, course.id).await.unwrap();
    assert!(first.is_new());
    assert_eq!(first.enrollment().status, EnrollmentStatus::Active);

    let second = h.workflow.enroll_free(&learner, course.id).await.unwrap();
    assert!(matches!(second, EnrollmentResult::AlreadyEnrolled(_)));
    assert_eq!(second.enrollment().id, first.enrollment().id);

    let stats = h.store.enrollment_stats(course.id).await.unwrap();
    assert_eq!(stats.total, 1);
    assert_eq!(h.store.get_course(course.id).await.unwrap().students_enrolled, 1);
}

#[tokio::test]
async fn free_enrollment_in_unpublished_course_is_not_found() {
    let h = harness();
    let mut input = course_input("Draft", Decimal::ZERO);
    input.is_published = false;
    let course = seed(&h.store, input).await;
    let learner = Learner::new(Uuid::new_v4());

    let err = h.workflow.enroll_free(&learner, course.id).await.unwrap_err();
    assert!(matches!(err, EnrollmentError::NotFound(_)));
    assert_eq!(h.store.enrollment_stats(course.id).await.unwrap().total, 0);

    let err = h.workflow.enroll_free(&learner, 9_999).await.unwrap_err();
    assert!(matches!(err, EnrollmentError::NotFound(_)));
}

#[tokio::test]
async fn paid_course_cannot_be_joined_directly() {
    let h = harness();
    let course = seed(&h.store, course_input("Paid", dec!(10.00))).await;
    let learner = Learner::new(Uuid::new_v4());

    let err = h.workflow.enroll_free(&learner, course.id).await.unwrap_err();
    assert!(matches!(err, EnrollmentError::PaymentRequired(id) if id == course.id));
    assert_eq!(h.store.enrollment_stats(course.id).await.unwrap().total, 0);
}

#[tokio::test]
async fn concurrent_enrollments_keep_counter_in_step() {
    let h = harness();
    let course = seed(&h.store, course_input("Popular", Decimal::ZERO)).await;

    let learners: Vec<Learner> = (0..20).map(|_| Learner::new(Uuid::new_v4())).collect();
    let mut tasks = Vec::new();
    for learner in learners.iter().chain(learners.iter()) {
        let workflow = h.workflow.clone();
        let learner = learner.clone();
        let course_id = course.id;
        tasks.push(tokio::spawn(async move {
            workflow.enroll_free(&learner, course_id).await
        }));
    }

    let mut created = 0;
    for task in tasks {
        if task.await.unwrap().unwrap().is_new() {
            created += 1;
        }
    }

    assert_eq!(created, 20);
    let stats = h.store.enrollment_stats(course.id).await.unwrap();
    assert_eq!(stats.active, 20);
    assert_eq!(
        h.store.get_course(course.id).await.unwrap().students_enrolled,
        stats.active
    );
}

#[tokio::test]
async fn begin_paid_enrollment_charges_discount_in_minor_units() {
    let h = harness();
    let mut input = course_input("Discounted", dec!(100.00));
    input.discount_price = Some(dec!(79.50));
    let course = seed(&h.store, input).await;
    let learner = Learner::new(Uuid::new_v4()).with_email("learner@example.com");

    let handle = h
        .workflow
        .begin_paid_enrollment(&learner, course.id)
        .await
        .unwrap();
    assert_eq!(handle.id, "cs_test_1");

    let created = h.gateway.created.lock().unwrap();
    let request = &created[0];
    assert_eq!(request.amount_minor, 7950);
    assert_eq!(request.currency, "inr");
    assert_eq!(request.correlation.learner_id, learner.id);
    assert_eq!(request.correlation.course_id, course.id);
    assert_eq!(request.customer_email.as_deref(), Some("learner@example.com"));
    assert_eq!(
        request.success_url,
        format!(
            "https://courses.example/payment/success?session_id={{CHECKOUT_SESSION_ID}}&course_id={}",
            course.id
        )
    );
    assert_eq!(
        request.cancel_url,
        format!("https://courses.example/payment/cancel?course_id={}", course.id)
    );
}

#[tokio::test]
async fn begin_paid_enrollment_rejects_enrolled_learner_without_gateway_call() {
    let h = harness();
    let course = seed(&h.store, course_input("Paid", dec!(199.99))).await;
    let learner = Learner::new(Uuid::new_v4());
    h.store
        .record_enrollment(NewEnrollment {
            learner_id: learner.id,
            course_id: course.id,
            enrolled_at: Utc::now(),
            payment: None,
        })
        .await
        .unwrap();

    let err = h
        .workflow
        .begin_paid_enrollment(&learner, course.id)
        .await
        .unwrap_err();
    assert!(matches!(err, EnrollmentError::AlreadyEnrolled(_)));
    assert_eq!(h.gateway.created_count(), 0);
}

#[tokio::test]
async fn begin_paid_enrollment_rejects_non_positive_charge() {
    let h = harness();
    let free = seed(&h.store, course_input("Free", Decimal::ZERO)).await;
    let mut broken = course_input("Broken", dec!(20.00));
    broken.discount_price = Some(dec!(-1.00));
    let broken = seed(&h.store, broken).await;
    let learner = Learner::new(Uuid::new_v4());

    for course_id in [free.id, broken.id] {
        let err = h
            .workflow
            .begin_paid_enrollment(&learner, course_id)
            .await
            .unwrap_err();
        assert!(matches!(err, EnrollmentError::InvalidAmount(id) if id == course_id));
    }
    assert_eq!(h.gateway.created_count(), 0);
}

#[tokio::test]
async fn begin_paid_enrollment_maps_gateway_outage() {
    let h = harness();
    let course = seed(&h.store, course_input("Paid", dec!(5.00))).await;
    *h.gateway.unavailable.lock().unwrap() = true;

    let err = h
        .workflow
        .begin_paid_enrollment(&Learner::new(Uuid::new_v4()), course.id)
        .await
        .unwrap_err();
    assert!(matches!(err, EnrollmentError::GatewayUnavailable));
}

#[tokio::test]
async fn confirmed_session_records_gateway_amount() {
    let h = harness();
    let course = seed(&h.store, course_input("Premium", dec!(199.99))).await;
    let learner = Learner::new(Uuid::new_v4());

    h.workflow
        .begin_paid_enrollment(&learner, course.id)
        .await
        .unwrap();
    assert_eq!(h.gateway.created.lock().unwrap()[0].amount_minor, 19999);

    h.gateway.script_paid("cs_test_1", learner.id, course.id, 19999);
    let result = h
        .workflow
        .confirm_paid_enrollment(&learner, "cs_test_1", course.id)
        .await
        .unwrap();

    assert!(result.is_new());
    let payment = result.enrollment().payment.clone().unwrap();
    assert_eq!(payment.status, PaymentStatus::Completed);
    assert_eq!(payment.amount, dec!(199.99));
    assert_eq!(payment.payment_id, "pi_cs_test_1");
    assert_eq!(h.store.get_course(course.id).await.unwrap().students_enrolled, 1);
}

#[tokio::test]
async fn replayed_confirmation_does_not_double_count() {
    let h = harness();
    let course = seed(&h.store, course_input("Premium", dec!(199.99))).await;
    let learner = Learner::new(Uuid::new_v4());
    h.gateway.script_paid("cs_replay", learner.id, course.id, 19999);

    let first = h
        .workflow
        .confirm_paid_enrollment(&learner, "cs_replay", course.id)
        .await
        .unwrap();
    let second = h
        .workflow
        .confirm_paid_enrollment(&learner, "cs_replay", course.id)
        .await
        .unwrap();

    assert!(first.is_new());
    assert!(!second.is_new());
    assert_eq!(h.store.enrollment_stats(course.id).await.unwrap().total, 1);
    assert_eq!(h.store.get_course(course.id).await.unwrap().students_enrolled, 1);
}

#[tokio::test]
async fn pending_session_is_not_completed() {
    let h = harness();
    let course = seed(&h.store, course_input("Premium", dec!(199.99))).await;
    let learner = Learner::new(Uuid::new_v4());
    h.gateway.script(
        "cs_pending",
        Err(GatewayError::NotCompleted {
            status: "pending".to_string(),
        }),
    );

    let err = h
        .workflow
        .confirm_paid_enrollment(&learner, "cs_pending", course.id)
        .await
        .unwrap_err();
    assert!(matches!(err, EnrollmentError::NotCompleted(ref s) if s == "pending"));
    assert_eq!(h.store.enrollment_stats(course.id).await.unwrap().total, 0);
    assert_eq!(h.store.get_course(course.id).await.unwrap().students_enrolled, 0);
}

#[tokio::test]
async fn unknown_or_foreign_sessions_are_invalid() {
    let h = harness();
    let course = seed(&h.store, course_input("Premium", dec!(199.99))).await;
    let learner = Learner::new(Uuid::new_v4());

    let err = h
        .workflow
        .confirm_paid_enrollment(&learner, "cs_missing", course.id)
        .await
        .unwrap_err();
    assert!(matches!(err, EnrollmentError::InvalidSession));

    // Paid by somebody else.
    h.gateway.script_paid("cs_other", Uuid::new_v4(), course.id, 19999);
    let err = h
        .workflow
        .confirm_paid_enrollment(&learner, "cs_other", course.id)
        .await
        .unwrap_err();
    assert!(matches!(err, EnrollmentError::InvalidSession));

    // Paid for another course.
    h.gateway.script_paid("cs_course", learner.id, course.id + 1, 19999);
    let err = h
        .workflow
        .confirm_paid_enrollment(&learner, "cs_course", course.id)
        .await
        .unwrap_err();
    assert!(matches!(err, EnrollmentError::InvalidSession));

    assert_eq!(h.store.enrollment_stats(course.id).await.unwrap().total, 0);
}

#[tokio::test]
async fn confirmation_is_gated_on_publication() {
    let h = harness();
    let mut input = course_input("Hidden", dec!(10.00));
    input.is_published = false;
    let course = seed(&h.store, input).await;
    let learner = Learner::new(Uuid::new_v4());
    h.gateway.script_paid("cs_hidden", learner.id, course.id, 1000);

    let err = h
        .workflow
        .confirm_paid_enrollment(&learner, "cs_hidden", course.id)
        .await
        .unwrap_err();
    assert!(matches!(err, EnrollmentError::NotFound(_)));
    assert_eq!(*h.gateway.verify_calls.lock().unwrap(), 0);
}

#[tokio::test]
async fn status_transitions_update_counter() {
    let h = harness();
    let course = seed(&h.store, course_input("Free", Decimal::ZERO)).await;
    let alice = Learner::new(Uuid::new_v4());
    let bob = Learner::new(Uuid::new_v4());
    h.workflow.enroll_free(&alice, course.id).await.unwrap();
    h.workflow.enroll_free(&bob, course.id).await.unwrap();
    assert_eq!(h.store.get_course(course.id).await.unwrap().students_enrolled, 2);

    let completed = h
        .workflow
        .complete_enrollment(alice.id, course.id)
        .await
        .unwrap();
    assert_eq!(completed.status, EnrollmentStatus::Completed);
    let completed_at = completed.completed_at.unwrap();
    assert_eq!(h.store.get_course(course.id).await.unwrap().students_enrolled, 1);

    let again = h
        .workflow
        .complete_enrollment(alice.id, course.id)
        .await
        .unwrap();
    assert_eq!(again.completed_at, Some(completed_at));

    let err = h
        .workflow
        .drop_enrollment(alice.id, course.id)
        .await
        .unwrap_err();
    assert!(matches!(err, EnrollmentError::InvalidTransition(_)));

    h.workflow.drop_enrollment(bob.id, course.id).await.unwrap();
    let stats = h.store.enrollment_stats(course.id).await.unwrap();
    assert_eq!((stats.active, stats.completed, stats.dropped), (0, 1, 1));
    assert_eq!(h.store.get_course(course.id).await.unwrap().students_enrolled, 0);

    let err = h
        .workflow
        .complete_enrollment(Uuid::new_v4(), course.id)
        .await
        .unwrap_err();
    assert!(matches!(err, EnrollmentError::NotFound(_)));
}

#[tokio::test]
async fn racing_complete_and_drop_settle_on_one_outcome() {
    let h = harness();
    let course = seed(&h.store, course_input("Free", Decimal::ZERO)).await;
    let learner = Learner::new(Uuid::new_v4());
    h.workflow.enroll_free(&learner, course.id).await.unwrap();

    let workflow = lockstep_workflow(&h.store);
    let (completed, dropped) = tokio::join!(
        workflow.complete_enrollment(learner.id, course.id),
        workflow.drop_enrollment(learner.id, course.id),
    );

    let stored = h
        .store
        .find_enrollment(learner.id, course.id)
        .await
        .unwrap()
        .unwrap();
    match (completed, dropped) {
        (Ok(done), Err(EnrollmentError::InvalidTransition(err))) => {
            assert_eq!(stored.status, EnrollmentStatus::Completed);
            assert_eq!(stored.completed_at, done.completed_at);
            assert_eq!(err.from, EnrollmentStatus::Completed);
            assert_eq!(err.to, EnrollmentStatus::Dropped);
        }
        (Err(EnrollmentError::InvalidTransition(err)), Ok(_)) => {
            assert_eq!(stored.status, EnrollmentStatus::Dropped);
            assert!(stored.completed_at.is_none());
            assert_eq!(err.from, EnrollmentStatus::Dropped);
            assert_eq!(err.to, EnrollmentStatus::Completed);
        }
        other => panic!("both transitions were applied or both failed: {:?}", other),
    }

    let stats = h.store.enrollment_stats(course.id).await.unwrap();
    assert_eq!(stats.total, 1);
    assert_eq!(stats.completed + stats.dropped, 1);
    assert_eq!(h.store.get_course(course.id).await.unwrap().students_enrolled, 0);
}

#[tokio::test]
async fn racing_completions_keep_the_first_timestamp() {
    let h = harness();
    let course = seed(&h.store, course_input("Free", Decimal::ZERO)).await;
    let learner = Learner::new(Uuid::new_v4());
    h.workflow.enroll_free(&learner, course.id).await.unwrap();

    let workflow = lockstep_workflow(&h.store);
    let (first, second) = tokio::join!(
        workflow.complete_enrollment(learner.id, course.id),
        workflow.complete_enrollment(learner.id, course.id),
    );
    let (first, second) = (first.unwrap(), second.unwrap());

    let stored = h
        .store
        .find_enrollment(learner.id, course.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.completed_at, stored.completed_at);
    assert_eq!(second.completed_at, stored.completed_at);
}

#[tokio::test]
async fn stale_status_write_is_rejected_by_the_ledger() {
    let h = harness();
    let course = seed(&h.store, course_input("Free", Decimal::ZERO)).await;
    let learner = Learner::new(Uuid::new_v4());
    h.workflow.enroll_free(&learner, course.id).await.unwrap();
    h.workflow
        .complete_enrollment(learner.id, course.id)
        .await
        .unwrap();

    let err = h
        .store
        .update_status(
            learner.id,
            course.id,
            EnrollmentStatus::Active,
            EnrollmentStatus::Dropped,
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, PortError::Conflict(_)));

    let stored = h
        .store
        .find_enrollment(learner.id, course.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, EnrollmentStatus::Completed);
    assert!(stored.completed_at.is_some());
}

#[tokio::test]
async fn repair_recomputes_from_ledger() {
    let h = harness();
    let course = seed(&h.store, course_input("Free", Decimal::ZERO)).await;
    for _ in 0..3 {
        h.workflow
            .enroll_free(&Learner::new(Uuid::new_v4()), course.id)
            .await
            .unwrap();
    }

    assert_eq!(h.workflow.repair_enrolled_count(course.id).await.unwrap(), 3);
    assert!(matches!(
        h.workflow.repair_enrolled_count(404).await,
        Err(EnrollmentError::NotFound(_))
    ));
}

#[tokio::test]
async fn payment_intent_reports_total_and_key() {
    let h = harness();
    let mut input = course_input("Discounted", dec!(50.00));
    input.discount_price = Some(dec!(25.00));
    let course = seed(&h.store, input).await;
    let learner = Learner::new(Uuid::new_v4());

    let intent = h.workflow.payment_intent(&learner, course.id).await.unwrap();
    assert_eq!(intent.total_amount, dec!(25.00));
    assert_eq!(intent.publishable_key.as_deref(), Some("pk_test_123"));

    h.gateway.script_paid("cs_1", learner.id, course.id, 2500);
    h.workflow
        .confirm_paid_enrollment(&learner, "cs_1", course.id)
        .await
        .unwrap();
    assert!(matches!(
        h.workflow.payment_intent(&learner, course.id).await,
        Err(EnrollmentError::AlreadyEnrolled(_))
    ));
    assert_eq!(h.workflow.learner_enrollments(learner.id).await.unwrap().len(), 1);
}
