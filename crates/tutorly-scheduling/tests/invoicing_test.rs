//! Integration tests for balance tracking and automatic invoicing.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use surrealdb::Surreal;
use surrealdb::engine::local::{Db, Mem};
use tutorly_core::clock::FixedClock;
use tutorly_core::error::{TutorlyError, TutorlyResult};
use tutorly_core::models::attendee::Attendee;
use tutorly_core::models::invoice::InvoiceStatus;
use tutorly_core::models::notification::{CreateNotification, NotificationKind, Recipient};
use tutorly_core::models::occurrence::{OccurrenceStatus, TimeSlot};
use tutorly_core::models::student::{CreateStudent, Student};
use tutorly_core::models::template::ClassType;
use tutorly_core::notify::NotificationSink;
use tutorly_core::repository::{Store, StudentRepository};
use tutorly_db::SurrealStore;
use tutorly_scheduling::{ManualOccurrence, SchedulingConfig, SchedulingEngine};
use uuid::Uuid;

#[derive(Clone, Default)]
struct RecordingSink(Arc<Mutex<Vec<CreateNotification>>>);

impl RecordingSink {
    fn sent(&self) -> Vec<CreateNotification> {
        self.0.lock().unwrap().clone()
    }
}

impl NotificationSink for RecordingSink {
    async fn create_notification(&self, input: CreateNotification) -> TutorlyResult<()> {
        self.0.lock().unwrap().push(input);
        Ok(())
    }
}

/// A sink whose delivery backend is down.
#[derive(Clone, Default)]
struct FailingSink;

impl NotificationSink for FailingSink {
    async fn create_notification(&self, _input: CreateNotification) -> TutorlyResult<()> {
        Err(TutorlyError::Notification("backend unavailable".into()))
    }
}

type Engine = SchedulingEngine<SurrealStore<Db>, RecordingSink>;

fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
}

async fn memory_store() -> SurrealStore<Db> {
    let db = Surreal::new::<Mem>(()).await.unwrap();
    db.use_ns("test").use_db("test").await.unwrap();
    tutorly_db::run_migrations(&db).await.unwrap();
    SurrealStore::new(db)
}

async fn setup(now: DateTime<Utc>) -> (Engine, Arc<FixedClock>, RecordingSink) {
    let sink = RecordingSink::default();
    let clock = Arc::new(FixedClock::new(now));
    let engine = SchedulingEngine::new(
        memory_store().await,
        sink.clone(),
        clock.clone(),
        SchedulingConfig::default(),
    )
    .unwrap();
    (engine, clock, sink)
}

fn billing_profile(remaining_sessions: i32) -> CreateStudent {
    CreateStudent {
        name: "Alan".into(),
        group_id: None,
        remaining_sessions,
        auto_invoice: true,
        default_pack_size: 4,
        rate_cents: 5000,
        scheduled_invoice_send_at: None,
    }
}

async fn student_with_parent<S: Store>(store: &S, input: CreateStudent) -> (Student, Uuid) {
    let student = store.students().create(input).await.unwrap();
    let parent_id = Uuid::new_v4();
    store.students().link_parent(parent_id, student.id).await.unwrap();
    (student, parent_id)
}

#[tokio::test]
async fn depletion_by_edit_invoices_exactly_once() {
    let (engine, _clock, sink) = setup(at(2024, 3, 1, 9)).await;
    let (student, parent_id) = student_with_parent(engine.store(), billing_profile(2)).await;

    let update = engine.set_remaining_sessions(student.id, 0).await.unwrap();
    assert_eq!(update.change.previous, 2);
    assert_eq!(update.change.current, 0);
    let invoice = update.invoice.expect("depletion invoices");
    assert_eq!(invoice.session_count, 4);
    assert_eq!(invoice.rate_cents, 5000);
    assert_eq!(invoice.amount_cents, 20_000);
    assert_eq!(invoice.status, InvoiceStatus::Sent);
    assert_eq!(invoice.sent_at, Some(at(2024, 3, 1, 9)));
    assert_eq!(invoice.due_date, NaiveDate::from_ymd_opt(2024, 3, 6).unwrap());
    assert_eq!(invoice.parent_id, Some(parent_id));
    assert!(invoice.auto_generated);

    let again = engine.set_remaining_sessions(student.id, 0).await.unwrap();
    assert!(again.invoice.is_none());
    assert_eq!(engine.list_invoices(student.id).await.unwrap().len(), 1);

    let issued: Vec<_> = sink
        .sent()
        .into_iter()
        .filter(|n| n.kind == NotificationKind::InvoiceIssued)
        .collect();
    assert_eq!(issued.len(), 1);
    assert_eq!(issued[0].recipient, Recipient::Parent(parent_id));
}

#[tokio::test]
async fn topping_up_and_depleting_again_invoices_again() {
    let (engine, _clock, _sink) = setup(at(2024, 3, 1, 9)).await;
    let (student, _parent_id) = student_with_parent(engine.store(), billing_profile(1)).await;

    assert!(engine.consume_session(student.id).await.unwrap().invoice.is_some());
    // Logging past zero is not a new crossing.
    let below = engine.consume_session(student.id).await.unwrap();
    assert_eq!(below.student.remaining_sessions, -1);
    assert!(below.invoice.is_none());

    engine.set_remaining_sessions(student.id, 4).await.unwrap();
    assert!(engine.set_remaining_sessions(student.id, 0).await.unwrap().invoice.is_some());
    assert_eq!(engine.list_invoices(student.id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn concurrent_session_logs_each_deduct_once() {
    let (engine, _clock, _sink) = setup(at(2024, 3, 1, 9)).await;
    let (student, _) = student_with_parent(engine.store(), billing_profile(1)).await;

    let (a, b) = tokio::join!(
        engine.consume_session(student.id),
        engine.consume_session(student.id),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    let mut changes = vec![
        (a.change.previous, a.change.current),
        (b.change.previous, b.change.current),
    ];
    changes.sort_unstable();
    assert_eq!(changes, vec![(0, -1), (1, 0)]);
    assert_eq!(a.invoice.is_some() as u8 + b.invoice.is_some() as u8, 1);

    let stored = engine.store().students().get_by_id(student.id).await.unwrap();
    assert_eq!(stored.remaining_sessions, -1);
    assert_eq!(engine.list_invoices(student.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn auto_invoicing_needs_opt_in_and_a_pack_size() {
    let (engine, _clock, _sink) = setup(at(2024, 3, 1, 9)).await;

    let mut disabled = billing_profile(1);
    disabled.auto_invoice = false;
    let (off, _) = student_with_parent(engine.store(), disabled).await;
    assert!(engine.set_remaining_sessions(off.id, 0).await.unwrap().invoice.is_none());

    let mut no_pack = billing_profile(1);
    no_pack.default_pack_size = 0;
    let (empty, _) = student_with_parent(engine.store(), no_pack).await;
    let update = engine.set_remaining_sessions(empty.id, 0).await.unwrap();
    assert!(update.invoice.is_none());
    assert_eq!(update.student.remaining_sessions, 0);
}

#[tokio::test]
async fn future_send_date_holds_the_invoice() {
    let (engine, clock, sink) = setup(at(2024, 3, 1, 9)).await;
    let mut profile = billing_profile(1);
    profile.scheduled_invoice_send_at = Some(at(2024, 3, 10, 8));
    let (student, parent_id) = student_with_parent(engine.store(), profile).await;

    let invoice = engine
        .set_remaining_sessions(student.id, 0)
        .await
        .unwrap()
        .invoice
        .unwrap();
    assert_eq!(invoice.status, InvoiceStatus::Scheduled);
    assert_eq!(invoice.send_at, at(2024, 3, 10, 8));
    assert_eq!(invoice.sent_at, None);
    assert_eq!(invoice.due_date, NaiveDate::from_ymd_opt(2024, 3, 15).unwrap());
    assert!(sink.sent().is_empty());

    clock.set(at(2024, 3, 10, 9));
    engine.scan_invoice_alerts().await.unwrap();
    let invoices = engine.list_invoices(student.id).await.unwrap();
    assert_eq!(invoices[0].status, InvoiceStatus::Sent);
    let sent = sink.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].recipient, Recipient::Parent(parent_id));
    assert_eq!(sent[0].kind, NotificationKind::InvoiceIssued);
}

#[tokio::test]
async fn past_send_date_sends_immediately() {
    let (engine, _clock, _sink) = setup(at(2024, 3, 1, 9)).await;
    let mut profile = billing_profile(1);
    profile.scheduled_invoice_send_at = Some(at(2024, 2, 1, 8));
    let (student, _) = student_with_parent(engine.store(), profile).await;

    let invoice = engine
        .set_remaining_sessions(student.id, 0)
        .await
        .unwrap()
        .invoice
        .unwrap();
    assert_eq!(invoice.status, InvoiceStatus::Sent);
    assert_eq!(invoice.send_at, at(2024, 3, 1, 9));
}

#[tokio::test]
async fn completing_the_last_prepaid_session_invoices() {
    let (engine, _clock, _sink) = setup(at(2024, 3, 3, 18)).await;
    let (student, _) = student_with_parent(engine.store(), billing_profile(1)).await;
    let occurrence = engine
        .create_manual_occurrence(ManualOccurrence {
            tutor_id: Uuid::new_v4(),
            attendee: Attendee::Student(student.id),
            slot: TimeSlot::new(at(2024, 3, 3, 16), at(2024, 3, 3, 16) + Duration::minutes(45))
                .unwrap(),
            subject: "Maths".into(),
            class_type: ClassType::OneToOne,
            notes: None,
        })
        .await
        .unwrap();

    engine
        .transition_occurrence(occurrence.id, OccurrenceStatus::Completed)
        .await
        .unwrap();

    let invoices = engine.list_invoices(student.id).await.unwrap();
    assert_eq!(invoices.len(), 1);
    assert_eq!(invoices[0].session_count, 4);
    let student = engine.store().students().get_by_id(student.id).await.unwrap();
    assert_eq!(student.remaining_sessions, 0);
}

#[tokio::test]
async fn notification_failures_never_fail_the_balance_update() {
    let clock = Arc::new(FixedClock::new(at(2024, 3, 1, 9)));
    let engine = SchedulingEngine::new(
        memory_store().await,
        FailingSink,
        clock,
        SchedulingConfig::default(),
    )
    .unwrap();
    let (student, _) = student_with_parent(engine.store(), billing_profile(1)).await;

    let update = engine.set_remaining_sessions(student.id, 0).await.unwrap();
    assert_eq!(update.student.remaining_sessions, 0);
    assert!(update.invoice.is_some());
}

#[tokio::test]
async fn paying_twice_keeps_the_first_payment() {
    let (engine, clock, _sink) = setup(at(2024, 3, 1, 9)).await;
    let (student, _) = student_with_parent(engine.store(), billing_profile(1)).await;
    let invoice = engine
        .set_remaining_sessions(student.id, 0)
        .await
        .unwrap()
        .invoice
        .unwrap();

    clock.set(at(2024, 3, 2, 9));
    let paid = engine.mark_invoice_paid(invoice.id).await.unwrap();
    assert_eq!(paid.status, InvoiceStatus::Paid);
    assert_eq!(paid.paid_at, Some(at(2024, 3, 2, 9)));

    clock.set(at(2024, 3, 3, 9));
    let again = engine.mark_invoice_paid(invoice.id).await.unwrap();
    assert_eq!(again.paid_at, Some(at(2024, 3, 2, 9)));

    let err = engine.mark_invoice_paid(Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, TutorlyError::NotFound { .. }));
}

#[tokio::test]
async fn invalid_configuration_is_rejected() {
    let config = SchedulingConfig {
        default_horizon_days: 400,
        max_horizon_days: 366,
        ..Default::default()
    };
    let result = SchedulingEngine::new(
        memory_store().await,
        RecordingSink::default(),
        Arc::new(FixedClock::new(at(2024, 3, 1, 9))),
        config,
    );
    assert!(matches!(result, Err(TutorlyError::Validation { .. })));
}
