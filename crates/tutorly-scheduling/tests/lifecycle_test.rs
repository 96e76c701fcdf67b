//! Integration tests for occurrence transitions and their side effects
//! (timesheets, alert resolution, balance consumption).

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, TimeZone, Utc};
use surrealdb::Surreal;
use surrealdb::engine::local::{Db, Mem};
use tutorly_core::clock::FixedClock;
use tutorly_core::error::{TutorlyError, TutorlyResult};
use tutorly_core::models::alert::AlertStatus;
use tutorly_core::models::attendee::Attendee;
use tutorly_core::models::notification::CreateNotification;
use tutorly_core::models::occurrence::{Occurrence, OccurrenceSource, OccurrenceStatus, TimeSlot};
use tutorly_core::models::student::{CreateStudent, Student};
use tutorly_core::models::template::ClassType;
use tutorly_core::models::timesheet::CreateTimesheet;
use tutorly_core::notify::NotificationSink;
use tutorly_core::repository::{
    LoggingAlertRepository, OccurrenceRepository, Store, StudentRepository, TimesheetRepository,
};
use tutorly_db::SurrealStore;
use tutorly_scheduling::{ManualOccurrence, SchedulingConfig, SchedulingEngine};
use uuid::Uuid;

#[derive(Clone, Default)]
struct RecordingSink(Arc<Mutex<Vec<CreateNotification>>>);

impl NotificationSink for RecordingSink {
    async fn create_notification(&self, input: CreateNotification) -> TutorlyResult<()> {
        self.0.lock().unwrap().push(input);
        Ok(())
    }
}

type Engine = SchedulingEngine<SurrealStore<Db>, RecordingSink>;

fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
}

async fn setup(now: DateTime<Utc>) -> (Engine, Arc<FixedClock>) {
    let db = Surreal::new::<Mem>(()).await.unwrap();
    db.use_ns("test").use_db("test").await.unwrap();
    tutorly_db::run_migrations(&db).await.unwrap();

    let clock = Arc::new(FixedClock::new(now));
    let engine = SchedulingEngine::new(
        SurrealStore::new(db),
        RecordingSink::default(),
        clock.clone(),
        SchedulingConfig::default(),
    )
    .unwrap();
    (engine, clock)
}

async fn student(engine: &Engine, remaining_sessions: i32) -> Student {
    engine
        .store()
        .students()
        .create(CreateStudent {
            name: "Ada".into(),
            group_id: None,
            remaining_sessions,
            auto_invoice: false,
            default_pack_size: 0,
            rate_cents: 4500,
            scheduled_invoice_send_at: None,
        })
        .await
        .unwrap()
}

async fn session(engine: &Engine, attendee: Attendee, start: DateTime<Utc>) -> Occurrence {
    engine
        .create_manual_occurrence(ManualOccurrence {
            tutor_id: Uuid::new_v4(),
            attendee,
            slot: TimeSlot::new(start, start + Duration::hours(1)).unwrap(),
            subject: "Maths".into(),
            class_type: ClassType::OneToOne,
            notes: None,
        })
        .await
        .unwrap()
}

#[tokio::test]
async fn completing_creates_one_timesheet_and_consumes_one_session() {
    let (engine, _clock) = setup(at(2024, 3, 3, 18)).await;
    let ada = student(&engine, 5).await;
    let occurrence = session(&engine, Attendee::Student(ada.id), at(2024, 3, 3, 16)).await;

    let completed = engine
        .transition_occurrence(occurrence.id, OccurrenceStatus::Completed)
        .await
        .unwrap();
    assert_eq!(completed.status, OccurrenceStatus::Completed);

    let timesheet = engine
        .store()
        .timesheets()
        .get_by_occurrence(occurrence.id)
        .await
        .unwrap()
        .expect("timesheet linked");
    assert_eq!(timesheet.student_id, ada.id);
    assert_eq!(timesheet.duration_minutes, 60);
    assert_eq!(timesheet.session_date, occurrence.occurrence_date);

    // Repeating the transition is accepted but has no further effect.
    engine
        .transition_occurrence(occurrence.id, OccurrenceStatus::Completed)
        .await
        .unwrap();
    let again = engine
        .store()
        .timesheets()
        .get_by_occurrence(occurrence.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(again.id, timesheet.id);

    let ada = engine.store().students().get_by_id(ada.id).await.unwrap();
    assert_eq!(ada.remaining_sessions, 4);
}

#[tokio::test]
async fn completing_group_session_logs_nothing() {
    let (engine, _clock) = setup(at(2024, 3, 3, 18)).await;
    let occurrence = session(&engine, Attendee::Group(Uuid::new_v4()), at(2024, 3, 3, 16)).await;

    engine
        .transition_occurrence(occurrence.id, OccurrenceStatus::Completed)
        .await
        .unwrap();
    assert!(
        engine
            .store()
            .timesheets()
            .get_by_occurrence(occurrence.id)
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn terminal_states_reject_other_transitions() {
    let (engine, _clock) = setup(at(2024, 3, 3, 18)).await;
    let ada = student(&engine, 5).await;
    let occurrence = session(&engine, Attendee::Student(ada.id), at(2024, 3, 3, 16)).await;

    engine
        .transition_occurrence(occurrence.id, OccurrenceStatus::Cancelled)
        .await
        .unwrap();
    let err = engine
        .transition_occurrence(occurrence.id, OccurrenceStatus::Completed)
        .await
        .unwrap_err();
    assert!(matches!(err, TutorlyError::Conflict { .. }));

    let err = engine
        .transition_occurrence(occurrence.id, OccurrenceStatus::Scheduled)
        .await
        .unwrap_err();
    assert!(matches!(err, TutorlyError::Conflict { .. }));

    let stored = engine.store().occurrences().get_by_id(occurrence.id).await.unwrap();
    assert_eq!(stored.status, OccurrenceStatus::Cancelled);
}

#[tokio::test]
async fn cancelled_and_no_show_sessions_survive_scans() {
    let (engine, clock) = setup(at(2024, 3, 3, 8)).await;
    let ada = student(&engine, 5).await;
    let cancelled = session(&engine, Attendee::Student(ada.id), at(2024, 3, 3, 16)).await;
    let no_show = session(&engine, Attendee::Student(ada.id), at(2024, 3, 3, 18)).await;

    engine
        .transition_occurrence(cancelled.id, OccurrenceStatus::Cancelled)
        .await
        .unwrap();
    engine
        .transition_occurrence(no_show.id, OccurrenceStatus::NoShow)
        .await
        .unwrap();

    clock.advance(Duration::days(3));
    engine.run_scans().await.unwrap();

    let occurrences = engine.store().occurrences();
    assert_eq!(
        occurrences.get_by_id(cancelled.id).await.unwrap().status,
        OccurrenceStatus::Cancelled
    );
    assert_eq!(
        occurrences.get_by_id(no_show.id).await.unwrap().status,
        OccurrenceStatus::NoShow
    );
    assert!(engine.list_pending_logging_alerts().await.unwrap().is_empty());
}

#[tokio::test]
async fn completing_late_resolves_the_logging_alert() {
    let (engine, clock) = setup(at(2024, 3, 3, 8)).await;
    let ada = student(&engine, 5).await;
    let occurrence = session(&engine, Attendee::Student(ada.id), at(2024, 3, 3, 16)).await;

    clock.set(at(2024, 3, 4, 17));
    let raised = engine.scan_logging_alerts().await.unwrap();
    assert_eq!(raised.len(), 1);

    engine
        .transition_occurrence(occurrence.id, OccurrenceStatus::Completed)
        .await
        .unwrap();

    let alert = engine
        .store()
        .logging_alerts()
        .get_by_occurrence(occurrence.id)
        .await
        .unwrap()
        .unwrap();
    let timesheet = engine
        .store()
        .timesheets()
        .get_by_occurrence(occurrence.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(alert.status, AlertStatus::Resolved);
    assert_eq!(alert.timesheet_id, Some(timesheet.id));
    assert_eq!(alert.resolved_at, Some(at(2024, 3, 4, 17)));
}

#[tokio::test]
async fn cancelling_late_dismisses_the_logging_alert() {
    let (engine, clock) = setup(at(2024, 3, 3, 8)).await;
    let occurrence = session(&engine, Attendee::Group(Uuid::new_v4()), at(2024, 3, 3, 16)).await;

    clock.set(at(2024, 3, 4, 17));
    engine.scan_logging_alerts().await.unwrap();
    engine
        .transition_occurrence(occurrence.id, OccurrenceStatus::NoShow)
        .await
        .unwrap();

    let alert = engine
        .store()
        .logging_alerts()
        .get_by_occurrence(occurrence.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(alert.status, AlertStatus::Dismissed);
    let dismissal = alert.dismissal.unwrap();
    assert_eq!(dismissal.dismissed_by, None);
    assert!(!dismissal.reason.is_empty());
}

#[tokio::test]
async fn reschedule_keeps_the_first_original_date() {
    let (engine, _clock) = setup(at(2024, 3, 1, 8)).await;
    let occurrence = session(&engine, Attendee::Student(Uuid::new_v4()), at(2024, 3, 3, 16)).await;
    assert_eq!(occurrence.source, OccurrenceSource::Manual);

    let first = TimeSlot::new(at(2024, 3, 10, 16), at(2024, 3, 10, 17)).unwrap();
    let moved = engine.reschedule_occurrence(occurrence.id, first).await.unwrap();
    assert_eq!(moved.start_at, at(2024, 3, 10, 16));
    assert_eq!(moved.source, OccurrenceSource::Rescheduled);
    assert_eq!(moved.original_date, Some(at(2024, 3, 3, 16)));
    assert_eq!(moved.occurrence_date, at(2024, 3, 10, 0).date_naive());

    let second = TimeSlot::new(at(2024, 3, 12, 9), at(2024, 3, 12, 10)).unwrap();
    let moved = engine.reschedule_occurrence(occurrence.id, second).await.unwrap();
    assert_eq!(moved.start_at, at(2024, 3, 12, 9));
    assert_eq!(moved.original_date, Some(at(2024, 3, 3, 16)));
    assert_eq!(moved.status, OccurrenceStatus::Scheduled);
}

#[tokio::test]
async fn only_scheduled_sessions_can_be_rescheduled() {
    let (engine, _clock) = setup(at(2024, 3, 1, 8)).await;
    let occurrence = session(&engine, Attendee::Student(Uuid::new_v4()), at(2024, 3, 3, 16)).await;
    engine
        .transition_occurrence(occurrence.id, OccurrenceStatus::Cancelled)
        .await
        .unwrap();

    let slot = TimeSlot::new(at(2024, 3, 10, 16), at(2024, 3, 10, 17)).unwrap();
    let err = engine.reschedule_occurrence(occurrence.id, slot).await.unwrap_err();
    assert!(matches!(err, TutorlyError::Conflict { .. }));
}

#[tokio::test]
async fn only_linked_parents_may_flag() {
    let (engine, _clock) = setup(at(2024, 3, 1, 8)).await;
    let ada = student(&engine, 5).await;
    let parent_id = Uuid::new_v4();
    engine.store().students().link_parent(parent_id, ada.id).await.unwrap();
    let occurrence = session(&engine, Attendee::Student(ada.id), at(2024, 3, 3, 16)).await;

    let err = engine
        .flag_occurrence(occurrence.id, Uuid::new_v4(), "wrong room".into())
        .await
        .unwrap_err();
    assert!(matches!(err, TutorlyError::AuthorizationDenied { .. }));

    let err = engine
        .flag_occurrence(occurrence.id, parent_id, "  ".into())
        .await
        .unwrap_err();
    assert!(matches!(err, TutorlyError::Validation { .. }));

    let flagged = engine
        .flag_occurrence(occurrence.id, parent_id, "wrong room".into())
        .await
        .unwrap();
    let flag = flagged.parent_flag.unwrap();
    assert_eq!(flag.parent_id, parent_id);
    assert_eq!(flag.comment, "wrong room");
    assert_eq!(flag.flagged_at, at(2024, 3, 1, 8));
}

#[tokio::test]
async fn parents_of_group_members_own_group_sessions() {
    let (engine, _clock) = setup(at(2024, 3, 1, 8)).await;
    let group_id = Uuid::new_v4();
    let member = engine
        .store()
        .students()
        .create(CreateStudent {
            name: "Grace".into(),
            group_id: Some(group_id),
            remaining_sessions: 3,
            auto_invoice: false,
            default_pack_size: 0,
            rate_cents: 3000,
            scheduled_invoice_send_at: None,
        })
        .await
        .unwrap();
    let parent_id = Uuid::new_v4();
    engine.store().students().link_parent(parent_id, member.id).await.unwrap();
    let occurrence = session(&engine, Attendee::Group(group_id), at(2024, 3, 3, 16)).await;

    let flagged = engine
        .flag_occurrence(occurrence.id, parent_id, "running late".into())
        .await
        .unwrap();
    assert!(flagged.parent_flag.is_some());
}

#[tokio::test]
async fn manual_timesheet_resolves_alert_and_consumes_balance() {
    let (engine, clock) = setup(at(2024, 3, 3, 8)).await;
    let ada = student(&engine, 1).await;
    let occurrence = session(&engine, Attendee::Student(ada.id), at(2024, 3, 3, 16)).await;

    clock.set(at(2024, 3, 5, 9));
    engine.scan_logging_alerts().await.unwrap();

    let timesheet = engine
        .log_timesheet(CreateTimesheet {
            occurrence_id: Some(occurrence.id),
            tutor_id: occurrence.tutor_id,
            student_id: ada.id,
            session_date: occurrence.occurrence_date,
            start_at: occurrence.start_at,
            end_at: occurrence.end_at,
            duration_minutes: 60,
            subject: "Maths".into(),
        })
        .await
        .unwrap();

    let alert = engine
        .store()
        .logging_alerts()
        .get_by_occurrence(occurrence.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(alert.status, AlertStatus::Resolved);
    assert_eq!(alert.timesheet_id, Some(timesheet.id));

    let ada = engine.store().students().get_by_id(ada.id).await.unwrap();
    assert_eq!(ada.remaining_sessions, 0);

    // Completing afterwards does not log or consume a second time.
    engine
        .transition_occurrence(occurrence.id, OccurrenceStatus::Completed)
        .await
        .unwrap();
    let ada = engine.store().students().get_by_id(ada.id).await.unwrap();
    assert_eq!(ada.remaining_sessions, 0);
}

#[tokio::test]
async fn manual_session_needs_a_positive_slot() {
    let (engine, _clock) = setup(at(2024, 3, 1, 8)).await;
    let start = at(2024, 3, 3, 16);
    let inverted: TimeSlot = serde_json::from_value(serde_json::json!({
        "start": start,
        "end": start - Duration::hours(1),
    }))
    .unwrap();

    let err = engine
        .create_manual_occurrence(ManualOccurrence {
            tutor_id: Uuid::new_v4(),
            attendee: Attendee::Student(Uuid::new_v4()),
            slot: inverted,
            subject: "Maths".into(),
            class_type: ClassType::OneToOne,
            notes: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, TutorlyError::Validation { .. }));
}
