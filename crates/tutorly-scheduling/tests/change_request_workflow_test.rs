//! Integration tests for the change request workflow.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use surrealdb::Surreal;
use surrealdb::engine::local::{Db, Mem};
use tutorly_core::clock::FixedClock;
use tutorly_core::error::{TutorlyError, TutorlyResult};
use tutorly_core::models::attendee::Attendee;
use tutorly_core::models::audit::AuditOutcome;
use tutorly_core::models::change_request::{
    ChangeProposal, ChangeRequestStatus, Decision, Requester, Resolution,
};
use tutorly_core::models::notification::{CreateNotification, NotificationKind, Recipient};
use tutorly_core::models::occurrence::{
    CreateOccurrence, Occurrence, OccurrenceSource, OccurrenceStatus, TimeSlot, UpdateOccurrence,
};
use tutorly_core::models::student::CreateStudent;
use tutorly_core::models::template::ClassType;
use tutorly_core::notify::NotificationSink;
use tutorly_core::repository::{
    AuditLogFilter, AuditLogRepository, OccurrenceRepository, Pagination, Store, StudentRepository,
};
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

struct Fixture<S: Store = SurrealStore<Db>> {
    engine: SchedulingEngine<S, RecordingSink>,
    sink: RecordingSink,
    occurrence: Occurrence,
    parent_id: Uuid,
    tutor_id: Uuid,
    admin_id: Uuid,
}

fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
}

/// One student with a linked parent and a scheduled session on
/// 2024-03-03 16:00–17:00 UTC.
async fn setup() -> Fixture {
    setup_on(SurrealStore::new).await
}

async fn setup_on<S: Store>(make_store: impl FnOnce(Surreal<Db>) -> S) -> Fixture<S> {
    let db = Surreal::new::<Mem>(()).await.unwrap();
    db.use_ns("test").use_db("test").await.unwrap();
    tutorly_db::run_migrations(&db).await.unwrap();

    let sink = RecordingSink::default();
    let clock = Arc::new(FixedClock::new(at(2024, 3, 1, 9)));
    let engine = SchedulingEngine::new(
        make_store(db),
        sink.clone(),
        clock,
        SchedulingConfig::default(),
    )
    .unwrap();

    let student = engine
        .store()
        .students()
        .create(CreateStudent {
            name: "Ada".into(),
            group_id: None,
            remaining_sessions: 4,
            auto_invoice: false,
            default_pack_size: 0,
            rate_cents: 4500,
            scheduled_invoice_send_at: None,
        })
        .await
        .unwrap();
    let parent_id = Uuid::new_v4();
    engine.store().students().link_parent(parent_id, student.id).await.unwrap();

    let tutor_id = Uuid::new_v4();
    let occurrence = engine
        .create_manual_occurrence(ManualOccurrence {
            tutor_id,
            attendee: Attendee::Student(student.id),
            slot: TimeSlot::new(at(2024, 3, 3, 16), at(2024, 3, 3, 17)).unwrap(),
            subject: "Chemistry".into(),
            class_type: ClassType::OneToOne,
            notes: None,
        })
        .await
        .unwrap();

    Fixture {
        engine,
        sink,
        occurrence,
        parent_id,
        tutor_id,
        admin_id: Uuid::new_v4(),
    }
}

#[tokio::test]
async fn approving_a_cancel_cancels_the_session() {
    let f = setup().await;
    let request = f
        .engine
        .submit_change_request(
            f.occurrence.id,
            Requester::Parent(f.parent_id),
            ChangeProposal::cancel(Some("sick".into())),
        )
        .await
        .unwrap();
    assert_eq!(request.status, ChangeRequestStatus::Pending);
    assert_eq!(request.original_date, at(2024, 3, 3, 16));

    let resolved = f
        .engine
        .resolve_change_request(request.id, Decision::approve(), f.admin_id, Some("ok".into()))
        .await
        .unwrap();
    assert_eq!(resolved.status, ChangeRequestStatus::Resolved(Resolution::Approved));
    assert_eq!(resolved.processed_by, Some(f.admin_id));
    assert_eq!(resolved.admin_notes.as_deref(), Some("ok"));

    let occurrence = f.engine.store().occurrences().get_by_id(f.occurrence.id).await.unwrap();
    assert_eq!(occurrence.status, OccurrenceStatus::Cancelled);

    let sent = f.sink.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].recipient, Recipient::Parent(f.parent_id));
    assert_eq!(sent[0].kind, NotificationKind::ChangeRequestApproved);
    assert_eq!(sent[1].recipient, Recipient::Tutor(f.tutor_id));
    assert_eq!(sent[1].kind, NotificationKind::SessionChangedByParentRequest);

    let audit = f
        .engine
        .store()
        .audit()
        .list(
            AuditLogFilter {
                action: Some("change_request.approve".into()),
                ..Default::default()
            },
            Pagination::default(),
        )
        .await
        .unwrap();
    assert_eq!(audit.total, 1);
    assert_eq!(audit.items[0].actor_id, Some(f.admin_id));
    assert_eq!(audit.items[0].metadata["requester_type"], "parent");
    assert_eq!(audit.items[0].metadata["admin_notes"], "ok");
}

#[tokio::test]
async fn rejecting_leaves_the_session_untouched() {
    let f = setup().await;
    let request = f
        .engine
        .submit_change_request(
            f.occurrence.id,
            Requester::Parent(f.parent_id),
            ChangeProposal::cancel(None),
        )
        .await
        .unwrap();

    let resolved = f
        .engine
        .resolve_change_request(
            request.id,
            Decision::Reject,
            f.admin_id,
            Some("too late to cancel".into()),
        )
        .await
        .unwrap();
    assert_eq!(resolved.status, ChangeRequestStatus::Resolved(Resolution::Rejected));

    let occurrence = f.engine.store().occurrences().get_by_id(f.occurrence.id).await.unwrap();
    assert_eq!(occurrence.status, OccurrenceStatus::Scheduled);
    assert_eq!(occurrence.start_at, f.occurrence.start_at);

    let sent = f.sink.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].recipient, Recipient::Parent(f.parent_id));
    assert_eq!(sent[0].kind, NotificationKind::ChangeRequestRejected);
    assert_eq!(sent[0].payload["admin_notes"], "too late to cancel");
}

#[tokio::test]
async fn approving_a_reschedule_moves_the_session() {
    let f = setup().await;
    let slot = TimeSlot::new(at(2024, 3, 10, 16), at(2024, 3, 10, 17)).unwrap();
    let request = f
        .engine
        .submit_change_request(
            f.occurrence.id,
            Requester::Parent(f.parent_id),
            ChangeProposal::reschedule_to(slot, None),
        )
        .await
        .unwrap();

    f.engine
        .resolve_change_request(request.id, Decision::approve(), f.admin_id, None)
        .await
        .unwrap();

    let occurrence = f.engine.store().occurrences().get_by_id(f.occurrence.id).await.unwrap();
    assert_eq!(occurrence.start_at, at(2024, 3, 10, 16));
    assert_eq!(occurrence.end_at, at(2024, 3, 10, 17));
    assert_eq!(occurrence.source, OccurrenceSource::Rescheduled);
    assert_eq!(occurrence.original_date, Some(at(2024, 3, 3, 16)));
    assert_eq!(occurrence.status, OccurrenceStatus::Scheduled);
}

#[tokio::test]
async fn message_only_reschedule_needs_an_override_slot() {
    let f = setup().await;
    let request = f
        .engine
        .submit_change_request(
            f.occurrence.id,
            Requester::Tutor(f.tutor_id),
            ChangeProposal::reschedule_with_message("any evening next week", None),
        )
        .await
        .unwrap();

    let err = f
        .engine
        .resolve_change_request(request.id, Decision::approve(), f.admin_id, None)
        .await
        .unwrap_err();
    assert!(matches!(err, TutorlyError::Validation { .. }));
    let still_open = f.engine.get_change_request(request.id).await.unwrap();
    assert_eq!(still_open.status, ChangeRequestStatus::Pending);

    let override_slot = TimeSlot::new(at(2024, 3, 6, 18), at(2024, 3, 6, 19)).unwrap();
    f.engine
        .resolve_change_request(
            request.id,
            Decision::Approve {
                override_slot: Some(override_slot),
            },
            f.admin_id,
            None,
        )
        .await
        .unwrap();

    let occurrence = f.engine.store().occurrences().get_by_id(f.occurrence.id).await.unwrap();
    assert_eq!(occurrence.start_at, at(2024, 3, 6, 18));

    // Tutor-originated approvals notify only the tutor.
    let sent = f.sink.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].recipient, Recipient::Tutor(f.tutor_id));
    assert_eq!(sent[0].kind, NotificationKind::ChangeRequestApproved);
}

#[tokio::test]
async fn a_request_is_decided_only_once() {
    let f = setup().await;
    let request = f
        .engine
        .submit_change_request(
            f.occurrence.id,
            Requester::Parent(f.parent_id),
            ChangeProposal::cancel(None),
        )
        .await
        .unwrap();
    f.engine
        .resolve_change_request(request.id, Decision::Reject, f.admin_id, None)
        .await
        .unwrap();

    let err = f
        .engine
        .resolve_change_request(request.id, Decision::approve(), f.admin_id, None)
        .await
        .unwrap_err();
    assert!(matches!(err, TutorlyError::Conflict { .. }));

    let occurrence = f.engine.store().occurrences().get_by_id(f.occurrence.id).await.unwrap();
    assert_eq!(occurrence.status, OccurrenceStatus::Scheduled);
}

#[tokio::test]
async fn deleted_session_makes_resolution_a_conflict() {
    let f = setup().await;
    let request = f
        .engine
        .submit_change_request(
            f.occurrence.id,
            Requester::Parent(f.parent_id),
            ChangeProposal::cancel(None),
        )
        .await
        .unwrap();
    f.engine.store().occurrences().delete(f.occurrence.id).await.unwrap();

    let err = f
        .engine
        .resolve_change_request(request.id, Decision::approve(), f.admin_id, None)
        .await
        .unwrap_err();
    assert!(matches!(err, TutorlyError::Conflict { .. }));
    let request = f.engine.get_change_request(request.id).await.unwrap();
    assert!(request.status.is_open());
}

#[tokio::test]
async fn approving_a_cancel_on_a_closed_session_is_a_conflict() {
    let f = setup().await;
    let request = f
        .engine
        .submit_change_request(
            f.occurrence.id,
            Requester::Parent(f.parent_id),
            ChangeProposal::cancel(None),
        )
        .await
        .unwrap();
    f.engine
        .transition_occurrence(f.occurrence.id, OccurrenceStatus::Cancelled)
        .await
        .unwrap();

    let err = f
        .engine
        .resolve_change_request(request.id, Decision::approve(), f.admin_id, None)
        .await
        .unwrap_err();
    assert!(matches!(err, TutorlyError::Conflict { .. }));
    let request = f.engine.get_change_request(request.id).await.unwrap();
    assert_eq!(request.status, ChangeRequestStatus::Pending);

    // Rejecting still closes it out.
    let resolved = f
        .engine
        .resolve_change_request(request.id, Decision::Reject, f.admin_id, None)
        .await
        .unwrap();
    assert_eq!(resolved.status, ChangeRequestStatus::Resolved(Resolution::Rejected));
}

type Inner = SurrealStore<Db>;

/// Occurrence repository that deletes the row right before the next
/// update once armed, as if an admin removed it concurrently.
struct VanishingOccurrences {
    inner: Inner,
    armed: AtomicBool,
}

impl OccurrenceRepository for VanishingOccurrences {
    async fn create(&self, input: CreateOccurrence) -> TutorlyResult<Occurrence> {
        self.inner.occurrences().create(input).await
    }

    async fn create_batch(&self, inputs: Vec<CreateOccurrence>) -> TutorlyResult<Vec<Occurrence>> {
        self.inner.occurrences().create_batch(inputs).await
    }

    async fn get_by_id(&self, id: Uuid) -> TutorlyResult<Occurrence> {
        self.inner.occurrences().get_by_id(id).await
    }

    async fn update(&self, id: Uuid, input: UpdateOccurrence) -> TutorlyResult<Occurrence> {
        if self.armed.swap(false, Ordering::SeqCst) {
            self.inner.occurrences().delete(id).await?;
        }
        self.inner.occurrences().update(id, input).await
    }

    async fn delete(&self, id: Uuid) -> TutorlyResult<()> {
        self.inner.occurrences().delete(id).await
    }

    async fn list_template_dates(&self, template_id: Uuid) -> TutorlyResult<Vec<NaiveDate>> {
        self.inner.occurrences().list_template_dates(template_id).await
    }

    async fn delete_future_generated(
        &self,
        template_id: Uuid,
        after: DateTime<Utc>,
    ) -> TutorlyResult<u64> {
        self.inner
            .occurrences()
            .delete_future_generated(template_id, after)
            .await
    }

    async fn list_ended_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> TutorlyResult<Vec<Occurrence>> {
        self.inner.occurrences().list_ended_between(from, to).await
    }

    async fn list_by_template(&self, template_id: Uuid) -> TutorlyResult<Vec<Occurrence>> {
        self.inner.occurrences().list_by_template(template_id).await
    }
}

struct VanishingStore {
    inner: Inner,
    occurrences: VanishingOccurrences,
}

impl VanishingStore {
    fn new(db: Surreal<Db>) -> Self {
        let inner = SurrealStore::new(db);
        Self {
            occurrences: VanishingOccurrences {
                inner: inner.clone(),
                armed: AtomicBool::new(false),
            },
            inner,
        }
    }

    fn arm(&self) {
        self.occurrences.armed.store(true, Ordering::SeqCst);
    }
}

impl Store for VanishingStore {
    type Templates = <Inner as Store>::Templates;
    type Occurrences = VanishingOccurrences;
    type ChangeRequests = <Inner as Store>::ChangeRequests;
    type Timesheets = <Inner as Store>::Timesheets;
    type LoggingAlerts = <Inner as Store>::LoggingAlerts;
    type InvoiceAlerts = <Inner as Store>::InvoiceAlerts;
    type Students = <Inner as Store>::Students;
    type Invoices = <Inner as Store>::Invoices;
    type Audit = <Inner as Store>::Audit;
    type Watermarks = <Inner as Store>::Watermarks;

    fn templates(&self) -> &Self::Templates {
        self.inner.templates()
    }
    fn occurrences(&self) -> &Self::Occurrences {
        &self.occurrences
    }
    fn change_requests(&self) -> &Self::ChangeRequests {
        self.inner.change_requests()
    }
    fn timesheets(&self) -> &Self::Timesheets {
        self.inner.timesheets()
    }
    fn logging_alerts(&self) -> &Self::LoggingAlerts {
        self.inner.logging_alerts()
    }
    fn invoice_alerts(&self) -> &Self::InvoiceAlerts {
        self.inner.invoice_alerts()
    }
    fn students(&self) -> &Self::Students {
        self.inner.students()
    }
    fn invoices(&self) -> &Self::Invoices {
        self.inner.invoices()
    }
    fn audit(&self) -> &Self::Audit {
        self.inner.audit()
    }
    fn watermarks(&self) -> &Self::Watermarks {
        self.inner.watermarks()
    }
}

#[tokio::test]
async fn failed_occurrence_change_reopens_the_request() {
    let f = setup_on(VanishingStore::new).await;
    let request = f
        .engine
        .submit_change_request(
            f.occurrence.id,
            Requester::Parent(f.parent_id),
            ChangeProposal::cancel(None),
        )
        .await
        .unwrap();
    let notified = f.sink.sent().len();

    f.engine.store().arm();
    let err = f
        .engine
        .resolve_change_request(request.id, Decision::approve(), f.admin_id, Some("ok".into()))
        .await
        .unwrap_err();
    assert!(matches!(err, TutorlyError::Conflict { .. }));

    let reopened = f.engine.get_change_request(request.id).await.unwrap();
    assert_eq!(reopened.status, ChangeRequestStatus::Pending);
    assert!(reopened.processed_by.is_none());
    assert!(reopened.processed_at.is_none());
    assert!(reopened.admin_notes.is_none());
    assert_eq!(f.sink.sent().len(), notified);

    // A retry hits the missing session and leaves the request open.
    let err = f
        .engine
        .resolve_change_request(request.id, Decision::approve(), f.admin_id, None)
        .await
        .unwrap_err();
    assert!(matches!(err, TutorlyError::Conflict { .. }));
    assert!(
        f.engine
            .get_change_request(request.id)
            .await
            .unwrap()
            .status
            .is_open()
    );
}

#[tokio::test]
async fn strangers_cannot_file_requests() {
    let f = setup().await;
    let stranger = Uuid::new_v4();

    let err = f
        .engine
        .submit_change_request(
            f.occurrence.id,
            Requester::Parent(stranger),
            ChangeProposal::cancel(None),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, TutorlyError::AuthorizationDenied { .. }));

    let err = f
        .engine
        .submit_change_request(
            f.occurrence.id,
            Requester::Tutor(stranger),
            ChangeProposal::cancel(None),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, TutorlyError::AuthorizationDenied { .. }));

    let denied = f
        .engine
        .store()
        .audit()
        .list(
            AuditLogFilter {
                actor_id: Some(stranger),
                ..Default::default()
            },
            Pagination::default(),
        )
        .await
        .unwrap();
    assert_eq!(denied.total, 2);
    assert!(denied.items.iter().all(|e| e.outcome == AuditOutcome::Denied));
}

#[tokio::test]
async fn one_open_request_per_session() {
    let f = setup().await;
    let first = f
        .engine
        .submit_change_request(
            f.occurrence.id,
            Requester::Parent(f.parent_id),
            ChangeProposal::cancel(None),
        )
        .await
        .unwrap();

    let err = f
        .engine
        .submit_change_request(
            f.occurrence.id,
            Requester::Tutor(f.tutor_id),
            ChangeProposal::cancel(None),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, TutorlyError::Conflict { .. }));

    // Once the first is decided a new one may be filed.
    f.engine
        .resolve_change_request(first.id, Decision::Reject, f.admin_id, None)
        .await
        .unwrap();
    f.engine
        .submit_change_request(
            f.occurrence.id,
            Requester::Tutor(f.tutor_id),
            ChangeProposal::cancel(None),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn invalid_proposals_are_rejected_before_persisting() {
    let f = setup().await;
    let err = f
        .engine
        .submit_change_request(
            f.occurrence.id,
            Requester::Parent(f.parent_id),
            ChangeProposal::reschedule_with_message("   ", None),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, TutorlyError::Validation { .. }));

    let open = f
        .engine
        .list_open_change_requests(Pagination::default())
        .await
        .unwrap();
    assert_eq!(open.total, 0);
}

#[tokio::test]
async fn requests_on_closed_sessions_are_refused() {
    let f = setup().await;
    f.engine
        .transition_occurrence(f.occurrence.id, OccurrenceStatus::Cancelled)
        .await
        .unwrap();

    let err = f
        .engine
        .submit_change_request(
            f.occurrence.id,
            Requester::Parent(f.parent_id),
            ChangeProposal::reschedule_to(
                TimeSlot::new(at(2024, 3, 5, 16), at(2024, 3, 5, 16) + Duration::hours(1)).unwrap(),
                None,
            ),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, TutorlyError::Conflict { .. }));
}

#[tokio::test]
async fn acknowledged_requests_stay_open_until_decided() {
    let f = setup().await;
    let request = f
        .engine
        .submit_change_request(
            f.occurrence.id,
            Requester::Parent(f.parent_id),
            ChangeProposal::cancel(None),
        )
        .await
        .unwrap();

    let acknowledged = f
        .engine
        .acknowledge_change_request(request.id, f.admin_id, Some("looking into it".into()))
        .await
        .unwrap();
    assert_eq!(acknowledged.status, ChangeRequestStatus::Acknowledged);
    let occurrence = f.engine.store().occurrences().get_by_id(f.occurrence.id).await.unwrap();
    assert_eq!(occurrence.status, OccurrenceStatus::Scheduled);

    let open = f
        .engine
        .list_open_change_requests(Pagination::default())
        .await
        .unwrap();
    assert_eq!(open.total, 1);

    f.engine
        .resolve_change_request(request.id, Decision::approve(), f.admin_id, None)
        .await
        .unwrap();
    let occurrence = f.engine.store().occurrences().get_by_id(f.occurrence.id).await.unwrap();
    assert_eq!(occurrence.status, OccurrenceStatus::Cancelled);

    let err = f
        .engine
        .acknowledge_change_request(request.id, f.admin_id, None)
        .await
        .unwrap_err();
    assert!(matches!(err, TutorlyError::Conflict { .. }));
}
