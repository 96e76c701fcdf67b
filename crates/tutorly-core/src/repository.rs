//! Repository trait definitions for data access abstraction.
//!
//! All repository operations are async. Implementations must make the
//! "create if not exists" style operations safe to race: a natural key
//! (template + date, occurrence, invoice) is enforced by the store, and
//! the engine re-checks existence before every create.

use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::error::TutorlyResult;
use crate::models::{
    alert::{
        CreateInvoicePaymentAlert, CreateSessionLoggingAlert, Dismissal, InvoicePaymentAlert,
        SessionLoggingAlert,
    },
    audit::{AuditLogEntry, CreateAuditLogEntry},
    change_request::{ChangeRequest, CreateChangeRequest, RecordDecision},
    invoice::{CreateInvoice, Invoice},
    occurrence::{CreateOccurrence, Occurrence, UpdateOccurrence},
    student::{BalanceChange, CreateStudent, Student},
    template::{CreateTemplate, RecurringTemplate, UpdateTemplate},
    timesheet::{CreateTimesheet, Timesheet},
};

/// Pagination parameters for list queries.
#[derive(Debug, Clone)]
pub struct Pagination {
    pub offset: u64,
    pub limit: u64,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: 50,
        }
    }
}

/// A paginated result set.
#[derive(Debug, Clone)]
pub struct PaginatedResult<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub offset: u64,
    pub limit: u64,
}

// ---------------------------------------------------------------------------
// Scheduling
// ---------------------------------------------------------------------------

pub trait TemplateRepository: Send + Sync {
    fn create(
        &self,
        input: CreateTemplate,
    ) -> impl Future<Output = TutorlyResult<RecurringTemplate>> + Send;
    fn get_by_id(&self, id: Uuid) -> impl Future<Output = TutorlyResult<RecurringTemplate>> + Send;
    fn update(
        &self,
        id: Uuid,
        input: UpdateTemplate,
    ) -> impl Future<Output = TutorlyResult<RecurringTemplate>> + Send;
    /// Soft-delete: templates are deactivated, never removed.
    fn set_active(
        &self,
        id: Uuid,
        active: bool,
    ) -> impl Future<Output = TutorlyResult<RecurringTemplate>> + Send;
    fn list_active(&self) -> impl Future<Output = TutorlyResult<Vec<RecurringTemplate>>> + Send;
    fn list_by_student(
        &self,
        student_id: Uuid,
    ) -> impl Future<Output = TutorlyResult<Vec<RecurringTemplate>>> + Send;
}

pub trait OccurrenceRepository: Send + Sync {
    fn create(
        &self,
        input: CreateOccurrence,
    ) -> impl Future<Output = TutorlyResult<Occurrence>> + Send;
    /// Create all rows in one transaction: either every draft is
    /// stored or none is.
    fn create_batch(
        &self,
        inputs: Vec<CreateOccurrence>,
    ) -> impl Future<Output = TutorlyResult<Vec<Occurrence>>> + Send;
    fn get_by_id(&self, id: Uuid) -> impl Future<Output = TutorlyResult<Occurrence>> + Send;
    fn update(
        &self,
        id: Uuid,
        input: UpdateOccurrence,
    ) -> impl Future<Output = TutorlyResult<Occurrence>> + Send;
    fn delete(&self, id: Uuid) -> impl Future<Output = TutorlyResult<()>> + Send;
    /// Dates that already hold an occurrence for the template (the
    /// natural key), regardless of status or later reschedules.
    fn list_template_dates(
        &self,
        template_id: Uuid,
    ) -> impl Future<Output = TutorlyResult<Vec<NaiveDate>>> + Send;
    /// Delete generated, still-scheduled occurrences of the template
    /// starting strictly after `after`. Returns the number removed.
    fn delete_future_generated(
        &self,
        template_id: Uuid,
        after: DateTime<Utc>,
    ) -> impl Future<Output = TutorlyResult<u64>> + Send;
    /// Scheduled or completed occurrences whose end lies in
    /// `[from, to]`, oldest first.
    fn list_ended_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> impl Future<Output = TutorlyResult<Vec<Occurrence>>> + Send;
    fn list_by_template(
        &self,
        template_id: Uuid,
    ) -> impl Future<Output = TutorlyResult<Vec<Occurrence>>> + Send;
}

pub trait ChangeRequestRepository: Send + Sync {
    fn create(
        &self,
        input: CreateChangeRequest,
    ) -> impl Future<Output = TutorlyResult<ChangeRequest>> + Send;
    fn get_by_id(&self, id: Uuid) -> impl Future<Output = TutorlyResult<ChangeRequest>> + Send;
    /// Apply the decision only if the request is still open. Returns
    /// `NotFound` when the request is missing or already resolved.
    fn record_decision(
        &self,
        id: Uuid,
        input: RecordDecision,
    ) -> impl Future<Output = TutorlyResult<ChangeRequest>> + Send;
    /// Undo the decision recorded at `decided_at`, restoring the open
    /// state captured in `previous`. Returns `NotFound` when the request
    /// no longer carries that decision.
    fn reopen(
        &self,
        previous: ChangeRequest,
        decided_at: DateTime<Utc>,
    ) -> impl Future<Output = TutorlyResult<ChangeRequest>> + Send;
    /// Pending or acknowledged requests for an occurrence.
    fn list_open_for_occurrence(
        &self,
        occurrence_id: Uuid,
    ) -> impl Future<Output = TutorlyResult<Vec<ChangeRequest>>> + Send;
    /// Admin queue of open requests, oldest first.
    fn list_open(
        &self,
        pagination: Pagination,
    ) -> impl Future<Output = TutorlyResult<PaginatedResult<ChangeRequest>>> + Send;
}

pub trait TimesheetRepository: Send + Sync {
    fn create(&self, input: CreateTimesheet) -> impl Future<Output = TutorlyResult<Timesheet>> + Send;
    fn get_by_occurrence(
        &self,
        occurrence_id: Uuid,
    ) -> impl Future<Output = TutorlyResult<Option<Timesheet>>> + Send;
}

// ---------------------------------------------------------------------------
// Compliance alerts
// ---------------------------------------------------------------------------

pub trait LoggingAlertRepository: Send + Sync {
    fn create(
        &self,
        input: CreateSessionLoggingAlert,
    ) -> impl Future<Output = TutorlyResult<SessionLoggingAlert>> + Send;
    /// The alert for an occurrence in any status.
    fn get_by_occurrence(
        &self,
        occurrence_id: Uuid,
    ) -> impl Future<Output = TutorlyResult<Option<SessionLoggingAlert>>> + Send;
    fn get_by_id(&self, id: Uuid)
    -> impl Future<Output = TutorlyResult<SessionLoggingAlert>> + Send;
    fn list_pending(&self) -> impl Future<Output = TutorlyResult<Vec<SessionLoggingAlert>>> + Send;
    /// Pending → resolved. `NotFound` if the alert is no longer pending.
    fn resolve(
        &self,
        id: Uuid,
        timesheet_id: Uuid,
        at: DateTime<Utc>,
    ) -> impl Future<Output = TutorlyResult<SessionLoggingAlert>> + Send;
    /// Pending → dismissed. `NotFound` if the alert is no longer pending.
    fn dismiss(
        &self,
        id: Uuid,
        dismissal: Dismissal,
    ) -> impl Future<Output = TutorlyResult<SessionLoggingAlert>> + Send;
}

pub trait InvoiceAlertRepository: Send + Sync {
    fn create(
        &self,
        input: CreateInvoicePaymentAlert,
    ) -> impl Future<Output = TutorlyResult<InvoicePaymentAlert>> + Send;
    fn get_by_invoice(
        &self,
        invoice_id: Uuid,
    ) -> impl Future<Output = TutorlyResult<Option<InvoicePaymentAlert>>> + Send;
    fn get_by_id(&self, id: Uuid)
    -> impl Future<Output = TutorlyResult<InvoicePaymentAlert>> + Send;
    fn list_pending(&self) -> impl Future<Output = TutorlyResult<Vec<InvoicePaymentAlert>>> + Send;
    fn resolve(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> impl Future<Output = TutorlyResult<InvoicePaymentAlert>> + Send;
    fn dismiss(
        &self,
        id: Uuid,
        dismissal: Dismissal,
    ) -> impl Future<Output = TutorlyResult<InvoicePaymentAlert>> + Send;
}

// ---------------------------------------------------------------------------
// Students & billing
// ---------------------------------------------------------------------------

pub trait StudentRepository: Send + Sync {
    fn create(&self, input: CreateStudent) -> impl Future<Output = TutorlyResult<Student>> + Send;
    fn get_by_id(&self, id: Uuid) -> impl Future<Output = TutorlyResult<Student>> + Send;
    /// Overwrite the prepaid balance. The change carries the value
    /// that was replaced.
    fn set_remaining_sessions(
        &self,
        id: Uuid,
        remaining: i32,
    ) -> impl Future<Output = TutorlyResult<(Student, BalanceChange)>> + Send;
    /// Add `delta` to the prepaid balance in a single atomic write, so
    /// concurrent adjustments are never lost.
    fn adjust_remaining_sessions(
        &self,
        id: Uuid,
        delta: i32,
    ) -> impl Future<Output = TutorlyResult<(Student, BalanceChange)>> + Send;
    fn list_group_members(
        &self,
        group_id: Uuid,
    ) -> impl Future<Output = TutorlyResult<Vec<Student>>> + Send;

    /// Associate a parent account with a student (idempotent).
    fn link_parent(
        &self,
        parent_id: Uuid,
        student_id: Uuid,
    ) -> impl Future<Output = TutorlyResult<()>> + Send;
    fn is_parent_of(
        &self,
        parent_id: Uuid,
        student_id: Uuid,
    ) -> impl Future<Output = TutorlyResult<bool>> + Send;
    /// Parents linked to a student, oldest link first.
    fn list_parents(
        &self,
        student_id: Uuid,
    ) -> impl Future<Output = TutorlyResult<Vec<Uuid>>> + Send;
}

pub trait InvoiceRepository: Send + Sync {
    fn create(&self, input: CreateInvoice) -> impl Future<Output = TutorlyResult<Invoice>> + Send;
    fn get_by_id(&self, id: Uuid) -> impl Future<Output = TutorlyResult<Invoice>> + Send;
    fn list_by_student(
        &self,
        student_id: Uuid,
    ) -> impl Future<Output = TutorlyResult<Vec<Invoice>>> + Send;
    /// Invoices in `Sent` status that were sent at or before `cutoff`.
    fn list_unpaid_sent_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> impl Future<Output = TutorlyResult<Vec<Invoice>>> + Send;
    /// Invoices in `Scheduled` status whose send time has arrived.
    fn list_scheduled_due(
        &self,
        now: DateTime<Utc>,
    ) -> impl Future<Output = TutorlyResult<Vec<Invoice>>> + Send;
    fn mark_sent(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> impl Future<Output = TutorlyResult<Invoice>> + Send;
    fn mark_paid(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> impl Future<Output = TutorlyResult<Invoice>> + Send;
    /// Reminder thresholds (days after send) already handled.
    fn reminded_thresholds(
        &self,
        invoice_id: Uuid,
    ) -> impl Future<Output = TutorlyResult<Vec<u32>>> + Send;
    /// Record a threshold as handled. Returns `false` when it was
    /// already recorded by an earlier or concurrent run.
    fn record_reminder(
        &self,
        invoice_id: Uuid,
        threshold_days: u32,
    ) -> impl Future<Output = TutorlyResult<bool>> + Send;
}

// ---------------------------------------------------------------------------
// Audit (append-only) & scan bookkeeping
// ---------------------------------------------------------------------------

/// Query filters for audit log entries.
#[derive(Debug, Clone, Default)]
pub struct AuditLogFilter {
    pub actor_id: Option<Uuid>,
    pub action: Option<String>,
    pub resource_id: Option<Uuid>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

pub trait AuditLogRepository: Send + Sync {
    /// Append a new audit log entry. No update or delete operations exist.
    fn append(
        &self,
        input: CreateAuditLogEntry,
    ) -> impl Future<Output = TutorlyResult<AuditLogEntry>> + Send;
    fn list(
        &self,
        filter: AuditLogFilter,
        pagination: Pagination,
    ) -> impl Future<Output = TutorlyResult<PaginatedResult<AuditLogEntry>>> + Send;
}

/// Persisted "last completed run" per periodic job.
pub trait ScanWatermarkRepository: Send + Sync {
    fn last_run(
        &self,
        scan: &str,
    ) -> impl Future<Output = TutorlyResult<Option<DateTime<Utc>>>> + Send;
    fn record_run(
        &self,
        scan: &str,
        at: DateTime<Utc>,
    ) -> impl Future<Output = TutorlyResult<()>> + Send;
}

// ---------------------------------------------------------------------------
// Aggregate access
// ---------------------------------------------------------------------------

/// Bundle of every repository the engine needs, so services are generic
/// over one store type instead of a dozen repository parameters.
pub trait Store: Send + Sync {
    type Templates: TemplateRepository;
    type Occurrences: OccurrenceRepository;
    type ChangeRequests: ChangeRequestRepository;
    type Timesheets: TimesheetRepository;
    type LoggingAlerts: LoggingAlertRepository;
    type InvoiceAlerts: InvoiceAlertRepository;
    type Students: StudentRepository;
    type Invoices: InvoiceRepository;
    type Audit: AuditLogRepository;
    type Watermarks: ScanWatermarkRepository;

    fn templates(&self) -> &Self::Templates;
    fn occurrences(&self) -> &Self::Occurrences;
    fn change_requests(&self) -> &Self::ChangeRequests;
    fn timesheets(&self) -> &Self::Timesheets;
    fn logging_alerts(&self) -> &Self::LoggingAlerts;
    fn invoice_alerts(&self) -> &Self::InvoiceAlerts;
    fn students(&self) -> &Self::Students;
    fn invoices(&self) -> &Self::Invoices;
    fn audit(&self) -> &Self::Audit;
    fn watermarks(&self) -> &Self::Watermarks;
}
