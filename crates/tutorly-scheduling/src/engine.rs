//! The scheduling engine facade.
//!
//! Wires the components over one store, notification sink and clock,
//! and dispatches the domain events each operation returns before
//! handing the primary result back to the caller.

use std::sync::Arc;

use chrono::{Duration, NaiveDate};
use tracing::{debug, info, warn};
use tutorly_core::clock::Clock;
use tutorly_core::error::TutorlyResult;
use tutorly_core::models::alert::{InvoicePaymentAlert, SessionLoggingAlert};
use tutorly_core::models::change_request::{ChangeProposal, ChangeRequest, Decision, Requester};
use tutorly_core::models::invoice::Invoice;
use tutorly_core::models::occurrence::{Occurrence, OccurrenceStatus, TimeSlot};
use tutorly_core::models::template::{CreateTemplate, RecurringTemplate, UpdateTemplate};
use tutorly_core::models::timesheet::{CreateTimesheet, Timesheet};
use tutorly_core::notify::NotificationSink;
use tutorly_core::repository::{PaginatedResult, Pagination, ScanWatermarkRepository, Store};
use uuid::Uuid;

use crate::alerting::{ComplianceAlerting, INVOICE_SCAN, LOGGING_SCAN};
use crate::config::SchedulingConfig;
use crate::events::EventDispatcher;
use crate::generator::OccurrenceGenerator;
use crate::invoicing::{BalanceUpdate, InvoiceTrigger};
use crate::lifecycle::{ManualOccurrence, OccurrenceLifecycle};
use crate::workflow::ChangeRequestWorkflow;

/// Alerts created by one scan pass. `None` marks a scan skipped
/// because its watermark was younger than the requested interval.
#[derive(Debug, Default)]
pub struct ScanReport {
    pub logging: Option<Vec<SessionLoggingAlert>>,
    pub invoice: Option<Vec<InvoicePaymentAlert>>,
}

pub struct SchedulingEngine<S: Store, N: NotificationSink> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    config: SchedulingConfig,
    generator: OccurrenceGenerator<S>,
    lifecycle: Arc<OccurrenceLifecycle<S>>,
    workflow: ChangeRequestWorkflow<S, N>,
    alerting: Arc<ComplianceAlerting<S, N>>,
    invoicing: Arc<InvoiceTrigger<S, N>>,
    dispatcher: EventDispatcher<S, N>,
}

impl<S: Store, N: NotificationSink> SchedulingEngine<S, N> {
    pub fn new(
        store: S,
        notifier: N,
        clock: Arc<dyn Clock>,
        config: SchedulingConfig,
    ) -> TutorlyResult<Self> {
        config.validate()?;
        let store = Arc::new(store);
        let notifier = Arc::new(notifier);

        let generator = OccurrenceGenerator::new(store.clone(), clock.clone(), config.clone());
        let lifecycle = Arc::new(OccurrenceLifecycle::new(
            store.clone(),
            clock.clone(),
            config.clone(),
        ));
        let workflow = ChangeRequestWorkflow::new(
            store.clone(),
            notifier.clone(),
            clock.clone(),
            lifecycle.clone(),
        );
        let alerting = Arc::new(ComplianceAlerting::new(
            store.clone(),
            notifier.clone(),
            clock.clone(),
            config.clone(),
        ));
        let invoicing = Arc::new(InvoiceTrigger::new(
            store.clone(),
            notifier,
            clock.clone(),
            config.clone(),
        ));
        let dispatcher = EventDispatcher::new(lifecycle.clone(), alerting.clone(), invoicing.clone());

        Ok(Self {
            store,
            clock,
            config,
            generator,
            lifecycle,
            workflow,
            alerting,
            invoicing,
            dispatcher,
        })
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &SchedulingConfig {
        &self.config
    }

    /// Today in the business time zone.
    pub fn today(&self) -> NaiveDate {
        self.config.local_date(self.clock.now())
    }

    // -----------------------------------------------------------------------
    // Templates & generation
    // -----------------------------------------------------------------------

    pub async fn generate_occurrences(
        &self,
        template_id: Uuid,
        horizon_end: NaiveDate,
    ) -> TutorlyResult<Vec<Occurrence>> {
        self.generator.generate(template_id, horizon_end).await
    }

    /// Extend every active template up to `horizon_end`.
    pub async fn extend_all_active(&self, horizon_end: NaiveDate) -> TutorlyResult<Vec<Occurrence>> {
        self.generator.extend_all_active(horizon_end).await
    }

    /// Extend every active template to the default horizon unless that
    /// already happened today. Returns `None` when skipped.
    pub async fn extend_horizon_if_due(&self) -> TutorlyResult<Option<Vec<Occurrence>>> {
        self.generator.extend_horizon_if_due().await
    }

    pub async fn create_template(&self, input: CreateTemplate) -> TutorlyResult<RecurringTemplate> {
        self.generator.create_template(input).await
    }

    pub async fn update_template(
        &self,
        id: Uuid,
        input: UpdateTemplate,
        admin_id: Uuid,
    ) -> TutorlyResult<RecurringTemplate> {
        self.generator.update_template(id, input, admin_id).await
    }

    pub async fn deactivate_template(&self, id: Uuid, admin_id: Uuid) -> TutorlyResult<RecurringTemplate> {
        self.generator.deactivate_template(id, admin_id).await
    }

    pub async fn list_active_templates(&self) -> TutorlyResult<Vec<RecurringTemplate>> {
        self.generator.list_active_templates().await
    }

    // -----------------------------------------------------------------------
    // Occurrences
    // -----------------------------------------------------------------------

    pub async fn transition_occurrence(
        &self,
        id: Uuid,
        new_status: OccurrenceStatus,
    ) -> TutorlyResult<Occurrence> {
        let transition = self.lifecycle.transition(id, new_status).await?;
        self.dispatcher.dispatch(transition.events).await;
        Ok(transition.occurrence)
    }

    pub async fn create_manual_occurrence(&self, input: ManualOccurrence) -> TutorlyResult<Occurrence> {
        self.lifecycle.create_manual(input).await
    }

    pub async fn reschedule_occurrence(&self, id: Uuid, slot: TimeSlot) -> TutorlyResult<Occurrence> {
        let transition = self.lifecycle.reschedule(id, slot).await?;
        self.dispatcher.dispatch(transition.events).await;
        Ok(transition.occurrence)
    }

    pub async fn flag_occurrence(
        &self,
        id: Uuid,
        parent_id: Uuid,
        comment: String,
    ) -> TutorlyResult<Occurrence> {
        self.lifecycle.flag(id, parent_id, comment).await
    }

    pub async fn log_timesheet(&self, input: CreateTimesheet) -> TutorlyResult<Timesheet> {
        let (timesheet, events) = self.lifecycle.log_timesheet(input).await?;
        self.dispatcher.dispatch(events).await;
        Ok(timesheet)
    }

    // -----------------------------------------------------------------------
    // Change requests
    // -----------------------------------------------------------------------

    pub async fn submit_change_request(
        &self,
        occurrence_id: Uuid,
        requester: Requester,
        proposal: ChangeProposal,
    ) -> TutorlyResult<ChangeRequest> {
        self.workflow.submit(occurrence_id, requester, proposal).await
    }

    pub async fn resolve_change_request(
        &self,
        id: Uuid,
        decision: Decision,
        admin_id: Uuid,
        admin_notes: Option<String>,
    ) -> TutorlyResult<ChangeRequest> {
        let resolved = self.workflow.resolve(id, decision, admin_id, admin_notes).await?;
        self.dispatcher.dispatch(resolved.events).await;
        Ok(resolved.request)
    }

    pub async fn acknowledge_change_request(
        &self,
        id: Uuid,
        admin_id: Uuid,
        notes: Option<String>,
    ) -> TutorlyResult<ChangeRequest> {
        self.workflow.acknowledge(id, admin_id, notes).await
    }

    pub async fn get_change_request(&self, id: Uuid) -> TutorlyResult<ChangeRequest> {
        self.workflow.get(id).await
    }

    pub async fn list_open_change_requests(
        &self,
        pagination: Pagination,
    ) -> TutorlyResult<PaginatedResult<ChangeRequest>> {
        self.workflow.list_open(pagination).await
    }

    // -----------------------------------------------------------------------
    // Compliance alerts
    // -----------------------------------------------------------------------

    pub async fn scan_logging_alerts(&self) -> TutorlyResult<Vec<SessionLoggingAlert>> {
        self.alerting.scan_logging_alerts().await
    }

    /// Send held invoices that are due, then scan for unpaid ones.
    pub async fn scan_invoice_alerts(&self) -> TutorlyResult<Vec<InvoicePaymentAlert>> {
        let released = self.invoicing.release_scheduled().await?;
        if !released.is_empty() {
            info!(count = released.len(), "Released held invoices");
        }
        self.alerting.scan_invoice_alerts().await
    }

    /// Run both scans unconditionally.
    pub async fn run_scans(&self) -> TutorlyResult<ScanReport> {
        Ok(ScanReport {
            logging: Some(self.scan_logging_alerts().await?),
            invoice: Some(self.scan_invoice_alerts().await?),
        })
    }

    /// Run each scan whose last completed run is at least `interval`
    /// old. A failing scan is logged and does not stop the other.
    pub async fn run_due_scans(&self, interval: Duration) -> TutorlyResult<ScanReport> {
        let mut report = ScanReport::default();

        if self.is_due(LOGGING_SCAN, interval).await? {
            match self.scan_logging_alerts().await {
                Ok(created) => report.logging = Some(created),
                Err(e) => warn!(scan = LOGGING_SCAN, error = %e, "Scan failed"),
            }
        }
        if self.is_due(INVOICE_SCAN, interval).await? {
            match self.scan_invoice_alerts().await {
                Ok(created) => report.invoice = Some(created),
                Err(e) => warn!(scan = INVOICE_SCAN, error = %e, "Scan failed"),
            }
        }
        Ok(report)
    }

    async fn is_due(&self, scan: &str, interval: Duration) -> TutorlyResult<bool> {
        let now = self.clock.now();
        match self.store.watermarks().last_run(scan).await? {
            Some(last) if now - last < interval => {
                debug!(scan, %last, "Scan not due yet");
                Ok(false)
            }
            _ => Ok(true),
        }
    }

    pub async fn dismiss_logging_alert(
        &self,
        id: Uuid,
        admin_id: Uuid,
        reason: String,
    ) -> TutorlyResult<SessionLoggingAlert> {
        self.alerting.dismiss_logging_alert(id, admin_id, reason).await
    }

    pub async fn dismiss_invoice_alert(
        &self,
        id: Uuid,
        admin_id: Uuid,
        reason: String,
    ) -> TutorlyResult<InvoicePaymentAlert> {
        self.alerting.dismiss_invoice_alert(id, admin_id, reason).await
    }

    pub async fn list_pending_logging_alerts(&self) -> TutorlyResult<Vec<SessionLoggingAlert>> {
        self.alerting.list_pending_logging_alerts().await
    }

    pub async fn list_pending_invoice_alerts(&self) -> TutorlyResult<Vec<InvoicePaymentAlert>> {
        self.alerting.list_pending_invoice_alerts().await
    }

    // -----------------------------------------------------------------------
    // Balances & invoices
    // -----------------------------------------------------------------------

    pub async fn set_remaining_sessions(&self, student_id: Uuid, remaining: i32) -> TutorlyResult<BalanceUpdate> {
        self.invoicing.set_remaining_sessions(student_id, remaining).await
    }

    pub async fn consume_session(&self, student_id: Uuid) -> TutorlyResult<BalanceUpdate> {
        self.invoicing.consume_session(student_id).await
    }

    /// Record payment and close the invoice's pending payment alert.
    pub async fn mark_invoice_paid(&self, invoice_id: Uuid) -> TutorlyResult<Invoice> {
        let invoice = self.invoicing.mark_paid(invoice_id).await?;
        if let Err(e) = self.alerting.resolve_invoice_alert(invoice_id).await {
            warn!(%invoice_id, error = %e, "Failed to resolve payment alert");
        }
        Ok(invoice)
    }

    pub async fn list_invoices(&self, student_id: Uuid) -> TutorlyResult<Vec<Invoice>> {
        self.invoicing.list_invoices(student_id).await
    }
}
