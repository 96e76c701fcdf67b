//! Compliance alerting: unlogged sessions and unpaid invoices.
//!
//! Both scans follow detect → create-if-not-exists → resolve-or-dismiss
//! and are safe to run concurrently or repeatedly. Existence is checked
//! before every create, and the store's unique index turns a lost race
//! into `AlreadyExists`, which the scan counts as a skip.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use tutorly_core::clock::Clock;
use tutorly_core::error::{TutorlyError, TutorlyResult};
use tutorly_core::models::alert::{
    AlertStatus, CreateInvoicePaymentAlert, CreateSessionLoggingAlert, Dismissal,
    InvoicePaymentAlert, SessionLoggingAlert,
};
use tutorly_core::models::invoice::{Invoice, InvoiceStatus};
use tutorly_core::models::notification::{NotificationKind, Recipient};
use tutorly_core::models::occurrence::{Occurrence, OccurrenceStatus};
use tutorly_core::notify::NotificationSink;
use tutorly_core::repository::{
    InvoiceAlertRepository, InvoiceRepository, LoggingAlertRepository, OccurrenceRepository,
    ScanWatermarkRepository, Store, TimesheetRepository,
};
use uuid::Uuid;

use crate::config::SchedulingConfig;
use crate::effects::{self, AuditRecord};
use crate::error::SchedulingError;

pub const LOGGING_SCAN: &str = "logging";
pub const INVOICE_SCAN: &str = "invoice";

/// Thresholds crossed after `elapsed_days` that have not been handled
/// yet, ascending and without duplicates.
pub fn due_thresholds(thresholds: &[u32], elapsed_days: i64, handled: &[u32]) -> Vec<u32> {
    let mut due: Vec<u32> = thresholds
        .iter()
        .copied()
        .filter(|t| i64::from(*t) <= elapsed_days && !handled.contains(t))
        .collect();
    due.sort_unstable();
    due.dedup();
    due
}

fn non_blank(reason: &str) -> TutorlyResult<()> {
    if reason.trim().is_empty() {
        return Err(SchedulingError::MissingText("reason").into());
    }
    Ok(())
}

/// A conditional alert update that found nothing pending lost a race
/// with another resolve or dismiss.
fn closed_on_not_found<T>(result: TutorlyResult<T>) -> TutorlyResult<T> {
    result.map_err(|e| match e {
        TutorlyError::NotFound { .. } => SchedulingError::AlertClosed.into(),
        other => other,
    })
}

pub struct ComplianceAlerting<S: Store, N: NotificationSink> {
    store: Arc<S>,
    notifier: Arc<N>,
    clock: Arc<dyn Clock>,
    config: SchedulingConfig,
}

impl<S: Store, N: NotificationSink> ComplianceAlerting<S, N> {
    pub fn new(
        store: Arc<S>,
        notifier: Arc<N>,
        clock: Arc<dyn Clock>,
        config: SchedulingConfig,
    ) -> Self {
        Self {
            store,
            notifier,
            clock,
            config,
        }
    }

    // -----------------------------------------------------------------------
    // Session logging
    // -----------------------------------------------------------------------

    /// Close pending alerts whose cause went away, then raise alerts for
    /// sessions that ended more than the grace window ago without a
    /// timesheet. Returns the alerts created by this run.
    ///
    /// The window reaches back to the previous run's cutoff when that is
    /// older than the lookback, so no session is skipped after downtime.
    pub async fn scan_logging_alerts(&self) -> TutorlyResult<Vec<SessionLoggingAlert>> {
        let now = self.clock.now();
        self.reconcile_logging_alerts(now).await?;

        let grace = self.config.logging_grace();
        let cutoff = now - grace;
        let mut from = cutoff - self.config.logging_lookback();
        if let Some(last_run) = self.store.watermarks().last_run(LOGGING_SCAN).await? {
            let previous_cutoff = last_run - grace;
            if previous_cutoff < from {
                debug!(%previous_cutoff, "Logging scan catching up since last run");
                from = previous_cutoff;
            }
        }
        let candidates = self
            .store
            .occurrences()
            .list_ended_between(from, cutoff)
            .await?;

        let mut created = Vec::new();
        for occurrence in &candidates {
            if let Some(alert) = self.raise_logging_alert(occurrence).await? {
                created.push(alert);
            }
        }

        if let Err(e) = self.store.watermarks().record_run(LOGGING_SCAN, now).await {
            warn!(scan = LOGGING_SCAN, error = %e, "Failed to record scan watermark");
        }
        info!(
            candidates = candidates.len(),
            created = created.len(),
            "Logging alert scan finished"
        );
        Ok(created)
    }

    async fn raise_logging_alert(
        &self,
        occurrence: &Occurrence,
    ) -> TutorlyResult<Option<SessionLoggingAlert>> {
        if self
            .store
            .timesheets()
            .get_by_occurrence(occurrence.id)
            .await?
            .is_some()
        {
            return Ok(None);
        }
        let alerts = self.store.logging_alerts();
        if alerts.get_by_occurrence(occurrence.id).await?.is_some() {
            return Ok(None);
        }

        let alert = match alerts
            .create(CreateSessionLoggingAlert {
                occurrence_id: occurrence.id,
                tutor_id: occurrence.tutor_id,
                student_id: occurrence.student_id(),
                session_end: occurrence.end_at,
            })
            .await
        {
            Ok(alert) => alert,
            Err(TutorlyError::AlreadyExists { .. }) => {
                debug!(occurrence_id = %occurrence.id, "Logging alert raised concurrently");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        info!(
            alert_id = %alert.id,
            occurrence_id = %occurrence.id,
            tutor_id = %occurrence.tutor_id,
            "Session logging overdue"
        );
        effects::notify(
            self.notifier.as_ref(),
            Recipient::Tutor(occurrence.tutor_id),
            NotificationKind::SessionLoggingOverdue,
            serde_json::json!({
                "alert_id": alert.id,
                "occurrence_id": occurrence.id,
                "session_end": occurrence.end_at,
                "subject": occurrence.subject,
            }),
        )
        .await;
        Ok(Some(alert))
    }

    /// Resolve pending alerts whose session got logged after all and
    /// dismiss those whose session was cancelled, marked no-show or
    /// deleted.
    async fn reconcile_logging_alerts(&self, now: DateTime<Utc>) -> TutorlyResult<()> {
        for alert in self.store.logging_alerts().list_pending().await? {
            if let Some(timesheet) = self
                .store
                .timesheets()
                .get_by_occurrence(alert.occurrence_id)
                .await?
            {
                self.close_quietly(
                    alert.id,
                    self.store
                        .logging_alerts()
                        .resolve(alert.id, timesheet.id, now)
                        .await,
                );
                continue;
            }

            let reason = match self.store.occurrences().get_by_id(alert.occurrence_id).await {
                Ok(occurrence) => match occurrence.status {
                    OccurrenceStatus::Cancelled => "session cancelled",
                    OccurrenceStatus::NoShow => "session marked as no-show",
                    _ => continue,
                },
                Err(TutorlyError::NotFound { .. }) => "session deleted",
                Err(e) => return Err(e),
            };
            self.close_quietly(
                alert.id,
                self.store
                    .logging_alerts()
                    .dismiss(alert.id, system_dismissal(reason, now))
                    .await,
            );
        }
        Ok(())
    }

    fn close_quietly<T>(&self, alert_id: Uuid, result: TutorlyResult<T>) {
        match result {
            Ok(_) => debug!(%alert_id, "Alert reconciled"),
            Err(TutorlyError::NotFound { .. }) => {}
            Err(e) => warn!(%alert_id, error = %e, "Failed to reconcile alert"),
        }
    }

    /// Resolve the pending logging alert of an occurrence against the
    /// timesheet that was just logged for it. No-op without one.
    pub async fn resolve_for_timesheet(&self, occurrence_id: Uuid, timesheet_id: Uuid) -> TutorlyResult<()> {
        let alerts = self.store.logging_alerts();
        let Some(alert) = alerts.get_by_occurrence(occurrence_id).await? else {
            return Ok(());
        };
        if alert.status != AlertStatus::Pending {
            return Ok(());
        }
        match alerts.resolve(alert.id, timesheet_id, self.clock.now()).await {
            Ok(_) => {
                info!(alert_id = %alert.id, %occurrence_id, %timesheet_id, "Logging alert resolved");
                Ok(())
            }
            Err(TutorlyError::NotFound { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Dismiss the pending logging alert of an occurrence on the
    /// engine's behalf. No-op without one.
    pub async fn dismiss_for_occurrence(&self, occurrence_id: Uuid, reason: &str) -> TutorlyResult<()> {
        let alerts = self.store.logging_alerts();
        let Some(alert) = alerts.get_by_occurrence(occurrence_id).await? else {
            return Ok(());
        };
        if alert.status != AlertStatus::Pending {
            return Ok(());
        }
        match alerts
            .dismiss(alert.id, system_dismissal(reason, self.clock.now()))
            .await
        {
            Ok(_) => {
                info!(alert_id = %alert.id, %occurrence_id, reason, "Logging alert dismissed");
                Ok(())
            }
            Err(TutorlyError::NotFound { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Admin dismissal with a mandatory reason.
    pub async fn dismiss_logging_alert(
        &self,
        id: Uuid,
        admin_id: Uuid,
        reason: String,
    ) -> TutorlyResult<SessionLoggingAlert> {
        non_blank(&reason)?;
        let alerts = self.store.logging_alerts();
        let current = alerts.get_by_id(id).await?;
        if current.status != AlertStatus::Pending {
            return Err(SchedulingError::AlertClosed.into());
        }

        let dismissal = Dismissal {
            dismissed_by: Some(admin_id),
            reason: reason.clone(),
            dismissed_at: self.clock.now(),
        };
        let alert = closed_on_not_found(alerts.dismiss(id, dismissal).await)?;

        effects::audit(
            self.store.as_ref(),
            AuditRecord::admin(admin_id, "logging_alert.dismiss", id).metadata(serde_json::json!({
                "occurrence_id": alert.occurrence_id,
                "reason": reason,
            })),
        )
        .await;
        Ok(alert)
    }

    pub async fn list_pending_logging_alerts(&self) -> TutorlyResult<Vec<SessionLoggingAlert>> {
        self.store.logging_alerts().list_pending().await
    }

    // -----------------------------------------------------------------------
    // Invoice payment
    // -----------------------------------------------------------------------

    /// Close alerts for invoices that were paid or cancelled, raise
    /// alerts for invoices unpaid past the grace window and send due
    /// payment reminders. Returns the alerts created by this run.
    pub async fn scan_invoice_alerts(&self) -> TutorlyResult<Vec<InvoicePaymentAlert>> {
        let now = self.clock.now();
        self.reconcile_invoice_alerts(now).await?;

        let overdue = self
            .store
            .invoices()
            .list_unpaid_sent_before(now - self.config.invoice_grace())
            .await?;
        let mut created = Vec::new();
        for invoice in &overdue {
            if let Some(alert) = self.raise_invoice_alert(invoice).await? {
                created.push(alert);
            }
        }

        let mut reminded = 0usize;
        for invoice in self.store.invoices().list_unpaid_sent_before(now).await? {
            if self.send_due_reminder(&invoice, now).await? {
                reminded += 1;
            }
        }

        if let Err(e) = self.store.watermarks().record_run(INVOICE_SCAN, now).await {
            warn!(scan = INVOICE_SCAN, error = %e, "Failed to record scan watermark");
        }
        info!(
            overdue = overdue.len(),
            created = created.len(),
            reminded,
            "Invoice alert scan finished"
        );
        Ok(created)
    }

    async fn raise_invoice_alert(&self, invoice: &Invoice) -> TutorlyResult<Option<InvoicePaymentAlert>> {
        let Some(sent_at) = invoice.sent_at else {
            return Ok(None);
        };
        let alerts = self.store.invoice_alerts();
        if alerts.get_by_invoice(invoice.id).await?.is_some() {
            return Ok(None);
        }

        let alert = match alerts
            .create(CreateInvoicePaymentAlert {
                invoice_id: invoice.id,
                student_id: invoice.student_id,
                parent_id: invoice.parent_id,
                due_date: invoice.due_date,
                sent_at,
            })
            .await
        {
            Ok(alert) => alert,
            Err(TutorlyError::AlreadyExists { .. }) => {
                debug!(invoice_id = %invoice.id, "Payment alert raised concurrently");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        info!(
            alert_id = %alert.id,
            invoice_id = %invoice.id,
            invoice_number = %invoice.invoice_number,
            "Invoice payment overdue"
        );
        if let Some(parent_id) = invoice.parent_id {
            effects::notify(
                self.notifier.as_ref(),
                Recipient::Parent(parent_id),
                NotificationKind::PaymentOverdue,
                invoice_payload(invoice),
            )
            .await;
        }
        Ok(Some(alert))
    }

    /// Record every reminder threshold the invoice has newly crossed
    /// and send one reminder for the furthest. Returns whether a
    /// reminder went out.
    async fn send_due_reminder(&self, invoice: &Invoice, now: DateTime<Utc>) -> TutorlyResult<bool> {
        let Some(sent_at) = invoice.sent_at else {
            return Ok(false);
        };
        let invoices = self.store.invoices();
        let handled = invoices.reminded_thresholds(invoice.id).await?;
        let due = due_thresholds(
            &self.config.reminder_thresholds_days,
            (now - sent_at).num_days(),
            &handled,
        );

        let mut claimed = None;
        for threshold in due {
            // Another run may claim the same threshold first.
            if invoices.record_reminder(invoice.id, threshold).await? {
                claimed = Some(threshold);
            }
        }
        let Some(threshold_days) = claimed else {
            return Ok(false);
        };

        info!(invoice_id = %invoice.id, threshold_days, "Payment reminder due");
        if let Some(parent_id) = invoice.parent_id {
            let mut payload = invoice_payload(invoice);
            payload["days_since_sent"] = serde_json::json!(threshold_days);
            effects::notify(
                self.notifier.as_ref(),
                Recipient::Parent(parent_id),
                NotificationKind::PaymentReminder,
                payload,
            )
            .await;
        }
        Ok(true)
    }

    async fn reconcile_invoice_alerts(&self, now: DateTime<Utc>) -> TutorlyResult<()> {
        for alert in self.store.invoice_alerts().list_pending().await? {
            match self.store.invoices().get_by_id(alert.invoice_id).await {
                Ok(invoice) if matches!(invoice.status, InvoiceStatus::Paid | InvoiceStatus::Cancelled) => {
                    self.close_quietly(
                        alert.id,
                        self.store.invoice_alerts().resolve(alert.id, now).await,
                    );
                }
                Ok(_) => {}
                Err(TutorlyError::NotFound { .. }) => {
                    self.close_quietly(
                        alert.id,
                        self.store
                            .invoice_alerts()
                            .dismiss(alert.id, system_dismissal("invoice deleted", now))
                            .await,
                    );
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Resolve the pending payment alert of an invoice. No-op without one.
    pub async fn resolve_invoice_alert(&self, invoice_id: Uuid) -> TutorlyResult<()> {
        let alerts = self.store.invoice_alerts();
        let Some(alert) = alerts.get_by_invoice(invoice_id).await? else {
            return Ok(());
        };
        if alert.status != AlertStatus::Pending {
            return Ok(());
        }
        match alerts.resolve(alert.id, self.clock.now()).await {
            Ok(_) => {
                info!(alert_id = %alert.id, %invoice_id, "Payment alert resolved");
                Ok(())
            }
            Err(TutorlyError::NotFound { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Admin dismissal with a mandatory reason.
    pub async fn dismiss_invoice_alert(
        &self,
        id: Uuid,
        admin_id: Uuid,
        reason: String,
    ) -> TutorlyResult<InvoicePaymentAlert> {
        non_blank(&reason)?;
        let alerts = self.store.invoice_alerts();
        let current = alerts.get_by_id(id).await?;
        if current.status != AlertStatus::Pending {
            return Err(SchedulingError::AlertClosed.into());
        }

        let dismissal = Dismissal {
            dismissed_by: Some(admin_id),
            reason: reason.clone(),
            dismissed_at: self.clock.now(),
        };
        let alert = closed_on_not_found(alerts.dismiss(id, dismissal).await)?;

        effects::audit(
            self.store.as_ref(),
            AuditRecord::admin(admin_id, "invoice_alert.dismiss", id).metadata(serde_json::json!({
                "invoice_id": alert.invoice_id,
                "reason": reason,
            })),
        )
        .await;
        Ok(alert)
    }

    pub async fn list_pending_invoice_alerts(&self) -> TutorlyResult<Vec<InvoicePaymentAlert>> {
        self.store.invoice_alerts().list_pending().await
    }
}

fn system_dismissal(reason: &str, at: DateTime<Utc>) -> Dismissal {
    Dismissal {
        dismissed_by: None,
        reason: reason.to_string(),
        dismissed_at: at,
    }
}

pub(crate) fn invoice_payload(invoice: &Invoice) -> serde_json::Value {
    serde_json::json!({
        "invoice_id": invoice.id,
        "invoice_number": invoice.invoice_number,
        "student_id": invoice.student_id,
        "amount_cents": invoice.amount_cents,
        "due_date": invoice.due_date.to_string(),
    })
}
