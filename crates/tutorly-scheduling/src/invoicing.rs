//! Prepaid balance tracking and automatic invoicing.
//!
//! Every balance write reports the value it replaced, and
//! [`InvoiceTrigger`] compares it with the new one. Only a crossing from
//! positive to zero-or-below creates an invoice, so repeated writes
//! that leave the balance at or below zero never invoice twice.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};
use tutorly_core::clock::Clock;
use tutorly_core::error::{TutorlyError, TutorlyResult};
use tutorly_core::models::invoice::{CreateInvoice, Invoice, InvoiceStatus};
use tutorly_core::models::notification::{NotificationKind, Recipient};
use tutorly_core::models::student::{BalanceChange, Student};
use tutorly_core::notify::NotificationSink;
use tutorly_core::repository::{InvoiceRepository, Store, StudentRepository};
use uuid::Uuid;

use crate::alerting::invoice_payload;
use crate::config::SchedulingConfig;
use crate::effects;

/// Outcome of a balance write.
#[derive(Debug, Clone)]
pub struct BalanceUpdate {
    pub student: Student,
    pub change: BalanceChange,
    /// The invoice created by a depletion crossing, if any.
    pub invoice: Option<Invoice>,
}

fn invoice_number(at: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("INV-{}-{}", at.format("%Y%m%d"), &suffix[..8]).to_uppercase()
}

pub struct InvoiceTrigger<S: Store, N: NotificationSink> {
    store: Arc<S>,
    notifier: Arc<N>,
    clock: Arc<dyn Clock>,
    config: SchedulingConfig,
}

impl<S: Store, N: NotificationSink> InvoiceTrigger<S, N> {
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

    /// Admin edit of the prepaid balance.
    pub async fn set_remaining_sessions(&self, student_id: Uuid, remaining: i32) -> TutorlyResult<BalanceUpdate> {
        let (student, change) = self
            .store
            .students()
            .set_remaining_sessions(student_id, remaining)
            .await?;
        self.after_balance_write(student, change).await
    }

    /// Deduct one session after a timesheet was logged. The decrement
    /// happens inside the store, so concurrent logs each count.
    pub async fn consume_session(&self, student_id: Uuid) -> TutorlyResult<BalanceUpdate> {
        let (student, change) = self
            .store
            .students()
            .adjust_remaining_sessions(student_id, -1)
            .await?;
        self.after_balance_write(student, change).await
    }

    async fn after_balance_write(&self, student: Student, change: BalanceChange) -> TutorlyResult<BalanceUpdate> {
        debug!(
            student_id = %student.id,
            previous = change.previous,
            current = change.current,
            "Balance updated"
        );

        let invoice = if change.is_depletion() {
            match self.invoice_depleted(&student).await {
                Ok(invoice) => invoice,
                Err(e) => {
                    // The balance write stands regardless.
                    warn!(student_id = %student.id, error = %e, "Auto-invoice failed");
                    None
                }
            }
        } else {
            None
        };

        Ok(BalanceUpdate {
            student,
            change,
            invoice,
        })
    }

    async fn invoice_depleted(&self, student: &Student) -> TutorlyResult<Option<Invoice>> {
        if !student.auto_invoice || student.default_pack_size == 0 {
            debug!(student_id = %student.id, "Auto-invoicing disabled");
            return Ok(None);
        }

        let now = self.clock.now();
        let send_at = student
            .scheduled_invoice_send_at
            .filter(|at| *at > now)
            .unwrap_or(now);
        let held = send_at > now;
        let due_date = self
            .config
            .local_date(send_at + Duration::days(i64::from(self.config.invoice_due_days)));
        let parents = self.store.students().list_parents(student.id).await?;

        let invoice = self
            .store
            .invoices()
            .create(CreateInvoice {
                invoice_number: invoice_number(now),
                student_id: student.id,
                parent_id: parents.first().copied(),
                session_count: student.default_pack_size,
                rate_cents: student.rate_cents,
                status: if held {
                    InvoiceStatus::Scheduled
                } else {
                    InvoiceStatus::Sent
                },
                send_at,
                sent_at: (!held).then_some(send_at),
                due_date,
                auto_generated: true,
            })
            .await?;
        info!(
            student_id = %student.id,
            invoice_id = %invoice.id,
            invoice_number = %invoice.invoice_number,
            sessions = invoice.session_count,
            held,
            "Auto-invoice created"
        );

        if !held {
            self.announce(&invoice, &parents).await;
        }
        Ok(Some(invoice))
    }

    async fn announce(&self, invoice: &Invoice, parents: &[Uuid]) {
        for parent_id in parents {
            effects::notify(
                self.notifier.as_ref(),
                Recipient::Parent(*parent_id),
                NotificationKind::InvoiceIssued,
                invoice_payload(invoice),
            )
            .await;
        }
    }

    /// Send held invoices whose send time has arrived.
    pub async fn release_scheduled(&self) -> TutorlyResult<Vec<Invoice>> {
        let now = self.clock.now();
        let mut released = Vec::new();
        for held in self.store.invoices().list_scheduled_due(now).await? {
            let invoice = match self.store.invoices().mark_sent(held.id, held.send_at).await {
                Ok(invoice) => invoice,
                Err(e) => {
                    warn!(invoice_id = %held.id, error = %e, "Failed to release invoice");
                    continue;
                }
            };
            let parents = self.store.students().list_parents(invoice.student_id).await?;
            self.announce(&invoice, &parents).await;
            info!(invoice_id = %invoice.id, "Held invoice sent");
            released.push(invoice);
        }
        Ok(released)
    }

    /// Record payment. Paying an already paid invoice returns it
    /// unchanged.
    pub async fn mark_paid(&self, invoice_id: Uuid) -> TutorlyResult<Invoice> {
        let invoices = self.store.invoices();
        let current = invoices.get_by_id(invoice_id).await?;
        match current.status {
            InvoiceStatus::Paid => return Ok(current),
            InvoiceStatus::Cancelled => {
                return Err(TutorlyError::Conflict {
                    reason: format!("invoice {} is cancelled", current.invoice_number),
                });
            }
            InvoiceStatus::Scheduled | InvoiceStatus::Sent => {}
        }
        let invoice = invoices.mark_paid(invoice_id, self.clock.now()).await?;
        info!(%invoice_id, "Invoice paid");
        Ok(invoice)
    }

    pub async fn list_invoices(&self, student_id: Uuid) -> TutorlyResult<Vec<Invoice>> {
        self.store.invoices().list_by_student(student_id).await
    }
}
