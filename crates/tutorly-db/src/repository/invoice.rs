//! SurrealDB implementation of [`InvoiceRepository`].
//!
//! Reminder bookkeeping lives in `invoice_reminder`, keyed by
//! `(invoice_id, threshold_days)` so each threshold is handled once.

use chrono::{DateTime, Utc};
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use tutorly_core::error::{TutorlyError, TutorlyResult};
use tutorly_core::models::invoice::{CreateInvoice, Invoice, InvoiceStatus};
use tutorly_core::repository::InvoiceRepository;
use uuid::Uuid;

use crate::codec;
use crate::error::DbError;

#[derive(Debug, SurrealValue)]
struct InvoiceRow {
    record_id: String,
    invoice_number: String,
    student_id: String,
    parent_id: Option<String>,
    session_count: u32,
    rate_cents: i64,
    amount_cents: i64,
    status: String,
    send_at: DateTime<Utc>,
    sent_at: Option<DateTime<Utc>>,
    due_date: String,
    paid_at: Option<DateTime<Utc>>,
    auto_generated: bool,
    created_at: DateTime<Utc>,
}

#[derive(Debug, SurrealValue)]
struct ThresholdRow {
    threshold_days: u32,
}

fn parse_status(s: &str) -> Result<InvoiceStatus, DbError> {
    match s {
        "Scheduled" => Ok(InvoiceStatus::Scheduled),
        "Sent" => Ok(InvoiceStatus::Sent),
        "Paid" => Ok(InvoiceStatus::Paid),
        "Cancelled" => Ok(InvoiceStatus::Cancelled),
        other => Err(DbError::decode("invoice status", other)),
    }
}

fn status_to_string(s: InvoiceStatus) -> &'static str {
    match s {
        InvoiceStatus::Scheduled => "Scheduled",
        InvoiceStatus::Sent => "Sent",
        InvoiceStatus::Paid => "Paid",
        InvoiceStatus::Cancelled => "Cancelled",
    }
}

impl InvoiceRow {
    fn try_into_invoice(self) -> Result<Invoice, DbError> {
        Ok(Invoice {
            id: codec::parse_uuid("id", &self.record_id)?,
            invoice_number: self.invoice_number,
            student_id: codec::parse_uuid("student_id", &self.student_id)?,
            parent_id: codec::parse_opt_uuid("parent_id", self.parent_id.as_deref())?,
            session_count: self.session_count,
            rate_cents: self.rate_cents,
            amount_cents: self.amount_cents,
            status: parse_status(&self.status)?,
            send_at: self.send_at,
            sent_at: self.sent_at,
            due_date: codec::parse_date("due_date", &self.due_date)?,
            paid_at: self.paid_at,
            auto_generated: self.auto_generated,
            created_at: self.created_at,
        })
    }
}

const SELECT_FIELDS: &str = "meta::id(id) AS record_id, *";

/// SurrealDB implementation of the invoice repository.
#[derive(Clone)]
pub struct SurrealInvoiceRepository<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealInvoiceRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }

    async fn fetch_one(&self, id_str: String) -> Result<Invoice, DbError> {
        let mut result = self
            .db
            .query(&format!(
                "SELECT {SELECT_FIELDS} FROM type::record('invoice', $id)"
            ))
            .bind(("id", id_str.clone()))
            .await?;

        let rows: Vec<InvoiceRow> = result.take(0)?;
        rows.into_iter()
            .next()
            .ok_or_else(|| DbError::not_found("invoice", id_str))?
            .try_into_invoice()
    }

    async fn fetch_many(
        &self,
        filter: &str,
        key: &'static str,
        value: DateTime<Utc>,
    ) -> Result<Vec<Invoice>, DbError> {
        let mut result = self
            .db
            .query(&format!(
                "SELECT {SELECT_FIELDS} FROM invoice WHERE {filter} \
                 ORDER BY send_at ASC"
            ))
            .bind((key, value))
            .await?;
        let rows: Vec<InvoiceRow> = result.take(0)?;
        rows.into_iter().map(InvoiceRow::try_into_invoice).collect()
    }
}

impl<C: Connection> InvoiceRepository for SurrealInvoiceRepository<C> {
    async fn create(&self, input: CreateInvoice) -> TutorlyResult<Invoice> {
        let id_str = Uuid::new_v4().to_string();
        let amount_cents = input.rate_cents * i64::from(input.session_count);

        self.db
            .query(
                "CREATE type::record('invoice', $id) SET \
                 invoice_number = $invoice_number, \
                 student_id = $student_id, parent_id = $parent_id, \
                 session_count = $session_count, rate_cents = $rate_cents, \
                 amount_cents = $amount_cents, status = $status, \
                 send_at = $send_at, sent_at = $sent_at, \
                 due_date = $due_date, auto_generated = $auto_generated",
            )
            .bind(("id", id_str.clone()))
            .bind(("invoice_number", input.invoice_number))
            .bind(("student_id", input.student_id.to_string()))
            .bind(("parent_id", input.parent_id.map(|id| id.to_string())))
            .bind(("session_count", input.session_count))
            .bind(("rate_cents", input.rate_cents))
            .bind(("amount_cents", amount_cents))
            .bind(("status", status_to_string(input.status).to_string()))
            .bind(("send_at", input.send_at))
            .bind(("sent_at", input.sent_at))
            .bind(("due_date", codec::date_to_string(input.due_date)))
            .bind(("auto_generated", input.auto_generated))
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(|e| DbError::statement("invoice", e))?;

        Ok(self.fetch_one(id_str).await?)
    }

    async fn get_by_id(&self, id: Uuid) -> TutorlyResult<Invoice> {
        Ok(self.fetch_one(id.to_string()).await?)
    }

    async fn list_by_student(&self, student_id: Uuid) -> TutorlyResult<Vec<Invoice>> {
        let mut result = self
            .db
            .query(&format!(
                "SELECT {SELECT_FIELDS} FROM invoice \
                 WHERE student_id = $student_id ORDER BY created_at ASC"
            ))
            .bind(("student_id", student_id.to_string()))
            .await
            .map_err(DbError::from)?;
        let rows: Vec<InvoiceRow> = result.take(0).map_err(DbError::from)?;

        let items = rows
            .into_iter()
            .map(InvoiceRow::try_into_invoice)
            .collect::<Result<Vec<_>, DbError>>()?;
        Ok(items)
    }

    async fn list_unpaid_sent_before(&self, cutoff: DateTime<Utc>) -> TutorlyResult<Vec<Invoice>> {
        Ok(self
            .fetch_many("status = 'Sent' AND sent_at <= $cutoff", "cutoff", cutoff)
            .await?)
    }

    async fn list_scheduled_due(&self, now: DateTime<Utc>) -> TutorlyResult<Vec<Invoice>> {
        Ok(self
            .fetch_many("status = 'Scheduled' AND send_at <= $now", "now", now)
            .await?)
    }

    async fn mark_sent(&self, id: Uuid, at: DateTime<Utc>) -> TutorlyResult<Invoice> {
        let id_str = id.to_string();

        self.db
            .query(
                "UPDATE type::record('invoice', $id) SET \
                 status = 'Sent', sent_at = $at \
                 WHERE status = 'Scheduled'",
            )
            .bind(("id", id_str.clone()))
            .bind(("at", at))
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(|e| DbError::statement("invoice", e))?;

        Ok(self.fetch_one(id_str).await?)
    }

    async fn mark_paid(&self, id: Uuid, at: DateTime<Utc>) -> TutorlyResult<Invoice> {
        let id_str = id.to_string();

        self.db
            .query(
                "UPDATE type::record('invoice', $id) SET \
                 status = 'Paid', paid_at = $at \
                 WHERE status IN ['Scheduled', 'Sent']",
            )
            .bind(("id", id_str.clone()))
            .bind(("at", at))
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(|e| DbError::statement("invoice", e))?;

        Ok(self.fetch_one(id_str).await?)
    }

    async fn reminded_thresholds(&self, invoice_id: Uuid) -> TutorlyResult<Vec<u32>> {
        let mut result = self
            .db
            .query(
                "SELECT threshold_days FROM invoice_reminder \
                 WHERE invoice_id = $invoice_id ORDER BY threshold_days ASC",
            )
            .bind(("invoice_id", invoice_id.to_string()))
            .await
            .map_err(DbError::from)?;
        let rows: Vec<ThresholdRow> = result.take(0).map_err(DbError::from)?;

        Ok(rows.into_iter().map(|r| r.threshold_days).collect())
    }

    async fn record_reminder(&self, invoice_id: Uuid, threshold_days: u32) -> TutorlyResult<bool> {
        let outcome = self
            .db
            .query(
                "CREATE invoice_reminder SET \
                 invoice_id = $invoice_id, threshold_days = $threshold_days",
            )
            .bind(("invoice_id", invoice_id.to_string()))
            .bind(("threshold_days", threshold_days))
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(|e| DbError::statement("invoice_reminder", e));

        match outcome.map_err(TutorlyError::from) {
            Ok(_) => Ok(true),
            Err(TutorlyError::AlreadyExists { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }
}
