//! SurrealDB implementation of [`InvoiceAlertRepository`].

use chrono::{DateTime, Utc};
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use tutorly_core::error::TutorlyResult;
use tutorly_core::models::alert::{CreateInvoicePaymentAlert, Dismissal, InvoicePaymentAlert};
use tutorly_core::repository::InvoiceAlertRepository;
use uuid::Uuid;

use crate::codec;
use crate::error::DbError;

#[derive(Debug, SurrealValue)]
struct InvoiceAlertRow {
    record_id: String,
    invoice_id: String,
    student_id: String,
    parent_id: Option<String>,
    due_date: String,
    sent_at: DateTime<Utc>,
    status: String,
    resolved_at: Option<DateTime<Utc>>,
    dismissed_by: Option<String>,
    dismissal_reason: Option<String>,
    dismissed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

#[derive(Debug, SurrealValue)]
struct StatusRow {
    #[allow(dead_code)]
    status: String,
}

impl InvoiceAlertRow {
    fn try_into_alert(self) -> Result<InvoicePaymentAlert, DbError> {
        Ok(InvoicePaymentAlert {
            id: codec::parse_uuid("id", &self.record_id)?,
            invoice_id: codec::parse_uuid("invoice_id", &self.invoice_id)?,
            student_id: codec::parse_uuid("student_id", &self.student_id)?,
            parent_id: codec::parse_opt_uuid("parent_id", self.parent_id.as_deref())?,
            due_date: codec::parse_date("due_date", &self.due_date)?,
            sent_at: self.sent_at,
            status: codec::parse_alert_status(&self.status)?,
            resolved_at: self.resolved_at,
            dismissal: codec::parse_dismissal(
                self.dismissed_by.as_deref(),
                self.dismissal_reason,
                self.dismissed_at,
            )?,
            created_at: self.created_at,
        })
    }
}

const SELECT_FIELDS: &str = "meta::id(id) AS record_id, *";

/// SurrealDB implementation of the invoice payment alert repository.
#[derive(Clone)]
pub struct SurrealInvoiceAlertRepository<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealInvoiceAlertRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }

    async fn fetch_one(&self, id_str: String) -> Result<InvoicePaymentAlert, DbError> {
        let mut result = self
            .db
            .query(&format!(
                "SELECT {SELECT_FIELDS} FROM type::record('invoice_alert', $id)"
            ))
            .bind(("id", id_str.clone()))
            .await?;

        let rows: Vec<InvoiceAlertRow> = result.take(0)?;
        rows.into_iter()
            .next()
            .ok_or_else(|| DbError::not_found("invoice_alert", id_str))?
            .try_into_alert()
    }
}

impl<C: Connection> InvoiceAlertRepository for SurrealInvoiceAlertRepository<C> {
    async fn create(&self, input: CreateInvoicePaymentAlert) -> TutorlyResult<InvoicePaymentAlert> {
        let id_str = Uuid::new_v4().to_string();

        self.db
            .query(
                "CREATE type::record('invoice_alert', $id) SET \
                 invoice_id = $invoice_id, student_id = $student_id, \
                 parent_id = $parent_id, due_date = $due_date, \
                 sent_at = $sent_at, status = 'Pending'",
            )
            .bind(("id", id_str.clone()))
            .bind(("invoice_id", input.invoice_id.to_string()))
            .bind(("student_id", input.student_id.to_string()))
            .bind(("parent_id", input.parent_id.map(|id| id.to_string())))
            .bind(("due_date", codec::date_to_string(input.due_date)))
            .bind(("sent_at", input.sent_at))
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(|e| DbError::statement("invoice_alert", e))?;

        Ok(self.fetch_one(id_str).await?)
    }

    async fn get_by_invoice(&self, invoice_id: Uuid) -> TutorlyResult<Option<InvoicePaymentAlert>> {
        let mut result = self
            .db
            .query(&format!(
                "SELECT {SELECT_FIELDS} FROM invoice_alert \
                 WHERE invoice_id = $invoice_id LIMIT 1"
            ))
            .bind(("invoice_id", invoice_id.to_string()))
            .await
            .map_err(DbError::from)?;
        let rows: Vec<InvoiceAlertRow> = result.take(0).map_err(DbError::from)?;

        Ok(rows
            .into_iter()
            .next()
            .map(InvoiceAlertRow::try_into_alert)
            .transpose()?)
    }

    async fn get_by_id(&self, id: Uuid) -> TutorlyResult<InvoicePaymentAlert> {
        Ok(self.fetch_one(id.to_string()).await?)
    }

    async fn list_pending(&self) -> TutorlyResult<Vec<InvoicePaymentAlert>> {
        let mut result = self
            .db
            .query(&format!(
                "SELECT {SELECT_FIELDS} FROM invoice_alert \
                 WHERE status = 'Pending' ORDER BY sent_at ASC"
            ))
            .await
            .map_err(DbError::from)?;
        let rows: Vec<InvoiceAlertRow> = result.take(0).map_err(DbError::from)?;

        let items = rows
            .into_iter()
            .map(InvoiceAlertRow::try_into_alert)
            .collect::<Result<Vec<_>, DbError>>()?;
        Ok(items)
    }

    async fn resolve(&self, id: Uuid, at: DateTime<Utc>) -> TutorlyResult<InvoicePaymentAlert> {
        let id_str = id.to_string();

        let mut result = self
            .db
            .query(
                "UPDATE type::record('invoice_alert', $id) SET \
                 status = 'Resolved', resolved_at = $at \
                 WHERE status = 'Pending' RETURN AFTER",
            )
            .bind(("id", id_str.clone()))
            .bind(("at", at))
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(|e| DbError::statement("invoice_alert", e))?;

        let updated: Vec<StatusRow> = result.take(0).map_err(DbError::from)?;
        if updated.is_empty() {
            return Err(DbError::not_found("pending invoice_alert", id_str).into());
        }
        Ok(self.fetch_one(id_str).await?)
    }

    async fn dismiss(&self, id: Uuid, dismissal: Dismissal) -> TutorlyResult<InvoicePaymentAlert> {
        let id_str = id.to_string();

        let mut result = self
            .db
            .query(
                "UPDATE type::record('invoice_alert', $id) SET \
                 status = 'Dismissed', dismissed_by = $dismissed_by, \
                 dismissal_reason = $reason, dismissed_at = $at \
                 WHERE status = 'Pending' RETURN AFTER",
            )
            .bind(("id", id_str.clone()))
            .bind(("dismissed_by", dismissal.dismissed_by.map(|id| id.to_string())))
            .bind(("reason", dismissal.reason))
            .bind(("at", dismissal.dismissed_at))
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(|e| DbError::statement("invoice_alert", e))?;

        let updated: Vec<StatusRow> = result.take(0).map_err(DbError::from)?;
        if updated.is_empty() {
            return Err(DbError::not_found("pending invoice_alert", id_str).into());
        }
        Ok(self.fetch_one(id_str).await?)
    }
}
