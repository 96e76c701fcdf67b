//! Invoice domain model.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    /// Created but held until `send_at`.
    Scheduled,
    Sent,
    Paid,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invoice {
    pub id: Uuid,
    pub invoice_number: String,
    pub student_id: Uuid,
    pub parent_id: Option<Uuid>,
    pub session_count: u32,
    pub rate_cents: i64,
    pub amount_cents: i64,
    pub status: InvoiceStatus,
    pub send_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub due_date: NaiveDate,
    pub paid_at: Option<DateTime<Utc>>,
    pub auto_generated: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateInvoice {
    pub invoice_number: String,
    pub student_id: Uuid,
    pub parent_id: Option<Uuid>,
    pub session_count: u32,
    pub rate_cents: i64,
    pub status: InvoiceStatus,
    pub send_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub due_date: NaiveDate,
    pub auto_generated: bool,
}
