//! Compliance alert domain models.
//!
//! Both alert kinds follow the same pattern: a scan creates the alert
//! if none exists, and it later leaves `Pending` exactly once, either
//! resolved automatically or dismissed.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    Pending,
    Resolved,
    Dismissed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Dismissal {
    /// `None` when the engine dismissed the alert itself.
    pub dismissed_by: Option<Uuid>,
    pub reason: String,
    pub dismissed_at: DateTime<Utc>,
}

/// A session that ended without a timesheet being logged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionLoggingAlert {
    pub id: Uuid,
    pub occurrence_id: Uuid,
    pub tutor_id: Uuid,
    pub student_id: Option<Uuid>,
    pub session_end: DateTime<Utc>,
    pub status: AlertStatus,
    pub timesheet_id: Option<Uuid>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub dismissal: Option<Dismissal>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSessionLoggingAlert {
    pub occurrence_id: Uuid,
    pub tutor_id: Uuid,
    pub student_id: Option<Uuid>,
    pub session_end: DateTime<Utc>,
}

/// An invoice sent but still unpaid after the grace window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoicePaymentAlert {
    pub id: Uuid,
    pub invoice_id: Uuid,
    pub student_id: Uuid,
    pub parent_id: Option<Uuid>,
    pub due_date: NaiveDate,
    pub sent_at: DateTime<Utc>,
    pub status: AlertStatus,
    pub resolved_at: Option<DateTime<Utc>>,
    pub dismissal: Option<Dismissal>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateInvoicePaymentAlert {
    pub invoice_id: Uuid,
    pub student_id: Uuid,
    pub parent_id: Option<Uuid>,
    pub due_date: NaiveDate,
    pub sent_at: DateTime<Utc>,
}
