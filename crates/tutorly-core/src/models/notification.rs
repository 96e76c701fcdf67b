//! Notification requests handed to the external delivery service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "role", content = "id", rename_all = "snake_case")]
pub enum Recipient {
    Parent(Uuid),
    Tutor(Uuid),
    Admin(Uuid),
}

impl Recipient {
    pub fn id(&self) -> Uuid {
        match self {
            Recipient::Parent(id) | Recipient::Tutor(id) | Recipient::Admin(id) => *id,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    ChangeRequestApproved,
    ChangeRequestRejected,
    SessionChangedByParentRequest,
    SessionLoggingOverdue,
    InvoiceIssued,
    PaymentOverdue,
    PaymentReminder,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::ChangeRequestApproved => "change_request_approved",
            NotificationKind::ChangeRequestRejected => "change_request_rejected",
            NotificationKind::SessionChangedByParentRequest => "session_changed_by_parent_request",
            NotificationKind::SessionLoggingOverdue => "session_logging_overdue",
            NotificationKind::InvoiceIssued => "invoice_issued",
            NotificationKind::PaymentOverdue => "payment_overdue",
            NotificationKind::PaymentReminder => "payment_reminder",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "change_request_approved" => NotificationKind::ChangeRequestApproved,
            "change_request_rejected" => NotificationKind::ChangeRequestRejected,
            "session_changed_by_parent_request" => {
                NotificationKind::SessionChangedByParentRequest
            }
            "session_logging_overdue" => NotificationKind::SessionLoggingOverdue,
            "invoice_issued" => NotificationKind::InvoiceIssued,
            "payment_overdue" => NotificationKind::PaymentOverdue,
            "payment_reminder" => NotificationKind::PaymentReminder,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateNotification {
    pub recipient: Recipient,
    pub kind: NotificationKind,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub recipient: Recipient,
    pub kind: NotificationKind,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}
