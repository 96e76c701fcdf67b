//! Change request domain model.
//!
//! A parent or tutor proposes to cancel or reschedule a session; an
//! admin decides. The proposal is a tagged variant per request type so
//! that a cancel can never carry reschedule fields and vice versa.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::occurrence::TimeSlot;
use crate::error::{TutorlyError, TutorlyResult};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RequesterType {
    Parent,
    Tutor,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum Requester {
    Parent(Uuid),
    Tutor(Uuid),
}

impl Requester {
    pub fn id(&self) -> Uuid {
        match self {
            Requester::Parent(id) | Requester::Tutor(id) => *id,
        }
    }

    pub fn requester_type(&self) -> RequesterType {
        match self {
            Requester::Parent(_) => RequesterType::Parent,
            Requester::Tutor(_) => RequesterType::Tutor,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RequestType {
    Cancel,
    Reschedule,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChangeProposal {
    Cancel {
        reason: Option<String>,
    },
    /// `slot` is absent when the requester only described the desired
    /// time in `message` for the admin to interpret.
    Reschedule {
        slot: Option<TimeSlot>,
        message: Option<String>,
        reason: Option<String>,
    },
}

impl ChangeProposal {
    pub fn cancel(reason: Option<String>) -> Self {
        ChangeProposal::Cancel { reason }
    }

    pub fn reschedule_to(slot: TimeSlot, reason: Option<String>) -> Self {
        ChangeProposal::Reschedule {
            slot: Some(slot),
            message: None,
            reason,
        }
    }

    pub fn reschedule_with_message(message: impl Into<String>, reason: Option<String>) -> Self {
        ChangeProposal::Reschedule {
            slot: None,
            message: Some(message.into()),
            reason,
        }
    }

    pub fn request_type(&self) -> RequestType {
        match self {
            ChangeProposal::Cancel { .. } => RequestType::Cancel,
            ChangeProposal::Reschedule { .. } => RequestType::Reschedule,
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            ChangeProposal::Cancel { reason } | ChangeProposal::Reschedule { reason, .. } => {
                reason.as_deref()
            }
        }
    }

    pub fn proposed_slot(&self) -> Option<TimeSlot> {
        match self {
            ChangeProposal::Reschedule { slot, .. } => *slot,
            ChangeProposal::Cancel { .. } => None,
        }
    }

    /// Structural validation, run before anything is persisted.
    pub fn validate(&self) -> TutorlyResult<()> {
        match self {
            ChangeProposal::Cancel { .. } => Ok(()),
            ChangeProposal::Reschedule { slot, message, .. } => {
                if let Some(slot) = slot {
                    return slot.validate();
                }
                let has_message = message.as_deref().is_some_and(|m| !m.trim().is_empty());
                if has_message {
                    Ok(())
                } else {
                    Err(TutorlyError::validation(
                        "a reschedule request needs either a proposed slot or a message",
                    ))
                }
            }
        }
    }
}

/// Binding outcome of an admin decision.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    Approved,
    Rejected,
}

/// Request status. `Acknowledged` is a soft, non-binding marker kept
/// for legacy clients; only `Resolved` closes a request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "state", content = "resolution", rename_all = "snake_case")]
pub enum ChangeRequestStatus {
    Pending,
    Acknowledged,
    Resolved(Resolution),
}

impl ChangeRequestStatus {
    pub fn is_open(&self) -> bool {
        !matches!(self, ChangeRequestStatus::Resolved(_))
    }
}

/// An admin's decision on an open request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    /// `override_slot` is used for reschedule requests that did not
    /// carry explicit proposed instants.
    Approve { override_slot: Option<TimeSlot> },
    Reject,
}

impl Decision {
    pub fn approve() -> Self {
        Decision::Approve {
            override_slot: None,
        }
    }

    pub fn resolution(&self) -> Resolution {
        match self {
            Decision::Approve { .. } => Resolution::Approved,
            Decision::Reject => Resolution::Rejected,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeRequest {
    pub id: Uuid,
    pub occurrence_id: Uuid,
    pub requester: Requester,
    pub proposal: ChangeProposal,
    /// Occurrence start at the time the request was submitted.
    pub original_date: DateTime<Utc>,
    pub status: ChangeRequestStatus,
    pub admin_notes: Option<String>,
    pub processed_by: Option<Uuid>,
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateChangeRequest {
    pub occurrence_id: Uuid,
    pub requester: Requester,
    pub proposal: ChangeProposal,
    pub original_date: DateTime<Utc>,
}

/// Status change recorded by an admin. Applied only while the request
/// is still open.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordDecision {
    pub status: ChangeRequestStatus,
    pub admin_notes: Option<String>,
    pub processed_by: Uuid,
    pub processed_at: DateTime<Utc>,
}
