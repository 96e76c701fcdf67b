//! Scheduling error types.

use thiserror::Error;
use tutorly_core::error::TutorlyError;
use tutorly_core::models::occurrence::OccurrenceStatus;

#[derive(Debug, Error)]
pub enum SchedulingError {
    #[error("cannot move occurrence from {from:?} to {to:?}")]
    InvalidTransition {
        from: OccurrenceStatus,
        to: OccurrenceStatus,
    },

    #[error("occurrence is {0:?}; only scheduled sessions can be changed")]
    NotScheduled(OccurrenceStatus),

    #[error("change request has already been decided")]
    RequestClosed,

    #[error("alert is no longer pending")]
    AlertClosed,

    #[error("the occurrence referenced by this request no longer exists")]
    OccurrenceGone,

    #[error("an open change request already exists for this occurrence")]
    OpenRequestExists,

    #[error("requester does not own this session")]
    NotOwner,

    #[error("reschedule approval needs proposed instants or an override slot")]
    MissingRescheduleSlot,

    #[error("horizon {requested} is beyond the allowed maximum {max}")]
    HorizonTooFar {
        requested: chrono::NaiveDate,
        max: chrono::NaiveDate,
    },

    #[error("template is inactive")]
    TemplateInactive,

    #[error("a non-empty {0} is required")]
    MissingText(&'static str),

    #[error("invalid scheduling configuration: {0}")]
    InvalidConfig(String),
}

impl From<SchedulingError> for TutorlyError {
    fn from(err: SchedulingError) -> Self {
        match err {
            SchedulingError::InvalidTransition { .. }
            | SchedulingError::NotScheduled(_)
            | SchedulingError::RequestClosed
            | SchedulingError::AlertClosed
            | SchedulingError::OccurrenceGone
            | SchedulingError::OpenRequestExists
            | SchedulingError::TemplateInactive => TutorlyError::Conflict {
                reason: err.to_string(),
            },
            SchedulingError::NotOwner => TutorlyError::AuthorizationDenied {
                reason: err.to_string(),
            },
            SchedulingError::MissingRescheduleSlot
            | SchedulingError::HorizonTooFar { .. }
            | SchedulingError::MissingText(_)
            | SchedulingError::InvalidConfig(_) => TutorlyError::Validation {
                message: err.to_string(),
            },
        }
    }
}
