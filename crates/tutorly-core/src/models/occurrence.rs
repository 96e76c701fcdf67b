//! Session occurrence domain model.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::attendee::Attendee;
use super::template::ClassType;
use crate::error::{TutorlyError, TutorlyResult};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OccurrenceStatus {
    Scheduled,
    Completed,
    Cancelled,
    NoShow,
}

impl OccurrenceStatus {
    /// Terminal for automated processes. Only a manual admin
    /// correction may move an occurrence out of these states.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OccurrenceStatus::Scheduled)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OccurrenceSource {
    Generated,
    Manual,
    Rescheduled,
}

/// A validated `[start, end)` pair of absolute instants.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeSlot {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl TimeSlot {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> TutorlyResult<Self> {
        if end <= start {
            return Err(TutorlyError::validation(format!(
                "slot end {end} must be after start {start}"
            )));
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// Re-check the invariant on values that bypassed [`TimeSlot::new`]
    /// (e.g. deserialized payloads).
    pub fn validate(&self) -> TutorlyResult<()> {
        Self::new(self.start, self.end).map(|_| ())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParentFlag {
    pub parent_id: Uuid,
    pub comment: String,
    pub flagged_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Occurrence {
    pub id: Uuid,
    /// Set for generated occurrences (and ones later rescheduled).
    pub template_id: Option<Uuid>,
    pub tutor_id: Uuid,
    pub attendee: Attendee,
    /// Local calendar date of the session in the business time zone.
    pub occurrence_date: NaiveDate,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub status: OccurrenceStatus,
    pub source: OccurrenceSource,
    /// Start instant before the first reschedule.
    pub original_date: Option<DateTime<Utc>>,
    pub subject: String,
    pub class_type: ClassType,
    pub notes: Option<String>,
    pub parent_flag: Option<ParentFlag>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Occurrence {
    pub fn student_id(&self) -> Option<Uuid> {
        self.attendee.student_id()
    }

    pub fn duration_minutes(&self) -> u32 {
        u32::try_from((self.end_at - self.start_at).num_minutes()).unwrap_or(0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOccurrence {
    pub template_id: Option<Uuid>,
    pub tutor_id: Uuid,
    pub attendee: Attendee,
    pub occurrence_date: NaiveDate,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub source: OccurrenceSource,
    pub subject: String,
    pub class_type: ClassType,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UpdateOccurrence {
    pub status: Option<OccurrenceStatus>,
    pub occurrence_date: Option<NaiveDate>,
    pub start_at: Option<DateTime<Utc>>,
    pub end_at: Option<DateTime<Utc>>,
    pub source: Option<OccurrenceSource>,
    pub original_date: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub parent_flag: Option<ParentFlag>,
}
