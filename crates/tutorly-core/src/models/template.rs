//! Recurring session template domain model.
//!
//! A template is a single weekday + wall-clock start time + duration
//! rule. Wall-clock times are resolved to absolute instants using the
//! business UTC offset at generation time.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::attendee::Attendee;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ClassType {
    OneToOne,
    Group,
    Online,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecurringTemplate {
    pub id: Uuid,
    pub tutor_id: Uuid,
    pub attendee: Attendee,
    pub weekday: Weekday,
    /// Local wall-clock start time in the business time zone.
    pub start_time: NaiveTime,
    pub duration_minutes: u32,
    pub subject: String,
    pub class_type: ClassType,
    /// First date on which the template may produce an occurrence.
    pub effective_from: NaiveDate,
    pub active: bool,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTemplate {
    pub tutor_id: Uuid,
    pub attendee: Attendee,
    pub weekday: Weekday,
    pub start_time: NaiveTime,
    pub duration_minutes: u32,
    pub subject: String,
    pub class_type: ClassType,
    pub effective_from: NaiveDate,
    pub created_by: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UpdateTemplate {
    pub tutor_id: Option<Uuid>,
    pub weekday: Option<Weekday>,
    pub start_time: Option<NaiveTime>,
    pub duration_minutes: Option<u32>,
    pub subject: Option<String>,
    pub class_type: Option<ClassType>,
    pub effective_from: Option<NaiveDate>,
}

impl UpdateTemplate {
    /// True when the edit changes when or with whom future sessions
    /// happen, which invalidates already-generated future occurrences.
    pub fn changes_schedule(&self) -> bool {
        self.tutor_id.is_some()
            || self.weekday.is_some()
            || self.start_time.is_some()
            || self.duration_minutes.is_some()
            || self.effective_from.is_some()
    }
}
