//! Timesheet entry: a logged, billable tutoring session.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Timesheet {
    pub id: Uuid,
    /// At most one timesheet links to a given occurrence.
    pub occurrence_id: Option<Uuid>,
    pub tutor_id: Uuid,
    pub student_id: Uuid,
    pub session_date: NaiveDate,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub duration_minutes: u32,
    pub subject: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTimesheet {
    pub occurrence_id: Option<Uuid>,
    pub tutor_id: Uuid,
    pub student_id: Uuid,
    pub session_date: NaiveDate,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub duration_minutes: u32,
    pub subject: String,
}
