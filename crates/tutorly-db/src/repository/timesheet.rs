//! SurrealDB implementation of [`TimesheetRepository`].
//!
//! `link_key` carries a UNIQUE index: the occurrence id for linked
//! entries, so an occurrence can never be logged twice.

use chrono::{DateTime, Utc};
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use tutorly_core::error::TutorlyResult;
use tutorly_core::models::timesheet::{CreateTimesheet, Timesheet};
use tutorly_core::repository::TimesheetRepository;
use uuid::Uuid;

use crate::codec;
use crate::error::DbError;

#[derive(Debug, SurrealValue)]
struct TimesheetRow {
    record_id: String,
    occurrence_id: Option<String>,
    tutor_id: String,
    student_id: String,
    session_date: String,
    start_at: DateTime<Utc>,
    end_at: DateTime<Utc>,
    duration_minutes: u32,
    subject: String,
    created_at: DateTime<Utc>,
}

impl TimesheetRow {
    fn try_into_timesheet(self) -> Result<Timesheet, DbError> {
        Ok(Timesheet {
            id: codec::parse_uuid("id", &self.record_id)?,
            occurrence_id: codec::parse_opt_uuid("occurrence_id", self.occurrence_id.as_deref())?,
            tutor_id: codec::parse_uuid("tutor_id", &self.tutor_id)?,
            student_id: codec::parse_uuid("student_id", &self.student_id)?,
            session_date: codec::parse_date("session_date", &self.session_date)?,
            start_at: self.start_at,
            end_at: self.end_at,
            duration_minutes: self.duration_minutes,
            subject: self.subject,
            created_at: self.created_at,
        })
    }
}

const SELECT_FIELDS: &str = "meta::id(id) AS record_id, *";

/// SurrealDB implementation of the timesheet repository.
#[derive(Clone)]
pub struct SurrealTimesheetRepository<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealTimesheetRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }
}

impl<C: Connection> TimesheetRepository for SurrealTimesheetRepository<C> {
    async fn create(&self, input: CreateTimesheet) -> TutorlyResult<Timesheet> {
        let id_str = Uuid::new_v4().to_string();
        let link_key = match input.occurrence_id {
            Some(occurrence_id) => occurrence_id.to_string(),
            None => format!("unlinked:{id_str}"),
        };

        self.db
            .query(
                "CREATE type::record('timesheet', $id) SET \
                 occurrence_id = $occurrence_id, link_key = $link_key, \
                 tutor_id = $tutor_id, student_id = $student_id, \
                 session_date = $session_date, \
                 start_at = $start_at, end_at = $end_at, \
                 duration_minutes = $duration_minutes, subject = $subject",
            )
            .bind(("id", id_str.clone()))
            .bind(("occurrence_id", input.occurrence_id.map(|id| id.to_string())))
            .bind(("link_key", link_key))
            .bind(("tutor_id", input.tutor_id.to_string()))
            .bind(("student_id", input.student_id.to_string()))
            .bind(("session_date", codec::date_to_string(input.session_date)))
            .bind(("start_at", input.start_at))
            .bind(("end_at", input.end_at))
            .bind(("duration_minutes", input.duration_minutes))
            .bind(("subject", input.subject))
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(|e| DbError::statement("timesheet", e))?;

        let mut result = self
            .db
            .query(&format!(
                "SELECT {SELECT_FIELDS} FROM type::record('timesheet', $id)"
            ))
            .bind(("id", id_str.clone()))
            .await
            .map_err(DbError::from)?;
        let rows: Vec<TimesheetRow> = result.take(0).map_err(DbError::from)?;

        Ok(rows
            .into_iter()
            .next()
            .ok_or_else(|| DbError::not_found("timesheet", id_str))?
            .try_into_timesheet()?)
    }

    async fn get_by_occurrence(&self, occurrence_id: Uuid) -> TutorlyResult<Option<Timesheet>> {
        let mut result = self
            .db
            .query(&format!(
                "SELECT {SELECT_FIELDS} FROM timesheet \
                 WHERE occurrence_id = $occurrence_id LIMIT 1"
            ))
            .bind(("occurrence_id", occurrence_id.to_string()))
            .await
            .map_err(DbError::from)?;
        let rows: Vec<TimesheetRow> = result.take(0).map_err(DbError::from)?;

        Ok(rows
            .into_iter()
            .next()
            .map(TimesheetRow::try_into_timesheet)
            .transpose()?)
    }
}
