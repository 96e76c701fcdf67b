//! SurrealDB implementation of [`LoggingAlertRepository`].
//!
//! One alert per occurrence, enforced by a UNIQUE index on
//! `occurrence_id`: a second create for the same session fails with
//! `AlreadyExists` whatever the first alert's status.

use chrono::{DateTime, Utc};
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use tutorly_core::error::TutorlyResult;
use tutorly_core::models::alert::{CreateSessionLoggingAlert, Dismissal, SessionLoggingAlert};
use tutorly_core::repository::LoggingAlertRepository;
use uuid::Uuid;

use crate::codec;
use crate::error::DbError;

#[derive(Debug, SurrealValue)]
struct LoggingAlertRow {
    record_id: String,
    occurrence_id: String,
    tutor_id: String,
    student_id: Option<String>,
    session_end: DateTime<Utc>,
    status: String,
    timesheet_id: Option<String>,
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

impl LoggingAlertRow {
    fn try_into_alert(self) -> Result<SessionLoggingAlert, DbError> {
        Ok(SessionLoggingAlert {
            id: codec::parse_uuid("id", &self.record_id)?,
            occurrence_id: codec::parse_uuid("occurrence_id", &self.occurrence_id)?,
            tutor_id: codec::parse_uuid("tutor_id", &self.tutor_id)?,
            student_id: codec::parse_opt_uuid("student_id", self.student_id.as_deref())?,
            session_end: self.session_end,
            status: codec::parse_alert_status(&self.status)?,
            timesheet_id: codec::parse_opt_uuid("timesheet_id", self.timesheet_id.as_deref())?,
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

/// SurrealDB implementation of the session logging alert repository.
#[derive(Clone)]
pub struct SurrealLoggingAlertRepository<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealLoggingAlertRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }

    async fn fetch_one(&self, id_str: String) -> Result<SessionLoggingAlert, DbError> {
        let mut result = self
            .db
            .query(&format!(
                "SELECT {SELECT_FIELDS} FROM type::record('logging_alert', $id)"
            ))
            .bind(("id", id_str.clone()))
            .await?;

        let rows: Vec<LoggingAlertRow> = result.take(0)?;
        rows.into_iter()
            .next()
            .ok_or_else(|| DbError::not_found("logging_alert", id_str))?
            .try_into_alert()
    }
}

impl<C: Connection> LoggingAlertRepository for SurrealLoggingAlertRepository<C> {
    async fn create(&self, input: CreateSessionLoggingAlert) -> TutorlyResult<SessionLoggingAlert> {
        let id_str = Uuid::new_v4().to_string();

        self.db
            .query(
                "CREATE type::record('logging_alert', $id) SET \
                 occurrence_id = $occurrence_id, tutor_id = $tutor_id, \
                 student_id = $student_id, session_end = $session_end, \
                 status = 'Pending'",
            )
            .bind(("id", id_str.clone()))
            .bind(("occurrence_id", input.occurrence_id.to_string()))
            .bind(("tutor_id", input.tutor_id.to_string()))
            .bind(("student_id", input.student_id.map(|id| id.to_string())))
            .bind(("session_end", input.session_end))
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(|e| DbError::statement("logging_alert", e))?;

        Ok(self.fetch_one(id_str).await?)
    }

    async fn get_by_occurrence(
        &self,
        occurrence_id: Uuid,
    ) -> TutorlyResult<Option<SessionLoggingAlert>> {
        let mut result = self
            .db
            .query(&format!(
                "SELECT {SELECT_FIELDS} FROM logging_alert \
                 WHERE occurrence_id = $occurrence_id LIMIT 1"
            ))
            .bind(("occurrence_id", occurrence_id.to_string()))
            .await
            .map_err(DbError::from)?;
        let rows: Vec<LoggingAlertRow> = result.take(0).map_err(DbError::from)?;

        Ok(rows
            .into_iter()
            .next()
            .map(LoggingAlertRow::try_into_alert)
            .transpose()?)
    }

    async fn get_by_id(&self, id: Uuid) -> TutorlyResult<SessionLoggingAlert> {
        Ok(self.fetch_one(id.to_string()).await?)
    }

    async fn list_pending(&self) -> TutorlyResult<Vec<SessionLoggingAlert>> {
        let mut result = self
            .db
            .query(&format!(
                "SELECT {SELECT_FIELDS} FROM logging_alert \
                 WHERE status = 'Pending' ORDER BY session_end ASC"
            ))
            .await
            .map_err(DbError::from)?;
        let rows: Vec<LoggingAlertRow> = result.take(0).map_err(DbError::from)?;

        let items = rows
            .into_iter()
            .map(LoggingAlertRow::try_into_alert)
            .collect::<Result<Vec<_>, DbError>>()?;
        Ok(items)
    }

    async fn resolve(
        &self,
        id: Uuid,
        timesheet_id: Uuid,
        at: DateTime<Utc>,
    ) -> TutorlyResult<SessionLoggingAlert> {
        let id_str = id.to_string();

        let mut result = self
            .db
            .query(
                "UPDATE type::record('logging_alert', $id) SET \
                 status = 'Resolved', timesheet_id = $timesheet_id, \
                 resolved_at = $at \
                 WHERE status = 'Pending' RETURN AFTER",
            )
            .bind(("id", id_str.clone()))
            .bind(("timesheet_id", timesheet_id.to_string()))
            .bind(("at", at))
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(|e| DbError::statement("logging_alert", e))?;

        let updated: Vec<StatusRow> = result.take(0).map_err(DbError::from)?;
        if updated.is_empty() {
            return Err(DbError::not_found("pending logging_alert", id_str).into());
        }
        Ok(self.fetch_one(id_str).await?)
    }

    async fn dismiss(&self, id: Uuid, dismissal: Dismissal) -> TutorlyResult<SessionLoggingAlert> {
        let id_str = id.to_string();

        let mut result = self
            .db
            .query(
                "UPDATE type::record('logging_alert', $id) SET \
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
            .map_err(|e| DbError::statement("logging_alert", e))?;

        let updated: Vec<StatusRow> = result.take(0).map_err(DbError::from)?;
        if updated.is_empty() {
            return Err(DbError::not_found("pending logging_alert", id_str).into());
        }
        Ok(self.fetch_one(id_str).await?)
    }
}
