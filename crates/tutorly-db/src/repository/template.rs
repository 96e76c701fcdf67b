//! SurrealDB implementation of [`TemplateRepository`].

use chrono::{DateTime, Utc};
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use tutorly_core::error::TutorlyResult;
use tutorly_core::models::template::{CreateTemplate, RecurringTemplate, UpdateTemplate};
use tutorly_core::repository::TemplateRepository;
use uuid::Uuid;

use crate::codec;
use crate::error::DbError;

/// DB-side row struct that includes the record ID via `meta::id(id)`.
#[derive(Debug, SurrealValue)]
struct TemplateRow {
    record_id: String,
    tutor_id: String,
    attendee_kind: String,
    attendee_id: String,
    weekday: String,
    start_time: String,
    duration_minutes: u32,
    subject: String,
    class_type: String,
    effective_from: String,
    active: bool,
    created_by: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TemplateRow {
    fn try_into_template(self) -> Result<RecurringTemplate, DbError> {
        Ok(RecurringTemplate {
            id: codec::parse_uuid("id", &self.record_id)?,
            tutor_id: codec::parse_uuid("tutor_id", &self.tutor_id)?,
            attendee: codec::parse_attendee(&self.attendee_kind, &self.attendee_id)?,
            weekday: codec::parse_weekday(&self.weekday)?,
            start_time: codec::parse_time("start_time", &self.start_time)?,
            duration_minutes: self.duration_minutes,
            subject: self.subject,
            class_type: codec::parse_class_type(&self.class_type)?,
            effective_from: codec::parse_date("effective_from", &self.effective_from)?,
            active: self.active,
            created_by: codec::parse_uuid("created_by", &self.created_by)?,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

const SELECT_FIELDS: &str = "meta::id(id) AS record_id, *";

/// SurrealDB implementation of the template repository.
#[derive(Clone)]
pub struct SurrealTemplateRepository<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealTemplateRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }

    async fn fetch_one(&self, id_str: String) -> Result<RecurringTemplate, DbError> {
        let mut result = self
            .db
            .query(&format!(
                "SELECT {SELECT_FIELDS} FROM type::record('session_template', $id)"
            ))
            .bind(("id", id_str.clone()))
            .await?;

        let rows: Vec<TemplateRow> = result.take(0)?;
        rows.into_iter()
            .next()
            .ok_or_else(|| DbError::not_found("session_template", id_str))?
            .try_into_template()
    }

    async fn fetch_many(
        &self,
        filter: &str,
        binding: Option<(&'static str, String)>,
    ) -> Result<Vec<RecurringTemplate>, DbError> {
        let query = format!(
            "SELECT {SELECT_FIELDS} FROM session_template WHERE {filter} \
             ORDER BY created_at ASC"
        );
        let mut builder = self.db.query(&query);
        if let Some(binding) = binding {
            builder = builder.bind(binding);
        }
        let mut result = builder.await?;
        let rows: Vec<TemplateRow> = result.take(0)?;
        rows.into_iter().map(TemplateRow::try_into_template).collect()
    }
}

impl<C: Connection> TemplateRepository for SurrealTemplateRepository<C> {
    async fn create(&self, input: CreateTemplate) -> TutorlyResult<RecurringTemplate> {
        let id = Uuid::new_v4();
        let id_str = id.to_string();
        let (attendee_kind, attendee_id) = codec::attendee_columns(input.attendee);

        self.db
            .query(
                "CREATE type::record('session_template', $id) SET \
                 tutor_id = $tutor_id, \
                 attendee_kind = $attendee_kind, attendee_id = $attendee_id, \
                 weekday = $weekday, start_time = $start_time, \
                 duration_minutes = $duration_minutes, \
                 subject = $subject, class_type = $class_type, \
                 effective_from = $effective_from, active = true, \
                 created_by = $created_by",
            )
            .bind(("id", id_str.clone()))
            .bind(("tutor_id", input.tutor_id.to_string()))
            .bind(("attendee_kind", attendee_kind.to_string()))
            .bind(("attendee_id", attendee_id))
            .bind(("weekday", codec::weekday_to_string(input.weekday)))
            .bind(("start_time", codec::time_to_string(input.start_time)))
            .bind(("duration_minutes", input.duration_minutes))
            .bind(("subject", input.subject))
            .bind((
                "class_type",
                codec::class_type_to_string(input.class_type).to_string(),
            ))
            .bind(("effective_from", codec::date_to_string(input.effective_from)))
            .bind(("created_by", input.created_by.to_string()))
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(|e| DbError::statement("session_template", e))?;

        Ok(self.fetch_one(id_str).await?)
    }

    async fn get_by_id(&self, id: Uuid) -> TutorlyResult<RecurringTemplate> {
        Ok(self.fetch_one(id.to_string()).await?)
    }

    async fn update(&self, id: Uuid, input: UpdateTemplate) -> TutorlyResult<RecurringTemplate> {
        let id_str = id.to_string();

        let mut sets = Vec::new();
        if input.tutor_id.is_some() {
            sets.push("tutor_id = $tutor_id");
        }
        if input.weekday.is_some() {
            sets.push("weekday = $weekday");
        }
        if input.start_time.is_some() {
            sets.push("start_time = $start_time");
        }
        if input.duration_minutes.is_some() {
            sets.push("duration_minutes = $duration_minutes");
        }
        if input.subject.is_some() {
            sets.push("subject = $subject");
        }
        if input.class_type.is_some() {
            sets.push("class_type = $class_type");
        }
        if input.effective_from.is_some() {
            sets.push("effective_from = $effective_from");
        }
        sets.push("updated_at = time::now()");

        let query = format!(
            "UPDATE type::record('session_template', $id) SET {}",
            sets.join(", ")
        );

        let mut builder = self.db.query(&query).bind(("id", id_str.clone()));
        if let Some(tutor_id) = input.tutor_id {
            builder = builder.bind(("tutor_id", tutor_id.to_string()));
        }
        if let Some(weekday) = input.weekday {
            builder = builder.bind(("weekday", codec::weekday_to_string(weekday)));
        }
        if let Some(start_time) = input.start_time {
            builder = builder.bind(("start_time", codec::time_to_string(start_time)));
        }
        if let Some(duration_minutes) = input.duration_minutes {
            builder = builder.bind(("duration_minutes", duration_minutes));
        }
        if let Some(subject) = input.subject {
            builder = builder.bind(("subject", subject));
        }
        if let Some(class_type) = input.class_type {
            builder = builder.bind((
                "class_type",
                codec::class_type_to_string(class_type).to_string(),
            ));
        }
        if let Some(effective_from) = input.effective_from {
            builder = builder.bind(("effective_from", codec::date_to_string(effective_from)));
        }

        builder
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(|e| DbError::statement("session_template", e))?;

        Ok(self.fetch_one(id_str).await?)
    }

    async fn set_active(&self, id: Uuid, active: bool) -> TutorlyResult<RecurringTemplate> {
        let id_str = id.to_string();

        self.db
            .query(
                "UPDATE type::record('session_template', $id) SET \
                 active = $active, updated_at = time::now()",
            )
            .bind(("id", id_str.clone()))
            .bind(("active", active))
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(|e| DbError::statement("session_template", e))?;

        Ok(self.fetch_one(id_str).await?)
    }

    async fn list_active(&self) -> TutorlyResult<Vec<RecurringTemplate>> {
        Ok(self.fetch_many("active = true", None).await?)
    }

    async fn list_by_student(&self, student_id: Uuid) -> TutorlyResult<Vec<RecurringTemplate>> {
        Ok(self
            .fetch_many(
                "attendee_kind = 'Student' AND attendee_id = $student_id",
                Some(("student_id", student_id.to_string())),
            )
            .await?)
    }
}
