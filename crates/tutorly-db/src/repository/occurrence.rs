//! SurrealDB implementation of [`OccurrenceRepository`].
//!
//! Every row carries a `slot_key` with a UNIQUE index. Generated rows
//! use `<template>:<date>` so a template can never hold two occurrences
//! for the same generated date, even if two generation passes race.

use chrono::{DateTime, NaiveDate, Utc};
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use tutorly_core::error::TutorlyResult;
use tutorly_core::models::occurrence::{
    CreateOccurrence, Occurrence, OccurrenceSource, OccurrenceStatus, ParentFlag,
    UpdateOccurrence,
};
use tutorly_core::repository::OccurrenceRepository;
use uuid::Uuid;

use crate::codec;
use crate::error::DbError;

#[derive(Debug, SurrealValue)]
struct OccurrenceRow {
    record_id: String,
    template_id: Option<String>,
    tutor_id: String,
    attendee_kind: String,
    attendee_id: String,
    occurrence_date: String,
    start_at: DateTime<Utc>,
    end_at: DateTime<Utc>,
    status: String,
    source: String,
    original_date: Option<DateTime<Utc>>,
    subject: String,
    class_type: String,
    notes: Option<String>,
    flagged: bool,
    flag_parent_id: Option<String>,
    flag_comment: Option<String>,
    flagged_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// Insert payload for batch creation.
#[derive(Debug, SurrealValue)]
struct OccurrenceInsert {
    id: String,
    template_id: Option<String>,
    slot_key: String,
    tutor_id: String,
    attendee_kind: String,
    attendee_id: String,
    occurrence_date: String,
    start_at: DateTime<Utc>,
    end_at: DateTime<Utc>,
    source: String,
    subject: String,
    class_type: String,
    notes: Option<String>,
}

#[derive(Debug, SurrealValue)]
struct SlotKeyRow {
    slot_key: String,
}

#[derive(Debug, SurrealValue)]
struct CountRow {
    total: u64,
}

pub(crate) fn parse_status(s: &str) -> Result<OccurrenceStatus, DbError> {
    match s {
        "Scheduled" => Ok(OccurrenceStatus::Scheduled),
        "Completed" => Ok(OccurrenceStatus::Completed),
        "Cancelled" => Ok(OccurrenceStatus::Cancelled),
        "NoShow" => Ok(OccurrenceStatus::NoShow),
        other => Err(DbError::decode("occurrence status", other)),
    }
}

pub(crate) fn status_to_string(s: OccurrenceStatus) -> &'static str {
    match s {
        OccurrenceStatus::Scheduled => "Scheduled",
        OccurrenceStatus::Completed => "Completed",
        OccurrenceStatus::Cancelled => "Cancelled",
        OccurrenceStatus::NoShow => "NoShow",
    }
}

fn parse_source(s: &str) -> Result<OccurrenceSource, DbError> {
    match s {
        "Generated" => Ok(OccurrenceSource::Generated),
        "Manual" => Ok(OccurrenceSource::Manual),
        "Rescheduled" => Ok(OccurrenceSource::Rescheduled),
        other => Err(DbError::decode("occurrence source", other)),
    }
}

fn source_to_string(s: OccurrenceSource) -> &'static str {
    match s {
        OccurrenceSource::Generated => "Generated",
        OccurrenceSource::Manual => "Manual",
        OccurrenceSource::Rescheduled => "Rescheduled",
    }
}

/// Natural key of an occurrence row.
fn slot_key(id: Uuid, template_id: Option<Uuid>, date: NaiveDate) -> String {
    match template_id {
        Some(template_id) => format!("{template_id}:{}", codec::date_to_string(date)),
        None => format!("manual:{id}"),
    }
}

impl OccurrenceRow {
    fn try_into_occurrence(self) -> Result<Occurrence, DbError> {
        let parent_flag = if self.flagged {
            Some(ParentFlag {
                parent_id: codec::parse_uuid(
                    "flag_parent_id",
                    self.flag_parent_id.as_deref().unwrap_or_default(),
                )?,
                comment: self.flag_comment.unwrap_or_default(),
                flagged_at: self.flagged_at.unwrap_or(self.updated_at),
            })
        } else {
            None
        };

        Ok(Occurrence {
            id: codec::parse_uuid("id", &self.record_id)?,
            template_id: codec::parse_opt_uuid("template_id", self.template_id.as_deref())?,
            tutor_id: codec::parse_uuid("tutor_id", &self.tutor_id)?,
            attendee: codec::parse_attendee(&self.attendee_kind, &self.attendee_id)?,
            occurrence_date: codec::parse_date("occurrence_date", &self.occurrence_date)?,
            start_at: self.start_at,
            end_at: self.end_at,
            status: parse_status(&self.status)?,
            source: parse_source(&self.source)?,
            original_date: self.original_date,
            subject: self.subject,
            class_type: codec::parse_class_type(&self.class_type)?,
            notes: self.notes,
            parent_flag,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

impl OccurrenceInsert {
    fn new(input: CreateOccurrence) -> Self {
        let id = Uuid::new_v4();
        let (attendee_kind, attendee_id) = codec::attendee_columns(input.attendee);
        Self {
            id: id.to_string(),
            template_id: input.template_id.map(|t| t.to_string()),
            slot_key: slot_key(id, input.template_id, input.occurrence_date),
            tutor_id: input.tutor_id.to_string(),
            attendee_kind: attendee_kind.to_string(),
            attendee_id,
            occurrence_date: codec::date_to_string(input.occurrence_date),
            start_at: input.start_at,
            end_at: input.end_at,
            source: source_to_string(input.source).to_string(),
            subject: input.subject,
            class_type: codec::class_type_to_string(input.class_type).to_string(),
            notes: input.notes,
        }
    }
}

const SELECT_FIELDS: &str = "meta::id(id) AS record_id, *";

const INSERT_ROW: &str = "CREATE type::record('occurrence', $row.id) SET \
     template_id = $row.template_id, slot_key = $row.slot_key, \
     tutor_id = $row.tutor_id, \
     attendee_kind = $row.attendee_kind, attendee_id = $row.attendee_id, \
     occurrence_date = $row.occurrence_date, \
     start_at = $row.start_at, end_at = $row.end_at, \
     status = 'Scheduled', source = $row.source, \
     subject = $row.subject, class_type = $row.class_type, \
     notes = $row.notes";

/// SurrealDB implementation of the occurrence repository.
#[derive(Clone)]
pub struct SurrealOccurrenceRepository<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealOccurrenceRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }

    async fn fetch_one(&self, id_str: String) -> Result<Occurrence, DbError> {
        let mut result = self
            .db
            .query(&format!(
                "SELECT {SELECT_FIELDS} FROM type::record('occurrence', $id)"
            ))
            .bind(("id", id_str.clone()))
            .await?;

        let rows: Vec<OccurrenceRow> = result.take(0)?;
        rows.into_iter()
            .next()
            .ok_or_else(|| DbError::not_found("occurrence", id_str))?
            .try_into_occurrence()
    }

    fn collect(rows: Vec<OccurrenceRow>) -> Result<Vec<Occurrence>, DbError> {
        rows.into_iter()
            .map(OccurrenceRow::try_into_occurrence)
            .collect()
    }
}

impl<C: Connection> OccurrenceRepository for SurrealOccurrenceRepository<C> {
    async fn create(&self, input: CreateOccurrence) -> TutorlyResult<Occurrence> {
        let row = OccurrenceInsert::new(input);
        let id_str = row.id.clone();

        self.db
            .query(INSERT_ROW)
            .bind(("row", row))
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(|e| DbError::statement("occurrence", e))?;

        Ok(self.fetch_one(id_str).await?)
    }

    async fn create_batch(&self, inputs: Vec<CreateOccurrence>) -> TutorlyResult<Vec<Occurrence>> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let rows: Vec<OccurrenceInsert> = inputs.into_iter().map(OccurrenceInsert::new).collect();
        let keys: Vec<String> = rows.iter().map(|r| r.slot_key.clone()).collect();

        let query = format!(
            "BEGIN TRANSACTION; \
             FOR $row IN $rows {{ {INSERT_ROW}; }}; \
             COMMIT TRANSACTION;"
        );

        self.db
            .query(&query)
            .bind(("rows", rows))
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(|e| DbError::statement("occurrence", e))?;

        let mut result = self
            .db
            .query(&format!(
                "SELECT {SELECT_FIELDS} FROM occurrence \
                 WHERE slot_key IN $keys ORDER BY start_at ASC"
            ))
            .bind(("keys", keys))
            .await
            .map_err(DbError::from)?;
        let rows: Vec<OccurrenceRow> = result.take(0).map_err(DbError::from)?;

        Ok(Self::collect(rows)?)
    }

    async fn get_by_id(&self, id: Uuid) -> TutorlyResult<Occurrence> {
        Ok(self.fetch_one(id.to_string()).await?)
    }

    async fn update(&self, id: Uuid, input: UpdateOccurrence) -> TutorlyResult<Occurrence> {
        let id_str = id.to_string();

        let mut sets = Vec::new();
        if input.status.is_some() {
            sets.push("status = $status");
        }
        if input.occurrence_date.is_some() {
            sets.push("occurrence_date = $occurrence_date");
        }
        if input.start_at.is_some() {
            sets.push("start_at = $start_at");
        }
        if input.end_at.is_some() {
            sets.push("end_at = $end_at");
        }
        if input.source.is_some() {
            sets.push("source = $source");
        }
        if input.original_date.is_some() {
            sets.push("original_date = $original_date");
        }
        if input.notes.is_some() {
            sets.push("notes = $notes");
        }
        if input.parent_flag.is_some() {
            sets.push(
                "flagged = true, flag_parent_id = $flag_parent_id, \
                 flag_comment = $flag_comment, flagged_at = $flagged_at",
            );
        }
        sets.push("updated_at = time::now()");

        let query = format!(
            "UPDATE type::record('occurrence', $id) SET {}",
            sets.join(", ")
        );

        let mut builder = self.db.query(&query).bind(("id", id_str.clone()));
        if let Some(status) = input.status {
            builder = builder.bind(("status", status_to_string(status).to_string()));
        }
        if let Some(date) = input.occurrence_date {
            builder = builder.bind(("occurrence_date", codec::date_to_string(date)));
        }
        if let Some(start_at) = input.start_at {
            builder = builder.bind(("start_at", start_at));
        }
        if let Some(end_at) = input.end_at {
            builder = builder.bind(("end_at", end_at));
        }
        if let Some(source) = input.source {
            builder = builder.bind(("source", source_to_string(source).to_string()));
        }
        if let Some(original_date) = input.original_date {
            builder = builder.bind(("original_date", original_date));
        }
        if let Some(notes) = input.notes {
            builder = builder.bind(("notes", notes));
        }
        if let Some(flag) = input.parent_flag {
            builder = builder
                .bind(("flag_parent_id", flag.parent_id.to_string()))
                .bind(("flag_comment", flag.comment))
                .bind(("flagged_at", flag.flagged_at));
        }

        builder
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(|e| DbError::statement("occurrence", e))?;

        Ok(self.fetch_one(id_str).await?)
    }

    async fn delete(&self, id: Uuid) -> TutorlyResult<()> {
        self.db
            .query("DELETE type::record('occurrence', $id)")
            .bind(("id", id.to_string()))
            .await
            .map_err(DbError::from)?;

        Ok(())
    }

    async fn list_template_dates(&self, template_id: Uuid) -> TutorlyResult<Vec<NaiveDate>> {
        let mut result = self
            .db
            .query("SELECT slot_key FROM occurrence WHERE template_id = $template_id")
            .bind(("template_id", template_id.to_string()))
            .await
            .map_err(DbError::from)?;
        let rows: Vec<SlotKeyRow> = result.take(0).map_err(DbError::from)?;

        let dates = rows
            .iter()
            .filter_map(|row| row.slot_key.split_once(':'))
            .map(|(_, date)| codec::parse_date("slot_key", date))
            .collect::<Result<Vec<_>, DbError>>()?;

        Ok(dates)
    }

    async fn delete_future_generated(
        &self,
        template_id: Uuid,
        after: DateTime<Utc>,
    ) -> TutorlyResult<u64> {
        let template_id_str = template_id.to_string();
        let filter = "template_id = $template_id AND source = 'Generated' \
                      AND status = 'Scheduled' AND start_at > $after";

        // Count first, then delete.
        let mut count_result = self
            .db
            .query(&format!(
                "SELECT count() AS total FROM occurrence WHERE {filter} GROUP ALL"
            ))
            .bind(("template_id", template_id_str.clone()))
            .bind(("after", after))
            .await
            .map_err(DbError::from)?;
        let count_rows: Vec<CountRow> = count_result.take(0).map_err(DbError::from)?;
        let total = count_rows.first().map(|r| r.total).unwrap_or(0);

        self.db
            .query(&format!("DELETE occurrence WHERE {filter}"))
            .bind(("template_id", template_id_str))
            .bind(("after", after))
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(|e| DbError::statement("occurrence", e))?;

        Ok(total)
    }

    async fn list_ended_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> TutorlyResult<Vec<Occurrence>> {
        let mut result = self
            .db
            .query(&format!(
                "SELECT {SELECT_FIELDS} FROM occurrence \
                 WHERE status IN ['Scheduled', 'Completed'] \
                 AND end_at >= $from AND end_at <= $to \
                 ORDER BY end_at ASC"
            ))
            .bind(("from", from))
            .bind(("to", to))
            .await
            .map_err(DbError::from)?;
        let rows: Vec<OccurrenceRow> = result.take(0).map_err(DbError::from)?;

        Ok(Self::collect(rows)?)
    }

    async fn list_by_template(&self, template_id: Uuid) -> TutorlyResult<Vec<Occurrence>> {
        let mut result = self
            .db
            .query(&format!(
                "SELECT {SELECT_FIELDS} FROM occurrence \
                 WHERE template_id = $template_id ORDER BY start_at ASC"
            ))
            .bind(("template_id", template_id.to_string()))
            .await
            .map_err(DbError::from)?;
        let rows: Vec<OccurrenceRow> = result.take(0).map_err(DbError::from)?;

        Ok(Self::collect(rows)?)
    }
}
