//! SurrealDB implementation of [`ChangeRequestRepository`].

use chrono::{DateTime, Utc};
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use tutorly_core::error::TutorlyResult;
use tutorly_core::models::change_request::{
    ChangeProposal, ChangeRequest, ChangeRequestStatus, CreateChangeRequest, RecordDecision,
    RequestType, Requester, Resolution,
};
use tutorly_core::models::occurrence::TimeSlot;
use tutorly_core::repository::{ChangeRequestRepository, PaginatedResult, Pagination};
use uuid::Uuid;

use crate::codec;
use crate::error::DbError;

#[derive(Debug, SurrealValue)]
struct ChangeRequestRow {
    record_id: String,
    occurrence_id: String,
    requester_type: String,
    requester_id: String,
    request_type: String,
    proposed_start: Option<DateTime<Utc>>,
    proposed_end: Option<DateTime<Utc>>,
    message: Option<String>,
    reason: Option<String>,
    original_date: DateTime<Utc>,
    status: String,
    admin_notes: Option<String>,
    processed_by: Option<String>,
    processed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, SurrealValue)]
struct StatusRow {
    #[allow(dead_code)]
    status: String,
}

#[derive(Debug, SurrealValue)]
struct CountRow {
    total: u64,
}

fn status_to_string(status: ChangeRequestStatus) -> &'static str {
    match status {
        ChangeRequestStatus::Pending => "Pending",
        ChangeRequestStatus::Acknowledged => "Acknowledged",
        ChangeRequestStatus::Resolved(Resolution::Approved) => "Approved",
        ChangeRequestStatus::Resolved(Resolution::Rejected) => "Rejected",
    }
}

fn parse_status(s: &str) -> Result<ChangeRequestStatus, DbError> {
    match s {
        "Pending" => Ok(ChangeRequestStatus::Pending),
        "Acknowledged" => Ok(ChangeRequestStatus::Acknowledged),
        "Approved" => Ok(ChangeRequestStatus::Resolved(Resolution::Approved)),
        "Rejected" => Ok(ChangeRequestStatus::Resolved(Resolution::Rejected)),
        other => Err(DbError::decode("change request status", other)),
    }
}

fn parse_requester(kind: &str, id: &str) -> Result<Requester, DbError> {
    let id = codec::parse_uuid("requester_id", id)?;
    match kind {
        "Parent" => Ok(Requester::Parent(id)),
        "Tutor" => Ok(Requester::Tutor(id)),
        other => Err(DbError::decode("requester_type", other)),
    }
}

fn requester_type_to_string(requester: &Requester) -> &'static str {
    match requester {
        Requester::Parent(_) => "Parent",
        Requester::Tutor(_) => "Tutor",
    }
}

fn request_type_to_string(request_type: RequestType) -> &'static str {
    match request_type {
        RequestType::Cancel => "Cancel",
        RequestType::Reschedule => "Reschedule",
    }
}

impl ChangeRequestRow {
    fn try_into_change_request(self) -> Result<ChangeRequest, DbError> {
        let proposal = match self.request_type.as_str() {
            "Cancel" => ChangeProposal::Cancel {
                reason: self.reason,
            },
            "Reschedule" => {
                let slot = match (self.proposed_start, self.proposed_end) {
                    (Some(start), Some(end)) => Some(
                        TimeSlot::new(start, end)
                            .map_err(|e| DbError::decode("proposed slot", e))?,
                    ),
                    _ => None,
                };
                ChangeProposal::Reschedule {
                    slot,
                    message: self.message,
                    reason: self.reason,
                }
            }
            other => return Err(DbError::decode("request_type", other)),
        };

        Ok(ChangeRequest {
            id: codec::parse_uuid("id", &self.record_id)?,
            occurrence_id: codec::parse_uuid("occurrence_id", &self.occurrence_id)?,
            requester: parse_requester(&self.requester_type, &self.requester_id)?,
            proposal,
            original_date: self.original_date,
            status: parse_status(&self.status)?,
            admin_notes: self.admin_notes,
            processed_by: codec::parse_opt_uuid("processed_by", self.processed_by.as_deref())?,
            processed_at: self.processed_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

const SELECT_FIELDS: &str = "meta::id(id) AS record_id, *";
const OPEN_FILTER: &str = "status IN ['Pending', 'Acknowledged']";

/// SurrealDB implementation of the change request repository.
#[derive(Clone)]
pub struct SurrealChangeRequestRepository<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealChangeRequestRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }

    async fn fetch_one(&self, id_str: String) -> Result<ChangeRequest, DbError> {
        let mut result = self
            .db
            .query(&format!(
                "SELECT {SELECT_FIELDS} FROM type::record('change_request', $id)"
            ))
            .bind(("id", id_str.clone()))
            .await?;

        let rows: Vec<ChangeRequestRow> = result.take(0)?;
        rows.into_iter()
            .next()
            .ok_or_else(|| DbError::not_found("change_request", id_str))?
            .try_into_change_request()
    }
}

impl<C: Connection> ChangeRequestRepository for SurrealChangeRequestRepository<C> {
    async fn create(&self, input: CreateChangeRequest) -> TutorlyResult<ChangeRequest> {
        let id_str = Uuid::new_v4().to_string();
        let slot = input.proposal.proposed_slot();
        let message = match &input.proposal {
            ChangeProposal::Reschedule { message, .. } => message.clone(),
            ChangeProposal::Cancel { .. } => None,
        };

        self.db
            .query(
                "CREATE type::record('change_request', $id) SET \
                 occurrence_id = $occurrence_id, \
                 requester_type = $requester_type, requester_id = $requester_id, \
                 request_type = $request_type, \
                 proposed_start = $proposed_start, proposed_end = $proposed_end, \
                 message = $message, reason = $reason, \
                 original_date = $original_date, status = 'Pending'",
            )
            .bind(("id", id_str.clone()))
            .bind(("occurrence_id", input.occurrence_id.to_string()))
            .bind((
                "requester_type",
                requester_type_to_string(&input.requester).to_string(),
            ))
            .bind(("requester_id", input.requester.id().to_string()))
            .bind((
                "request_type",
                request_type_to_string(input.proposal.request_type()).to_string(),
            ))
            .bind(("proposed_start", slot.map(|s| s.start())))
            .bind(("proposed_end", slot.map(|s| s.end())))
            .bind(("message", message))
            .bind(("reason", input.proposal.reason().map(str::to_string)))
            .bind(("original_date", input.original_date))
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(|e| DbError::statement("change_request", e))?;

        Ok(self.fetch_one(id_str).await?)
    }

    async fn get_by_id(&self, id: Uuid) -> TutorlyResult<ChangeRequest> {
        Ok(self.fetch_one(id.to_string()).await?)
    }

    async fn record_decision(&self, id: Uuid, input: RecordDecision) -> TutorlyResult<ChangeRequest> {
        let id_str = id.to_string();

        // Conditional update: a request resolved in the meantime is
        // left untouched and reported as not found.
        let mut result = self
            .db
            .query(&format!(
                "UPDATE type::record('change_request', $id) SET \
                 status = $status, admin_notes = $admin_notes, \
                 processed_by = $processed_by, processed_at = $processed_at, \
                 updated_at = time::now() \
                 WHERE {OPEN_FILTER} RETURN AFTER"
            ))
            .bind(("id", id_str.clone()))
            .bind(("status", status_to_string(input.status).to_string()))
            .bind(("admin_notes", input.admin_notes))
            .bind(("processed_by", input.processed_by.to_string()))
            .bind(("processed_at", input.processed_at))
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(|e| DbError::statement("change_request", e))?;

        let updated: Vec<StatusRow> = result.take(0).map_err(DbError::from)?;
        if updated.is_empty() {
            return Err(DbError::not_found("open change_request", id_str).into());
        }

        Ok(self.fetch_one(id_str).await?)
    }

    async fn reopen(&self, previous: ChangeRequest, decided_at: DateTime<Utc>) -> TutorlyResult<ChangeRequest> {
        let id_str = previous.id.to_string();

        let mut result = self
            .db
            .query(
                "UPDATE type::record('change_request', $id) SET \
                 status = $status, admin_notes = $admin_notes, \
                 processed_by = $processed_by, processed_at = $processed_at, \
                 updated_at = time::now() \
                 WHERE status IN ['Approved', 'Rejected'] AND processed_at = $decided_at \
                 RETURN AFTER",
            )
            .bind(("id", id_str.clone()))
            .bind(("status", status_to_string(previous.status).to_string()))
            .bind(("admin_notes", previous.admin_notes))
            .bind(("processed_by", previous.processed_by.map(|id| id.to_string())))
            .bind(("processed_at", previous.processed_at))
            .bind(("decided_at", decided_at))
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(|e| DbError::statement("change_request", e))?;

        let updated: Vec<StatusRow> = result.take(0).map_err(DbError::from)?;
        if updated.is_empty() {
            return Err(DbError::not_found("decided change_request", id_str).into());
        }

        Ok(self.fetch_one(id_str).await?)
    }

    async fn list_open_for_occurrence(
        &self,
        occurrence_id: Uuid,
    ) -> TutorlyResult<Vec<ChangeRequest>> {
        let mut result = self
            .db
            .query(&format!(
                "SELECT {SELECT_FIELDS} FROM change_request \
                 WHERE occurrence_id = $occurrence_id AND {OPEN_FILTER} \
                 ORDER BY created_at ASC"
            ))
            .bind(("occurrence_id", occurrence_id.to_string()))
            .await
            .map_err(DbError::from)?;
        let rows: Vec<ChangeRequestRow> = result.take(0).map_err(DbError::from)?;

        let items = rows
            .into_iter()
            .map(ChangeRequestRow::try_into_change_request)
            .collect::<Result<Vec<_>, DbError>>()?;
        Ok(items)
    }

    async fn list_open(
        &self,
        pagination: Pagination,
    ) -> TutorlyResult<PaginatedResult<ChangeRequest>> {
        let mut count_result = self
            .db
            .query(&format!(
                "SELECT count() AS total FROM change_request \
                 WHERE {OPEN_FILTER} GROUP ALL"
            ))
            .await
            .map_err(DbError::from)?;
        let count_rows: Vec<CountRow> = count_result.take(0).map_err(DbError::from)?;
        let total = count_rows.first().map(|r| r.total).unwrap_or(0);

        let mut result = self
            .db
            .query(&format!(
                "SELECT {SELECT_FIELDS} FROM change_request \
                 WHERE {OPEN_FILTER} \
                 ORDER BY created_at ASC \
                 LIMIT $limit START $offset"
            ))
            .bind(("limit", pagination.limit))
            .bind(("offset", pagination.offset))
            .await
            .map_err(DbError::from)?;
        let rows: Vec<ChangeRequestRow> = result.take(0).map_err(DbError::from)?;

        let items = rows
            .into_iter()
            .map(ChangeRequestRow::try_into_change_request)
            .collect::<Result<Vec<_>, DbError>>()?;

        Ok(PaginatedResult {
            items,
            total,
            offset: pagination.offset,
            limit: pagination.limit,
        })
    }
}
