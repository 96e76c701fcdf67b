//! SurrealDB implementation of [`AuditLogRepository`].
//!
//! The `audit_log` table denies update and delete at the schema level;
//! this repository only ever appends.

use chrono::{DateTime, Utc};
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use tutorly_core::error::TutorlyResult;
use tutorly_core::models::audit::{ActorType, AuditLogEntry, AuditOutcome, CreateAuditLogEntry};
use tutorly_core::repository::{AuditLogFilter, AuditLogRepository, PaginatedResult, Pagination};
use uuid::Uuid;

use crate::codec;
use crate::error::DbError;

#[derive(Debug, SurrealValue)]
struct AuditRow {
    record_id: String,
    actor_id: Option<String>,
    actor_type: String,
    action: String,
    resource_id: Option<String>,
    outcome: String,
    metadata: serde_json::Value,
    timestamp: DateTime<Utc>,
}

#[derive(Debug, SurrealValue)]
struct CountRow {
    total: u64,
}

fn actor_type_to_string(actor_type: ActorType) -> &'static str {
    match actor_type {
        ActorType::Admin => "Admin",
        ActorType::Parent => "Parent",
        ActorType::Tutor => "Tutor",
        ActorType::System => "System",
    }
}

fn parse_actor_type(s: &str) -> Result<ActorType, DbError> {
    match s {
        "Admin" => Ok(ActorType::Admin),
        "Parent" => Ok(ActorType::Parent),
        "Tutor" => Ok(ActorType::Tutor),
        "System" => Ok(ActorType::System),
        other => Err(DbError::decode("actor_type", other)),
    }
}

fn outcome_to_string(outcome: AuditOutcome) -> &'static str {
    match outcome {
        AuditOutcome::Success => "Success",
        AuditOutcome::Failure => "Failure",
        AuditOutcome::Denied => "Denied",
    }
}

fn parse_outcome(s: &str) -> Result<AuditOutcome, DbError> {
    match s {
        "Success" => Ok(AuditOutcome::Success),
        "Failure" => Ok(AuditOutcome::Failure),
        "Denied" => Ok(AuditOutcome::Denied),
        other => Err(DbError::decode("outcome", other)),
    }
}

impl AuditRow {
    fn try_into_entry(self) -> Result<AuditLogEntry, DbError> {
        Ok(AuditLogEntry {
            id: codec::parse_uuid("id", &self.record_id)?,
            actor_id: codec::parse_opt_uuid("actor_id", self.actor_id.as_deref())?,
            actor_type: parse_actor_type(&self.actor_type)?,
            action: self.action,
            resource_id: codec::parse_opt_uuid("resource_id", self.resource_id.as_deref())?,
            outcome: parse_outcome(&self.outcome)?,
            metadata: self.metadata,
            timestamp: self.timestamp,
        })
    }
}

/// SurrealDB implementation of the audit log repository.
#[derive(Clone)]
pub struct SurrealAuditLogRepository<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealAuditLogRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }
}

impl<C: Connection> AuditLogRepository for SurrealAuditLogRepository<C> {
    async fn append(&self, input: CreateAuditLogEntry) -> TutorlyResult<AuditLogEntry> {
        let id_str = Uuid::new_v4().to_string();
        let metadata = if input.metadata.is_null() {
            serde_json::json!({})
        } else {
            input.metadata
        };

        self.db
            .query(
                "CREATE type::record('audit_log', $id) SET \
                 actor_id = $actor_id, actor_type = $actor_type, \
                 action = $action, resource_id = $resource_id, \
                 outcome = $outcome, metadata = $metadata",
            )
            .bind(("id", id_str.clone()))
            .bind(("actor_id", input.actor_id.map(|id| id.to_string())))
            .bind((
                "actor_type",
                actor_type_to_string(input.actor_type).to_string(),
            ))
            .bind(("action", input.action))
            .bind(("resource_id", input.resource_id.map(|id| id.to_string())))
            .bind(("outcome", outcome_to_string(input.outcome).to_string()))
            .bind(("metadata", metadata))
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(|e| DbError::statement("audit_log", e))?;

        let mut result = self
            .db
            .query(
                "SELECT meta::id(id) AS record_id, * \
                 FROM type::record('audit_log', $id)",
            )
            .bind(("id", id_str.clone()))
            .await
            .map_err(DbError::from)?;
        let rows: Vec<AuditRow> = result.take(0).map_err(DbError::from)?;

        Ok(rows
            .into_iter()
            .next()
            .ok_or_else(|| DbError::not_found("audit_log", id_str))?
            .try_into_entry()?)
    }

    async fn list(
        &self,
        filter: AuditLogFilter,
        pagination: Pagination,
    ) -> TutorlyResult<PaginatedResult<AuditLogEntry>> {
        let mut conditions = Vec::new();
        if filter.actor_id.is_some() {
            conditions.push("actor_id = $actor_id");
        }
        if filter.action.is_some() {
            conditions.push("action = $action");
        }
        if filter.resource_id.is_some() {
            conditions.push("resource_id = $resource_id");
        }
        if filter.from.is_some() {
            conditions.push("timestamp >= $from");
        }
        if filter.to.is_some() {
            conditions.push("timestamp <= $to");
        }
        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let query = format!(
            "SELECT count() AS total FROM audit_log {where_clause} GROUP ALL; \
             SELECT meta::id(id) AS record_id, * FROM audit_log {where_clause} \
             ORDER BY timestamp ASC LIMIT $limit START $offset"
        );

        let mut builder = self
            .db
            .query(&query)
            .bind(("limit", pagination.limit))
            .bind(("offset", pagination.offset));
        if let Some(actor_id) = filter.actor_id {
            builder = builder.bind(("actor_id", actor_id.to_string()));
        }
        if let Some(action) = filter.action {
            builder = builder.bind(("action", action));
        }
        if let Some(resource_id) = filter.resource_id {
            builder = builder.bind(("resource_id", resource_id.to_string()));
        }
        if let Some(from) = filter.from {
            builder = builder.bind(("from", from));
        }
        if let Some(to) = filter.to {
            builder = builder.bind(("to", to));
        }

        let mut result = builder.await.map_err(DbError::from)?;
        let count_rows: Vec<CountRow> = result.take(0).map_err(DbError::from)?;
        let total = count_rows.first().map(|r| r.total).unwrap_or(0);
        let rows: Vec<AuditRow> = result.take(1).map_err(DbError::from)?;

        let items = rows
            .into_iter()
            .map(AuditRow::try_into_entry)
            .collect::<Result<Vec<_>, DbError>>()?;

        Ok(PaginatedResult {
            items,
            total,
            offset: pagination.offset,
            limit: pagination.limit,
        })
    }
}
