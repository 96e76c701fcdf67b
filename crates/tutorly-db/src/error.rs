//! Database-specific error types and conversions.

use tutorly_core::error::TutorlyError;

/// Database-layer error type.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("SurrealDB error: {0}")]
    Surreal(#[from] surrealdb::Error),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Duplicate {entity}: {detail}")]
    Duplicate { entity: String, detail: String },

    #[error("Record not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Malformed {field} in stored record: {detail}")]
    Decode { field: String, detail: String },
}

impl DbError {
    /// Classify a statement failure reported by `Response::check`.
    /// Unique-index violations become [`DbError::Duplicate`] so callers
    /// can treat a lost create race as "already exists".
    pub(crate) fn statement(entity: &str, err: surrealdb::Error) -> Self {
        let detail = err.to_string();
        if detail.contains("already contains") || detail.contains("already exists") {
            DbError::Duplicate {
                entity: entity.into(),
                detail,
            }
        } else {
            DbError::Query(detail)
        }
    }

    /// Optimistic-concurrency aborts reported by the storage engine.
    /// Re-running the same statement succeeds once the competing
    /// transaction has committed.
    pub(crate) fn is_write_conflict(&self) -> bool {
        let detail = self.to_string();
        detail.contains("retry the transaction") || detail.contains("Transaction conflict")
    }

    pub(crate) fn decode(field: &str, detail: impl ToString) -> Self {
        DbError::Decode {
            field: field.into(),
            detail: detail.to_string(),
        }
    }

    pub(crate) fn not_found(entity: &str, id: impl ToString) -> Self {
        DbError::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }
}

impl From<DbError> for TutorlyError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound { entity, id } => TutorlyError::NotFound { entity, id },
            DbError::Duplicate { entity, .. } => TutorlyError::AlreadyExists { entity },
            other => TutorlyError::Database(other.to_string()),
        }
    }
}
