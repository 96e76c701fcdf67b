//! SurrealDB implementation of [`StudentRepository`].
//!
//! Parent links live in `parent_student`, one row per pair.

use chrono::{DateTime, Utc};
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use tutorly_core::error::{TutorlyError, TutorlyResult};
use tracing::debug;
use tutorly_core::models::student::{BalanceChange, CreateStudent, Student};
use tutorly_core::repository::StudentRepository;
use uuid::Uuid;

use crate::codec;
use crate::error::DbError;

#[derive(Debug, SurrealValue)]
struct StudentRow {
    record_id: String,
    name: String,
    group_id: Option<String>,
    remaining_sessions: i32,
    auto_invoice: bool,
    default_pack_size: u32,
    rate_cents: i64,
    scheduled_invoice_send_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, SurrealValue)]
struct BalanceRow {
    remaining_sessions: i32,
}

#[derive(Debug, SurrealValue)]
struct ParentLinkRow {
    parent_id: String,
}

impl StudentRow {
    fn try_into_student(self) -> Result<Student, DbError> {
        Ok(Student {
            id: codec::parse_uuid("id", &self.record_id)?,
            name: self.name,
            group_id: codec::parse_opt_uuid("group_id", self.group_id.as_deref())?,
            remaining_sessions: self.remaining_sessions,
            auto_invoice: self.auto_invoice,
            default_pack_size: self.default_pack_size,
            rate_cents: self.rate_cents,
            scheduled_invoice_send_at: self.scheduled_invoice_send_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

const SELECT_FIELDS: &str = "meta::id(id) AS record_id, *";

/// Overwrite; returns the row as it was before the write.
const SET_BALANCE: &str = "UPDATE type::record('student', $id) SET \
     remaining_sessions = $value, updated_at = time::now() RETURN BEFORE";

/// Relative update evaluated inside the write; returns the new row.
const ADJUST_BALANCE: &str = "UPDATE type::record('student', $id) SET \
     remaining_sessions += $value, updated_at = time::now() RETURN AFTER";

/// Attempts for a balance write that keeps losing to concurrent writers.
const MAX_BALANCE_ATTEMPTS: u32 = 5;

/// SurrealDB implementation of the student repository.
#[derive(Clone)]
pub struct SurrealStudentRepository<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealStudentRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }

    async fn fetch_one(&self, id_str: String) -> Result<Student, DbError> {
        let mut result = self
            .db
            .query(&format!(
                "SELECT {SELECT_FIELDS} FROM type::record('student', $id)"
            ))
            .bind(("id", id_str.clone()))
            .await?;

        let rows: Vec<StudentRow> = result.take(0)?;
        rows.into_iter()
            .next()
            .ok_or_else(|| DbError::not_found("student", id_str))?
            .try_into_student()
    }

    /// Run a single-statement balance write, re-running it when the
    /// storage engine aborts it for a write conflict. Returns the
    /// balance the statement reported.
    async fn write_balance(&self, statement: &str, id_str: &str, value: i32) -> Result<i32, DbError> {
        let mut attempt = 1;
        loop {
            match self.try_write_balance(statement, id_str, value).await {
                Err(e) if e.is_write_conflict() && attempt < MAX_BALANCE_ATTEMPTS => {
                    debug!(student_id = id_str, attempt, "Balance write conflict, retrying");
                    attempt += 1;
                }
                outcome => return outcome,
            }
        }
    }

    async fn try_write_balance(&self, statement: &str, id_str: &str, value: i32) -> Result<i32, DbError> {
        let mut result = self
            .db
            .query(statement)
            .bind(("id", id_str.to_string()))
            .bind(("value", value))
            .await?
            .check()
            .map_err(|e| DbError::statement("student", e))?;

        let rows: Vec<BalanceRow> = result.take(0)?;
        rows.into_iter()
            .next()
            .map(|row| row.remaining_sessions)
            .ok_or_else(|| DbError::not_found("student", id_str))
    }
}

impl<C: Connection> StudentRepository for SurrealStudentRepository<C> {
    async fn create(&self, input: CreateStudent) -> TutorlyResult<Student> {
        let id_str = Uuid::new_v4().to_string();

        self.db
            .query(
                "CREATE type::record('student', $id) SET \
                 name = $name, group_id = $group_id, \
                 remaining_sessions = $remaining_sessions, \
                 auto_invoice = $auto_invoice, \
                 default_pack_size = $default_pack_size, \
                 rate_cents = $rate_cents, \
                 scheduled_invoice_send_at = $scheduled_invoice_send_at",
            )
            .bind(("id", id_str.clone()))
            .bind(("name", input.name))
            .bind(("group_id", input.group_id.map(|id| id.to_string())))
            .bind(("remaining_sessions", input.remaining_sessions))
            .bind(("auto_invoice", input.auto_invoice))
            .bind(("default_pack_size", input.default_pack_size))
            .bind(("rate_cents", input.rate_cents))
            .bind(("scheduled_invoice_send_at", input.scheduled_invoice_send_at))
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(|e| DbError::statement("student", e))?;

        Ok(self.fetch_one(id_str).await?)
    }

    async fn get_by_id(&self, id: Uuid) -> TutorlyResult<Student> {
        Ok(self.fetch_one(id.to_string()).await?)
    }

    async fn set_remaining_sessions(
        &self,
        id: Uuid,
        remaining: i32,
    ) -> TutorlyResult<(Student, BalanceChange)> {
        let id_str = id.to_string();
        let previous = self.write_balance(SET_BALANCE, &id_str, remaining).await?;

        let mut student = self.fetch_one(id_str).await?;
        student.remaining_sessions = remaining;
        Ok((
            student,
            BalanceChange {
                previous,
                current: remaining,
            },
        ))
    }

    async fn adjust_remaining_sessions(
        &self,
        id: Uuid,
        delta: i32,
    ) -> TutorlyResult<(Student, BalanceChange)> {
        let id_str = id.to_string();
        let current = self.write_balance(ADJUST_BALANCE, &id_str, delta).await?;

        // A later writer may already have moved the stored value; report
        // the balance as this write left it.
        let mut student = self.fetch_one(id_str).await?;
        student.remaining_sessions = current;
        Ok((
            student,
            BalanceChange {
                previous: current - delta,
                current,
            },
        ))
    }

    async fn list_group_members(&self, group_id: Uuid) -> TutorlyResult<Vec<Student>> {
        let mut result = self
            .db
            .query(&format!(
                "SELECT {SELECT_FIELDS} FROM student \
                 WHERE group_id = $group_id ORDER BY created_at ASC"
            ))
            .bind(("group_id", group_id.to_string()))
            .await
            .map_err(DbError::from)?;
        let rows: Vec<StudentRow> = result.take(0).map_err(DbError::from)?;

        let items = rows
            .into_iter()
            .map(StudentRow::try_into_student)
            .collect::<Result<Vec<_>, DbError>>()?;
        Ok(items)
    }

    async fn link_parent(&self, parent_id: Uuid, student_id: Uuid) -> TutorlyResult<()> {
        let outcome = self
            .db
            .query(
                "CREATE parent_student SET \
                 parent_id = $parent_id, student_id = $student_id",
            )
            .bind(("parent_id", parent_id.to_string()))
            .bind(("student_id", student_id.to_string()))
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(|e| DbError::statement("parent_student", e));

        match outcome.map_err(TutorlyError::from) {
            Ok(_) | Err(TutorlyError::AlreadyExists { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn is_parent_of(&self, parent_id: Uuid, student_id: Uuid) -> TutorlyResult<bool> {
        let mut result = self
            .db
            .query(
                "SELECT parent_id FROM parent_student \
                 WHERE parent_id = $parent_id AND student_id = $student_id \
                 LIMIT 1",
            )
            .bind(("parent_id", parent_id.to_string()))
            .bind(("student_id", student_id.to_string()))
            .await
            .map_err(DbError::from)?;
        let rows: Vec<ParentLinkRow> = result.take(0).map_err(DbError::from)?;

        Ok(!rows.is_empty())
    }

    async fn list_parents(&self, student_id: Uuid) -> TutorlyResult<Vec<Uuid>> {
        let mut result = self
            .db
            .query(
                "SELECT parent_id, created_at FROM parent_student \
                 WHERE student_id = $student_id ORDER BY created_at ASC",
            )
            .bind(("student_id", student_id.to_string()))
            .await
            .map_err(DbError::from)?;
        let rows: Vec<ParentLinkRow> = result.take(0).map_err(DbError::from)?;

        let parents = rows
            .iter()
            .map(|row| codec::parse_uuid("parent_id", &row.parent_id))
            .collect::<Result<Vec<_>, DbError>>()?;
        Ok(parents)
    }
}
