//! Schema definitions and migration runner for SurrealDB.
//!
//! All table definitions use SCHEMAFULL mode. UUIDs, calendar dates
//! (`YYYY-MM-DD`) and wall-clock times (`HH:MM:SS`) are stored as
//! strings; instants are native datetimes. Enums are stored as strings
//! with ASSERT constraints.

use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use tracing::info;

use crate::error::DbError;

// -----------------------------------------------------------------------
// Migration tracking
// -----------------------------------------------------------------------

const MIGRATION_TABLE_DDL: &str = "\
DEFINE TABLE IF NOT EXISTS _migration SCHEMAFULL;
DEFINE FIELD IF NOT EXISTS version ON TABLE _migration TYPE int;
DEFINE FIELD IF NOT EXISTS name ON TABLE _migration TYPE string;
DEFINE FIELD IF NOT EXISTS applied_at ON TABLE _migration TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX IF NOT EXISTS idx_migration_version ON TABLE _migration \
    COLUMNS version UNIQUE;
";

#[derive(Debug, SurrealValue)]
struct MigrationRecord {
    version: u32,
    #[allow(dead_code)]
    name: String,
}

struct Migration {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

static MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    name: "initial_schema",
    sql: SCHEMA_V1,
}];

// -----------------------------------------------------------------------
// Schema v1
// -----------------------------------------------------------------------

const SCHEMA_V1: &str = "\
-- =======================================================================
-- Recurring session templates
-- =======================================================================
DEFINE TABLE session_template SCHEMAFULL;
DEFINE FIELD tutor_id ON TABLE session_template TYPE string;
DEFINE FIELD attendee_kind ON TABLE session_template TYPE string \
    ASSERT $value IN ['Student', 'Group'];
DEFINE FIELD attendee_id ON TABLE session_template TYPE string;
DEFINE FIELD weekday ON TABLE session_template TYPE string \
    ASSERT $value IN ['Mon', 'Tue', 'Wed', 'Thu', 'Fri', 'Sat', 'Sun'];
DEFINE FIELD start_time ON TABLE session_template TYPE string;
DEFINE FIELD duration_minutes ON TABLE session_template TYPE int \
    ASSERT $value > 0;
DEFINE FIELD subject ON TABLE session_template TYPE string;
DEFINE FIELD class_type ON TABLE session_template TYPE string \
    ASSERT $value IN ['OneToOne', 'Group', 'Online'];
DEFINE FIELD effective_from ON TABLE session_template TYPE string;
DEFINE FIELD active ON TABLE session_template TYPE bool DEFAULT true;
DEFINE FIELD created_by ON TABLE session_template TYPE string;
DEFINE FIELD created_at ON TABLE session_template TYPE datetime \
    DEFAULT time::now();
DEFINE FIELD updated_at ON TABLE session_template TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX idx_template_attendee ON TABLE session_template \
    COLUMNS attendee_id;
DEFINE INDEX idx_template_active ON TABLE session_template \
    COLUMNS active;

-- =======================================================================
-- Session occurrences
-- slot_key is the natural key: '<template>:<date>' for generated rows,
-- 'manual:<id>' for ad hoc ones.
-- =======================================================================
DEFINE TABLE occurrence SCHEMAFULL;
DEFINE FIELD template_id ON TABLE occurrence TYPE option<string>;
DEFINE FIELD slot_key ON TABLE occurrence TYPE string;
DEFINE FIELD tutor_id ON TABLE occurrence TYPE string;
DEFINE FIELD attendee_kind ON TABLE occurrence TYPE string \
    ASSERT $value IN ['Student', 'Group'];
DEFINE FIELD attendee_id ON TABLE occurrence TYPE string;
DEFINE FIELD occurrence_date ON TABLE occurrence TYPE string;
DEFINE FIELD start_at ON TABLE occurrence TYPE datetime;
DEFINE FIELD end_at ON TABLE occurrence TYPE datetime;
DEFINE FIELD status ON TABLE occurrence TYPE string \
    ASSERT $value IN ['Scheduled', 'Completed', 'Cancelled', 'NoShow'];
DEFINE FIELD source ON TABLE occurrence TYPE string \
    ASSERT $value IN ['Generated', 'Manual', 'Rescheduled'];
DEFINE FIELD original_date ON TABLE occurrence TYPE option<datetime>;
DEFINE FIELD subject ON TABLE occurrence TYPE string;
DEFINE FIELD class_type ON TABLE occurrence TYPE string \
    ASSERT $value IN ['OneToOne', 'Group', 'Online'];
DEFINE FIELD notes ON TABLE occurrence TYPE option<string>;
DEFINE FIELD flagged ON TABLE occurrence TYPE bool DEFAULT false;
DEFINE FIELD flag_parent_id ON TABLE occurrence TYPE option<string>;
DEFINE FIELD flag_comment ON TABLE occurrence TYPE option<string>;
DEFINE FIELD flagged_at ON TABLE occurrence TYPE option<datetime>;
DEFINE FIELD created_at ON TABLE occurrence TYPE datetime \
    DEFAULT time::now();
DEFINE FIELD updated_at ON TABLE occurrence TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX idx_occurrence_slot ON TABLE occurrence \
    COLUMNS slot_key UNIQUE;
DEFINE INDEX idx_occurrence_template ON TABLE occurrence \
    COLUMNS template_id;
DEFINE INDEX idx_occurrence_end ON TABLE occurrence COLUMNS end_at;

-- =======================================================================
-- Change requests
-- =======================================================================
DEFINE TABLE change_request SCHEMAFULL;
DEFINE FIELD occurrence_id ON TABLE change_request TYPE string;
DEFINE FIELD requester_type ON TABLE change_request TYPE string \
    ASSERT $value IN ['Parent', 'Tutor'];
DEFINE FIELD requester_id ON TABLE change_request TYPE string;
DEFINE FIELD request_type ON TABLE change_request TYPE string \
    ASSERT $value IN ['Cancel', 'Reschedule'];
DEFINE FIELD proposed_start ON TABLE change_request TYPE option<datetime>;
DEFINE FIELD proposed_end ON TABLE change_request TYPE option<datetime>;
DEFINE FIELD message ON TABLE change_request TYPE option<string>;
DEFINE FIELD reason ON TABLE change_request TYPE option<string>;
DEFINE FIELD original_date ON TABLE change_request TYPE datetime;
DEFINE FIELD status ON TABLE change_request TYPE string \
    ASSERT $value IN ['Pending', 'Acknowledged', 'Approved', 'Rejected'];
DEFINE FIELD admin_notes ON TABLE change_request TYPE option<string>;
DEFINE FIELD processed_by ON TABLE change_request TYPE option<string>;
DEFINE FIELD processed_at ON TABLE change_request TYPE option<datetime>;
DEFINE FIELD created_at ON TABLE change_request TYPE datetime \
    DEFAULT time::now();
DEFINE FIELD updated_at ON TABLE change_request TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX idx_change_request_occurrence ON TABLE change_request \
    COLUMNS occurrence_id;
DEFINE INDEX idx_change_request_status ON TABLE change_request \
    COLUMNS status;

-- =======================================================================
-- Timesheets
-- link_key is the occurrence id, or 'unlinked:<id>' for free entries.
-- =======================================================================
DEFINE TABLE timesheet SCHEMAFULL;
DEFINE FIELD occurrence_id ON TABLE timesheet TYPE option<string>;
DEFINE FIELD link_key ON TABLE timesheet TYPE string;
DEFINE FIELD tutor_id ON TABLE timesheet TYPE string;
DEFINE FIELD student_id ON TABLE timesheet TYPE string;
DEFINE FIELD session_date ON TABLE timesheet TYPE string;
DEFINE FIELD start_at ON TABLE timesheet TYPE datetime;
DEFINE FIELD end_at ON TABLE timesheet TYPE datetime;
DEFINE FIELD duration_minutes ON TABLE timesheet TYPE int;
DEFINE FIELD subject ON TABLE timesheet TYPE string;
DEFINE FIELD created_at ON TABLE timesheet TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX idx_timesheet_link ON TABLE timesheet \
    COLUMNS link_key UNIQUE;

-- =======================================================================
-- Session logging alerts
-- =======================================================================
DEFINE TABLE logging_alert SCHEMAFULL;
DEFINE FIELD occurrence_id ON TABLE logging_alert TYPE string;
DEFINE FIELD tutor_id ON TABLE logging_alert TYPE string;
DEFINE FIELD student_id ON TABLE logging_alert TYPE option<string>;
DEFINE FIELD session_end ON TABLE logging_alert TYPE datetime;
DEFINE FIELD status ON TABLE logging_alert TYPE string \
    ASSERT $value IN ['Pending', 'Resolved', 'Dismissed'];
DEFINE FIELD timesheet_id ON TABLE logging_alert TYPE option<string>;
DEFINE FIELD resolved_at ON TABLE logging_alert TYPE option<datetime>;
DEFINE FIELD dismissed_by ON TABLE logging_alert TYPE option<string>;
DEFINE FIELD dismissal_reason ON TABLE logging_alert TYPE option<string>;
DEFINE FIELD dismissed_at ON TABLE logging_alert TYPE option<datetime>;
DEFINE FIELD created_at ON TABLE logging_alert TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX idx_logging_alert_occurrence ON TABLE logging_alert \
    COLUMNS occurrence_id UNIQUE;
DEFINE INDEX idx_logging_alert_status ON TABLE logging_alert \
    COLUMNS status;

-- =======================================================================
-- Invoice payment alerts
-- =======================================================================
DEFINE TABLE invoice_alert SCHEMAFULL;
DEFINE FIELD invoice_id ON TABLE invoice_alert TYPE string;
DEFINE FIELD student_id ON TABLE invoice_alert TYPE string;
DEFINE FIELD parent_id ON TABLE invoice_alert TYPE option<string>;
DEFINE FIELD due_date ON TABLE invoice_alert TYPE string;
DEFINE FIELD sent_at ON TABLE invoice_alert TYPE datetime;
DEFINE FIELD status ON TABLE invoice_alert TYPE string \
    ASSERT $value IN ['Pending', 'Resolved', 'Dismissed'];
DEFINE FIELD resolved_at ON TABLE invoice_alert TYPE option<datetime>;
DEFINE FIELD dismissed_by ON TABLE invoice_alert TYPE option<string>;
DEFINE FIELD dismissal_reason ON TABLE invoice_alert TYPE option<string>;
DEFINE FIELD dismissed_at ON TABLE invoice_alert TYPE option<datetime>;
DEFINE FIELD created_at ON TABLE invoice_alert TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX idx_invoice_alert_invoice ON TABLE invoice_alert \
    COLUMNS invoice_id UNIQUE;
DEFINE INDEX idx_invoice_alert_status ON TABLE invoice_alert \
    COLUMNS status;

-- =======================================================================
-- Students (billing profile) and parent links
-- =======================================================================
DEFINE TABLE student SCHEMAFULL;
DEFINE FIELD name ON TABLE student TYPE string;
DEFINE FIELD group_id ON TABLE student TYPE option<string>;
DEFINE FIELD remaining_sessions ON TABLE student TYPE int DEFAULT 0;
DEFINE FIELD auto_invoice ON TABLE student TYPE bool DEFAULT false;
DEFINE FIELD default_pack_size ON TABLE student TYPE int DEFAULT 0 \
    ASSERT $value >= 0;
DEFINE FIELD rate_cents ON TABLE student TYPE int DEFAULT 0;
DEFINE FIELD scheduled_invoice_send_at ON TABLE student \
    TYPE option<datetime>;
DEFINE FIELD created_at ON TABLE student TYPE datetime \
    DEFAULT time::now();
DEFINE FIELD updated_at ON TABLE student TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX idx_student_group ON TABLE student COLUMNS group_id;

DEFINE TABLE parent_student SCHEMAFULL;
DEFINE FIELD parent_id ON TABLE parent_student TYPE string;
DEFINE FIELD student_id ON TABLE parent_student TYPE string;
DEFINE FIELD created_at ON TABLE parent_student TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX idx_parent_student_unique ON TABLE parent_student \
    COLUMNS parent_id, student_id UNIQUE;

-- =======================================================================
-- Invoices and reminder bookkeeping
-- =======================================================================
DEFINE TABLE invoice SCHEMAFULL;
DEFINE FIELD invoice_number ON TABLE invoice TYPE string;
DEFINE FIELD student_id ON TABLE invoice TYPE string;
DEFINE FIELD parent_id ON TABLE invoice TYPE option<string>;
DEFINE FIELD session_count ON TABLE invoice TYPE int;
DEFINE FIELD rate_cents ON TABLE invoice TYPE int;
DEFINE FIELD amount_cents ON TABLE invoice TYPE int;
DEFINE FIELD status ON TABLE invoice TYPE string \
    ASSERT $value IN ['Scheduled', 'Sent', 'Paid', 'Cancelled'];
DEFINE FIELD send_at ON TABLE invoice TYPE datetime;
DEFINE FIELD sent_at ON TABLE invoice TYPE option<datetime>;
DEFINE FIELD due_date ON TABLE invoice TYPE string;
DEFINE FIELD paid_at ON TABLE invoice TYPE option<datetime>;
DEFINE FIELD auto_generated ON TABLE invoice TYPE bool DEFAULT false;
DEFINE FIELD created_at ON TABLE invoice TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX idx_invoice_number ON TABLE invoice \
    COLUMNS invoice_number UNIQUE;
DEFINE INDEX idx_invoice_student ON TABLE invoice COLUMNS student_id;
DEFINE INDEX idx_invoice_status ON TABLE invoice COLUMNS status;

DEFINE TABLE invoice_reminder SCHEMAFULL;
DEFINE FIELD invoice_id ON TABLE invoice_reminder TYPE string;
DEFINE FIELD threshold_days ON TABLE invoice_reminder TYPE int;
DEFINE FIELD created_at ON TABLE invoice_reminder TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX idx_invoice_reminder_unique ON TABLE invoice_reminder \
    COLUMNS invoice_id, threshold_days UNIQUE;

-- =======================================================================
-- Audit Log (append-only)
-- =======================================================================
DEFINE TABLE audit_log SCHEMAFULL
    PERMISSIONS
        FOR create FULL
        FOR select FULL
        FOR update NONE
        FOR delete NONE;
DEFINE FIELD actor_id ON TABLE audit_log TYPE option<string>;
DEFINE FIELD actor_type ON TABLE audit_log TYPE string \
    ASSERT $value IN ['Admin', 'Parent', 'Tutor', 'System'];
DEFINE FIELD action ON TABLE audit_log TYPE string;
DEFINE FIELD resource_id ON TABLE audit_log TYPE option<string>;
DEFINE FIELD outcome ON TABLE audit_log TYPE string \
    ASSERT $value IN ['Success', 'Failure', 'Denied'];
DEFINE FIELD metadata ON TABLE audit_log TYPE object FLEXIBLE \
    DEFAULT {};
DEFINE FIELD timestamp ON TABLE audit_log TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX idx_audit_time ON TABLE audit_log COLUMNS timestamp;
DEFINE INDEX idx_audit_resource ON TABLE audit_log COLUMNS resource_id;

-- =======================================================================
-- Notifications (picked up by the delivery service)
-- =======================================================================
DEFINE TABLE notification SCHEMAFULL;
DEFINE FIELD recipient_role ON TABLE notification TYPE string \
    ASSERT $value IN ['Parent', 'Tutor', 'Admin'];
DEFINE FIELD recipient_id ON TABLE notification TYPE string;
DEFINE FIELD kind ON TABLE notification TYPE string;
DEFINE FIELD payload ON TABLE notification TYPE object FLEXIBLE \
    DEFAULT {};
DEFINE FIELD created_at ON TABLE notification TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX idx_notification_recipient ON TABLE notification \
    COLUMNS recipient_id;

-- =======================================================================
-- Periodic job watermarks
-- =======================================================================
DEFINE TABLE scan_watermark SCHEMAFULL;
DEFINE FIELD last_run_at ON TABLE scan_watermark TYPE datetime;
";

/// Run all pending migrations against the database.
///
/// Creates a `_migration` tracking table on first run, then applies
/// each migration whose version exceeds the current maximum.
pub async fn run_migrations<C: Connection>(db: &Surreal<C>) -> Result<(), DbError> {
    db.query(MIGRATION_TABLE_DDL)
        .await?
        .check()
        .map_err(|e| DbError::Migration(e.to_string()))?;

    let mut result = db
        .query("SELECT * FROM _migration ORDER BY version DESC LIMIT 1")
        .await?;
    let records: Vec<MigrationRecord> = result.take(0)?;
    let current_version = records.first().map(|m| m.version).unwrap_or(0);

    for migration in MIGRATIONS {
        if migration.version > current_version {
            info!(
                version = migration.version,
                name = migration.name,
                "Applying migration"
            );
            db.query(migration.sql).await?.check().map_err(|e| {
                DbError::Migration(format!(
                    "Migration v{} '{}' failed: {}",
                    migration.version, migration.name, e,
                ))
            })?;

            db.query(
                "CREATE _migration SET version = $version, \
                 name = $name",
            )
            .bind(("version", migration.version))
            .bind(("name", migration.name))
            .await?
            .check()
            .map_err(|e| {
                DbError::Migration(format!(
                    "Failed to record migration v{}: {}",
                    migration.version, e,
                ))
            })?;

            info!(
                version = migration.version,
                "Migration applied successfully"
            );
        }
    }

    Ok(())
}

/// Returns the raw schema DDL for version 1.
pub fn schema_v1() -> &'static str {
    SCHEMA_V1
}
