//! SurrealDB implementation of [`ScanWatermarkRepository`].
//!
//! One record per scan, keyed by the scan name.

use chrono::{DateTime, Utc};
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use tutorly_core::error::TutorlyResult;
use tutorly_core::repository::ScanWatermarkRepository;

use crate::error::DbError;

#[derive(Debug, SurrealValue)]
struct WatermarkRow {
    last_run_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct SurrealScanWatermarkRepository<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealScanWatermarkRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }
}

impl<C: Connection> ScanWatermarkRepository for SurrealScanWatermarkRepository<C> {
    async fn last_run(&self, scan: &str) -> TutorlyResult<Option<DateTime<Utc>>> {
        let mut result = self
            .db
            .query("SELECT last_run_at FROM type::record('scan_watermark', $scan)")
            .bind(("scan", scan.to_string()))
            .await
            .map_err(DbError::from)?;
        let rows: Vec<WatermarkRow> = result.take(0).map_err(DbError::from)?;

        Ok(rows.first().map(|r| r.last_run_at))
    }

    async fn record_run(&self, scan: &str, at: DateTime<Utc>) -> TutorlyResult<()> {
        self.db
            .query("UPSERT type::record('scan_watermark', $scan) SET last_run_at = $at")
            .bind(("scan", scan.to_string()))
            .bind(("at", at))
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(|e| DbError::statement("scan_watermark", e))?;

        Ok(())
    }
}
