//! Scheduling engine configuration.

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Offset, Utc};
use serde::Deserialize;

use crate::error::SchedulingError;

/// Configuration for the scheduling engine.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulingConfig {
    /// Offset of the business time zone from UTC, in minutes. Template
    /// wall-clock times and calendar dates are resolved in this zone.
    pub utc_offset_minutes: i32,
    /// Hours after a session ends before an unlogged session is
    /// overdue (default: 24).
    pub logging_alert_grace_hours: u32,
    /// How far back the logging scan looks for ended sessions
    /// (default: 30 days). A scan never looks less far back than the
    /// previous run's cutoff.
    pub logging_alert_lookback_days: u32,
    /// Days after sending before an unpaid invoice is overdue
    /// (default: 2).
    pub invoice_alert_grace_days: u32,
    /// Days after sending at which payment reminders go out.
    pub reminder_thresholds_days: Vec<u32>,
    /// Days from the send date to the due date of an auto-generated
    /// invoice (default: 5).
    pub invoice_due_days: u32,
    /// Upper bound on how far ahead a generation request may reach.
    pub max_horizon_days: u32,
    /// Horizon used when a template is created or its schedule edited.
    pub default_horizon_days: u32,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            utc_offset_minutes: 0,
            logging_alert_grace_hours: 24,
            logging_alert_lookback_days: 30,
            invoice_alert_grace_days: 2,
            reminder_thresholds_days: vec![2, 4, 5],
            invoice_due_days: 5,
            max_horizon_days: 366,
            default_horizon_days: 84,
        }
    }
}

impl SchedulingConfig {
    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<(), SchedulingError> {
        if FixedOffset::east_opt(self.utc_offset_minutes.saturating_mul(60)).is_none() {
            return Err(SchedulingError::InvalidConfig(format!(
                "utc_offset_minutes {} is out of range",
                self.utc_offset_minutes
            )));
        }
        if self.default_horizon_days > self.max_horizon_days {
            return Err(SchedulingError::InvalidConfig(
                "default_horizon_days exceeds max_horizon_days".into(),
            ));
        }
        if self.reminder_thresholds_days.contains(&0) {
            return Err(SchedulingError::InvalidConfig(
                "reminder thresholds must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn business_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes.saturating_mul(60)).unwrap_or(Utc.fix())
    }

    /// Calendar date of an instant in the business time zone.
    pub fn local_date(&self, at: DateTime<Utc>) -> NaiveDate {
        at.with_timezone(&self.business_offset()).date_naive()
    }

    pub fn logging_grace(&self) -> Duration {
        Duration::hours(i64::from(self.logging_alert_grace_hours))
    }

    pub fn logging_lookback(&self) -> Duration {
        Duration::days(i64::from(self.logging_alert_lookback_days))
    }

    pub fn invoice_grace(&self) -> Duration {
        Duration::days(i64::from(self.invoice_alert_grace_days))
    }
}
