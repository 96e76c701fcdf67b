//! String encodings for values stored as plain strings.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc, Weekday};
use tutorly_core::models::alert::{AlertStatus, Dismissal};
use tutorly_core::models::attendee::Attendee;
use tutorly_core::models::template::ClassType;
use uuid::Uuid;

use crate::error::DbError;

pub(crate) const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M:%S";

pub(crate) fn parse_uuid(field: &str, value: &str) -> Result<Uuid, DbError> {
    Uuid::parse_str(value).map_err(|e| DbError::decode(field, e))
}

pub(crate) fn parse_opt_uuid(field: &str, value: Option<&str>) -> Result<Option<Uuid>, DbError> {
    value.map(|v| parse_uuid(field, v)).transpose()
}

pub(crate) fn date_to_string(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

pub(crate) fn parse_date(field: &str, value: &str) -> Result<NaiveDate, DbError> {
    NaiveDate::parse_from_str(value, DATE_FORMAT).map_err(|e| DbError::decode(field, e))
}

pub(crate) fn time_to_string(time: NaiveTime) -> String {
    time.format(TIME_FORMAT).to_string()
}

pub(crate) fn parse_time(field: &str, value: &str) -> Result<NaiveTime, DbError> {
    NaiveTime::parse_from_str(value, TIME_FORMAT).map_err(|e| DbError::decode(field, e))
}

pub(crate) fn weekday_to_string(weekday: Weekday) -> String {
    weekday.to_string()
}

pub(crate) fn parse_weekday(value: &str) -> Result<Weekday, DbError> {
    value
        .parse::<Weekday>()
        .map_err(|_| DbError::decode("weekday", value))
}

pub(crate) fn class_type_to_string(class_type: ClassType) -> &'static str {
    match class_type {
        ClassType::OneToOne => "OneToOne",
        ClassType::Group => "Group",
        ClassType::Online => "Online",
    }
}

pub(crate) fn parse_class_type(value: &str) -> Result<ClassType, DbError> {
    match value {
        "OneToOne" => Ok(ClassType::OneToOne),
        "Group" => Ok(ClassType::Group),
        "Online" => Ok(ClassType::Online),
        other => Err(DbError::decode("class_type", other)),
    }
}

/// Split an attendee into its `(attendee_kind, attendee_id)` columns.
pub(crate) fn attendee_columns(attendee: Attendee) -> (&'static str, String) {
    match attendee {
        Attendee::Student(id) => ("Student", id.to_string()),
        Attendee::Group(id) => ("Group", id.to_string()),
    }
}

pub(crate) fn parse_attendee(kind: &str, id: &str) -> Result<Attendee, DbError> {
    let id = parse_uuid("attendee_id", id)?;
    match kind {
        "Student" => Ok(Attendee::Student(id)),
        "Group" => Ok(Attendee::Group(id)),
        other => Err(DbError::decode("attendee_kind", other)),
    }
}

pub(crate) fn alert_status_to_string(status: AlertStatus) -> &'static str {
    match status {
        AlertStatus::Pending => "Pending",
        AlertStatus::Resolved => "Resolved",
        AlertStatus::Dismissed => "Dismissed",
    }
}

pub(crate) fn parse_alert_status(value: &str) -> Result<AlertStatus, DbError> {
    match value {
        "Pending" => Ok(AlertStatus::Pending),
        "Resolved" => Ok(AlertStatus::Resolved),
        "Dismissed" => Ok(AlertStatus::Dismissed),
        other => Err(DbError::decode("alert status", other)),
    }
}

/// Rebuild a dismissal from its columns. A dismissal exists iff
/// `dismissed_at` is set.
pub(crate) fn parse_dismissal(
    dismissed_by: Option<&str>,
    reason: Option<String>,
    dismissed_at: Option<DateTime<Utc>>,
) -> Result<Option<Dismissal>, DbError> {
    let Some(dismissed_at) = dismissed_at else {
        return Ok(None);
    };
    Ok(Some(Dismissal {
        dismissed_by: parse_opt_uuid("dismissed_by", dismissed_by)?,
        reason: reason.unwrap_or_default(),
        dismissed_at,
    }))
}
