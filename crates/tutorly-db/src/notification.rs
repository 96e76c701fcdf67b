//! Notification sink that persists requests to the `notification`
//! table, where the delivery service picks them up.

use chrono::{DateTime, Utc};
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use tutorly_core::error::TutorlyResult;
use tutorly_core::models::notification::{
    CreateNotification, Notification, NotificationKind, Recipient,
};
use tutorly_core::notify::NotificationSink;
use uuid::Uuid;

use crate::codec;
use crate::error::DbError;

#[derive(Debug, SurrealValue)]
struct NotificationRow {
    record_id: String,
    recipient_role: String,
    recipient_id: String,
    kind: String,
    payload: serde_json::Value,
    created_at: DateTime<Utc>,
}

fn recipient_columns(recipient: Recipient) -> (&'static str, String) {
    match recipient {
        Recipient::Parent(id) => ("Parent", id.to_string()),
        Recipient::Tutor(id) => ("Tutor", id.to_string()),
        Recipient::Admin(id) => ("Admin", id.to_string()),
    }
}

impl NotificationRow {
    fn try_into_notification(self) -> Result<Notification, DbError> {
        let id = codec::parse_uuid("recipient_id", &self.recipient_id)?;
        let recipient = match self.recipient_role.as_str() {
            "Parent" => Recipient::Parent(id),
            "Tutor" => Recipient::Tutor(id),
            "Admin" => Recipient::Admin(id),
            other => return Err(DbError::decode("recipient_role", other)),
        };
        let kind = NotificationKind::parse(&self.kind)
            .ok_or_else(|| DbError::decode("kind", &self.kind))?;

        Ok(Notification {
            id: codec::parse_uuid("id", &self.record_id)?,
            recipient,
            kind,
            payload: self.payload,
            created_at: self.created_at,
        })
    }
}

#[derive(Clone)]
pub struct SurrealNotificationSink<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealNotificationSink<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }

    /// Notifications addressed to one recipient id, oldest first.
    pub async fn list_for_recipient(&self, recipient_id: Uuid) -> TutorlyResult<Vec<Notification>> {
        let mut result = self
            .db
            .query(
                "SELECT meta::id(id) AS record_id, * FROM notification \
                 WHERE recipient_id = $recipient_id ORDER BY created_at ASC",
            )
            .bind(("recipient_id", recipient_id.to_string()))
            .await
            .map_err(DbError::from)?;
        let rows: Vec<NotificationRow> = result.take(0).map_err(DbError::from)?;

        let items = rows
            .into_iter()
            .map(NotificationRow::try_into_notification)
            .collect::<Result<Vec<_>, DbError>>()?;
        Ok(items)
    }
}

impl<C: Connection> NotificationSink for SurrealNotificationSink<C> {
    async fn create_notification(&self, input: CreateNotification) -> TutorlyResult<()> {
        let (role, recipient_id) = recipient_columns(input.recipient);

        self.db
            .query(
                "CREATE type::record('notification', $id) SET \
                 recipient_role = $role, recipient_id = $recipient_id, \
                 kind = $kind, payload = $payload",
            )
            .bind(("id", Uuid::new_v4().to_string()))
            .bind(("role", role.to_string()))
            .bind(("recipient_id", recipient_id))
            .bind(("kind", input.kind.as_str().to_string()))
            .bind(("payload", input.payload))
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(|e| DbError::statement("notification", e))?;

        Ok(())
    }
}
