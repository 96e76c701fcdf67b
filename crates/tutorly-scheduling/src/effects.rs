//! Best-effort side effects: audit entries and notifications.
//!
//! Neither may fail the business operation that produced them, so
//! both helpers log and swallow errors.

use tracing::warn;
use tutorly_core::models::audit::{ActorType, AuditOutcome, CreateAuditLogEntry};
use tutorly_core::models::change_request::Requester;
use tutorly_core::models::notification::{CreateNotification, NotificationKind, Recipient};
use tutorly_core::notify::NotificationSink;
use tutorly_core::repository::{AuditLogRepository, Store};
use uuid::Uuid;

/// Audit entry under construction.
pub(crate) struct AuditRecord {
    pub actor_id: Option<Uuid>,
    pub actor_type: ActorType,
    pub action: &'static str,
    pub resource_id: Option<Uuid>,
    pub outcome: AuditOutcome,
    pub metadata: serde_json::Value,
}

impl AuditRecord {
    pub fn admin(admin_id: Uuid, action: &'static str, resource_id: Uuid) -> Self {
        Self {
            actor_id: Some(admin_id),
            actor_type: ActorType::Admin,
            action,
            resource_id: Some(resource_id),
            outcome: AuditOutcome::Success,
            metadata: serde_json::json!({}),
        }
    }

    pub fn requester(requester: Requester, action: &'static str, resource_id: Uuid) -> Self {
        let actor_type = match requester {
            Requester::Parent(_) => ActorType::Parent,
            Requester::Tutor(_) => ActorType::Tutor,
        };
        Self {
            actor_id: Some(requester.id()),
            actor_type,
            action,
            resource_id: Some(resource_id),
            outcome: AuditOutcome::Success,
            metadata: serde_json::json!({}),
        }
    }

    pub fn outcome(mut self, outcome: AuditOutcome) -> Self {
        self.outcome = outcome;
        self
    }

    pub fn metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

pub(crate) async fn audit<S: Store>(store: &S, record: AuditRecord) {
    let action = record.action;
    let entry = CreateAuditLogEntry {
        actor_id: record.actor_id,
        actor_type: record.actor_type,
        action: record.action.to_string(),
        resource_id: record.resource_id,
        outcome: record.outcome,
        metadata: record.metadata,
    };
    if let Err(e) = store.audit().append(entry).await {
        warn!(action, error = %e, "Failed to append audit entry");
    }
}

pub(crate) async fn notify<N: NotificationSink>(
    notifier: &N,
    recipient: Recipient,
    kind: NotificationKind,
    payload: serde_json::Value,
) {
    let input = CreateNotification {
        recipient,
        kind,
        payload,
    };
    if let Err(e) = notifier.create_notification(input).await {
        warn!(
            kind = kind.as_str(),
            recipient = %recipient.id(),
            error = %e,
            "Failed to create notification"
        );
    }
}

pub(crate) fn requester_recipient(requester: Requester) -> Recipient {
    match requester {
        Requester::Parent(id) => Recipient::Parent(id),
        Requester::Tutor(id) => Recipient::Tutor(id),
    }
}
