//! Change request workflow.
//!
//! A requester (parent or tutor) asks to cancel or reschedule a session
//! they own; an admin approves or rejects. Decisions are recorded with a
//! compare-and-set on the request's open state before the occurrence is
//! touched, so a request can be applied at most once. When the
//! occurrence change then fails, the decision is rolled back and the
//! request is open again.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};
use tutorly_core::clock::Clock;
use tutorly_core::error::{TutorlyError, TutorlyResult};
use tutorly_core::models::audit::AuditOutcome;
use tutorly_core::models::change_request::{
    ChangeProposal, ChangeRequest, ChangeRequestStatus, CreateChangeRequest, Decision,
    RecordDecision, RequestType, Requester, Resolution,
};
use tutorly_core::models::notification::{NotificationKind, Recipient};
use tutorly_core::models::occurrence::{Occurrence, OccurrenceStatus, TimeSlot};
use tutorly_core::notify::NotificationSink;
use tutorly_core::repository::{
    ChangeRequestRepository, OccurrenceRepository, PaginatedResult, Pagination, Store,
};
use uuid::Uuid;

use crate::effects::{self, AuditRecord};
use crate::error::SchedulingError;
use crate::events::DomainEvent;
use crate::lifecycle::OccurrenceLifecycle;

/// What approving a request will do to its occurrence, decided before
/// anything is written.
enum Effect {
    Cancel,
    Move(TimeSlot),
    None,
}

/// A decided request and the events its occurrence change caused.
#[derive(Debug)]
pub struct Resolved {
    pub request: ChangeRequest,
    pub events: Vec<DomainEvent>,
}

fn request_type_str(request_type: RequestType) -> &'static str {
    match request_type {
        RequestType::Cancel => "cancel",
        RequestType::Reschedule => "reschedule",
    }
}

fn requester_type_str(requester: Requester) -> &'static str {
    match requester {
        Requester::Parent(_) => "parent",
        Requester::Tutor(_) => "tutor",
    }
}

/// A decision or lookup that found nothing open lost a race with
/// another admin.
fn closed_on_not_found(err: TutorlyError) -> TutorlyError {
    match err {
        TutorlyError::NotFound { .. } => SchedulingError::RequestClosed.into(),
        other => other,
    }
}

pub struct ChangeRequestWorkflow<S: Store, N: NotificationSink> {
    store: Arc<S>,
    notifier: Arc<N>,
    clock: Arc<dyn Clock>,
    lifecycle: Arc<OccurrenceLifecycle<S>>,
}

impl<S: Store, N: NotificationSink> ChangeRequestWorkflow<S, N> {
    pub fn new(
        store: Arc<S>,
        notifier: Arc<N>,
        clock: Arc<dyn Clock>,
        lifecycle: Arc<OccurrenceLifecycle<S>>,
    ) -> Self {
        Self {
            store,
            notifier,
            clock,
            lifecycle,
        }
    }

    async fn owns(&self, requester: Requester, occurrence: &Occurrence) -> TutorlyResult<bool> {
        match requester {
            Requester::Tutor(tutor_id) => Ok(occurrence.tutor_id == tutor_id),
            Requester::Parent(parent_id) => self.lifecycle.parent_owns(parent_id, occurrence).await,
        }
    }

    /// File a request against a scheduled session the requester owns.
    /// At most one request per occurrence may be open at a time.
    pub async fn submit(
        &self,
        occurrence_id: Uuid,
        requester: Requester,
        proposal: ChangeProposal,
    ) -> TutorlyResult<ChangeRequest> {
        proposal.validate()?;
        let occurrence = self.store.occurrences().get_by_id(occurrence_id).await?;

        if !self.owns(requester, &occurrence).await? {
            warn!(
                %occurrence_id,
                requester_id = %requester.id(),
                requester_type = requester_type_str(requester),
                "Change request denied: not the session owner"
            );
            effects::audit(
                self.store.as_ref(),
                AuditRecord::requester(requester, "change_request.submit", occurrence_id)
                    .outcome(AuditOutcome::Denied),
            )
            .await;
            return Err(SchedulingError::NotOwner.into());
        }

        if occurrence.status != OccurrenceStatus::Scheduled {
            return Err(SchedulingError::NotScheduled(occurrence.status).into());
        }
        let open = self
            .store
            .change_requests()
            .list_open_for_occurrence(occurrence_id)
            .await?;
        if !open.is_empty() {
            return Err(SchedulingError::OpenRequestExists.into());
        }

        let request_type = proposal.request_type();
        let request = self
            .store
            .change_requests()
            .create(CreateChangeRequest {
                occurrence_id,
                requester,
                proposal,
                original_date: occurrence.start_at,
            })
            .await?;
        info!(
            request_id = %request.id,
            %occurrence_id,
            request_type = request_type_str(request_type),
            requester_type = requester_type_str(requester),
            "Change request submitted"
        );

        effects::audit(
            self.store.as_ref(),
            AuditRecord::requester(requester, "change_request.submit", request.id).metadata(
                serde_json::json!({
                    "occurrence_id": occurrence_id,
                    "request_type": request_type_str(request_type),
                }),
            ),
        )
        .await;
        Ok(request)
    }

    /// Approve or reject an open request.
    pub async fn resolve(
        &self,
        id: Uuid,
        decision: Decision,
        admin_id: Uuid,
        admin_notes: Option<String>,
    ) -> TutorlyResult<Resolved> {
        let requests = self.store.change_requests();
        let open = requests.get_by_id(id).await?;
        if !open.status.is_open() {
            return Err(SchedulingError::RequestClosed.into());
        }
        let occurrence = match self.store.occurrences().get_by_id(open.occurrence_id).await {
            Ok(occurrence) => occurrence,
            Err(TutorlyError::NotFound { .. }) => return Err(SchedulingError::OccurrenceGone.into()),
            Err(e) => return Err(e),
        };

        let effect = match decision {
            Decision::Reject => Effect::None,
            Decision::Approve { override_slot } => {
                // A session closed since submission cannot be changed.
                if occurrence.status != OccurrenceStatus::Scheduled {
                    return Err(SchedulingError::NotScheduled(occurrence.status).into());
                }
                match &open.proposal {
                    ChangeProposal::Cancel { .. } => Effect::Cancel,
                    ChangeProposal::Reschedule { slot, .. } => {
                        let slot = (*slot)
                            .or(override_slot)
                            .ok_or(SchedulingError::MissingRescheduleSlot)?;
                        slot.validate()?;
                        Effect::Move(slot)
                    }
                }
            }
        };

        let resolution = decision.resolution();
        let decided_at = self.clock.now();
        let request = requests
            .record_decision(
                id,
                RecordDecision {
                    status: ChangeRequestStatus::Resolved(resolution),
                    admin_notes: admin_notes.clone(),
                    processed_by: admin_id,
                    processed_at: decided_at,
                },
            )
            .await
            .map_err(closed_on_not_found)?;

        let before_start = occurrence.start_at;
        let applied = match effect {
            Effect::Cancel => self
                .lifecycle
                .apply_status(occurrence, OccurrenceStatus::Cancelled)
                .await
                .map(Some),
            Effect::Move(slot) => self.lifecycle.apply_reschedule(occurrence, slot).await.map(Some),
            Effect::None => Ok(None),
        };
        let transition = match applied {
            Ok(transition) => transition,
            Err(e) => return Err(self.undo_decision(open, decided_at, e).await),
        };
        let after_start = transition.as_ref().map(|t| t.occurrence.start_at);

        info!(
            request_id = %id,
            occurrence_id = %request.occurrence_id,
            resolution = ?resolution,
            %admin_id,
            "Change request resolved"
        );

        self.notify_decision(&request, transition.as_ref().map(|t| &t.occurrence))
            .await;

        let action = match resolution {
            Resolution::Approved => "change_request.approve",
            Resolution::Rejected => "change_request.reject",
        };
        effects::audit(
            self.store.as_ref(),
            AuditRecord::admin(admin_id, action, id).metadata(serde_json::json!({
                "occurrence_id": request.occurrence_id,
                "request_type": request_type_str(request.proposal.request_type()),
                "requester_type": requester_type_str(request.requester),
                "admin_notes": admin_notes,
                "before": { "start_at": before_start },
                "after": { "start_at": after_start.unwrap_or(before_start) },
            })),
        )
        .await;

        Ok(Resolved {
            request,
            events: transition.map(|t| t.events).unwrap_or_default(),
        })
    }

    /// The occurrence could not be changed after the decision was
    /// stored. Put the request back in its open state and report why.
    async fn undo_decision(
        &self,
        open: ChangeRequest,
        decided_at: DateTime<Utc>,
        err: TutorlyError,
    ) -> TutorlyError {
        let id = open.id;
        warn!(request_id = %id, error = %err, "Occurrence change failed, reopening request");
        if let Err(e) = self.store.change_requests().reopen(open, decided_at).await {
            warn!(request_id = %id, error = %e, "Failed to reopen change request");
        }
        match err {
            TutorlyError::NotFound { .. } => SchedulingError::OccurrenceGone.into(),
            other => other,
        }
    }

    async fn notify_decision(&self, request: &ChangeRequest, changed: Option<&Occurrence>) {
        let mut payload = serde_json::json!({
            "change_request_id": request.id,
            "occurrence_id": request.occurrence_id,
            "request_type": request_type_str(request.proposal.request_type()),
            "admin_notes": request.admin_notes,
        });
        if let Some(occurrence) = changed {
            payload["start_at"] = serde_json::json!(occurrence.start_at);
            payload["end_at"] = serde_json::json!(occurrence.end_at);
            payload["status"] = serde_json::json!(occurrence.status);
        }

        let kind = match request.status {
            ChangeRequestStatus::Resolved(Resolution::Rejected) => NotificationKind::ChangeRequestRejected,
            _ => NotificationKind::ChangeRequestApproved,
        };
        effects::notify(
            self.notifier.as_ref(),
            effects::requester_recipient(request.requester),
            kind,
            payload.clone(),
        )
        .await;

        // Parent-originated changes are also announced to the tutor.
        if kind == NotificationKind::ChangeRequestApproved
            && let Requester::Parent(_) = request.requester
            && let Some(occurrence) = changed
        {
            effects::notify(
                self.notifier.as_ref(),
                Recipient::Tutor(occurrence.tutor_id),
                NotificationKind::SessionChangedByParentRequest,
                payload,
            )
            .await;
        }
    }

    /// Legacy soft acknowledgment. The request stays open and the
    /// occurrence is untouched.
    pub async fn acknowledge(
        &self,
        id: Uuid,
        admin_id: Uuid,
        notes: Option<String>,
    ) -> TutorlyResult<ChangeRequest> {
        let requests = self.store.change_requests();
        let current = requests.get_by_id(id).await?;
        if !current.status.is_open() {
            return Err(SchedulingError::RequestClosed.into());
        }

        let request = requests
            .record_decision(
                id,
                RecordDecision {
                    status: ChangeRequestStatus::Acknowledged,
                    admin_notes: notes.clone().or(current.admin_notes),
                    processed_by: admin_id,
                    processed_at: self.clock.now(),
                },
            )
            .await
            .map_err(closed_on_not_found)?;
        info!(request_id = %id, %admin_id, "Change request acknowledged");

        effects::audit(
            self.store.as_ref(),
            AuditRecord::admin(admin_id, "change_request.acknowledge", id).metadata(
                serde_json::json!({
                    "occurrence_id": request.occurrence_id,
                    "admin_notes": notes,
                }),
            ),
        )
        .await;
        Ok(request)
    }

    pub async fn get(&self, id: Uuid) -> TutorlyResult<ChangeRequest> {
        self.store.change_requests().get_by_id(id).await
    }

    /// Admin queue of open requests, oldest first.
    pub async fn list_open(&self, pagination: Pagination) -> TutorlyResult<PaginatedResult<ChangeRequest>> {
        self.store.change_requests().list_open(pagination).await
    }
}
