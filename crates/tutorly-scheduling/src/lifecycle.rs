//! Occurrence status lifecycle.
//!
//! ```text
//! scheduled ──► completed
//!     │
//!     ├───────► cancelled
//!     └───────► no_show
//! ```
//!
//! Only `scheduled` has outgoing edges. Re-applying the current status
//! is accepted and re-emits the transition event so that idempotent
//! handlers can finish work a previous attempt left undone. A
//! reschedule is not a status: the occurrence stays `scheduled` with
//! `source = rescheduled` and the pre-move start kept in
//! `original_date`.

use std::sync::Arc;

use tracing::{debug, info};
use tutorly_core::clock::Clock;
use tutorly_core::error::{TutorlyError, TutorlyResult};
use tutorly_core::models::attendee::Attendee;
use tutorly_core::models::occurrence::{
    CreateOccurrence, Occurrence, OccurrenceSource, OccurrenceStatus, ParentFlag, TimeSlot,
    UpdateOccurrence,
};
use tutorly_core::models::template::ClassType;
use tutorly_core::models::timesheet::{CreateTimesheet, Timesheet};
use tutorly_core::repository::{OccurrenceRepository, Store, StudentRepository, TimesheetRepository};
use uuid::Uuid;

use crate::config::SchedulingConfig;
use crate::error::SchedulingError;
use crate::events::DomainEvent;

/// Whether `from → to` is a lifecycle edge. `Ok(true)` means the
/// status actually changes; `Ok(false)` is an idempotent repeat.
pub fn check_transition(from: OccurrenceStatus, to: OccurrenceStatus) -> Result<bool, SchedulingError> {
    match (from, to) {
        (OccurrenceStatus::Scheduled, OccurrenceStatus::Scheduled) => {
            Err(SchedulingError::InvalidTransition { from, to })
        }
        (OccurrenceStatus::Scheduled, _) => Ok(true),
        (from, to) if from == to => Ok(false),
        (from, to) => Err(SchedulingError::InvalidTransition { from, to }),
    }
}

/// Result of a lifecycle operation: the stored occurrence plus the
/// events its handlers still have to process.
#[derive(Debug)]
pub struct Transition {
    pub occurrence: Occurrence,
    pub events: Vec<DomainEvent>,
}

/// An ad hoc session outside any template.
#[derive(Debug, Clone)]
pub struct ManualOccurrence {
    pub tutor_id: Uuid,
    pub attendee: Attendee,
    pub slot: TimeSlot,
    pub subject: String,
    pub class_type: ClassType,
    pub notes: Option<String>,
}

pub struct OccurrenceLifecycle<S: Store> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    config: SchedulingConfig,
}

impl<S: Store> OccurrenceLifecycle<S> {
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>, config: SchedulingConfig) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    /// Move an occurrence to `new_status`.
    pub async fn transition(&self, id: Uuid, new_status: OccurrenceStatus) -> TutorlyResult<Transition> {
        let current = self.store.occurrences().get_by_id(id).await?;
        self.apply_status(current, new_status).await
    }

    /// Check the edge against an already loaded occurrence and persist.
    pub(crate) async fn apply_status(
        &self,
        current: Occurrence,
        new_status: OccurrenceStatus,
    ) -> TutorlyResult<Transition> {
        let changes = check_transition(current.status, new_status)?;

        let occurrence = if changes {
            let updated = self
                .store
                .occurrences()
                .update(
                    current.id,
                    UpdateOccurrence {
                        status: Some(new_status),
                        ..Default::default()
                    },
                )
                .await?;
            info!(
                occurrence_id = %updated.id,
                from = ?current.status,
                to = ?new_status,
                "Occurrence transitioned"
            );
            updated
        } else {
            debug!(occurrence_id = %current.id, status = ?new_status, "Repeated transition");
            current
        };

        let event = match new_status {
            OccurrenceStatus::Completed => DomainEvent::OccurrenceCompleted(occurrence.clone()),
            _ => DomainEvent::OccurrenceClosed(occurrence.clone()),
        };
        Ok(Transition {
            occurrence,
            events: vec![event],
        })
    }

    /// Create an ad hoc session.
    pub async fn create_manual(&self, input: ManualOccurrence) -> TutorlyResult<Occurrence> {
        input.slot.validate()?;
        if input.subject.trim().is_empty() {
            return Err(SchedulingError::MissingText("subject").into());
        }

        let occurrence = self
            .store
            .occurrences()
            .create(CreateOccurrence {
                template_id: None,
                tutor_id: input.tutor_id,
                attendee: input.attendee,
                occurrence_date: self.config.local_date(input.slot.start()),
                start_at: input.slot.start(),
                end_at: input.slot.end(),
                source: OccurrenceSource::Manual,
                subject: input.subject,
                class_type: input.class_type,
                notes: input.notes,
            })
            .await?;
        info!(occurrence_id = %occurrence.id, "Manual occurrence created");
        Ok(occurrence)
    }

    /// Move a scheduled occurrence to a new slot.
    pub async fn reschedule(&self, id: Uuid, slot: TimeSlot) -> TutorlyResult<Transition> {
        let current = self.store.occurrences().get_by_id(id).await?;
        self.apply_reschedule(current, slot).await
    }

    pub(crate) async fn apply_reschedule(
        &self,
        current: Occurrence,
        slot: TimeSlot,
    ) -> TutorlyResult<Transition> {
        slot.validate()?;
        if current.status != OccurrenceStatus::Scheduled {
            return Err(SchedulingError::NotScheduled(current.status).into());
        }

        // The first move records where the session was originally.
        let original_date = current.original_date.unwrap_or(current.start_at);
        let previous_start = current.start_at;

        let occurrence = self
            .store
            .occurrences()
            .update(
                current.id,
                UpdateOccurrence {
                    occurrence_date: Some(self.config.local_date(slot.start())),
                    start_at: Some(slot.start()),
                    end_at: Some(slot.end()),
                    source: Some(OccurrenceSource::Rescheduled),
                    original_date: Some(original_date),
                    ..Default::default()
                },
            )
            .await?;
        info!(
            occurrence_id = %occurrence.id,
            from = %previous_start,
            to = %occurrence.start_at,
            "Occurrence rescheduled"
        );

        Ok(Transition {
            events: vec![DomainEvent::OccurrenceRescheduled {
                occurrence: occurrence.clone(),
                previous_start,
            }],
            occurrence,
        })
    }

    /// Parent marks a session for admin attention.
    pub async fn flag(&self, id: Uuid, parent_id: Uuid, comment: String) -> TutorlyResult<Occurrence> {
        if comment.trim().is_empty() {
            return Err(SchedulingError::MissingText("comment").into());
        }
        let occurrence = self.store.occurrences().get_by_id(id).await?;
        if !self.parent_owns(parent_id, &occurrence).await? {
            return Err(SchedulingError::NotOwner.into());
        }

        self.store
            .occurrences()
            .update(
                id,
                UpdateOccurrence {
                    parent_flag: Some(ParentFlag {
                        parent_id,
                        comment,
                        flagged_at: self.clock.now(),
                    }),
                    ..Default::default()
                },
            )
            .await
    }

    /// A parent owns a session when linked to its student, or to any
    /// member of its group.
    pub(crate) async fn parent_owns(&self, parent_id: Uuid, occurrence: &Occurrence) -> TutorlyResult<bool> {
        let students = self.store.students();
        match occurrence.attendee {
            Attendee::Student(student_id) => students.is_parent_of(parent_id, student_id).await,
            Attendee::Group(group_id) => {
                for member in students.list_group_members(group_id).await? {
                    if students.is_parent_of(parent_id, member.id).await? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
        }
    }

    /// Create the timesheet for a completed one-to-one session unless
    /// one is already linked. Returns the entry only when this call
    /// created it.
    pub(crate) async fn record_timesheet(&self, occurrence: &Occurrence) -> TutorlyResult<Option<Timesheet>> {
        let Some(student_id) = occurrence.student_id() else {
            debug!(occurrence_id = %occurrence.id, "Group session, no timesheet");
            return Ok(None);
        };

        let timesheets = self.store.timesheets();
        if timesheets.get_by_occurrence(occurrence.id).await?.is_some() {
            return Ok(None);
        }

        let created = timesheets
            .create(CreateTimesheet {
                occurrence_id: Some(occurrence.id),
                tutor_id: occurrence.tutor_id,
                student_id,
                session_date: occurrence.occurrence_date,
                start_at: occurrence.start_at,
                end_at: occurrence.end_at,
                duration_minutes: occurrence.duration_minutes(),
                subject: occurrence.subject.clone(),
            })
            .await;

        match created {
            Ok(timesheet) => {
                info!(
                    occurrence_id = %occurrence.id,
                    timesheet_id = %timesheet.id,
                    minutes = timesheet.duration_minutes,
                    "Timesheet recorded"
                );
                Ok(Some(timesheet))
            }
            // Logged concurrently by another path.
            Err(TutorlyError::AlreadyExists { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Log a session by hand. A second entry for the same occurrence is
    /// rejected by the store.
    pub async fn log_timesheet(
        &self,
        input: CreateTimesheet,
    ) -> TutorlyResult<(Timesheet, Vec<DomainEvent>)> {
        let slot = TimeSlot::new(input.start_at, input.end_at)?;
        if input.duration_minutes == 0 || i64::from(input.duration_minutes) > slot.duration().num_minutes() {
            return Err(TutorlyError::validation(
                "duration must be positive and fit between start and end",
            ));
        }
        if let Some(occurrence_id) = input.occurrence_id {
            // Only an existing occurrence may be referenced.
            self.store.occurrences().get_by_id(occurrence_id).await?;
        }

        let timesheet = self.store.timesheets().create(input).await?;
        info!(
            timesheet_id = %timesheet.id,
            student_id = %timesheet.student_id,
            occurrence_id = ?timesheet.occurrence_id,
            "Timesheet logged"
        );
        let events = vec![DomainEvent::TimesheetLogged(timesheet.clone())];
        Ok((timesheet, events))
    }
}
