//! Domain events and their dispatch.
//!
//! Lifecycle and workflow operations persist their primary change and
//! return the events it caused. The dispatcher feeds those events to
//! independent handlers (timesheet creation, alert resolution, balance
//! consumption). A failing handler is logged and never rolls back or
//! fails the operation that emitted the event.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use tutorly_core::error::TutorlyResult;
use tutorly_core::models::occurrence::{Occurrence, OccurrenceStatus};
use tutorly_core::models::timesheet::Timesheet;
use tutorly_core::notify::NotificationSink;
use tutorly_core::repository::Store;

use crate::alerting::ComplianceAlerting;
use crate::invoicing::InvoiceTrigger;
use crate::lifecycle::OccurrenceLifecycle;

#[derive(Debug, Clone)]
pub enum DomainEvent {
    /// The occurrence is (or already was) completed.
    OccurrenceCompleted(Occurrence),
    /// The occurrence is cancelled or marked no-show.
    OccurrenceClosed(Occurrence),
    OccurrenceRescheduled {
        occurrence: Occurrence,
        previous_start: DateTime<Utc>,
    },
    /// A timesheet entry was created.
    TimesheetLogged(Timesheet),
}

impl DomainEvent {
    pub fn name(&self) -> &'static str {
        match self {
            DomainEvent::OccurrenceCompleted(_) => "occurrence_completed",
            DomainEvent::OccurrenceClosed(_) => "occurrence_closed",
            DomainEvent::OccurrenceRescheduled { .. } => "occurrence_rescheduled",
            DomainEvent::TimesheetLogged(_) => "timesheet_logged",
        }
    }
}

fn closed_reason(status: OccurrenceStatus) -> &'static str {
    match status {
        OccurrenceStatus::NoShow => "session marked as no-show",
        _ => "session cancelled",
    }
}

pub struct EventDispatcher<S: Store, N: NotificationSink> {
    lifecycle: Arc<OccurrenceLifecycle<S>>,
    alerting: Arc<ComplianceAlerting<S, N>>,
    invoicing: Arc<InvoiceTrigger<S, N>>,
}

impl<S: Store, N: NotificationSink> EventDispatcher<S, N> {
    pub fn new(
        lifecycle: Arc<OccurrenceLifecycle<S>>,
        alerting: Arc<ComplianceAlerting<S, N>>,
        invoicing: Arc<InvoiceTrigger<S, N>>,
    ) -> Self {
        Self {
            lifecycle,
            alerting,
            invoicing,
        }
    }

    /// Run every event, and the events its handlers emit, to completion.
    pub async fn dispatch(&self, events: Vec<DomainEvent>) {
        let mut queue: VecDeque<DomainEvent> = events.into();
        while let Some(event) = queue.pop_front() {
            debug!(event = event.name(), "Dispatching event");
            match self.handle(&event).await {
                Ok(follow_ups) => queue.extend(follow_ups),
                Err(e) => {
                    warn!(event = event.name(), error = %e, "Event handler failed");
                }
            }
        }
    }

    async fn handle(&self, event: &DomainEvent) -> TutorlyResult<Vec<DomainEvent>> {
        match event {
            DomainEvent::OccurrenceCompleted(occurrence) => Ok(self
                .lifecycle
                .record_timesheet(occurrence)
                .await?
                .map(DomainEvent::TimesheetLogged)
                .into_iter()
                .collect()),
            DomainEvent::OccurrenceClosed(occurrence) => {
                self.alerting
                    .dismiss_for_occurrence(occurrence.id, closed_reason(occurrence.status))
                    .await?;
                Ok(Vec::new())
            }
            DomainEvent::OccurrenceRescheduled { occurrence, .. } => {
                self.alerting
                    .dismiss_for_occurrence(occurrence.id, "session rescheduled")
                    .await?;
                Ok(Vec::new())
            }
            DomainEvent::TimesheetLogged(timesheet) => {
                // Both effects are independent; one failing must not
                // skip the other.
                if let Some(occurrence_id) = timesheet.occurrence_id
                    && let Err(e) = self
                        .alerting
                        .resolve_for_timesheet(occurrence_id, timesheet.id)
                        .await
                {
                    warn!(%occurrence_id, error = %e, "Failed to resolve logging alert");
                }
                self.invoicing.consume_session(timesheet.student_id).await?;
                Ok(Vec::new())
            }
        }
    }
}
