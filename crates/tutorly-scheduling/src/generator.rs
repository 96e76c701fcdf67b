//! Recurring template management and occurrence generation.
//!
//! Generation is idempotent on the natural key (template, date): dates
//! that already hold an occurrence for the template are skipped, and
//! the store's unique slot key rejects a racing duplicate.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc, Weekday};
use tracing::{debug, info, warn};
use tutorly_core::clock::Clock;
use tutorly_core::error::{TutorlyError, TutorlyResult};
use tutorly_core::models::occurrence::{CreateOccurrence, Occurrence, OccurrenceSource};
use tutorly_core::models::template::{CreateTemplate, RecurringTemplate, UpdateTemplate};
use tutorly_core::repository::{
    OccurrenceRepository, ScanWatermarkRepository, Store, TemplateRepository,
};
use uuid::Uuid;

use crate::config::SchedulingConfig;
use crate::effects::{self, AuditRecord};
use crate::error::SchedulingError;

/// Watermark name of the daily horizon extension.
pub const HORIZON_EXTENSION: &str = "horizon";

/// Every date on or after `from` that falls on `weekday`, strictly
/// before `until`, in ascending order.
pub fn expand_dates(weekday: Weekday, from: NaiveDate, until: NaiveDate) -> Vec<NaiveDate> {
    let offset = (7 + weekday.num_days_from_monday() - from.weekday().num_days_from_monday()) % 7;
    let mut date = from + Duration::days(i64::from(offset));
    let mut dates = Vec::new();
    while date < until {
        dates.push(date);
        date += Duration::days(7);
    }
    dates
}

/// Snapshot the template onto a draft for `date`.
fn draft_for(
    template: &RecurringTemplate,
    date: NaiveDate,
    config: &SchedulingConfig,
) -> CreateOccurrence {
    let local = date.and_time(template.start_time);
    let start_at: DateTime<Utc> = config
        .business_offset()
        .from_local_datetime(&local)
        .single()
        .map(|at| at.with_timezone(&Utc))
        .unwrap_or_else(|| Utc.from_utc_datetime(&local));
    let end_at = start_at + Duration::minutes(i64::from(template.duration_minutes));

    CreateOccurrence {
        template_id: Some(template.id),
        tutor_id: template.tutor_id,
        attendee: template.attendee,
        occurrence_date: date,
        start_at,
        end_at,
        source: OccurrenceSource::Generated,
        subject: template.subject.clone(),
        class_type: template.class_type,
        notes: None,
    }
}

fn validate_template_fields(duration_minutes: u32, subject: &str) -> TutorlyResult<()> {
    if duration_minutes == 0 {
        return Err(TutorlyError::validation("duration must be positive"));
    }
    if subject.trim().is_empty() {
        return Err(SchedulingError::MissingText("subject").into());
    }
    Ok(())
}

/// Expands recurring templates into dated occurrences and owns the
/// template lifecycle (create, schedule edit, deactivate).
pub struct OccurrenceGenerator<S: Store> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    config: SchedulingConfig,
}

impl<S: Store> OccurrenceGenerator<S> {
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>, config: SchedulingConfig) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    fn today(&self) -> NaiveDate {
        self.config.local_date(self.clock.now())
    }

    fn default_horizon(&self) -> NaiveDate {
        self.today() + Duration::days(i64::from(self.config.default_horizon_days))
    }

    /// Generate the missing occurrences of a template up to (excluding)
    /// `horizon_end`. Returns only the newly created occurrences.
    pub async fn generate(
        &self,
        template_id: Uuid,
        horizon_end: NaiveDate,
    ) -> TutorlyResult<Vec<Occurrence>> {
        let today = self.today();
        let max = today + Duration::days(i64::from(self.config.max_horizon_days));
        if horizon_end > max {
            return Err(SchedulingError::HorizonTooFar {
                requested: horizon_end,
                max,
            }
            .into());
        }

        let template = self.store.templates().get_by_id(template_id).await?;
        if !template.active {
            return Err(SchedulingError::TemplateInactive.into());
        }

        match self.create_missing(&template, today, horizon_end).await {
            Err(TutorlyError::AlreadyExists { .. }) => {
                // A concurrent pass claimed some of the dates; recompute
                // against the fresh set of existing dates.
                debug!(%template_id, "Generation raced, retrying once");
                self.create_missing(&template, today, horizon_end).await
            }
            other => other,
        }
    }

    async fn create_missing(
        &self,
        template: &RecurringTemplate,
        today: NaiveDate,
        horizon_end: NaiveDate,
    ) -> TutorlyResult<Vec<Occurrence>> {
        let from = template.effective_from.max(today);
        let existing: HashSet<NaiveDate> = self
            .store
            .occurrences()
            .list_template_dates(template.id)
            .await?
            .into_iter()
            .collect();

        let drafts: Vec<CreateOccurrence> = expand_dates(template.weekday, from, horizon_end)
            .into_iter()
            .filter(|date| !existing.contains(date))
            .map(|date| draft_for(template, date, &self.config))
            .collect();

        if drafts.is_empty() {
            debug!(template_id = %template.id, %horizon_end, "Nothing to generate");
            return Ok(Vec::new());
        }

        let created = self.store.occurrences().create_batch(drafts).await?;
        info!(
            template_id = %template.id,
            count = created.len(),
            %horizon_end,
            "Generated occurrences"
        );
        Ok(created)
    }

    /// Generate for every active template. A failing template is
    /// logged and skipped.
    pub async fn extend_all_active(&self, horizon_end: NaiveDate) -> TutorlyResult<Vec<Occurrence>> {
        let templates = self.store.templates().list_active().await?;
        let mut created = Vec::new();
        for template in &templates {
            match self.generate(template.id, horizon_end).await {
                Ok(mut batch) => created.append(&mut batch),
                Err(e @ TutorlyError::Validation { .. }) => return Err(e),
                Err(e) => {
                    warn!(template_id = %template.id, error = %e, "Skipping template");
                }
            }
        }
        info!(
            templates = templates.len(),
            created = created.len(),
            %horizon_end,
            "Extended active templates"
        );
        Ok(created)
    }

    /// Extend every active template to the default horizon, at most once
    /// per business day. `None` means today's extension already ran.
    pub async fn extend_horizon_if_due(&self) -> TutorlyResult<Option<Vec<Occurrence>>> {
        let now = self.clock.now();
        if let Some(last) = self.store.watermarks().last_run(HORIZON_EXTENSION).await?
            && self.config.local_date(last) >= self.config.local_date(now)
        {
            debug!(%last, "Horizon already extended today");
            return Ok(None);
        }

        let created = self.extend_all_active(self.default_horizon()).await?;
        if let Err(e) = self.store.watermarks().record_run(HORIZON_EXTENSION, now).await {
            warn!(job = HORIZON_EXTENSION, error = %e, "Failed to record horizon watermark");
        }
        Ok(Some(created))
    }

    /// Create a template and generate its first occurrences up to the
    /// default horizon.
    pub async fn create_template(&self, input: CreateTemplate) -> TutorlyResult<RecurringTemplate> {
        validate_template_fields(input.duration_minutes, &input.subject)?;

        let template = self.store.templates().create(input).await?;
        info!(template_id = %template.id, weekday = %template.weekday, "Template created");

        self.generate(template.id, self.default_horizon()).await?;
        Ok(template)
    }

    /// Apply an edit. Schedule changes drop future generated
    /// occurrences that are still scheduled and regenerate them from
    /// the new rule; past and manually changed occurrences are kept.
    pub async fn update_template(
        &self,
        id: Uuid,
        input: UpdateTemplate,
        admin_id: Uuid,
    ) -> TutorlyResult<RecurringTemplate> {
        let current = self.store.templates().get_by_id(id).await?;
        validate_template_fields(
            input.duration_minutes.unwrap_or(current.duration_minutes),
            input.subject.as_deref().unwrap_or(&current.subject),
        )?;

        let reschedules = input.changes_schedule();
        let metadata = serde_json::json!({
            "changes_schedule": reschedules,
            "before": {
                "weekday": current.weekday.to_string(),
                "start_time": current.start_time.to_string(),
                "duration_minutes": current.duration_minutes,
            },
        });
        let template = self.store.templates().update(id, input).await?;

        if reschedules && template.active {
            let removed = self
                .store
                .occurrences()
                .delete_future_generated(id, self.clock.now())
                .await?;
            info!(template_id = %id, removed, "Dropped future occurrences after schedule edit");
            self.generate(id, self.default_horizon()).await?;
        }

        effects::audit(
            self.store.as_ref(),
            AuditRecord::admin(admin_id, "template.update", id).metadata(metadata),
        )
        .await;
        Ok(template)
    }

    /// Soft-delete a template and drop its future generated sessions.
    pub async fn deactivate_template(
        &self,
        id: Uuid,
        admin_id: Uuid,
    ) -> TutorlyResult<RecurringTemplate> {
        let template = self.store.templates().set_active(id, false).await?;
        let removed = self
            .store
            .occurrences()
            .delete_future_generated(id, self.clock.now())
            .await?;
        info!(template_id = %id, removed, "Template deactivated");

        effects::audit(
            self.store.as_ref(),
            AuditRecord::admin(admin_id, "template.deactivate", id)
                .metadata(serde_json::json!({ "removed_occurrences": removed })),
        )
        .await;
        Ok(template)
    }

    pub async fn list_active_templates(&self) -> TutorlyResult<Vec<RecurringTemplate>> {
        self.store.templates().list_active().await
    }
}
