//! Integration tests for the template and occurrence repositories using
//! in-memory SurrealDB.

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use surrealdb::Surreal;
use surrealdb::engine::local::{Db, Mem};
use tutorly_core::error::TutorlyError;
use tutorly_core::models::attendee::Attendee;
use tutorly_core::models::occurrence::{
    CreateOccurrence, OccurrenceSource, OccurrenceStatus, ParentFlag, UpdateOccurrence,
};
use tutorly_core::models::template::{ClassType, CreateTemplate, UpdateTemplate};
use tutorly_core::repository::{OccurrenceRepository, TemplateRepository};
use tutorly_db::repository::{SurrealOccurrenceRepository, SurrealTemplateRepository};
use uuid::Uuid;

async fn setup() -> Surreal<Db> {
    let db = Surreal::new::<Mem>(()).await.unwrap();
    db.use_ns("test").use_db("test").await.unwrap();
    tutorly_db::run_migrations(&db).await.unwrap();
    db
}

fn at(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, day, hour, 0, 0).unwrap()
}

fn draft(template_id: Option<Uuid>, student_id: Uuid, day: u32) -> CreateOccurrence {
    CreateOccurrence {
        template_id,
        tutor_id: Uuid::new_v4(),
        attendee: Attendee::Student(student_id),
        occurrence_date: NaiveDate::from_ymd_opt(2024, 3, day).unwrap(),
        start_at: at(day, 16),
        end_at: at(day, 17),
        source: if template_id.is_some() {
            OccurrenceSource::Generated
        } else {
            OccurrenceSource::Manual
        },
        subject: "Maths".into(),
        class_type: ClassType::OneToOne,
        notes: None,
    }
}

#[tokio::test]
async fn template_create_update_and_deactivate() {
    let db = setup().await;
    let repo = SurrealTemplateRepository::new(db);
    let student_id = Uuid::new_v4();

    let template = repo
        .create(CreateTemplate {
            tutor_id: Uuid::new_v4(),
            attendee: Attendee::Student(student_id),
            weekday: chrono::Weekday::Sun,
            start_time: chrono::NaiveTime::from_hms_opt(16, 0, 0).unwrap(),
            duration_minutes: 60,
            subject: "Maths".into(),
            class_type: ClassType::OneToOne,
            effective_from: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            created_by: Uuid::new_v4(),
        })
        .await
        .unwrap();
    assert!(template.active);
    assert_eq!(template.weekday, chrono::Weekday::Sun);

    let updated = repo
        .update(
            template.id,
            UpdateTemplate {
                duration_minutes: Some(90),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.duration_minutes, 90);
    assert_eq!(updated.subject, "Maths");

    assert_eq!(repo.list_active().await.unwrap().len(), 1);
    assert_eq!(repo.list_by_student(student_id).await.unwrap().len(), 1);

    repo.set_active(template.id, false).await.unwrap();
    assert!(repo.list_active().await.unwrap().is_empty());
}

#[tokio::test]
async fn missing_template_is_not_found() {
    let db = setup().await;
    let repo = SurrealTemplateRepository::new(db);

    let err = repo.get_by_id(Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, TutorlyError::NotFound { .. }));
}

#[tokio::test]
async fn batch_create_stores_every_draft() {
    let db = setup().await;
    let repo = SurrealOccurrenceRepository::new(db);
    let template_id = Uuid::new_v4();
    let student_id = Uuid::new_v4();

    let created = repo
        .create_batch(vec![
            draft(Some(template_id), student_id, 3),
            draft(Some(template_id), student_id, 10),
            draft(Some(template_id), student_id, 17),
        ])
        .await
        .unwrap();

    assert_eq!(created.len(), 3);
    assert!(created.iter().all(|o| o.status == OccurrenceStatus::Scheduled));
    assert!(created.windows(2).all(|w| w[0].start_at < w[1].start_at));

    let dates = repo.list_template_dates(template_id).await.unwrap();
    assert_eq!(dates.len(), 3);
    assert!(dates.contains(&NaiveDate::from_ymd_opt(2024, 3, 10).unwrap()));
}

#[tokio::test]
async fn batch_with_existing_slot_is_rejected_as_a_whole() {
    let db = setup().await;
    let repo = SurrealOccurrenceRepository::new(db);
    let template_id = Uuid::new_v4();
    let student_id = Uuid::new_v4();

    repo.create(draft(Some(template_id), student_id, 10))
        .await
        .unwrap();

    let err = repo
        .create_batch(vec![
            draft(Some(template_id), student_id, 3),
            draft(Some(template_id), student_id, 10),
        ])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        TutorlyError::AlreadyExists { .. } | TutorlyError::Database(_)
    ));

    // The transaction rolled back: only the original row exists.
    assert_eq!(repo.list_by_template(template_id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn update_reschedules_and_flags() {
    let db = setup().await;
    let repo = SurrealOccurrenceRepository::new(db);
    let occurrence = repo
        .create(draft(None, Uuid::new_v4(), 3))
        .await
        .unwrap();
    let parent_id = Uuid::new_v4();

    let moved = repo
        .update(
            occurrence.id,
            UpdateOccurrence {
                start_at: Some(at(4, 10)),
                end_at: Some(at(4, 11)),
                occurrence_date: NaiveDate::from_ymd_opt(2024, 3, 4),
                source: Some(OccurrenceSource::Rescheduled),
                original_date: Some(occurrence.start_at),
                parent_flag: Some(ParentFlag {
                    parent_id,
                    comment: "clashes with swimming".into(),
                    flagged_at: at(2, 9),
                }),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(moved.start_at, at(4, 10));
    assert_eq!(moved.source, OccurrenceSource::Rescheduled);
    assert_eq!(moved.original_date, Some(occurrence.start_at));
    assert_eq!(moved.status, OccurrenceStatus::Scheduled);
    let flag = moved.parent_flag.unwrap();
    assert_eq!(flag.parent_id, parent_id);
    assert_eq!(flag.comment, "clashes with swimming");
}

#[tokio::test]
async fn delete_future_generated_keeps_past_and_touched_rows() {
    let db = setup().await;
    let repo = SurrealOccurrenceRepository::new(db);
    let template_id = Uuid::new_v4();
    let student_id = Uuid::new_v4();

    let created = repo
        .create_batch(vec![
            draft(Some(template_id), student_id, 3),
            draft(Some(template_id), student_id, 10),
            draft(Some(template_id), student_id, 17),
            draft(Some(template_id), student_id, 24),
        ])
        .await
        .unwrap();
    repo.update(
        created[2].id,
        UpdateOccurrence {
            status: Some(OccurrenceStatus::Cancelled),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    let removed = repo
        .delete_future_generated(template_id, at(5, 0))
        .await
        .unwrap();
    assert_eq!(removed, 2);

    let remaining = repo.list_by_template(template_id).await.unwrap();
    assert_eq!(remaining.len(), 2);
    assert_eq!(remaining[0].id, created[0].id);
    assert_eq!(remaining[1].status, OccurrenceStatus::Cancelled);
}

#[tokio::test]
async fn ended_between_skips_cancelled_and_out_of_window() {
    let db = setup().await;
    let repo = SurrealOccurrenceRepository::new(db);
    let student_id = Uuid::new_v4();

    let early = repo.create(draft(None, student_id, 1)).await.unwrap();
    let inside = repo.create(draft(None, student_id, 5)).await.unwrap();
    let cancelled = repo.create(draft(None, student_id, 6)).await.unwrap();
    repo.update(
        cancelled.id,
        UpdateOccurrence {
            status: Some(OccurrenceStatus::Cancelled),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    repo.create(draft(None, student_id, 20)).await.unwrap();

    let found = repo
        .list_ended_between(at(3, 0), at(3, 0) + Duration::days(10))
        .await
        .unwrap();
    let ids: Vec<Uuid> = found.iter().map(|o| o.id).collect();
    assert_eq!(ids, vec![inside.id]);
    assert!(!ids.contains(&early.id));
}
