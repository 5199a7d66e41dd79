use std::collections::HashSet;

use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use super::{
    DeliveryUpdate, EarliestAnswers, EventBatch, NewNotification, NotificationStore, StoreError,
};
use crate::core::time::to_utc;
use crate::db::models::{
    ActivityEvent, Lesson, Mapping, Mentor, Notification, ProgressConfig, ProgressOverride,
    Student, Training,
};
use crate::db::types::QUALIFYING_ANSWER_STATUSES;
use crate::repositories;

#[derive(Clone)]
pub(crate) struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub(crate) fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn qualifying_statuses() -> Vec<String> {
    QUALIFYING_ANSWER_STATUSES.iter().map(|status| status.to_string()).collect()
}

fn limit(value: u32) -> i64 {
    i64::from(value.max(1))
}

async fn insert_with_signatures(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    notification: &NewNotification,
) -> Result<Notification, sqlx::Error> {
    let id = Uuid::new_v4().to_string();
    let created = repositories::notifications::create(
        tx,
        repositories::notifications::CreateNotification {
            id: &id,
            mentor_id: notification.mentor_id,
            kind: notification.kind,
            message: &notification.message,
            event_id: notification.event_id,
            created_at: to_utc(notification.created_at),
        },
    )
    .await?;
    repositories::notifications::insert_signatures(tx, &id, &notification.signatures).await?;
    Ok(created)
}

#[async_trait]
impl NotificationStore for PgStore {
    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn pending_events(&self, batch_size: u32) -> Result<Vec<ActivityEvent>, StoreError> {
        Ok(repositories::events::list_unprocessed(&self.pool, limit(batch_size)).await?)
    }

    async fn commit_event_batch(&self, batch: EventBatch) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        let processed_at = to_utc(batch.processed_at);

        for outcome in &batch.outcomes {
            if let Some(notification) = &outcome.notification {
                insert_with_signatures(&mut tx, notification).await?;
            }
            repositories::events::mark_processed(
                &mut tx,
                outcome.event_id,
                processed_at,
                outcome.error.as_deref(),
            )
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn answered_user_ids(
        &self,
        lesson_external_id: &str,
    ) -> Result<HashSet<i64>, StoreError> {
        let ids = repositories::events::answered_user_ids(
            &self.pool,
            lesson_external_id,
            &qualifying_statuses(),
        )
        .await?;
        Ok(ids.into_iter().collect())
    }

    async fn answers_between(
        &self,
        status: &str,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> Result<Vec<ActivityEvent>, StoreError> {
        Ok(repositories::events::list_by_status_between(
            &self.pool,
            &status.trim().to_lowercase(),
            to_utc(start),
            to_utc(end),
        )
        .await?)
    }

    async fn earliest_answers(
        &self,
        user_ids: &[i64],
        lesson_external_ids: &[String],
    ) -> Result<EarliestAnswers, StoreError> {
        let rows = repositories::events::earliest_answers(
            &self.pool,
            user_ids,
            lesson_external_ids,
            &qualifying_statuses(),
        )
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| ((row.user_id, row.lesson_id), to_utc(row.answered_at)))
            .collect())
    }

    async fn student_by_external_id(
        &self,
        external_id: i64,
        now: OffsetDateTime,
    ) -> Result<Option<Student>, StoreError> {
        Ok(repositories::reference::find_student_by_external_id(&self.pool, external_id, now)
            .await?)
    }

    async fn training_by_external_id(
        &self,
        external_id: &str,
        now: OffsetDateTime,
    ) -> Result<Option<Training>, StoreError> {
        Ok(repositories::reference::find_training_by_external_id(&self.pool, external_id, now)
            .await?)
    }

    async fn lesson_by_external_id(
        &self,
        external_id: &str,
        now: OffsetDateTime,
    ) -> Result<Option<Lesson>, StoreError> {
        Ok(repositories::reference::find_lesson_by_external_id(&self.pool, external_id, now)
            .await?)
    }

    async fn current_mapping(
        &self,
        student_id: i64,
        training_id: i64,
        now: OffsetDateTime,
    ) -> Result<Option<Mapping>, StoreError> {
        Ok(repositories::reference::find_mapping(&self.pool, student_id, training_id, now).await?)
    }

    async fn current_mentor(
        &self,
        mentor_id: i64,
        now: OffsetDateTime,
    ) -> Result<Option<Mentor>, StoreError> {
        Ok(repositories::reference::find_mentor(&self.pool, mentor_id, now).await?)
    }

    async fn current_mentors(&self, now: OffsetDateTime) -> Result<Vec<Mentor>, StoreError> {
        Ok(repositories::reference::list_mentors(&self.pool, now).await?)
    }

    async fn lessons_with_deadline_between(
        &self,
        after: OffsetDateTime,
        until: OffsetDateTime,
        now: OffsetDateTime,
    ) -> Result<Vec<Lesson>, StoreError> {
        Ok(repositories::reference::list_lessons_with_deadline_between(
            &self.pool,
            to_utc(after),
            to_utc(until),
            now,
        )
        .await?)
    }

    async fn lessons_for_trainings(
        &self,
        training_ids: &[i64],
        now: OffsetDateTime,
    ) -> Result<Vec<Lesson>, StoreError> {
        Ok(repositories::reference::list_lessons_for_trainings(&self.pool, training_ids, now)
            .await?)
    }

    async fn mappings_for_training(
        &self,
        training_id: i64,
        now: OffsetDateTime,
    ) -> Result<Vec<Mapping>, StoreError> {
        Ok(repositories::reference::list_mappings_for_training(&self.pool, training_id, now)
            .await?)
    }

    async fn mappings_for_mentor(
        &self,
        mentor_id: i64,
        now: OffsetDateTime,
    ) -> Result<Vec<Mapping>, StoreError> {
        Ok(repositories::reference::list_mappings_for_mentor(&self.pool, mentor_id, now).await?)
    }

    async fn students_by_ids(
        &self,
        ids: &[i64],
        now: OffsetDateTime,
    ) -> Result<Vec<Student>, StoreError> {
        Ok(repositories::reference::list_students_by_ids(&self.pool, ids, now).await?)
    }

    async fn trainings_by_ids(
        &self,
        ids: &[i64],
        now: OffsetDateTime,
    ) -> Result<Vec<Training>, StoreError> {
        Ok(repositories::reference::list_trainings_by_ids(&self.pool, ids, now).await?)
    }

    async fn progress_configs(
        &self,
        training_ids: &[i64],
    ) -> Result<Vec<ProgressConfig>, StoreError> {
        Ok(repositories::progress::list_configs_for_trainings(&self.pool, training_ids).await?)
    }

    async fn progress_overrides(
        &self,
        student_ids: &[i64],
    ) -> Result<Vec<ProgressOverride>, StoreError> {
        Ok(repositories::progress::list_overrides_for_students(&self.pool, student_ids).await?)
    }

    async fn insert_notification(
        &self,
        notification: NewNotification,
    ) -> Result<Notification, StoreError> {
        let mut tx = self.pool.begin().await?;
        let created = insert_with_signatures(&mut tx, &notification).await?;
        tx.commit().await?;
        Ok(created)
    }

    async fn has_active_signature(&self, signature: &str) -> Result<bool, StoreError> {
        Ok(repositories::notifications::signature_is_active(&self.pool, signature).await?)
    }

    async fn pending_notifications(
        &self,
        batch_size: u32,
    ) -> Result<Vec<Notification>, StoreError> {
        Ok(repositories::notifications::list_pending(&self.pool, limit(batch_size)).await?)
    }

    async fn update_delivery(
        &self,
        notification_id: &str,
        update: DeliveryUpdate,
    ) -> Result<(), StoreError> {
        let touched = repositories::notifications::record_delivery(
            &self.pool,
            notification_id,
            repositories::notifications::DeliveryOutcome {
                status: update.status,
                sent_at: update.sent_at.map(to_utc),
                transport_message_id: update.transport_message_id.as_deref(),
                last_error: update.last_error.as_deref(),
            },
        )
        .await?;

        if touched == 0 {
            return Err(StoreError::NotFound("pending notification"));
        }
        Ok(())
    }
}
