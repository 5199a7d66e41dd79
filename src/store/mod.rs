//! Storage seam for the notification pipeline.
//!
//! Services take an `Arc<dyn NotificationStore>` so they can run against
//! Postgres in production and against [`memory::MemoryStore`] in tests.

#[cfg(test)]
pub(crate) mod memory;
mod pg;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use time::OffsetDateTime;

use crate::db::models::{
    ActivityEvent, Lesson, Mapping, Mentor, Notification, ProgressConfig, ProgressOverride,
    Student, Training,
};
use crate::db::types::{NotificationKind, NotificationStatus};

pub(crate) use pg::PgStore;

pub(crate) type SharedStore = Arc<dyn NotificationStore>;

#[derive(Debug, Error)]
pub(crate) enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[cfg(test)]
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone)]
pub(crate) struct NewNotification {
    pub(crate) mentor_id: i64,
    pub(crate) kind: NotificationKind,
    pub(crate) message: String,
    pub(crate) event_id: Option<i64>,
    /// Duplicate-guard signatures, one per affected student.
    pub(crate) signatures: Vec<String>,
    pub(crate) created_at: OffsetDateTime,
}

/// Result of handling one raw event inside an ingestion batch.
#[derive(Debug, Clone)]
pub(crate) struct EventOutcome {
    pub(crate) event_id: i64,
    pub(crate) error: Option<String>,
    pub(crate) notification: Option<NewNotification>,
}

#[derive(Debug, Clone)]
pub(crate) struct EventBatch {
    pub(crate) processed_at: OffsetDateTime,
    pub(crate) outcomes: Vec<EventOutcome>,
}

#[derive(Debug, Clone)]
pub(crate) struct DeliveryUpdate {
    pub(crate) status: NotificationStatus,
    pub(crate) sent_at: Option<OffsetDateTime>,
    pub(crate) transport_message_id: Option<String>,
    pub(crate) last_error: Option<String>,
}

impl DeliveryUpdate {
    pub(crate) fn sent(message_id: String, at: OffsetDateTime) -> Self {
        Self {
            status: NotificationStatus::Sent,
            sent_at: Some(at),
            transport_message_id: Some(message_id),
            last_error: None,
        }
    }

    pub(crate) fn terminal(status: NotificationStatus, error: impl Into<String>) -> Self {
        Self { status, sent_at: None, transport_message_id: None, last_error: Some(error.into()) }
    }
}

/// Earliest qualifying answer per (platform user id, lesson external id).
pub(crate) type EarliestAnswers = HashMap<(i64, String), OffsetDateTime>;

#[async_trait]
pub(crate) trait NotificationStore: Send + Sync {
    async fn ping(&self) -> Result<(), StoreError>;

    async fn pending_events(&self, limit: u32) -> Result<Vec<ActivityEvent>, StoreError>;

    /// Persists all outcomes of one ingestion batch atomically.
    async fn commit_event_batch(&self, batch: EventBatch) -> Result<(), StoreError>;

    /// Platform user ids holding a qualifying answer for the lesson.
    async fn answered_user_ids(&self, lesson_external_id: &str)
        -> Result<HashSet<i64>, StoreError>;

    /// Events with the given answer status and `start <= event_date < end`.
    async fn answers_between(
        &self,
        status: &str,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> Result<Vec<ActivityEvent>, StoreError>;

    async fn earliest_answers(
        &self,
        user_ids: &[i64],
        lesson_external_ids: &[String],
    ) -> Result<EarliestAnswers, StoreError>;

    async fn student_by_external_id(
        &self,
        external_id: i64,
        now: OffsetDateTime,
    ) -> Result<Option<Student>, StoreError>;

    async fn training_by_external_id(
        &self,
        external_id: &str,
        now: OffsetDateTime,
    ) -> Result<Option<Training>, StoreError>;

    async fn lesson_by_external_id(
        &self,
        external_id: &str,
        now: OffsetDateTime,
    ) -> Result<Option<Lesson>, StoreError>;

    async fn current_mapping(
        &self,
        student_id: i64,
        training_id: i64,
        now: OffsetDateTime,
    ) -> Result<Option<Mapping>, StoreError>;

    async fn current_mentor(
        &self,
        mentor_id: i64,
        now: OffsetDateTime,
    ) -> Result<Option<Mentor>, StoreError>;

    async fn current_mentors(&self, now: OffsetDateTime) -> Result<Vec<Mentor>, StoreError>;

    /// Current lessons with a deadline in `(after, until]`.
    async fn lessons_with_deadline_between(
        &self,
        after: OffsetDateTime,
        until: OffsetDateTime,
        now: OffsetDateTime,
    ) -> Result<Vec<Lesson>, StoreError>;

    async fn lessons_for_trainings(
        &self,
        training_ids: &[i64],
        now: OffsetDateTime,
    ) -> Result<Vec<Lesson>, StoreError>;

    async fn mappings_for_training(
        &self,
        training_id: i64,
        now: OffsetDateTime,
    ) -> Result<Vec<Mapping>, StoreError>;

    async fn mappings_for_mentor(
        &self,
        mentor_id: i64,
        now: OffsetDateTime,
    ) -> Result<Vec<Mapping>, StoreError>;

    async fn students_by_ids(
        &self,
        ids: &[i64],
        now: OffsetDateTime,
    ) -> Result<Vec<Student>, StoreError>;

    async fn trainings_by_ids(
        &self,
        ids: &[i64],
        now: OffsetDateTime,
    ) -> Result<Vec<Training>, StoreError>;

    async fn progress_configs(&self, training_ids: &[i64])
        -> Result<Vec<ProgressConfig>, StoreError>;

    async fn progress_overrides(
        &self,
        student_ids: &[i64],
    ) -> Result<Vec<ProgressOverride>, StoreError>;

    async fn insert_notification(
        &self,
        notification: NewNotification,
    ) -> Result<Notification, StoreError>;

    /// True when a pending or sent notification carries the signature.
    async fn has_active_signature(&self, signature: &str) -> Result<bool, StoreError>;

    async fn pending_notifications(&self, limit: u32) -> Result<Vec<Notification>, StoreError>;

    /// Applies a delivery outcome to a still-pending notification.
    async fn update_delivery(
        &self,
        notification_id: &str,
        update: DeliveryUpdate,
    ) -> Result<(), StoreError>;
}
