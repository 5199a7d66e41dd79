use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use time::macros::datetime;
use time::OffsetDateTime;
use uuid::Uuid;

use super::{
    DeliveryUpdate, EarliestAnswers, EventBatch, NewNotification, NotificationStore, StoreError,
};
use crate::db::models::{
    ActivityEvent, Lesson, Mapping, Mentor, Notification, ProgressConfig, ProgressOverride,
    Student, Training,
};
use crate::db::types::{
    is_qualifying_answer_status, NotificationStatus, ProgressStatus, Visibility,
};

const EPOCH: OffsetDateTime = datetime!(2000-01-01 00:00:00 UTC);

#[derive(Default)]
pub(crate) struct MemoryData {
    pub(crate) mentors: Vec<Mentor>,
    pub(crate) students: Vec<Student>,
    pub(crate) trainings: Vec<Training>,
    pub(crate) lessons: Vec<Lesson>,
    pub(crate) mappings: Vec<Mapping>,
    pub(crate) events: Vec<ActivityEvent>,
    pub(crate) notifications: Vec<Notification>,
    pub(crate) signatures: Vec<(String, String)>,
    pub(crate) configs: Vec<ProgressConfig>,
    pub(crate) overrides: Vec<ProgressOverride>,
    next_id: i64,
}

impl MemoryData {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// In-memory store for service and API tests.
#[derive(Default)]
pub(crate) struct MemoryStore {
    data: Mutex<MemoryData>,
    fail_writes: AtomicBool,
    fail_reads: AtomicBool,
}

fn is_current(
    valid_from: OffsetDateTime,
    valid_to: Option<OffsetDateTime>,
    now: OffsetDateTime,
) -> bool {
    valid_from <= now && valid_to.map_or(true, |valid_to| valid_to > now)
}

impl MemoryStore {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, MemoryData> {
        self.data.lock().expect("memory store lock")
    }

    pub(crate) fn update<R>(&self, f: impl FnOnce(&mut MemoryData) -> R) -> R {
        f(&mut self.lock())
    }

    pub(crate) fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    fn check_write(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("writes disabled".to_string()));
        }
        Ok(())
    }

    fn check_read(&self) -> Result<(), StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("reads disabled".to_string()));
        }
        Ok(())
    }

    pub(crate) fn add_mentor(
        &self,
        email: &str,
        first_name: &str,
        telegram_id: Option<i64>,
    ) -> i64 {
        let mut data = self.lock();
        let id = data.next_id();
        data.mentors.push(Mentor {
            id,
            external_id: None,
            email: email.to_string(),
            first_name: Some(first_name.to_string()),
            last_name: None,
            telegram_id,
            valid_from: EPOCH,
            valid_to: None,
        });
        id
    }

    pub(crate) fn add_student(&self, external_id: i64, first_name: &str, last_name: &str) -> i64 {
        let mut data = self.lock();
        let id = data.next_id();
        data.students.push(Student {
            id,
            external_id,
            email: format!("student{external_id}@example.com"),
            first_name: Some(first_name.to_string()),
            last_name: Some(last_name.to_string()),
            valid_from: EPOCH,
            valid_to: None,
        });
        id
    }

    pub(crate) fn add_training(&self, external_id: &str, title: &str) -> i64 {
        let mut data = self.lock();
        let id = data.next_id();
        data.trainings.push(Training {
            id,
            external_id: external_id.to_string(),
            title: title.to_string(),
            valid_from: EPOCH,
            valid_to: None,
        });
        id
    }

    pub(crate) fn add_lesson(
        &self,
        training_id: i64,
        external_id: &str,
        title: &str,
        opening_date: OffsetDateTime,
        deadline_date: Option<OffsetDateTime>,
    ) -> i64 {
        let mut data = self.lock();
        let id = data.next_id();
        data.lessons.push(Lesson {
            id,
            external_id: external_id.to_string(),
            training_id,
            module_number: Some(1),
            title: title.to_string(),
            opening_date,
            deadline_date,
            valid_from: EPOCH,
            valid_to: None,
        });
        id
    }

    pub(crate) fn add_mapping(&self, student_id: i64, mentor_id: i64, training_id: i64) -> i64 {
        let mut data = self.lock();
        let id = data.next_id();
        data.mappings.push(Mapping {
            id,
            student_id,
            mentor_id,
            training_id,
            valid_from: EPOCH,
            valid_to: None,
        });
        id
    }

    pub(crate) fn add_event(
        &self,
        user_id: i64,
        training_external_id: &str,
        lesson_external_id: &str,
        status: &str,
        event_date: OffsetDateTime,
    ) -> i64 {
        let mut data = self.lock();
        let id = data.next_id();
        data.events.push(ActivityEvent {
            id,
            user_id,
            user_email: Some(format!("student{user_id}@example.com")),
            user_first_name: None,
            user_last_name: None,
            answer_id: Some(id * 100),
            answer_training_id: Some(training_external_id.to_string()),
            answer_lesson_id: Some(lesson_external_id.to_string()),
            answer_status: Some(status.to_string()),
            answer_text: Some("answer".to_string()),
            event_date: Some(event_date),
            created_at: event_date,
            processed: false,
            processed_at: None,
            error_message: None,
        });
        id
    }

    pub(crate) fn add_config(
        &self,
        training_id: i64,
        lesson_id: Option<i64>,
        deadline_override: Option<OffsetDateTime>,
        visibility: Visibility,
    ) {
        let mut data = self.lock();
        let id = data.next_id();
        data.configs.push(ProgressConfig {
            id,
            training_id,
            lesson_id,
            deadline_override,
            visibility,
        });
    }

    pub(crate) fn add_override(
        &self,
        student_id: i64,
        lesson_id: i64,
        status_override: ProgressStatus,
        expires_at: Option<OffsetDateTime>,
    ) {
        let mut data = self.lock();
        let id = data.next_id();
        data.overrides.push(ProgressOverride {
            id,
            student_id,
            lesson_id,
            status_override: Some(status_override),
            expires_at,
        });
    }

    pub(crate) fn notifications(&self) -> Vec<Notification> {
        self.lock().notifications.clone()
    }

    pub(crate) fn events(&self) -> Vec<ActivityEvent> {
        self.lock().events.clone()
    }

    fn insert_locked(data: &mut MemoryData, notification: NewNotification) -> Notification {
        let id = Uuid::new_v4().to_string();
        let created = Notification {
            id: id.clone(),
            mentor_id: notification.mentor_id,
            kind: notification.kind,
            message: notification.message,
            status: NotificationStatus::Pending,
            created_at: notification.created_at,
            sent_at: None,
            transport_message_id: None,
            event_id: notification.event_id,
            last_error: None,
        };
        data.notifications.push(created.clone());
        for signature in notification.signatures {
            data.signatures.push((id.clone(), signature));
        }
        created
    }
}

#[async_trait]
impl NotificationStore for MemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.check_read()
    }

    async fn pending_events(&self, limit: u32) -> Result<Vec<ActivityEvent>, StoreError> {
        self.check_read()?;
        let data = self.lock();
        let mut events: Vec<_> =
            data.events.iter().filter(|event| !event.processed).cloned().collect();
        events.sort_by_key(|event| (event.created_at, event.id));
        events.truncate(limit as usize);
        Ok(events)
    }

    async fn commit_event_batch(&self, batch: EventBatch) -> Result<(), StoreError> {
        self.check_write()?;
        let mut data = self.lock();
        for outcome in batch.outcomes {
            if let Some(notification) = outcome.notification {
                Self::insert_locked(&mut data, notification);
            }
            if let Some(event) = data.events.iter_mut().find(|event| event.id == outcome.event_id) {
                event.processed = true;
                event.processed_at = Some(batch.processed_at);
                event.error_message = outcome.error;
            }
        }
        Ok(())
    }

    async fn answered_user_ids(
        &self,
        lesson_external_id: &str,
    ) -> Result<HashSet<i64>, StoreError> {
        self.check_read()?;
        Ok(self
            .lock()
            .events
            .iter()
            .filter(|event| event.answer_lesson_id.as_deref() == Some(lesson_external_id))
            .filter(|event| event.answer_status.as_deref().is_some_and(is_qualifying_answer_status))
            .map(|event| event.user_id)
            .collect())
    }

    async fn answers_between(
        &self,
        status: &str,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> Result<Vec<ActivityEvent>, StoreError> {
        self.check_read()?;
        let mut events: Vec<_> = self
            .lock()
            .events
            .iter()
            .filter(|event| {
                event
                    .answer_status
                    .as_deref()
                    .is_some_and(|value| value.trim().eq_ignore_ascii_case(status.trim()))
            })
            .filter(|event| event.event_date.is_some_and(|date| date >= start && date < end))
            .cloned()
            .collect();
        events.sort_by_key(|event| (event.event_date, event.id));
        Ok(events)
    }

    async fn earliest_answers(
        &self,
        user_ids: &[i64],
        lesson_external_ids: &[String],
    ) -> Result<EarliestAnswers, StoreError> {
        self.check_read()?;
        let mut answers = EarliestAnswers::new();
        for event in &self.lock().events {
            let Some(lesson_id) = &event.answer_lesson_id else {
                continue;
            };
            if !user_ids.contains(&event.user_id) || !lesson_external_ids.contains(lesson_id) {
                continue;
            }
            if !event.answer_status.as_deref().is_some_and(is_qualifying_answer_status) {
                continue;
            }
            let answered_at = event.event_date.unwrap_or(event.created_at);
            answers
                .entry((event.user_id, lesson_id.clone()))
                .and_modify(|current| *current = (*current).min(answered_at))
                .or_insert(answered_at);
        }
        Ok(answers)
    }

    async fn student_by_external_id(
        &self,
        external_id: i64,
        now: OffsetDateTime,
    ) -> Result<Option<Student>, StoreError> {
        self.check_read()?;
        Ok(self
            .lock()
            .students
            .iter()
            .find(|item| {
                item.external_id == external_id && is_current(item.valid_from, item.valid_to, now)
            })
            .cloned())
    }

    async fn training_by_external_id(
        &self,
        external_id: &str,
        now: OffsetDateTime,
    ) -> Result<Option<Training>, StoreError> {
        self.check_read()?;
        Ok(self
            .lock()
            .trainings
            .iter()
            .find(|item| {
                item.external_id == external_id && is_current(item.valid_from, item.valid_to, now)
            })
            .cloned())
    }

    async fn lesson_by_external_id(
        &self,
        external_id: &str,
        now: OffsetDateTime,
    ) -> Result<Option<Lesson>, StoreError> {
        self.check_read()?;
        Ok(self
            .lock()
            .lessons
            .iter()
            .find(|item| {
                item.external_id == external_id && is_current(item.valid_from, item.valid_to, now)
            })
            .cloned())
    }

    async fn current_mapping(
        &self,
        student_id: i64,
        training_id: i64,
        now: OffsetDateTime,
    ) -> Result<Option<Mapping>, StoreError> {
        self.check_read()?;
        Ok(self
            .lock()
            .mappings
            .iter()
            .find(|item| {
                item.student_id == student_id
                    && item.training_id == training_id
                    && is_current(item.valid_from, item.valid_to, now)
            })
            .cloned())
    }

    async fn current_mentor(
        &self,
        mentor_id: i64,
        now: OffsetDateTime,
    ) -> Result<Option<Mentor>, StoreError> {
        self.check_read()?;
        Ok(self
            .lock()
            .mentors
            .iter()
            .find(|item| item.id == mentor_id && is_current(item.valid_from, item.valid_to, now))
            .cloned())
    }

    async fn current_mentors(&self, now: OffsetDateTime) -> Result<Vec<Mentor>, StoreError> {
        self.check_read()?;
        Ok(self
            .lock()
            .mentors
            .iter()
            .filter(|item| is_current(item.valid_from, item.valid_to, now))
            .cloned()
            .collect())
    }

    async fn lessons_with_deadline_between(
        &self,
        after: OffsetDateTime,
        until: OffsetDateTime,
        now: OffsetDateTime,
    ) -> Result<Vec<Lesson>, StoreError> {
        self.check_read()?;
        let mut lessons: Vec<_> = self
            .lock()
            .lessons
            .iter()
            .filter(|item| is_current(item.valid_from, item.valid_to, now))
            .filter(|item| {
                item.deadline_date.is_some_and(|deadline| deadline > after && deadline <= until)
            })
            .cloned()
            .collect();
        lessons.sort_by_key(|item| (item.deadline_date, item.id));
        Ok(lessons)
    }

    async fn lessons_for_trainings(
        &self,
        training_ids: &[i64],
        now: OffsetDateTime,
    ) -> Result<Vec<Lesson>, StoreError> {
        self.check_read()?;
        Ok(self
            .lock()
            .lessons
            .iter()
            .filter(|item| training_ids.contains(&item.training_id))
            .filter(|item| is_current(item.valid_from, item.valid_to, now))
            .cloned()
            .collect())
    }

    async fn mappings_for_training(
        &self,
        training_id: i64,
        now: OffsetDateTime,
    ) -> Result<Vec<Mapping>, StoreError> {
        self.check_read()?;
        Ok(self
            .lock()
            .mappings
            .iter()
            .filter(|item| {
                item.training_id == training_id && is_current(item.valid_from, item.valid_to, now)
            })
            .cloned()
            .collect())
    }

    async fn mappings_for_mentor(
        &self,
        mentor_id: i64,
        now: OffsetDateTime,
    ) -> Result<Vec<Mapping>, StoreError> {
        self.check_read()?;
        Ok(self
            .lock()
            .mappings
            .iter()
            .filter(|item| {
                item.mentor_id == mentor_id && is_current(item.valid_from, item.valid_to, now)
            })
            .cloned()
            .collect())
    }

    async fn students_by_ids(
        &self,
        ids: &[i64],
        now: OffsetDateTime,
    ) -> Result<Vec<Student>, StoreError> {
        self.check_read()?;
        Ok(self
            .lock()
            .students
            .iter()
            .filter(|item| {
                ids.contains(&item.id) && is_current(item.valid_from, item.valid_to, now)
            })
            .cloned()
            .collect())
    }

    async fn trainings_by_ids(
        &self,
        ids: &[i64],
        now: OffsetDateTime,
    ) -> Result<Vec<Training>, StoreError> {
        self.check_read()?;
        Ok(self
            .lock()
            .trainings
            .iter()
            .filter(|item| {
                ids.contains(&item.id) && is_current(item.valid_from, item.valid_to, now)
            })
            .cloned()
            .collect())
    }

    async fn progress_configs(
        &self,
        training_ids: &[i64],
    ) -> Result<Vec<ProgressConfig>, StoreError> {
        self.check_read()?;
        Ok(self
            .lock()
            .configs
            .iter()
            .filter(|item| training_ids.contains(&item.training_id))
            .cloned()
            .collect())
    }

    async fn progress_overrides(
        &self,
        student_ids: &[i64],
    ) -> Result<Vec<ProgressOverride>, StoreError> {
        self.check_read()?;
        Ok(self
            .lock()
            .overrides
            .iter()
            .filter(|item| student_ids.contains(&item.student_id))
            .cloned()
            .collect())
    }

    async fn insert_notification(
        &self,
        notification: NewNotification,
    ) -> Result<Notification, StoreError> {
        self.check_write()?;
        Ok(Self::insert_locked(&mut self.lock(), notification))
    }

    async fn has_active_signature(&self, signature: &str) -> Result<bool, StoreError> {
        self.check_read()?;
        let data = self.lock();
        Ok(data.signatures.iter().filter(|(_, value)| value == signature).any(|(id, _)| {
            data.notifications.iter().any(|notification| {
                &notification.id == id
                    && matches!(
                        notification.status,
                        NotificationStatus::Pending | NotificationStatus::Sent
                    )
            })
        }))
    }

    async fn pending_notifications(&self, limit: u32) -> Result<Vec<Notification>, StoreError> {
        self.check_read()?;
        let mut pending: Vec<_> = self
            .lock()
            .notifications
            .iter()
            .filter(|item| item.status == NotificationStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        pending.truncate(limit as usize);
        Ok(pending)
    }

    async fn update_delivery(
        &self,
        notification_id: &str,
        update: DeliveryUpdate,
    ) -> Result<(), StoreError> {
        self.check_write()?;
        let mut data = self.lock();
        let notification = data
            .notifications
            .iter_mut()
            .find(|item| item.id == notification_id && item.status == NotificationStatus::Pending)
            .ok_or(StoreError::NotFound("pending notification"))?;
        notification.status = update.status;
        notification.sent_at = update.sent_at;
        notification.transport_message_id = update.transport_message_id;
        notification.last_error = update.last_error;
        Ok(())
    }
}
