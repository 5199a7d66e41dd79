use std::fmt;

use time::OffsetDateTime;

use crate::db::models::{ActivityEvent, Mentor, Student, Training};
use crate::store::{NotificationStore, StoreError};

/// Current student, training and the mentor assigned to that pair.
#[derive(Debug, Clone)]
pub(crate) struct Assignment {
    pub(crate) student: Student,
    pub(crate) training: Training,
    pub(crate) mentor: Mentor,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Unresolved {
    MissingTrainingId,
    MissingLessonId,
    StudentNotFound(i64),
    TrainingNotFound(String),
    LessonNotFound(String),
    MappingNotFound { student_id: i64, training_id: i64 },
    MentorNotFound(i64),
}

impl fmt::Display for Unresolved {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingTrainingId => write!(f, "event has no training id"),
            Self::MissingLessonId => write!(f, "event has no lesson id"),
            Self::StudentNotFound(user_id) => write!(f, "no current student for user {user_id}"),
            Self::TrainingNotFound(id) => write!(f, "no current training {id}"),
            Self::LessonNotFound(id) => write!(f, "no current lesson {id}"),
            Self::MappingNotFound { student_id, training_id } => write!(
                f,
                "no current mentor mapping for student {student_id} in training {training_id}"
            ),
            Self::MentorNotFound(id) => write!(f, "mentor {id} is not current"),
        }
    }
}

/// Student → Mapping → Mentor, using only currently valid records.
pub(crate) async fn resolve_assignment(
    store: &dyn NotificationStore,
    user_id: i64,
    training_external_id: &str,
    now: OffsetDateTime,
) -> Result<Result<Assignment, Unresolved>, StoreError> {
    let Some(student) = store.student_by_external_id(user_id, now).await? else {
        return Ok(Err(Unresolved::StudentNotFound(user_id)));
    };
    let Some(training) = store.training_by_external_id(training_external_id, now).await? else {
        return Ok(Err(Unresolved::TrainingNotFound(training_external_id.to_string())));
    };
    let Some(mapping) = store.current_mapping(student.id, training.id, now).await? else {
        return Ok(Err(Unresolved::MappingNotFound {
            student_id: student.id,
            training_id: training.id,
        }));
    };
    let Some(mentor) = store.current_mentor(mapping.mentor_id, now).await? else {
        return Ok(Err(Unresolved::MentorNotFound(mapping.mentor_id)));
    };

    Ok(Ok(Assignment { student, training, mentor }))
}

pub(crate) async fn resolve_event(
    store: &dyn NotificationStore,
    event: &ActivityEvent,
    now: OffsetDateTime,
) -> Result<Result<Assignment, Unresolved>, StoreError> {
    let Some(training_id) = event.answer_training_id.as_deref().filter(|id| !id.is_empty()) else {
        return Ok(Err(Unresolved::MissingTrainingId));
    };
    resolve_assignment(store, event.user_id, training_id, now).await
}
