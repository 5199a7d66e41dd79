use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

pub(crate) use crate::db::types::ProgressStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum LessonState {
    NotStarted,
    Active,
    Completed,
}

/// Completion status for one (student, lesson) pair.
///
/// All arguments must already be in UTC. The result depends only on the
/// inputs, so reports built at the same `now` are reproducible.
pub(crate) fn classify(
    deadline: Option<OffsetDateTime>,
    earliest_answer: Option<OffsetDateTime>,
    now: OffsetDateTime,
) -> ProgressStatus {
    match (deadline, earliest_answer) {
        (None, None) => ProgressStatus::Optional,
        (None, Some(_)) => ProgressStatus::OnTime,
        (Some(deadline), None) if now < deadline => ProgressStatus::NoAnswerBeforeDeadline,
        (Some(_), None) => ProgressStatus::NoAnswerAfterDeadline,
        (Some(deadline), Some(answer)) if answer <= deadline => ProgressStatus::OnTime,
        (Some(_), Some(_)) => ProgressStatus::Late,
    }
}

/// A lesson without a deadline never completes.
pub(crate) fn lesson_state(
    opening_date: OffsetDateTime,
    deadline: Option<OffsetDateTime>,
    now: OffsetDateTime,
) -> LessonState {
    if opening_date > now {
        return LessonState::NotStarted;
    }
    match deadline {
        Some(deadline) if deadline <= now => LessonState::Completed,
        _ => LessonState::Active,
    }
}
