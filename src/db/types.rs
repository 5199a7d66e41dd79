use serde::{Deserialize, Serialize};
use sqlx::Type;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "notificationkind", rename_all = "snake_case")]
pub(crate) enum NotificationKind {
    AnswerReceived,
    DeadlineApproaching,
    ReminderUnchecked,
}

impl NotificationKind {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::AnswerReceived => "answer_received",
            Self::DeadlineApproaching => "deadline_approaching",
            Self::ReminderUnchecked => "reminder_unchecked",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "notificationstatus", rename_all = "snake_case")]
pub(crate) enum NotificationStatus {
    Pending,
    Sent,
    Failed,
    NoAddress,
}

impl NotificationStatus {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Failed => "failed",
            Self::NoAddress => "no_address",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "lessonvisibility", rename_all = "lowercase")]
pub(crate) enum Visibility {
    Visible,
    Hidden,
}

/// Completion status of one (student, lesson) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "progressstatus", rename_all = "snake_case")]
pub(crate) enum ProgressStatus {
    OnTime,
    Late,
    NoAnswerBeforeDeadline,
    NoAnswerAfterDeadline,
    Optional,
}

/// Answer statuses that count as a submitted answer.
pub(crate) const QUALIFYING_ANSWER_STATUSES: [&str; 2] = ["new", "accepted"];

pub(crate) fn is_qualifying_answer_status(status: &str) -> bool {
    let status = status.trim();
    QUALIFYING_ANSWER_STATUSES.iter().any(|candidate| candidate.eq_ignore_ascii_case(status))
}
