use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;

use crate::db::types::{NotificationKind, NotificationStatus, ProgressStatus, Visibility};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct Mentor {
    pub(crate) id: i64,
    pub(crate) external_id: Option<i64>,
    pub(crate) email: String,
    pub(crate) first_name: Option<String>,
    pub(crate) last_name: Option<String>,
    pub(crate) telegram_id: Option<i64>,
    pub(crate) valid_from: OffsetDateTime,
    pub(crate) valid_to: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct Student {
    pub(crate) id: i64,
    pub(crate) external_id: i64,
    pub(crate) email: String,
    pub(crate) first_name: Option<String>,
    pub(crate) last_name: Option<String>,
    pub(crate) valid_from: OffsetDateTime,
    pub(crate) valid_to: Option<OffsetDateTime>,
}

impl Student {
    pub(crate) fn display_name(&self) -> String {
        full_name(self.first_name.as_deref(), self.last_name.as_deref(), &self.email)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct Training {
    pub(crate) id: i64,
    pub(crate) external_id: String,
    pub(crate) title: String,
    pub(crate) valid_from: OffsetDateTime,
    pub(crate) valid_to: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct Lesson {
    pub(crate) id: i64,
    pub(crate) external_id: String,
    pub(crate) training_id: i64,
    pub(crate) module_number: Option<i32>,
    pub(crate) title: String,
    pub(crate) opening_date: OffsetDateTime,
    pub(crate) deadline_date: Option<OffsetDateTime>,
    pub(crate) valid_from: OffsetDateTime,
    pub(crate) valid_to: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct Mapping {
    pub(crate) id: i64,
    pub(crate) student_id: i64,
    pub(crate) mentor_id: i64,
    pub(crate) training_id: i64,
    pub(crate) valid_from: OffsetDateTime,
    pub(crate) valid_to: Option<OffsetDateTime>,
}

/// Raw answer event as received from the platform webhook.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct ActivityEvent {
    pub(crate) id: i64,
    pub(crate) user_id: i64,
    pub(crate) user_email: Option<String>,
    pub(crate) user_first_name: Option<String>,
    pub(crate) user_last_name: Option<String>,
    pub(crate) answer_id: Option<i64>,
    pub(crate) answer_training_id: Option<String>,
    pub(crate) answer_lesson_id: Option<String>,
    pub(crate) answer_status: Option<String>,
    pub(crate) answer_text: Option<String>,
    pub(crate) event_date: Option<OffsetDateTime>,
    pub(crate) created_at: OffsetDateTime,
    pub(crate) processed: bool,
    pub(crate) processed_at: Option<OffsetDateTime>,
    pub(crate) error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct Notification {
    pub(crate) id: String,
    pub(crate) mentor_id: i64,
    pub(crate) kind: NotificationKind,
    pub(crate) message: String,
    pub(crate) status: NotificationStatus,
    pub(crate) created_at: OffsetDateTime,
    pub(crate) sent_at: Option<OffsetDateTime>,
    pub(crate) transport_message_id: Option<String>,
    pub(crate) event_id: Option<i64>,
    pub(crate) last_error: Option<String>,
}

/// Per-training (lesson_id = NULL) or per-lesson reporting configuration.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct ProgressConfig {
    pub(crate) id: i64,
    pub(crate) training_id: i64,
    pub(crate) lesson_id: Option<i64>,
    pub(crate) deadline_override: Option<OffsetDateTime>,
    pub(crate) visibility: Visibility,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct ProgressOverride {
    pub(crate) id: i64,
    pub(crate) student_id: i64,
    pub(crate) lesson_id: i64,
    pub(crate) status_override: Option<ProgressStatus>,
    pub(crate) expires_at: Option<OffsetDateTime>,
}

impl ProgressOverride {
    pub(crate) fn active_status(&self, now: OffsetDateTime) -> Option<ProgressStatus> {
        match self.expires_at {
            Some(expires_at) if expires_at <= now => None,
            _ => self.status_override,
        }
    }
}

fn full_name(first: Option<&str>, last: Option<&str>, fallback: &str) -> String {
    let name = [first, last]
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    if name.is_empty() {
        fallback.to_string()
    } else {
        name
    }
}
