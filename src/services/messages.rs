//! Mentor-facing message bodies.
//!
//! Bodies use a light `*bold*` / `[text](url)` markup; the transport converts
//! it to whatever its client understands.

use std::fmt::Write as _;

use sha2::{Digest, Sha256};
use time::{OffsetDateTime, UtcOffset};

use crate::core::config::Settings;
use crate::core::time::format_display;
use crate::db::models::{Lesson, Training};
use crate::db::types::NotificationKind;

const ZONE_LABEL: &str = "МСК";

#[derive(Debug, Clone)]
pub(crate) struct StudentLine {
    pub(crate) name: String,
    pub(crate) email: String,
}

#[derive(Debug, Clone)]
pub(crate) struct ReminderLine {
    pub(crate) name: String,
    pub(crate) user_id: i64,
    pub(crate) answered_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone)]
pub(crate) struct MessageRenderer {
    platform_base_url: String,
    display_offset: UtcOffset,
}

impl MessageRenderer {
    pub(crate) fn new(platform_base_url: impl Into<String>, display_offset: UtcOffset) -> Self {
        Self { platform_base_url: platform_base_url.into(), display_offset }
    }

    pub(crate) fn from_settings(settings: &Settings) -> Self {
        Self::new(
            settings.notifications().platform_base_url.clone(),
            settings.display_offset(),
        )
    }

    pub(crate) fn student_link(&self, user_id: i64) -> String {
        format!("{}/userComments/id/{user_id}", self.platform_base_url)
    }

    /// Display string used both in deadline messages and their signatures.
    pub(crate) fn deadline_label(&self, deadline: OffsetDateTime) -> String {
        format_display(deadline, self.display_offset)
    }

    pub(crate) fn answer_received(
        &self,
        training: &Training,
        lesson: &Lesson,
        student: &StudentLine,
        user_id: i64,
    ) -> String {
        let mut message = String::from("🔔 *Новый ответ на урок!*\n\n");
        push_lesson_block(&mut message, training, lesson);
        message.push_str(
            "\n✅ *Пожалуйста, оставь обратную связь в течение 3 дней, поставь напоминание!*\n\n",
        );
        let _ = write!(
            message,
            "👤 *Студент:* {} ({})\n➡️ [*Перейти к ответам студента*]({})",
            student.name,
            student.email,
            self.student_link(user_id)
        );
        message
    }

    pub(crate) fn deadline_approaching(
        &self,
        deadline: OffsetDateTime,
        training: &Training,
        lesson: &Lesson,
        students: &[StudentLine],
    ) -> String {
        let mut message = format!(
            "⏰ *Срок ответа студента {} ({ZONE_LABEL})*\n\n",
            self.deadline_label(deadline)
        );
        push_lesson_block(&mut message, training, lesson);
        message.push_str(
            "\n✅ *Пожалуйста, свяжись со студентом и помоги ему, если есть сложности:*\n\n",
        );
        for student in students {
            let _ = writeln!(message, "👤 {} ({})", student.name, student.email);
        }
        message
    }

    pub(crate) fn reminder_digest(&self, lines: &[ReminderLine]) -> String {
        let mut message = String::from(
            "⏰ *Напоминание!*\n\n\
             *Просьба проверить, не осталось ли непроверенных ответов у следующих студентов.*\n\n\
             *Возможно, вы уже проверили их, просто убедимся, что никто не упущен.*\n\n",
        );
        for line in lines {
            let answered = line
                .answered_at
                .map(|value| {
                    format!("{} ({ZONE_LABEL})", format_display(value, self.display_offset))
                })
                .unwrap_or_else(|| "Время не указано".to_string());
            let _ = write!(
                message,
                "👤 *{}*\nОтвет: {}\n➡️ [*Перейти к последним ответам студента*]({})\n\n",
                line.name,
                answered,
                self.student_link(line.user_id)
            );
        }
        message
    }
}

fn push_lesson_block(message: &mut String, training: &Training, lesson: &Lesson) {
    let module = lesson.module_number.map(|value| value.to_string()).unwrap_or_else(|| "-".into());
    let _ = write!(
        message,
        "📚 *Тренинг:* {}\n📖 *Модуль:* {}\n📝 *Урок:* {}\n",
        training.title, module, lesson.title
    );
}

/// Duplicate-guard key for one (mentor, student, lesson, deadline) warning.
pub(crate) fn deadline_signature(
    mentor_id: i64,
    kind: NotificationKind,
    lesson_id: i64,
    student_name: &str,
    deadline_label: &str,
) -> String {
    let raw = format!("{mentor_id}|{}|{lesson_id}|{student_name}|{deadline_label}", kind.as_str());
    hex::encode(Sha256::digest(raw.as_bytes()))
}
