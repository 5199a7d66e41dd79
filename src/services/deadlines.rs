use std::collections::{BTreeMap, HashMap};

use anyhow::Context;

use crate::core::time::{hours, SharedClock};
use crate::db::models::{Lesson, Student};
use crate::db::types::NotificationKind;
use crate::services::messages::{deadline_signature, MessageRenderer, StudentLine};
use crate::store::{NewNotification, SharedStore};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct DeadlineReport {
    pub(crate) lessons: usize,
    pub(crate) notifications: usize,
    pub(crate) students_notified: usize,
    pub(crate) duplicates_skipped: usize,
}

/// Warns mentors about students without an answer to a lesson whose deadline
/// falls inside the warning window.
pub(crate) struct DeadlineScanner {
    store: SharedStore,
    clock: SharedClock,
    renderer: MessageRenderer,
    warning_hours: u32,
}

impl DeadlineScanner {
    pub(crate) fn new(
        store: SharedStore,
        clock: SharedClock,
        renderer: MessageRenderer,
        warning_hours: u32,
    ) -> Self {
        Self { store, clock, renderer, warning_hours }
    }

    pub(crate) async fn check_deadlines(&self) -> anyhow::Result<DeadlineReport> {
        let now = self.clock.now();
        let threshold = now + hours(self.warning_hours);

        let lessons = self
            .store
            .lessons_with_deadline_between(now, threshold, now)
            .await
            .context("Failed to load lessons with upcoming deadlines")?;

        let mut report = DeadlineReport { lessons: lessons.len(), ..DeadlineReport::default() };
        if lessons.is_empty() {
            tracing::debug!(
                warning_hours = self.warning_hours,
                "No lessons with upcoming deadlines"
            );
            return Ok(report);
        }

        for lesson in &lessons {
            self.check_lesson(lesson, &mut report)
                .await
                .with_context(|| format!("Failed to check deadline for lesson {}", lesson.id))?;
        }

        tracing::info!(
            lessons = report.lessons,
            notifications = report.notifications,
            students = report.students_notified,
            duplicates_skipped = report.duplicates_skipped,
            "Deadline check finished"
        );

        Ok(report)
    }

    async fn check_lesson(
        &self,
        lesson: &Lesson,
        report: &mut DeadlineReport,
    ) -> anyhow::Result<()> {
        let Some(deadline) = lesson.deadline_date else {
            return Ok(());
        };
        let now = self.clock.now();

        let Some(training) =
            self.store.trainings_by_ids(&[lesson.training_id], now).await?.into_iter().next()
        else {
            tracing::warn!(
                lesson_id = lesson.id,
                training_id = lesson.training_id,
                "Lesson references a training that is not current"
            );
            return Ok(());
        };

        let mappings = self.store.mappings_for_training(training.id, now).await?;
        if mappings.is_empty() {
            return Ok(());
        }

        let answered = self.store.answered_user_ids(&lesson.external_id).await?;
        let student_ids: Vec<i64> = mappings.iter().map(|mapping| mapping.student_id).collect();
        let students: HashMap<i64, Student> = self
            .store
            .students_by_ids(&student_ids, now)
            .await?
            .into_iter()
            .map(|student| (student.id, student))
            .collect();

        let mut by_mentor: BTreeMap<i64, Vec<&Student>> = BTreeMap::new();
        for mapping in &mappings {
            let Some(student) = students.get(&mapping.student_id) else {
                continue;
            };
            if answered.contains(&student.external_id) {
                continue;
            }
            by_mentor.entry(mapping.mentor_id).or_default().push(student);
        }

        let label = self.renderer.deadline_label(deadline);
        for (mentor_id, mut pending) in by_mentor {
            if self.store.current_mentor(mentor_id, now).await?.is_none() {
                tracing::warn!(mentor_id, lesson_id = lesson.id, "Mentor is not current, skipping");
                continue;
            }
            pending.sort_by_key(|student| student.id);

            let mut lines = Vec::with_capacity(pending.len());
            let mut signatures = Vec::with_capacity(pending.len());
            for student in pending {
                let name = student.display_name();
                let signature = deadline_signature(
                    mentor_id,
                    NotificationKind::DeadlineApproaching,
                    lesson.id,
                    &name,
                    &label,
                );
                if self.store.has_active_signature(&signature).await? {
                    report.duplicates_skipped += 1;
                    continue;
                }
                lines.push(StudentLine { name, email: student.email.clone() });
                signatures.push(signature);
            }

            if lines.is_empty() {
                continue;
            }

            let message = self.renderer.deadline_approaching(deadline, &training, lesson, &lines);
            let created = self
                .store
                .insert_notification(NewNotification {
                    mentor_id,
                    kind: NotificationKind::DeadlineApproaching,
                    message,
                    event_id: None,
                    signatures,
                    created_at: now,
                })
                .await?;

            report.notifications += 1;
            report.students_notified += lines.len();
            metrics::counter!(
                "notifications_created_total",
                "kind" => NotificationKind::DeadlineApproaching.as_str()
            )
            .increment(1);
            tracing::info!(
                notification_id = %created.id,
                mentor_id,
                lesson_id = lesson.id,
                students = lines.len(),
                "Created deadline warning"
            );
        }

        Ok(())
    }
}
