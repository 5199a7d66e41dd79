use std::collections::{BTreeMap, HashMap};

use anyhow::Context;
use time::{OffsetDateTime, UtcOffset};

use crate::core::time::{days, start_of_day, SharedClock};
use crate::db::types::NotificationKind;
use crate::services::messages::{MessageRenderer, ReminderLine};
use crate::services::resolution::{resolve_event, Assignment, Unresolved};
use crate::store::{NewNotification, SharedStore};

const UNCHECKED_STATUS: &str = "new";

#[derive(Debug, Clone)]
pub(crate) struct ReminderOptions {
    pub(crate) enabled: bool,
    pub(crate) days_back: u32,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ReminderReport {
    pub(crate) skipped_disabled: bool,
    pub(crate) answers: usize,
    pub(crate) unresolved: usize,
    pub(crate) notifications: usize,
}

/// Daily digest of still-unchecked answers, one notification per mentor.
pub(crate) struct ReminderScanner {
    store: SharedStore,
    clock: SharedClock,
    renderer: MessageRenderer,
    options: ReminderOptions,
}

impl ReminderScanner {
    pub(crate) fn new(
        store: SharedStore,
        clock: SharedClock,
        renderer: MessageRenderer,
        options: ReminderOptions,
    ) -> Self {
        Self { store, clock, renderer, options }
    }

    /// Scans the UTC day `analysis_date` falls on; defaults to `days_back`
    /// days before now.
    pub(crate) async fn process_reminders(
        &self,
        analysis_date: Option<OffsetDateTime>,
    ) -> anyhow::Result<ReminderReport> {
        if !self.options.enabled {
            tracing::info!("Reminder scan is disabled, skipping");
            return Ok(ReminderReport { skipped_disabled: true, ..ReminderReport::default() });
        }

        let now = self.clock.now();
        let day_start = start_of_day(
            analysis_date.unwrap_or_else(|| now - days(self.options.days_back)),
            UtcOffset::UTC,
        );
        let day_end = day_start + days(1);

        let events = self
            .store
            .answers_between(UNCHECKED_STATUS, day_start, day_end)
            .await
            .context("Failed to load unchecked answers")?;

        let mut report = ReminderReport { answers: events.len(), ..ReminderReport::default() };
        if events.is_empty() {
            tracing::debug!(day_start = %day_start, "No unchecked answers for reminder day");
            return Ok(report);
        }

        let mut resolved: HashMap<(i64, Option<String>), Result<Assignment, Unresolved>> =
            HashMap::new();
        // mentor id -> (answer time, event id, line)
        let mut by_mentor: BTreeMap<i64, Vec<(Option<OffsetDateTime>, i64, ReminderLine)>> =
            BTreeMap::new();

        for event in &events {
            let key = (event.user_id, event.answer_training_id.clone());
            if !resolved.contains_key(&key) {
                let assignment = resolve_event(self.store.as_ref(), event, now)
                    .await
                    .with_context(|| format!("Failed to resolve answer event {}", event.id))?;
                resolved.insert(key.clone(), assignment);
            }
            let assignment = match resolved.get(&key) {
                Some(Ok(assignment)) => assignment,
                Some(Err(reason)) => {
                    report.unresolved += 1;
                    tracing::warn!(
                        event_id = event.id,
                        user_id = event.user_id,
                        reason = %reason,
                        "Skipping unchecked answer without a current mentor"
                    );
                    continue;
                }
                None => continue,
            };

            let line = ReminderLine {
                name: assignment.student.display_name(),
                user_id: event.user_id,
                answered_at: event.event_date,
            };
            by_mentor.entry(assignment.mentor.id).or_default().push((
                event.event_date,
                event.id,
                line,
            ));
        }

        for (mentor_id, mut answers) in by_mentor {
            answers.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
            let lines: Vec<ReminderLine> = answers.into_iter().map(|(_, _, line)| line).collect();

            let message = self.renderer.reminder_digest(&lines);
            let created = self
                .store
                .insert_notification(NewNotification {
                    mentor_id,
                    kind: NotificationKind::ReminderUnchecked,
                    message,
                    event_id: None,
                    signatures: Vec::new(),
                    created_at: now,
                })
                .await
                .with_context(|| format!("Failed to store reminder for mentor {mentor_id}"))?;

            report.notifications += 1;
            tracing::info!(
                notification_id = %created.id,
                mentor_id,
                answers = lines.len(),
                "Created reminder digest"
            );
        }

        metrics::counter!(
            "notifications_created_total",
            "kind" => NotificationKind::ReminderUnchecked.as_str()
        )
        .increment(report.notifications as u64);
        tracing::info!(
            day_start = %day_start,
            answers = report.answers,
            unresolved = report.unresolved,
            notifications = report.notifications,
            "Reminder scan finished"
        );

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use time::macros::datetime;
    use time::Duration;

    use super::*;
    use crate::core::time::ManualClock;
    use crate::store::memory::MemoryStore;

    const NOW: OffsetDateTime = datetime!(2025-04-10 09:00:00 UTC);

    fn scanner(store: Arc<MemoryStore>, enabled: bool) -> ReminderScanner {
        ReminderScanner::new(
            store,
            ManualClock::new(NOW),
            MessageRenderer::new("https://school.example", UtcOffset::UTC),
            ReminderOptions { enabled, days_back: 2 },
        )
    }

    fn seed(store: &MemoryStore) -> (i64, i64) {
        let mentor_a = store.add_mentor("a@example.com", "Алла", Some(100));
        let mentor_b = store.add_mentor("b@example.com", "Борис", Some(200));
        let training = store.add_training("tr-1", "Тренинг");
        for (external_id, name, mentor) in
            [(1, "Анна", mentor_a), (2, "Вера", mentor_a), (3, "Глеб", mentor_b)]
        {
            let student = store.add_student(external_id, name, "Тестова");
            store.add_mapping(student, mentor, training);
        }
        (mentor_a, mentor_b)
    }

    #[tokio::test]
    async fn disabled_flag_is_a_no_op() {
        let store = MemoryStore::new();
        seed(&store);
        store.add_event(1, "tr-1", "ls-1", "new", datetime!(2025-04-08 10:00:00 UTC));

        let report = scanner(store.clone(), false).process_reminders(None).await.expect("scan");

        assert!(report.skipped_disabled);
        assert!(store.notifications().is_empty());
    }

    #[tokio::test]
    async fn one_digest_per_mentor_sorted_by_answer_time() {
        let store = MemoryStore::new();
        let (mentor_a, mentor_b) = seed(&store);
        store.add_event(2, "tr-1", "ls-1", "new", datetime!(2025-04-08 08:00:00 UTC));
        store.add_event(1, "tr-1", "ls-1", "new", datetime!(2025-04-08 15:00:00 UTC));
        store.add_event(3, "tr-1", "ls-2", "new", datetime!(2025-04-08 23:59:00 UTC));
        // Outside the analysed day or already checked.
        store.add_event(1, "tr-1", "ls-2", "new", datetime!(2025-04-09 00:00:00 UTC));
        store.add_event(3, "tr-1", "ls-3", "accepted", datetime!(2025-04-08 12:00:00 UTC));

        let report = scanner(store.clone(), true).process_reminders(None).await.expect("scan");

        assert_eq!(report.answers, 3);
        assert_eq!(report.notifications, 2);
        let notifications = store.notifications();
        assert_eq!(notifications.len(), 2);

        let for_a = notifications.iter().find(|n| n.mentor_id == mentor_a).unwrap();
        assert_eq!(for_a.kind, NotificationKind::ReminderUnchecked);
        let vera = for_a.message.find("Вера").unwrap();
        let anna = for_a.message.find("Анна").unwrap();
        assert!(vera < anna);
        assert!(for_a.message.contains("Ответ: 08-04-2025 08:00"));

        let for_b = notifications.iter().find(|n| n.mentor_id == mentor_b).unwrap();
        assert!(for_b.message.contains("Глеб"));
    }

    #[tokio::test]
    async fn explicit_analysis_date_and_unresolved_students() {
        let store = MemoryStore::new();
        seed(&store);
        store.add_event(999, "tr-1", "ls-1", "new", datetime!(2025-04-01 10:00:00 UTC));
        store.add_event(1, "tr-1", "ls-1", "NEW", datetime!(2025-04-01 11:00:00 UTC));

        let report = scanner(store.clone(), true)
            .process_reminders(Some(datetime!(2025-04-01 18:30:00 UTC)))
            .await
            .expect("scan");

        assert_eq!(report.answers, 2);
        assert_eq!(report.unresolved, 1);
        assert_eq!(report.notifications, 1);
    }

    #[tokio::test]
    async fn every_answer_gets_its_own_line_in_time_order() {
        let store = MemoryStore::new();
        seed(&store);
        let day = datetime!(2025-04-08 00:00:00 UTC);
        store.add_event(1, "tr-1", "ls-1", "new", day + Duration::hours(14));
        store.add_event(1, "tr-1", "ls-2", "new", day + Duration::hours(9));

        scanner(store.clone(), true).process_reminders(None).await.expect("scan");

        let message = &store.notifications()[0].message;
        assert_eq!(message.matches("Ответ:").count(), 2);
        assert_eq!(message.matches("Анна").count(), 2);
        let morning = message.find("Ответ: 08-04-2025 09:00").unwrap();
        let afternoon = message.find("Ответ: 08-04-2025 14:00").unwrap();
        assert!(morning < afternoon);
    }

    #[tokio::test]
    async fn analysis_day_is_a_utc_day_regardless_of_display_zone() {
        let store = MemoryStore::new();
        seed(&store);
        // 01:00 on 2025-04-09 in UTC+3, still 2025-04-08 in UTC.
        store.add_event(1, "tr-1", "ls-1", "new", datetime!(2025-04-08 22:00:00 UTC));
        store.add_event(2, "tr-1", "ls-1", "new", datetime!(2025-04-07 23:00:00 UTC));
        let moscow = UtcOffset::from_hms(3, 0, 0).unwrap();
        let scanner = ReminderScanner::new(
            store.clone(),
            ManualClock::new(NOW),
            MessageRenderer::new("https://school.example", moscow),
            ReminderOptions { enabled: true, days_back: 2 },
        );

        let report = scanner.process_reminders(None).await.expect("scan");

        assert_eq!(report.answers, 1);
        let message = &store.notifications()[0].message;
        assert!(message.contains("Анна"));
        assert!(message.contains("Ответ: 09-04-2025 01:00 (МСК)"));
        assert!(!message.contains("Вера"));
    }
}
