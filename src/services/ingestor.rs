use anyhow::Context;

use crate::core::time::SharedClock;
use crate::db::models::ActivityEvent;
use crate::db::types::{is_qualifying_answer_status, NotificationKind};
use crate::services::messages::{MessageRenderer, StudentLine};
use crate::services::resolution::{resolve_event, Unresolved};
use crate::store::{EventBatch, EventOutcome, NewNotification, SharedStore};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct IngestReport {
    pub(crate) fetched: usize,
    pub(crate) notified: usize,
    pub(crate) unresolved: usize,
    pub(crate) ignored: usize,
}

/// Turns unprocessed webhook answer events into "answer received" notifications.
pub(crate) struct WebhookIngestor {
    store: SharedStore,
    clock: SharedClock,
    renderer: MessageRenderer,
}

enum Handled {
    Notify(NewNotification),
    Unresolved(Unresolved),
    Ignored(String),
}

impl WebhookIngestor {
    pub(crate) fn new(store: SharedStore, clock: SharedClock, renderer: MessageRenderer) -> Self {
        Self { store, clock, renderer }
    }

    /// Handles up to `batch_size` unprocessed events, oldest first, and commits
    /// the whole batch at once. Unresolvable events are marked processed with
    /// an error note; storage errors abort the batch without committing.
    pub(crate) async fn process_pending_events(
        &self,
        batch_size: u32,
    ) -> anyhow::Result<IngestReport> {
        let events = self
            .store
            .pending_events(batch_size)
            .await
            .context("Failed to load unprocessed webhook events")?;

        let mut report = IngestReport { fetched: events.len(), ..IngestReport::default() };
        if events.is_empty() {
            tracing::debug!("No unprocessed webhook events");
            return Ok(report);
        }

        let now = self.clock.now();
        let mut outcomes = Vec::with_capacity(events.len());

        for event in &events {
            let handled = self
                .handle(event)
                .await
                .with_context(|| format!("Failed to resolve webhook event {}", event.id))?;

            let outcome = match handled {
                Handled::Notify(notification) => {
                    report.notified += 1;
                    EventOutcome {
                        event_id: event.id,
                        error: None,
                        notification: Some(notification),
                    }
                }
                Handled::Unresolved(reason) => {
                    report.unresolved += 1;
                    tracing::warn!(
                        event_id = event.id,
                        user_id = event.user_id,
                        reason = %reason,
                        "Could not resolve mentor for webhook event"
                    );
                    EventOutcome {
                        event_id: event.id,
                        error: Some(reason.to_string()),
                        notification: None,
                    }
                }
                Handled::Ignored(note) => {
                    report.ignored += 1;
                    tracing::debug!(event_id = event.id, note = %note, "Skipping webhook event");
                    EventOutcome { event_id: event.id, error: Some(note), notification: None }
                }
            };
            outcomes.push(outcome);
        }

        self.store
            .commit_event_batch(EventBatch { processed_at: now, outcomes })
            .await
            .context("Failed to commit webhook event batch")?;

        metrics::counter!("webhook_events_processed_total", "outcome" => "notified")
            .increment(report.notified as u64);
        metrics::counter!("webhook_events_processed_total", "outcome" => "unresolved")
            .increment(report.unresolved as u64);
        metrics::counter!("webhook_events_processed_total", "outcome" => "ignored")
            .increment(report.ignored as u64);
        metrics::counter!(
            "notifications_created_total",
            "kind" => NotificationKind::AnswerReceived.as_str()
        )
        .increment(report.notified as u64);

        tracing::info!(
            fetched = report.fetched,
            notified = report.notified,
            unresolved = report.unresolved,
            ignored = report.ignored,
            "Processed webhook events"
        );

        Ok(report)
    }

    async fn handle(&self, event: &ActivityEvent) -> Result<Handled, crate::store::StoreError> {
        let status = event.answer_status.as_deref().unwrap_or_default();
        if !is_qualifying_answer_status(status) {
            return Ok(Handled::Ignored(format!("unsupported answer status: {status}")));
        }

        let now = self.clock.now();
        let assignment = match resolve_event(self.store.as_ref(), event, now).await? {
            Ok(assignment) => assignment,
            Err(reason) => return Ok(Handled::Unresolved(reason)),
        };

        let Some(lesson_id) = event.answer_lesson_id.as_deref().filter(|id| !id.is_empty()) else {
            return Ok(Handled::Unresolved(Unresolved::MissingLessonId));
        };
        let Some(lesson) = self.store.lesson_by_external_id(lesson_id, now).await? else {
            return Ok(Handled::Unresolved(Unresolved::LessonNotFound(lesson_id.to_string())));
        };

        let student = StudentLine {
            name: assignment.student.display_name(),
            email: event.user_email.clone().unwrap_or_else(|| assignment.student.email.clone()),
        };
        let message =
            self.renderer.answer_received(&assignment.training, &lesson, &student, event.user_id);

        Ok(Handled::Notify(NewNotification {
            mentor_id: assignment.mentor.id,
            kind: NotificationKind::AnswerReceived,
            message,
            event_id: Some(event.id),
            signatures: Vec::new(),
            created_at: now,
        }))
    }
}
