use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use crate::core::resilience::{ResilienceError, RetryExecutor};
use crate::core::time::SharedClock;
use crate::db::models::Notification;
use crate::db::types::NotificationStatus;
use crate::services::transport::{Transport, TransportError};
use crate::store::{DeliveryUpdate, SharedStore, StoreError};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct DeliveryReport {
    pub(crate) fetched: usize,
    pub(crate) sent: usize,
    pub(crate) failed: usize,
    pub(crate) no_address: usize,
    /// Left pending because the transport circuit was open.
    pub(crate) deferred: usize,
}

enum Attempted {
    Finished(DeliveryUpdate),
    Deferred,
}

/// Pushes pending notifications to mentors through the chat transport.
pub(crate) struct DeliveryWorker {
    store: SharedStore,
    clock: SharedClock,
    transport: Arc<dyn Transport>,
    executor: RetryExecutor,
    send_pause: Duration,
}

impl DeliveryWorker {
    pub(crate) fn new(
        store: SharedStore,
        clock: SharedClock,
        transport: Arc<dyn Transport>,
        executor: RetryExecutor,
        send_pause: Duration,
    ) -> Self {
        Self { store, clock, transport, executor, send_pause }
    }

    /// Sends up to `batch_size` pending notifications, oldest first. Stops
    /// early when the transport circuit opens; those rows stay pending.
    pub(crate) async fn send_pending(&self, batch_size: u32) -> anyhow::Result<DeliveryReport> {
        let pending = self
            .store
            .pending_notifications(batch_size)
            .await
            .context("Failed to load pending notifications")?;

        let mut report = DeliveryReport { fetched: pending.len(), ..DeliveryReport::default() };
        if pending.is_empty() {
            return Ok(report);
        }

        let mut sent_any = false;
        for (index, notification) in pending.iter().enumerate() {
            let Some(chat_id) = self.resolve_chat(notification, &mut report).await? else {
                continue;
            };

            if sent_any && !self.send_pause.is_zero() {
                tokio::time::sleep(self.send_pause).await;
            }
            sent_any = true;

            match self.deliver(notification, chat_id).await {
                Attempted::Finished(update) => {
                    let status = update.status;
                    self.record(notification, update).await?;
                    match status {
                        NotificationStatus::Sent => report.sent += 1,
                        _ => report.failed += 1,
                    }
                }
                Attempted::Deferred => {
                    report.deferred = pending.len() - index;
                    tracing::warn!(
                        notification_id = %notification.id,
                        deferred = report.deferred,
                        "Transport circuit is open, leaving remaining notifications pending"
                    );
                    break;
                }
            }
        }

        tracing::info!(
            fetched = report.fetched,
            sent = report.sent,
            failed = report.failed,
            no_address = report.no_address,
            deferred = report.deferred,
            "Delivery pass finished"
        );

        Ok(report)
    }

    /// Chat id of the addressed mentor; terminal states are recorded here.
    async fn resolve_chat(
        &self,
        notification: &Notification,
        report: &mut DeliveryReport,
    ) -> anyhow::Result<Option<i64>> {
        let now = self.clock.now();
        let mentor = self
            .store
            .current_mentor(notification.mentor_id, now)
            .await
            .with_context(|| format!("Failed to load mentor {}", notification.mentor_id))?;

        let Some(mentor) = mentor else {
            self.record(
                notification,
                DeliveryUpdate::terminal(NotificationStatus::Failed, "mentor is not current"),
            )
            .await?;
            report.failed += 1;
            return Ok(None);
        };

        match mentor.telegram_id {
            Some(chat_id) => Ok(Some(chat_id)),
            None => {
                self.record(
                    notification,
                    DeliveryUpdate::terminal(
                        NotificationStatus::NoAddress,
                        "mentor has no telegram chat id",
                    ),
                )
                .await?;
                report.no_address += 1;
                Ok(None)
            }
        }
    }

    async fn deliver(&self, notification: &Notification, chat_id: i64) -> Attempted {
        let transport = self.transport.as_ref();
        let message = notification.message.as_str();
        let result = self
            .executor
            .run(|_attempt| {
                metrics::counter!("delivery_attempts_total").increment(1);
                transport.send_message(chat_id, message)
            })
            .await;

        match result {
            Ok(message_id) => {
                tracing::info!(
                    notification_id = %notification.id,
                    mentor_id = notification.mentor_id,
                    message_id = %message_id,
                    "Notification delivered"
                );
                Attempted::Finished(DeliveryUpdate::sent(message_id, self.clock.now()))
            }
            Err(err) if err.is_circuit_open() => Attempted::Deferred,
            Err(err) => {
                tracing::error!(
                    notification_id = %notification.id,
                    mentor_id = notification.mentor_id,
                    error = %err,
                    "Notification delivery failed"
                );
                Attempted::Finished(DeliveryUpdate::terminal(
                    NotificationStatus::Failed,
                    failure_note(&err),
                ))
            }
        }
    }

    async fn record(
        &self,
        notification: &Notification,
        update: DeliveryUpdate,
    ) -> anyhow::Result<()> {
        let status = update.status;
        match self.store.update_delivery(&notification.id, update).await {
            Ok(()) => {
                metrics::counter!("notifications_delivered_total", "status" => status.as_str())
                    .increment(1);
                Ok(())
            }
            Err(StoreError::NotFound(_)) => {
                tracing::warn!(
                    notification_id = %notification.id,
                    "Notification is no longer pending, skipping status update"
                );
                Ok(())
            }
            Err(err) => Err(err).with_context(|| {
                format!("Failed to record delivery status for notification {}", notification.id)
            }),
        }
    }
}

fn failure_note(err: &ResilienceError<TransportError>) -> String {
    match err {
        ResilienceError::Exhausted { attempts, last } => {
            format!("gave up after {attempts} attempts: {last}")
        }
        other => other.inner().map(ToString::to_string).unwrap_or_else(|| other.to_string()),
    }
}
