use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use crate::core::resilience::{CircuitBreaker, RetryExecutor, RetryPolicy};
use crate::core::state::AppState;
use crate::services::deadlines::DeadlineScanner;
use crate::services::delivery::DeliveryWorker;
use crate::services::ingestor::WebhookIngestor;
use crate::services::messages::MessageRenderer;
use crate::services::reminders::{ReminderOptions, ReminderScanner};
use crate::services::telegram::TelegramTransport;
use crate::tasks::scheduler::{Schedule, Scheduler};

pub(crate) const WEBHOOK_TASK: &str = "webhook_ingest";
pub(crate) const DEADLINE_TASK: &str = "deadline_scan";
pub(crate) const REMINDER_TASK: &str = "reminder_scan";
pub(crate) const DELIVERY_TASK: &str = "notification_delivery";

/// Registers every background pass on a fresh scheduler.
pub(crate) fn build_scheduler(state: &AppState) -> Result<Scheduler> {
    let settings = state.settings();
    let store = state.store().clone();
    let clock = state.clock().clone();
    let schedule = settings.schedule().clone();
    let notifications = settings.notifications();
    let renderer = MessageRenderer::from_settings(settings);

    let mut scheduler = Scheduler::new(clock.clone());

    let ingestor =
        Arc::new(WebhookIngestor::new(store.clone(), clock.clone(), renderer.clone()));
    let batch = schedule.webhook_batch_size;
    scheduler.spawn(
        WEBHOOK_TASK,
        Schedule::Every(Duration::from_secs(schedule.webhook_interval_seconds)),
        move || {
            let ingestor = ingestor.clone();
            async move { ingestor.process_pending_events(batch).await.map(|_| ()) }
        },
    );

    let deadlines = Arc::new(DeadlineScanner::new(
        store.clone(),
        clock.clone(),
        renderer.clone(),
        notifications.deadline_warning_hours,
    ));
    scheduler.spawn(
        DEADLINE_TASK,
        Schedule::Every(Duration::from_secs(schedule.deadline_interval_minutes * 60)),
        move || {
            let deadlines = deadlines.clone();
            async move { deadlines.check_deadlines().await.map(|_| ()) }
        },
    );

    let reminders = Arc::new(ReminderScanner::new(
        store.clone(),
        clock.clone(),
        renderer,
        ReminderOptions {
            enabled: notifications.reminder_enabled,
            days_back: notifications.reminder_days_back,
        },
    ));
    scheduler.spawn(
        REMINDER_TASK,
        Schedule::DailyAt {
            hour: schedule.reminder_trigger_hour,
            offset: settings.display_offset(),
        },
        move || {
            let reminders = reminders.clone();
            async move { reminders.process_reminders(None).await.map(|_| ()) }
        },
    );

    if settings.telegram().token.is_empty() {
        tracing::warn!(
            "TG_TOKEN is empty, notifications stay pending until delivery is configured"
        );
        return Ok(scheduler);
    }

    let retry = settings.delivery_retry();
    let breaker = Arc::new(CircuitBreaker::new(
        "telegram",
        retry.failure_threshold,
        Duration::from_secs(retry.recovery_timeout_seconds),
        clock.clone(),
    ));
    let executor =
        RetryExecutor::new("telegram_send", RetryPolicy::from_settings(retry), Some(breaker));
    let delivery = Arc::new(DeliveryWorker::new(
        store,
        clock,
        Arc::new(TelegramTransport::from_settings(settings)?),
        executor,
        Duration::from_millis(notifications.send_pause_ms),
    ));
    let batch = schedule.notification_batch_size;
    scheduler.spawn(
        DELIVERY_TASK,
        Schedule::Every(Duration::from_secs(schedule.delivery_interval_seconds)),
        move || {
            let delivery = delivery.clone();
            async move { delivery.send_pending(batch).await.map(|_| ()) }
        },
    );

    Ok(scheduler)
}

pub(crate) async fn run(state: AppState) -> Result<()> {
    let scheduler = build_scheduler(&state)?;
    tracing::info!(tasks = ?scheduler.task_names(), "Notification worker started");

    crate::core::shutdown::shutdown_signal().await;
    scheduler.shutdown().await;

    Ok(())
}
