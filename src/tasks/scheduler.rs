use std::collections::BTreeMap;
use std::future::Future;

use time::UtcOffset;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, Duration, Instant, MissedTickBehavior};

use crate::core::time::{until_next_daily, SharedClock};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Schedule {
    /// First run immediately, then every period. A slow pass delays the next
    /// tick instead of bursting.
    Every(Duration),
    /// Once a day at `hour:00` wall-clock time in `offset`.
    DailyAt { hour: u8, offset: UtcOffset },
}

struct TaskHandle {
    cancel: watch::Sender<bool>,
    join: JoinHandle<()>,
}

/// Owns named periodic tasks. Each task can be cancelled on its own; shutdown
/// stops all of them and waits for in-flight passes to finish.
pub(crate) struct Scheduler {
    clock: SharedClock,
    tasks: BTreeMap<String, TaskHandle>,
}

impl Scheduler {
    pub(crate) fn new(clock: SharedClock) -> Self {
        Self { clock, tasks: BTreeMap::new() }
    }

    pub(crate) fn spawn<F, Fut>(&mut self, name: &str, schedule: Schedule, job: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        if let Some(previous) = self.tasks.remove(name) {
            tracing::warn!(task = name, "Replacing already scheduled task");
            let _ = previous.cancel.send(true);
        }

        let (cancel, cancelled) = watch::channel(false);
        let task = name.to_string();
        let join = match schedule {
            Schedule::Every(period) => tokio::spawn(every_loop(task, period, job, cancelled)),
            Schedule::DailyAt { hour, offset } => tokio::spawn(daily_loop(
                task,
                hour,
                offset,
                self.clock.clone(),
                job,
                cancelled,
            )),
        };

        tracing::info!(task = name, schedule = ?schedule, "Scheduled task registered");
        self.tasks.insert(name.to_string(), TaskHandle { cancel, join });
    }

    pub(crate) fn task_names(&self) -> Vec<String> {
        self.tasks.keys().cloned().collect()
    }

    /// Stops one task after its current pass. Returns `false` for unknown names.
    pub(crate) async fn cancel(&mut self, name: &str) -> bool {
        let Some(handle) = self.tasks.remove(name) else {
            return false;
        };
        stop(name, handle).await;
        true
    }

    pub(crate) async fn shutdown(mut self) {
        for handle in self.tasks.values() {
            let _ = handle.cancel.send(true);
        }
        for (name, handle) in std::mem::take(&mut self.tasks) {
            stop(&name, handle).await;
        }
        tracing::info!("Scheduler stopped");
    }
}

async fn stop(name: &str, handle: TaskHandle) {
    if handle.cancel.send(true).is_err() {
        tracing::debug!(task = name, "Task already finished");
    }
    if let Err(err) = handle.join.await {
        tracing::error!(task = name, error = %err, "Background task join failed");
    }
}

async fn every_loop<F, Fut>(
    name: String,
    period: Duration,
    job: F,
    mut cancelled: watch::Receiver<bool>,
) where
    F: Fn() -> Fut,
    Fut: Future<Output = anyhow::Result<()>>,
{
    let mut tick = interval(period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancelled.changed() => break,
            _ = tick.tick() => run_pass(&name, &job).await,
        }
    }
    tracing::debug!(task = %name, "Periodic task stopped");
}

async fn daily_loop<F, Fut>(
    name: String,
    hour: u8,
    offset: UtcOffset,
    clock: SharedClock,
    job: F,
    mut cancelled: watch::Receiver<bool>,
) where
    F: Fn() -> Fut,
    Fut: Future<Output = anyhow::Result<()>>,
{
    loop {
        let wait = until_next_daily(clock.now(), hour, offset);
        tracing::debug!(task = %name, wait_seconds = wait.as_secs(), "Daily task sleeping");
        tokio::select! {
            _ = cancelled.changed() => break,
            _ = sleep(wait) => run_pass(&name, &job).await,
        }
    }
    tracing::debug!(task = %name, "Daily task stopped");
}

async fn run_pass<F, Fut>(name: &str, job: &F)
where
    F: Fn() -> Fut,
    Fut: Future<Output = anyhow::Result<()>>,
{
    let started = Instant::now();
    let result = job().await;
    metrics::histogram!("scheduled_task_duration_seconds", "task" => name.to_string())
        .record(started.elapsed().as_secs_f64());

    if let Err(err) = result {
        metrics::counter!("scheduled_task_failures_total", "task" => name.to_string()).increment(1);
        tracing::error!(task = name, error = ?err, "Scheduled task failed");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use time::macros::datetime;

    use super::*;
    use crate::core::time::ManualClock;

    fn counting_job(
        counter: Arc<AtomicU32>,
    ) -> impl Fn() -> std::future::Ready<anyhow::Result<()>> {
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
            std::future::ready(Ok(()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn interval_task_runs_immediately_then_every_period() {
        let mut scheduler = Scheduler::new(ManualClock::new(datetime!(2025-01-01 00:00:00 UTC)));
        let runs = Arc::new(AtomicU32::new(0));
        scheduler.spawn(
            "ingest",
            Schedule::Every(Duration::from_secs(10)),
            counting_job(runs.clone()),
        );

        sleep(Duration::from_secs(25)).await;

        assert_eq!(runs.load(Ordering::SeqCst), 3);
        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn cancelling_one_task_leaves_others_running() {
        let mut scheduler = Scheduler::new(ManualClock::new(datetime!(2025-01-01 00:00:00 UTC)));
        let first = Arc::new(AtomicU32::new(0));
        let second = Arc::new(AtomicU32::new(0));
        let every = Schedule::Every(Duration::from_secs(10));
        scheduler.spawn("first", every, counting_job(first.clone()));
        scheduler.spawn("second", every, counting_job(second.clone()));

        sleep(Duration::from_secs(5)).await;
        assert!(scheduler.cancel("first").await);
        assert!(!scheduler.cancel("first").await);
        assert_eq!(scheduler.task_names(), vec!["second".to_string()]);

        sleep(Duration::from_secs(30)).await;

        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 4);
        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn failing_pass_does_not_stop_the_task() {
        let mut scheduler = Scheduler::new(ManualClock::new(datetime!(2025-01-01 00:00:00 UTC)));
        let runs = Arc::new(AtomicU32::new(0));
        let counter = runs.clone();
        scheduler.spawn("flaky", Schedule::Every(Duration::from_secs(10)), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            std::future::ready(Err(anyhow::anyhow!("storage down")))
        });

        sleep(Duration::from_secs(15)).await;

        assert_eq!(runs.load(Ordering::SeqCst), 2);
        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn daily_task_fires_at_trigger_hour_in_display_zone() {
        // 11:00 in UTC+3, trigger at 12:00 local.
        let clock = ManualClock::new(datetime!(2025-03-10 08:00:00 UTC));
        let mut scheduler = Scheduler::new(clock);
        let runs = Arc::new(AtomicU32::new(0));
        let offset = UtcOffset::from_hms(3, 0, 0).unwrap();
        scheduler.spawn(
            "reminders",
            Schedule::DailyAt { hour: 12, offset },
            counting_job(runs.clone()),
        );

        sleep(Duration::from_secs(59 * 60)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        sleep(Duration::from_secs(2 * 60)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_waits_for_in_flight_pass() {
        let mut scheduler = Scheduler::new(ManualClock::new(datetime!(2025-01-01 00:00:00 UTC)));
        let finished = Arc::new(AtomicU32::new(0));
        let counter = finished.clone();
        scheduler.spawn("slow", Schedule::Every(Duration::from_secs(60)), move || {
            let counter = counter.clone();
            async move {
                sleep(Duration::from_secs(5)).await;
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        sleep(Duration::from_secs(1)).await;
        scheduler.shutdown().await;

        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }
}
