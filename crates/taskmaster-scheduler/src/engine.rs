//! Cron scheduler engine: the loop that checks and triggers jobs.
//! Uses tokio::interval for ticking (sleeps between checks).
//!
//! Each fired job runs on its own tokio task, so a slow run can overlap the
//! next slot. Jobs must therefore be re-entrant. On stop the loop waits for
//! running jobs, up to a grace period, before returning.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Utc};
use futures::future::BoxFuture;
use tokio::sync::Notify;
use tokio::task::JoinSet;

use taskmaster_core::{Clock, Result};

use crate::cron::CronSchedule;

/// Future produced by one job run.
pub type JobFuture = BoxFuture<'static, ()>;

type JobFn = Arc<dyn Fn() -> JobFuture + Send + Sync>;

const DEFAULT_SHUTDOWN_GRACE: std::time::Duration = std::time::Duration::from_secs(60);

struct Job {
    name: String,
    schedule: CronSchedule,
    run: JobFn,
    next_run: Option<DateTime<Utc>>,
    run_count: u64,
}

/// Snapshot of one registered job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobInfo {
    pub name: String,
    pub expression: String,
    pub next_run: Option<DateTime<Utc>>,
    pub run_count: u64,
}

/// Stops a running scheduler loop.
#[derive(Clone)]
pub struct SchedulerHandle {
    shutdown: Arc<Notify>,
}

impl SchedulerHandle {
    pub fn stop(&self) {
        // notify_one stores a permit if the loop is busy right now.
        self.shutdown.notify_one();
    }
}

/// Recurring cron-style jobs evaluated in a fixed local offset.
pub struct CronScheduler {
    jobs: Vec<Job>,
    clock: Arc<dyn Clock>,
    offset: FixedOffset,
    check_interval: std::time::Duration,
    shutdown_grace: std::time::Duration,
    shutdown: Arc<Notify>,
    running: JoinSet<()>,
}

impl CronScheduler {
    pub fn new(clock: Arc<dyn Clock>, offset: FixedOffset, check_interval: std::time::Duration) -> Self {
        Self {
            jobs: Vec::new(),
            clock,
            offset,
            check_interval,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            shutdown: Arc::new(Notify::new()),
            running: JoinSet::new(),
        }
    }

    /// How long `run` waits for in-flight jobs after a stop request.
    pub fn with_shutdown_grace(mut self, grace: std::time::Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Register a job. The first slot is computed from the current time.
    pub fn schedule<F, Fut>(&mut self, name: &str, expression: &str, job: F) -> Result<()>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let schedule = CronSchedule::parse(expression)?;
        let next_run = schedule.next_after(self.clock.now(), self.offset);
        tracing::info!(
            "📅 Job scheduled: '{}' ({}) next run {:?}",
            name,
            expression,
            next_run
        );
        let run: JobFn = Arc::new(move || -> JobFuture { Box::pin(job()) });
        self.jobs.push(Job {
            name: name.to_string(),
            schedule,
            run,
            next_run,
            run_count: 0,
        });
        Ok(())
    }

    pub fn jobs(&self) -> Vec<JobInfo> {
        self.jobs
            .iter()
            .map(|j| JobInfo {
                name: j.name.clone(),
                expression: j.schedule.expression().to_string(),
                next_run: j.next_run,
                run_count: j.run_count,
            })
            .collect()
    }

    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            shutdown: self.shutdown.clone(),
        }
    }

    /// Collect every job whose slot has arrived and advance it to its next
    /// slot. A slot missed while the process slept fires once.
    pub fn take_due(&mut self) -> Vec<(String, JobFuture)> {
        let now = self.clock.now();
        let mut due = Vec::new();

        for job in self.jobs.iter_mut() {
            let Some(next) = job.next_run else { continue };
            if next > now {
                continue;
            }
            tracing::info!("🔔 Job triggered: '{}'", job.name);
            job.run_count += 1;
            job.next_run = job.schedule.next_after(now, self.offset);
            due.push((job.name.clone(), (job.run)()));
        }

        due
    }

    /// Tick: reap finished jobs, then spawn due ones. Must be called inside
    /// a tokio runtime.
    pub fn tick(&mut self) -> Vec<String> {
        while let Some(finished) = self.running.try_join_next() {
            log_job_exit(finished);
        }
        self.take_due()
            .into_iter()
            .map(|(name, fut)| {
                self.running.spawn(fut);
                name
            })
            .collect()
    }

    /// Jobs spawned by `tick` that have not finished yet.
    pub fn in_flight(&self) -> usize {
        self.running.len()
    }

    /// Wait for in-flight jobs up to the grace period, then abort the rest.
    async fn drain(&mut self) {
        if self.running.is_empty() {
            return;
        }
        tracing::info!("⏳ Waiting for {} running job(s) to finish...", self.running.len());
        let grace = self.shutdown_grace;
        let running = &mut self.running;
        let finished = tokio::time::timeout(grace, async {
            while let Some(exit) = running.join_next().await {
                log_job_exit(exit);
            }
        })
        .await;
        if finished.is_err() {
            tracing::warn!(
                "⚠️ {} job(s) still running after {}s; aborting",
                self.running.len(),
                grace.as_secs()
            );
            self.running.abort_all();
        }
    }

    /// Run until [`SchedulerHandle::stop`] is called.
    pub async fn run(mut self) {
        tracing::info!(
            "⏰ Scheduler started with {} job(s) (check every {}s)",
            self.jobs.len(),
            self.check_interval.as_secs()
        );
        let mut interval = tokio::time::interval(self.check_interval);
        let shutdown = self.shutdown.clone();

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick();
                }
                _ = shutdown.notified() => break,
            }
        }

        self.drain().await;
        tracing::info!("⏹️ Scheduler stopped");
    }
}

fn log_job_exit(exit: std::result::Result<(), tokio::task::JoinError>) {
    if let Err(e) = exit
        && e.is_panic()
    {
        tracing::error!("❌ Scheduled job panicked: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use taskmaster_core::ManualClock;

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    fn counting_job(counter: &Arc<AtomicUsize>) -> impl Fn() -> futures::future::Ready<()> + Send + Sync + 'static {
        let counter = counter.clone();
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
            futures::future::ready(())
        }
    }

    #[tokio::test]
    async fn test_fires_once_per_slot() {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 2, 8, 59, 0).unwrap()));
        let mut scheduler = CronScheduler::new(clock.clone(), utc(), std::time::Duration::from_secs(30));
        let runs = Arc::new(AtomicUsize::new(0));
        scheduler.schedule("reminders", "0 9 * * *", counting_job(&runs)).unwrap();

        assert!(scheduler.take_due().is_empty());

        clock.advance(Duration::minutes(1));
        let due = scheduler.take_due();
        assert_eq!(due.len(), 1);
        for (_, fut) in due {
            fut.await;
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        // Same minute again: nothing due until tomorrow.
        clock.advance(Duration::seconds(30));
        assert!(scheduler.take_due().is_empty());
        let info = &scheduler.jobs()[0];
        assert_eq!(info.run_count, 1);
        assert_eq!(info.next_run, Some(Utc.with_ymd_and_hms(2026, 3, 3, 9, 0, 0).unwrap()));
    }

    #[tokio::test]
    async fn test_distinct_slots() {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 2, 8, 0, 0).unwrap()));
        let mut scheduler = CronScheduler::new(clock.clone(), utc(), std::time::Duration::from_secs(30));
        let reminders = Arc::new(AtomicUsize::new(0));
        let overdue = Arc::new(AtomicUsize::new(0));
        scheduler.schedule("reminders", "0 9 * * *", counting_job(&reminders)).unwrap();
        scheduler.schedule("overdue", "0 10 * * *", counting_job(&overdue)).unwrap();

        clock.set(Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap());
        let names: Vec<String> = scheduler.take_due().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["reminders".to_string()]);

        clock.set(Utc.with_ymd_and_hms(2026, 3, 2, 10, 0, 0).unwrap());
        let names: Vec<String> = scheduler.take_due().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["overdue".to_string()]);
    }

    #[test]
    fn test_invalid_expression_rejected() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let mut scheduler = CronScheduler::new(clock, utc(), std::time::Duration::from_secs(30));
        let runs = Arc::new(AtomicUsize::new(0));
        assert!(scheduler.schedule("bad", "0 9 *", counting_job(&runs)).is_err());
        assert!(scheduler.jobs().is_empty());
    }

    #[tokio::test]
    async fn test_stop_ends_run_loop() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let scheduler = CronScheduler::new(clock, utc(), std::time::Duration::from_millis(10));
        let handle = scheduler.handle();
        let running = tokio::spawn(scheduler.run());
        handle.stop();
        tokio::time::timeout(std::time::Duration::from_secs(5), running)
            .await
            .unwrap()
            .unwrap();
    }

    fn slow_job(done: &Arc<AtomicBool>, delay: std::time::Duration) -> impl Fn() -> JobFuture + Send + Sync + 'static {
        let done = done.clone();
        move || -> JobFuture {
            let done = done.clone();
            Box::pin(async move {
                tokio::time::sleep(delay).await;
                done.store(true, Ordering::SeqCst);
            })
        }
    }

    #[tokio::test]
    async fn test_stop_waits_for_running_job() {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 2, 8, 59, 0).unwrap()));
        let mut scheduler = CronScheduler::new(clock.clone(), utc(), std::time::Duration::from_millis(10));
        let done = Arc::new(AtomicBool::new(false));
        scheduler
            .schedule("reminders", "0 9 * * *", slow_job(&done, std::time::Duration::from_millis(300)))
            .unwrap();
        clock.set(Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap());

        let handle = scheduler.handle();
        let running = tokio::spawn(scheduler.run());
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!done.load(Ordering::SeqCst));

        handle.stop();
        tokio::time::timeout(std::time::Duration::from_secs(5), running)
            .await
            .unwrap()
            .unwrap();
        assert!(done.load(Ordering::SeqCst), "run() returned before the job finished");
    }

    #[tokio::test]
    async fn test_stop_aborts_job_past_grace() {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 2, 8, 59, 0).unwrap()));
        let mut scheduler = CronScheduler::new(clock.clone(), utc(), std::time::Duration::from_millis(10))
            .with_shutdown_grace(std::time::Duration::from_millis(50));
        let done = Arc::new(AtomicBool::new(false));
        scheduler
            .schedule("reminders", "0 9 * * *", slow_job(&done, std::time::Duration::from_secs(30)))
            .unwrap();
        clock.set(Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap());

        let handle = scheduler.handle();
        let running = tokio::spawn(scheduler.run());
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        handle.stop();
        tokio::time::timeout(std::time::Duration::from_secs(5), running)
            .await
            .unwrap()
            .unwrap();
        assert!(!done.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_tick_reaps_finished_jobs() {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 2, 8, 59, 0).unwrap()));
        let mut scheduler = CronScheduler::new(clock.clone(), utc(), std::time::Duration::from_secs(30));
        let runs = Arc::new(AtomicUsize::new(0));
        scheduler.schedule("reminders", "0 9 * * *", counting_job(&runs)).unwrap();

        clock.set(Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap());
        assert_eq!(scheduler.tick(), vec!["reminders".to_string()]);
        assert_eq!(scheduler.in_flight(), 1);

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(scheduler.tick().is_empty());
        assert_eq!(scheduler.in_flight(), 0);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }
}
