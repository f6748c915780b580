//! Deadline scanner: daily reminder and overdue detectors.
//!
//! The scanner keeps no state between runs. Per task it checks the owner's
//! preference, claims the ledger flag, then sends. An opted-out owner leaves
//! the flag untouched so a later opt-in still gets exactly one email. A send
//! failure after a successful claim is logged and not retried.

use std::sync::Arc;

use chrono::{DateTime, Duration, FixedOffset, TimeZone, Utc};
use serde::Serialize;

use taskmaster_core::config::SchedulerConfig;
use taskmaster_core::{
    Clock, EmailTransport, NotificationFlag, Result, TaskSnapshot, TaskStatus, TaskStore, UserStore,
};

use crate::engine::CronScheduler;
use crate::ledger::NotificationLedger;
use crate::notify::{self, NotificationKind};

pub const REMINDER_JOB: &str = "deadline-reminders";
pub const OVERDUE_JOB: &str = "overdue-tasks";

/// Outcome counters of one scan run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    pub candidates: usize,
    pub sent: usize,
    pub opted_out: usize,
    pub already_flagged: usize,
    pub lost_race: usize,
    pub transport_failures: usize,
    pub store_failures: usize,
}

/// Local-day boundaries of a scan, as UTC instants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayBounds {
    pub start_of_today: DateTime<Utc>,
    pub start_of_tomorrow: DateTime<Utc>,
    pub start_of_day_after: DateTime<Utc>,
}

pub struct DeadlineScanner {
    tasks: Arc<dyn TaskStore>,
    users: Arc<dyn UserStore>,
    transport: Arc<dyn EmailTransport>,
    ledger: NotificationLedger,
    clock: Arc<dyn Clock>,
    offset: FixedOffset,
}

fn flag_for(kind: NotificationKind) -> NotificationFlag {
    match kind {
        NotificationKind::DeadlineReminder => NotificationFlag::DeadlineReminder,
        NotificationKind::Overdue => NotificationFlag::Overdue,
    }
}

impl DeadlineScanner {
    pub fn new(
        tasks: Arc<dyn TaskStore>,
        users: Arc<dyn UserStore>,
        transport: Arc<dyn EmailTransport>,
        clock: Arc<dyn Clock>,
        offset: FixedOffset,
    ) -> Self {
        Self {
            ledger: NotificationLedger::new(tasks.clone()),
            tasks,
            users,
            transport,
            clock,
            offset,
        }
    }

    pub fn day_bounds(&self) -> DayBounds {
        let today = self.clock.now().with_timezone(&self.offset).date_naive();
        let midnight = today.and_time(chrono::NaiveTime::MIN)
            - Duration::seconds(i64::from(self.offset.local_minus_utc()));
        let start_of_today = Utc.from_utc_datetime(&midnight);
        DayBounds {
            start_of_today,
            start_of_tomorrow: start_of_today + Duration::days(1),
            start_of_day_after: start_of_today + Duration::days(2),
        }
    }

    fn candidates(&self, kind: NotificationKind) -> Result<Vec<TaskSnapshot>> {
        let bounds = self.day_bounds();
        match kind {
            NotificationKind::DeadlineReminder => self.tasks.find_due_between(
                bounds.start_of_tomorrow,
                bounds.start_of_day_after,
                TaskStatus::Completed,
            ),
            NotificationKind::Overdue => self
                .tasks
                .find_overdue_unflagged(bounds.start_of_today, TaskStatus::Completed),
        }
    }

    /// Tasks a run would consider right now, without sending or marking.
    pub fn preview(&self, kind: NotificationKind) -> Result<Vec<TaskSnapshot>> {
        let flag = flag_for(kind);
        Ok(self
            .candidates(kind)?
            .into_iter()
            .filter(|t| !t.notification_flags.is_set(flag))
            .collect())
    }

    pub async fn run_reminders(&self) -> ScanReport {
        self.run(NotificationKind::DeadlineReminder).await
    }

    pub async fn run_overdue(&self) -> ScanReport {
        self.run(NotificationKind::Overdue).await
    }

    /// One scan. Failures are counted per task; the batch always completes.
    pub async fn run(&self, kind: NotificationKind) -> ScanReport {
        tracing::info!("🔍 Checking tasks for {} notifications...", kind);
        let mut report = ScanReport::default();

        let candidates = match self.candidates(kind) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!("⚠️ {} scan query failed: {e}", kind);
                report.store_failures += 1;
                return report;
            }
        };
        report.candidates = candidates.len();

        for task in &candidates {
            self.process(kind, task, &mut report).await;
        }

        tracing::info!(
            "📧 {} scan done: {} candidate(s), {} sent, {} opted out, {} already flagged, {} lost race, {} transport failure(s), {} store failure(s)",
            kind,
            report.candidates,
            report.sent,
            report.opted_out,
            report.already_flagged,
            report.lost_race,
            report.transport_failures,
            report.store_failures
        );
        report
    }

    async fn process(&self, kind: NotificationKind, task: &TaskSnapshot, report: &mut ScanReport) {
        let flag = flag_for(kind);
        if task.notification_flags.is_set(flag) {
            report.already_flagged += 1;
            return;
        }

        match self.users.get_notification_preference(&task.owner_id) {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(task = %task.id, owner = %task.owner_id, "Owner opted out of email");
                report.opted_out += 1;
                return;
            }
            Err(e) => {
                tracing::warn!(task = %task.id, "⚠️ Preference lookup failed: {e}");
                report.store_failures += 1;
                return;
            }
        }

        let recipient = match self.users.get_recipient(&task.owner_id) {
            Ok(Some(r)) => r,
            Ok(None) => {
                tracing::warn!(task = %task.id, owner = %task.owner_id, "⚠️ Task owner not found");
                report.store_failures += 1;
                return;
            }
            Err(e) => {
                tracing::warn!(task = %task.id, "⚠️ Recipient lookup failed: {e}");
                report.store_failures += 1;
                return;
            }
        };

        match self.ledger.mark(&task.id, flag) {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(task = %task.id, %flag, "Flag already claimed by another scan");
                report.lost_race += 1;
                return;
            }
            Err(e) => {
                tracing::warn!(task = %task.id, "⚠️ Ledger update failed: {e}");
                report.store_failures += 1;
                return;
            }
        }

        let email = notify::render(kind, &recipient, task, self.offset);
        match self.transport.send(&email).await {
            Ok(()) => {
                tracing::info!("✅ {} email sent for '{}' to {}", kind, task.title, email.to);
                report.sent += 1;
            }
            Err(e) => {
                // Flag stays set; no retry on later runs.
                tracing::warn!(
                    task = %task.id,
                    transport = self.transport.name(),
                    "❌ {} email failed: {e}",
                    kind
                );
                report.transport_failures += 1;
            }
        }
    }
}

/// Register the reminder and overdue scans at their configured slots.
pub fn schedule_deadline_jobs(
    scheduler: &mut CronScheduler,
    scanner: Arc<DeadlineScanner>,
    config: &SchedulerConfig,
) -> Result<()> {
    let reminders = scanner.clone();
    scheduler.schedule(REMINDER_JOB, &config.reminder_cron, move || {
        let scanner = reminders.clone();
        async move {
            scanner.run_reminders().await;
        }
    })?;
    scheduler.schedule(OVERDUE_JOB, &config.overdue_cron, move || {
        let scanner = scanner.clone();
        async move {
            scanner.run_overdue().await;
        }
    })?;
    Ok(())
}
