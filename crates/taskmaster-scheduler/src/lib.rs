//! # TaskMaster Scheduler
//!
//! Daily deadline notifications for TaskMaster.
//!
//! ## Architecture
//! ```text
//! CronScheduler (tokio interval, local UTC offset)
//!   ├── "0 9 * * *"  → DeadlineScanner::run_reminders
//!   └── "0 10 * * *" → DeadlineScanner::run_overdue
//!                         ├── UserStore: preference + recipient
//!                         ├── NotificationLedger: claim flag once
//!                         └── EmailTransport (SMTP) → reminder / overdue email
//! ```
//!
//! Scans are re-entrant. Overlapping runs never send the same notification
//! twice because the ledger flag is claimed with a single conditional update.

pub mod cron;
pub mod engine;
pub mod ledger;
pub mod mailer;
pub mod notify;
pub mod persistence;
pub mod scanner;

pub use cron::{CronSchedule, utc_offset};
pub use engine::{CronScheduler, JobInfo, SchedulerHandle};
pub use ledger::NotificationLedger;
pub use mailer::SmtpMailer;
pub use notify::NotificationKind;
pub use persistence::SqliteStore;
pub use scanner::{DayBounds, DeadlineScanner, ScanReport, schedule_deadline_jobs};
