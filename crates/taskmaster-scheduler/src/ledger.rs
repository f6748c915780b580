//! Once-only notification markers.
//!
//! A flag is claimed with a single conditional update in the task store.
//! Exactly one caller wins each flag; only the winner may send the email.

use std::sync::Arc;

use taskmaster_core::{NotificationFlag, Result, TaskStore};

pub struct NotificationLedger {
    store: Arc<dyn TaskStore>,
}

impl NotificationLedger {
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        Self { store }
    }

    /// Claim the deadline-reminder flag. `Ok(false)` means it was already set.
    pub fn mark_reminder_sent(&self, task_id: &str) -> Result<bool> {
        self.mark(task_id, NotificationFlag::DeadlineReminder)
    }

    /// Claim the overdue flag. `Ok(false)` means it was already set.
    pub fn mark_overdue_sent(&self, task_id: &str) -> Result<bool> {
        self.mark(task_id, NotificationFlag::Overdue)
    }

    pub fn mark(&self, task_id: &str, flag: NotificationFlag) -> Result<bool> {
        let won = self.store.conditional_set_flag(task_id, flag)?;
        tracing::debug!(task = task_id, %flag, won, "Ledger mark");
        Ok(won)
    }
}
