//! Task and user store interfaces.
//!
//! Implementations must exclude soft-deleted tasks from every query.

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::types::{NotificationFlag, Recipient, TaskSnapshot, TaskStatus};

pub trait TaskStore: Send + Sync {
    /// Number of non-deleted tasks owned by `owner_id`, read live.
    fn count_active(&self, owner_id: &str) -> Result<u32>;

    /// Tasks with `start <= due_date < end` whose status is not `exclude_status`.
    fn find_due_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        exclude_status: TaskStatus,
    ) -> Result<Vec<TaskSnapshot>>;

    /// Tasks with `due_date < before`, status not `exclude_status` and
    /// `overdue_sent == false`.
    fn find_overdue_unflagged(
        &self,
        before: DateTime<Utc>,
        exclude_status: TaskStatus,
    ) -> Result<Vec<TaskSnapshot>>;

    /// Atomically set `flag` if it is currently false.
    ///
    /// Returns `true` only for the caller that flipped it.
    fn conditional_set_flag(&self, task_id: &str, flag: NotificationFlag) -> Result<bool>;
}

pub trait UserStore: Send + Sync {
    /// Whether the user wants email notifications. Unknown users default to `true`.
    fn get_notification_preference(&self, user_id: &str) -> Result<bool>;

    /// Contact details for a user, if the user exists.
    fn get_recipient(&self, user_id: &str) -> Result<Option<Recipient>>;
}
