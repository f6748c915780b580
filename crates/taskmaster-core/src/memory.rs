//! In-memory task and user store.
//! Lightweight: one mutex, no persistence. Used for tests and local runs.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::error::{Result, TaskmasterError};
use crate::traits::{TaskStore, UserStore};
use crate::types::{NotificationFlag, NotificationFlags, Recipient, TaskSnapshot, TaskStatus};

struct StoredTask {
    snapshot: TaskSnapshot,
    deleted: bool,
}

struct StoredUser {
    recipient: Recipient,
    email_notifications: bool,
}

#[derive(Default)]
struct Inner {
    tasks: HashMap<String, StoredTask>,
    users: HashMap<String, StoredUser>,
}

/// Mutex-guarded store implementing both collaborator interfaces.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|e| TaskmasterError::Store(format!("Lock: {e}")))
    }

    /// Register a user with their notification preference.
    pub fn insert_user(&self, recipient: Recipient, email_notifications: bool) -> Result<()> {
        let mut inner = self.lock()?;
        inner.users.insert(
            recipient.user_id.clone(),
            StoredUser {
                recipient,
                email_notifications,
            },
        );
        Ok(())
    }

    pub fn set_notification_preference(&self, user_id: &str, enabled: bool) -> Result<()> {
        let mut inner = self.lock()?;
        match inner.users.get_mut(user_id) {
            Some(user) => {
                user.email_notifications = enabled;
                Ok(())
            }
            None => Err(TaskmasterError::Store(format!("User not found: {user_id}"))),
        }
    }

    /// Create a task and return its id. Flags start cleared.
    pub fn insert_task(
        &self,
        owner_id: &str,
        title: &str,
        status: TaskStatus,
        due_date: Option<DateTime<Utc>>,
    ) -> Result<String> {
        let id = format!("task-{}", uuid::Uuid::new_v4());
        let snapshot = TaskSnapshot {
            id: id.clone(),
            owner_id: owner_id.to_string(),
            title: title.to_string(),
            status,
            due_date,
            notification_flags: NotificationFlags::default(),
        };
        self.lock()?.tasks.insert(
            id.clone(),
            StoredTask {
                snapshot,
                deleted: false,
            },
        );
        Ok(id)
    }

    pub fn set_status(&self, task_id: &str, status: TaskStatus) -> Result<()> {
        let mut inner = self.lock()?;
        let task = inner
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| TaskmasterError::Store(format!("Task not found: {task_id}")))?;
        task.snapshot.status = status;
        Ok(())
    }

    /// Soft delete: the task stays stored but disappears from every query.
    pub fn soft_delete(&self, task_id: &str) -> Result<()> {
        let mut inner = self.lock()?;
        let task = inner
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| TaskmasterError::Store(format!("Task not found: {task_id}")))?;
        task.deleted = true;
        Ok(())
    }

    pub fn task(&self, task_id: &str) -> Result<Option<TaskSnapshot>> {
        Ok(self
            .lock()?
            .tasks
            .get(task_id)
            .filter(|t| !t.deleted)
            .map(|t| t.snapshot.clone()))
    }

    fn select<F>(&self, pred: F) -> Result<Vec<TaskSnapshot>>
    where
        F: Fn(&TaskSnapshot) -> bool,
    {
        let inner = self.lock()?;
        let mut found: Vec<TaskSnapshot> = inner
            .tasks
            .values()
            .filter(|t| !t.deleted && pred(&t.snapshot))
            .map(|t| t.snapshot.clone())
            .collect();
        found.sort_by(|a, b| a.due_date.cmp(&b.due_date).then_with(|| a.id.cmp(&b.id)));
        Ok(found)
    }
}

impl TaskStore for MemoryStore {
    fn count_active(&self, owner_id: &str) -> Result<u32> {
        let inner = self.lock()?;
        let count = inner
            .tasks
            .values()
            .filter(|t| !t.deleted && t.snapshot.owner_id == owner_id)
            .count();
        Ok(count as u32)
    }

    fn find_due_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        exclude_status: TaskStatus,
    ) -> Result<Vec<TaskSnapshot>> {
        self.select(|t| {
            t.status != exclude_status && t.due_date.is_some_and(|due| due >= start && due < end)
        })
    }

    fn find_overdue_unflagged(
        &self,
        before: DateTime<Utc>,
        exclude_status: TaskStatus,
    ) -> Result<Vec<TaskSnapshot>> {
        self.select(|t| {
            t.status != exclude_status
                && !t.notification_flags.overdue_sent
                && t.due_date.is_some_and(|due| due < before)
        })
    }

    fn conditional_set_flag(&self, task_id: &str, flag: NotificationFlag) -> Result<bool> {
        let mut inner = self.lock()?;
        let Some(task) = inner.tasks.get_mut(task_id).filter(|t| !t.deleted) else {
            return Ok(false);
        };
        let flags = &mut task.snapshot.notification_flags;
        let slot = match flag {
            NotificationFlag::DeadlineReminder => &mut flags.deadline_reminder_sent,
            NotificationFlag::Overdue => &mut flags.overdue_sent,
        };
        if *slot {
            return Ok(false);
        }
        *slot = true;
        Ok(true)
    }
}

impl UserStore for MemoryStore {
    fn get_notification_preference(&self, user_id: &str) -> Result<bool> {
        Ok(self
            .lock()?
            .users
            .get(user_id)
            .is_none_or(|u| u.email_notifications))
    }

    fn get_recipient(&self, user_id: &str) -> Result<Option<Recipient>> {
        Ok(self.lock()?.users.get(user_id).map(|u| u.recipient.clone()))
    }
}
