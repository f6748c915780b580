//! SQLite-backed task and user store.
//!
//! Due dates are stored as epoch milliseconds so range scans compare
//! integers. Ledger flags are claimed with one conditional `UPDATE`.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use taskmaster_core::{
    NotificationFlag, NotificationFlags, Recipient, Result, Role, TaskSnapshot, TaskStatus,
    TaskStore, TaskmasterError, UserStore,
};

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

fn store_err(context: &str) -> impl Fn(rusqlite::Error) -> TaskmasterError + '_ {
    move |e| TaskmasterError::Store(format!("{context}: {e}"))
}

const TASK_COLUMNS: &str =
    "id, owner_id, title, status, due_at, deadline_reminder_sent, overdue_sent";

fn row_to_task(row: &rusqlite::Row<'_>) -> rusqlite::Result<TaskSnapshot> {
    let status: String = row.get(3)?;
    let status: TaskStatus = status.parse().map_err(|e: String| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, e.into())
    })?;
    let due_at: Option<i64> = row.get(4)?;
    Ok(TaskSnapshot {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        title: row.get(2)?,
        status,
        due_date: due_at.and_then(DateTime::from_timestamp_millis),
        notification_flags: NotificationFlags {
            deadline_reminder_sent: row.get::<_, i64>(5)? != 0,
            overdue_sent: row.get::<_, i64>(6)? != 0,
        },
    })
}

impl SqliteStore {
    /// Open or create the store database.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(store_err("DB open"))?;
        // WAL keeps scans from blocking request-side reads.
        conn.execute_batch("PRAGMA journal_mode=WAL;").ok();
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(store_err("DB open"))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| TaskmasterError::Store(format!("Lock: {e}")))
    }

    fn migrate(&self) -> Result<()> {
        self.lock()?
            .execute_batch(
                "
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                username TEXT NOT NULL,
                email TEXT NOT NULL,
                role TEXT NOT NULL DEFAULT 'user',
                email_notifications INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                title TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'todo',   -- todo, in-progress, completed
                due_at INTEGER,                        -- epoch millis
                deadline_reminder_sent INTEGER NOT NULL DEFAULT 0,
                overdue_sent INTEGER NOT NULL DEFAULT 0,
                deleted INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_tasks_owner ON tasks(owner_id, deleted);
            CREATE INDEX IF NOT EXISTS idx_tasks_due ON tasks(due_at);
         ",
            )
            .map_err(store_err("Migration"))
    }

    // ─── Users ──────────────────────────────────────────────

    pub fn insert_user(&self, recipient: &Recipient, role: Role, email_notifications: bool) -> Result<()> {
        self.lock()?
            .execute(
                "INSERT OR REPLACE INTO users (id, username, email, role, email_notifications, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    recipient.user_id,
                    recipient.username,
                    recipient.email,
                    role.as_str(),
                    email_notifications as i32,
                    Utc::now().to_rfc3339(),
                ],
            )
            .map_err(store_err("Insert user"))?;
        Ok(())
    }

    pub fn set_notification_preference(&self, user_id: &str, enabled: bool) -> Result<()> {
        let changed = self
            .lock()?
            .execute(
                "UPDATE users SET email_notifications = ?2 WHERE id = ?1",
                params![user_id, enabled as i32],
            )
            .map_err(store_err("Update user"))?;
        if changed == 0 {
            return Err(TaskmasterError::Store(format!("User not found: {user_id}")));
        }
        Ok(())
    }

    pub fn user_role(&self, user_id: &str) -> Result<Option<Role>> {
        let role: Option<String> = self
            .lock()?
            .query_row("SELECT role FROM users WHERE id = ?1", params![user_id], |row| row.get(0))
            .optional()
            .map_err(store_err("Load user"))?;
        role.map(|r| r.parse::<Role>().map_err(TaskmasterError::Store))
            .transpose()
    }

    // ─── Tasks ──────────────────────────────────────────────

    pub fn insert_task(
        &self,
        owner_id: &str,
        title: &str,
        status: TaskStatus,
        due_date: Option<DateTime<Utc>>,
    ) -> Result<String> {
        let id = format!("task-{}", uuid::Uuid::new_v4());
        self.lock()?
            .execute(
                "INSERT INTO tasks (id, owner_id, title, status, due_at, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    id,
                    owner_id,
                    title,
                    status.as_str(),
                    due_date.map(|d| d.timestamp_millis()),
                    Utc::now().to_rfc3339(),
                ],
            )
            .map_err(store_err("Insert task"))?;
        Ok(id)
    }

    pub fn set_status(&self, task_id: &str, status: TaskStatus) -> Result<()> {
        self.lock()?
            .execute(
                "UPDATE tasks SET status = ?2 WHERE id = ?1 AND deleted = 0",
                params![task_id, status.as_str()],
            )
            .map_err(store_err("Update task"))?;
        Ok(())
    }

    pub fn soft_delete(&self, task_id: &str) -> Result<()> {
        self.lock()?
            .execute("UPDATE tasks SET deleted = 1 WHERE id = ?1", params![task_id])
            .map_err(store_err("Delete task"))?;
        Ok(())
    }

    pub fn task(&self, task_id: &str) -> Result<Option<TaskSnapshot>> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1 AND deleted = 0");
        self.lock()?
            .query_row(&sql, params![task_id], row_to_task)
            .optional()
            .map_err(store_err("Load task"))
    }

    fn select_tasks(&self, sql: &str, params: &[&dyn rusqlite::ToSql]) -> Result<Vec<TaskSnapshot>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(sql).map_err(store_err("Prepare"))?;
        let rows = stmt
            .query_map(params, row_to_task)
            .map_err(store_err("Query tasks"))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(store_err("Read task row"))
    }
}

impl TaskStore for SqliteStore {
    fn count_active(&self, owner_id: &str) -> Result<u32> {
        self.lock()?
            .query_row(
                "SELECT COUNT(*) FROM tasks WHERE owner_id = ?1 AND deleted = 0",
                params![owner_id],
                |row| row.get(0),
            )
            .map_err(store_err("Count tasks"))
    }

    fn find_due_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        exclude_status: TaskStatus,
    ) -> Result<Vec<TaskSnapshot>> {
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM tasks
             WHERE deleted = 0 AND status != ?1 AND due_at >= ?2 AND due_at < ?3
             ORDER BY due_at, id"
        );
        self.select_tasks(
            &sql,
            params![exclude_status.as_str(), start.timestamp_millis(), end.timestamp_millis()],
        )
    }

    fn find_overdue_unflagged(
        &self,
        before: DateTime<Utc>,
        exclude_status: TaskStatus,
    ) -> Result<Vec<TaskSnapshot>> {
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM tasks
             WHERE deleted = 0 AND status != ?1 AND overdue_sent = 0 AND due_at < ?2
             ORDER BY due_at, id"
        );
        self.select_tasks(&sql, params![exclude_status.as_str(), before.timestamp_millis()])
    }

    fn conditional_set_flag(&self, task_id: &str, flag: NotificationFlag) -> Result<bool> {
        // Column names come from the closed NotificationFlag enum.
        let sql = format!("UPDATE tasks SET {flag} = 1 WHERE id = ?1 AND {flag} = 0 AND deleted = 0");
        let changed = self
            .lock()?
            .execute(&sql, params![task_id])
            .map_err(store_err("Set flag"))?;
        Ok(changed == 1)
    }
}

impl UserStore for SqliteStore {
    fn get_notification_preference(&self, user_id: &str) -> Result<bool> {
        let enabled: Option<i64> = self
            .lock()?
            .query_row(
                "SELECT email_notifications FROM users WHERE id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(store_err("Load preference"))?;
        Ok(enabled.is_none_or(|v| v != 0))
    }

    fn get_recipient(&self, user_id: &str) -> Result<Option<Recipient>> {
        self.lock()?
            .query_row(
                "SELECT id, username, email FROM users WHERE id = ?1",
                params![user_id],
                |row| {
                    Ok(Recipient {
                        user_id: row.get(0)?,
                        username: row.get(1)?,
                        email: row.get(2)?,
                    })
                },
            )
            .optional()
            .map_err(store_err("Load user"))
    }
}
