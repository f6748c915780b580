//! Notification email rendering.

use chrono::{DateTime, Datelike, FixedOffset, Utc};

use taskmaster_core::{OutgoingEmail, Recipient, TaskSnapshot};

/// Which notification a scan produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationKind {
    DeadlineReminder,
    Overdue,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::DeadlineReminder => "reminders",
            NotificationKind::Overdue => "overdue",
        }
    }
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for NotificationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reminders" | "reminder" => Ok(NotificationKind::DeadlineReminder),
            "overdue" => Ok(NotificationKind::Overdue),
            other => Err(format!("unknown notification kind '{other}'")),
        }
    }
}

/// en-US short date, e.g. `3/5/2026`.
pub fn format_due_date(due: DateTime<Utc>, offset: FixedOffset) -> String {
    let local = due.with_timezone(&offset);
    format!("{}/{}/{}", local.month(), local.day(), local.year())
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

pub fn render(
    kind: NotificationKind,
    recipient: &Recipient,
    task: &TaskSnapshot,
    offset: FixedOffset,
) -> OutgoingEmail {
    let due = task
        .due_date
        .map(|d| format_due_date(d, offset))
        .unwrap_or_default();
    match kind {
        NotificationKind::DeadlineReminder => reminder_email(recipient, &task.title, &due),
        NotificationKind::Overdue => overdue_email(recipient, &task.title, &due),
    }
}

pub fn reminder_email(recipient: &Recipient, title: &str, due: &str) -> OutgoingEmail {
    let (name, html_title) = (escape_html(&recipient.username), escape_html(title));
    OutgoingEmail {
        to: recipient.email.clone(),
        subject: format!("⏰ Reminder: task \"{title}\" deadline approaching!"),
        html_body: format!(
            r#"<div style="font-family: Arial, sans-serif; max-width: 600px; margin: 0 auto;">
  <h1 style="color: #DC2626;">Deadline Reminder</h1>
  <p>Hello, {name}!</p>
  <p>The deadline for this task is approaching:</p>
  <div style="background-color: #FEF2F2; padding: 20px; border-left: 4px solid #DC2626; margin: 20px 0;">
    <h2 style="color: #1F2937; margin-top: 0;">{html_title}</h2>
    <p style="color: #991B1B; font-weight: bold;">Due: {due}</p>
  </div>
  <p>Don't forget to complete the task on time!</p>
  <p style="color: #6B7280; font-size: 12px;">You can change notification settings in your profile.</p>
</div>"#
        ),
        text_body: format!(
            "Deadline Reminder\n\nHello, {}!\n\nTask deadline approaching: {title}\nDue: {due}\n\nDon't forget to complete it on time!\n",
            recipient.username
        ),
    }
}

pub fn overdue_email(recipient: &Recipient, title: &str, due: &str) -> OutgoingEmail {
    let (name, html_title) = (escape_html(&recipient.username), escape_html(title));
    OutgoingEmail {
        to: recipient.email.clone(),
        subject: format!("🚨 Overdue task: {title}"),
        html_body: format!(
            r#"<div style="font-family: Arial, sans-serif; max-width: 600px; margin: 0 auto;">
  <h1 style="color: #991B1B;">Task Overdue!</h1>
  <p>Hello, {name}!</p>
  <p>You have an overdue task:</p>
  <div style="background-color: #FEE2E2; padding: 20px; border-left: 4px solid #991B1B; margin: 20px 0;">
    <h2 style="color: #1F2937; margin-top: 0;">{html_title}</h2>
    <p style="color: #7F1D1D; font-weight: bold;">Deadline was: {due}</p>
  </div>
  <p>We recommend completing the task as soon as possible or extending the deadline.</p>
</div>"#
        ),
        text_body: format!(
            "Task Overdue!\n\nHello, {}!\nTask \"{title}\" is overdue (deadline was {due})\n",
            recipient.username
        ),
    }
}
