//! TaskMaster configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, TaskmasterError};
use crate::types::Role;

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskmasterConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub smtp: SmtpConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub quota: QuotaConfig,
}

impl TaskmasterConfig {
    /// Load config from the default path (~/.taskmaster/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            return Self::load_from(&path);
        }
        tracing::debug!("No config at {}, using defaults", path.display());
        let mut config = Self::default();
        config.smtp.apply_env_overrides();
        Ok(config)
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| TaskmasterError::Config(format!("Failed to read config: {e}")))?;
        let mut config: Self = toml::from_str(&content)
            .map_err(|e| TaskmasterError::Config(format!("Failed to parse config: {e}")))?;
        config.smtp.apply_env_overrides();
        tracing::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Save config to the default path.
    pub fn save(&self) -> Result<()> {
        let path = Self::default_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| TaskmasterError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the TaskMaster home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".taskmaster")
    }
}

/// Task/user store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

fn default_db_path() -> String { "~/.taskmaster/taskmaster.db".into() }

impl Default for StoreConfig {
    fn default() -> Self {
        Self { db_path: default_db_path() }
    }
}

/// Outbound SMTP configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    #[serde(default = "default_smtp_host")]
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_smtp_from")]
    pub from: String,
    #[serde(default = "bool_true")]
    pub starttls: bool,
}

fn bool_true() -> bool { true }
fn default_smtp_host() -> String { "smtp-relay.brevo.com".into() }
fn default_smtp_port() -> u16 { 587 }
fn default_smtp_from() -> String { "TaskMaster App <noreply@taskmaster.com>".into() }

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: default_smtp_host(),
            port: default_smtp_port(),
            username: String::new(),
            password: String::new(),
            from: default_smtp_from(),
            starttls: true,
        }
    }
}

impl SmtpConfig {
    /// `SMTP_*` environment variables take precedence over file values.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("SMTP_HOST") {
            self.host = host;
        }
        if let Some(port) = std::env::var("SMTP_PORT").ok().and_then(|p| p.parse().ok()) {
            self.port = port;
        }
        if let Ok(user) = std::env::var("SMTP_USER") {
            self.username = user;
        }
        if let Ok(password) = std::env::var("SMTP_PASSWORD") {
            self.password = password;
        }
        if let Ok(from) = std::env::var("SMTP_FROM") {
            self.from = format!("TaskMaster App <{from}>");
        }
    }
}

/// Deadline scanner cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_reminder_cron")]
    pub reminder_cron: String,
    #[serde(default = "default_overdue_cron")]
    pub overdue_cron: String,
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,
    /// How long shutdown waits for a scan that is still sending.
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
    /// Offset of "local time" from UTC, used for cron slots and day boundaries.
    #[serde(default)]
    pub utc_offset_minutes: i32,
}

fn default_reminder_cron() -> String { "0 9 * * *".into() }
fn default_overdue_cron() -> String { "0 10 * * *".into() }
fn default_check_interval() -> u64 { 30 }
fn default_shutdown_grace() -> u64 { 60 }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            reminder_cron: default_reminder_cron(),
            overdue_cron: default_overdue_cron(),
            check_interval_secs: default_check_interval(),
            shutdown_grace_secs: default_shutdown_grace(),
            utc_offset_minutes: 0,
        }
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default = "default_eviction_interval")]
    pub eviction_interval_secs: u64,
    #[serde(default = "default_tiers")]
    pub tiers: Vec<TierConfig>,
}

fn default_eviction_interval() -> u64 { 300 }

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            eviction_interval_secs: default_eviction_interval(),
            tiers: default_tiers(),
        }
    }
}

/// One named rate-limit tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierConfig {
    pub name: String,
    pub window_secs: u64,
    pub limit: u32,
    #[serde(default)]
    pub message: String,
    /// Roles that are never counted against this tier.
    #[serde(default)]
    pub bypass_roles: Vec<Role>,
    /// Whether callers may refund attempts that turned out successful.
    #[serde(default)]
    pub skip_successful: bool,
}

pub const TIER_GENERAL: &str = "general";
pub const TIER_AUTH: &str = "auth";
pub const TIER_TASK_CREATION: &str = "task-creation";
pub const TIER_EMAIL: &str = "email";
pub const TIER_ADMIN_OPS: &str = "admin-ops";

fn default_tiers() -> Vec<TierConfig> {
    vec![
        TierConfig {
            name: TIER_GENERAL.into(),
            window_secs: 15 * 60,
            limit: 100,
            message: "Too many requests from this IP. Please try again in 15 minutes.".into(),
            bypass_roles: Vec::new(),
            skip_successful: false,
        },
        TierConfig {
            name: TIER_AUTH.into(),
            window_secs: 60 * 60,
            limit: 5,
            message: "Too many login/registration attempts. Try again in an hour.".into(),
            bypass_roles: Vec::new(),
            skip_successful: true,
        },
        TierConfig {
            name: TIER_TASK_CREATION.into(),
            window_secs: 60 * 60,
            limit: 30,
            message: "Too many tasks created in the last hour. Try again later.".into(),
            bypass_roles: vec![Role::Admin, Role::Premium],
            skip_successful: false,
        },
        TierConfig {
            name: TIER_EMAIL.into(),
            window_secs: 60 * 60,
            limit: 10,
            message: "Email sending limit reached. Try again later.".into(),
            bypass_roles: Vec::new(),
            skip_successful: false,
        },
        TierConfig {
            name: TIER_ADMIN_OPS.into(),
            window_secs: 60 * 60,
            limit: 50,
            message: "Too many admin operations. Please wait.".into(),
            bypass_roles: Vec::new(),
            skip_successful: false,
        },
    ]
}

/// Task quota for the `user` role.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaConfig {
    #[serde(default = "default_user_task_limit")]
    pub user_task_limit: u32,
}

fn default_user_task_limit() -> u32 { 20 }

impl Default for QuotaConfig {
    fn default() -> Self {
        Self { user_task_limit: default_user_task_limit() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_tiers_match_table() {
        let config = RateLimitConfig::default();
        let summary: Vec<(&str, u64, u32)> = config
            .tiers
            .iter()
            .map(|t| (t.name.as_str(), t.window_secs, t.limit))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("general", 900, 100),
                ("auth", 3600, 5),
                ("task-creation", 3600, 30),
                ("email", 3600, 10),
                ("admin-ops", 3600, 50),
            ]
        );
        let creation = &config.tiers[2];
        assert_eq!(creation.bypass_roles, vec![Role::Admin, Role::Premium]);
        assert!(config.tiers[1].skip_successful);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: TaskmasterConfig = toml::from_str(
            r#"
            [scheduler]
            reminder_cron = "30 8 * * *"

            [quota]
            user_task_limit = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.scheduler.reminder_cron, "30 8 * * *");
        assert_eq!(config.scheduler.overdue_cron, "0 10 * * *");
        assert_eq!(config.scheduler.shutdown_grace_secs, 60);
        assert_eq!(config.quota.user_task_limit, 5);
        assert_eq!(config.rate_limit.tiers.len(), 5);
        assert_eq!(config.smtp.port, 587);
    }

    #[test]
    fn test_custom_tier_parses() {
        let config: TaskmasterConfig = toml::from_str(
            r#"
            [rate_limit]
            enabled = false

            [[rate_limit.tiers]]
            name = "uploads"
            window_secs = 60
            limit = 3
            bypass_roles = ["admin"]
            "#,
        )
        .unwrap();
        assert!(!config.rate_limit.enabled);
        assert_eq!(config.rate_limit.tiers.len(), 1);
        assert_eq!(config.rate_limit.tiers[0].bypass_roles, vec![Role::Admin]);
        assert!(!config.rate_limit.tiers[0].skip_successful);
    }

    #[test]
    fn test_load_from_missing_file_is_config_error() {
        let path = std::env::temp_dir().join("taskmaster-missing-config.toml");
        let err = TaskmasterConfig::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("Configuration error"));
    }
}
