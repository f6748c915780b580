//! Tiered task quota.
//!
//! `admin` and `premium` are unlimited; `user` may hold at most
//! `user_task_limit` active tasks. The count is read live on every check and
//! is not locked across the subsequent create, so concurrent creations by the
//! same user can overshoot by up to `concurrent requests - 1`.

use taskmaster_core::config::QuotaConfig;
use taskmaster_core::{Principal, Role};

pub const DEFAULT_USER_TASK_LIMIT: u32 = 20;

/// Outcome of a quota check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaDecision {
    Allow,
    Deny { current_count: u32, limit: u32 },
}

impl QuotaDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, QuotaDecision::Allow)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaPolicy {
    user_task_limit: u32,
}

impl Default for QuotaPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_USER_TASK_LIMIT)
    }
}

impl QuotaPolicy {
    pub fn new(user_task_limit: u32) -> Self {
        Self { user_task_limit }
    }

    pub fn from_config(config: &QuotaConfig) -> Self {
        Self::new(config.user_task_limit)
    }

    pub fn user_task_limit(&self) -> u32 {
        self.user_task_limit
    }

    /// Roles that never need a task count.
    pub fn is_unlimited(&self, role: Role) -> bool {
        matches!(role, Role::Admin | Role::Premium)
    }

    pub fn can_create_task(&self, principal: &Principal, current_active_task_count: u32) -> QuotaDecision {
        if self.is_unlimited(principal.role) || current_active_task_count < self.user_task_limit {
            QuotaDecision::Allow
        } else {
            QuotaDecision::Deny {
                current_count: current_active_task_count,
                limit: self.user_task_limit,
            }
        }
    }

    pub fn denial_message(&self) -> String {
        format!(
            "Task limit reached for regular user ({}). Upgrade to Premium for unlimited tasks.",
            self.user_task_limit
        )
    }
}

/// Quota check with the default limit of 20.
pub fn can_create_task(principal: &Principal, current_active_task_count: u32) -> QuotaDecision {
    QuotaPolicy::default().can_create_task(principal, current_active_task_count)
}
