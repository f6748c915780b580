//! Request gate: rate limit → role check → task quota.
//!
//! Every mutating request passes through [`RequestGate::check`]. The first
//! stage that denies short-circuits the rest; the denial is returned as a
//! value with a status code and a JSON body for the host framework.

use serde::Serialize;
use std::sync::Arc;

use taskmaster_core::{Principal, Result, Role, TaskStore};

use crate::access::{AccessDecision, AccessDenial, authorize};
use crate::quota::{QuotaDecision, QuotaPolicy};
use crate::rate_limit::{RateLimitDecision, RateLimitDenial, RateLimitKey, RateLimiter};

/// Declared protection of one route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteSpec {
    pub tier: String,
    /// Empty means the route needs no role check.
    pub required_roles: Vec<Role>,
    pub creates_task: bool,
}

impl RouteSpec {
    pub fn new(tier: impl Into<String>) -> Self {
        Self {
            tier: tier.into(),
            required_roles: Vec::new(),
            creates_task: false,
        }
    }

    pub fn require(mut self, roles: &[Role]) -> Self {
        self.required_roles = roles.to_vec();
        self
    }

    pub fn creating_task(mut self) -> Self {
        self.creates_task = true;
        self
    }
}

/// One inbound request as seen by the gate.
#[derive(Debug, Clone, Copy)]
pub struct GateRequest<'a> {
    /// Network address or principal id used for rate limiting.
    pub client: &'a str,
    pub principal: Option<&'a Principal>,
    pub route: &'a RouteSpec,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Allow(GatePass),
    Deny(GateDenial),
}

impl GateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, GateDecision::Allow(_))
    }
}

/// Metadata gathered by the stages a request passed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatePass {
    pub rate_limit: RateLimitDecision,
    /// Live active-task count, when the quota stage had to read it.
    pub task_count: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDenial {
    RateLimited(RateLimitDenial),
    Unauthenticated,
    Forbidden(AccessDenial),
    QuotaExceeded { current_count: u32, limit: u32, message: String },
}

/// JSON body of a denial response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DenialBody {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required_roles: Option<Vec<Role>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

impl DenialBody {
    fn plain(message: String) -> Self {
        Self {
            success: false,
            message,
            retry_after: None,
            retry_after_secs: None,
            required_roles: None,
            current_count: None,
            limit: None,
        }
    }
}

impl GateDenial {
    /// HTTP-equivalent status code.
    pub fn status_code(&self) -> u16 {
        match self {
            GateDenial::RateLimited(_) => 429,
            GateDenial::Unauthenticated => 401,
            GateDenial::Forbidden(_) | GateDenial::QuotaExceeded { .. } => 403,
        }
    }

    pub fn body(&self) -> DenialBody {
        match self {
            GateDenial::RateLimited(denial) => DenialBody {
                retry_after: Some(denial.retry_after_text()),
                retry_after_secs: Some(denial.retry_after_secs()),
                ..DenialBody::plain(denial.message.clone())
            },
            GateDenial::Unauthenticated => DenialBody::plain("Authentication required".into()),
            GateDenial::Forbidden(denial) => DenialBody {
                required_roles: Some(denial.required_roles.clone()),
                ..DenialBody::plain(denial.message())
            },
            GateDenial::QuotaExceeded {
                current_count,
                limit,
                message,
            } => DenialBody {
                current_count: Some(*current_count),
                limit: Some(*limit),
                ..DenialBody::plain(message.clone())
            },
        }
    }
}

/// Ordered composition of the three policies.
pub struct RequestGate {
    limiter: Arc<RateLimiter>,
    quota: QuotaPolicy,
    tasks: Arc<dyn TaskStore>,
}

impl RequestGate {
    pub fn new(limiter: Arc<RateLimiter>, quota: QuotaPolicy, tasks: Arc<dyn TaskStore>) -> Self {
        Self {
            limiter,
            quota,
            tasks,
        }
    }

    /// Run the gate. `Err` only for store or configuration failures.
    pub fn check(&self, request: &GateRequest<'_>) -> Result<GateDecision> {
        let route = request.route;

        // 1. Rate limit.
        let key = RateLimitKey::new(request.client, route.tier.as_str());
        let rate_limit = match self.limiter.allow(&key, request.principal)? {
            RateLimitDecision::Deny(denial) => {
                return Ok(GateDecision::Deny(GateDenial::RateLimited(denial)));
            }
            decision => decision,
        };

        // 2. Role check.
        let needs_principal = !route.required_roles.is_empty() || route.creates_task;
        let principal = match request.principal {
            Some(principal) => principal,
            None if needs_principal => {
                tracing::debug!(client = request.client, "Rejected unauthenticated request");
                return Ok(GateDecision::Deny(GateDenial::Unauthenticated));
            }
            None => {
                return Ok(GateDecision::Allow(GatePass {
                    rate_limit,
                    task_count: None,
                }));
            }
        };
        if !route.required_roles.is_empty()
            && let AccessDecision::Deny(denial) = authorize(principal, &route.required_roles)
        {
            tracing::debug!(principal = %principal.id, role = %principal.role, "Access denied");
            return Ok(GateDecision::Deny(GateDenial::Forbidden(denial)));
        }

        // 3. Task quota, task-creating routes only.
        let mut task_count = None;
        if route.creates_task && !self.quota.is_unlimited(principal.role) {
            let count = self.tasks.count_active(&principal.id)?;
            task_count = Some(count);
            if let QuotaDecision::Deny {
                current_count,
                limit,
            } = self.quota.can_create_task(principal, count)
            {
                tracing::debug!(principal = %principal.id, current_count, limit, "Task quota reached");
                return Ok(GateDecision::Deny(GateDenial::QuotaExceeded {
                    current_count,
                    limit,
                    message: self.quota.denial_message(),
                }));
            }
        }

        Ok(GateDecision::Allow(GatePass {
            rate_limit,
            task_count,
        }))
    }

    /// Report that a gated request succeeded, so tiers that skip successful
    /// requests stop counting it.
    pub fn report_success(&self, client: &str, route: &RouteSpec) -> bool {
        self.limiter.refund(&RateLimitKey::new(client, route.tier.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::{ADMIN_ONLY, ANY_ROLE};
    use chrono::{DateTime, TimeZone, Utc};
    use std::sync::Barrier;
    use taskmaster_core::config::{RateLimitConfig, TIER_ADMIN_OPS, TIER_AUTH, TIER_GENERAL, TIER_TASK_CREATION};
    use taskmaster_core::{ManualClock, MemoryStore, TaskStatus};

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
    }

    fn gate_with(store: Arc<MemoryStore>) -> RequestGate {
        let clock = Arc::new(ManualClock::new(start()));
        let limiter = RateLimiter::from_config(&RateLimitConfig::default(), clock).unwrap();
        RequestGate::new(Arc::new(limiter), QuotaPolicy::default(), store)
    }

    fn fill(store: &MemoryStore, owner: &str, n: usize) {
        for i in 0..n {
            store
                .insert_task(owner, &format!("task {i}"), TaskStatus::Todo, None)
                .unwrap();
        }
    }

    fn create_route() -> RouteSpec {
        RouteSpec::new(TIER_TASK_CREATION).require(ANY_ROLE).creating_task()
    }

    #[test]
    fn test_user_at_quota_denied_then_allowed_after_promotion() {
        let store = Arc::new(MemoryStore::new());
        fill(&store, "u1", 20);
        let gate = gate_with(store);
        let route = create_route();

        let user = Principal::new("u1", Role::User);
        let decision = gate
            .check(&GateRequest {
                client: "u1",
                principal: Some(&user),
                route: &route,
            })
            .unwrap();
        let GateDecision::Deny(denial) = decision else {
            panic!("user at 20 tasks must be denied");
        };
        assert_eq!(denial.status_code(), 403);
        let body = denial.body();
        assert!(!body.success);
        assert_eq!(body.current_count, Some(20));
        assert_eq!(body.limit, Some(20));

        let promoted = Principal::new("u1", Role::Premium);
        let decision = gate
            .check(&GateRequest {
                client: "u1",
                principal: Some(&promoted),
                route: &route,
            })
            .unwrap();
        assert_eq!(
            decision,
            GateDecision::Allow(GatePass {
                rate_limit: RateLimitDecision::Exempt,
                task_count: None,
            })
        );
    }

    #[test]
    fn test_rate_limit_runs_before_role_check() {
        let store = Arc::new(MemoryStore::new());
        let gate = gate_with(store);
        let route = RouteSpec::new(TIER_ADMIN_OPS).require(ADMIN_ONLY);
        let user = Principal::new("u1", Role::User);
        let request = GateRequest {
            client: "10.0.0.1",
            principal: Some(&user),
            route: &route,
        };

        for _ in 0..50 {
            let GateDecision::Deny(denial) = gate.check(&request).unwrap() else {
                panic!("user must not pass an admin route");
            };
            assert_eq!(denial.status_code(), 403);
        }
        let GateDecision::Deny(denial) = gate.check(&request).unwrap() else {
            panic!("51st request must be denied");
        };
        assert_eq!(denial.status_code(), 429);
        let body = denial.body();
        assert_eq!(body.message, "Too many admin operations. Please wait.");
        assert_eq!(body.retry_after.as_deref(), Some("1 hour"));
        assert_eq!(body.retry_after_secs, Some(3600));
    }

    #[test]
    fn test_forbidden_body_names_roles() {
        let gate = gate_with(Arc::new(MemoryStore::new()));
        let route = RouteSpec::new(TIER_ADMIN_OPS).require(ADMIN_ONLY);
        let premium = Principal::new("p1", Role::Premium);
        let GateDecision::Deny(denial) = gate
            .check(&GateRequest {
                client: "p1",
                principal: Some(&premium),
                route: &route,
            })
            .unwrap()
        else {
            panic!("premium is not admin");
        };
        let json = serde_json::to_value(denial.body()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "success": false,
                "message": "Access denied. Required role: admin",
                "requiredRoles": ["admin"],
            })
        );
    }

    #[test]
    fn test_missing_principal() {
        let gate = gate_with(Arc::new(MemoryStore::new()));
        let protected = RouteSpec::new(TIER_GENERAL).require(ANY_ROLE);
        let GateDecision::Deny(denial) = gate
            .check(&GateRequest {
                client: "1.1.1.1",
                principal: None,
                route: &protected,
            })
            .unwrap()
        else {
            panic!("protected route needs a principal");
        };
        assert_eq!(denial, GateDenial::Unauthenticated);
        assert_eq!(denial.status_code(), 401);

        let public = RouteSpec::new(TIER_AUTH);
        assert!(gate
            .check(&GateRequest {
                client: "1.1.1.1",
                principal: None,
                route: &public,
            })
            .unwrap()
            .is_allowed());
    }

    #[test]
    fn test_quota_reads_live_count() {
        let store = Arc::new(MemoryStore::new());
        fill(&store, "u1", 19);
        let gate = gate_with(store.clone());
        let route = create_route();
        let user = Principal::new("u1", Role::User);
        let request = GateRequest {
            client: "u1",
            principal: Some(&user),
            route: &route,
        };

        let GateDecision::Allow(pass) = gate.check(&request).unwrap() else {
            panic!("19 tasks is under quota");
        };
        assert_eq!(pass.task_count, Some(19));

        store.insert_task("u1", "20th", TaskStatus::Todo, None).unwrap();
        assert!(!gate.check(&request).unwrap().is_allowed());
    }

    #[test]
    fn test_auth_success_refund() {
        let gate = gate_with(Arc::new(MemoryStore::new()));
        let route = RouteSpec::new(TIER_AUTH);
        let request = GateRequest {
            client: "9.9.9.9",
            principal: None,
            route: &route,
        };
        for _ in 0..10 {
            assert!(gate.check(&request).unwrap().is_allowed());
            assert!(gate.report_success("9.9.9.9", &route));
        }
        for _ in 0..5 {
            assert!(gate.check(&request).unwrap().is_allowed());
        }
        assert!(!gate.check(&request).unwrap().is_allowed());
    }

    /// The count read is not locked across the create. Concurrent creations
    /// at 19 tasks can all pass; the overshoot is bounded by the number of
    /// concurrent requests minus one.
    #[test]
    fn test_concurrent_creations_may_overshoot_quota() {
        const CONCURRENT: usize = 3;
        let store = Arc::new(MemoryStore::new());
        fill(&store, "u1", 19);
        let gate = gate_with(store.clone());
        let route = create_route();
        let user = Principal::new("u1", Role::User);
        let checked = Barrier::new(CONCURRENT);

        std::thread::scope(|s| {
            for _ in 0..CONCURRENT {
                s.spawn(|| {
                    let decision = gate
                        .check(&GateRequest {
                            client: "u1",
                            principal: Some(&user),
                            route: &route,
                        })
                        .unwrap();
                    checked.wait();
                    if decision.is_allowed() {
                        store.insert_task("u1", "racy", TaskStatus::Todo, None).unwrap();
                    }
                });
            }
        });

        let final_count = store.count_active("u1").unwrap();
        assert_eq!(final_count, 19 + CONCURRENT as u32);
        assert!(final_count <= 20 + (CONCURRENT as u32 - 1));
    }
}
