//! # TaskMaster Security
//!
//! Request-side policies: flat RBAC, the `user` task quota, multi-tier
//! fixed-window rate limiting, and the [`RequestGate`] that runs them in
//! order.

pub mod access;
pub mod gate;
pub mod quota;
pub mod rate_limit;

pub use access::{AccessDecision, AccessDenial, authorize};
pub use gate::{DenialBody, GateDecision, GateDenial, GatePass, GateRequest, RequestGate, RouteSpec};
pub use quota::{QuotaDecision, QuotaPolicy};
pub use rate_limit::{RateLimitDecision, RateLimitDenial, RateLimitKey, RateLimiter, Tier};
