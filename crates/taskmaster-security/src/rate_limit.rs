//! Fixed-window rate limiting keyed by (client identity, tier).
//!
//! Windows are aligned to multiples of the tier's duration since the Unix
//! epoch. A request landing exactly on a boundary belongs to the new window.
//! Counters are created on first use, reset lazily on the next access after
//! their window closes, and dropped only by [`RateLimiter::evict_stale`].
//!
//! ## Response metadata
//!
//! Allowed requests expose `RateLimit-Limit`, `RateLimit-Remaining` and
//! `RateLimit-Reset` header pairs. Denied requests carry the exact time until
//! the window closes.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use taskmaster_core::config::{RateLimitConfig, TierConfig};
use taskmaster_core::{Clock, Principal, Result, TaskmasterError};

/// Decides whether a principal is exempt from a tier. Evaluated before the
/// counter is touched.
pub type BypassPredicate = Arc<dyn Fn(&Principal) -> bool + Send + Sync>;

// ============================================================================
// Tiers
// ============================================================================

/// A named rate-limit policy: window, limit and optional bypass rule.
#[derive(Clone)]
pub struct Tier {
    pub name: String,
    pub window: Duration,
    pub limit: u32,
    pub message: String,
    /// Successful outcomes may be refunded via [`RateLimiter::refund`].
    pub skip_successful: bool,
    bypass: Option<BypassPredicate>,
}

impl fmt::Debug for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tier")
            .field("name", &self.name)
            .field("window", &self.window)
            .field("limit", &self.limit)
            .field("skip_successful", &self.skip_successful)
            .field("bypass", &self.bypass.as_ref().map(|_| "<predicate>"))
            .finish()
    }
}

impl Tier {
    pub fn new(name: impl Into<String>, window: Duration, limit: u32) -> Self {
        Self {
            name: name.into(),
            window,
            limit,
            message: "Too many requests. Please try again later.".into(),
            skip_successful: false,
            bypass: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn with_bypass<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Principal) -> bool + Send + Sync + 'static,
    {
        self.bypass = Some(Arc::new(predicate));
        self
    }

    pub fn skipping_successful(mut self) -> Self {
        self.skip_successful = true;
        self
    }

    pub fn from_config(config: &TierConfig) -> Result<Self> {
        if config.window_secs == 0 {
            return Err(TaskmasterError::Config(format!(
                "Rate-limit tier '{}' has a zero-length window",
                config.name
            )));
        }
        let window = i64::try_from(config.window_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .ok_or_else(|| {
                TaskmasterError::Config(format!("Rate-limit tier '{}' window is too large", config.name))
            })?;

        let mut tier = Tier::new(config.name.clone(), window, config.limit);
        if !config.message.is_empty() {
            tier = tier.with_message(config.message.clone());
        }
        if !config.bypass_roles.is_empty() {
            let roles = config.bypass_roles.clone();
            tier = tier.with_bypass(move |p| roles.contains(&p.role));
        }
        tier.skip_successful = config.skip_successful;
        Ok(tier)
    }

    pub fn bypasses(&self, principal: Option<&Principal>) -> bool {
        match (&self.bypass, principal) {
            (Some(predicate), Some(principal)) => predicate(principal),
            _ => false,
        }
    }
}

/// Start of the aligned window containing `now` (inclusive-left).
pub fn window_boundary(now: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    let window_ms = window.num_milliseconds().max(1);
    let now_ms = now.timestamp_millis();
    let start_ms = now_ms - now_ms.rem_euclid(window_ms);
    DateTime::from_timestamp_millis(start_ms).unwrap_or(now)
}

// ============================================================================
// Keys, counters, decisions
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey {
    /// Network address or principal id.
    pub client: String,
    pub tier: String,
}

impl RateLimitKey {
    pub fn new(client: impl Into<String>, tier: impl Into<String>) -> Self {
        Self {
            client: client.into(),
            tier: tier.into(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Counter {
    window_start: DateTime<Utc>,
    count: u32,
    limit: u32,
    window: Duration,
}

impl Counter {
    fn new(tier: &Tier, now: DateTime<Utc>) -> Self {
        Self {
            window_start: window_boundary(now, tier.window),
            count: 0,
            limit: tier.limit,
            window: tier.window,
        }
    }

    fn window_end(&self) -> DateTime<Utc> {
        self.window_start + self.window
    }

    fn roll(&mut self, now: DateTime<Utc>) {
        let boundary = window_boundary(now, self.window);
        if boundary != self.window_start {
            self.count = 0;
            self.window_start = boundary;
        }
    }
}

/// Point-in-time view of one counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterUsage {
    pub count: u32,
    pub limit: u32,
    pub window_start: DateTime<Utc>,
}

/// Outcome of a rate-limit check. `Deny` is a normal result, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allow(RateLimitAllowance),
    /// Not counted: the tier bypasses this principal, or limiting is disabled.
    Exempt,
    Deny(RateLimitDenial),
}

impl RateLimitDecision {
    pub fn is_allowed(&self) -> bool {
        !matches!(self, RateLimitDecision::Deny(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitAllowance {
    pub tier: String,
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
    pub reset_in: Duration,
}

impl RateLimitAllowance {
    /// Header pairs for client back-off.
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        vec![
            ("RateLimit-Limit", self.limit.to_string()),
            ("RateLimit-Remaining", self.remaining.to_string()),
            ("RateLimit-Reset", ceil_secs(self.reset_in).to_string()),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitDenial {
    pub tier: String,
    pub limit: u32,
    pub message: String,
    /// Time until the current window closes.
    pub retry_after: Duration,
    pub reset_at: DateTime<Utc>,
}

impl RateLimitDenial {
    pub fn retry_after_secs(&self) -> u64 {
        ceil_secs(self.retry_after)
    }

    /// Duration string such as "12 minutes 5 seconds".
    pub fn retry_after_text(&self) -> String {
        format_duration_secs(self.retry_after_secs())
    }
}

fn ceil_secs(d: Duration) -> u64 {
    let ms = d.num_milliseconds().max(0) as u64;
    ms.div_ceil(1000)
}

fn plural(n: u64, unit: &str) -> String {
    if n == 1 {
        format!("{n} {unit}")
    } else {
        format!("{n} {unit}s")
    }
}

pub fn format_duration_secs(total: u64) -> String {
    let (hours, minutes, seconds) = (total / 3600, (total % 3600) / 60, total % 60);
    let mut parts = Vec::new();
    if hours > 0 {
        parts.push(plural(hours, "hour"));
    }
    if minutes > 0 {
        parts.push(plural(minutes, "minute"));
    }
    if seconds > 0 || parts.is_empty() {
        parts.push(plural(seconds, "second"));
    }
    parts.join(" ")
}

// ============================================================================
// Limiter
// ============================================================================

/// Shared limiter state. One map from key to counter; each counter has its
/// own lock so contention stays per key.
pub struct RateLimiter {
    enabled: bool,
    tiers: HashMap<String, Tier>,
    counters: RwLock<HashMap<RateLimitKey, Mutex<Counter>>>,
    clock: Arc<dyn Clock>,
    eviction_interval: std::time::Duration,
}

impl fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter")
            .field("enabled", &self.enabled)
            .field("tiers", &self.tiers)
            .field("eviction_interval", &self.eviction_interval)
            .field("counters", &"<HashMap>")
            .finish()
    }
}

impl RateLimiter {
    pub fn new(tiers: Vec<Tier>, clock: Arc<dyn Clock>) -> Self {
        Self {
            enabled: true,
            tiers: tiers.into_iter().map(|t| (t.name.clone(), t)).collect(),
            counters: RwLock::new(HashMap::new()),
            clock,
            eviction_interval: std::time::Duration::from_secs(300),
        }
    }

    pub fn with_eviction_interval(mut self, every: std::time::Duration) -> Self {
        self.eviction_interval = every;
        self
    }

    pub fn from_config(config: &RateLimitConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let mut tiers = Vec::with_capacity(config.tiers.len());
        for tier_config in &config.tiers {
            if tiers.iter().any(|t: &Tier| t.name == tier_config.name) {
                return Err(TaskmasterError::Config(format!(
                    "Duplicate rate-limit tier '{}'",
                    tier_config.name
                )));
            }
            tiers.push(Tier::from_config(tier_config)?);
        }
        let mut limiter = Self::new(tiers, clock)
            .with_eviction_interval(std::time::Duration::from_secs(config.eviction_interval_secs.max(1)));
        limiter.enabled = config.enabled;
        Ok(limiter)
    }

    /// Period of the [`spawn_eviction`] sweep.
    pub fn eviction_interval(&self) -> std::time::Duration {
        self.eviction_interval
    }

    pub fn tier(&self, name: &str) -> Option<&Tier> {
        self.tiers.get(name)
    }

    /// Count one request against `key` and decide.
    pub fn allow(&self, key: &RateLimitKey, principal: Option<&Principal>) -> Result<RateLimitDecision> {
        let tier = self.tiers.get(&key.tier).ok_or_else(|| {
            TaskmasterError::Config(format!("Unknown rate-limit tier '{}'", key.tier))
        })?;
        if !self.enabled || tier.bypasses(principal) {
            return Ok(RateLimitDecision::Exempt);
        }

        let now = self.clock.now();

        // Fast path: existing counter under the shared lock.
        {
            let counters = self.counters.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(counter) = counters.get(key) {
                return Ok(Self::take(counter, key, tier, now));
            }
        }

        // Slow path: insert, re-checking under the exclusive lock.
        let mut counters = self.counters.write().unwrap_or_else(PoisonError::into_inner);
        let counter = counters
            .entry(key.clone())
            .or_insert_with(|| Mutex::new(Counter::new(tier, now)));
        Ok(Self::take(counter, key, tier, now))
    }

    /// Convenience wrapper around [`RateLimiter::allow`].
    pub fn check(&self, client: &str, tier: &str, principal: Option<&Principal>) -> Result<RateLimitDecision> {
        self.allow(&RateLimitKey::new(client, tier), principal)
    }

    fn take(counter: &Mutex<Counter>, key: &RateLimitKey, tier: &Tier, now: DateTime<Utc>) -> RateLimitDecision {
        let mut counter = counter.lock().unwrap_or_else(PoisonError::into_inner);
        counter.roll(now);

        if counter.count < counter.limit {
            counter.count += 1;
            return RateLimitDecision::Allow(RateLimitAllowance {
                tier: key.tier.clone(),
                limit: counter.limit,
                remaining: counter.limit - counter.count,
                reset_at: counter.window_end(),
                reset_in: counter.window_end() - now,
            });
        }

        let denial = RateLimitDenial {
            tier: key.tier.clone(),
            limit: counter.limit,
            message: tier.message.clone(),
            retry_after: counter.window_end() - now,
            reset_at: counter.window_end(),
        };
        tracing::warn!(
            client = %key.client,
            tier = %key.tier,
            limit = counter.limit,
            retry_after_secs = denial.retry_after_secs(),
            "Rate limit exceeded"
        );
        RateLimitDecision::Deny(denial)
    }

    /// Give back one unit for a request that turned out successful, if the
    /// tier skips successful requests and the window has not rolled over.
    pub fn refund(&self, key: &RateLimitKey) -> bool {
        let Some(tier) = self.tiers.get(&key.tier) else {
            return false;
        };
        if !self.enabled || !tier.skip_successful {
            return false;
        }
        let now = self.clock.now();
        let counters = self.counters.read().unwrap_or_else(PoisonError::into_inner);
        let Some(counter) = counters.get(key) else {
            return false;
        };
        let mut counter = counter.lock().unwrap_or_else(PoisonError::into_inner);
        if counter.window_start == window_boundary(now, counter.window) && counter.count > 0 {
            counter.count -= 1;
            true
        } else {
            false
        }
    }

    /// Current usage for `key`, if a counter exists. Stale windows read as zero.
    pub fn usage(&self, key: &RateLimitKey) -> Option<CounterUsage> {
        let now = self.clock.now();
        let counters = self.counters.read().unwrap_or_else(PoisonError::into_inner);
        let counter = counters.get(key)?;
        let mut view = *counter.lock().unwrap_or_else(PoisonError::into_inner);
        view.roll(now);
        Some(CounterUsage {
            count: view.count,
            limit: view.limit,
            window_start: view.window_start,
        })
    }

    pub fn tracked_keys(&self) -> usize {
        self.counters.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Drop counters whose window has closed. Returns how many were removed.
    pub fn evict_stale(&self) -> usize {
        let now = self.clock.now();
        let mut counters = self.counters.write().unwrap_or_else(PoisonError::into_inner);
        let before = counters.len();
        counters.retain(|_, counter| {
            let counter = counter.lock().unwrap_or_else(PoisonError::into_inner);
            now < counter.window_end()
        });
        before - counters.len()
    }
}

/// Evict stale counters every [`RateLimiter::eviction_interval`] until
/// `shutdown` is notified.
pub async fn spawn_eviction(limiter: Arc<RateLimiter>, shutdown: Arc<tokio::sync::Notify>) {
    let every = limiter.eviction_interval();
    tracing::info!("🧹 Rate-limit eviction started (every {}s)", every.as_secs());
    let mut interval = tokio::time::interval(every);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let evicted = limiter.evict_stale();
                if evicted > 0 {
                    tracing::debug!(evicted, remaining = limiter.tracked_keys(), "Evicted stale rate-limit counters");
                }
            }
            _ = shutdown.notified() => {
                tracing::info!("⏹️ Rate-limit eviction stopped");
                break;
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
