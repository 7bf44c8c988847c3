//! Fixed-window rate limiting.
//!
//! Each [`RateLimiter`] owns its own key space, so the same client has
//! independent counters in the api, auth, lead and DDoS limiters.

use dashmap::DashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::Instant;

use crate::config::{RateLimitPolicy, RateLimitType, RateLimitsConfig};
use crate::observability::metrics;

/// Window state for one identifier.
#[derive(Debug, Clone, Copy)]
struct WindowEntry {
    count: u32,
    reset_at: Instant,
}

/// Outcome of a single [`RateLimiter::check`].
#[derive(Debug, Clone, Copy)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: Instant,
}

impl RateLimitDecision {
    /// Time until the current window resets.
    pub fn retry_after(&self) -> Duration {
        self.reset_at.saturating_duration_since(Instant::now())
    }

    /// `Retry-After` value in whole seconds, never zero.
    pub fn retry_after_secs(&self) -> u64 {
        ceil_secs(self.retry_after())
    }

    /// Window reset as Unix seconds, for `X-RateLimit-Reset`.
    pub fn reset_unix_secs(&self) -> u64 {
        let wall = SystemTime::now() + self.retry_after();
        wall.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
    }
}

pub(crate) fn ceil_secs(d: Duration) -> u64 {
    let secs = d.as_secs() + u64::from(d.subsec_nanos() > 0);
    secs.max(1)
}

/// A fixed-window request counter keyed by client identifier.
pub struct RateLimiter {
    name: &'static str,
    window: Duration,
    max_requests: u32,
    entries: DashMap<String, WindowEntry>,
}

impl RateLimiter {
    pub fn new(name: &'static str, window: Duration, max_requests: u32) -> Self {
        Self {
            name,
            window,
            max_requests,
            entries: DashMap::new(),
        }
    }

    pub fn from_policy(name: &'static str, policy: RateLimitPolicy) -> Self {
        Self::new(name, policy.window(), policy.max_requests)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Count one request for `identifier` and report whether it is admitted.
    ///
    /// The read-increment-compare runs under the entry's shard lock, so
    /// concurrent requests for the same identifier cannot both slip past
    /// the limit.
    pub fn check(&self, identifier: &str) -> RateLimitDecision {
        let now = Instant::now();
        let mut entry = self
            .entries
            .entry(identifier.to_string())
            .or_insert(WindowEntry {
                count: 0,
                reset_at: now + self.window,
            });

        if now > entry.reset_at {
            *entry = WindowEntry {
                count: 0,
                reset_at: now + self.window,
            };
        }

        entry.count = entry.count.saturating_add(1);

        RateLimitDecision {
            allowed: entry.count <= self.max_requests,
            limit: self.max_requests,
            remaining: self.max_requests.saturating_sub(entry.count),
            reset_at: entry.reset_at,
        }
    }

    /// Forget all state for `identifier`.
    pub fn reset(&self, identifier: &str) -> bool {
        self.entries.remove(identifier).is_some()
    }

    /// Drop entries whose window has passed. Returns the number removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.reset_at >= now);
        let removed = before.saturating_sub(self.entries.len());
        metrics::record_rate_limit_entries(self.name, self.entries.len());
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The named limiters used by the pipeline.
pub struct RateLimiters {
    api: RateLimiter,
    auth: RateLimiter,
    lead: RateLimiter,
}

impl RateLimiters {
    pub fn new(config: &RateLimitsConfig) -> Self {
        Self {
            api: RateLimiter::from_policy("api", config.api),
            auth: RateLimiter::from_policy("auth", config.auth),
            lead: RateLimiter::from_policy("lead", config.lead),
        }
    }

    pub fn get(&self, kind: RateLimitType) -> &RateLimiter {
        match kind {
            RateLimitType::Api => &self.api,
            RateLimitType::Auth => &self.auth,
            RateLimitType::Lead => &self.lead,
        }
    }

    /// Clear `identifier` in every named limiter.
    pub fn reset_all(&self, identifier: &str) {
        self.api.reset(identifier);
        self.auth.reset(identifier);
        self.lead.reset(identifier);
    }

    pub fn sweep(&self) -> usize {
        self.api.sweep() + self.auth.sweep() + self.lead.sweep()
    }

    /// Tracked identifiers per limiter, for status reporting.
    pub fn sizes(&self) -> [(&'static str, usize); 3] {
        [
            (self.api.name(), self.api.len()),
            (self.auth.name(), self.auth.len()),
            (self.lead.name(), self.lead.len()),
        ]
    }
}
