//! DDoS escalation guard.
//!
//! A strict flood limiter plus an in-memory table of suspicious
//! identifiers. Each limiter violation extends the block linearly
//! (`violations * step`, capped). Identifiers that stay quiet for the
//! forgiveness window after their last block are forgotten by [`DdosGuard::sweep`].
//!
//! This tier is ephemeral and trips before the persisted reputation store
//! engages.

use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::DdosConfig;
use crate::observability::metrics;
use crate::security::rate_limit::{ceil_secs, RateLimiter};

#[derive(Debug, Clone, Copy)]
struct SuspiciousEntry {
    violation_count: u32,
    blocked_until: Instant,
}

/// Outcome of [`DdosGuard::check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DdosDecision {
    Allowed,
    Blocked {
        retry_after: Duration,
        violation_count: u32,
    },
}

impl DdosDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, DdosDecision::Allowed)
    }

    /// `Retry-After` in whole seconds (0 when allowed).
    pub fn retry_after_secs(&self) -> u64 {
        match self {
            DdosDecision::Allowed => 0,
            DdosDecision::Blocked { retry_after, .. } => ceil_secs(*retry_after),
        }
    }
}

pub struct DdosGuard {
    limiter: RateLimiter,
    suspicious: DashMap<String, SuspiciousEntry>,
    block_step: Duration,
    max_block: Duration,
    forgiveness: Duration,
}

impl DdosGuard {
    pub fn new(config: &DdosConfig) -> Self {
        Self {
            limiter: RateLimiter::from_policy("ddos", config.limit),
            suspicious: DashMap::new(),
            block_step: Duration::from_secs(config.block_step_secs),
            max_block: Duration::from_secs(config.max_block_secs),
            forgiveness: Duration::from_secs(config.forgiveness_secs),
        }
    }

    pub fn check(&self, identifier: &str) -> DdosDecision {
        let now = Instant::now();

        if let Some(entry) = self.suspicious.get(identifier) {
            if now < entry.blocked_until {
                return DdosDecision::Blocked {
                    retry_after: entry.blocked_until - now,
                    violation_count: entry.violation_count,
                };
            }
        }

        if self.limiter.check(identifier).allowed {
            return DdosDecision::Allowed;
        }

        // Re-check under the entry lock: concurrent over-limit requests
        // escalate once, the rest see the block just installed.
        let mut entry = self
            .suspicious
            .entry(identifier.to_string())
            .or_insert(SuspiciousEntry {
                violation_count: 0,
                blocked_until: now,
            });
        if now < entry.blocked_until {
            return DdosDecision::Blocked {
                retry_after: entry.blocked_until - now,
                violation_count: entry.violation_count,
            };
        }
        entry.violation_count = entry.violation_count.saturating_add(1);
        let block = self.block_duration(entry.violation_count);
        entry.blocked_until = now + block;

        tracing::warn!(
            client = %identifier,
            violations = entry.violation_count,
            block_secs = block.as_secs(),
            "DDoS guard blocking client"
        );

        DdosDecision::Blocked {
            retry_after: block,
            violation_count: entry.violation_count,
        }
    }

    fn block_duration(&self, violation_count: u32) -> Duration {
        self.block_step
            .saturating_mul(violation_count)
            .min(self.max_block)
    }

    /// Manual unblock: clears both the flood counter and the suspicious entry.
    pub fn reset(&self, identifier: &str) {
        self.limiter.reset(identifier);
        self.suspicious.remove(identifier);
    }

    /// Expire limiter windows and forgive quiet identifiers.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let before = self.suspicious.len();
        let forgiveness = self.forgiveness;
        self.suspicious
            .retain(|_, entry| now < entry.blocked_until + forgiveness);
        let forgiven = before.saturating_sub(self.suspicious.len());
        self.limiter.sweep();
        metrics::record_suspicious_entries(self.suspicious.len());
        forgiven
    }

    pub fn suspicious_count(&self) -> usize {
        self.suspicious.len()
    }

    pub fn tracked_count(&self) -> usize {
        self.limiter.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RateLimitPolicy;

    fn guard(max_requests: u32) -> DdosGuard {
        DdosGuard::new(&DdosConfig {
            limit: RateLimitPolicy::new(60, max_requests),
            ..DdosConfig::default()
        })
    }

    fn exhaust(guard: &DdosGuard, id: &str, n: u32) {
        for _ in 0..n {
            assert!(guard.check(id).is_allowed());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_violation_blocks_for_one_step() {
        let guard = guard(60);
        exhaust(&guard, "flood", 60);

        let decision = guard.check("flood");
        assert_eq!(
            decision,
            DdosDecision::Blocked {
                retry_after: Duration::from_secs(300),
                violation_count: 1,
            }
        );

        // still blocked, remaining time reported
        tokio::time::advance(Duration::from_secs(100)).await;
        assert_eq!(guard.check("flood").retry_after_secs(), 200);
    }

    #[tokio::test(start_paused = true)]
    async fn test_block_grows_linearly_and_caps() {
        let guard = guard(1);
        let mut last = Duration::ZERO;
        for expected_violations in 1..=14u32 {
            // wait out the previous block and the limiter window
            tokio::time::advance(last + Duration::from_secs(61)).await;
            assert!(guard.check("x").is_allowed());
            match guard.check("x") {
                DdosDecision::Blocked {
                    retry_after,
                    violation_count,
                } => {
                    assert_eq!(violation_count, expected_violations);
                    let expected = Duration::from_secs(300 * u64::from(expected_violations))
                        .min(Duration::from_secs(3600));
                    assert_eq!(retry_after, expected);
                    last = retry_after;
                }
                DdosDecision::Allowed => panic!("expected block"),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_forgiveness_clears_identifier() {
        let guard = guard(2);
        exhaust(&guard, "ip", 2);
        assert!(!guard.check("ip").is_allowed());
        assert_eq!(guard.suspicious_count(), 1);

        // block ended but forgiveness window still open
        tokio::time::advance(Duration::from_secs(300 + 60)).await;
        assert_eq!(guard.sweep(), 0);
        assert_eq!(guard.suspicious_count(), 1);

        tokio::time::advance(Duration::from_secs(600)).await;
        assert_eq!(guard.sweep(), 1);
        assert_eq!(guard.suspicious_count(), 0);
        assert_eq!(guard.tracked_count(), 0);

        // behaves as fresh: next violation is a first offence again
        exhaust(&guard, "ip", 2);
        assert_eq!(
            guard.check("ip"),
            DdosDecision::Blocked {
                retry_after: Duration::from_secs(300),
                violation_count: 1,
            }
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_burst_escalates_once() {
        let guard = std::sync::Arc::new(guard(1));
        exhaust(&guard, "burst", 1);

        let mut handles = Vec::new();
        for _ in 0..32 {
            let guard = guard.clone();
            handles.push(tokio::spawn(async move { guard.check("burst") }));
        }
        for h in handles {
            let decision = h.await.unwrap();
            assert!(matches!(decision, DdosDecision::Blocked { violation_count: 1, .. }));
        }
        assert!(guard.check("burst").retry_after_secs() <= 300);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_unblocks() {
        let guard = guard(1);
        exhaust(&guard, "ip", 1);
        assert!(!guard.check("ip").is_allowed());

        guard.reset("ip");
        assert!(guard.check("ip").is_allowed());
    }
}
