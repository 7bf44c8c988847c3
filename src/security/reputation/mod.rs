//! IP reputation store.
//!
//! # Responsibilities
//! - Classify IPs as whitelist / blacklist / monitor
//! - Count violations and auto-blacklist repeat offenders
//! - Expire time-limited classifications lazily on read
//!
//! # Design Decisions
//! - Read-through cache in front of the backend, invalidated on every write.
//!   Each slot carries a write generation; a fill whose fetch overlapped a
//!   write is discarded instead of resurrecting the pre-write record.
//! - Reads fail open: a backend error means "not listed"
//! - `record_violation` never fails the caller; errors are logged
//! - Every backend call runs under a deadline

pub mod backend;
pub mod file;

use dashmap::DashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub use backend::{Classification, IpRecord, MemoryBackend, ReputationBackend, StoreError};
pub use file::JsonFileBackend;

use crate::config::{ReputationBackendKind, ReputationConfig};
use crate::observability::metrics;

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Automatic escalation parameters.
#[derive(Debug, Clone, Copy)]
pub struct EscalationPolicy {
    pub threshold: u32,
    pub block_ttl: Duration,
}

impl Default for EscalationPolicy {
    fn default() -> Self {
        Self {
            threshold: 5,
            block_ttl: Duration::from_secs(24 * 60 * 60),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct CacheSlot {
    generation: u64,
    /// `Some(None)` caches a confirmed miss.
    value: Option<Option<IpRecord>>,
}

pub struct ReputationStore {
    backend: Arc<dyn ReputationBackend>,
    cache: DashMap<String, CacheSlot>,
    generation: AtomicU64,
    policy: EscalationPolicy,
    op_timeout: Duration,
}

impl ReputationStore {
    pub fn new(backend: Arc<dyn ReputationBackend>, policy: EscalationPolicy, op_timeout: Duration) -> Self {
        Self {
            backend,
            cache: DashMap::new(),
            generation: AtomicU64::new(0),
            policy,
            op_timeout,
        }
    }

    pub fn from_config(backend: Arc<dyn ReputationBackend>, config: &ReputationConfig) -> Self {
        let policy = EscalationPolicy {
            threshold: config.auto_blacklist_threshold,
            block_ttl: config.auto_blacklist_ttl(),
        };
        Self::new(backend, policy, config.operation_timeout())
    }

    /// Open the backend named by `config`.
    pub async fn open_backend(config: &ReputationConfig) -> Result<Arc<dyn ReputationBackend>, StoreError> {
        Ok(match config.backend {
            ReputationBackendKind::Memory => Arc::new(MemoryBackend::new()),
            ReputationBackendKind::File => Arc::new(JsonFileBackend::open(&config.path).await?),
        })
    }

    pub fn policy(&self) -> EscalationPolicy {
        self.policy
    }

    async fn with_timeout<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        match tokio::time::timeout(self.op_timeout, op).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(self.op_timeout)),
        }
    }

    /// Drop the cached value for `ip` and bump its generation so in-flight
    /// fills are discarded.
    fn invalidate(&self, ip: &str) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.cache.insert(
            ip.to_string(),
            CacheSlot {
                generation,
                value: None,
            },
        );
    }

    /// Current, unexpired record for `ip`. Fails open to `None`.
    pub async fn lookup(&self, ip: &str) -> Option<IpRecord> {
        let (generation, cached) = match self.cache.get(ip) {
            Some(slot) => (slot.generation, slot.value.clone()),
            None => {
                let slot = self.cache.entry(ip.to_string()).or_default();
                (slot.generation, slot.value.clone())
            }
        };
        let record = match cached {
            Some(hit) => hit,
            None => match self.with_timeout(self.backend.get(ip)).await {
                Ok(fetched) => {
                    if let Some(mut slot) = self.cache.get_mut(ip) {
                        if slot.generation == generation {
                            slot.value = Some(fetched.clone());
                        }
                    }
                    fetched
                }
                Err(e) => {
                    tracing::error!(ip = %ip, error = %e, "Reputation lookup failed, treating IP as unclassified");
                    metrics::record_store_error("read");
                    return None;
                }
            },
        }?;

        if record.is_expired(unix_now()) {
            tracing::info!(ip = %ip, classification = %record.classification, "Reputation entry expired");
            if let Err(e) = self.with_timeout(self.backend.delete(ip)).await {
                tracing::warn!(ip = %ip, error = %e, "Failed to delete expired reputation entry");
                metrics::record_store_error("delete");
            }
            self.invalidate(ip);
            return None;
        }

        Some(record)
    }

    pub async fn is_whitelisted(&self, ip: &str) -> bool {
        self.lookup(ip)
            .await
            .is_some_and(|r| r.classification == Classification::Whitelist)
    }

    pub async fn is_blacklisted(&self, ip: &str) -> bool {
        self.lookup(ip)
            .await
            .is_some_and(|r| r.classification == Classification::Blacklist)
    }

    /// Explicitly classify `ip`. Resets the violation count.
    pub async fn add(
        &self,
        ip: &str,
        classification: Classification,
        reason: Option<String>,
        ttl: Option<Duration>,
    ) -> Result<IpRecord, StoreError> {
        let now = unix_now();
        let record = IpRecord {
            ip: ip.to_string(),
            classification,
            reason,
            created_at: now,
            expires_at: ttl.map(|ttl| now + ttl.as_secs()),
            violation_count: 0,
            last_violation_at: None,
        };

        self.invalidate(ip);
        let result = self.with_timeout(self.backend.upsert(record.clone())).await;
        self.invalidate(ip);
        result?;

        tracing::info!(ip = %ip, classification = %classification, "IP classified");
        Ok(record)
    }

    /// Count a violation and auto-blacklist at the threshold.
    ///
    /// Never returns an error: a failed write is logged and dropped.
    pub async fn record_violation(&self, ip: &str, violation_type: &str) {
        metrics::record_violation(violation_type);
        let now = unix_now();

        let record = match self.with_timeout(self.backend.increment_violation(ip, now)).await {
            Ok(record) => record,
            Err(e) => {
                tracing::error!(ip = %ip, violation = %violation_type, error = %e, "Failed to record violation");
                metrics::record_store_error("record_violation");
                return;
            }
        };
        self.invalidate(ip);

        tracing::debug!(
            ip = %ip,
            violation = %violation_type,
            count = record.violation_count,
            "Violation recorded"
        );

        if record.violation_count < self.policy.threshold
            || record.classification == Classification::Blacklist
        {
            return;
        }

        let reason = format!(
            "auto-blacklisted after {} violations: {}",
            record.violation_count, violation_type
        );
        let expires_at = now + self.policy.block_ttl.as_secs();

        match self
            .with_timeout(self.backend.promote_to_blacklist(ip, &reason, expires_at))
            .await
        {
            Ok(true) => {
                tracing::warn!(
                    ip = %ip,
                    violations = record.violation_count,
                    ttl_secs = self.policy.block_ttl.as_secs(),
                    "IP auto-blacklisted"
                );
                metrics::record_auto_blacklist();
            }
            Ok(false) => {}
            Err(e) => {
                tracing::error!(ip = %ip, error = %e, "Failed to auto-blacklist IP");
                metrics::record_store_error("promote");
            }
        }
        self.invalidate(ip);
    }

    /// Delete the record for `ip`.
    pub async fn remove(&self, ip: &str) -> Result<bool, StoreError> {
        self.invalidate(ip);
        let removed = self.with_timeout(self.backend.delete(ip)).await;
        self.invalidate(ip);
        let removed = removed?;
        if removed {
            tracing::info!(ip = %ip, "IP reputation entry removed");
        }
        Ok(removed)
    }

    /// All records, including expired ones not yet lazily removed.
    pub async fn list(&self) -> Result<Vec<IpRecord>, StoreError> {
        self.with_timeout(self.backend.list()).await
    }

    /// Persist pending backend writes.
    pub async fn flush(&self) -> Result<(), StoreError> {
        self.with_timeout(self.backend.flush()).await
    }

    /// Flush the backend. Call once at shutdown.
    pub async fn close(&self) -> Result<(), StoreError> {
        self.cache.clear();
        self.flush().await
    }
}
