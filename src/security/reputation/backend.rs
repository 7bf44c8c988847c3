//! Persistence seam for the reputation store.
//!
//! A backend offers the narrow set of operations the store needs. The two
//! mutations that must be atomic per IP are expressed as single backend
//! calls so a SQL implementation can map them onto
//! `UPDATE ... SET violation_count = violation_count + 1 RETURNING *` and a
//! conditional `UPDATE ... WHERE classification <> 'blacklist'`.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// How an IP is treated by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    Whitelist,
    Blacklist,
    Monitor,
}

impl Classification {
    pub fn as_str(self) -> &'static str {
        match self {
            Classification::Whitelist => "whitelist",
            Classification::Blacklist => "blacklist",
            Classification::Monitor => "monitor",
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted reputation of one IP. Timestamps are Unix seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpRecord {
    pub ip: String,
    pub classification: Classification,
    #[serde(default)]
    pub reason: Option<String>,
    pub created_at: u64,
    #[serde(default)]
    pub expires_at: Option<u64>,
    #[serde(default)]
    pub violation_count: u32,
    #[serde(default)]
    pub last_violation_at: Option<u64>,
}

impl IpRecord {
    pub fn new(ip: impl Into<String>, classification: Classification, now: u64) -> Self {
        Self {
            ip: ip.into(),
            classification,
            reason: None,
            created_at: now,
            expires_at: None,
            violation_count: 0,
            last_violation_at: None,
        }
    }

    pub fn is_expired(&self, now: u64) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("record serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("reputation backend timed out after {0:?}")]
    Timeout(Duration),

    #[error("reputation backend unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait ReputationBackend: Send + Sync {
    async fn get(&self, ip: &str) -> Result<Option<IpRecord>, StoreError>;

    /// Insert or replace the record for `record.ip`.
    async fn upsert(&self, record: IpRecord) -> Result<(), StoreError>;

    /// Returns whether a record existed.
    async fn delete(&self, ip: &str) -> Result<bool, StoreError>;

    /// Atomically add one violation and return the updated record.
    ///
    /// A missing or expired record is replaced by a fresh `Monitor` record.
    async fn increment_violation(&self, ip: &str, now: u64) -> Result<IpRecord, StoreError>;

    /// Atomically move a record to `Blacklist` unless it already is.
    ///
    /// Returns `true` only for the call that performed the transition.
    async fn promote_to_blacklist(
        &self,
        ip: &str,
        reason: &str,
        expires_at: u64,
    ) -> Result<bool, StoreError>;

    async fn list(&self) -> Result<Vec<IpRecord>, StoreError>;

    /// Make pending writes durable.
    async fn flush(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// In-process backend. Per-IP atomicity comes from DashMap's shard locks.
#[derive(Default)]
pub struct MemoryBackend {
    records: DashMap<String, IpRecord>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_records(records: Vec<IpRecord>) -> Self {
        let backend = Self::new();
        for record in records {
            backend.records.insert(record.ip.clone(), record);
        }
        backend
    }

    pub(crate) fn snapshot(&self) -> Vec<IpRecord> {
        let mut records: Vec<IpRecord> = self.records.iter().map(|r| r.value().clone()).collect();
        records.sort_by(|a, b| a.ip.cmp(&b.ip));
        records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl ReputationBackend for MemoryBackend {
    async fn get(&self, ip: &str) -> Result<Option<IpRecord>, StoreError> {
        Ok(self.records.get(ip).map(|r| r.value().clone()))
    }

    async fn upsert(&self, record: IpRecord) -> Result<(), StoreError> {
        self.records.insert(record.ip.clone(), record);
        Ok(())
    }

    async fn delete(&self, ip: &str) -> Result<bool, StoreError> {
        Ok(self.records.remove(ip).is_some())
    }

    async fn increment_violation(&self, ip: &str, now: u64) -> Result<IpRecord, StoreError> {
        let mut entry = self
            .records
            .entry(ip.to_string())
            .or_insert_with(|| IpRecord::new(ip, Classification::Monitor, now));

        if entry.is_expired(now) {
            *entry = IpRecord::new(ip, Classification::Monitor, now);
        }

        entry.violation_count = entry.violation_count.saturating_add(1);
        entry.last_violation_at = Some(now);
        Ok(entry.clone())
    }

    async fn promote_to_blacklist(
        &self,
        ip: &str,
        reason: &str,
        expires_at: u64,
    ) -> Result<bool, StoreError> {
        match self.records.get_mut(ip) {
            Some(mut record) if record.classification != Classification::Blacklist => {
                record.classification = Classification::Blacklist;
                record.reason = Some(reason.to_string());
                record.expires_at = Some(expires_at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list(&self) -> Result<Vec<IpRecord>, StoreError> {
        Ok(self.snapshot())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_increment_creates_monitor_record() {
        let backend = MemoryBackend::new();
        let record = backend.increment_violation("10.0.0.1", 100).await.unwrap();
        assert_eq!(record.classification, Classification::Monitor);
        assert_eq!(record.violation_count, 1);
        assert_eq!(record.last_violation_at, Some(100));
        assert_eq!(record.created_at, 100);
    }

    #[tokio::test]
    async fn test_increment_replaces_expired_record() {
        let backend = MemoryBackend::new();
        let mut record = IpRecord::new("10.0.0.1", Classification::Blacklist, 10);
        record.expires_at = Some(50);
        record.violation_count = 7;
        backend.upsert(record).await.unwrap();

        let record = backend.increment_violation("10.0.0.1", 60).await.unwrap();
        assert_eq!(record.classification, Classification::Monitor);
        assert_eq!(record.violation_count, 1);
    }

    #[tokio::test]
    async fn test_promotion_happens_once() {
        let backend = MemoryBackend::new();
        backend.increment_violation("ip", 1).await.unwrap();
        assert!(backend.promote_to_blacklist("ip", "r", 99).await.unwrap());
        assert!(!backend.promote_to_blacklist("ip", "r", 99).await.unwrap());
        assert!(!backend.promote_to_blacklist("missing", "r", 99).await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_increments_are_not_lost() {
        let backend = Arc::new(MemoryBackend::new());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let backend = backend.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..10 {
                    backend.increment_violation("hot", 1).await.unwrap();
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        let record = backend.get("hot").await.unwrap().unwrap();
        assert_eq!(record.violation_count, 160);
    }
}
