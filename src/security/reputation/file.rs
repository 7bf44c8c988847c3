//! JSON snapshot persistence for the reputation store.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

use super::backend::{IpRecord, MemoryBackend, ReputationBackend, StoreError};

/// Keeps records in memory and mirrors them to a JSON snapshot.
///
/// Admin writes (`upsert`, `delete`) are persisted immediately. Violation
/// bookkeeping only marks the snapshot dirty; [`flush`](ReputationBackend::flush)
/// writes it, driven by the gateway's periodic sweep and by shutdown.
/// The snapshot is written to a temporary file and renamed over the
/// previous one so a crash never leaves a truncated file behind.
pub struct JsonFileBackend {
    records: MemoryBackend,
    path: PathBuf,
    dirty: AtomicBool,
    write_lock: Mutex<()>,
}

impl JsonFileBackend {
    /// Open the snapshot at `path`, starting empty when it does not exist.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let records = match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.is_empty() => Vec::new(),
            Ok(bytes) => serde_json::from_slice::<Vec<IpRecord>>(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        tracing::info!(path = ?path, records = records.len(), "Loaded IP reputation snapshot");

        Ok(Self {
            records: MemoryBackend::from_records(records),
            path,
            dirty: AtomicBool::new(false),
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::SeqCst);
    }

    async fn persist(&self) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        // cleared before the snapshot; a concurrent mutation re-marks it
        self.dirty.store(false, Ordering::SeqCst);
        let snapshot = self.records.snapshot();
        let bytes = serde_json::to_vec_pretty(&snapshot)?;

        let tmp = self.path.with_extension("json.tmp");
        let written = async {
            tokio::fs::write(&tmp, bytes).await?;
            tokio::fs::rename(&tmp, &self.path).await
        }
        .await;
        if written.is_err() {
            self.mark_dirty();
        }
        written.map_err(StoreError::from)
    }
}

#[async_trait]
impl ReputationBackend for JsonFileBackend {
    async fn get(&self, ip: &str) -> Result<Option<IpRecord>, StoreError> {
        self.records.get(ip).await
    }

    async fn upsert(&self, record: IpRecord) -> Result<(), StoreError> {
        self.records.upsert(record).await?;
        self.persist().await
    }

    async fn delete(&self, ip: &str) -> Result<bool, StoreError> {
        let existed = self.records.delete(ip).await?;
        if existed {
            self.persist().await?;
        }
        Ok(existed)
    }

    async fn increment_violation(&self, ip: &str, now: u64) -> Result<IpRecord, StoreError> {
        let record = self.records.increment_violation(ip, now).await?;
        self.mark_dirty();
        Ok(record)
    }

    async fn promote_to_blacklist(
        &self,
        ip: &str,
        reason: &str,
        expires_at: u64,
    ) -> Result<bool, StoreError> {
        let promoted = self.records.promote_to_blacklist(ip, reason, expires_at).await?;
        if promoted {
            self.mark_dirty();
        }
        Ok(promoted)
    }

    async fn list(&self) -> Result<Vec<IpRecord>, StoreError> {
        self.records.list().await
    }

    async fn flush(&self) -> Result<(), StoreError> {
        if !self.is_dirty() {
            return Ok(());
        }
        self.persist().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::reputation::backend::Classification;

    fn temp_path() -> PathBuf {
        std::env::temp_dir().join(format!("shield-reputation-{}.json", uuid::Uuid::new_v4()))
    }

    #[tokio::test]
    async fn test_records_survive_reopen() {
        let path = temp_path();

        let backend = JsonFileBackend::open(&path).await.unwrap();
        backend
            .upsert(IpRecord::new("203.0.113.9", Classification::Whitelist, 1))
            .await
            .unwrap();
        backend.increment_violation("198.51.100.7", 2).await.unwrap();
        backend.increment_violation("198.51.100.7", 3).await.unwrap();
        backend.flush().await.unwrap();
        drop(backend);

        let reopened = JsonFileBackend::open(&path).await.unwrap();
        let whitelisted = reopened.get("203.0.113.9").await.unwrap().unwrap();
        assert_eq!(whitelisted.classification, Classification::Whitelist);
        let offender = reopened.get("198.51.100.7").await.unwrap().unwrap();
        assert_eq!(offender.violation_count, 2);

        assert!(reopened.delete("203.0.113.9").await.unwrap());
        drop(reopened);
        let again = JsonFileBackend::open(&path).await.unwrap();
        assert_eq!(again.list().await.unwrap().len(), 1);

        std::fs::remove_file(&path).unwrap_or_default();
    }

    #[tokio::test]
    async fn test_violations_are_written_on_flush_only() {
        let path = temp_path();
        let backend = JsonFileBackend::open(&path).await.unwrap();

        for now in 0..100 {
            backend.increment_violation("198.51.100.8", now).await.unwrap();
        }
        assert!(backend.promote_to_blacklist("198.51.100.8", "flood", 500).await.unwrap());
        assert!(!path.exists());
        assert!(backend.is_dirty());

        backend.flush().await.unwrap();
        assert!(!backend.is_dirty());
        let modified = std::fs::metadata(&path).unwrap().modified().unwrap();

        // clean flush is a no-op
        backend.flush().await.unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().modified().unwrap(), modified);

        let reopened = JsonFileBackend::open(&path).await.unwrap();
        let record = reopened.get("198.51.100.8").await.unwrap().unwrap();
        assert_eq!(record.violation_count, 100);
        assert_eq!(record.classification, Classification::Blacklist);

        std::fs::remove_file(&path).unwrap_or_default();
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_is_an_error() {
        let path = temp_path();
        std::fs::write(&path, b"{not json").unwrap();
        assert!(matches!(
            JsonFileBackend::open(&path).await,
            Err(StoreError::Serialization(_))
        ));
        std::fs::remove_file(&path).unwrap_or_default();
    }
}
