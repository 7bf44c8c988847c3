//! Violation recording off the request path.
//!
//! Denials enqueue onto a bounded channel drained by a single writer task.
//! When the queue is full the violation is dropped and counted, so a flood
//! costs the request path one `try_send` per denial and nothing more.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Notify;

use crate::observability::metrics;
use crate::security::reputation::ReputationStore;

struct Violation {
    ip: String,
    kind: String,
}

/// Queued plus in-progress writes, with an idle signal for shutdown.
#[derive(Default)]
struct Pending {
    count: AtomicUsize,
    idle: Notify,
}

impl Pending {
    fn done(&self) {
        if self.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }
}

pub struct ViolationQueue {
    tx: mpsc::Sender<Violation>,
    pending: Arc<Pending>,
    dropped: AtomicU64,
}

impl ViolationQueue {
    /// Spawn the writer. It stops once the queue is dropped and drained.
    pub fn start(store: Arc<ReputationStore>, capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<Violation>(capacity.max(1));
        let pending = Arc::new(Pending::default());

        let writer = pending.clone();
        tokio::spawn(async move {
            while let Some(violation) = rx.recv().await {
                store.record_violation(&violation.ip, &violation.kind).await;
                writer.done();
            }
            tracing::debug!("Violation writer stopped");
        });

        Self {
            tx,
            pending,
            dropped: AtomicU64::new(0),
        }
    }

    /// Enqueue without waiting. Returns `false` when the violation was dropped.
    pub fn submit(&self, ip: &str, kind: String) -> bool {
        self.pending.count.fetch_add(1, Ordering::SeqCst);
        let violation = Violation {
            ip: ip.to_string(),
            kind,
        };
        match self.tx.try_send(violation) {
            Ok(()) => true,
            Err(e) => {
                self.pending.done();
                self.dropped.fetch_add(1, Ordering::Relaxed);
                metrics::record_violation_dropped();
                let cause = match e {
                    TrySendError::Full(_) => "queue full",
                    TrySendError::Closed(_) => "writer stopped",
                };
                tracing::debug!(client = %ip, cause, "Violation dropped");
                false
            }
        }
    }

    pub fn pending(&self) -> usize {
        self.pending.count.load(Ordering::SeqCst)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Wait until every accepted violation has been written.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.pending.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::reputation::{
        EscalationPolicy, IpRecord, MemoryBackend, ReputationBackend, StoreError,
    };
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::sync::Semaphore;

    /// Memory backend whose violation writes wait for a permit.
    struct GatedBackend {
        inner: MemoryBackend,
        gate: Semaphore,
    }

    #[async_trait]
    impl ReputationBackend for GatedBackend {
        async fn get(&self, ip: &str) -> Result<Option<IpRecord>, StoreError> {
            self.inner.get(ip).await
        }
        async fn upsert(&self, record: IpRecord) -> Result<(), StoreError> {
            self.inner.upsert(record).await
        }
        async fn delete(&self, ip: &str) -> Result<bool, StoreError> {
            self.inner.delete(ip).await
        }
        async fn increment_violation(&self, ip: &str, now: u64) -> Result<IpRecord, StoreError> {
            let _permit = self
                .gate
                .acquire()
                .await
                .map_err(|_| StoreError::Unavailable("gate closed".into()))?;
            self.inner.increment_violation(ip, now).await
        }
        async fn promote_to_blacklist(&self, ip: &str, r: &str, e: u64) -> Result<bool, StoreError> {
            self.inner.promote_to_blacklist(ip, r, e).await
        }
        async fn list(&self) -> Result<Vec<IpRecord>, StoreError> {
            self.inner.list().await
        }
    }

    #[tokio::test]
    async fn test_flood_is_bounded_by_capacity() {
        let backend = Arc::new(GatedBackend {
            inner: MemoryBackend::new(),
            gate: Semaphore::new(0),
        });
        let store = Arc::new(ReputationStore::new(
            backend.clone(),
            EscalationPolicy::default(),
            Duration::from_secs(30),
        ));
        let queue = ViolationQueue::start(store, 4);

        let accepted = (0..200)
            .filter(|_| queue.submit("198.51.100.9", "ddos_protection_triggered".into()))
            .count();

        // at most the channel plus the one the writer holds
        assert!(accepted >= 4 && accepted <= 5);
        assert!(queue.pending() <= 5);
        assert_eq!(queue.dropped(), (200 - accepted) as u64);

        backend.gate.add_permits(1);
        queue.wait_idle().await;
        assert_eq!(queue.pending(), 0);

        let record = backend.inner.get("198.51.100.9").await.unwrap().unwrap();
        assert_eq!(record.violation_count as usize, accepted);
    }

    #[tokio::test]
    async fn test_wait_idle_returns_immediately_when_empty() {
        let store = Arc::new(ReputationStore::new(
            Arc::new(MemoryBackend::new()),
            EscalationPolicy::default(),
            Duration::from_secs(1),
        ));
        let queue = ViolationQueue::start(store, 8);
        queue.wait_idle().await;

        assert!(queue.submit("192.0.2.1", "csrf_attempt".into()));
        queue.wait_idle().await;
        assert_eq!(queue.pending(), 0);
        assert_eq!(queue.dropped(), 0);
    }
}
