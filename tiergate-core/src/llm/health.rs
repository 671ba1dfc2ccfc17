//! TTL-cached backend health with coalesced probes.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::debug;

use super::backend::{Backend, BackendKind};

/// Upper bound on a single health probe.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy)]
struct HealthEntry {
    healthy: bool,
    checked_at: Instant,
}

/// Point-in-time view of one backend's cached health.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub backend: BackendKind,
    pub healthy: bool,
    pub age_ms: u64,
    pub stale: bool,
}

/// Health results shared across requests.
///
/// Readers take the cached value while it is fresh. When it is stale, callers
/// serialize on a per-backend probe lock and re-check the cache after
/// acquiring it, so concurrent refreshes collapse into a single probe.
pub struct HealthCache {
    ttl: Duration,
    entries: RwLock<HashMap<BackendKind, HealthEntry>>,
    probe_locks: HashMap<BackendKind, Mutex<()>>,
}

impl HealthCache {
    pub fn new(ttl: Duration) -> Self {
        let probe_locks = BackendKind::ORDER
            .into_iter()
            .map(|kind| (kind, Mutex::new(())))
            .collect();
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
            probe_locks,
        }
    }

    async fn fresh(&self, kind: BackendKind) -> Option<bool> {
        let entries = self.entries.read().await;
        entries
            .get(&kind)
            .filter(|entry| entry.checked_at.elapsed() < self.ttl)
            .map(|entry| entry.healthy)
    }

    /// Cached health for `kind`, probing `backend` if the entry is stale.
    pub async fn is_healthy(&self, kind: BackendKind, backend: &dyn Backend) -> bool {
        if let Some(healthy) = self.fresh(kind).await {
            return healthy;
        }

        let _probe = self.probe_locks[&kind].lock().await;
        // Another caller may have refreshed while we waited.
        if let Some(healthy) = self.fresh(kind).await {
            return healthy;
        }

        let healthy = tokio::time::timeout(PROBE_TIMEOUT, backend.health_check())
            .await
            .unwrap_or(false);
        debug!(backend = %kind, healthy, "health probe");

        self.entries.write().await.insert(
            kind,
            HealthEntry {
                healthy,
                checked_at: Instant::now(),
            },
        );
        healthy
    }

    /// Drop the cached entry so the next caller probes again.
    pub async fn invalidate(&self, kind: BackendKind) {
        self.entries.write().await.remove(&kind);
    }

    pub async fn snapshot(&self) -> Vec<HealthStatus> {
        let entries = self.entries.read().await;
        let mut statuses: Vec<HealthStatus> = entries
            .iter()
            .map(|(kind, entry)| {
                let age = entry.checked_at.elapsed();
                HealthStatus {
                    backend: *kind,
                    healthy: entry.healthy,
                    age_ms: age.as_millis() as u64,
                    stale: age >= self.ttl,
                }
            })
            .collect();
        statuses.sort_by_key(|s| s.backend);
        statuses
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::llm::{ChatMessage, GenerationParams, Response};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    struct ProbeCounter {
        probes: AtomicUsize,
        healthy: AtomicBool,
        delay: Duration,
    }

    impl ProbeCounter {
        fn new(healthy: bool, delay: Duration) -> Self {
            Self {
                probes: AtomicUsize::new(0),
                healthy: AtomicBool::new(healthy),
                delay,
            }
        }
    }

    #[async_trait]
    impl Backend for ProbeCounter {
        async fn generate(
            &self,
            _messages: &[ChatMessage],
            _model_id: &str,
            _params: &GenerationParams,
        ) -> Result<Response> {
            unreachable!("health tests never generate")
        }

        async fn health_check(&self) -> bool {
            self.probes.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.healthy.load(Ordering::SeqCst)
        }
    }

    #[tokio::test]
    async fn test_result_cached_within_ttl() {
        let cache = HealthCache::new(Duration::from_secs(30));
        let backend = ProbeCounter::new(true, Duration::ZERO);

        assert!(cache.is_healthy(BackendKind::Local, &backend).await);
        backend.healthy.store(false, Ordering::SeqCst);
        assert!(cache.is_healthy(BackendKind::Local, &backend).await);
        assert_eq!(backend.probes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_entry_is_reprobed() {
        let cache = HealthCache::new(Duration::from_secs(30));
        let backend = ProbeCounter::new(true, Duration::ZERO);

        assert!(cache.is_healthy(BackendKind::Local, &backend).await);
        backend.healthy.store(false, Ordering::SeqCst);
        tokio::time::advance(Duration::from_secs(31)).await;

        assert!(!cache.is_healthy(BackendKind::Local, &backend).await);
        assert_eq!(backend.probes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_refreshes_coalesce() {
        let cache = Arc::new(HealthCache::new(Duration::from_secs(30)));
        let backend = Arc::new(ProbeCounter::new(true, Duration::from_millis(50)));

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let backend = Arc::clone(&backend);
                tokio::spawn(async move {
                    cache.is_healthy(BackendKind::Local, backend.as_ref()).await
                })
            })
            .collect();

        for result in futures::future::join_all(tasks).await {
            assert!(result.unwrap());
        }
        assert_eq!(backend.probes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_probe_counts_as_unhealthy() {
        let cache = HealthCache::new(Duration::from_secs(30));
        let backend = ProbeCounter::new(true, PROBE_TIMEOUT * 2);

        assert!(!cache.is_healthy(BackendKind::Remote, &backend).await);
    }

    #[tokio::test]
    async fn test_invalidate_and_snapshot() {
        let cache = HealthCache::new(Duration::from_secs(30));
        let backend = ProbeCounter::new(false, Duration::ZERO);

        cache.is_healthy(BackendKind::Remote, &backend).await;
        cache.is_healthy(BackendKind::Local, &backend).await;
        let snapshot = cache.snapshot().await;
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].backend, BackendKind::Local);
        assert!(!snapshot[1].healthy);
        assert!(!snapshot[1].stale);

        cache.invalidate(BackendKind::Local).await;
        assert_eq!(cache.snapshot().await.len(), 1);
    }
}
