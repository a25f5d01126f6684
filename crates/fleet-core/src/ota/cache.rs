// # Cached Artifact Store
//
// Wraps any ArtifactStore with deadlines and a short-lived cache.
//
// - Production version and block list are cached independently for `ttl`
// - The signed URL is never cached (it expires on its own schedule)
// - Every call to the inner store is bounded by `timeout`
// - Any inner failure or timeout surfaces as `ArtifactStoreUnavailable`,
//   except the block list, which degrades to an empty set

use async_trait::async_trait;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::Error;
use crate::traits::ArtifactStore;

struct Cached<T> {
    value: T,
    fetched_at: Instant,
}

pub struct CachedArtifactStore {
    inner: Arc<dyn ArtifactStore>,
    timeout: Duration,
    ttl: Duration,
    version: Mutex<Option<Cached<String>>>,
    blocked: Mutex<Option<Cached<HashSet<String>>>>,
}

impl CachedArtifactStore {
    pub fn new(inner: Arc<dyn ArtifactStore>, timeout: Duration, ttl: Duration) -> Self {
        Self {
            inner,
            timeout,
            ttl,
            version: Mutex::new(None),
            blocked: Mutex::new(None),
        }
    }

    /// Drop both cached values
    pub async fn invalidate(&self) {
        *self.version.lock().await = None;
        *self.blocked.lock().await = None;
    }

    fn is_fresh<T>(&self, entry: &Option<Cached<T>>) -> bool {
        entry
            .as_ref()
            .is_some_and(|c| c.fetched_at.elapsed() < self.ttl)
    }

    async fn bounded<T>(
        &self,
        what: &str,
        call: impl Future<Output = Result<T, Error>>,
    ) -> Result<T, Error> {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(Error::ArtifactStoreUnavailable(msg))) => Err(Error::ArtifactStoreUnavailable(msg)),
            Ok(Err(e)) => Err(Error::artifact_store(format!(
                "{} {} failed: {}",
                self.inner.store_name(),
                what,
                e
            ))),
            Err(_) => Err(Error::artifact_store(format!(
                "{} {} timed out after {:?}",
                self.inner.store_name(),
                what,
                self.timeout
            ))),
        }
    }
}

#[async_trait]
impl ArtifactStore for CachedArtifactStore {
    async fn production_version(&self) -> Result<String, Error> {
        // Held across the fetch so concurrent misses share one request
        let mut slot = self.version.lock().await;
        if self.is_fresh(&slot) {
            if let Some(cached) = slot.as_ref() {
                return Ok(cached.value.clone());
            }
        }

        let version = self
            .bounded("production version", self.inner.production_version())
            .await?;
        let version = version.trim().to_string();
        debug!("Fetched production firmware version {}", version);

        *slot = Some(Cached {
            value: version.clone(),
            fetched_at: Instant::now(),
        });
        Ok(version)
    }

    async fn signed_firmware_url(&self) -> Result<String, Error> {
        self.bounded("signed URL", self.inner.signed_firmware_url())
            .await
    }

    async fn blocked_versions(&self) -> Result<HashSet<String>, Error> {
        let mut slot = self.blocked.lock().await;
        if self.is_fresh(&slot) {
            if let Some(cached) = slot.as_ref() {
                return Ok(cached.value.clone());
            }
        }

        match self
            .bounded("blocked versions", self.inner.blocked_versions())
            .await
        {
            Ok(blocked) => {
                *slot = Some(Cached {
                    value: blocked.clone(),
                    fetched_at: Instant::now(),
                });
                Ok(blocked)
            }
            Err(e) => {
                warn!("Treating block list as empty: {}", e);
                Ok(HashSet::new())
            }
        }
    }

    fn store_name(&self) -> &'static str {
        self.inner.store_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingStore {
        version_calls: AtomicUsize,
        url_calls: AtomicUsize,
        hang: bool,
        fail_blocked: bool,
    }

    #[async_trait]
    impl ArtifactStore for CountingStore {
        async fn production_version(&self) -> Result<String, Error> {
            self.version_calls.fetch_add(1, Ordering::SeqCst);
            if self.hang {
                std::future::pending::<()>().await;
            }
            Ok("1.1.0\n".to_string())
        }

        async fn signed_firmware_url(&self) -> Result<String, Error> {
            let n = self.url_calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!("https://fw.example/firmware.bin?sig={n}"))
        }

        async fn blocked_versions(&self) -> Result<HashSet<String>, Error> {
            if self.fail_blocked {
                return Err(Error::storage("no such key"));
            }
            Ok(HashSet::from(["1.0.5".to_string()]))
        }

        fn store_name(&self) -> &'static str {
            "counting"
        }
    }

    fn cached(inner: Arc<CountingStore>) -> CachedArtifactStore {
        CachedArtifactStore::new(inner, Duration::from_secs(10), Duration::from_secs(60))
    }

    #[tokio::test(start_paused = true)]
    async fn version_is_cached_until_ttl() {
        let inner = Arc::new(CountingStore::default());
        let store = cached(inner.clone());

        assert_eq!(store.production_version().await.unwrap(), "1.1.0");
        assert_eq!(store.production_version().await.unwrap(), "1.1.0");
        assert_eq!(inner.version_calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(61)).await;
        store.production_version().await.unwrap();
        assert_eq!(inner.version_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn signed_url_is_never_cached() {
        let inner = Arc::new(CountingStore::default());
        let store = cached(inner.clone());

        let first = store.signed_firmware_url().await.unwrap();
        let second = store.signed_firmware_url().await.unwrap();
        assert_ne!(first, second);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_store_times_out_as_unavailable() {
        let inner = Arc::new(CountingStore {
            hang: true,
            ..CountingStore::default()
        });
        let store = cached(inner);

        let err = store.production_version().await.unwrap_err();
        assert!(matches!(err, Error::ArtifactStoreUnavailable(_)));
    }

    #[tokio::test]
    async fn block_list_failure_degrades_to_empty() {
        let inner = Arc::new(CountingStore {
            fail_blocked: true,
            ..CountingStore::default()
        });
        let store = cached(inner);

        assert!(store.blocked_versions().await.unwrap().is_empty());
    }
}
