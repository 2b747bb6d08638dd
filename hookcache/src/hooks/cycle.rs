//! The read → produce → merge → write cycle

use super::{Cached, Hook};
use crate::error::{CacheError, Result};
use serde::{Deserialize, Serialize};
use std::future::Future;
use tracing::{debug, trace, warn};

/// How the write-back at the end of a cycle is issued
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    /// Await the write before returning
    #[default]
    Await,
    /// Spawn the write on the runtime and return right away
    Detached,
}

/// Runs cache-aside cycles for any [`Hook`].
///
/// There is no single-flight: two concurrent cycles over the same missing
/// entity both run their producer.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheAside {
    write_mode: WriteMode,
    safe_reads: bool,
}

impl CacheAside {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_write_mode(mut self, write_mode: WriteMode) -> Self {
        self.write_mode = write_mode;
        self
    }

    /// Run the hook's validator on every cycle read
    pub fn with_safe_reads(mut self, safe_reads: bool) -> Self {
        self.safe_reads = safe_reads;
        self
    }

    pub fn write_mode(&self) -> WriteMode {
        self.write_mode
    }

    /// Serve from cache, calling `producer` at most once for what is missing.
    ///
    /// The producer receives the read's info (found / not-found), so it only
    /// has to compute the missing part. Its output is merged into the cached
    /// partial value, the merged value is written back and returned.
    /// Producer errors are returned as-is and nothing is written.
    pub async fn run<H, F, Fut, E>(
        &self,
        hook: H,
        producer: F,
    ) -> std::result::Result<H::Output, E>
    where
        H: Hook + 'static,
        H::Output: Clone + 'static,
        F: FnOnce(H::Info) -> Fut,
        Fut: Future<Output = std::result::Result<H::Output, E>>,
        E: From<CacheError>,
    {
        let Cached { value, info } = hook.get(self.safe_reads).await?;
        if !hook.is_incomplete(&info) {
            trace!("Cache hit, producer skipped");
            return Ok(value);
        }

        debug!("Cache incomplete, running producer");
        let produced = producer(info).await?;
        let merged = hook.merge(value, produced);

        match self.write_mode {
            WriteMode::Await => hook.set(&merged, false).await?,
            WriteMode::Detached => {
                let output = merged.clone();
                tokio::spawn(async move {
                    if let Err(e) = hook.set(&output, false).await {
                        warn!("Detached cache write failed: {}", e);
                    }
                });
            }
        }

        Ok(merged)
    }

    /// Drop every cached entity the hook addresses
    pub async fn invalidate<H: Hook>(&self, hook: &H) -> Result<()> {
        hook.del().await
    }

    /// Overwrite the entities the hook addresses that are currently cached.
    /// Uncached entities stay uncached.
    pub async fn refresh<H: Hook>(&self, hook: &H, output: &H::Output) -> Result<()> {
        hook.set(output, true).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{CacheController, TtlStore};
    use crate::hooks::{MultiObject, SingleObject};
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn cache() -> (Arc<TtlStore>, CacheController) {
        let store = Arc::new(TtlStore::new());
        let cache = CacheController::with_defaults(store.clone()).add_prefix(["Items"]);
        (store, cache)
    }

    #[tokio::test]
    async fn test_run_miss_then_hit() {
        let (_, cache) = cache();
        let calls = &AtomicUsize::new(0);
        let runner = CacheAside::new();

        for _ in 0..3 {
            let value = runner
                .run(SingleObject::<u32>::new(cache.clone()), move |_| async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, CacheError>(Some(42))
                })
                .await
                .unwrap();
            assert_eq!(value, Some(42));
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_run_producer_sees_only_missing() {
        let (_, cache) = cache();
        let runner = CacheAside::new();
        MultiObject::<u32, u32>::new(cache.clone(), [1])
            .set(&HashMap::from([(1, 10)]), false)
            .await
            .unwrap();

        let value = runner
            .run(MultiObject::<u32, u32>::new(cache, [1, 2, 3]), |info| async move {
                assert_eq!(info.found, vec![1]);
                Ok::<_, CacheError>(info.not_found.iter().map(|id| (*id, id * 10)).collect())
            })
            .await
            .unwrap();

        assert_eq!(value, HashMap::from([(1, 10), (2, 20), (3, 30)]));
    }

    #[tokio::test]
    async fn test_run_producer_error_skips_write() {
        #[derive(Debug)]
        enum AppError {
            Cache,
            Upstream,
        }
        impl From<CacheError> for AppError {
            fn from(_: CacheError) -> Self {
                AppError::Cache
            }
        }

        let (store, cache) = cache();
        let result = CacheAside::new()
            .run(SingleObject::<u32>::new(cache), |_| async {
                Err::<Option<u32>, _>(AppError::Upstream)
            })
            .await;

        assert!(matches!(result, Err(AppError::Upstream)));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_refresh_only_touches_cached() {
        let (store, cache) = cache();
        let runner = CacheAside::new();
        let hook = SingleObject::<u32>::new(cache);

        runner.refresh(&hook, &Some(1)).await.unwrap();
        assert!(store.is_empty());

        hook.set(&Some(1), false).await.unwrap();
        runner.refresh(&hook, &Some(2)).await.unwrap();
        assert_eq!(hook.get(false).await.unwrap().value, Some(2));

        runner.invalidate(&hook).await.unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_write_mode_serde() {
        assert_eq!(WriteMode::default(), WriteMode::Await);
        let mode: WriteMode = serde_json::from_str("\"detached\"").unwrap();
        assert_eq!(mode, WriteMode::Detached);
    }
}
