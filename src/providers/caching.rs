use crate::core::{FetchError, ReferenceRateProvider, ReferenceRates};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// Shares one reference snapshot between every spread source for `reuse`.
///
/// The lock is held across the upstream call, so sources asking at the same
/// time wait for the first lookup instead of issuing their own. Failures are
/// kept as well, which makes every source in one aggregation see the same
/// outcome.
pub struct CachingReference {
    inner: Arc<dyn ReferenceRateProvider>,
    reuse: Duration,
    cache: Mutex<Option<(Instant, Result<ReferenceRates, FetchError>)>>,
}

impl CachingReference {
    pub fn new(inner: Arc<dyn ReferenceRateProvider>, reuse: Duration) -> Self {
        Self {
            inner,
            reuse,
            cache: Mutex::new(None),
        }
    }
}

#[async_trait]
impl ReferenceRateProvider for CachingReference {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn fetch_mids(&self) -> Result<ReferenceRates, FetchError> {
        let mut cache = self.cache.lock().await;
        if let Some((fetched_at, result)) = cache.as_ref() {
            if fetched_at.elapsed() < self.reuse {
                debug!("Cache hit for reference rates");
                return result.clone();
            }
        }
        debug!("Cache miss for reference rates");
        let result = self.inner.fetch_mids().await;
        *cache = Some((Instant::now(), result.clone()));
        result
    }
}
