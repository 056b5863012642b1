use crate::core::config::AggregationConfig;
use crate::core::{AggregateResult, FetchError, SourceAdapter, SourceResult};
use anyhow::{Result, bail};
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt, stream};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Produces one aggregate over every configured source.
#[async_trait]
pub trait Aggregator: Send + Sync {
    async fn aggregate(&self) -> Result<AggregateResult>;
}

/// Fans out to all adapters with at most `max_concurrency` in flight.
pub struct Orchestrator {
    adapters: Vec<Arc<dyn SourceAdapter>>,
    max_concurrency: usize,
    source_timeout: Duration,
}

impl Orchestrator {
    pub fn new(
        adapters: Vec<Arc<dyn SourceAdapter>>,
        max_concurrency: usize,
        source_timeout: Duration,
    ) -> Self {
        Orchestrator {
            adapters,
            max_concurrency: max_concurrency.max(1),
            source_timeout,
        }
    }

    pub fn from_config(config: &AggregationConfig, adapters: Vec<Arc<dyn SourceAdapter>>) -> Self {
        Self::new(adapters, config.max_concurrency, config.source_timeout())
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Runs one adapter under the per-source timeout. Panics and timeouts become
/// an error result for that source only.
async fn guarded_fetch(adapter: Arc<dyn SourceAdapter>, timeout: Duration) -> SourceResult {
    let call = AssertUnwindSafe(adapter.fetch()).catch_unwind();
    match tokio::time::timeout(timeout, call).await {
        Ok(Ok(result)) => result,
        Ok(Err(payload)) => {
            let detail = format!("Adapter panicked: {}", panic_message(payload.as_ref()));
            warn!(source = adapter.name(), "{detail}");
            SourceResult::failed(adapter.name(), adapter.url(), detail)
        }
        Err(_) => {
            let err = FetchError::TransportTimeout {
                url: adapter.url().to_string(),
                after: timeout,
            };
            warn!(source = adapter.name(), "Source timed out");
            SourceResult::failed(adapter.name(), adapter.url(), err.to_string())
        }
    }
}

#[async_trait]
impl Aggregator for Orchestrator {
    #[instrument(name = "Aggregate", skip(self), fields(sources = self.adapters.len()))]
    async fn aggregate(&self) -> Result<AggregateResult> {
        if self.adapters.is_empty() {
            bail!("No sources configured");
        }

        let mut slots: Vec<Option<SourceResult>> = (0..self.adapters.len()).map(|_| None).collect();
        let timeout = self.source_timeout;
        let fetches: Vec<BoxFuture<'static, (usize, SourceResult)>> = self
            .adapters
            .iter()
            .cloned()
            .enumerate()
            .map(|(index, adapter)| {
                async move { (index, guarded_fetch(adapter, timeout).await) }.boxed()
            })
            .collect();
        let mut completed = stream::iter(fetches).buffer_unordered(self.max_concurrency);

        while let Some((index, result)) = completed.next().await {
            debug!(source = %result.source_name, status = ?result.status, "Source finished");
            slots[index] = Some(result);
        }

        let results: Vec<SourceResult> = slots
            .into_iter()
            .zip(&self.adapters)
            .map(|(slot, adapter)| {
                slot.unwrap_or_else(|| {
                    SourceResult::failed(adapter.name(), adapter.url(), "No result produced")
                })
            })
            .collect();

        let aggregate = AggregateResult::new(results);
        info!(
            succeeded = aggregate.success_count(),
            total = aggregate.results.len(),
            "Aggregation finished"
        );
        Ok(aggregate)
    }
}
