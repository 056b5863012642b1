//! Stale-while-revalidate cache over the aggregator.
//!
//! One entry holds the last aggregate and when it was captured. At most one
//! refresh runs at a time: it is spawned onto the runtime so it commits even
//! when the caller that started it goes away, and concurrent callers share it
//! through a [`Shared`] future.

use crate::aggregate::Aggregator;
use crate::core::AggregateResult;
use anyhow::anyhow;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

type RefreshOutcome = Result<Arc<AggregateResult>, Arc<anyhow::Error>>;
type PendingRefresh = Shared<BoxFuture<'static, RefreshOutcome>>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    /// Aggregation failed and there is no earlier result to fall back to.
    #[error("Rates unavailable: {0}")]
    Unavailable(String),
}

#[derive(Default)]
struct CacheEntry {
    value: Option<Arc<AggregateResult>>,
    captured_at: Option<Instant>,
    in_flight: Option<PendingRefresh>,
}

struct Inner {
    aggregator: Arc<dyn Aggregator>,
    ttl: Duration,
    entry: Mutex<CacheEntry>,
}

impl Inner {
    // The lock is never held across an await, so a poisoned entry is still consistent.
    fn lock(&self) -> MutexGuard<'_, CacheEntry> {
        self.entry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Clears the in-flight marker however the refresh task ends.
struct InFlightGuard(Arc<Inner>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.lock().in_flight = None;
    }
}

/// Diagnostic view of the cache entry.
#[derive(Debug, Clone)]
pub struct CacheSnapshot {
    pub value: Option<Arc<AggregateResult>>,
    pub age: Option<Duration>,
    pub refreshing: bool,
}

pub struct RefreshCache {
    inner: Arc<Inner>,
}

impl RefreshCache {
    /// Starts empty; the first `get` triggers a refresh.
    pub fn new(aggregator: Arc<dyn Aggregator>, ttl: Duration) -> Self {
        RefreshCache {
            inner: Arc::new(Inner {
                aggregator,
                ttl,
                entry: Mutex::new(CacheEntry::default()),
            }),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.inner.ttl
    }

    /// Current rates: the stored value while fresh, the stale value while a
    /// refresh is running, otherwise the result of a new refresh.
    pub async fn get(&self) -> Result<Arc<AggregateResult>, CacheError> {
        let pending = {
            let mut entry = self.inner.lock();
            if let (Some(value), Some(captured_at)) = (&entry.value, entry.captured_at) {
                if captured_at.elapsed() < self.inner.ttl {
                    debug!("Cache HIT");
                    return Ok(Arc::clone(value));
                }
            }

            if let Some(in_flight) = entry.in_flight.clone() {
                if let Some(stale) = &entry.value {
                    debug!("Cache STALE, refresh already running");
                    return Ok(Arc::clone(stale));
                }
                debug!("Cache EMPTY, joining running refresh");
                in_flight
            } else {
                debug!("Cache MISS");
                self.start_refresh(&mut entry)
            }
        };
        self.settle(pending).await
    }

    /// Refreshes regardless of freshness. Joins the running refresh if any.
    pub async fn refresh(&self) -> Result<Arc<AggregateResult>, CacheError> {
        let pending = {
            let mut entry = self.inner.lock();
            match entry.in_flight.clone() {
                Some(in_flight) => in_flight,
                None => self.start_refresh(&mut entry),
            }
        };
        self.settle(pending).await
    }

    pub fn snapshot(&self) -> CacheSnapshot {
        let entry = self.inner.lock();
        CacheSnapshot {
            value: entry.value.clone(),
            age: entry.captured_at.map(|at| at.elapsed()),
            refreshing: entry.in_flight.is_some(),
        }
    }

    /// Must be called with the entry locked and no refresh in flight.
    fn start_refresh(&self, entry: &mut CacheEntry) -> PendingRefresh {
        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move {
            let _guard = InFlightGuard(Arc::clone(&inner));
            let started = Instant::now();
            match inner.aggregator.aggregate().await {
                Ok(result) => {
                    let value = Arc::new(result);
                    let mut entry = inner.lock();
                    entry.value = Some(Arc::clone(&value));
                    entry.captured_at = Some(Instant::now());
                    info!(elapsed = ?started.elapsed(), "Refreshed rates");
                    Ok(value)
                }
                Err(e) => {
                    warn!(error = %e, "Refresh failed");
                    Err(Arc::new(e))
                }
            }
        });

        let pending = async move {
            match task.await {
                Ok(outcome) => outcome,
                Err(join_err) => Err(Arc::new(anyhow!("Refresh task failed: {join_err}"))),
            }
        }
        .boxed()
        .shared();
        entry.in_flight = Some(pending.clone());
        pending
    }

    async fn settle(&self, pending: PendingRefresh) -> Result<Arc<AggregateResult>, CacheError> {
        match pending.await {
            Ok(value) => Ok(value),
            Err(err) => match self.inner.lock().value.clone() {
                Some(stale) => {
                    warn!(error = %err, "Serving stale rates after failed refresh");
                    Ok(stale)
                }
                None => Err(CacheError::Unavailable(format!("{err:#}"))),
            },
        }
    }
}
