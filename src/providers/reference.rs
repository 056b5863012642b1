use super::util::with_retry;
use crate::core::config::{ReferenceConfig, ReferenceEndpoint, ReferenceKind};
use crate::core::{CurrencyCode, FetchError, ReferenceRateProvider, ReferenceRates, Transport};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

fn to_decimal(value: f64) -> Option<Decimal> {
    if !value.is_finite() || value <= 0.0 {
        return None;
    }
    Decimal::from_str(&value.to_string()).ok()
}

#[derive(Debug, Clone, Copy)]
struct RetryPolicy {
    timeout: Duration,
    retries: usize,
    delay_ms: u64,
}

async fn fetch_json<T: for<'de> Deserialize<'de>>(
    transport: &dyn Transport,
    url: &str,
    policy: RetryPolicy,
) -> Result<T, FetchError> {
    let content = with_retry(
        || transport.get(url, policy.timeout),
        policy.retries,
        policy.delay_ms,
    )
    .await?;
    serde_json::from_str(&content.body)
        .map_err(|e| FetchError::MalformedQuote(format!("Failed to parse JSON response from {url}: {e}")))
}

#[derive(Debug, Deserialize)]
struct ExchangeRateApiResponse {
    rates: HashMap<String, f64>,
}

/// `/v4/latest/{base}`: rates are units of each currency per one unit of base.
pub struct ExchangeRateApi {
    base_url: String,
    base_currency: String,
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
}

impl ExchangeRateApi {
    pub fn new(base_url: &str, base_currency: &str, transport: Arc<dyn Transport>) -> Self {
        ExchangeRateApi {
            base_url: base_url.trim_end_matches('/').to_string(),
            base_currency: base_currency.to_string(),
            transport,
            policy: RetryPolicy {
                timeout: Duration::from_secs(10),
                retries: 0,
                delay_ms: 0,
            },
        }
    }

    fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }
}

#[async_trait]
impl ReferenceRateProvider for ExchangeRateApi {
    fn name(&self) -> &str {
        "exchangerate-api"
    }

    #[instrument(name = "ExchangeRateApiFetch", skip(self), fields(base = %self.base_currency))]
    async fn fetch_mids(&self) -> Result<ReferenceRates, FetchError> {
        let url = format!("{}/v4/latest/{}", self.base_url, self.base_currency);
        debug!("Requesting reference rates from {}", url);
        let data: ExchangeRateApiResponse =
            fetch_json(self.transport.as_ref(), &url, self.policy).await?;

        let mut mids = BTreeMap::new();
        for code in CurrencyCode::ALL {
            let Some(rate) = data.rates.get(code.as_str()).copied().and_then(to_decimal) else {
                continue;
            };
            if let Some(mid) = Decimal::ONE.checked_div(rate) {
                mids.insert(code, mid);
            }
        }

        if mids.is_empty() {
            return Err(FetchError::MalformedQuote(format!(
                "No usable rates in response from {url}"
            )));
        }
        Ok(ReferenceRates {
            provider: self.name().to_string(),
            mids,
        })
    }
}

#[derive(Debug, Deserialize)]
struct OpenErApiResponse {
    result: String,
    #[serde(default)]
    rates: HashMap<String, f64>,
    #[serde(rename = "error-type")]
    error_type: Option<String>,
}

/// `/v6/latest/USD`: rates are units of each currency per one US dollar,
/// crossed through the base currency.
pub struct OpenErApi {
    base_url: String,
    base_currency: String,
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
}

impl OpenErApi {
    pub fn new(base_url: &str, base_currency: &str, transport: Arc<dyn Transport>) -> Self {
        OpenErApi {
            base_url: base_url.trim_end_matches('/').to_string(),
            base_currency: base_currency.to_string(),
            transport,
            policy: RetryPolicy {
                timeout: Duration::from_secs(10),
                retries: 0,
                delay_ms: 0,
            },
        }
    }

    fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }
}

#[async_trait]
impl ReferenceRateProvider for OpenErApi {
    fn name(&self) -> &str {
        "open-er-api"
    }

    #[instrument(name = "OpenErApiFetch", skip(self), fields(base = %self.base_currency))]
    async fn fetch_mids(&self) -> Result<ReferenceRates, FetchError> {
        let url = format!("{}/v6/latest/USD", self.base_url);
        debug!("Requesting reference rates from {}", url);
        let data: OpenErApiResponse = fetch_json(self.transport.as_ref(), &url, self.policy).await?;

        if data.result != "success" {
            return Err(FetchError::TransportFailure(format!(
                "{} returned {}: {}",
                url,
                data.result,
                data.error_type.unwrap_or_default()
            )));
        }

        let base_per_usd = data
            .rates
            .get(&self.base_currency)
            .copied()
            .and_then(to_decimal)
            .ok_or_else(|| {
                FetchError::MalformedQuote(format!(
                    "No {} rate in response from {}",
                    self.base_currency, url
                ))
            })?;

        let mut mids = BTreeMap::new();
        for code in CurrencyCode::ALL {
            let Some(rate) = data.rates.get(code.as_str()).copied().and_then(to_decimal) else {
                continue;
            };
            if let Some(mid) = base_per_usd.checked_div(rate) {
                mids.insert(code, mid);
            }
        }

        Ok(ReferenceRates {
            provider: self.name().to_string(),
            mids,
        })
    }
}

/// Primary provider with an optional secondary. Fails with
/// `ReferenceRateUnavailable` only when every provider failed.
pub struct FallbackReference {
    providers: Vec<Arc<dyn ReferenceRateProvider>>,
    gold_usd_fallback: Option<Decimal>,
}

impl FallbackReference {
    pub fn new(
        primary: Arc<dyn ReferenceRateProvider>,
        secondary: Option<Arc<dyn ReferenceRateProvider>>,
    ) -> Self {
        let mut providers = vec![primary];
        providers.extend(secondary);
        FallbackReference {
            providers,
            gold_usd_fallback: None,
        }
    }

    pub fn with_gold_fallback(mut self, gold_usd: Option<Decimal>) -> Self {
        self.gold_usd_fallback = gold_usd;
        self
    }

    pub fn from_config(
        config: &ReferenceConfig,
        base_currency: &str,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let policy = RetryPolicy {
            timeout: config.timeout(),
            retries: config.retries,
            delay_ms: config.retry_delay_ms,
        };
        let build = |endpoint: &ReferenceEndpoint| -> Arc<dyn ReferenceRateProvider> {
            match endpoint.kind {
                ReferenceKind::ExchangeRateApi => Arc::new(
                    ExchangeRateApi::new(&endpoint.base_url, base_currency, Arc::clone(&transport))
                        .with_policy(policy),
                ),
                ReferenceKind::OpenErApi => Arc::new(
                    OpenErApi::new(&endpoint.base_url, base_currency, Arc::clone(&transport))
                        .with_policy(policy),
                ),
            }
        };
        FallbackReference::new(build(&config.primary), config.secondary.as_ref().map(build))
            .with_gold_fallback(config.gold_usd_fallback)
    }

    fn fill_gold(&self, rates: &mut ReferenceRates) {
        if rates.mids.contains_key(&CurrencyCode::XAU) {
            return;
        }
        if let (Some(gold_usd), Some(usd)) = (self.gold_usd_fallback, rates.mid(CurrencyCode::USD)) {
            warn!(
                gold_usd = %gold_usd,
                "Reference has no XAU rate, using configured fallback gold price"
            );
            rates.mids.insert(CurrencyCode::XAU, gold_usd * usd);
        }
    }
}

#[async_trait]
impl ReferenceRateProvider for FallbackReference {
    fn name(&self) -> &str {
        "fallback"
    }

    async fn fetch_mids(&self) -> Result<ReferenceRates, FetchError> {
        let mut failures = Vec::new();
        for provider in &self.providers {
            match provider.fetch_mids().await {
                Ok(mut rates) => {
                    self.fill_gold(&mut rates);
                    return Ok(rates);
                }
                Err(e) => {
                    warn!(provider = %provider.name(), error = %e, "Reference provider failed");
                    failures.push(format!("{}: {}", provider.name(), e));
                }
            }
        }
        Err(FetchError::ReferenceRateUnavailable(failures.join("; ")))
    }
}
