pub mod caching;
pub mod extract;
pub mod http;
pub mod reference;
pub mod scrape;
pub mod spread;
pub mod util;

use crate::core::config::{AppConfig, SourceStrategy};
use crate::core::{ReferenceRateProvider, SourceAdapter, Transport};
use caching::CachingReference;
use extract::Heuristic;
use reference::FallbackReference;
use scrape::{FetchMode, ScrapeSource};
use spread::SpreadSource;
use std::sync::Arc;
use std::time::Duration;

/// Builds one adapter per configured source, in configuration order.
/// Spread sources share a single reference provider and, within
/// `reference.reuse_secs`, a single reference snapshot.
pub fn build_sources(
    config: &AppConfig,
    transport: Arc<dyn Transport>,
) -> Vec<Arc<dyn SourceAdapter>> {
    let mut reference: Arc<dyn ReferenceRateProvider> = Arc::new(FallbackReference::from_config(
        &config.reference,
        &config.base_currency(),
        Arc::clone(&transport),
    ));
    if config.reference.reuse_secs > 0 {
        reference = Arc::new(CachingReference::new(reference, config.reference.reuse()));
    }

    config
        .sources
        .iter()
        .map(|source| -> Arc<dyn SourceAdapter> {
            match &source.strategy {
                SourceStrategy::Spread { spread } => Arc::new(SpreadSource::new(
                    &source.name,
                    &source.url,
                    *spread,
                    Arc::clone(&reference),
                )),
                SourceStrategy::Scrape {
                    render,
                    settle_ms,
                    window,
                    timeout_secs,
                } => {
                    let mode = if *render {
                        FetchMode::Render {
                            settle: Duration::from_millis(*settle_ms),
                        }
                    } else {
                        FetchMode::Get
                    };
                    Arc::new(
                        ScrapeSource::new(&source.name, &source.url, Arc::clone(&transport), mode)
                            .with_timeout(Duration::from_secs(*timeout_secs))
                            .with_chain(Heuristic::default_chain(*window)),
                    )
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::{Aggregator, Orchestrator};
    use crate::core::{CurrencyCode, FetchError, RawContent, SourceStatus};
    use crate::providers::http::HttpTransport;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::Mutex;

    const OPEN_ER_BODY: &str = r#"{"result":"success","base_code":"USD","rates":{"USD":1,"TRY":40,"EUR":0.8,"GBP":0.625,"CHF":0.8}}"#;
    const EXCHANGE_RATE_BODY: &str =
        r#"{"base":"TRY","rates":{"TRY":1,"USD":0.025,"EUR":0.02,"GBP":0.016,"CHF":0.0125}}"#;

    /// Answers reference lookups from memory and records every GET.
    struct ScriptedTransport {
        primary_hangs: bool,
        requests: Mutex<Vec<String>>,
    }

    impl ScriptedTransport {
        fn new(primary_hangs: bool) -> Arc<Self> {
            Arc::new(Self {
                primary_hangs,
                requests: Mutex::new(Vec::new()),
            })
        }

        fn requests(&self) -> Vec<String> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn get(&self, url: &str, timeout: Duration) -> Result<RawContent, FetchError> {
            self.requests.lock().unwrap().push(url.to_string());
            let body = if url.contains("/v4/") {
                if self.primary_hangs {
                    tokio::time::sleep(timeout).await;
                    return Err(FetchError::TransportTimeout {
                        url: url.to_string(),
                        after: timeout,
                    });
                }
                EXCHANGE_RATE_BODY
            } else if url.contains("/v6/") {
                OPEN_ER_BODY
            } else {
                return Err(FetchError::TransportFailure(format!("unexpected GET {url}")));
            };
            Ok(RawContent {
                url: url.to_string(),
                body: body.to_string(),
            })
        }

        async fn render(
            &self,
            url: &str,
            _timeout: Duration,
            _settle_delay: Duration,
        ) -> Result<RawContent, FetchError> {
            Err(FetchError::TransportFailure(format!("no browser for {url}")))
        }
    }

    #[test]
    fn test_build_sources_keeps_config_order() {
        let config: AppConfig = serde_yaml::from_str(
            r#"
sources:
  - name: "Ahlatcı Döviz"
    url: "https://www.ahlatcidoviz.com.tr"
    strategy:
      kind: spread
      spread: 0.003
  - name: "Çarşı Döviz"
    url: "https://carsidoviz.com"
    strategy:
      kind: scrape
      render: true
  - name: "Harem Altın"
    url: "https://www.haremaltin.com/?lang=en"
    strategy:
      kind: spread
      spread: 0.0035
"#,
        )
        .unwrap();

        let sources = build_sources(&config, Arc::new(HttpTransport::new().unwrap()));
        let names: Vec<&str> = sources.iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["Ahlatcı Döviz", "Çarşı Döviz", "Harem Altın"]);
        assert_eq!(sources[1].url(), "https://carsidoviz.com");
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_primary_falls_back_within_default_budget() {
        let config: AppConfig = serde_yaml::from_str(
            r#"
sources:
  - name: "Ahlatcı Döviz"
    url: "https://www.ahlatcidoviz.com.tr"
    strategy:
      kind: spread
      spread: 0.003
"#,
        )
        .unwrap();
        config.validate().unwrap();

        let transport = ScriptedTransport::new(true);
        let sources = build_sources(&config, transport.clone());
        let result = Orchestrator::from_config(&config.aggregation, sources)
            .aggregate()
            .await
            .unwrap();

        let spread = &result.results[0];
        assert_eq!(spread.status, SourceStatus::Success, "{:?}", spread.error_detail);
        assert_eq!(spread.quotes[&CurrencyCode::USD].buy, dec!(39.88));
        assert_eq!(spread.quotes[&CurrencyCode::USD].sell, dec!(40.12));

        let requests = transport.requests();
        assert_eq!(requests.len(), 3);
        assert!(requests[2].starts_with("https://open.er-api.com/v6/"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_reference_lookup_per_aggregation() {
        let config: AppConfig =
            serde_yaml::from_str(include_str!("../../docs/example_config.yaml")).unwrap();
        let transport = ScriptedTransport::new(false);
        let orchestrator = Orchestrator::from_config(
            &config.aggregation,
            build_sources(&config, transport.clone()),
        );

        let result = orchestrator.aggregate().await.unwrap();
        assert_eq!(result.success_count(), 3);
        let reference_gets = |t: &ScriptedTransport| {
            t.requests().iter().filter(|u| u.contains("/latest/")).count()
        };
        assert_eq!(reference_gets(&transport), 1);

        let usd: Vec<_> = result
            .results
            .iter()
            .filter(|r| r.status == SourceStatus::Success)
            .map(|r| r.quotes[&CurrencyCode::USD].buy)
            .collect();
        assert_eq!(usd, vec![dec!(39.88), dec!(39.86), dec!(39.8720)]);

        tokio::time::advance(config.reference.reuse() + Duration::from_secs(1)).await;
        orchestrator.aggregate().await.unwrap();
        assert_eq!(reference_gets(&transport), 2);
    }
}
