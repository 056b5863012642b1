use rust_decimal_macros::dec;
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use xrates::aggregate::Aggregator;
use xrates::core::{CurrencyCode, SourceStatus};
use xrates::refresh::RefreshCache;

// Adds automatic logging to test
mod test_utils {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    pub async fn create_reference_server(expected_calls: u64) -> MockServer {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v4/latest/TRY"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"base": "TRY", "rates": {"TRY": 1, "USD": 0.025, "EUR": 0.02, "GBP": 0.016, "CHF": 0.0125}}"#,
            ))
            .expect(expected_calls)
            .mount(&mock_server)
            .await;
        mock_server
    }

    pub async fn create_page_server() -> MockServer {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/kurlar"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<html><body><table>
                    <tr><th>Döviz</th><th>Alış</th><th>Satış</th></tr>
                    <tr><td>Amerikan Doları</td><td>42,0050</td><td>42,1350</td></tr>
                    <tr><td>Euro</td><td>48,8450</td><td>49,1100</td></tr>
                </table></body></html>"#,
            ))
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/bakim"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("<html><body><p>Bakım çalışması</p></body></html>"),
            )
            .mount(&mock_server)
            .await;
        mock_server
    }

    pub fn write_config(reference_uri: &str, page_uri: &str) -> tempfile::NamedTempFile {
        let config_file = tempfile::NamedTempFile::new().expect("Failed to create temp file");
        let config_content = format!(
            r#"
base_currency: "TRY"
cache:
  ttl_secs: 60
aggregation:
  max_concurrency: 2
  source_timeout_secs: 5
reference:
  primary:
    kind: exchange_rate_api
    base_url: "{reference_uri}"
  secondary: null
  timeout_secs: 2
  retries: 0
  gold_usd_fallback: 2650
sources:
  - name: "Ahlatcı Döviz"
    url: "https://www.ahlatcidoviz.com.tr"
    strategy:
      kind: spread
      spread: 0.003
  - name: "Sayfa"
    url: "{page_uri}/kurlar"
    strategy:
      kind: scrape
  - name: "Bakımda"
    url: "{page_uri}/bakim"
    strategy:
      kind: scrape
      render: true
      settle_ms: 10
"#
        );
        std::fs::write(config_file.path(), config_content).expect("Failed to write config file");
        config_file
    }
}

#[test_log::test(tokio::test)]
async fn test_aggregation_from_config_file() {
    let reference = test_utils::create_reference_server(1).await;
    let pages = test_utils::create_page_server().await;
    let config_file = test_utils::write_config(&reference.uri(), &pages.uri());

    let config = xrates::load_config(config_file.path().to_str()).unwrap();
    let orchestrator = xrates::build_orchestrator(&config).unwrap();
    let result = orchestrator.aggregate().await.unwrap();
    info!(?result, "Aggregated");

    let names: Vec<&str> = result.results.iter().map(|r| r.source_name.as_str()).collect();
    assert_eq!(names, vec!["Ahlatcı Döviz", "Sayfa", "Bakımda"]);

    let spread = &result.results[0];
    assert_eq!(spread.status, SourceStatus::Success);
    assert_eq!(spread.quotes[&CurrencyCode::USD].buy, dec!(39.88));
    assert_eq!(spread.quotes[&CurrencyCode::USD].sell, dec!(40.12));
    assert_eq!(spread.quotes[&CurrencyCode::XAU].buy, dec!(105682.00));
    assert_eq!(spread.quotes[&CurrencyCode::XAU].sell, dec!(106318.00));

    let scraped = &result.results[1];
    assert_eq!(scraped.status, SourceStatus::Success);
    assert_eq!(scraped.quotes[&CurrencyCode::USD].buy, dec!(42.0050));
    assert_eq!(scraped.quotes[&CurrencyCode::EUR].sell, dec!(49.1100));
    assert_eq!(scraped.quotes.len(), 2);

    let empty = &result.results[2];
    assert_eq!(empty.status, SourceStatus::Error);
    assert!(empty.quotes.is_empty());
    assert_eq!(empty.error_detail.as_deref(), Some("NoQuotesExtracted"));
}

#[test_log::test(tokio::test)]
async fn test_cache_serves_repeat_requests_from_one_aggregation() {
    let reference = test_utils::create_reference_server(1).await;
    let pages = test_utils::create_page_server().await;
    let config_file = test_utils::write_config(&reference.uri(), &pages.uri());

    let config = xrates::load_config(config_file.path().to_str()).unwrap();
    let orchestrator = xrates::build_orchestrator(&config).unwrap();
    let cache = RefreshCache::new(Arc::new(orchestrator), config.cache.ttl());
    assert_eq!(cache.ttl(), Duration::from_secs(60));

    let first = cache.get().await.unwrap();
    let second = cache.get().await.unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.success_count(), 2);
    // MockServer verifies the single reference call on drop
}

#[test_log::test(tokio::test)]
async fn test_fetch_command_with_mock() {
    let reference = test_utils::create_reference_server(1).await;
    let pages = test_utils::create_page_server().await;
    let config_file = test_utils::write_config(&reference.uri(), &pages.uri());

    let result = xrates::run_command(
        xrates::AppCommand::Fetch,
        Some(config_file.path().to_str().unwrap()),
    )
    .await;
    assert!(
        result.is_ok(),
        "Fetch command failed with: {:?}",
        result.err()
    );
}

#[test_log::test(tokio::test)]
async fn test_invalid_config_is_rejected() {
    let config_file = tempfile::NamedTempFile::new().expect("Failed to create temp file");
    fs::write(config_file.path(), "sources: []\n").expect("Failed to write config file");

    let err = xrates::load_config(config_file.path().to_str()).unwrap_err();
    assert!(format!("{err:#}").contains("At least one source must be configured"));
}
