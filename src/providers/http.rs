use crate::core::transport::{Browser, BrowsingContext, ContextGuard, RawContent, Transport};
use crate::core::FetchError;
use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

async fn with_hard_timeout<F>(url: &str, timeout: Duration, fut: F) -> Result<String, FetchError>
where
    F: Future<Output = Result<String, FetchError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(FetchError::TransportTimeout {
            url: url.to_string(),
            after: timeout,
        }),
    }
}

async fn read_body(response: reqwest::Response, url: &str, timeout: Duration) -> Result<String, FetchError> {
    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::TransportFailure(format!(
            "HTTP error: {status} from {url}"
        )));
    }
    response
        .text()
        .await
        .map_err(|e| FetchError::from_reqwest(e, url, timeout))
}

/// reqwest-backed transport. `get` shares one connection pool and keeps no
/// cookies; `render` goes through the configured [`Browser`].
pub struct HttpTransport {
    client: Client,
    browser: Arc<dyn Browser>,
}

impl HttpTransport {
    pub fn new() -> Result<Self> {
        Self::with_browser(Arc::new(IsolatedBrowser::new()))
    }

    pub fn with_browser(browser: Arc<dyn Browser>) -> Result<Self> {
        let client = Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self { client, browser })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    #[instrument(name = "HttpGet", skip(self), fields(url = %url))]
    async fn get(&self, url: &str, timeout: Duration) -> Result<RawContent, FetchError> {
        debug!("Requesting {}", url);
        let body = with_hard_timeout(url, timeout, async {
            let response = self
                .client
                .get(url)
                .timeout(timeout)
                .send()
                .await
                .map_err(|e| FetchError::from_reqwest(e, url, timeout))?;
            read_body(response, url, timeout).await
        })
        .await?;

        Ok(RawContent {
            url: url.to_string(),
            body,
        })
    }

    #[instrument(name = "Render", skip(self), fields(url = %url))]
    async fn render(
        &self,
        url: &str,
        timeout: Duration,
        settle_delay: Duration,
    ) -> Result<RawContent, FetchError> {
        let body = with_hard_timeout(url, timeout, async {
            let mut context = ContextGuard::new(self.browser.open_context().await?);
            context.load(url, settle_delay).await
        })
        .await?;

        Ok(RawContent {
            url: url.to_string(),
            body,
        })
    }
}

/// Opens every context as a brand-new HTTP client with its own cookie jar and
/// connection pool. Scripts are not executed; the settle delay is honoured so
/// callers behave the same against a real rendering engine.
pub struct IsolatedBrowser {
    user_agent: String,
}

impl IsolatedBrowser {
    pub fn new() -> Self {
        Self {
            user_agent: USER_AGENT.to_string(),
        }
    }
}

impl Default for IsolatedBrowser {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Browser for IsolatedBrowser {
    async fn open_context(&self) -> Result<Box<dyn BrowsingContext>, FetchError> {
        let client = Client::builder()
            .user_agent(self.user_agent.as_str())
            .cookie_store(true)
            .build()
            .map_err(|e| FetchError::TransportFailure(format!("Failed to open browsing context: {e}")))?;
        Ok(Box::new(IsolatedContext {
            client: Some(client),
        }))
    }
}

struct IsolatedContext {
    client: Option<Client>,
}

#[async_trait]
impl BrowsingContext for IsolatedContext {
    async fn load(&mut self, url: &str, settle_delay: Duration) -> Result<String, FetchError> {
        let client = self.client.as_ref().ok_or_else(|| {
            FetchError::TransportFailure("browsing context already closed".to_string())
        })?;
        let response = client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::TransportFailure(format!("{e} ({url})")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::TransportFailure(format!(
                "HTTP error: {status} from {url}"
            )));
        }
        let body = response
            .text()
            .await
            .map_err(|e| FetchError::TransportFailure(format!("{e} ({url})")))?;
        tokio::time::sleep(settle_delay).await;
        Ok(body)
    }

    fn close(&mut self) {
        self.client = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wiremock::matchers::{header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Default)]
    struct CountingBrowser {
        opened: Arc<AtomicUsize>,
        closed: Arc<AtomicUsize>,
        load_delay: Duration,
        fail_load: bool,
    }

    struct CountingContext {
        closed: Arc<AtomicUsize>,
        load_delay: Duration,
        fail_load: bool,
    }

    #[async_trait]
    impl Browser for CountingBrowser {
        async fn open_context(&self) -> Result<Box<dyn BrowsingContext>, FetchError> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(CountingContext {
                closed: Arc::clone(&self.closed),
                load_delay: self.load_delay,
                fail_load: self.fail_load,
            }))
        }
    }

    #[async_trait]
    impl BrowsingContext for CountingContext {
        async fn load(&mut self, _url: &str, _settle: Duration) -> Result<String, FetchError> {
            tokio::time::sleep(self.load_delay).await;
            if self.fail_load {
                Err(FetchError::TransportFailure("page crashed".into()))
            } else {
                Ok("<html>rendered</html>".to_string())
            }
        }

        fn close(&mut self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_get_returns_body() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rates"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<table></table>"))
            .mount(&mock_server)
            .await;

        let transport = HttpTransport::new().unwrap();
        let url = format!("{}/rates", mock_server.uri());
        let content = transport.get(&url, Duration::from_secs(5)).await.unwrap();
        assert_eq!(content.body, "<table></table>");
        assert_eq!(content.url, url);
    }

    #[tokio::test]
    async fn test_get_http_error_is_transport_failure() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&mock_server)
            .await;

        let transport = HttpTransport::new().unwrap();
        let err = transport
            .get(&mock_server.uri(), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::TransportFailure(ref msg) if msg.contains("503")));
    }

    #[tokio::test]
    async fn test_get_timeout_is_distinct() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&mock_server)
            .await;

        let transport = HttpTransport::new().unwrap();
        let err = transport
            .get(&mock_server.uri(), Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::TransportTimeout { .. }));
    }

    #[tokio::test]
    async fn test_render_closes_context_on_success_and_failure() {
        let browser = Arc::new(CountingBrowser::default());
        let transport = HttpTransport::with_browser(browser.clone()).unwrap();

        let content = transport
            .render("https://page.example", Duration::from_secs(1), Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(content.body, "<html>rendered</html>");

        let failing = Arc::new(CountingBrowser {
            fail_load: true,
            ..Default::default()
        });
        let transport = HttpTransport::with_browser(failing.clone()).unwrap();
        assert!(transport
            .render("https://page.example", Duration::from_secs(1), Duration::ZERO)
            .await
            .is_err());

        for b in [&browser, &failing] {
            assert_eq!(b.opened.load(Ordering::SeqCst), 1);
            assert_eq!(b.closed.load(Ordering::SeqCst), 1);
        }
    }

    #[tokio::test]
    async fn test_render_closes_context_on_timeout() {
        let browser = Arc::new(CountingBrowser {
            load_delay: Duration::from_secs(5),
            ..Default::default()
        });
        let transport = HttpTransport::with_browser(browser.clone()).unwrap();

        let err = transport
            .render("https://slow.example", Duration::from_millis(20), Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::TransportTimeout { .. }));
        assert_eq!(browser.opened.load(Ordering::SeqCst), 1);
        assert_eq!(browser.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_isolated_contexts_share_no_cookies() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/live"))
            .and(header_exists("cookie"))
            .respond_with(ResponseTemplate::new(200).set_body_string("leaked"))
            .with_priority(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/live"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("set-cookie", "session=abc; Path=/")
                    .set_body_string("fresh"),
            )
            .mount(&mock_server)
            .await;

        let transport = HttpTransport::new().unwrap();
        let url = format!("{}/live", mock_server.uri());
        for _ in 0..2 {
            let content = transport
                .render(&url, Duration::from_secs(5), Duration::ZERO)
                .await
                .unwrap();
            assert_eq!(content.body, "fresh");
        }
    }
}
