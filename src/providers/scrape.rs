use super::extract::{Document, Heuristic, extract_quotes};
use crate::core::{FetchError, QuoteMap, SourceAdapter, Transport};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    Get,
    /// Load through a browsing context and wait `settle` for late content.
    Render { settle: Duration },
}

/// Quotes read off the source's own page with the heuristic chain.
pub struct ScrapeSource {
    name: String,
    url: String,
    transport: Arc<dyn Transport>,
    mode: FetchMode,
    timeout: Duration,
    chain: Vec<Heuristic>,
}

impl ScrapeSource {
    pub fn new(name: &str, url: &str, transport: Arc<dyn Transport>, mode: FetchMode) -> Self {
        ScrapeSource {
            name: name.to_string(),
            url: url.to_string(),
            transport,
            mode,
            timeout: Duration::from_secs(15),
            chain: Heuristic::default_chain(48),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_chain(mut self, chain: Vec<Heuristic>) -> Self {
        self.chain = chain;
        self
    }
}

#[async_trait]
impl SourceAdapter for ScrapeSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn url(&self) -> &str {
        &self.url
    }

    #[instrument(name = "ScrapeSourceFetch", skip(self), fields(source = %self.name))]
    async fn collect_quotes(&self) -> Result<QuoteMap, FetchError> {
        let content = match self.mode {
            FetchMode::Get => self.transport.get(&self.url, self.timeout).await?,
            FetchMode::Render { settle } => {
                self.transport.render(&self.url, self.timeout, settle).await?
            }
        };
        debug!(bytes = content.body.len(), "Fetched page");

        let document = Document::parse(&content.body);
        extract_quotes(&document, &self.chain)
    }
}
