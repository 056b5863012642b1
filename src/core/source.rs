//! Source adapter abstraction

use crate::core::error::FetchError;
use crate::core::quote::{QuoteMap, SourceResult};
use async_trait::async_trait;
use tracing::{debug, warn};

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn name(&self) -> &str;

    fn url(&self) -> &str;

    /// Fetches raw content and extracts whatever quotes it can.
    async fn collect_quotes(&self) -> Result<QuoteMap, FetchError>;

    /// Never fails: every error becomes an error result for this source.
    async fn fetch(&self) -> SourceResult {
        match self.collect_quotes().await {
            Ok(quotes) if quotes.is_empty() => {
                warn!(source = %self.name(), "No quotes extracted");
                SourceResult::failed(
                    self.name(),
                    self.url(),
                    FetchError::NoQuotesExtracted.to_string(),
                )
            }
            Ok(quotes) => {
                debug!(source = %self.name(), count = quotes.len(), "Collected quotes");
                SourceResult::success(self.name(), self.url(), quotes)
            }
            Err(e) => {
                warn!(source = %self.name(), error = %e, "Source failed");
                SourceResult::failed(self.name(), self.url(), e.to_string())
            }
        }
    }
}
