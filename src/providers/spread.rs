use crate::core::{
    CurrencyCode, FetchError, Quote, QuoteMap, ReferenceRateProvider, SourceAdapter,
};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Quotes derived from the shared reference mid-rate, widened by this
/// source's spread: `buy = mid * (1 - spread)`, `sell = mid * (1 + spread)`.
pub struct SpreadSource {
    name: String,
    url: String,
    spread: Decimal,
    reference: Arc<dyn ReferenceRateProvider>,
}

impl SpreadSource {
    pub fn new(
        name: &str,
        url: &str,
        spread: Decimal,
        reference: Arc<dyn ReferenceRateProvider>,
    ) -> Self {
        SpreadSource {
            name: name.to_string(),
            url: url.to_string(),
            spread,
            reference,
        }
    }

    fn quote(&self, code: CurrencyCode, mid: Decimal) -> Option<Quote> {
        let scale = code.scale();
        let buy = (mid * (Decimal::ONE - self.spread)).round_dp(scale);
        let sell = (mid * (Decimal::ONE + self.spread)).round_dp(scale);
        Quote::new(code, buy, sell)
    }
}

#[async_trait]
impl SourceAdapter for SpreadSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn url(&self) -> &str {
        &self.url
    }

    #[instrument(name = "SpreadSourceFetch", skip(self), fields(source = %self.name))]
    async fn collect_quotes(&self) -> Result<QuoteMap, FetchError> {
        let rates = self.reference.fetch_mids().await.map_err(|e| match e {
            FetchError::ReferenceRateUnavailable(_) => e,
            other => FetchError::ReferenceRateUnavailable(other.to_string()),
        })?;
        debug!(provider = %rates.provider, "Using reference rates");

        let quotes = rates
            .mids
            .iter()
            .filter_map(|(code, mid)| self.quote(*code, *mid).map(|q| (*code, q)))
            .collect();
        Ok(quotes)
    }
}
