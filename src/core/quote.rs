//! Quote types shared by every source and by the aggregated response

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub enum CurrencyCode {
    USD,
    EUR,
    GBP,
    CHF,
    /// Troy ounce of gold, priced in the base currency.
    XAU,
}

impl CurrencyCode {
    pub const ALL: [CurrencyCode; 5] = [
        CurrencyCode::USD,
        CurrencyCode::EUR,
        CurrencyCode::GBP,
        CurrencyCode::CHF,
        CurrencyCode::XAU,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CurrencyCode::USD => "USD",
            CurrencyCode::EUR => "EUR",
            CurrencyCode::GBP => "GBP",
            CurrencyCode::CHF => "CHF",
            CurrencyCode::XAU => "XAU",
        }
    }

    /// Upper-case labels exchange offices use for this code in their tables.
    /// The ISO code always comes first.
    pub fn labels(&self) -> &'static [&'static str] {
        match self {
            CurrencyCode::USD => &["USD", "DOLAR", "AMERIKAN DOLARI", "US DOLLAR"],
            CurrencyCode::EUR => &["EUR", "EURO", "AVRO"],
            CurrencyCode::GBP => &["GBP", "STERLIN", "INGILIZ STERLINI", "POUND"],
            CurrencyCode::CHF => &["CHF", "FRANK", "ISVICRE FRANGI", "SWISS FRANC"],
            CurrencyCode::XAU => &["XAU", "ONS", "ONS ALTIN", "GOLD OUNCE"],
        }
    }

    pub fn is_gold(&self) -> bool {
        matches!(self, CurrencyCode::XAU)
    }

    /// Decimal places a quote for this code is rounded to.
    pub fn scale(&self) -> u32 {
        if self.is_gold() { 2 } else { 4 }
    }
}

impl Display for CurrencyCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A buy/sell pair. Both sides are always strictly positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    pub currency: CurrencyCode,
    pub buy: Decimal,
    pub sell: Decimal,
}

impl Quote {
    /// Returns `None` when either side is zero or negative.
    pub fn new(currency: CurrencyCode, buy: Decimal, sell: Decimal) -> Option<Self> {
        if buy > Decimal::ZERO && sell > Decimal::ZERO {
            Some(Quote {
                currency,
                buy,
                sell,
            })
        } else {
            None
        }
    }
}

pub type QuoteMap = BTreeMap<CurrencyCode, Quote>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceStatus {
    Success,
    Error,
}

/// Outcome of one source for one aggregation round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceResult {
    #[serde(rename = "source")]
    pub source_name: String,
    #[serde(rename = "url")]
    pub source_url: String,
    #[serde(rename = "rates")]
    pub quotes: QuoteMap,
    #[serde(rename = "last_updated")]
    pub observed_at: DateTime<Utc>,
    pub status: SourceStatus,
    #[serde(rename = "error_message")]
    pub error_detail: Option<String>,
}

impl SourceResult {
    pub fn success(name: &str, url: &str, quotes: QuoteMap) -> Self {
        SourceResult {
            source_name: name.to_string(),
            source_url: url.to_string(),
            quotes,
            observed_at: Utc::now(),
            status: SourceStatus::Success,
            error_detail: None,
        }
    }

    pub fn failed(name: &str, url: &str, detail: impl Into<String>) -> Self {
        SourceResult {
            source_name: name.to_string(),
            source_url: url.to_string(),
            quotes: QuoteMap::new(),
            observed_at: Utc::now(),
            status: SourceStatus::Error,
            error_detail: Some(detail.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == SourceStatus::Success
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateResult {
    #[serde(rename = "sources")]
    pub results: Vec<SourceResult>,
    #[serde(rename = "timestamp")]
    pub observed_at: DateTime<Utc>,
}

impl AggregateResult {
    pub fn new(results: Vec<SourceResult>) -> Self {
        AggregateResult {
            results,
            observed_at: Utc::now(),
        }
    }

    pub fn success_count(&self) -> usize {
        self.results.iter().filter(|r| r.is_success()).count()
    }
}
