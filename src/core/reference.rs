//! Reference (mid-market) rate abstractions

use crate::core::error::FetchError;
use crate::core::quote::CurrencyCode;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::BTreeMap;

/// Mid rates expressed in the base currency, one per code the provider knew.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReferenceRates {
    pub provider: String,
    pub mids: BTreeMap<CurrencyCode, Decimal>,
}

impl ReferenceRates {
    pub fn mid(&self, code: CurrencyCode) -> Option<Decimal> {
        self.mids.get(&code).copied()
    }
}

#[async_trait]
pub trait ReferenceRateProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch_mids(&self) -> Result<ReferenceRates, FetchError>;
}
