//! Error kinds a source can fail with.
//!
//! None of these escape a [`SourceAdapter`](crate::core::source::SourceAdapter):
//! they end up as the `error_detail` of an error [`SourceResult`](crate::core::SourceResult).

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("TransportTimeout: {url} did not respond within {after:?}")]
    TransportTimeout { url: String, after: Duration },

    #[error("TransportFailure: {0}")]
    TransportFailure(String),

    #[error("ReferenceRateUnavailable: {0}")]
    ReferenceRateUnavailable(String),

    #[error("NoQuotesExtracted")]
    NoQuotesExtracted,

    #[error("MalformedQuote: {0}")]
    MalformedQuote(String),
}

impl FetchError {
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            FetchError::TransportTimeout { .. } | FetchError::TransportFailure(_)
        )
    }

    /// Maps a reqwest error, keeping timeouts distinct from other network failures.
    pub fn from_reqwest(err: reqwest::Error, url: &str, timeout: Duration) -> Self {
        if err.is_timeout() {
            FetchError::TransportTimeout {
                url: url.to_string(),
                after: timeout,
            }
        } else {
            FetchError::TransportFailure(format!("{err} ({url})"))
        }
    }
}
