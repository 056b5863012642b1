//! Fetch transport abstractions
//!
//! Plain documents go through [`Transport::get`]. Pages that only fill in
//! their prices client-side go through [`Transport::render`], which loads the
//! page inside a [`BrowsingContext`] opened just for that call.

use crate::core::error::FetchError;
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawContent {
    pub url: String,
    pub body: String,
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: &str, timeout: Duration) -> Result<RawContent, FetchError>;

    async fn render(
        &self,
        url: &str,
        timeout: Duration,
        settle_delay: Duration,
    ) -> Result<RawContent, FetchError>;
}

/// Opaque page-rendering capability.
#[async_trait]
pub trait Browser: Send + Sync {
    /// Opens a context that shares no cookies or session with any other.
    async fn open_context(&self) -> Result<Box<dyn BrowsingContext>, FetchError>;
}

#[async_trait]
pub trait BrowsingContext: Send {
    /// Loads `url`, waits `settle_delay` for late content and returns the document.
    async fn load(&mut self, url: &str, settle_delay: Duration) -> Result<String, FetchError>;

    /// Tears the context down. Called exactly once by [`ContextGuard`].
    fn close(&mut self);
}

/// Owns a browsing context for the span of one render call and closes it on
/// drop, including when the render future is cancelled by a timeout.
pub struct ContextGuard {
    context: Option<Box<dyn BrowsingContext>>,
}

impl ContextGuard {
    pub fn new(context: Box<dyn BrowsingContext>) -> Self {
        Self {
            context: Some(context),
        }
    }

    pub async fn load(&mut self, url: &str, settle_delay: Duration) -> Result<String, FetchError> {
        match self.context.as_mut() {
            Some(context) => context.load(url, settle_delay).await,
            None => Err(FetchError::TransportFailure(
                "browsing context already closed".to_string(),
            )),
        }
    }
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        if let Some(mut context) = self.context.take() {
            context.close();
            debug!("Browsing context closed");
        }
    }
}
