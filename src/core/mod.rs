//! Core abstractions and shared types

pub mod config;
pub mod error;
pub mod log;
pub mod quote;
pub mod reference;
pub mod source;
pub mod transport;

// Re-export main types for cleaner imports
pub use error::FetchError;
pub use quote::{AggregateResult, CurrencyCode, Quote, QuoteMap, SourceResult, SourceStatus};
pub use reference::{ReferenceRateProvider, ReferenceRates};
pub use source::SourceAdapter;
pub use transport::{Browser, BrowsingContext, RawContent, Transport};
