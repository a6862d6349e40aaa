//! Page fetching and link extraction.
//!
//! This module provides:
//! - The [`Fetcher`] protocol and its `reqwest`-backed implementation
//! - HTML link extraction with relative-reference resolution
//! - A bounded worker pool that fetches a batch in parallel
//! - Progress accounting for a running batch

mod extractor;
mod fetcher;
mod pool;
mod progress;
mod protocols;

pub use extractor::{extract_links, LinkExtractor};
pub use fetcher::HttpFetcher;
pub use pool::{FetchOutcome, FetchPool, FetchStream};
pub use progress::{BatchProgress, ProgressTracker};
pub use protocols::{FetchedBody, Fetcher};

#[cfg(test)]
pub use protocols::MockFetcher;
