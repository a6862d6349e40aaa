//! Bounded pool of concurrent fetch workers.
//!
//! Every address of a batch is fetched at most once. At most `max_workers`
//! fetches are in flight at a time, each one bounded by the per-address
//! timeout. Outcomes are delivered in completion order; a failure (error,
//! timeout or panic) is reported as a failed outcome and never stops the
//! remaining fetches.

use futures::{FutureExt, Stream};
use std::any::Any;
use std::collections::BTreeSet;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, warn};
use url::Url;

use super::extractor::LinkExtractor;
use super::protocols::Fetcher;
use crate::clock::duration_millis;
use crate::config::HarvestConfig;
use crate::errors::FetchError;

/// Result of fetching and parsing a single address.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchOutcome {
    /// The address that was fetched.
    pub address: Url,
    /// Links found on the page; empty on failure.
    pub links: BTreeSet<String>,
    /// Why the fetch failed, if it did.
    pub error: Option<FetchError>,
    /// Time spent on this address in milliseconds.
    pub duration_ms: f64,
}

impl FetchOutcome {
    /// Creates a successful outcome.
    #[must_use]
    pub fn succeeded(address: Url, links: BTreeSet<String>, duration_ms: f64) -> Self {
        Self {
            address,
            links,
            error: None,
            duration_ms,
        }
    }

    /// Creates a failed outcome.
    #[must_use]
    pub fn failed(address: Url, error: FetchError, duration_ms: f64) -> Self {
        Self {
            address,
            links: BTreeSet::new(),
            error: Some(error),
            duration_ms,
        }
    }

    /// Whether the fetch succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Runs fetches for a batch with bounded parallelism.
#[derive(Clone)]
pub struct FetchPool {
    fetcher: Arc<dyn Fetcher>,
    extractor: LinkExtractor,
    max_workers: usize,
    timeout: Duration,
}

impl FetchPool {
    /// Creates a pool running at most `max_workers` fetches at once.
    #[must_use]
    pub fn new(fetcher: Arc<dyn Fetcher>, max_workers: usize, timeout: Duration) -> Self {
        Self {
            fetcher,
            extractor: LinkExtractor::default(),
            max_workers: max_workers.max(1),
            timeout,
        }
    }

    /// Creates a pool from the harvest configuration.
    #[must_use]
    pub fn from_config(fetcher: Arc<dyn Fetcher>, config: &HarvestConfig) -> Self {
        Self::new(fetcher, config.pool.max_workers, config.fetch.timeout())
            .with_extractor(LinkExtractor::new(config.normalization))
    }

    /// Sets the link extractor.
    #[must_use]
    pub fn with_extractor(mut self, extractor: LinkExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    /// Returns the worker budget.
    #[must_use]
    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Returns the per-address timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Fetches every address and streams outcomes as they settle.
    ///
    /// The stream yields exactly one outcome per address and then ends.
    /// Dropping the stream stops dispatching addresses that have not started.
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn fetch_all(&self, addresses: Vec<Url>) -> FetchStream {
        let total = addresses.len();
        let (tx, rx) = mpsc::channel(total.max(1));
        let limiter = Arc::new(Semaphore::new(self.max_workers));
        let pool = self.clone();

        tokio::spawn(async move {
            let mut tasks = JoinSet::new();
            for address in addresses {
                let Ok(permit) = Arc::clone(&limiter).acquire_owned().await else {
                    break;
                };
                if tx.is_closed() {
                    debug!("Outcome stream dropped, stopping dispatch");
                    break;
                }

                let pool = pool.clone();
                let tx = tx.clone();
                tasks.spawn(async move {
                    let outcome = pool.fetch_one(address).await;
                    drop(permit);
                    // The receiver may already be gone; nothing left to report to.
                    let _ = tx.send(outcome).await;
                });
            }
            drop(tx);

            while let Some(joined) = tasks.join_next().await {
                if let Err(err) = joined {
                    warn!(error = %err, "Fetch task ended abnormally");
                }
            }
        });

        FetchStream { rx, total }
    }

    async fn fetch_one(&self, address: Url) -> FetchOutcome {
        let started = Instant::now();
        let attempt = AssertUnwindSafe(self.fetch_and_extract(&address)).catch_unwind();

        let result = match tokio::time::timeout(self.timeout, attempt).await {
            Ok(Ok(result)) => result,
            Ok(Err(panic)) => Err(FetchError::Aborted {
                url: address.to_string(),
                reason: panic_message(panic.as_ref()),
            }),
            Err(_) => Err(FetchError::timeout(
                address.as_str(),
                duration_millis(self.timeout),
            )),
        };
        let duration_ms = started.elapsed().as_secs_f64() * 1000.0;

        match result {
            Ok(links) => {
                debug!(address = %address, links = links.len(), duration_ms, "Fetched page");
                FetchOutcome::succeeded(address, links, duration_ms)
            }
            Err(error) => {
                warn!(address = %address, kind = ?error.kind(), error = %error, "Fetch failed");
                FetchOutcome::failed(address, error, duration_ms)
            }
        }
    }

    async fn fetch_and_extract(&self, address: &Url) -> Result<BTreeSet<String>, FetchError> {
        let page = self.fetcher.fetch(address).await?;
        if !page.is_markup() {
            debug!(
                address = %address,
                content_type = page.content_type.as_deref().unwrap_or_default(),
                "Skipping non-markup response"
            );
            return Ok(BTreeSet::new());
        }

        let extractor = self.extractor;
        tokio::task::spawn_blocking(move || extractor.extract_links(&page.text(), &page.final_url))
            .await
            .map_err(|err| FetchError::Aborted {
                url: address.to_string(),
                reason: err.to_string(),
            })
    }
}

impl fmt::Debug for FetchPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchPool")
            .field("max_workers", &self.max_workers)
            .field("timeout", &self.timeout)
            .field("extractor", &self.extractor)
            .finish_non_exhaustive()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "fetch task panicked".to_string()
    }
}

/// Stream of outcomes for one batch, in completion order.
#[derive(Debug)]
pub struct FetchStream {
    rx: mpsc::Receiver<FetchOutcome>,
    total: usize,
}

impl FetchStream {
    /// Number of outcomes the stream will yield.
    #[must_use]
    pub fn total(&self) -> usize {
        self.total
    }
}

impl Stream for FetchStream {
    type Item = FetchOutcome;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scrape::protocols::{FetchedBody, MockFetcher};
    use async_trait::async_trait;
    use futures::StreamExt;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn addresses(n: usize) -> Vec<Url> {
        (0..n).map(|i| url(&format!("https://site{i}.test/"))).collect()
    }

    #[tokio::test]
    async fn test_collects_links_from_every_address() {
        let mut fetcher = MockFetcher::new();
        fetcher.expect_fetch().times(3).returning(|address| {
            Ok(FetchedBody::html(
                address.clone(),
                r#"<a href="/a">a</a><a href="https://shared.test/">s</a>"#,
            ))
        });

        let pool = FetchPool::new(Arc::new(fetcher), 2, Duration::from_secs(5));
        let stream = pool.fetch_all(addresses(3));
        assert_eq!(stream.total(), 3);

        let outcomes: Vec<FetchOutcome> = stream.collect().await;
        assert_eq!(outcomes.len(), 3);
        for outcome in &outcomes {
            assert!(outcome.is_success());
            assert!(outcome.links.contains("https://shared.test/"));
            assert!(outcome.links.contains(&outcome.address.join("/a").unwrap().to_string()));
        }
    }

    #[tokio::test]
    async fn test_failures_are_isolated() {
        let mut fetcher = MockFetcher::new();
        fetcher.expect_fetch().returning(|address| {
            if address.host_str() == Some("site1.test") {
                Err(FetchError::status(address.as_str(), 503))
            } else {
                Ok(FetchedBody::html(address.clone(), r#"<a href="/ok">ok</a>"#))
            }
        });

        let pool = FetchPool::new(Arc::new(fetcher), 4, Duration::from_secs(5));
        let outcomes: Vec<FetchOutcome> = pool.fetch_all(addresses(3)).collect().await;

        let failed: Vec<_> = outcomes.iter().filter(|o| !o.is_success()).collect();
        assert_eq!(outcomes.len(), 3);
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].address.as_str(), "https://site1.test/");
        assert!(failed[0].links.is_empty());
        assert_eq!(failed[0].error, Some(FetchError::status("https://site1.test/", 503)));
    }

    #[tokio::test]
    async fn test_panicking_fetch_becomes_aborted_outcome() {
        let mut fetcher = MockFetcher::new();
        fetcher.expect_fetch().returning(|address| {
            if address.host_str() == Some("site0.test") {
                panic!("boom");
            }
            Ok(FetchedBody::html(address.clone(), ""))
        });

        let pool = FetchPool::new(Arc::new(fetcher), 2, Duration::from_secs(5));
        let outcomes: Vec<FetchOutcome> = pool.fetch_all(addresses(2)).collect().await;

        assert_eq!(outcomes.len(), 2);
        let aborted = outcomes
            .iter()
            .find(|o| o.address.as_str() == "https://site0.test/")
            .unwrap();
        assert!(matches!(
            &aborted.error,
            Some(FetchError::Aborted { reason, .. }) if reason == "boom"
        ));
    }

    #[tokio::test]
    async fn test_non_markup_yields_no_links() {
        let mut fetcher = MockFetcher::new();
        fetcher.expect_fetch().returning(|address| {
            Ok(FetchedBody {
                content_type: Some("application/pdf".to_string()),
                ..FetchedBody::html(address.clone(), r#"<a href="/hidden">x</a>"#)
            })
        });

        let pool = FetchPool::new(Arc::new(fetcher), 1, Duration::from_secs(5));
        let outcomes: Vec<FetchOutcome> = pool.fetch_all(addresses(1)).collect().await;
        assert!(outcomes[0].is_success());
        assert!(outcomes[0].links.is_empty());
    }

    #[tokio::test]
    async fn test_redirect_target_is_resolution_base() {
        let mut fetcher = MockFetcher::new();
        fetcher.expect_fetch().returning(|_| {
            Ok(FetchedBody::html(
                Url::parse("https://moved.test/new/").unwrap(),
                r#"<a href="page">p</a>"#,
            ))
        });

        let pool = FetchPool::new(Arc::new(fetcher), 1, Duration::from_secs(5));
        let outcomes: Vec<FetchOutcome> = pool.fetch_all(addresses(1)).collect().await;
        assert!(outcomes[0].links.contains("https://moved.test/new/page"));
    }

    #[tokio::test]
    async fn test_empty_batch_ends_immediately() {
        let pool = FetchPool::new(Arc::new(MockFetcher::new()), 2, Duration::from_secs(1));
        let outcomes: Vec<FetchOutcome> = pool.fetch_all(Vec::new()).collect().await;
        assert!(outcomes.is_empty());
    }

    struct SlowFetcher {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        delay: Duration,
    }

    #[async_trait]
    impl Fetcher for SlowFetcher {
        async fn fetch(&self, url: &Url) -> Result<FetchedBody, FetchError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(FetchedBody::html(url.clone(), ""))
        }
    }

    #[tokio::test]
    async fn test_respects_worker_budget() {
        let fetcher = Arc::new(SlowFetcher {
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            delay: Duration::from_millis(30),
        });

        let pool = FetchPool::new(fetcher.clone(), 3, Duration::from_secs(5));
        let outcomes: Vec<FetchOutcome> = pool.fetch_all(addresses(10)).collect().await;

        assert_eq!(outcomes.len(), 10);
        let peak = fetcher.peak.load(Ordering::SeqCst);
        assert!(peak <= 3, "peak concurrency {peak} exceeded budget");
        assert!(peak >= 2, "expected parallel fetches, peak was {peak}");
    }

    #[tokio::test]
    async fn test_timeout_reports_failure() {
        let fetcher = Arc::new(SlowFetcher {
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            delay: Duration::from_secs(5),
        });

        let pool = FetchPool::new(fetcher, 2, Duration::from_millis(50));
        let outcomes: Vec<FetchOutcome> = pool.fetch_all(addresses(2)).collect().await;

        assert_eq!(outcomes.len(), 2);
        for outcome in outcomes {
            assert!(matches!(
                outcome.error,
                Some(FetchError::Timeout { timeout_ms: 50, .. })
            ));
        }
    }
}
