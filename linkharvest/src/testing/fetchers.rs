//! Scripted fetchers for tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use url::Url;

use crate::errors::FetchError;
use crate::scrape::{FetchedBody, Fetcher};

#[derive(Debug, Clone)]
enum Reply {
    Page {
        body: String,
        content_type: Option<String>,
        final_url: Option<Url>,
    },
    Fail(FetchError),
    Panic(String),
}

#[derive(Debug, Clone)]
struct Route {
    reply: Reply,
    delay: Option<Duration>,
}

/// A fetcher that serves canned responses keyed by address.
///
/// Unknown addresses answer with HTTP 404. Every call is recorded, and the
/// peak number of concurrent calls is tracked.
#[derive(Debug, Default)]
pub struct StaticFetcher {
    routes: HashMap<String, Route>,
    default_delay: Duration,
    calls: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

fn route_key(address: &str) -> String {
    Url::parse(address).map_or_else(|_| address.to_string(), String::from)
}

impl StaticFetcher {
    /// Creates a fetcher with no routes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn route(mut self, address: &str, reply: Reply, delay: Option<Duration>) -> Self {
        self.routes.insert(route_key(address), Route { reply, delay });
        self
    }

    /// Serves `body` as HTML.
    #[must_use]
    pub fn with_page(self, address: &str, body: impl Into<String>) -> Self {
        self.with_page_delayed(address, body, None::<Duration>)
    }

    /// Serves `body` as HTML after `delay`.
    #[must_use]
    pub fn with_page_delayed(
        self,
        address: &str,
        body: impl Into<String>,
        delay: impl Into<Option<Duration>>,
    ) -> Self {
        let reply = Reply::Page {
            body: body.into(),
            content_type: Some("text/html; charset=utf-8".to_string()),
            final_url: None,
        };
        self.route(address, reply, delay.into())
    }

    /// Serves `body` with an explicit content type.
    #[must_use]
    pub fn with_content(self, address: &str, content_type: &str, body: impl Into<String>) -> Self {
        let reply = Reply::Page {
            body: body.into(),
            content_type: Some(content_type.to_string()),
            final_url: None,
        };
        self.route(address, reply, None)
    }

    /// Serves `body` as if the request had been redirected to `target`.
    ///
    /// # Panics
    ///
    /// Panics if `target` is not an absolute URL.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn with_redirect(self, address: &str, target: &str, body: impl Into<String>) -> Self {
        let reply = Reply::Page {
            body: body.into(),
            content_type: Some("text/html".to_string()),
            final_url: Some(Url::parse(target).expect("redirect target must be absolute")),
        };
        self.route(address, reply, None)
    }

    /// Fails with `error`.
    #[must_use]
    pub fn with_error(self, address: &str, error: FetchError) -> Self {
        self.route(address, Reply::Fail(error), None)
    }

    /// Fails with an HTTP status.
    #[must_use]
    pub fn with_status(self, address: &str, status: u16) -> Self {
        let error = FetchError::status(route_key(address), status);
        self.with_error(address, error)
    }

    /// Panics while fetching, simulating a crashing worker.
    #[must_use]
    pub fn with_panic(self, address: &str, message: &str) -> Self {
        self.route(address, Reply::Panic(message.to_string()), None)
    }

    /// Never answers within any sensible timeout.
    #[must_use]
    pub fn with_hang(self, address: &str) -> Self {
        let reply = Reply::Page {
            body: String::new(),
            content_type: None,
            final_url: None,
        };
        self.route(address, reply, Some(Duration::from_secs(3600)))
    }

    /// Delay applied to routes without their own delay.
    #[must_use]
    pub fn with_default_delay(mut self, delay: Duration) -> Self {
        self.default_delay = delay;
        self
    }

    /// Addresses requested so far, in call order.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// How often `address` was requested.
    #[must_use]
    pub fn call_count(&self, address: &str) -> usize {
        let key = route_key(address);
        self.calls.lock().iter().filter(|call| **call == key).count()
    }

    /// Highest number of overlapping calls observed.
    #[must_use]
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Fetcher for StaticFetcher {
    async fn fetch(&self, url: &Url) -> Result<FetchedBody, FetchError> {
        let key = url.to_string();
        self.calls.lock().push(key.clone());

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _in_flight = InFlight(&self.in_flight);
        self.peak.fetch_max(now, Ordering::SeqCst);

        let Some(route) = self.routes.get(&key).cloned() else {
            if !self.default_delay.is_zero() {
                tokio::time::sleep(self.default_delay).await;
            }
            return Err(FetchError::status(key, 404));
        };

        let delay = route.delay.unwrap_or(self.default_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        match route.reply {
            Reply::Page {
                body,
                content_type,
                final_url,
            } => Ok(FetchedBody {
                content_type,
                ..FetchedBody::html(final_url.unwrap_or_else(|| url.clone()), body)
            }),
            Reply::Fail(error) => Err(error),
            Reply::Panic(message) => panic!("{message}"),
        }
    }
}
