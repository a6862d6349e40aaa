//! Host-facing facade tying sessions, batches and the reaper together.

use std::sync::Arc;
use tracing::info;

use crate::clock::{Clock, SystemClock};
use crate::config::HarvestConfig;
use crate::errors::HarvestError;
use crate::events::{EventSink, NoOpEventSink};
use crate::filter::FilterSet;
use crate::orchestrator::{BatchHandle, BatchOrchestrator, BatchReport};
use crate::scrape::{Fetcher, HttpFetcher};
use crate::session::{SessionReaper, SessionStatus, SessionStore, UserId};

/// Builder for [`LinkHarvester`].
pub struct HarvesterBuilder {
    config: HarvestConfig,
    fetcher: Option<Arc<dyn Fetcher>>,
    clock: Arc<dyn Clock>,
    event_sink: Arc<dyn EventSink>,
}

impl HarvesterBuilder {
    /// Starts from a configuration.
    #[must_use]
    pub fn new(config: HarvestConfig) -> Self {
        Self {
            config,
            fetcher: None,
            clock: Arc::new(SystemClock::new()),
            event_sink: Arc::new(NoOpEventSink),
        }
    }

    /// Uses a custom fetcher instead of the HTTP one.
    #[must_use]
    pub fn with_fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Uses a custom clock for session activity.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Sets the event sink shared by all components.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    /// Validates the configuration and assembles the harvester.
    pub fn build(self) -> Result<LinkHarvester, HarvestError> {
        self.config.validate()?;

        let fetcher: Arc<dyn Fetcher> = match self.fetcher {
            Some(fetcher) => fetcher,
            None => Arc::new(HttpFetcher::new(self.config.fetch.clone())?),
        };
        let store = Arc::new(
            SessionStore::new(self.clock).with_event_sink(Arc::clone(&self.event_sink)),
        );
        let orchestrator = BatchOrchestrator::from_config(Arc::clone(&store), fetcher, &self.config)
            .with_event_sink(self.event_sink);
        let reaper = SessionReaper::from_config(Arc::clone(&store), &self.config.session);

        Ok(LinkHarvester {
            config: self.config,
            store,
            orchestrator: Arc::new(orchestrator),
            reaper,
        })
    }
}

impl std::fmt::Debug for HarvesterBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HarvesterBuilder")
            .field("config", &self.config)
            .field("custom_fetcher", &self.fetcher.is_some())
            .finish_non_exhaustive()
    }
}

/// Entry point for hosts: chat bots, web handlers or the bundled CLI.
///
/// ```rust,ignore
/// let harvester = LinkHarvester::new(HarvestConfig::default())?;
/// harvester.start();
///
/// harvester.set_filters("alice", Some("news"), None).await;
/// let mut batch = harvester.submit_batch("alice", ["https://example.com"]);
/// while let Some(event) = batch.next().await {
///     println!("{event:?}");
/// }
///
/// harvester.shutdown().await;
/// ```
#[derive(Debug)]
pub struct LinkHarvester {
    config: HarvestConfig,
    store: Arc<SessionStore>,
    orchestrator: Arc<BatchOrchestrator>,
    reaper: SessionReaper,
}

impl LinkHarvester {
    /// Creates a harvester with the HTTP fetcher and system clock.
    pub fn new(config: HarvestConfig) -> Result<Self, HarvestError> {
        HarvesterBuilder::new(config).build()
    }

    /// Returns a builder.
    #[must_use]
    pub fn builder(config: HarvestConfig) -> HarvesterBuilder {
        HarvesterBuilder::new(config)
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &HarvestConfig {
        &self.config
    }

    /// The session store.
    #[must_use]
    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// The session reaper.
    #[must_use]
    pub fn reaper(&self) -> &SessionReaper {
        &self.reaper
    }

    /// Records a user interaction, creating the session if needed.
    pub fn on_interaction(&self, user: impl Into<UserId>) {
        self.store.touch(&user.into());
    }

    /// Replaces the user's include and/or exclude keywords.
    ///
    /// Waits for a running batch of the same user to finish first.
    pub async fn set_filters(
        &self,
        user: impl Into<UserId>,
        include: Option<&str>,
        exclude: Option<&str>,
    ) -> FilterSet {
        self.store.set_filters(&user.into(), include, exclude).await
    }

    /// Starts a batch and returns a handle streaming its events.
    pub fn submit_batch<I, S>(&self, user: impl Into<UserId>, candidates: I) -> BatchHandle
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.orchestrator.submit_batch(&user.into(), candidates)
    }

    /// Runs a batch to completion.
    pub async fn run_batch<I, S>(
        &self,
        user: impl Into<UserId>,
        candidates: I,
    ) -> Result<BatchReport, HarvestError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.orchestrator.run_batch(&user.into(), candidates).await
    }

    /// Clears the user's filters and collected links.
    pub async fn reset(&self, user: impl Into<UserId>) {
        self.store.reset(&user.into()).await;
    }

    /// Reports the user's filters and link counts.
    pub fn status(&self, user: impl Into<UserId>) -> SessionStatus {
        self.store.status(&user.into())
    }

    /// Collected links passing the user's filters.
    pub fn filtered_links(&self, user: impl Into<UserId>) -> Vec<String> {
        self.store.touch(&user.into()).filtered_links()
    }

    /// Starts the session reaper. Returns false if it was already running.
    pub fn start(&self) -> bool {
        let started = self.reaper.start();
        if started {
            info!(workers = self.config.pool.max_workers, "Link harvester started");
        }
        started
    }

    /// Stops the session reaper.
    pub async fn shutdown(&self) {
        self.reaper.stop().await;
        info!(sessions = self.store.len(), "Link harvester stopped");
    }
}
