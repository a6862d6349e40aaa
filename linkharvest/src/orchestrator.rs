//! Drives a batch from raw candidates to a filtered link list.
//!
//! A batch validates its candidates, waits for the session's batch lock,
//! fetches every valid address through the [`FetchPool`], merges the links
//! into the session as outcomes arrive and finally reports the filtered view.
//! Progress is best-effort; the final result is not.

use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::address::AddressList;
use crate::config::HarvestConfig;
use crate::errors::HarvestError;
use crate::events::{EventSink, NoOpEventSink};
use crate::scrape::{BatchProgress, FetchPool, Fetcher, ProgressTracker};
use crate::session::{SessionStore, UserId};

/// Terminal result of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BatchOutcome {
    /// Filtered links, sorted and unique.
    Links {
        /// The links.
        links: Vec<String>,
    },
    /// No candidate was a valid address.
    EmptyInput {
        /// The rejected candidates.
        rejected: Vec<String>,
    },
    /// Fetching finished but no collected link passes the filters.
    NoMatches {
        /// Links collected in the session, before filtering.
        collected: usize,
    },
}

impl BatchOutcome {
    /// The filtered links; empty unless this is [`BatchOutcome::Links`].
    #[must_use]
    pub fn links(&self) -> &[String] {
        match self {
            Self::Links { links } => links,
            Self::EmptyInput { .. } | Self::NoMatches { .. } => &[],
        }
    }

    /// Short name used in logs and events.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Links { .. } => "links",
            Self::EmptyInput { .. } => "empty_input",
            Self::NoMatches { .. } => "no_matches",
        }
    }
}

/// Event delivered to the host while a submitted batch runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BatchEvent {
    /// The batch was accepted.
    Started {
        /// Batch identifier.
        batch_id: Uuid,
        /// Number of addresses to fetch.
        total: usize,
        /// Candidates rejected by validation.
        rejected: Vec<String>,
    },
    /// Periodic progress.
    Progress(BatchProgress),
    /// The batch finished.
    Finished(BatchOutcome),
}

/// Summary of a finished batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    /// Batch identifier.
    pub batch_id: Uuid,
    /// Session owner.
    pub user: UserId,
    /// Terminal result.
    pub outcome: BatchOutcome,
    /// Number of addresses fetched.
    pub total: usize,
    /// Successful fetches.
    pub succeeded: usize,
    /// Failed fetches.
    pub failed: usize,
    /// Candidates rejected by validation.
    pub rejected: Vec<String>,
    /// Links collected in the session after the batch.
    pub collected: usize,
    /// Progress updates dropped because the host was slow.
    pub dropped_progress: u64,
    /// When the batch started.
    pub started_at: DateTime<Utc>,
    /// When the batch finished.
    pub finished_at: DateTime<Utc>,
    /// Wall time in milliseconds, including time spent queued.
    pub duration_ms: f64,
}

impl BatchReport {
    /// Filtered links, failing when the batch had no valid address.
    pub fn into_links(self) -> Result<Vec<String>, HarvestError> {
        match self.outcome {
            BatchOutcome::Links { links } => Ok(links),
            BatchOutcome::NoMatches { .. } => Ok(Vec::new()),
            BatchOutcome::EmptyInput { rejected } => Err(HarvestError::EmptyBatch {
                rejected: rejected.len(),
            }),
        }
    }

    /// Converts to a JSON value.
    #[must_use]
    pub fn to_dict(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

/// Sends events to a submitted batch's handle.
struct Reporter {
    tx: Option<mpsc::Sender<BatchEvent>>,
    dropped: u64,
}

impl Reporter {
    fn silent() -> Self {
        Self {
            tx: None,
            dropped: 0,
        }
    }

    fn to(tx: mpsc::Sender<BatchEvent>) -> Self {
        Self {
            tx: Some(tx),
            dropped: 0,
        }
    }

    fn offer(&mut self, event: BatchEvent) {
        let Some(tx) = &self.tx else {
            return;
        };
        match tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped += 1;
                debug!(dropped = self.dropped, "Event channel full, dropping progress");
            }
            Err(TrySendError::Closed(_)) => {
                self.dropped += 1;
            }
        }
    }

    async fn finish(&self, outcome: BatchOutcome) -> Result<(), HarvestError> {
        let Some(tx) = &self.tx else {
            return Ok(());
        };
        tx.send(BatchEvent::Finished(outcome))
            .await
            .map_err(|_| HarvestError::delivery("batch handle dropped before the result was delivered"))
    }
}

/// Runs batches against a shared session store.
pub struct BatchOrchestrator {
    store: Arc<SessionStore>,
    pool: FetchPool,
    progress_steps: usize,
    progress_buffer: usize,
    event_sink: Arc<dyn EventSink>,
}

impl BatchOrchestrator {
    /// Creates an orchestrator reporting progress every 20%.
    #[must_use]
    pub fn new(store: Arc<SessionStore>, pool: FetchPool) -> Self {
        Self {
            store,
            pool,
            progress_steps: 5,
            progress_buffer: 32,
            event_sink: Arc::new(NoOpEventSink),
        }
    }

    /// Creates an orchestrator from the harvest configuration.
    #[must_use]
    pub fn from_config(
        store: Arc<SessionStore>,
        fetcher: Arc<dyn Fetcher>,
        config: &HarvestConfig,
    ) -> Self {
        Self::new(store, FetchPool::from_config(fetcher, config))
            .with_progress_steps(config.pool.progress_steps)
            .with_progress_buffer(config.pool.progress_buffer)
    }

    /// Sets the number of progress reports per batch.
    #[must_use]
    pub fn with_progress_steps(mut self, steps: usize) -> Self {
        self.progress_steps = steps.max(1);
        self
    }

    /// Sets the capacity of a submitted batch's event channel.
    #[must_use]
    pub fn with_progress_buffer(mut self, capacity: usize) -> Self {
        self.progress_buffer = capacity.max(1);
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    /// The session store.
    #[must_use]
    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// The fetch pool.
    #[must_use]
    pub fn pool(&self) -> &FetchPool {
        &self.pool
    }

    /// Runs a batch to completion without streaming events.
    pub async fn run_batch<I, S>(&self, user: &UserId, candidates: I) -> Result<BatchReport, HarvestError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let addresses = AddressList::from_candidates(candidates);
        self.execute(user, addresses, &mut Reporter::silent()).await
    }

    /// Starts a batch in the background and returns a handle streaming its
    /// events.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn submit_batch<I, S>(self: &Arc<Self>, user: &UserId, candidates: I) -> BatchHandle
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let addresses = AddressList::from_candidates(candidates);
        let (tx, rx) = mpsc::channel(self.progress_buffer);
        let orchestrator = Arc::clone(self);
        let user = user.clone();

        let task = tokio::spawn(async move {
            let mut reporter = Reporter::to(tx);
            orchestrator.execute(&user, addresses, &mut reporter).await
        });

        BatchHandle { events: rx, task }
    }

    async fn execute(
        &self,
        user: &UserId,
        addresses: AddressList,
        reporter: &mut Reporter,
    ) -> Result<BatchReport, HarvestError> {
        let batch_id = Uuid::new_v4();
        let started_at = Utc::now();
        let started = Instant::now();
        let AddressList { valid, rejected } = addresses;

        for candidate in &rejected {
            let err = HarvestError::InvalidAddress(candidate.clone());
            warn!(user = %user, batch_id = %batch_id, error = %err, "Rejected candidate");
            self.event_sink.try_emit(
                "batch.address_rejected",
                Some(serde_json::json!({
                    "batch_id": batch_id.to_string(),
                    "user": user.as_str(),
                    "candidate": candidate,
                })),
            );
        }

        let lease = self.store.lease(user);
        let session = Arc::clone(lease.session());

        if valid.is_empty() {
            info!(user = %user, batch_id = %batch_id, rejected = rejected.len(), "Batch has no valid addresses");
            let outcome = BatchOutcome::EmptyInput {
                rejected: rejected.clone(),
            };
            let report = BatchReport {
                batch_id,
                user: user.clone(),
                outcome: outcome.clone(),
                total: 0,
                succeeded: 0,
                failed: 0,
                rejected,
                collected: session.collected_count(),
                dropped_progress: 0,
                started_at,
                finished_at: Utc::now(),
                duration_ms: started.elapsed().as_secs_f64() * 1000.0,
            };
            self.event_sink
                .emit("batch.completed", Some(report.to_dict()))
                .await;
            self.deliver(user, reporter, outcome).await?;
            return Ok(report);
        }

        let total = valid.len();
        reporter.offer(BatchEvent::Started {
            batch_id,
            total,
            rejected: rejected.clone(),
        });
        self.event_sink
            .emit(
                "batch.started",
                Some(serde_json::json!({
                    "batch_id": batch_id.to_string(),
                    "user": user.as_str(),
                    "total": total,
                    "rejected": rejected.len(),
                })),
            )
            .await;

        let guard = session.lock_batch().await;
        info!(user = %user, batch_id = %batch_id, total, "Batch started");

        let mut tracker = ProgressTracker::new(total, self.progress_steps);
        let mut outcomes = self.pool.fetch_all(valid);
        while let Some(mut outcome) = outcomes.next().await {
            if let Some(err) = &outcome.error {
                self.event_sink.try_emit(
                    "fetch.failed",
                    Some(serde_json::json!({
                        "batch_id": batch_id.to_string(),
                        "address": outcome.address.as_str(),
                        "kind": err.kind(),
                        "error": err.to_string(),
                    })),
                );
            }

            let collected = session.merge(&guard, std::mem::take(&mut outcome.links));
            if let Some(progress) = tracker.record(&outcome, collected) {
                info!(
                    user = %user,
                    completed = progress.completed,
                    total = progress.total,
                    collected = progress.collected,
                    "Batch progress"
                );
                self.event_sink.try_emit(
                    "batch.progress",
                    serde_json::to_value(&progress).ok(),
                );
                reporter.offer(BatchEvent::Progress(progress));
            }
        }

        let filtered = session.filtered_links();
        let collected = session.collected_count();
        drop(guard);

        let outcome = if filtered.is_empty() {
            BatchOutcome::NoMatches { collected }
        } else {
            BatchOutcome::Links { links: filtered }
        };

        let progress = tracker.snapshot();
        if reporter.dropped > 0 {
            warn!(user = %user, batch_id = %batch_id, dropped = reporter.dropped, "Progress updates dropped");
        }
        let report = BatchReport {
            batch_id,
            user: user.clone(),
            outcome: outcome.clone(),
            total,
            succeeded: progress.success_count,
            failed: progress.error_count,
            rejected,
            collected,
            dropped_progress: reporter.dropped,
            started_at,
            finished_at: Utc::now(),
            duration_ms: started.elapsed().as_secs_f64() * 1000.0,
        };
        info!(
            user = %user,
            batch_id = %batch_id,
            outcome = outcome.kind(),
            succeeded = report.succeeded,
            failed = report.failed,
            collected,
            matched = outcome.links().len(),
            "Batch completed"
        );
        self.event_sink
            .emit("batch.completed", Some(report.to_dict()))
            .await;

        self.deliver(user, reporter, outcome).await?;
        drop(lease);
        Ok(report)
    }

    async fn deliver(
        &self,
        user: &UserId,
        reporter: &Reporter,
        outcome: BatchOutcome,
    ) -> Result<(), HarvestError> {
        reporter.finish(outcome).await.map_err(|err| {
            error!(user = %user, error = %err, "Could not deliver batch result; collected links are kept");
            err
        })
    }
}

impl std::fmt::Debug for BatchOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchOrchestrator")
            .field("pool", &self.pool)
            .field("progress_steps", &self.progress_steps)
            .field("progress_buffer", &self.progress_buffer)
            .finish_non_exhaustive()
    }
}

/// Handle to a submitted batch.
///
/// Yields [`BatchEvent`]s as a [`Stream`]; the last event is
/// [`BatchEvent::Finished`]. Dropping the handle before that event arrives
/// turns the batch into a delivery failure, though the session keeps every
/// link collected so far.
#[derive(Debug)]
pub struct BatchHandle {
    events: mpsc::Receiver<BatchEvent>,
    task: JoinHandle<Result<BatchReport, HarvestError>>,
}

impl BatchHandle {
    /// Drains remaining events and waits for the report.
    pub async fn join(self) -> Result<BatchReport, HarvestError> {
        self.collect_events().await.1
    }

    /// Drains remaining events and returns them together with the report.
    pub async fn collect_events(mut self) -> (Vec<BatchEvent>, Result<BatchReport, HarvestError>) {
        let mut events = Vec::new();
        while let Some(event) = self.events.recv().await {
            events.push(event);
        }
        let result = match self.task.await {
            Ok(result) => result,
            Err(err) => Err(HarvestError::Internal(format!("batch task failed: {err}"))),
        };
        (events, result)
    }

    /// Closes the event stream without waiting.
    ///
    /// The batch keeps running; its result becomes a delivery failure.
    pub fn detach(self) -> JoinHandle<Result<BatchReport, HarvestError>> {
        let Self { events, task } = self;
        drop(events);
        task
    }
}

impl Stream for BatchHandle {
    type Item = BatchEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().events.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::errors::FetchError;
    use crate::events::CollectingEventSink;
    use crate::scrape::{FetchedBody, MockFetcher};
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use url::Url;

    fn orchestrator(fetcher: MockFetcher) -> (Arc<BatchOrchestrator>, Arc<CollectingEventSink>) {
        let store = Arc::new(SessionStore::new(Arc::new(ManualClock::new())));
        let pool = FetchPool::new(Arc::new(fetcher), 4, Duration::from_secs(5));
        let sink = Arc::new(CollectingEventSink::new());
        let orchestrator = BatchOrchestrator::new(store, pool).with_event_sink(sink.clone());
        (Arc::new(orchestrator), sink)
    }

    fn page(address: &Url) -> Result<FetchedBody, FetchError> {
        let body = format!(
            r#"<a href="/news/{host}">n</a><a href="/ads/{host}">a</a>"#,
            host = address.host_str().unwrap_or_default()
        );
        Ok(FetchedBody::html(address.clone(), body))
    }

    #[tokio::test]
    async fn test_run_batch_collects_and_filters() {
        let mut fetcher = MockFetcher::new();
        fetcher.expect_fetch().times(2).returning(|address| page(address));
        let (orchestrator, sink) = orchestrator(fetcher);
        let user = UserId::from("u");

        orchestrator
            .store()
            .set_filters(&user, Some("news"), None)
            .await;
        let report = orchestrator
            .run_batch(&user, ["https://a.test/", "https://b.test/", "bogus"])
            .await
            .unwrap();

        assert_eq!(
            report.outcome,
            BatchOutcome::Links {
                links: vec![
                    "https://a.test/news/a.test".to_string(),
                    "https://b.test/news/b.test".to_string(),
                ]
            }
        );
        assert_eq!(report.total, 2);
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.rejected, vec!["bogus".to_string()]);
        assert_eq!(report.collected, 4);
        assert_eq!(sink.events_of_type("batch.address_rejected").len(), 1);
        assert_eq!(sink.events_of_type("batch.completed").len(), 1);
    }

    #[tokio::test]
    async fn test_empty_input_short_circuits() {
        let (orchestrator, _) = orchestrator(MockFetcher::new());
        let handle = orchestrator.submit_batch(&UserId::from("u"), ["nope", "ftp://x.test/"]);

        let (events, result) = handle.collect_events().await;
        let expected = BatchOutcome::EmptyInput {
            rejected: vec!["nope".to_string(), "ftp://x.test/".to_string()],
        };
        assert_eq!(events, vec![BatchEvent::Finished(expected.clone())]);

        let report = result.unwrap();
        assert_eq!(report.outcome, expected);
        assert!(matches!(
            report.into_links(),
            Err(HarvestError::EmptyBatch { rejected: 2 })
        ));
    }

    #[tokio::test]
    async fn test_no_matches() {
        let mut fetcher = MockFetcher::new();
        fetcher.expect_fetch().returning(|address| page(address));
        let (orchestrator, _) = orchestrator(fetcher);
        let user = UserId::from("u");

        orchestrator
            .store()
            .set_filters(&user, Some("sport"), None)
            .await;
        let report = orchestrator.run_batch(&user, ["https://a.test/"]).await.unwrap();
        assert_eq!(report.outcome, BatchOutcome::NoMatches { collected: 2 });
        assert_eq!(report.into_links().unwrap(), Vec::<String>::new());
    }

    #[tokio::test]
    async fn test_submitted_batch_streams_started_progress_finished() {
        let mut fetcher = MockFetcher::new();
        fetcher.expect_fetch().returning(|address| page(address));
        let (orchestrator, _) = orchestrator(fetcher);

        let addresses: Vec<String> = (0..5).map(|i| format!("https://s{i}.test/")).collect();
        let (events, result) = orchestrator
            .submit_batch(&UserId::from("u"), &addresses)
            .collect_events()
            .await;

        assert!(matches!(events.first(), Some(BatchEvent::Started { total: 5, .. })));
        let progress: Vec<usize> = events
            .iter()
            .filter_map(|event| match event {
                BatchEvent::Progress(p) => Some(p.completed),
                _ => None,
            })
            .collect();
        assert_eq!(progress, vec![1, 2, 3, 4, 5]);
        assert!(matches!(events.last(), Some(BatchEvent::Finished(BatchOutcome::Links { links })) if links.len() == 10));
        assert_eq!(result.unwrap().dropped_progress, 0);
    }

    #[tokio::test]
    async fn test_dropped_handle_is_delivery_failure_but_links_are_kept() {
        let mut fetcher = MockFetcher::new();
        fetcher.expect_fetch().returning(|address| page(address));
        let (orchestrator, _) = orchestrator(fetcher);
        let user = UserId::from("u");

        let task = orchestrator
            .submit_batch(&user, ["https://a.test/"])
            .detach();
        let result = task.await.unwrap();

        assert!(matches!(result, Err(HarvestError::Delivery(_))));
        let session = orchestrator.store().get(&user).unwrap();
        assert_eq!(session.collected_count(), 2);
        assert!(!session.is_busy());
    }
}
