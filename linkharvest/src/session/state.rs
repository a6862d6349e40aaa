//! Per-user session state.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;

use crate::filter::{FilterSet, KeywordSet};

/// Opaque identifier of the user owning a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Creates an identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for UserId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<i64> for UserId {
    fn from(id: i64) -> Self {
        Self(id.to_string())
    }
}

/// Mutable part of a session, guarded by a read/write lock.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    /// Active keyword filters.
    pub filters: FilterSet,
    /// Every link collected since the last reset.
    pub collected: BTreeSet<String>,
}

/// Proof that the caller holds a session's batch lock.
///
/// Links and filters can only be changed through methods that take this
/// guard, so they stay fixed while a batch is in flight.
pub struct BatchGuard<'a> {
    _guard: MutexGuard<'a, ()>,
}

impl fmt::Debug for BatchGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchGuard").finish_non_exhaustive()
    }
}

/// A snapshot of a session for status reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStatus {
    /// Session owner.
    pub user: UserId,
    /// Include keywords, sorted.
    pub include: Vec<String>,
    /// Exclude keywords, sorted.
    pub exclude: Vec<String>,
    /// Number of collected links.
    pub collected: usize,
    /// Number of collected links passing the filters.
    pub filtered: usize,
    /// Batches running or waiting on this session.
    pub active_batches: usize,
    /// Milliseconds since the last interaction.
    pub idle_ms: u64,
    /// When the session was created.
    pub created_at: DateTime<Utc>,
}

/// State kept for a single user.
pub struct Session {
    user: UserId,
    created_at: DateTime<Utc>,
    last_activity: AtomicU64,
    active_batches: AtomicUsize,
    batch_lock: Mutex<()>,
    state: RwLock<SessionState>,
}

impl Session {
    /// Creates an empty session whose last activity is `now_millis`.
    #[must_use]
    pub fn new(user: UserId, now_millis: u64) -> Self {
        Self {
            user,
            created_at: Utc::now(),
            last_activity: AtomicU64::new(now_millis),
            active_batches: AtomicUsize::new(0),
            batch_lock: Mutex::new(()),
            state: RwLock::new(SessionState::default()),
        }
    }

    /// Returns the owner.
    #[must_use]
    pub fn user(&self) -> &UserId {
        &self.user
    }

    /// Returns the creation time.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Refreshes the last activity timestamp. Never moves it backwards.
    pub fn touch(&self, now_millis: u64) {
        self.last_activity.fetch_max(now_millis, Ordering::SeqCst);
    }

    /// Last activity timestamp in clock milliseconds.
    #[must_use]
    pub fn last_activity(&self) -> u64 {
        self.last_activity.load(Ordering::SeqCst)
    }

    /// Milliseconds since the last activity.
    #[must_use]
    pub fn idle_millis(&self, now_millis: u64) -> u64 {
        now_millis.saturating_sub(self.last_activity())
    }

    /// Batches holding or waiting for the batch lock.
    #[must_use]
    pub fn active_batches(&self) -> usize {
        self.active_batches.load(Ordering::SeqCst)
    }

    /// Whether a batch holds or waits for the lock.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.active_batches() > 0
    }

    pub(crate) fn enter_batch(&self) {
        self.active_batches.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn leave_batch(&self) {
        self.active_batches.fetch_sub(1, Ordering::SeqCst);
    }

    /// Acquires the batch lock, queueing behind any batch in flight.
    pub async fn lock_batch(&self) -> BatchGuard<'_> {
        let guard = if let Ok(guard) = self.batch_lock.try_lock() {
            guard
        } else {
            debug!(user = %self.user, "Batch queued behind an in-flight batch");
            self.batch_lock.lock().await
        };
        BatchGuard { _guard: guard }
    }

    /// Current filters.
    #[must_use]
    pub fn filters(&self) -> FilterSet {
        self.state.read().filters.clone()
    }

    /// Replaces filters; `None` leaves the corresponding filter unchanged.
    pub fn set_filters(
        &self,
        _batch: &BatchGuard<'_>,
        include: Option<&str>,
        exclude: Option<&str>,
    ) -> FilterSet {
        let mut state = self.state.write();
        if let Some(raw) = include {
            state.filters.include = KeywordSet::parse(raw);
        }
        if let Some(raw) = exclude {
            state.filters.exclude = KeywordSet::parse(raw);
        }
        state.filters.clone()
    }

    /// Adds links to the collected set and returns the new total.
    pub fn merge<I>(&self, _batch: &BatchGuard<'_>, links: I) -> usize
    where
        I: IntoIterator<Item = String>,
    {
        let mut state = self.state.write();
        state.collected.extend(links);
        state.collected.len()
    }

    /// Clears filters and collected links.
    pub fn clear(&self, _batch: &BatchGuard<'_>) {
        *self.state.write() = SessionState::default();
    }

    /// Number of collected links.
    #[must_use]
    pub fn collected_count(&self) -> usize {
        self.state.read().collected.len()
    }

    /// Collected links in sorted order.
    #[must_use]
    pub fn collected_links(&self) -> Vec<String> {
        self.state.read().collected.iter().cloned().collect()
    }

    /// Collected links passing the current filters, sorted.
    #[must_use]
    pub fn filtered_links(&self) -> Vec<String> {
        let state = self.state.read();
        state.filters.apply(&state.collected)
    }

    /// Builds a status snapshot.
    #[must_use]
    pub fn status(&self, now_millis: u64) -> SessionStatus {
        let state = self.state.read();
        SessionStatus {
            user: self.user.clone(),
            include: state.filters.include.to_vec(),
            exclude: state.filters.exclude.to_vec(),
            collected: state.collected.len(),
            filtered: state.filters.apply(&state.collected).len(),
            active_batches: self.active_batches(),
            idle_ms: self.idle_millis(now_millis),
            created_at: self.created_at,
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("user", &self.user)
            .field("last_activity", &self.last_activity())
            .field("active_batches", &self.active_batches())
            .field("collected", &self.collected_count())
            .finish_non_exhaustive()
    }
}
