//! Concurrent map of user sessions.

use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::state::{Session, SessionStatus, UserId};
use crate::clock::{duration_millis, Clock, SystemClock};
use crate::events::{EventSink, NoOpEventSink};
use crate::filter::FilterSet;

/// Marks a session as busy for as long as it is alive.
///
/// A leased session is never evicted by a sweep. Dropping the lease refreshes
/// the session's activity and releases the mark.
pub struct BatchLease {
    session: Arc<Session>,
    clock: Arc<dyn Clock>,
}

impl BatchLease {
    /// The leased session.
    #[must_use]
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }
}

impl Drop for BatchLease {
    fn drop(&mut self) {
        self.session.touch(self.clock.now_millis());
        self.session.leave_batch();
    }
}

impl fmt::Debug for BatchLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchLease")
            .field("user", self.session.user())
            .finish_non_exhaustive()
    }
}

/// Store of all live sessions, keyed by user.
pub struct SessionStore {
    sessions: DashMap<UserId, Arc<Session>>,
    clock: Arc<dyn Clock>,
    event_sink: Arc<dyn EventSink>,
}

impl SessionStore {
    /// Creates an empty store reading time from `clock`.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            sessions: DashMap::new(),
            clock,
            event_sink: Arc::new(NoOpEventSink),
        }
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    /// The clock used for activity timestamps.
    #[must_use]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Returns the user's session, creating it if needed, and refreshes its
    /// activity under the map's shard lock.
    pub fn touch(&self, user: &UserId) -> Arc<Session> {
        let now = self.clock.now_millis();
        self.entry(user, now, |session| session.touch(now))
    }

    /// Touches the session and marks it busy until the lease is dropped.
    ///
    /// The busy mark is set under the map's shard lock, so a concurrent sweep
    /// either runs before (and the session is recreated fresh) or sees it.
    pub fn lease(&self, user: &UserId) -> BatchLease {
        let now = self.clock.now_millis();
        let session = self.entry(user, now, |session| {
            session.enter_batch();
            session.touch(now);
        });
        BatchLease {
            session,
            clock: Arc::clone(&self.clock),
        }
    }

    fn entry(&self, user: &UserId, now: u64, under_lock: impl FnOnce(&Session)) -> Arc<Session> {
        let mut created = false;
        let session = {
            let entry = self.sessions.entry(user.clone()).or_insert_with(|| {
                created = true;
                Arc::new(Session::new(user.clone(), now))
            });
            under_lock(entry.value());
            Arc::clone(entry.value())
        };

        if created {
            debug!(user = %user, "Session created");
            self.event_sink.try_emit(
                "session.created",
                Some(serde_json::json!({ "user": user.as_str() })),
            );
        }
        session
    }

    /// Returns the session without touching it.
    #[must_use]
    pub fn get(&self, user: &UserId) -> Option<Arc<Session>> {
        self.sessions.get(user).map(|entry| Arc::clone(entry.value()))
    }

    /// Replaces the user's filters once no batch is running.
    ///
    /// `None` leaves a filter as it is; an empty string clears it.
    pub async fn set_filters(
        &self,
        user: &UserId,
        include: Option<&str>,
        exclude: Option<&str>,
    ) -> FilterSet {
        let lease = self.lease(user);
        let session = lease.session();
        let guard = session.lock_batch().await;
        let filters = session.set_filters(&guard, include, exclude);
        debug!(
            user = %user,
            include = ?filters.include.to_vec(),
            exclude = ?filters.exclude.to_vec(),
            "Filters updated"
        );
        filters
    }

    /// Clears the user's filters and collected links once no batch is running.
    pub async fn reset(&self, user: &UserId) {
        let lease = self.lease(user);
        let session = lease.session();
        let guard = session.lock_batch().await;
        session.clear(&guard);
        info!(user = %user, "Session reset");
    }

    /// Returns a status snapshot, creating the session if needed.
    pub fn status(&self, user: &UserId) -> SessionStatus {
        self.touch(user).status(self.clock.now_millis())
    }

    /// Evicts every idle session that has no active batch.
    ///
    /// Returns the evicted users.
    pub fn sweep(&self, idle_timeout: Duration) -> Vec<UserId> {
        let now = self.clock.now_millis();
        let timeout_ms = duration_millis(idle_timeout);
        let mut evicted = Vec::new();

        self.sessions.retain(|user, session| {
            let expired = session.idle_millis(now) > timeout_ms;
            if expired && session.is_busy() {
                debug!(user = %user, "Idle session has an active batch, keeping it");
                return true;
            }
            if expired {
                evicted.push((user.clone(), session.idle_millis(now)));
            }
            !expired
        });

        for (user, idle_ms) in &evicted {
            info!(user = %user, idle_ms, "Session evicted");
            self.event_sink.try_emit(
                "session.evicted",
                Some(serde_json::json!({ "user": user.as_str(), "idle_ms": idle_ms })),
            );
        }
        evicted.into_iter().map(|(user, _)| user).collect()
    }

    /// Whether a session exists for `user`.
    #[must_use]
    pub fn contains(&self, user: &UserId) -> bool {
        self.sessions.contains_key(user)
    }

    /// Number of live sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock::new()))
    }
}

impl fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionStore")
            .field("sessions", &self.sessions.len())
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::events::CollectingEventSink;

    fn store() -> (SessionStore, Arc<ManualClock>, Arc<CollectingEventSink>) {
        let clock = Arc::new(ManualClock::new());
        let sink = Arc::new(CollectingEventSink::new());
        let store = SessionStore::new(clock.clone()).with_event_sink(sink.clone());
        (store, clock, sink)
    }

    #[test]
    fn test_touch_creates_once() {
        let (store, clock, sink) = store();
        let user = UserId::from("alice");

        let first = store.touch(&user);
        clock.advance(Duration::from_secs(3));
        let second = store.touch(&user);

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.last_activity(), 3_000);
        assert_eq!(store.len(), 1);
        assert_eq!(sink.events_of_type("session.created").len(), 1);
    }

    #[test]
    fn test_touch_racing_sweep_keeps_returned_session() {
        for _ in 0..200 {
            let (store, clock, _) = store();
            let user = UserId::from("alice");
            store.touch(&user);
            clock.advance(Duration::from_secs(10));

            let touched = std::thread::scope(|scope| {
                let sweeper = scope.spawn(|| {
                    for _ in 0..50 {
                        store.sweep(Duration::from_secs(5));
                    }
                });
                let touched = store.touch(&user);
                sweeper.join().unwrap();
                touched
            });

            let live = store.get(&user).expect("touched session must stay in the store");
            assert!(Arc::ptr_eq(&touched, &live));
        }
    }

    #[test]
    fn test_sweep_evicts_only_idle_sessions() {
        let (store, clock, sink) = store();
        let idle = UserId::from("idle");
        let active = UserId::from("active");

        store.touch(&idle);
        store.touch(&active);
        clock.advance(Duration::from_secs(50));
        store.touch(&active);
        clock.advance(Duration::from_secs(20));

        let evicted = store.sweep(Duration::from_secs(60));
        assert_eq!(evicted, vec![idle.clone()]);
        assert!(!store.contains(&idle));
        assert!(store.contains(&active));
        assert_eq!(sink.events_of_type("session.evicted").len(), 1);
    }

    #[test]
    fn test_leased_session_survives_sweep() {
        let (store, clock, _) = store();
        let user = UserId::from("busy");

        let lease = store.lease(&user);
        assert!(lease.session().is_busy());
        clock.advance(Duration::from_secs(120));

        assert!(store.sweep(Duration::from_secs(60)).is_empty());
        assert!(store.contains(&user));

        drop(lease);
        let session = store.get(&user).unwrap();
        assert!(!session.is_busy());
        assert_eq!(session.last_activity(), 120_000);

        clock.advance(Duration::from_secs(61));
        assert_eq!(store.sweep(Duration::from_secs(60)), vec![user]);
    }

    #[test]
    fn test_lease_after_eviction_starts_fresh() {
        let (store, clock, _) = store();
        let user = UserId::from("u");

        let old = store.touch(&user);
        clock.advance(Duration::from_secs(100));
        store.sweep(Duration::from_secs(60));

        let lease = store.lease(&user);
        assert!(!Arc::ptr_eq(&old, lease.session()));
        assert_eq!(lease.session().collected_count(), 0);
    }

    #[tokio::test]
    async fn test_set_filters_and_reset() {
        let (store, _, _) = store();
        let user = UserId::from(7_i64);

        let filters = store.set_filters(&user, Some("News, Sport ,"), Some("ads")).await;
        assert_eq!(filters.include.to_vec(), vec!["news", "sport"]);

        let filters = store.set_filters(&user, None, Some("")).await;
        assert_eq!(filters.include.len(), 2);
        assert!(filters.exclude.is_empty());

        store.reset(&user).await;
        let status = store.status(&user);
        assert!(status.include.is_empty());
        assert_eq!(status.collected, 0);
        assert_eq!(status.active_batches, 0);
    }
}
