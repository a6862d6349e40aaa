//! Background eviction of idle sessions.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::state::UserId;
use super::store::SessionStore;
use crate::clock::duration_millis;
use crate::config::SessionConfig;

/// Periodically sweeps a [`SessionStore`] for idle sessions.
pub struct SessionReaper {
    store: Arc<SessionStore>,
    idle_timeout: Duration,
    interval: Duration,
    running: AtomicBool,
    shutdown: Arc<Notify>,
    worker_handle: RwLock<Option<JoinHandle<()>>>,
}

impl SessionReaper {
    /// Creates a stopped reaper.
    #[must_use]
    pub fn new(store: Arc<SessionStore>, idle_timeout: Duration, interval: Duration) -> Self {
        Self {
            store,
            idle_timeout,
            interval,
            running: AtomicBool::new(false),
            shutdown: Arc::new(Notify::new()),
            worker_handle: RwLock::new(None),
        }
    }

    /// Creates a stopped reaper from the session configuration.
    #[must_use]
    pub fn from_config(store: Arc<SessionStore>, config: &SessionConfig) -> Self {
        Self::new(store, config.idle_timeout(), config.sweep_interval())
    }

    /// Idle time after which a session may be evicted.
    #[must_use]
    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// Time between sweeps.
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Whether the background task is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Runs one sweep immediately.
    pub fn sweep_now(&self) -> Vec<UserId> {
        self.store.sweep(self.idle_timeout)
    }

    /// Starts sweeping in the background. Returns false if already running.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) -> bool {
        if self.running.swap(true, Ordering::SeqCst) {
            return false;
        }

        let store = Arc::clone(&self.store);
        let shutdown = Arc::clone(&self.shutdown);
        let idle_timeout = self.idle_timeout;
        let period = self.interval.max(Duration::from_millis(1));

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let evicted = store.sweep(idle_timeout);
                        debug!(evicted = evicted.len(), remaining = store.len(), "Session sweep finished");
                    }
                    () = shutdown.notified() => break,
                }
            }
        });

        *self.worker_handle.write() = Some(handle);
        info!(
            interval_ms = duration_millis(period),
            idle_timeout_ms = duration_millis(idle_timeout),
            "Session reaper started"
        );
        true
    }

    /// Stops the background task and waits for it to finish.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        self.shutdown.notify_one();
        let handle = self.worker_handle.write().take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                warn!(error = %err, "Session reaper task ended abnormally");
            }
        }
        info!("Session reaper stopped");
    }
}

impl Drop for SessionReaper {
    fn drop(&mut self) {
        if let Some(handle) = self.worker_handle.get_mut().take() {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for SessionReaper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionReaper")
            .field("idle_timeout", &self.idle_timeout)
            .field("interval", &self.interval)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[tokio::test]
    async fn test_start_stop_lifecycle() {
        let store = Arc::new(SessionStore::default());
        let reaper = SessionReaper::new(store, Duration::from_secs(60), Duration::from_millis(10));

        assert!(!reaper.is_running());
        assert!(reaper.start());
        assert!(!reaper.start());
        assert!(reaper.is_running());

        reaper.stop().await;
        assert!(!reaper.is_running());
        // Stopping twice is a no-op.
        reaper.stop().await;
    }

    #[tokio::test]
    async fn test_background_sweep_evicts_idle_sessions() {
        let clock = Arc::new(ManualClock::new());
        let store = Arc::new(SessionStore::new(clock.clone()));
        let idle = UserId::from("idle");
        let fresh = UserId::from("fresh");

        store.touch(&idle);
        clock.advance(Duration::from_secs(90));
        store.touch(&fresh);

        let reaper = SessionReaper::new(store.clone(), Duration::from_secs(60), Duration::from_millis(10));
        reaper.start();
        tokio::time::sleep(Duration::from_millis(100)).await;
        reaper.stop().await;

        assert!(!store.contains(&idle));
        assert!(store.contains(&fresh));
    }

    #[test]
    fn test_from_config() {
        let config = SessionConfig::default().with_idle_timeout(120.0);
        let reaper = SessionReaper::from_config(Arc::new(SessionStore::default()), &config);
        assert_eq!(reaper.idle_timeout(), Duration::from_secs(120));
        assert_eq!(reaper.interval(), Duration::from_secs(60));
        assert!(reaper.sweep_now().is_empty());
    }
}
