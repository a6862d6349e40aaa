//! Progress accounting for a running batch.

use serde::{Deserialize, Serialize};
use std::time::Instant;

use super::pool::FetchOutcome;

/// Progress information for a batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchProgress {
    /// Number of settled fetches.
    pub completed: usize,
    /// Total number of fetches in the batch.
    pub total: usize,
    /// Links collected in the session so far.
    pub collected: usize,
    /// Number of successful fetches.
    pub success_count: usize,
    /// Number of failed fetches.
    pub error_count: usize,
    /// Most recently settled address.
    pub current_url: Option<String>,
    /// Elapsed time in milliseconds.
    pub elapsed_ms: f64,
}

impl BatchProgress {
    /// Creates new progress for `total` fetches.
    #[must_use]
    pub fn new(total: usize) -> Self {
        Self {
            total,
            ..Default::default()
        }
    }

    /// Returns the completion percentage.
    #[must_use]
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            (self.completed as f64 / self.total as f64) * 100.0
        }
    }

    /// Whether every fetch has settled.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.completed >= self.total
    }
}

/// Counts completions and decides when a progress update is due.
///
/// Updates fire after every `ceil(total / steps)` completions and always on
/// the final one.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    progress: BatchProgress,
    step: usize,
    started: Instant,
}

impl ProgressTracker {
    /// Creates a tracker for `total` fetches split into `steps` reports.
    #[must_use]
    pub fn new(total: usize, steps: usize) -> Self {
        Self {
            progress: BatchProgress::new(total),
            step: total.div_ceil(steps.max(1)).max(1),
            started: Instant::now(),
        }
    }

    /// Completions between two reports.
    #[must_use]
    pub fn step(&self) -> usize {
        self.step
    }

    /// Records a settled fetch; returns a snapshot when a report is due.
    pub fn record(&mut self, outcome: &FetchOutcome, collected: usize) -> Option<BatchProgress> {
        let progress = &mut self.progress;
        progress.completed += 1;
        if outcome.is_success() {
            progress.success_count += 1;
        } else {
            progress.error_count += 1;
        }
        progress.collected = collected;
        progress.current_url = Some(outcome.address.to_string());
        progress.elapsed_ms = self.started.elapsed().as_secs_f64() * 1000.0;

        let due = progress.completed % self.step == 0 || progress.completed == progress.total;
        due.then(|| progress.clone())
    }

    /// Current progress.
    #[must_use]
    pub fn snapshot(&self) -> BatchProgress {
        self.progress.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::FetchError;
    use std::collections::BTreeSet;
    use url::Url;

    fn ok(address: &str) -> FetchOutcome {
        FetchOutcome::succeeded(Url::parse(address).unwrap(), BTreeSet::new(), 1.0)
    }

    fn failed(address: &str) -> FetchOutcome {
        FetchOutcome::failed(
            Url::parse(address).unwrap(),
            FetchError::timeout(address, 10),
            10.0,
        )
    }

    fn report_points(total: usize) -> Vec<usize> {
        let mut tracker = ProgressTracker::new(total, 5);
        (0..total)
            .filter_map(|i| tracker.record(&ok("https://a.test/"), i))
            .map(|p| p.completed)
            .collect()
    }

    #[test]
    fn test_report_boundaries() {
        assert_eq!(report_points(5), vec![1, 2, 3, 4, 5]);
        assert_eq!(report_points(12), vec![3, 6, 9, 12]);
        assert_eq!(report_points(7), vec![2, 4, 6, 7]);
        assert_eq!(report_points(1), vec![1]);
        assert_eq!(report_points(3), vec![1, 2, 3]);
    }

    #[test]
    fn test_counts_success_and_failure() {
        let mut tracker = ProgressTracker::new(2, 5);
        tracker.record(&ok("https://a.test/"), 3);
        let last = tracker.record(&failed("https://b.test/"), 3).unwrap();

        assert_eq!(last.completed, 2);
        assert_eq!(last.success_count, 1);
        assert_eq!(last.error_count, 1);
        assert_eq!(last.collected, 3);
        assert_eq!(last.current_url.as_deref(), Some("https://b.test/"));
        assert!(last.is_complete());
        assert_eq!(last.percent(), 100.0);
    }

    #[test]
    fn test_empty_progress() {
        let progress = BatchProgress::new(0);
        assert_eq!(progress.percent(), 0.0);
        assert!(progress.is_complete());
    }
}
