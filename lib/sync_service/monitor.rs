use tokio::sync::Mutex;

use super::types::{ProcessingStats, SyncResult};

/// Cumulative counters folded from every completed sync run.
#[derive(Default)]
pub struct StatsMonitor {
    stats: Mutex<ProcessingStats>,
}

impl StatsMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one run into the totals.
    ///
    /// The average is a running mean over operations (processed plus errored), weighted as
    /// `(avg * (n - 1) + duration) / n` with `n` the cumulative count after this run. Runs
    /// that add no operations leave the average untouched.
    pub async fn record(&self, result: &SyncResult) {
        let mut stats = self.stats.lock().await;
        stats.total_processed += result.processed as u64;
        stats.total_duplicates += result.duplicates_filtered as u64;
        stats.total_errors += result.errors.len() as u64;

        let operations = stats.total_processed + stats.total_errors;
        if operations > 0 && (result.processed > 0 || !result.errors.is_empty()) {
            let n = operations as f64;
            stats.avg_processing_time_ms =
                (stats.avg_processing_time_ms * (n - 1.0) + result.processing_time_ms as f64) / n;
        }
    }

    pub async fn snapshot(&self) -> ProcessingStats {
        *self.stats.lock().await
    }

    pub async fn reset(&self) {
        *self.stats.lock().await = ProcessingStats::default();
    }

    /// Errored share of all operations as a percentage with two decimals, 0 when idle.
    pub async fn error_rate(&self) -> f64 {
        error_rate(&*self.stats.lock().await)
    }
}

pub(crate) fn error_rate(stats: &ProcessingStats) -> f64 {
    let operations = stats.total_processed + stats.total_errors;
    if operations == 0 {
        return 0.0;
    }
    let rate = stats.total_errors as f64 / operations as f64 * 100.0;
    (rate * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::{error_rate, StatsMonitor};
    use crate::sync_service::types::{ProcessingStats, SyncResult};

    fn run(processed: usize, duplicates: usize, errors: usize, millis: u64) -> SyncResult {
        SyncResult {
            endpoint: "member_data".to_string(),
            success: errors == 0,
            processed,
            duplicates_filtered: duplicates,
            errors: (0..errors).map(|i| format!("error {i}")).collect(),
            processing_time_ms: millis,
            ..SyncResult::default()
        }
    }

    #[tokio::test]
    async fn running_average_weights_by_cumulative_operations() {
        let monitor = StatsMonitor::new();

        monitor.record(&run(1, 0, 0, 100)).await;
        let first = monitor.snapshot().await;
        assert_eq!(first.avg_processing_time_ms, 100.0);

        // n = 4 after this run: (100 * 3 + 500) / 4
        monitor.record(&run(2, 1, 1, 500)).await;
        let second = monitor.snapshot().await;
        assert_eq!(second.total_processed, 3);
        assert_eq!(second.total_duplicates, 1);
        assert_eq!(second.total_errors, 1);
        assert_eq!(second.avg_processing_time_ms, 200.0);
    }

    #[tokio::test]
    async fn empty_run_keeps_average() {
        let monitor = StatsMonitor::new();
        monitor.record(&run(2, 0, 0, 80)).await;
        monitor.record(&run(0, 5, 0, 9_000)).await;

        let stats = monitor.snapshot().await;
        assert_eq!(stats.avg_processing_time_ms, 80.0);
        assert_eq!(stats.total_duplicates, 5);
    }

    #[tokio::test]
    async fn counters_never_decrease_until_reset() {
        let monitor = StatsMonitor::new();
        let mut previous = monitor.snapshot().await;

        for (processed, duplicates, errors) in [(3, 0, 1), (0, 4, 0), (7, 2, 2)] {
            monitor.record(&run(processed, duplicates, errors, 10)).await;
            let current = monitor.snapshot().await;
            assert!(current.total_processed >= previous.total_processed);
            assert!(current.total_duplicates >= previous.total_duplicates);
            assert!(current.total_errors >= previous.total_errors);
            previous = current;
        }

        monitor.reset().await;
        assert_eq!(monitor.snapshot().await, ProcessingStats::default());
    }

    #[test]
    fn error_rate_rounds_to_two_decimals() {
        let stats = ProcessingStats {
            total_processed: 2,
            total_errors: 1,
            ..ProcessingStats::default()
        };
        assert_eq!(error_rate(&stats), 33.33);
        assert_eq!(error_rate(&ProcessingStats::default()), 0.0);
    }
}
