use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

/// Configures sub-batch retry behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first attempt.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles for every following retry.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
        }
    }
}

/// Configures write batching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPolicy {
    pub max_items: usize,
}

impl Default for BatchPolicy {
    fn default() -> Self {
        Self { max_items: 25 }
    }
}

/// Settings shared by every batch writer invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriterConfig {
    pub batch_policy: BatchPolicy,
    pub retry_policy: RetryPolicy,
    /// Fixed pause between consecutive sub-batches.
    pub inter_batch_delay: Duration,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            batch_policy: BatchPolicy::default(),
            retry_policy: RetryPolicy::default(),
            inter_batch_delay: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub writer: WriterConfig,
    /// Default conflict policy when a caller does not pick one.
    pub update_on_conflict: bool,
    pub health_probe_table: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            writer: WriterConfig::default(),
            update_on_conflict: true,
            health_probe_table: "members".to_string(),
        }
    }
}

/// Cumulative counters reported to the writer's progress callback after each sub-batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchProgress {
    pub processed: usize,
    pub total: usize,
    pub conflicts: usize,
}

/// Progress reported to `sync_endpoint_data` callers once per processed sub-batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SyncProgress {
    pub processed: usize,
    pub total: usize,
    pub duplicates: usize,
}

pub type SyncProgressFn = Arc<dyn Fn(SyncProgress) + Send + Sync>;

/// Per-call options for `SyncEngine::sync_endpoint_data`.
#[derive(Clone, Default)]
pub struct SyncOptions {
    /// Overrides the engine's sub-batch size.
    pub batch_size: Option<usize>,
    /// Overrides the engine's conflict policy. `true` merges, `false` ignores duplicates.
    pub update_on_conflict: Option<bool>,
    pub on_progress: Option<SyncProgressFn>,
    /// Checked before every sub-batch.
    pub cancel: Option<CancellationToken>,
}

impl std::fmt::Debug for SyncOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncOptions")
            .field("batch_size", &self.batch_size)
            .field("update_on_conflict", &self.update_on_conflict)
            .field("on_progress", &self.on_progress.is_some())
            .field("cancel", &self.cancel)
            .finish()
    }
}

/// Outcome of one batch writer invocation, escalated sub-batches folded in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchOperationResult {
    pub total_processed: usize,
    pub successful: usize,
    pub failed: usize,
    pub conflicts_resolved: usize,
    pub errors: Vec<String>,
    /// Retries consumed across all sub-batches (attempts beyond the first).
    pub retry_count: u32,
}

impl BatchOperationResult {
    pub(crate) fn absorb(&mut self, other: BatchOperationResult) {
        self.total_processed += other.total_processed;
        self.successful += other.successful;
        self.failed += other.failed;
        self.conflicts_resolved += other.conflicts_resolved;
        self.retry_count += other.retry_count;
        self.errors.extend(other.errors);
    }
}

/// Outcome of one `sync_endpoint_data` call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncResult {
    pub endpoint: String,
    /// True only when no record failed and no error was recorded.
    pub success: bool,
    /// Records persisted, conflict-resolved ones included.
    pub processed: usize,
    pub duplicates_filtered: usize,
    pub failed: usize,
    pub conflicts_resolved: usize,
    pub errors: Vec<String>,
    pub processing_time_ms: u64,
    pub retry_count: u32,
    /// Set when the duplicate filter could not load existing keys and passed input through.
    pub degraded: bool,
}

/// Cumulative process statistics, reset only on request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ProcessingStats {
    pub total_processed: u64,
    pub total_duplicates: u64,
    pub total_errors: u64,
    pub avg_processing_time_ms: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthStatus {
    /// Known unique keys per endpoint.
    pub cache_status: BTreeMap<String, usize>,
    pub db_connection: bool,
    /// Probe round trip in milliseconds, `-1` when the probe failed.
    pub avg_response_time_ms: i64,
    /// Percentage of errored operations, two decimals.
    pub error_rate: f64,
}
