pub mod batch_writer;
pub mod dedup;
pub mod error;
pub mod escalator;
pub mod monitor;
pub mod retry;
pub mod types;

#[cfg(test)]
mod test_support;

use std::any::Any;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::endpoints::{self, EndpointDescriptor};
use crate::record::Record;
use crate::server::monitoring::SYNC_METRICS;
use crate::store::RecordStore;
use batch_writer::{BatchWriter, WriteOptions};
use dedup::DuplicateFilter;
use error::Error;
use monitor::StatsMonitor;
use types::{
    BatchProgress, EngineConfig, HealthStatus, ProcessingStats, SyncOptions, SyncProgress,
    SyncResult,
};

/// Resilient sync engine: duplicate filter, paced batch writer and cumulative stats.
///
/// Construct once per process and share by reference. The duplicate cache and statistics
/// live inside the engine and are guarded for concurrent syncs of different endpoints.
pub struct SyncEngine<S> {
    store: S,
    config: EngineConfig,
    dedup: DuplicateFilter,
    monitor: StatsMonitor,
}

impl<S> SyncEngine<S>
where
    S: RecordStore,
{
    pub fn new(store: S, config: EngineConfig) -> Self {
        Self {
            store,
            config,
            dedup: DuplicateFilter::new(),
            monitor: StatsMonitor::new(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Filters, writes and accounts for one batch of upstream records.
    ///
    /// Always returns a result: store failures, unknown endpoints and panics inside the
    /// store are reported through `errors` with `success = false`.
    pub async fn sync_endpoint_data(
        &self,
        endpoint: &EndpointDescriptor,
        records: Vec<Record>,
        options: SyncOptions,
    ) -> SyncResult {
        let started = Instant::now();
        let received = records.len();
        info!(
            event = "sync_started",
            endpoint = endpoint.name,
            table = endpoint.table,
            received,
            "starting endpoint sync"
        );

        let outcome = AssertUnwindSafe(self.run_sync(endpoint, records, &options))
            .catch_unwind()
            .await;
        let result = match outcome {
            Ok(result) => result,
            Err(panic) => failed_result(endpoint.name, Error::Panicked(panic_message(panic))),
        };
        self.finish(result, started).await
    }

    /// Resolves `name` through the endpoint registry, then syncs.
    pub async fn sync_endpoint_data_by_name(
        &self,
        name: &str,
        records: Vec<Record>,
        options: SyncOptions,
    ) -> SyncResult {
        match endpoints::lookup(name) {
            Some(endpoint) => self.sync_endpoint_data(endpoint, records, options).await,
            None => {
                let started = Instant::now();
                self.finish(
                    failed_result(name, Error::UnknownEndpoint(name.to_string())),
                    started,
                )
                .await
            }
        }
    }

    async fn run_sync(
        &self,
        endpoint: &EndpointDescriptor,
        records: Vec<Record>,
        options: &SyncOptions,
    ) -> SyncResult {
        let filtered = self.dedup.filter(&self.store, endpoint, records).await;
        let duplicates = filtered.duplicates;

        if filtered.records.is_empty() {
            return SyncResult {
                endpoint: endpoint.name.to_string(),
                success: true,
                duplicates_filtered: duplicates,
                degraded: filtered.degraded,
                ..SyncResult::default()
            };
        }

        let caller_progress = options.on_progress.clone();
        let on_progress = move |update: BatchProgress| {
            if let Some(callback) = &caller_progress {
                callback(SyncProgress {
                    processed: update.processed,
                    total: update.total,
                    duplicates,
                });
            }
        };
        let write_options = WriteOptions {
            conflict_columns: endpoint.conflict_columns,
            update_on_conflict: options
                .update_on_conflict
                .unwrap_or(self.config.update_on_conflict),
            batch_size: options.batch_size,
            on_progress: Some(&on_progress),
            cancel: options.cancel.as_ref(),
        };

        let batch = BatchWriter::new(&self.store, self.config.writer)
            .insert(endpoint.table, &filtered.records, &write_options)
            .await;

        SyncResult {
            endpoint: endpoint.name.to_string(),
            success: batch.failed == 0 && batch.errors.is_empty(),
            processed: batch.successful,
            duplicates_filtered: duplicates,
            failed: batch.failed,
            conflicts_resolved: batch.conflicts_resolved,
            errors: batch.errors,
            processing_time_ms: 0,
            retry_count: batch.retry_count,
            degraded: filtered.degraded,
        }
    }

    async fn finish(&self, mut result: SyncResult, started: Instant) -> SyncResult {
        result.processing_time_ms = started.elapsed().as_millis() as u64;
        self.monitor.record(&result).await;

        if let Some(metrics) = SYNC_METRICS.get() {
            metrics.runs_total.inc();
            metrics.records_persisted_total.inc_by(result.processed as u64);
            metrics
                .duplicates_filtered_total
                .inc_by(result.duplicates_filtered as u64);
            metrics.record_failures_total.inc_by(result.failed as u64);
            metrics
                .conflicts_resolved_total
                .inc_by(result.conflicts_resolved as u64);
            metrics.batch_retries_total.inc_by(u64::from(result.retry_count));
        }

        if result.success {
            info!(
                event = "sync_finished",
                endpoint = %result.endpoint,
                processed = result.processed,
                duplicates_filtered = result.duplicates_filtered,
                conflicts_resolved = result.conflicts_resolved,
                retry_count = result.retry_count,
                degraded = result.degraded,
                processing_time_ms = result.processing_time_ms,
                "endpoint sync finished"
            );
        } else {
            warn!(
                event = "sync_finished_with_errors",
                endpoint = %result.endpoint,
                processed = result.processed,
                failed = result.failed,
                error_count = result.errors.len(),
                first_error = result.errors.first().map(String::as_str),
                degraded = result.degraded,
                processing_time_ms = result.processing_time_ms,
                "endpoint sync finished with errors"
            );
        }
        result
    }

    /// Probes the store once and reports connectivity, latency and error rate.
    pub async fn perform_health_check(&self) -> HealthStatus {
        let cache_status = self.dedup.sizes().await;
        let started = Instant::now();

        match self.store.probe(&self.config.health_probe_table).await {
            Ok(()) => HealthStatus {
                cache_status,
                db_connection: true,
                avg_response_time_ms: started.elapsed().as_millis() as i64,
                error_rate: self.monitor.error_rate().await,
            },
            Err(err) => {
                error!(
                    event = "health_probe_failed",
                    table = %self.config.health_probe_table,
                    error_kind = ?err.kind,
                    error = %err,
                    "store health probe failed"
                );
                HealthStatus {
                    cache_status,
                    db_connection: false,
                    avg_response_time_ms: -1,
                    error_rate: 100.0,
                }
            }
        }
    }

    pub async fn processing_stats(&self) -> ProcessingStats {
        self.monitor.snapshot().await
    }

    pub async fn reset_stats(&self) {
        self.monitor.reset().await;
        info!(event = "stats_reset", "processing stats reset");
    }

    /// Clears one endpoint's duplicate cache, or all of them.
    pub async fn clear_cache(&self, endpoint: Option<&str>) {
        self.dedup.clear(endpoint).await;
        info!(
            event = "dedup_cache_cleared",
            endpoint = endpoint.unwrap_or("*"),
            "duplicate cache cleared"
        );
    }
}

fn failed_result(endpoint: &str, err: Error) -> SyncResult {
    error!(
        event = "sync_aborted",
        endpoint,
        error = %err,
        "endpoint sync aborted"
    );
    SyncResult {
        endpoint: endpoint.to_string(),
        success: false,
        errors: vec![err.to_string()],
        ..SyncResult::default()
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|message| message.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string())
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use futures::future::BoxFuture;

    use super::test_support::{members, test_engine_config, ScriptedStore};
    use super::types::{SyncOptions, SyncProgress};
    use super::SyncEngine;
    use crate::endpoints::MEMBER_DATA;
    use crate::record::Record;
    use crate::store::{ConflictPolicy, MemoryStore, RecordStore, StoreError};

    fn member(id: &str) -> Record {
        Record::new().with("member_id", id)
    }

    #[tokio::test(start_paused = true)]
    async fn known_member_is_filtered_and_new_one_written() {
        let store = MemoryStore::new();
        store.seed("members", &["member_id"], vec![member("A1")]).await;
        let engine = SyncEngine::new(store, test_engine_config(3, 25));

        let result = engine
            .sync_endpoint_data(
                &MEMBER_DATA,
                vec![member("A1"), member("B2")],
                SyncOptions::default(),
            )
            .await;

        assert!(result.success);
        assert_eq!(result.duplicates_filtered, 1);
        assert_eq!(result.processed, 1);
        assert_eq!(engine.store().row_count("members").await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn escalated_conflicts_count_as_success() {
        let store = ScriptedStore::with_upserts(vec![
            Err(StoreError::conflict("cannot affect row a second time")),
            Err(StoreError::conflict("duplicate key value")),
            Ok(()),
            Ok(()),
            Err(StoreError::conflict("duplicate key value")),
            Ok(()),
        ]);
        let engine = SyncEngine::new(store, test_engine_config(3, 25));

        let result = engine
            .sync_endpoint_data(&MEMBER_DATA, members(5), SyncOptions::default())
            .await;

        assert!(result.success);
        assert_eq!(result.processed, 5);
        assert_eq!(result.failed, 0);
        assert_eq!(result.conflicts_resolved, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn progress_reports_post_filter_totals_and_duplicates() {
        let store = ScriptedStore::default().with_existing_keys(Ok(vec!["M1".to_string()]));
        let engine = SyncEngine::new(store, test_engine_config(3, 2));
        let seen: Arc<Mutex<Vec<SyncProgress>>> = Arc::default();
        let sink = seen.clone();

        let result = engine
            .sync_endpoint_data(
                &MEMBER_DATA,
                members(5),
                SyncOptions {
                    on_progress: Some(Arc::new(move |progress: SyncProgress| {
                        sink.lock().expect("progress mutex poisoned").push(progress)
                    })),
                    ..SyncOptions::default()
                },
            )
            .await;

        assert_eq!(result.processed, 4);
        assert_eq!(
            *seen.lock().expect("progress mutex poisoned"),
            vec![
                SyncProgress {
                    processed: 2,
                    total: 4,
                    duplicates: 1
                },
                SyncProgress {
                    processed: 4,
                    total: 4,
                    duplicates: 1
                },
            ]
        );
        assert_eq!(engine.store().upsert_sizes(), vec![2, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn options_override_conflict_policy() {
        let engine = SyncEngine::new(ScriptedStore::default(), test_engine_config(3, 25));

        engine
            .sync_endpoint_data(
                &MEMBER_DATA,
                members(1),
                SyncOptions {
                    update_on_conflict: Some(false),
                    ..SyncOptions::default()
                },
            )
            .await;

        assert_eq!(
            engine.store().policies(),
            vec![ConflictPolicy::IgnoreDuplicates]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn prefetch_failure_is_reported_as_degraded() {
        let store = ScriptedStore::default()
            .with_existing_keys(Err(StoreError::transient("connection refused")));
        let engine = SyncEngine::new(store, test_engine_config(3, 25));

        let result = engine
            .sync_endpoint_data(&MEMBER_DATA, members(3), SyncOptions::default())
            .await;

        assert!(result.success);
        assert!(result.degraded);
        assert_eq!(result.processed, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_records_make_run_unsuccessful() {
        let store = ScriptedStore::with_upserts(vec![
            Err(StoreError::transient("timeout")),
            Err(StoreError::transient("timeout")),
            Err(StoreError::transient("timeout")),
        ]);
        let engine = SyncEngine::new(store, test_engine_config(3, 25));

        let result = engine
            .sync_endpoint_data(&MEMBER_DATA, members(4), SyncOptions::default())
            .await;

        assert!(!result.success);
        assert_eq!(result.processed, 0);
        assert_eq!(result.failed, 4);
        assert_eq!(result.retry_count, 2);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.processing_time_ms, 3000);

        let stats = engine.processing_stats().await;
        assert_eq!(stats.total_errors, 1);
        assert_eq!(engine.perform_health_check().await.error_rate, 100.0);
    }

    #[tokio::test]
    async fn unknown_endpoint_returns_failed_result() {
        let engine = SyncEngine::new(ScriptedStore::default(), test_engine_config(3, 25));

        let result = engine
            .sync_endpoint_data_by_name("bill_data", members(2), SyncOptions::default())
            .await;

        assert!(!result.success);
        assert_eq!(result.endpoint, "bill_data");
        assert_eq!(result.errors, vec!["Unknown endpoint: bill_data".to_string()]);
        assert!(engine.store().upsert_sizes().is_empty());
        assert_eq!(engine.processing_stats().await.total_errors, 1);
    }

    struct PanickingStore;

    impl RecordStore for PanickingStore {
        fn fetch_unique_keys<'a>(
            &'a self,
            _table: &'a str,
            _column: &'a str,
        ) -> BoxFuture<'a, Result<Vec<String>, StoreError>> {
            Box::pin(async { Ok(Vec::new()) })
        }

        fn upsert<'a>(
            &'a self,
            _table: &'a str,
            rows: &'a [Record],
            _conflict_columns: &'a [&'a str],
            _policy: ConflictPolicy,
        ) -> BoxFuture<'a, Result<(), StoreError>> {
            Box::pin(async move {
                assert!(rows.is_empty(), "driver bug on {} rows", rows.len());
                Ok(())
            })
        }

        fn probe<'a>(&'a self, _table: &'a str) -> BoxFuture<'a, Result<(), StoreError>> {
            Box::pin(async { Ok(()) })
        }
    }

    #[tokio::test]
    async fn panic_inside_store_becomes_failed_result() {
        let engine = SyncEngine::new(PanickingStore, test_engine_config(3, 25));

        let result = engine
            .sync_endpoint_data(&MEMBER_DATA, members(2), SyncOptions::default())
            .await;

        assert!(!result.success);
        assert_eq!(
            result.errors,
            vec!["Sync task panicked: driver bug on 2 rows".to_string()]
        );
    }

    #[tokio::test]
    async fn unreachable_store_reports_unhealthy() {
        let store = ScriptedStore::default()
            .with_failing_probe(StoreError::transient("connection refused"));
        let engine = SyncEngine::new(store, test_engine_config(3, 25));

        let health = engine.perform_health_check().await;

        assert!(!health.db_connection);
        assert_eq!(health.avg_response_time_ms, -1);
        assert_eq!(health.error_rate, 100.0);
    }

    #[tokio::test(start_paused = true)]
    async fn health_reports_cache_sizes_and_zero_error_rate_when_idle() {
        let engine = SyncEngine::new(MemoryStore::new(), test_engine_config(3, 25));
        assert_eq!(engine.perform_health_check().await.error_rate, 0.0);

        engine
            .sync_endpoint_data(&MEMBER_DATA, vec![member("A1")], SyncOptions::default())
            .await;
        let health = engine.perform_health_check().await;

        assert!(health.db_connection);
        assert!(health.avg_response_time_ms >= 0);
        assert_eq!(health.cache_status.get("member_data"), Some(&1));
        assert_eq!(health.error_rate, 0.0);

        engine.clear_cache(None).await;
        assert!(engine.perform_health_check().await.cache_status.is_empty());
    }
}
