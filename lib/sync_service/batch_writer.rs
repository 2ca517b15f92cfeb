use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::record::Record;
use crate::store::{ConflictPolicy, RecordStore};

use super::escalator::insert_individually;
use super::retry::run_with_retry;
use super::types::{BatchOperationResult, BatchProgress, WriterConfig};

/// Per-call knobs for `BatchWriter::insert`.
pub struct WriteOptions<'a> {
    pub conflict_columns: &'a [&'a str],
    /// `true` merges into existing rows, `false` ignores duplicates.
    pub update_on_conflict: bool,
    /// Falls back to the writer's batch policy when `None`.
    pub batch_size: Option<usize>,
    pub on_progress: Option<&'a (dyn Fn(BatchProgress) + Send + Sync)>,
    pub cancel: Option<&'a CancellationToken>,
}

impl<'a> WriteOptions<'a> {
    pub fn new(conflict_columns: &'a [&'a str]) -> Self {
        Self {
            conflict_columns,
            update_on_conflict: true,
            batch_size: None,
            on_progress: None,
            cancel: None,
        }
    }
}

/// Splits records into fixed-size sub-batches and upserts them strictly in order.
///
/// Each sub-batch runs under the retry policy; a conflict-class failure escalates that
/// sub-batch to per-record writes. A sub-batch that still fails is recorded and the writer
/// moves on, so every call completes with a full accounting of its input.
pub struct BatchWriter<'s, S: ?Sized> {
    store: &'s S,
    config: WriterConfig,
}

impl<'s, S> BatchWriter<'s, S>
where
    S: RecordStore + ?Sized,
{
    pub fn new(store: &'s S, config: WriterConfig) -> Self {
        Self { store, config }
    }

    pub async fn insert(
        &self,
        table: &str,
        records: &[Record],
        options: &WriteOptions<'_>,
    ) -> BatchOperationResult {
        let batch_size = options
            .batch_size
            .unwrap_or(self.config.batch_policy.max_items)
            .max(1);
        let policy = ConflictPolicy::from_update_flag(options.update_on_conflict);
        let total = records.len();
        let batch_count = total.div_ceil(batch_size);

        let mut result = BatchOperationResult::default();
        let mut processed = 0usize;

        for (index, chunk) in records.chunks(batch_size).enumerate() {
            if options.cancel.is_some_and(CancellationToken::is_cancelled) {
                let remaining = total - processed;
                warn!(
                    event = "batch_write_cancelled",
                    table,
                    batch_index = index + 1,
                    remaining,
                    "cancelled before sub-batch; remaining records marked failed"
                );
                result.total_processed += remaining;
                result.failed += remaining;
                result.errors.push(format!(
                    "Sync cancelled before batch {} of {batch_count}; {remaining} records not written",
                    index + 1
                ));
                break;
            }

            let outcome = self
                .write_sub_batch(table, chunk, index + 1, options.conflict_columns, policy)
                .await;
            result.absorb(outcome);
            processed += chunk.len();

            if let Some(on_progress) = options.on_progress {
                on_progress(BatchProgress {
                    processed,
                    total,
                    conflicts: result.conflicts_resolved,
                });
            }

            if index + 1 < batch_count {
                tokio::time::sleep(self.config.inter_batch_delay).await;
            }
        }

        info!(
            event = "batch_write_finished",
            table,
            total,
            batch_count,
            successful = result.successful,
            failed = result.failed,
            conflicts_resolved = result.conflicts_resolved,
            retries = result.retry_count,
            "batch write finished"
        );
        result
    }

    async fn write_sub_batch(
        &self,
        table: &str,
        chunk: &[Record],
        batch_number: usize,
        conflict_columns: &[&str],
        policy: ConflictPolicy,
    ) -> BatchOperationResult {
        let outcome = run_with_retry(
            &self.config.retry_policy,
            |attempt| {
                if attempt > 1 {
                    warn!(
                        event = "sub_batch_retry",
                        table,
                        batch_number,
                        attempt,
                        "retrying sub-batch"
                    );
                }
                self.store.upsert(table, chunk, conflict_columns, policy)
            },
            |err| err.is_retryable(),
        )
        .await;

        match outcome {
            Ok(((), attempts)) => BatchOperationResult {
                total_processed: chunk.len(),
                successful: chunk.len(),
                retry_count: attempts - 1,
                ..BatchOperationResult::default()
            },
            Err(terminal) if terminal.error.is_conflict() => {
                warn!(
                    event = "sub_batch_escalated",
                    table,
                    batch_number,
                    size = chunk.len(),
                    attempts = terminal.attempts,
                    error = %terminal.error,
                    "conflict in batch upsert; writing records individually"
                );
                if let Some(metrics) = crate::server::monitoring::SYNC_METRICS.get() {
                    metrics.escalations_total.inc();
                }
                let mut escalated =
                    insert_individually(self.store, table, chunk, conflict_columns, policy).await;
                escalated.retry_count += terminal.attempts - 1;
                escalated
            }
            Err(terminal) => {
                warn!(
                    event = "sub_batch_failed",
                    table,
                    batch_number,
                    size = chunk.len(),
                    attempts = terminal.attempts,
                    exhausted_retryable = terminal.exhausted_retryable,
                    error_kind = ?terminal.error.kind,
                    error = %terminal.error,
                    "sub-batch write failed"
                );
                BatchOperationResult {
                    total_processed: chunk.len(),
                    failed: chunk.len(),
                    retry_count: terminal.attempts - 1,
                    errors: vec![format!(
                        "Batch {batch_number} failed after {} attempt(s): {}",
                        terminal.attempts, terminal.error
                    )],
                    ..BatchOperationResult::default()
                }
            }
        }
    }
}
