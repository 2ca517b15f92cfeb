use tracing::{debug, warn};

use crate::record::Record;
use crate::store::{ConflictPolicy, RecordStore};

use super::types::BatchOperationResult;

/// Writes `records` one statement at a time after a batch-level conflict.
///
/// Every record is attempted regardless of earlier failures. A conflict on a single row
/// means the logical entity is already stored, so it counts as resolved and successful;
/// any other error fails only that record.
pub async fn insert_individually<S>(
    store: &S,
    table: &str,
    records: &[Record],
    conflict_columns: &[&str],
    policy: ConflictPolicy,
) -> BatchOperationResult
where
    S: RecordStore + ?Sized,
{
    let mut result = BatchOperationResult {
        total_processed: records.len(),
        ..BatchOperationResult::default()
    };

    for (index, record) in records.iter().enumerate() {
        match store
            .upsert(table, std::slice::from_ref(record), conflict_columns, policy)
            .await
        {
            Ok(()) => result.successful += 1,
            Err(err) if err.is_conflict() => {
                debug!(
                    event = "record_conflict_resolved",
                    table,
                    record = %describe(record, conflict_columns, index),
                    "record already stored; counted as resolved"
                );
                result.conflicts_resolved += 1;
                result.successful += 1;
            }
            Err(err) => {
                let label = describe(record, conflict_columns, index);
                warn!(
                    event = "record_write_failed",
                    table,
                    record = %label,
                    error_kind = ?err.kind,
                    error = %err,
                    "individual record write failed"
                );
                result.failed += 1;
                result.errors.push(format!("Record {label}: {err}"));
            }
        }
    }

    result
}

/// Conflict key of the record, or its position when it has none.
fn describe(record: &Record, conflict_columns: &[&str], index: usize) -> String {
    let parts: Vec<String> = conflict_columns
        .iter()
        .filter_map(|column| record.key(column))
        .collect();
    if parts.is_empty() {
        format!("#{}", index + 1)
    } else {
        parts.join("/")
    }
}
