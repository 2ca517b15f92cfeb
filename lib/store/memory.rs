use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use futures::future::BoxFuture;
use tokio::sync::Mutex;

use super::{ConflictPolicy, RecordStore, StoreError};
use crate::record::Record;

/// Conflict-key values, or an insertion slot for rows with a missing key column.
///
/// Postgres never matches NULL conflict keys, so each keyless row is its own row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
enum RowKey {
    Keyed(Vec<String>),
    Unkeyed(usize),
}

type Table = BTreeMap<RowKey, Record>;

/// Keyed in-process store with Postgres-like upsert semantics.
///
/// Backs `--dry-run` syncs and tests. Rows are keyed by their conflict-column values; a
/// merge statement that carries the same key twice fails the way Postgres does, leaving
/// the table untouched.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<HashMap<String, Table>>,
    offline: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds rows without going through conflict handling.
    pub async fn seed(&self, table: &str, key_columns: &[&str], rows: Vec<Record>) {
        let mut tables = self.tables.lock().await;
        let target = tables.entry(table.to_string()).or_default();
        for row in rows {
            let key = row_key(&row, key_columns).unwrap_or(RowKey::Unkeyed(target.len()));
            target.insert(key, row);
        }
    }

    /// Makes every subsequent call fail with a transient error until switched back.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub async fn row_count(&self, table: &str) -> usize {
        self.tables
            .lock()
            .await
            .get(table)
            .map_or(0, |rows| rows.len())
    }

    pub async fn rows(&self, table: &str) -> Vec<Record> {
        self.tables
            .lock()
            .await
            .get(table)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default()
    }

    fn ensure_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::transient("memory store is offline"));
        }
        Ok(())
    }
}

/// `None` when there are no key columns or any of them is missing.
fn row_key(row: &Record, key_columns: &[&str]) -> Option<RowKey> {
    if key_columns.is_empty() {
        return None;
    }
    key_columns
        .iter()
        .map(|column| row.key(column))
        .collect::<Option<Vec<String>>>()
        .map(RowKey::Keyed)
}

fn merge_into(existing: &mut Record, incoming: &Record) {
    let mut merged = existing.as_map().clone();
    for (field, value) in incoming.as_map() {
        merged.insert(field.clone(), value.clone());
    }
    *existing = Record::from(merged);
}

impl RecordStore for MemoryStore {
    fn fetch_unique_keys<'a>(
        &'a self,
        table: &'a str,
        column: &'a str,
    ) -> BoxFuture<'a, Result<Vec<String>, StoreError>> {
        Box::pin(async move {
            self.ensure_online()?;
            let tables = self.tables.lock().await;
            Ok(tables
                .get(table)
                .map(|rows| rows.values().filter_map(|row| row.key(column)).collect())
                .unwrap_or_default())
        })
    }

    fn upsert<'a>(
        &'a self,
        table: &'a str,
        rows: &'a [Record],
        conflict_columns: &'a [&'a str],
        policy: ConflictPolicy,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            self.ensure_online()?;

            if policy == ConflictPolicy::Merge {
                let mut keys = HashSet::with_capacity(rows.len());
                for key in rows.iter().filter_map(|row| row_key(row, conflict_columns)) {
                    if !keys.insert(key) {
                        return Err(StoreError::conflict(
                            "ON CONFLICT DO UPDATE command cannot affect row a second time",
                        ));
                    }
                }
            }

            let mut tables = self.tables.lock().await;
            let target = tables.entry(table.to_string()).or_default();
            for row in rows {
                let Some(key) = row_key(row, conflict_columns) else {
                    let slot = RowKey::Unkeyed(target.len());
                    target.insert(slot, row.clone());
                    continue;
                };

                if let Some(existing) = target.get_mut(&key) {
                    if policy == ConflictPolicy::Merge {
                        merge_into(existing, row);
                    }
                } else {
                    target.insert(key, row.clone());
                }
            }
            Ok(())
        })
    }

    fn probe<'a>(&'a self, _table: &'a str) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move { self.ensure_online() })
    }
}

#[cfg(test)]
mod tests {
    use super::MemoryStore;
    use crate::record::Record;
    use crate::store::{ConflictPolicy, RecordStore, StoreErrorKind};

    #[tokio::test]
    async fn merge_batch_with_repeated_key_is_rejected_atomically() {
        let store = MemoryStore::new();
        let rows = vec![
            Record::new().with("member_id", "A1"),
            Record::new().with("member_id", "B2"),
            Record::new().with("member_id", "A1"),
        ];

        let err = store
            .upsert("members", &rows, &["member_id"], ConflictPolicy::Merge)
            .await
            .expect_err("repeated conflict key must fail");

        assert_eq!(err.kind, StoreErrorKind::ConflictViolation);
        assert_eq!(store.row_count("members").await, 0);
    }

    #[tokio::test]
    async fn merge_overwrites_and_ignore_keeps_existing_fields() {
        let store = MemoryStore::new();
        store
            .seed(
                "members",
                &["member_id"],
                vec![Record::new().with("member_id", "A1").with("name", "Ada")],
            )
            .await;

        store
            .upsert(
                "members",
                &[Record::new().with("member_id", "A1").with("name", "Grace")],
                &["member_id"],
                ConflictPolicy::IgnoreDuplicates,
            )
            .await
            .expect("ignore should succeed");
        assert_eq!(store.rows("members").await[0].key("name").as_deref(), Some("Ada"));

        store
            .upsert(
                "members",
                &[Record::new().with("member_id", "A1").with("name", "Grace")],
                &["member_id"],
                ConflictPolicy::Merge,
            )
            .await
            .expect("merge should succeed");
        assert_eq!(store.rows("members").await[0].key("name").as_deref(), Some("Grace"));
        assert_eq!(store.row_count("members").await, 1);
    }

    #[tokio::test]
    async fn rows_missing_a_conflict_key_are_stored_separately() {
        let store = MemoryStore::new();
        let rows = vec![
            Record::new().with("title", "unscheduled"),
            Record::new().with("event_id", "E1").with("title", "sitting"),
            Record::new().with("title", "adjourned"),
        ];

        store
            .upsert("calendar_events", &rows, &["event_id"], ConflictPolicy::Merge)
            .await
            .expect("keyless rows never conflict");
        store
            .upsert(
                "calendar_events",
                &rows[..1],
                &["event_id"],
                ConflictPolicy::Merge,
            )
            .await
            .expect("keyless rows never conflict");

        assert_eq!(store.row_count("calendar_events").await, 4);
    }

    #[tokio::test]
    async fn offline_store_fails_every_call_transiently() {
        let store = MemoryStore::new();
        store.set_offline(true);

        let probe = store.probe("members").await.expect_err("offline probe fails");
        assert!(probe.is_retryable());
        assert!(store.fetch_unique_keys("members", "member_id").await.is_err());

        store.set_offline(false);
        assert!(store.probe("members").await.is_ok());
    }
}
