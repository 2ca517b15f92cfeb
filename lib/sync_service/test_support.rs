use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::time::Instant;

use super::types::{BatchPolicy, EngineConfig, RetryPolicy, WriterConfig};
use crate::record::Record;
use crate::store::{ConflictPolicy, RecordStore, StoreError};

/// Production timing constants, used by tests that run on a paused clock.
pub(crate) fn test_writer_config(max_attempts: u32, batch_size: usize) -> WriterConfig {
    WriterConfig {
        batch_policy: BatchPolicy {
            max_items: batch_size,
        },
        retry_policy: RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1000),
        },
        inter_batch_delay: Duration::from_millis(500),
    }
}

pub(crate) fn test_engine_config(max_attempts: u32, batch_size: usize) -> EngineConfig {
    EngineConfig {
        writer: test_writer_config(max_attempts, batch_size),
        ..EngineConfig::default()
    }
}

/// `n` member records keyed `M1..=Mn`.
pub(crate) fn members(n: usize) -> Vec<Record> {
    (1..=n)
        .map(|i| Record::new().with("member_id", format!("M{i}")).with("name", format!("member {i}")))
        .collect()
}

/// Store that replays queued outcomes in call order and records every call.
///
/// Upsert calls beyond the scripted queue succeed.
#[derive(Default)]
pub(crate) struct ScriptedStore {
    upsert_outcomes: Mutex<VecDeque<Result<(), StoreError>>>,
    fetch_outcome: Mutex<Option<Result<Vec<String>, StoreError>>>,
    probe_outcome: Mutex<Option<StoreError>>,
    upsert_calls: Mutex<Vec<Vec<String>>>,
    upsert_started: Mutex<Vec<Instant>>,
    policies: Mutex<Vec<ConflictPolicy>>,
}

impl ScriptedStore {
    pub(crate) fn with_upserts(outcomes: Vec<Result<(), StoreError>>) -> Self {
        Self {
            upsert_outcomes: Mutex::new(outcomes.into_iter().collect()),
            ..Self::default()
        }
    }

    pub(crate) fn with_existing_keys(self, keys: Result<Vec<String>, StoreError>) -> Self {
        *self.fetch_outcome.lock().expect("fetch mutex poisoned") = Some(keys);
        self
    }

    pub(crate) fn with_failing_probe(self, error: StoreError) -> Self {
        *self.probe_outcome.lock().expect("probe mutex poisoned") = Some(error);
        self
    }

    /// Row count of every upsert call, in call order.
    pub(crate) fn upsert_sizes(&self) -> Vec<usize> {
        self.upsert_calls
            .lock()
            .expect("calls mutex poisoned")
            .iter()
            .map(Vec::len)
            .collect()
    }

    /// `member_id` values of every upsert call, in call order.
    pub(crate) fn upsert_keys(&self) -> Vec<Vec<String>> {
        self.upsert_calls.lock().expect("calls mutex poisoned").clone()
    }

    /// Clock reading at the start of every upsert call, in call order.
    pub(crate) fn upsert_instants(&self) -> Vec<Instant> {
        self.upsert_started
            .lock()
            .expect("instants mutex poisoned")
            .clone()
    }

    pub(crate) fn policies(&self) -> Vec<ConflictPolicy> {
        self.policies.lock().expect("policies mutex poisoned").clone()
    }
}

impl RecordStore for ScriptedStore {
    fn fetch_unique_keys<'a>(
        &'a self,
        _table: &'a str,
        _column: &'a str,
    ) -> BoxFuture<'a, Result<Vec<String>, StoreError>> {
        Box::pin(async move {
            self.fetch_outcome
                .lock()
                .expect("fetch mutex poisoned")
                .clone()
                .unwrap_or_else(|| Ok(Vec::new()))
        })
    }

    fn upsert<'a>(
        &'a self,
        _table: &'a str,
        rows: &'a [Record],
        _conflict_columns: &'a [&'a str],
        policy: ConflictPolicy,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            self.upsert_started
                .lock()
                .expect("instants mutex poisoned")
                .push(Instant::now());
            self.upsert_calls
                .lock()
                .expect("calls mutex poisoned")
                .push(rows.iter().filter_map(|row| row.key("member_id")).collect());
            self.policies
                .lock()
                .expect("policies mutex poisoned")
                .push(policy);

            self.upsert_outcomes
                .lock()
                .expect("outcomes mutex poisoned")
                .pop_front()
                .unwrap_or(Ok(()))
        })
    }

    fn probe<'a>(&'a self, _table: &'a str) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            match self.probe_outcome.lock().expect("probe mutex poisoned").clone() {
                Some(error) => Err(error),
                None => Ok(()),
            }
        })
    }
}
