pub mod error_mapping;
pub mod memory;
pub mod postgres;

use std::sync::Arc;

use futures::future::BoxFuture;
use thiserror::Error;

use crate::record::Record;

pub use memory::MemoryStore;
pub use postgres::PgRecordStore;

/// What an upsert does when a row with the same conflict key already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictPolicy {
    /// Merge the incoming values into the existing row.
    Merge,
    /// Keep the existing row and skip the incoming one.
    IgnoreDuplicates,
}

impl ConflictPolicy {
    pub fn from_update_flag(update_on_conflict: bool) -> Self {
        if update_on_conflict {
            Self::Merge
        } else {
            Self::IgnoreDuplicates
        }
    }
}

/// Normalized store failure classes used by the writer's retry and escalation logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorKind {
    /// The write collided with an existing row or hit the same conflict key twice.
    ConflictViolation,
    /// Connectivity or contention.
    Transient,
    /// Unclassified driver failure (bad schema, bad payload, deadlock, timeout).
    Fatal,
}

/// Typed store failure with human-readable details.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct StoreError {
    pub kind: StoreErrorKind,
    pub message: String,
}

impl StoreError {
    pub fn new(kind: StoreErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::ConflictViolation, message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::Transient, message)
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::Fatal, message)
    }

    pub fn is_conflict(&self) -> bool {
        self.kind == StoreErrorKind::ConflictViolation
    }

    /// Every non-conflict error consumes a retry attempt; the kind only labels logs.
    pub fn is_retryable(&self) -> bool {
        !self.is_conflict()
    }
}

/// Keyed, upsert-capable persistence used by the sync engine.
///
/// Abstracted so duplicate filtering, retry and escalation can be exercised without a
/// database.
pub trait RecordStore: Send + Sync {
    /// Every non-null value of `column` in `table`, rendered as text.
    fn fetch_unique_keys<'a>(
        &'a self,
        table: &'a str,
        column: &'a str,
    ) -> BoxFuture<'a, Result<Vec<String>, StoreError>>;

    /// Writes `rows` in one statement, resolving existing rows on `conflict_columns`.
    fn upsert<'a>(
        &'a self,
        table: &'a str,
        rows: &'a [Record],
        conflict_columns: &'a [&'a str],
        policy: ConflictPolicy,
    ) -> BoxFuture<'a, Result<(), StoreError>>;

    /// Cheapest possible read against `table`, used for connectivity checks.
    fn probe<'a>(&'a self, table: &'a str) -> BoxFuture<'a, Result<(), StoreError>>;
}

impl<T> RecordStore for Arc<T>
where
    T: RecordStore + ?Sized,
{
    fn fetch_unique_keys<'a>(
        &'a self,
        table: &'a str,
        column: &'a str,
    ) -> BoxFuture<'a, Result<Vec<String>, StoreError>> {
        (**self).fetch_unique_keys(table, column)
    }

    fn upsert<'a>(
        &'a self,
        table: &'a str,
        rows: &'a [Record],
        conflict_columns: &'a [&'a str],
        policy: ConflictPolicy,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        (**self).upsert(table, rows, conflict_columns, policy)
    }

    fn probe<'a>(&'a self, table: &'a str) -> BoxFuture<'a, Result<(), StoreError>> {
        (**self).probe(table)
    }
}
