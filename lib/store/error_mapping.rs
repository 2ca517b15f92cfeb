use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel_async::pooled_connection::deadpool::PoolError;

use super::StoreError;

/// Postgres raises this (SQLSTATE 21000) when one `INSERT ... ON CONFLICT DO UPDATE`
/// statement carries the same conflict key twice. Diesel reports it as
/// `DatabaseErrorKind::Unknown`, so the message is the only signal.
const CARDINALITY_VIOLATION_MARKER: &str = "cannot affect row a second time";

pub fn map_diesel_error(error: DieselError) -> StoreError {
    match error {
        DieselError::DatabaseError(kind, info) => match kind {
            DatabaseErrorKind::UniqueViolation => StoreError::conflict(format!(
                "duplicate key ({kind:?}): {}",
                info.message()
            )),
            DatabaseErrorKind::SerializationFailure
            | DatabaseErrorKind::ClosedConnection
            | DatabaseErrorKind::UnableToSendCommand => StoreError::transient(format!(
                "transient database error ({kind:?}): {}",
                info.message()
            )),
            _ if info.message().contains(CARDINALITY_VIOLATION_MARKER) => {
                StoreError::conflict(format!("conflicting rows in one upsert: {}", info.message()))
            }
            _ => StoreError::fatal(format!(
                "fatal database error ({kind:?}): {}",
                info.message()
            )),
        },
        DieselError::RollbackTransaction => {
            StoreError::transient("transaction rollback requested by database")
        }
        DieselError::BrokenTransactionManager => {
            StoreError::transient("connection transaction manager is broken")
        }
        other => StoreError::fatal(format!("fatal diesel error: {other}")),
    }
}

pub fn map_pool_error(error: PoolError) -> StoreError {
    StoreError::transient(format!("failed to acquire DB pool connection: {error}"))
}
