use thiserror::Error;

/// Failures that end a sync run before the writer could account for its records.
///
/// Never returned to callers: `SyncEngine` folds these into a failed `SyncResult`.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Unknown endpoint: {0}")]
    UnknownEndpoint(String),

    #[error("Sync task panicked: {0}")]
    Panicked(String),
}
