//! Store error types.

use thiserror::Error;

/// Errors from problem state and change log operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store connection poisoned")]
    Poisoned,
}
