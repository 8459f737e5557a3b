//! Error types for storage operations

use thiserror::Error;

use crate::model::MonitorId;

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("cannot open database: {0}")]
    Connection(String),

    #[error("schema migration failed: {0}")]
    Migration(String),

    #[error("query failed: {0}")]
    Query(String),

    /// A stored row or column could not be turned back into a value
    #[error("malformed stored value: {0}")]
    Malformed(String),

    #[error("monitor '{0}' is not stored")]
    NotFound(MonitorId),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Malformed(err.to_string())
    }
}

#[cfg(feature = "storage-sqlite")]
impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        StorageError::Query(err.to_string())
    }
}
