use crate::PageId;
use thiserror::Error;

/// Errors surfaced by the storage engine.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A read past the end of the database file.
    #[error("page {0} not found")]
    PageNotFound(PageId),

    #[error("table {0} already exists")]
    TableExists(String),

    #[error("table {0} does not exist")]
    TableMissing(String),

    /// Append on a closed write-ahead log.
    #[error("write-ahead log is closed")]
    LogClosed,

    #[error("invalid value: {0}")]
    InvalidValue(String),

    /// On-disk bytes that do not decode as the expected structure.
    #[error("corrupted data: {0}")]
    Corrupted(String),

    /// A transaction commit that failed mid-way and was rolled back.
    /// Wraps the first operation failure.
    #[error("commit failed and was rolled back: {source}")]
    CommitFailed {
        #[source]
        source: Box<StorageError>,
    },
}

pub type Result<T> = std::result::Result<T, StorageError>;
