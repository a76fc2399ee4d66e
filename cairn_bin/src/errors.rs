use keystone::StorageError;
use thiserror::Error;

/// Errors surfaced by the SQL front-end.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("parse error: {0}")]
    Parse(String),

    /// Only the SELECT path errors on absence; `get` itself reports a
    /// missing key as `None`.
    #[error("key {key} not found in table {table}")]
    KeyNotFound { table: String, key: i32 },

    #[error("a transaction is already active")]
    TxAlreadyActive,

    #[error("no active transaction")]
    NoActiveTx,

    #[error("invalid config: {0}")]
    Config(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}
