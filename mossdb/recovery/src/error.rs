use mossdb_storage::StorageError;
use mossdb_transaction::TransactionError;
use thiserror::Error;

pub type RecoveryResult<T> = Result<T, RecoveryError>;

#[derive(Error, Debug)]
pub enum RecoveryError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("transaction error: {0}")]
    Transaction(#[from] TransactionError),
    #[error("malformed log record {line:?}: {reason}")]
    Serialization { line: String, reason: String },
    #[error("invalid table name {0:?}: must be a single non-empty token")]
    InvalidName(String),
    #[error("log record cannot be redone: {0}")]
    NotRedoable(String),
}
