use std::path::PathBuf;

use mossdb_common::types::Key;
use thiserror::Error;

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("table {0} not found")]
    TableNotFound(String),
    #[error("table {0} already exists")]
    TableAlreadyExists(String),
    #[error("invalid table name: {0:?}")]
    InvalidTableName(String),
    #[error("key {key} not found in table {table}")]
    KeyNotFound { table: String, key: Key },
    #[error("key {key} already exists in table {table}")]
    KeyAlreadyExists { table: String, key: Key },
    #[error("page file {0:?} is corrupted: checksum mismatch")]
    ChecksumMismatch(PathBuf),
    #[error("serialization failed: {0}")]
    SerializationFailed(String),
    #[error("deserialization failed: {0}")]
    DeserializationFailed(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
