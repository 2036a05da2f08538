use mossdb_common::types::ClientId;
use thiserror::Error;

use crate::resource::{LockType, Resource};

pub type TransactionResult<T> = Result<T, TransactionError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LockError {
    #[error("resource {0} is not locked")]
    NotLocked(Resource),
    #[error("resource {resource} is not held with a {requested} lock")]
    Mismatch {
        resource: Resource,
        requested: LockType,
    },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransactionError {
    #[error("no active transaction for client {0}")]
    NotFound(ClientId),
    #[error("transaction already began for client {0}")]
    AlreadyExists(ClientId),
    #[error("cannot upgrade read lock on {0} to a write lock")]
    UpgradeDenied(Resource),
    #[error("deadlock detected: client {client} waiting for {resource}")]
    Deadlock { client: ClientId, resource: Resource },
    #[error("resource {resource} is held with a {held} lock, not {requested}")]
    LockMismatch {
        resource: Resource,
        held: LockType,
        requested: LockType,
    },
    #[error("resource {0} is not locked by this transaction")]
    ResourceNotLocked(Resource),
    #[error("resource {0} is held in a conflicting mode")]
    WouldBlock(Resource),
    #[error("lock manager error: {0}")]
    Lock(#[from] LockError),
}
