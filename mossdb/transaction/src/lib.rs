//! Lock-based concurrency control for mossdb.
//!
//! Every client runs at most one transaction at a time, so a transaction is identified by its
//! client id. Transactions take per-resource read/write locks through the
//! [`TransactionManager`], which rejects a request up front when waiting for it would close a
//! cycle in the [`WaitsForGraph`].

pub mod error;
pub mod graph;
pub mod lock;
pub mod manager;
pub mod resource;
pub mod transaction;

pub use error::{LockError, TransactionError, TransactionResult};
pub use graph::WaitsForGraph;
pub use lock::ResourceLockManager;
pub use manager::TransactionManager;
pub use resource::{LockType, Resource};
pub use transaction::Transaction;
