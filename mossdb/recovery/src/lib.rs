//! Write-ahead logging and crash recovery for mossdb.
//!
//! Every durable operation is recorded in a text write-ahead log before the call that made it
//! returns. Checkpoints flush every table and copy the whole database directory to a sibling
//! snapshot directory; [`prime`] restores that snapshot on startup and
//! [`RecoveryManager::recover`] replays the log on top of it.

pub mod config;
pub mod error;
pub mod handlers;
pub mod log;
pub mod manager;
pub mod snapshot;
pub mod wal;

pub use config::RecoveryConfig;
pub use error::{RecoveryError, RecoveryResult};
pub use log::{EditLog, LogRecord};
pub use manager::RecoveryManager;
pub use snapshot::{prime, prime_with};
pub use wal::{LogScan, WriteAheadLog};
