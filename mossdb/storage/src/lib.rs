//! Storage engine consumed by the mossdb concurrency and recovery core.
//!
//! The core only relies on the [`Database`] and [`Index`] traits. [`FileDatabase`] is a
//! file-backed engine that keeps every table in memory and persists it as a single page file
//! when its pages are flushed.

pub mod database;
pub mod error;
pub mod file;

pub use database::{Database, Index};
pub use error::{StorageError, StorageResult};
pub use file::{FileDatabase, FilePager, FileTable, PagesGuard};
