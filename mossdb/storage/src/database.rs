//! Interface of the storage engine as seen by the transaction and recovery layers.

use std::path::Path;
use std::sync::Arc;

use mossdb_common::types::{Key, TableType, Value};

use crate::error::StorageResult;

/// A table's index, the unit that owns a set of pages.
pub trait Index: Send + Sync {
    /// Name of the table this index backs.
    fn name(&self) -> &str;

    fn table_type(&self) -> TableType;

    /// Takes exclusive access to every page of the index, writes the dirty ones to durable
    /// storage and releases the pages again.
    fn flush_all_pages(&self) -> StorageResult<()>;
}

/// A database made of named tables mapping [`Key`]s to [`Value`]s.
///
/// Mutations are not required to be durable until the owning index flushes its pages; the
/// write-ahead log is what makes them survive a crash.
pub trait Database: Send + Sync {
    type Index: Index;

    /// Directory holding the database files.
    fn base_path(&self) -> &Path;

    fn create_table(&self, table_type: TableType, name: &str) -> StorageResult<Arc<Self::Index>>;

    fn table(&self, name: &str) -> StorageResult<Arc<Self::Index>>;

    /// All tables, ordered by name.
    fn tables(&self) -> Vec<Arc<Self::Index>>;

    fn get(&self, table: &str, key: Key) -> StorageResult<Option<Value>>;

    /// Inserts a new entry. Fails if the key already exists.
    fn insert(&self, table: &str, key: Key, value: Value) -> StorageResult<()>;

    /// Overwrites an existing entry. Fails if the key does not exist.
    fn update(&self, table: &str, key: Key, value: Value) -> StorageResult<()>;

    /// Removes an existing entry. Fails if the key does not exist.
    fn delete(&self, table: &str, key: Key) -> StorageResult<()>;

    /// Flushes the pages of every table.
    fn flush(&self) -> StorageResult<()> {
        for table in self.tables() {
            table.flush_all_pages()?;
        }
        Ok(())
    }
}
