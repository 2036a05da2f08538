use std::collections::btree_map::Entry;

use mossdb_common::types::{Key, TableType, Value};

use super::pager::FilePager;
use crate::database::Index;
use crate::error::{StorageError, StorageResult};

/// A table of a [`FileDatabase`](super::FileDatabase).
pub struct FileTable {
    name: String,
    pager: FilePager,
}

impl FileTable {
    pub(super) fn new(name: String, pager: FilePager) -> Self {
        Self { name, pager }
    }

    pub fn pager(&self) -> &FilePager {
        &self.pager
    }

    pub fn get(&self, key: Key) -> Option<Value> {
        self.pager.read_pages().get(&key).copied()
    }

    pub fn insert(&self, key: Key, value: Value) -> StorageResult<()> {
        match self.pager.write_pages().entry(key) {
            Entry::Occupied(_) => Err(StorageError::KeyAlreadyExists {
                table: self.name.clone(),
                key,
            }),
            Entry::Vacant(entry) => {
                entry.insert(value);
                Ok(())
            }
        }
    }

    pub fn update(&self, key: Key, value: Value) -> StorageResult<()> {
        match self.pager.write_pages().get_mut(&key) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(StorageError::KeyNotFound {
                table: self.name.clone(),
                key,
            }),
        }
    }

    pub fn delete(&self, key: Key) -> StorageResult<()> {
        self.pager
            .write_pages()
            .remove(&key)
            .map(|_| ())
            .ok_or_else(|| StorageError::KeyNotFound {
                table: self.name.clone(),
                key,
            })
    }

    /// Every entry of the table in key order.
    pub fn entries(&self) -> Vec<(Key, Value)> {
        self.pager
            .read_pages()
            .iter()
            .map(|(k, v)| (*k, *v))
            .collect()
    }
}

impl Index for FileTable {
    fn name(&self) -> &str {
        &self.name
    }

    fn table_type(&self) -> TableType {
        self.pager.table_type()
    }

    fn flush_all_pages(&self) -> StorageResult<()> {
        let pages = self.pager.lock_all_pages();
        pages.flush_all_pages()
    }
}
