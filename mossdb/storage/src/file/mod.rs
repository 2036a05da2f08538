mod pager;
mod table;

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use mossdb_common::types::{Key, TableType, Value};
pub use pager::{FilePager, PagesGuard};
use parking_lot::RwLock;
pub use table::FileTable;

use crate::database::{Database, Index};
use crate::error::{StorageError, StorageResult};

const TABLE_FILE_EXTENSION: &str = "tbl";

/// A database stored as a directory with one page file per table.
///
/// Tables are loaded into memory on open. Changes reach the disk only when a table's pages are
/// flushed, either through [`Index::flush_all_pages`] or [`Database::flush`].
pub struct FileDatabase {
    base_path: PathBuf,
    tables: RwLock<BTreeMap<String, Arc<FileTable>>>,
}

impl FileDatabase {
    /// Opens the database stored in `path`, creating the directory if it does not exist.
    pub fn open<P: AsRef<Path>>(path: P) -> StorageResult<Self> {
        let base_path = path.as_ref().to_path_buf();
        fs::create_dir_all(&base_path)?;

        let mut tables = BTreeMap::new();
        for entry in fs::read_dir(&base_path)? {
            let path = entry?.path();
            if !path.is_file()
                || path.extension().and_then(|ext| ext.to_str()) != Some(TABLE_FILE_EXTENSION)
            {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            let pager = FilePager::load(&path)?;
            tables.insert(
                name.to_string(),
                Arc::new(FileTable::new(name.to_string(), pager)),
            );
        }

        tracing::debug!(path = ?base_path, tables = tables.len(), "opened database");
        Ok(Self {
            base_path,
            tables: RwLock::new(tables),
        })
    }

    fn table_path(&self, name: &str) -> PathBuf {
        self.base_path
            .join(name)
            .with_extension(TABLE_FILE_EXTENSION)
    }

    fn validate_table_name(name: &str) -> StorageResult<()> {
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if valid {
            Ok(())
        } else {
            Err(StorageError::InvalidTableName(name.to_string()))
        }
    }
}

impl Database for FileDatabase {
    type Index = FileTable;

    fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn create_table(&self, table_type: TableType, name: &str) -> StorageResult<Arc<FileTable>> {
        Self::validate_table_name(name)?;
        let mut tables = self.tables.write();
        if tables.contains_key(name) {
            return Err(StorageError::TableAlreadyExists(name.to_string()));
        }
        let pager = FilePager::create(self.table_path(name), table_type);
        let table = Arc::new(FileTable::new(name.to_string(), pager));
        // The page file is what makes the table visible to a later `open`.
        table.flush_all_pages()?;
        tables.insert(name.to_string(), table.clone());
        Ok(table)
    }

    fn table(&self, name: &str) -> StorageResult<Arc<FileTable>> {
        self.tables
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| StorageError::TableNotFound(name.to_string()))
    }

    fn tables(&self) -> Vec<Arc<FileTable>> {
        self.tables.read().values().cloned().collect()
    }

    fn get(&self, table: &str, key: Key) -> StorageResult<Option<Value>> {
        Ok(self.table(table)?.get(key))
    }

    fn insert(&self, table: &str, key: Key, value: Value) -> StorageResult<()> {
        self.table(table)?.insert(key, value)
    }

    fn update(&self, table: &str, key: Key, value: Value) -> StorageResult<()> {
        self.table(table)?.update(key, value)
    }

    fn delete(&self, table: &str, key: Key) -> StorageResult<()> {
        self.table(table)?.delete(key)
    }
}
