// Page file layout (little-endian):
// ┌────────────┬────────────┬───────────┐
// │ u32 len    │ u32 crc32  │ payload…  │
// └────────────┴────────────┴───────────┘
// The payload is a postcard-encoded `PageFile`. The whole file is rewritten on every flush
// through a temporary sibling that is renamed into place once synced.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use crc32fast::Hasher;
use mossdb_common::types::{Key, TableType, Value};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde::{Deserialize, Serialize};

use crate::error::{StorageError, StorageResult};

const HEADER_SIZE: usize = 8; // 4 bytes length + 4 bytes crc32
const TEMP_EXTENSION: &str = "tmp";

#[derive(Debug, Serialize, Deserialize)]
struct PageFile {
    table_type: TableType,
    entries: Vec<(Key, Value)>,
}

/// Owns the pages of one table and the file they are flushed to.
pub struct FilePager {
    path: PathBuf,
    table_type: TableType,
    pages: RwLock<BTreeMap<Key, Value>>,
    dirty: AtomicBool,
}

impl FilePager {
    /// Creates a pager for a table that has never been flushed.
    pub fn create<P: AsRef<Path>>(path: P, table_type: TableType) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            table_type,
            pages: RwLock::new(BTreeMap::new()),
            dirty: AtomicBool::new(true),
        }
    }

    /// Loads the pages of a table from its page file.
    pub fn load<P: AsRef<Path>>(path: P) -> StorageResult<Self> {
        let path = path.as_ref();
        let mut reader = BufReader::new(File::open(path)?);

        let mut header = [0u8; HEADER_SIZE];
        reader.read_exact(&mut header)?;
        let len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
        let checksum = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);

        let mut payload = vec![0u8; len];
        reader.read_exact(&mut payload)?;

        let mut hasher = Hasher::new();
        hasher.update(&payload);
        if hasher.finalize() != checksum {
            return Err(StorageError::ChecksumMismatch(path.to_path_buf()));
        }

        let file: PageFile = postcard::from_bytes(&payload)
            .map_err(|e| StorageError::DeserializationFailed(e.to_string()))?;

        Ok(Self {
            path: path.to_path_buf(),
            table_type: file.table_type,
            pages: RwLock::new(file.entries.into_iter().collect()),
            dirty: AtomicBool::new(false),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn table_type(&self) -> TableType {
        self.table_type
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Shared access to the pages.
    pub fn read_pages(&self) -> RwLockReadGuard<'_, BTreeMap<Key, Value>> {
        self.pages.read()
    }

    /// Exclusive access to the pages for a mutation. The pager is marked dirty.
    pub fn write_pages(&self) -> RwLockWriteGuard<'_, BTreeMap<Key, Value>> {
        let pages = self.pages.write();
        self.dirty.store(true, Ordering::Release);
        pages
    }

    /// Blocks every reader and writer of this table until the returned guard is dropped.
    /// Dropping the guard is the `unlock_all_pages` half of the pair.
    pub fn lock_all_pages(&self) -> PagesGuard<'_> {
        PagesGuard {
            pager: self,
            pages: self.pages.write(),
        }
    }

    fn write_file(&self, pages: &BTreeMap<Key, Value>) -> StorageResult<()> {
        let file = PageFile {
            table_type: self.table_type,
            entries: pages.iter().map(|(k, v)| (*k, *v)).collect(),
        };
        let payload = postcard::to_allocvec(&file)
            .map_err(|e| StorageError::SerializationFailed(e.to_string()))?;

        let mut hasher = Hasher::new();
        hasher.update(&payload);
        let checksum = hasher.finalize();

        let temp_path = self.path.with_extension(TEMP_EXTENSION);
        {
            let mut writer = BufWriter::new(File::create(&temp_path)?);
            writer.write_all(&(payload.len() as u32).to_le_bytes())?;
            writer.write_all(&checksum.to_le_bytes())?;
            writer.write_all(&payload)?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&temp_path, &self.path)?;
        Ok(())
    }
}

/// Exclusive hold on every page of a [`FilePager`].
pub struct PagesGuard<'a> {
    pager: &'a FilePager,
    pages: RwLockWriteGuard<'a, BTreeMap<Key, Value>>,
}

impl PagesGuard<'_> {
    /// Writes the pages to the page file if anything changed since the last flush.
    pub fn flush_all_pages(&self) -> StorageResult<()> {
        if !self.pager.is_dirty() {
            return Ok(());
        }
        self.pager.write_file(&self.pages)?;
        self.pager.dirty.store(false, Ordering::Release);
        tracing::debug!(path = ?self.pager.path, entries = self.pages.len(), "flushed pages");
        Ok(())
    }
}

impl Deref for PagesGuard<'_> {
    type Target = BTreeMap<Key, Value>;

    fn deref(&self) -> &Self::Target {
        &self.pages
    }
}

impl DerefMut for PagesGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.pager.dirty.store(true, Ordering::Release);
        &mut self.pages
    }
}
