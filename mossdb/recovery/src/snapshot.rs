//! Full copies of the database directory.
//!
//! A checkpoint copies the database directory to a sibling snapshot directory (`<db>` ->
//! `<db>-recovery` by default). On startup [`prime`] treats an existing snapshot as the
//! authoritative state of the database and restores it before the database is opened.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use mossdb_storage::{FileDatabase, StorageResult};
use walkdir::WalkDir;

use crate::config::RecoveryConfig;
use crate::error::RecoveryResult;

/// Recursively copies the directory `from` to `to`, creating `to` if needed.
pub fn copy_dir(from: &Path, to: &Path) -> RecoveryResult<()> {
    fs::create_dir_all(to)?;
    for entry in WalkDir::new(from).min_depth(1) {
        let entry = entry.map_err(std::io::Error::from)?;
        let relative = entry
            .path()
            .strip_prefix(from)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
        let target = to.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Replaces the snapshot of `db_dir` with a fresh copy of it.
///
/// The copy is assembled next to the snapshot and swapped in once complete, so a crash in the
/// middle leaves the previous snapshot untouched.
pub fn take_snapshot(db_dir: &Path, config: &RecoveryConfig) -> RecoveryResult<PathBuf> {
    let snapshot_dir = config.snapshot_dir(db_dir);
    let staging_dir = staging_dir(&snapshot_dir);
    if staging_dir.exists() {
        fs::remove_dir_all(&staging_dir)?;
    }
    copy_dir(db_dir, &staging_dir)?;
    if snapshot_dir.exists() {
        fs::remove_dir_all(&snapshot_dir)?;
    }
    fs::rename(&staging_dir, &snapshot_dir)?;
    tracing::debug!(from = ?db_dir, to = ?snapshot_dir, "took snapshot");
    Ok(snapshot_dir)
}

fn staging_dir(snapshot_dir: &Path) -> PathBuf {
    let mut dir = OsString::from(snapshot_dir.as_os_str());
    dir.push(".tmp");
    PathBuf::from(dir)
}

/// Prepares the database directory `folder` and opens a [`FileDatabase`] on it.
///
/// See [`prime_with`].
pub fn prime<P: AsRef<Path>>(folder: P, config: &RecoveryConfig) -> RecoveryResult<FileDatabase> {
    prime_with(folder, config, |path: &Path| FileDatabase::open(path))
}

/// Prepares the database directory `folder` and opens it with `open`.
///
/// Without a snapshot, the directory is opened as it is and a first snapshot is taken. With
/// one, the current log file is copied into the snapshot, then the database directory is
/// replaced by the snapshot. The database then holds the state of the last checkpoint, and the
/// log holds everything written since.
pub fn prime_with<P, D, F>(folder: P, config: &RecoveryConfig, open: F) -> RecoveryResult<D>
where
    P: AsRef<Path>,
    F: FnOnce(&Path) -> StorageResult<D>,
{
    let db_dir = folder.as_ref();
    let snapshot_dir = config.snapshot_dir(db_dir);

    if snapshot_dir.is_dir() {
        let log_path = config.log_path(db_dir);
        if log_path.is_file() {
            fs::copy(&log_path, config.log_path(&snapshot_dir))?;
        }
        if db_dir.exists() {
            fs::remove_dir_all(db_dir)?;
        }
        copy_dir(&snapshot_dir, db_dir)?;
        tracing::info!(path = ?db_dir, snapshot = ?snapshot_dir, "restored database from snapshot");
    } else {
        fs::create_dir_all(db_dir)?;
        take_snapshot(db_dir, config)?;
        tracing::info!(path = ?db_dir, snapshot = ?snapshot_dir, "created initial snapshot");
    }

    Ok(open(db_dir)?)
}
