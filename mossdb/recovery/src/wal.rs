//! The write-ahead log file.
//!
//! Records are stored one per line using the text encoding of [`LogRecord`]. Every append is
//! synced to disk before it returns. The file can be read front to back, or scanned from the
//! end in fixed-size blocks to find the most recent checkpoint without reading the whole log.

use std::collections::BTreeSet;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use mossdb_common::types::ClientId;

use crate::error::RecoveryResult;
use crate::log::LogRecord;

const BLOCK_SIZE: u64 = 4096;

/// Append-only log of [`LogRecord`]s.
#[derive(Debug)]
pub struct WriteAheadLog {
    file: BufWriter<File>,
    path: PathBuf,
}

/// The tail of the log that recovery has to look at.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogScan {
    /// Records from the scan boundary to the end of the log, oldest first.
    pub records: Vec<LogRecord>,
    /// Position of the most recent checkpoint in `records`, if the log has one.
    pub checkpoint_index: Option<usize>,
}

impl LogScan {
    /// Clients that were uncommitted when the checkpoint was taken.
    pub fn checkpoint_ids(&self) -> &[ClientId] {
        match self.checkpoint_index.map(|i| &self.records[i]) {
            Some(LogRecord::Checkpoint(ids)) => ids,
            _ => &[],
        }
    }

    /// Records written after the checkpoint, or every scanned record if there is none.
    pub fn after_checkpoint(&self) -> &[LogRecord] {
        let start = self.checkpoint_index.map_or(0, |i| i + 1);
        &self.records[start..]
    }
}

impl WriteAheadLog {
    /// Opens the log at `path`, creating it and its parent directories if needed.
    ///
    /// A final line without a terminating newline is the remains of an append that never
    /// completed, and is cut off so that new records start on a fresh line.
    pub fn open<P: AsRef<Path>>(path: P) -> RecoveryResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)?;

        let len = file.metadata()?.len();
        let complete = complete_len(&mut file, len)?;
        if complete < len {
            tracing::warn!(
                path = ?path,
                discarded = len - complete,
                "discarding torn record at the end of the log"
            );
            file.set_len(complete)?;
            file.sync_data()?;
        }
        file.seek(SeekFrom::End(0))?;

        Ok(Self {
            file: BufWriter::new(file),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends `record` and syncs it to disk.
    ///
    /// If the write fails, the file is truncated back to its previous length so that no partial
    /// record is left behind.
    pub fn append(&mut self, record: &LogRecord) -> RecoveryResult<()> {
        let line = format!("{record}\n");
        let original_pos = self.file.stream_position()?;

        let written = self
            .file
            .write_all(line.as_bytes())
            .and_then(|()| self.file.flush())
            .and_then(|()| self.file.get_ref().sync_data());
        if let Err(e) = written {
            // Drop whatever is still buffered before restoring the old length.
            let (mut file, _) = self.replace_writer()?.into_parts();
            file.set_len(original_pos)?;
            file.seek(SeekFrom::Start(original_pos))?;
            self.file = BufWriter::new(file);
            return Err(e.into());
        }

        tracing::debug!(%record, "appended log record");
        Ok(())
    }

    /// Reads every record, oldest first.
    pub fn read_all(&self) -> RecoveryResult<Vec<LogRecord>> {
        let reader = BufReader::new(File::open(&self.path)?);
        let mut records = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            records.push(line.parse()?);
        }
        Ok(records)
    }

    /// Scans the log backward for the most recent checkpoint.
    ///
    /// Scanning stops at the checkpoint once every client listed in it has had its `start`
    /// record read, or at the beginning of the file. Without a checkpoint the whole log is
    /// returned.
    pub fn scan_back(&self) -> RecoveryResult<LogScan> {
        let mut records = Vec::new();
        let mut checkpoint_pos = None;
        let mut pending = BTreeSet::new();

        for line in ReverseLines::new(File::open(&self.path)?)? {
            let record: LogRecord = line?.parse()?;
            match &record {
                LogRecord::Checkpoint(ids) if checkpoint_pos.is_none() => {
                    checkpoint_pos = Some(records.len());
                    pending.extend(ids.iter().copied());
                }
                LogRecord::Start(id) if checkpoint_pos.is_some() => {
                    pending.remove(id);
                }
                _ => {}
            }
            records.push(record);
            if checkpoint_pos.is_some() && pending.is_empty() {
                break;
            }
        }

        records.reverse();
        let checkpoint_index = checkpoint_pos.map(|pos| records.len() - 1 - pos);
        Ok(LogScan {
            records,
            checkpoint_index,
        })
    }

    /// Replaces the contents of the log with `records`.
    ///
    /// The new log is written to a temporary file first and renamed over the old one. The
    /// directory is synced after the rename so the new log survives a crash.
    pub fn rewrite(&mut self, records: &[LogRecord]) -> RecoveryResult<()> {
        let mut tmp_path = OsString::from(self.path.as_os_str());
        tmp_path.push(".tmp");
        let tmp_path = PathBuf::from(tmp_path);

        let mut writer = BufWriter::new(File::create(&tmp_path)?);
        for record in records {
            writeln!(writer, "{record}")?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()?;
        drop(writer);

        self.file.flush()?;
        fs::rename(&tmp_path, &self.path)?;
        sync_parent_dir(&self.path)?;

        let mut file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        file.seek(SeekFrom::End(0))?;
        self.file = BufWriter::new(file);
        Ok(())
    }

    fn replace_writer(&mut self) -> io::Result<BufWriter<File>> {
        let file = self.file.get_ref().try_clone()?;
        Ok(std::mem::replace(&mut self.file, BufWriter::new(file)))
    }
}

/// Syncs the directory entry of `path`.
fn sync_parent_dir(path: &Path) -> io::Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    File::open(parent)?.sync_all()
}

/// Length of the prefix of the file that ends with a newline.
fn complete_len(file: &mut File, len: u64) -> io::Result<u64> {
    let mut end = len;
    while end > 0 {
        let start = end.saturating_sub(BLOCK_SIZE);
        let mut block = vec![0; (end - start) as usize];
        file.seek(SeekFrom::Start(start))?;
        file.read_exact(&mut block)?;
        if let Some(i) = block.iter().rposition(|&b| b == b'\n') {
            return Ok(start + i as u64 + 1);
        }
        end = start;
    }
    Ok(0)
}

/// Iterates over the non-empty lines of a file from last to first, reading it in blocks.
struct ReverseLines {
    file: File,
    pos: u64,
    buf: Vec<u8>,
}

impl ReverseLines {
    fn new(file: File) -> io::Result<Self> {
        let pos = file.metadata()?.len();
        Ok(Self {
            file,
            pos,
            buf: Vec::new(),
        })
    }

    fn read_block(&mut self) -> io::Result<()> {
        let start = self.pos.saturating_sub(BLOCK_SIZE);
        let mut block = vec![0; (self.pos - start) as usize];
        self.file.seek(SeekFrom::Start(start))?;
        self.file.read_exact(&mut block)?;
        block.append(&mut self.buf);
        self.buf = block;
        self.pos = start;
        Ok(())
    }

    fn decode(bytes: Vec<u8>) -> io::Result<String> {
        String::from_utf8(bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

impl Iterator for ReverseLines {
    type Item = io::Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(i) = self.buf.iter().rposition(|&b| b == b'\n') {
                let line = self.buf.split_off(i + 1);
                self.buf.truncate(i);
                if line.iter().all(u8::is_ascii_whitespace) {
                    continue;
                }
                return Some(Self::decode(line));
            }
            if self.pos == 0 {
                if self.buf.iter().all(u8::is_ascii_whitespace) {
                    return None;
                }
                return Some(Self::decode(std::mem::take(&mut self.buf)));
            }
            if let Err(e) = self.read_block() {
                return Some(Err(e));
            }
        }
    }
}
