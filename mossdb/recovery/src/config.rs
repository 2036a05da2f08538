use std::ffi::OsString;
use std::path::{Path, PathBuf};

pub const DEFAULT_LOG_FILE_NAME: &str = "mossdb.log";
pub const DEFAULT_SNAPSHOT_SUFFIX: &str = "-recovery";

/// Where the recovery manager keeps its files, relative to the database directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryConfig {
    /// Name of the write-ahead log file inside the database directory.
    pub log_file_name: String,
    /// Suffix appended to the database directory name to form the snapshot directory.
    pub snapshot_suffix: String,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            log_file_name: DEFAULT_LOG_FILE_NAME.to_string(),
            snapshot_suffix: DEFAULT_SNAPSHOT_SUFFIX.to_string(),
        }
    }
}

impl RecoveryConfig {
    pub fn log_path(&self, db_dir: &Path) -> PathBuf {
        db_dir.join(&self.log_file_name)
    }

    /// The snapshot directory sitting next to `db_dir`, e.g. `data/` -> `data-recovery/`.
    pub fn snapshot_dir(&self, db_dir: &Path) -> PathBuf {
        // Collecting the components drops any trailing separator.
        let db_dir: PathBuf = db_dir.components().collect();
        let mut dir = OsString::from(db_dir.as_os_str());
        dir.push(&self.snapshot_suffix);
        PathBuf::from(dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_dir() {
        let config = RecoveryConfig::default();
        assert_eq!(
            config.snapshot_dir(Path::new("/var/lib/data/")),
            PathBuf::from("/var/lib/data-recovery")
        );
        assert_eq!(
            config.snapshot_dir(Path::new("data")),
            PathBuf::from("data-recovery")
        );
        assert_eq!(
            config.log_path(Path::new("data")),
            PathBuf::from("data/mossdb.log")
        );
    }
}
