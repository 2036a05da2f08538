use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use itertools::Itertools;
use miette::{IntoDiagnostic, Result, WrapErr, bail};
use mossdb_recovery::config::{DEFAULT_LOG_FILE_NAME, DEFAULT_SNAPSHOT_SUFFIX};
use mossdb_recovery::{RecoveryConfig, RecoveryManager, WriteAheadLog, prime};
use mossdb_storage::{Database, FileDatabase, Index};
use mossdb_transaction::TransactionManager;
use tracing_subscriber::EnvFilter;

/// Environment variable holding a tracing filter, e.g. `MOSSDB_LOG=mossdb_recovery=debug`.
const LOG_ENV: &str = "MOSSDB_LOG";

#[derive(Debug, Parser)]
#[command(name = "mossdb", version, about = "Inspect and recover mossdb database directories")]
pub struct Cli {
    #[command(flatten)]
    options: GlobalOptions,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Args)]
struct GlobalOptions {
    /// Name of the write-ahead log file inside the database directory.
    #[arg(long, global = true, default_value = DEFAULT_LOG_FILE_NAME)]
    log_file: String,

    /// Suffix appended to the database directory to name its snapshot directory.
    #[arg(long, global = true, default_value = DEFAULT_SNAPSHOT_SUFFIX)]
    snapshot_suffix: String,

    /// Print debug logs to stderr.
    #[arg(short, long, global = true)]
    verbose: bool,
}

impl GlobalOptions {
    fn recovery_config(&self) -> RecoveryConfig {
        RecoveryConfig {
            log_file_name: self.log_file.clone(),
            snapshot_suffix: self.snapshot_suffix.clone(),
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Restore the last snapshot and replay the log on top of it.
    Recover { dir: PathBuf },
    /// Recover, then drop the log records the snapshot already covers.
    Compact { dir: PathBuf },
    /// Print the records of the write-ahead log.
    Log {
        dir: PathBuf,
        /// Only print the records recovery would read.
        #[arg(long)]
        since_checkpoint: bool,
    },
    /// List the tables stored in the database directory.
    Tables {
        dir: PathBuf,
        /// Also print every entry.
        #[arg(long)]
        entries: bool,
    },
}

impl Cli {
    pub fn run(self) -> Result<()> {
        init_logging(self.options.verbose);
        let config = self.options.recovery_config();
        match self.command {
            Command::Recover { dir } => {
                let rm = recover(&dir, config)?;
                println!(
                    "recovered {} ({} tables)",
                    dir.display(),
                    rm.db().tables().len()
                );
            }
            Command::Compact { dir } => {
                let rm = recover(&dir, config)?;
                let removed = rm.compact().into_diagnostic()?;
                println!("removed {removed} log records");
            }
            Command::Log {
                dir,
                since_checkpoint,
            } => {
                let path = config.log_path(&dir);
                if !path.is_file() {
                    bail!("no log file at {}", path.display());
                }
                let wal = WriteAheadLog::open(&path).into_diagnostic()?;
                let records = if since_checkpoint {
                    wal.scan_back().into_diagnostic()?.records
                } else {
                    wal.read_all().into_diagnostic()?
                };
                for record in records {
                    println!("{record}");
                }
            }
            Command::Tables { dir, entries } => {
                if !dir.is_dir() {
                    bail!("no database directory at {}", dir.display());
                }
                let db = FileDatabase::open(&dir).into_diagnostic()?;
                for table in db.tables() {
                    let rows = table.entries();
                    println!("{} {} {}", table.name(), table.table_type(), rows.len());
                    if entries && !rows.is_empty() {
                        println!(
                            "  {}",
                            rows.iter().map(|(key, value)| format!("{key}={value}")).join(" ")
                        );
                    }
                }
            }
        }
        Ok(())
    }
}

/// Primes `dir` and runs crash recovery on it.
fn recover(dir: &Path, config: RecoveryConfig) -> Result<RecoveryManager<FileDatabase>> {
    let db = prime(dir, &config)
        .into_diagnostic()
        .wrap_err_with(|| format!("failed to prime {}", dir.display()))?;
    let rm = RecoveryManager::new(Arc::new(db), Arc::new(TransactionManager::default()), config)
        .into_diagnostic()?;
    rm.recover()
        .into_diagnostic()
        .wrap_err("recovery failed")?;
    tracing::info!(dir = ?dir, "recovery complete");
    Ok(rm)
}

fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new(
                "mossdb_cli=debug,mossdb_recovery=debug,mossdb_storage=debug,mossdb_transaction=debug",
            )
        } else {
            EnvFilter::new("warn")
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();
}
