//! The recovery manager: logging, checkpoints, redo and undo, crash recovery and rollback.
//!
//! All log writes go through a single mutex, so records reach the log in one total order. The
//! mutex is also held while a logged edit is applied to the database and for the whole of a
//! checkpoint, which keeps every checkpoint consistent with the log.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use mossdb_common::types::{Action, ClientId, TableType};
use mossdb_storage::{Database, Index, StorageError};
use mossdb_transaction::{LockType, Resource, TransactionError, TransactionManager};
use parking_lot::Mutex;

use crate::config::RecoveryConfig;
use crate::error::{RecoveryError, RecoveryResult};
use crate::log::{EditLog, LogRecord, is_valid_name};
use crate::snapshot;
use crate::wal::{LogScan, WriteAheadLog};

struct LogState {
    wal: WriteAheadLog,
    /// Edits of every client with an open transaction, oldest first. A client is registered
    /// here from its `start` record until its `commit` record.
    tx_stack: HashMap<ClientId, Vec<EditLog>>,
}

/// Write-ahead logging and recovery for a database `D`.
pub struct RecoveryManager<D: Database> {
    db: Arc<D>,
    tm: Arc<TransactionManager>,
    config: RecoveryConfig,
    state: Mutex<LogState>,
}

impl<D: Database> RecoveryManager<D> {
    /// Creates a recovery manager logging to the log file inside the database directory.
    pub fn new(
        db: Arc<D>,
        tm: Arc<TransactionManager>,
        config: RecoveryConfig,
    ) -> RecoveryResult<Self> {
        let wal = WriteAheadLog::open(config.log_path(db.base_path()))?;
        Ok(Self {
            db,
            tm,
            config,
            state: Mutex::new(LogState {
                wal,
                tx_stack: HashMap::new(),
            }),
        })
    }

    pub fn db(&self) -> &Arc<D> {
        &self.db
    }

    pub fn tm(&self) -> &Arc<TransactionManager> {
        &self.tm
    }

    pub fn config(&self) -> &RecoveryConfig {
        &self.config
    }

    /// Logs the creation of a table.
    pub fn table(&self, table_type: TableType, table: &str) -> RecoveryResult<()> {
        validate_name(table)?;
        self.state.lock().wal.append(&LogRecord::Table {
            table_type,
            table: table.to_string(),
        })
    }

    /// Logs the start of a transaction and registers the client as uncommitted.
    pub fn start(&self, client_id: ClientId) -> RecoveryResult<()> {
        let mut state = self.state.lock();
        state.wal.append(&LogRecord::Start(client_id))?;
        state.tx_stack.entry(client_id).or_default();
        Ok(())
    }

    /// Logs an edit and pushes it onto the client's undo stack.
    ///
    /// The edit stays on the undo stack even if the log write fails; callers must treat such a
    /// failure as fatal to the current operation.
    pub fn edit(&self, edit: EditLog) -> RecoveryResult<()> {
        validate_name(&edit.table)?;
        let record = LogRecord::Edit(edit.clone());
        let mut state = self.state.lock();
        state.tx_stack.entry(edit.client_id).or_default().push(edit);
        state.wal.append(&record)
    }

    /// Logs a commit and discards the client's undo stack.
    pub fn commit(&self, client_id: ClientId) -> RecoveryResult<()> {
        let mut state = self.state.lock();
        state.wal.append(&LogRecord::Commit(client_id))?;
        state.tx_stack.remove(&client_id);
        Ok(())
    }

    /// Flushes every table, logs the set of uncommitted clients and replaces the snapshot of
    /// the database directory.
    pub fn checkpoint(&self) -> RecoveryResult<()> {
        let mut state = self.state.lock();
        for table in self.db.tables() {
            table.flush_all_pages()?;
        }

        // Clients without edits are listed too, so a later scan still reaches their start.
        let mut uncommitted: Vec<_> = state.tx_stack.keys().copied().collect();
        uncommitted.sort();
        let count = uncommitted.len();
        state.wal.append(&LogRecord::Checkpoint(uncommitted))?;

        // The snapshot includes the log, so it must be taken after the checkpoint record.
        snapshot::take_snapshot(self.db.base_path(), &self.config)?;
        tracing::info!(uncommitted = count, "checkpoint taken");
        Ok(())
    }

    /// The undo stack of `client_id`, oldest edit first.
    pub fn undo_stack(&self, client_id: ClientId) -> Vec<EditLog> {
        self.state
            .lock()
            .tx_stack
            .get(&client_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Every record in the log, oldest first.
    pub fn read_logs(&self) -> RecoveryResult<Vec<LogRecord>> {
        self.state.lock().wal.read_all()
    }

    /// The records recovery needs: everything from the last checkpoint, reaching further back
    /// to the start of any transaction that was open at that checkpoint.
    pub fn scan_logs(&self) -> RecoveryResult<LogScan> {
        self.state.lock().wal.scan_back()
    }

    /// Replays a logged table creation or edit.
    ///
    /// Replaying is idempotent: a table that already exists is left alone, an insert of an
    /// existing key becomes an update and an update of a missing key becomes an insert.
    /// Deletes are replayed strictly.
    pub fn redo(&self, record: &LogRecord) -> RecoveryResult<()> {
        match record {
            LogRecord::Table { table_type, table } => {
                match self.db.create_table(*table_type, table) {
                    Ok(_) | Err(StorageError::TableAlreadyExists(_)) => Ok(()),
                    Err(e) => Err(e.into()),
                }
            }
            LogRecord::Edit(edit) => self.replay(edit),
            other => Err(RecoveryError::NotRedoable(other.to_string())),
        }
    }

    /// Reverts an edit by applying its inverse with the old value.
    ///
    /// The inverse is logged as an edit of its own before it is applied, so an interrupted undo
    /// can itself be replayed and undone. It is not pushed onto the undo stack.
    pub fn undo(&self, edit: &EditLog) -> RecoveryResult<()> {
        self.undo_locked(&mut self.state.lock(), edit)
    }

    fn undo_locked(&self, state: &mut LogState, edit: &EditLog) -> RecoveryResult<()> {
        let compensation = EditLog {
            client_id: edit.client_id,
            table: edit.table.clone(),
            action: edit.action.inverse(),
            key: edit.key,
            old_value: edit.new_value,
            new_value: edit.old_value,
        };
        let current = self.db.get(&compensation.table, compensation.key)?;
        if compensation.action == Action::Delete && current.is_none() {
            return Err(StorageError::KeyNotFound {
                table: compensation.table,
                key: compensation.key,
            }
            .into());
        }
        state.wal.append(&LogRecord::Edit(compensation.clone()))?;
        self.replay(&compensation)
    }

    /// Brings the database back to a consistent state after a crash.
    ///
    /// Expects the database to hold the snapshot of the last checkpoint, as left by
    /// [`prime`](crate::prime). Every table creation and edit logged after the checkpoint is
    /// replayed, whether its transaction committed or not. Then the edits of every transaction
    /// that never committed are undone, newest first, back to its `start` record, and the
    /// transaction is logged as finished. A checkpoint of the recovered state closes recovery.
    pub fn recover(&self) -> RecoveryResult<()> {
        let scan = self.scan_logs()?;

        let mut losers: BTreeSet<ClientId> = scan.checkpoint_ids().iter().copied().collect();
        let mut redone = 0;
        for record in scan.after_checkpoint() {
            match record {
                LogRecord::Start(client_id) => {
                    losers.insert(*client_id);
                }
                LogRecord::Commit(client_id) => {
                    losers.remove(client_id);
                }
                LogRecord::Edit(edit) => {
                    // The start may precede the checkpoint without being listed in it.
                    losers.insert(edit.client_id);
                    self.redo(record)?;
                    redone += 1;
                }
                LogRecord::Table { .. } => {
                    self.redo(record)?;
                    redone += 1;
                }
                LogRecord::Checkpoint(_) => {}
            }
        }
        tracing::info!(
            redone,
            uncommitted = losers.len(),
            "replayed log since last checkpoint"
        );

        for client_id in &losers {
            match self.tm.begin(*client_id) {
                Ok(()) | Err(TransactionError::AlreadyExists(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }

        let mut pending = losers.clone();
        let mut undone = 0;
        for record in scan.records.iter().rev() {
            if pending.is_empty() {
                break;
            }
            match record {
                LogRecord::Edit(edit) if pending.contains(&edit.client_id) => {
                    let resource = Resource::new(edit.table.as_str(), edit.key);
                    self.tm.lock(edit.client_id, &resource, LockType::Write)?;
                    self.undo(edit)?;
                    undone += 1;
                }
                LogRecord::Start(client_id) => {
                    pending.remove(client_id);
                }
                _ => {}
            }
        }

        for client_id in &losers {
            self.commit(*client_id)?;
            self.tm.commit(*client_id)?;
        }
        tracing::info!(undone, rolled_back = losers.len(), "recovery finished");

        self.checkpoint()
    }

    /// Aborts the open transaction of `client_id`.
    ///
    /// The client's edits are undone newest first, each one popped from the undo stack once its
    /// compensation is applied. If an undo fails, the error is returned and the edits not yet
    /// undone stay on the stack. Otherwise the transaction is logged as finished and its locks
    /// are released.
    pub fn rollback(&self, client_id: ClientId) -> RecoveryResult<()> {
        let mut undone = 0;
        loop {
            match self.undo_last(client_id) {
                Ok(true) => undone += 1,
                Ok(false) => break,
                Err(e) => {
                    tracing::warn!(client = %client_id, error = %e, "rollback interrupted");
                    return Err(e);
                }
            }
        }

        self.commit(client_id)?;
        match self.tm.commit(client_id) {
            Ok(()) | Err(TransactionError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }
        tracing::debug!(client = %client_id, undone, "transaction rolled back");
        Ok(())
    }

    /// Undoes the newest edit on the undo stack of `client_id` and pops it.
    ///
    /// Returns `false` if the stack is empty. The client stays registered until it commits.
    pub(crate) fn undo_last(&self, client_id: ClientId) -> RecoveryResult<bool> {
        let mut state = self.state.lock();
        let Some(edit) = state
            .tx_stack
            .get(&client_id)
            .and_then(|edits| edits.last())
            .cloned()
        else {
            return Ok(false);
        };
        self.undo_locked(&mut state, &edit)?;
        if let Some(edits) = state.tx_stack.get_mut(&client_id) {
            edits.pop();
        }
        Ok(true)
    }

    /// Drops the records in front of the recovery boundary from the log.
    ///
    /// Those records are already covered by the snapshot of the last checkpoint. Returns the
    /// number of records removed; nothing is removed while the log has no checkpoint.
    pub fn compact(&self) -> RecoveryResult<usize> {
        let mut state = self.state.lock();
        let scan = state.wal.scan_back()?;
        if scan.checkpoint_index.is_none() {
            return Ok(0);
        }
        let total = state.wal.read_all()?.len();
        state.wal.rewrite(&scan.records)?;
        let removed = total - scan.records.len();
        tracing::info!(removed, kept = scan.records.len(), "compacted log");
        Ok(removed)
    }

    /// Logs `edit`, applies it to the database and pushes it onto the client's undo stack.
    ///
    /// The caller is expected to have checked that the edit applies.
    pub(crate) fn log_and_apply(&self, edit: EditLog) -> RecoveryResult<()> {
        validate_name(&edit.table)?;
        let mut state = self.state.lock();
        state.wal.append(&LogRecord::Edit(edit.clone()))?;
        match edit.action {
            Action::Insert => self.db.insert(&edit.table, edit.key, edit.new_value)?,
            Action::Update => self.db.update(&edit.table, edit.key, edit.new_value)?,
            Action::Delete => self.db.delete(&edit.table, edit.key)?,
        }
        state.tx_stack.entry(edit.client_id).or_default().push(edit);
        Ok(())
    }

    /// Logs a table creation and creates the table.
    pub(crate) fn log_and_create_table(
        &self,
        table_type: TableType,
        table: &str,
    ) -> RecoveryResult<Arc<D::Index>> {
        validate_name(table)?;
        let mut state = self.state.lock();
        if self.db.table(table).is_ok() {
            return Err(StorageError::TableAlreadyExists(table.to_string()).into());
        }
        state.wal.append(&LogRecord::Table {
            table_type,
            table: table.to_string(),
        })?;
        Ok(self.db.create_table(table_type, table)?)
    }

    fn replay(&self, edit: &EditLog) -> RecoveryResult<()> {
        let EditLog {
            table,
            key,
            new_value,
            ..
        } = edit;
        let result = match edit.action {
            Action::Insert => match self.db.insert(table, *key, *new_value) {
                Err(StorageError::KeyAlreadyExists { .. }) => {
                    self.db.update(table, *key, *new_value)
                }
                result => result,
            },
            Action::Update => match self.db.update(table, *key, *new_value) {
                Err(StorageError::KeyNotFound { .. }) => self.db.insert(table, *key, *new_value),
                result => result,
            },
            Action::Delete => self.db.delete(table, *key),
        };
        Ok(result?)
    }
}

fn validate_name(name: &str) -> RecoveryResult<()> {
    if is_valid_name(name) {
        Ok(())
    } else {
        Err(RecoveryError::InvalidName(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use mossdb_storage::FileDatabase;

    use super::*;

    fn setup() -> (tempfile::TempDir, RecoveryManager<FileDatabase>) {
        let dir = tempfile::tempdir().unwrap();
        let db = FileDatabase::open(dir.path().join("db")).unwrap();
        let rm = RecoveryManager::new(
            Arc::new(db),
            Arc::new(TransactionManager::default()),
            RecoveryConfig::default(),
        )
        .unwrap();
        (dir, rm)
    }

    fn update(client_id: ClientId, key: i64, old_value: i64, new_value: i64) -> EditLog {
        EditLog {
            client_id,
            table: "t".to_string(),
            action: Action::Update,
            key,
            old_value,
            new_value,
        }
    }

    #[test]
    fn test_edit_and_commit() {
        let (_dir, rm) = setup();
        let a = ClientId::new_v4();
        rm.start(a).unwrap();
        let edit = update(a, 5, 1, 2);
        rm.edit(edit.clone()).unwrap();
        assert_eq!(rm.undo_stack(a), vec![edit.clone()]);
        assert_eq!(rm.read_logs().unwrap().last(), Some(&LogRecord::Edit(edit)));

        rm.commit(a).unwrap();
        assert!(rm.undo_stack(a).is_empty());
        assert_eq!(rm.read_logs().unwrap().last(), Some(&LogRecord::Commit(a)));
    }

    #[test]
    fn test_invalid_names_are_rejected() {
        let (_dir, rm) = setup();
        let a = ClientId::new_v4();
        let mut edit = update(a, 5, 1, 2);
        edit.table = "two words".to_string();
        assert!(matches!(rm.edit(edit), Err(RecoveryError::InvalidName(_))));
        assert!(matches!(
            rm.table(TableType::BTree, ""),
            Err(RecoveryError::InvalidName(_))
        ));
        assert!(rm.read_logs().unwrap().is_empty());
        assert!(rm.undo_stack(a).is_empty());
    }

    #[test]
    fn test_redo_is_idempotent() {
        let (_dir, rm) = setup();
        let a = ClientId::new_v4();
        let table = LogRecord::Table {
            table_type: TableType::Hash,
            table: "t".to_string(),
        };
        rm.redo(&table).unwrap();
        rm.redo(&table).unwrap();

        let insert = LogRecord::Edit(EditLog {
            action: Action::Insert,
            ..update(a, 5, 0, 2)
        });
        rm.redo(&insert).unwrap();
        rm.redo(&insert).unwrap();
        assert_eq!(rm.db().get("t", 5).unwrap(), Some(2));

        // An update of a missing key is replayed as an insert.
        rm.redo(&LogRecord::Edit(update(a, 6, 1, 3))).unwrap();
        assert_eq!(rm.db().get("t", 6).unwrap(), Some(3));

        let delete = LogRecord::Edit(EditLog {
            action: Action::Delete,
            ..update(a, 6, 3, 0)
        });
        rm.redo(&delete).unwrap();
        assert!(matches!(
            rm.redo(&delete),
            Err(RecoveryError::Storage(StorageError::KeyNotFound { .. }))
        ));

        for record in [
            LogRecord::Start(a),
            LogRecord::Commit(a),
            LogRecord::Checkpoint(vec![]),
        ] {
            assert!(matches!(
                rm.redo(&record),
                Err(RecoveryError::NotRedoable(_))
            ));
        }
    }

    #[test]
    fn test_undo_logs_compensation() {
        let (_dir, rm) = setup();
        let a = ClientId::new_v4();
        rm.db().create_table(TableType::BTree, "t").unwrap();
        rm.db().insert("t", 5, 2).unwrap();

        rm.undo(&update(a, 5, 1, 2)).unwrap();
        assert_eq!(rm.db().get("t", 5).unwrap(), Some(1));
        assert_eq!(
            rm.read_logs().unwrap(),
            vec![LogRecord::Edit(update(a, 5, 2, 1))]
        );
        // Compensations are not undone by a later rollback.
        assert!(rm.undo_stack(a).is_empty());
    }

    #[test]
    fn test_rollback_restores_stack_on_failure() {
        let (_dir, rm) = setup();
        let a = ClientId::new_v4();
        rm.db().create_table(TableType::BTree, "t").unwrap();
        rm.db().insert("t", 1, 10).unwrap();

        // The first edit refers to a key that is gone, so undoing it fails.
        let missing = EditLog {
            action: Action::Insert,
            ..update(a, 9, 0, 90)
        };
        let present = update(a, 1, 5, 10);
        rm.edit(missing.clone()).unwrap();
        rm.edit(present.clone()).unwrap();

        assert!(rm.rollback(a).is_err());
        assert_eq!(rm.db().get("t", 1).unwrap(), Some(5));
        assert_eq!(rm.undo_stack(a), vec![missing]);
        // Only the compensation that was applied reached the log.
        assert_eq!(
            rm.read_logs().unwrap().last(),
            Some(&LogRecord::Edit(update(a, 1, 10, 5)))
        );
    }

    #[test]
    fn test_checkpoint_records_uncommitted_clients() {
        let (_dir, rm) = setup();
        let (a, c) = (ClientId::new_v4(), ClientId::new_v4());
        rm.start(a).unwrap();
        rm.edit(update(a, 1, 0, 1)).unwrap();
        rm.commit(a).unwrap();
        rm.start(c).unwrap();
        rm.edit(update(c, 2, 0, 1)).unwrap();

        rm.checkpoint().unwrap();
        assert_eq!(
            rm.read_logs().unwrap().last(),
            Some(&LogRecord::Checkpoint(vec![c]))
        );
        assert!(
            rm.config()
                .snapshot_dir(rm.db().base_path())
                .join(&rm.config().log_file_name)
                .is_file()
        );
    }

    #[test]
    fn test_checkpoint_lists_started_clients_without_edits() {
        let (_dir, rm) = setup();
        let a = ClientId::new_v4();
        rm.start(a).unwrap();
        rm.checkpoint().unwrap();
        assert_eq!(
            rm.read_logs().unwrap().last(),
            Some(&LogRecord::Checkpoint(vec![a]))
        );

        rm.commit(a).unwrap();
        rm.checkpoint().unwrap();
        assert_eq!(
            rm.read_logs().unwrap().last(),
            Some(&LogRecord::Checkpoint(vec![]))
        );
    }

    #[test]
    fn test_checkpoint_during_rollback_keeps_client_uncommitted() {
        let dir = tempfile::tempdir().unwrap();
        let db_dir = dir.path().join("db");
        let config = RecoveryConfig::default();
        let open = || {
            let db = crate::prime(&db_dir, &config).unwrap();
            RecoveryManager::new(
                Arc::new(db),
                Arc::new(TransactionManager::default()),
                config.clone(),
            )
            .unwrap()
        };

        let a = ClientId::new_v4();
        {
            let rm = open();
            rm.handle_create_table(TableType::BTree, "t").unwrap();
            rm.handle_begin(a).unwrap();
            rm.handle_insert(a, "t", 1, 10).unwrap();
            rm.handle_insert(a, "t", 2, 20).unwrap();

            assert!(rm.undo_last(a).unwrap());
            rm.checkpoint().unwrap();
            assert_eq!(
                rm.read_logs().unwrap().last(),
                Some(&LogRecord::Checkpoint(vec![a]))
            );
            assert_eq!(rm.undo_stack(a).len(), 1);
            assert_eq!(rm.db().get("t", 2).unwrap(), None);
            // Crash before the rollback finishes.
        }

        let rm = open();
        assert_eq!(rm.db().get("t", 1).unwrap(), Some(10));
        rm.recover().unwrap();
        assert_eq!(rm.db().get("t", 1).unwrap(), None);
        assert_eq!(rm.db().get("t", 2).unwrap(), None);
    }

    #[test]
    fn test_compact_keeps_records_from_boundary() {
        let (_dir, rm) = setup();
        let (a, c) = (ClientId::new_v4(), ClientId::new_v4());
        assert_eq!(rm.compact().unwrap(), 0);

        rm.start(a).unwrap();
        rm.commit(a).unwrap();
        rm.start(c).unwrap();
        rm.edit(update(c, 2, 0, 1)).unwrap();
        rm.checkpoint().unwrap();
        rm.commit(c).unwrap();

        assert_eq!(rm.compact().unwrap(), 2);
        assert_eq!(
            rm.read_logs().unwrap(),
            vec![
                LogRecord::Start(c),
                LogRecord::Edit(update(c, 2, 0, 1)),
                LogRecord::Checkpoint(vec![c]),
                LogRecord::Commit(c),
            ]
        );
    }
}
