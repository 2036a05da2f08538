//! Client operations that tie locking, storage and logging together.
//!
//! Every row operation first takes the matching lock through the transaction manager, reads the
//! current value under that lock, then logs and applies the change. Deleted and freshly
//! inserted entries are logged with a value of zero on the missing side.

use std::sync::Arc;

use mossdb_common::types::{Action, ClientId, Key, TableType, Value};
use mossdb_storage::{Database, StorageError};
use mossdb_transaction::{LockType, Resource};

use crate::error::RecoveryResult;
use crate::log::EditLog;
use crate::manager::RecoveryManager;

impl<D: Database> RecoveryManager<D> {
    /// Creates a table and logs it.
    pub fn handle_create_table(
        &self,
        table_type: TableType,
        table: &str,
    ) -> RecoveryResult<Arc<D::Index>> {
        self.log_and_create_table(table_type, table)
    }

    /// Begins a transaction for `client_id` and logs its start.
    pub fn handle_begin(&self, client_id: ClientId) -> RecoveryResult<()> {
        self.tm().begin(client_id)?;
        if let Err(e) = self.start(client_id) {
            self.tm().commit(client_id)?;
            return Err(e);
        }
        Ok(())
    }

    /// Reads `key` under a read lock.
    pub fn handle_find(
        &self,
        client_id: ClientId,
        table: &str,
        key: Key,
    ) -> RecoveryResult<Option<Value>> {
        self.tm()
            .lock(client_id, &Resource::new(table, key), LockType::Read)?;
        Ok(self.db().get(table, key)?)
    }

    pub fn handle_insert(
        &self,
        client_id: ClientId,
        table: &str,
        key: Key,
        value: Value,
    ) -> RecoveryResult<()> {
        if self.lock_for_write(client_id, table, key)?.is_some() {
            return Err(StorageError::KeyAlreadyExists {
                table: table.to_string(),
                key,
            }
            .into());
        }
        self.log_and_apply(EditLog {
            client_id,
            table: table.to_string(),
            action: Action::Insert,
            key,
            old_value: 0,
            new_value: value,
        })
    }

    pub fn handle_update(
        &self,
        client_id: ClientId,
        table: &str,
        key: Key,
        value: Value,
    ) -> RecoveryResult<()> {
        let Some(old_value) = self.lock_for_write(client_id, table, key)? else {
            return Err(StorageError::KeyNotFound {
                table: table.to_string(),
                key,
            }
            .into());
        };
        self.log_and_apply(EditLog {
            client_id,
            table: table.to_string(),
            action: Action::Update,
            key,
            old_value,
            new_value: value,
        })
    }

    pub fn handle_delete(&self, client_id: ClientId, table: &str, key: Key) -> RecoveryResult<()> {
        let Some(old_value) = self.lock_for_write(client_id, table, key)? else {
            return Err(StorageError::KeyNotFound {
                table: table.to_string(),
                key,
            }
            .into());
        };
        self.log_and_apply(EditLog {
            client_id,
            table: table.to_string(),
            action: Action::Delete,
            key,
            old_value,
            new_value: 0,
        })
    }

    /// Logs the commit of `client_id`'s transaction, then releases its locks.
    pub fn handle_commit(&self, client_id: ClientId) -> RecoveryResult<()> {
        self.tm().transaction(client_id)?;
        self.commit(client_id)?;
        self.tm().commit(client_id)?;
        Ok(())
    }

    /// Undoes `client_id`'s transaction and releases its locks.
    pub fn handle_abort(&self, client_id: ClientId) -> RecoveryResult<()> {
        self.tm().transaction(client_id)?;
        self.rollback(client_id)
    }

    /// Write-locks `(table, key)` for `client_id` and returns its current value.
    fn lock_for_write(
        &self,
        client_id: ClientId,
        table: &str,
        key: Key,
    ) -> RecoveryResult<Option<Value>> {
        self.tm()
            .lock(client_id, &Resource::new(table, key), LockType::Write)?;
        Ok(self.db().get(table, key)?)
    }
}
