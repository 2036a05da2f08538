//! Transaction lifecycle and lock acquisition.
//!
//! Lock ordering inside the manager: the registry lock is only held for lookups and structural
//! changes, a transaction's own lock is never held while blocking on a resource lock, and the
//! waits-for graph is always consulted under its own mutex.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use mossdb_common::types::ClientId;
use parking_lot::RwLock;

use crate::error::{TransactionError, TransactionResult};
use crate::graph::WaitsForGraph;
use crate::lock::ResourceLockManager;
use crate::resource::{LockType, Resource};
use crate::transaction::Transaction;

/// Manages the transactions of every connected client.
#[derive(Debug)]
pub struct TransactionManager {
    resource_lock_manager: Arc<ResourceLockManager>,
    waits_for_graph: WaitsForGraph,
    transactions: RwLock<HashMap<ClientId, Arc<Transaction>>>,
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new(Arc::new(ResourceLockManager::new()))
    }
}

impl TransactionManager {
    pub fn new(resource_lock_manager: Arc<ResourceLockManager>) -> Self {
        Self {
            resource_lock_manager,
            waits_for_graph: WaitsForGraph::new(),
            transactions: RwLock::new(HashMap::new()),
        }
    }

    pub fn resource_lock_manager(&self) -> &Arc<ResourceLockManager> {
        &self.resource_lock_manager
    }

    pub fn waits_for_graph(&self) -> &WaitsForGraph {
        &self.waits_for_graph
    }

    /// The active transaction of `client_id`.
    pub fn transaction(&self, client_id: ClientId) -> TransactionResult<Arc<Transaction>> {
        self.transactions
            .read()
            .get(&client_id)
            .cloned()
            .ok_or(TransactionError::NotFound(client_id))
    }

    /// The locks currently held by the transaction of `client_id`.
    pub fn locked_resources(
        &self,
        client_id: ClientId,
    ) -> TransactionResult<BTreeMap<Resource, LockType>> {
        Ok(self.transaction(client_id)?.locked_resources())
    }

    /// Ids of every client with an active transaction.
    pub fn active_clients(&self) -> Vec<ClientId> {
        let mut clients: Vec<_> = self.transactions.read().keys().copied().collect();
        clients.sort();
        clients
    }

    /// Begins a transaction for `client_id`. Fails if one is already active.
    pub fn begin(&self, client_id: ClientId) -> TransactionResult<()> {
        let mut transactions = self.transactions.write();
        if transactions.contains_key(&client_id) {
            return Err(TransactionError::AlreadyExists(client_id));
        }
        transactions.insert(client_id, Arc::new(Transaction::new(client_id)));
        tracing::debug!(client = %client_id, "transaction began");
        Ok(())
    }

    /// Locks `resource` for the transaction of `client_id`, blocking while another transaction
    /// holds a conflicting lock.
    ///
    /// Requesting a lock that is already held, or a read lock while holding a write lock, is a
    /// no-op. Requesting a write lock while holding a read lock fails with
    /// [`TransactionError::UpgradeDenied`]. If waiting for the lock would close a cycle in the
    /// waits-for graph, the request fails with [`TransactionError::Deadlock`] and leaves no
    /// edges behind.
    pub fn lock(
        &self,
        client_id: ClientId,
        resource: &Resource,
        lock_type: LockType,
    ) -> TransactionResult<()> {
        self.acquire(client_id, resource, lock_type, true)
    }

    /// Like [`TransactionManager::lock`], but fails with [`TransactionError::WouldBlock`]
    /// instead of waiting when the resource is held in a conflicting mode.
    pub fn try_lock(
        &self,
        client_id: ClientId,
        resource: &Resource,
        lock_type: LockType,
    ) -> TransactionResult<()> {
        self.acquire(client_id, resource, lock_type, false)
    }

    fn acquire(
        &self,
        client_id: ClientId,
        resource: &Resource,
        lock_type: LockType,
        blocking: bool,
    ) -> TransactionResult<()> {
        let txn = self.transaction(client_id)?;

        match txn.lock_type(resource) {
            Some(LockType::Read) if lock_type == LockType::Write => {
                return Err(TransactionError::UpgradeDenied(resource.clone()));
            }
            Some(_) => return Ok(()),
            None => {}
        }

        let conflicts = self.conflicting_transactions(client_id, resource, lock_type);
        if !self
            .waits_for_graph
            .add_edges_unless_cycle(client_id, &conflicts)
        {
            tracing::debug!(client = %client_id, %resource, "lock request rejected: deadlock");
            return Err(TransactionError::Deadlock {
                client: client_id,
                resource: resource.clone(),
            });
        }

        if blocking {
            if let Err(e) = self.resource_lock_manager.lock(resource, lock_type) {
                self.waits_for_graph.remove_edges_from(client_id);
                return Err(e.into());
            }
        } else if !self.resource_lock_manager.try_lock(resource, lock_type) {
            self.waits_for_graph.remove_edges_from(client_id);
            return Err(TransactionError::WouldBlock(resource.clone()));
        }

        txn.locks_mut().insert(resource.clone(), lock_type);
        self.waits_for_graph.remove_edges_from(client_id);
        tracing::debug!(client = %client_id, %resource, %lock_type, "lock granted");
        Ok(())
    }

    /// Releases the `lock_type` lock the transaction of `client_id` holds on `resource`.
    pub fn unlock(
        &self,
        client_id: ClientId,
        resource: &Resource,
        lock_type: LockType,
    ) -> TransactionResult<()> {
        let txn = self.transaction(client_id)?;
        let mut locks = txn.locks_mut();
        match locks.get(resource) {
            None => return Err(TransactionError::ResourceNotLocked(resource.clone())),
            Some(held) if *held != lock_type => {
                return Err(TransactionError::LockMismatch {
                    resource: resource.clone(),
                    held: *held,
                    requested: lock_type,
                });
            }
            Some(_) => {}
        }
        self.resource_lock_manager.unlock(resource, lock_type)?;
        locks.remove(resource);
        tracing::debug!(client = %client_id, %resource, %lock_type, "lock released");
        Ok(())
    }

    /// Commits the transaction of `client_id`: releases every lock it holds and removes it from
    /// the registry.
    ///
    /// Every lock is attempted even if an earlier release fails; the first failure is returned.
    pub fn commit(&self, client_id: ClientId) -> TransactionResult<()> {
        let txn = self
            .transactions
            .write()
            .remove(&client_id)
            .ok_or(TransactionError::NotFound(client_id))?;
        self.waits_for_graph.remove_node(client_id);

        let mut first_error = None;
        let locks = std::mem::take(&mut *txn.locks_mut());
        for (resource, lock_type) in locks {
            if let Err(e) = self.resource_lock_manager.unlock(&resource, lock_type) {
                tracing::warn!(client = %client_id, %resource, error = %e, "failed to release lock on commit");
                first_error.get_or_insert(e);
            }
        }
        tracing::debug!(client = %client_id, "transaction committed");

        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    /// Ids of the other transactions holding a lock on `resource` that conflicts with
    /// `lock_type`.
    fn conflicting_transactions(
        &self,
        client_id: ClientId,
        resource: &Resource,
        lock_type: LockType,
    ) -> Vec<ClientId> {
        self.transactions
            .read()
            .values()
            .filter(|txn| txn.client_id() != client_id && txn.conflicts_with(resource, lock_type))
            .map(|txn| txn.client_id())
            .collect()
    }
}
