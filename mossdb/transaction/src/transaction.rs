use std::collections::BTreeMap;

use mossdb_common::types::ClientId;
use parking_lot::{RwLock, RwLockWriteGuard};

use crate::resource::{LockType, Resource};

/// The locks held by one client's transaction.
///
/// The held-lock map sits behind its own reader/writer lock so other transactions can scan it
/// for conflicts without going through the manager's registry lock.
#[derive(Debug)]
pub struct Transaction {
    client_id: ClientId,
    locked_resources: RwLock<BTreeMap<Resource, LockType>>,
}

impl Transaction {
    pub(crate) fn new(client_id: ClientId) -> Self {
        Self {
            client_id,
            locked_resources: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    /// The lock type held on `resource`, if any.
    pub fn lock_type(&self, resource: &Resource) -> Option<LockType> {
        self.locked_resources.read().get(resource).copied()
    }

    /// Snapshot of every held lock, in resource order.
    pub fn locked_resources(&self) -> BTreeMap<Resource, LockType> {
        self.locked_resources.read().clone()
    }

    /// Returns true if this transaction holds a lock on `resource` that conflicts with a
    /// request of type `lock_type`.
    pub fn conflicts_with(&self, resource: &Resource, lock_type: LockType) -> bool {
        self.lock_type(resource)
            .is_some_and(|held| held.conflicts_with(lock_type))
    }

    pub(crate) fn locks_mut(&self) -> RwLockWriteGuard<'_, BTreeMap<Resource, LockType>> {
        self.locked_resources.write()
    }
}
