//! Per-resource reader/writer locks.
//!
//! Unlike a guard-based `RwLock`, a lock taken here outlives the call that took it: it is
//! released by an explicit [`ResourceLockManager::unlock`], usually when the owning
//! transaction commits. The manager knows nothing about transactions.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};

use crate::error::LockError;
use crate::resource::{LockType, Resource};

#[derive(Debug, Default)]
struct LockState {
    readers: usize,
    writer: bool,
}

impl LockState {
    fn can_grant(&self, lock_type: LockType) -> bool {
        match lock_type {
            LockType::Read => !self.writer,
            LockType::Write => !self.writer && self.readers == 0,
        }
    }

    fn grant(&mut self, lock_type: LockType) {
        match lock_type {
            LockType::Read => self.readers += 1,
            LockType::Write => self.writer = true,
        }
    }
}

#[derive(Debug, Default)]
struct ResourceLock {
    state: Mutex<LockState>,
    released: Condvar,
}

/// Maps every resource to its reader/writer lock.
#[derive(Debug, Default)]
pub struct ResourceLockManager {
    locks: DashMap<Resource, Arc<ResourceLock>>,
}

impl ResourceLockManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn resource_lock(&self, resource: &Resource) -> Arc<ResourceLock> {
        self.locks.entry(resource.clone()).or_default().clone()
    }

    /// Locks `resource`, blocking the calling thread until the lock can be granted.
    pub fn lock(&self, resource: &Resource, lock_type: LockType) -> Result<(), LockError> {
        let lock = self.resource_lock(resource);
        let mut state = lock.state.lock();
        while !state.can_grant(lock_type) {
            lock.released.wait(&mut state);
        }
        state.grant(lock_type);
        tracing::trace!(%resource, %lock_type, "resource locked");
        Ok(())
    }

    /// Locks `resource` only if that can be done without blocking.
    /// Returns whether the lock was granted.
    pub fn try_lock(&self, resource: &Resource, lock_type: LockType) -> bool {
        let lock = self.resource_lock(resource);
        let mut state = lock.state.lock();
        if !state.can_grant(lock_type) {
            return false;
        }
        state.grant(lock_type);
        tracing::trace!(%resource, %lock_type, "resource locked");
        true
    }

    /// Releases a lock previously granted on `resource`.
    ///
    /// Fails if the resource is not locked at all, or not locked with `lock_type`.
    pub fn unlock(&self, resource: &Resource, lock_type: LockType) -> Result<(), LockError> {
        let lock = self
            .locks
            .get(resource)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| LockError::NotLocked(resource.clone()))?;

        let mut state = lock.state.lock();
        match lock_type {
            LockType::Read if state.readers > 0 => state.readers -= 1,
            LockType::Write if state.writer => state.writer = false,
            _ if state.readers == 0 && !state.writer => {
                return Err(LockError::NotLocked(resource.clone()));
            }
            _ => {
                return Err(LockError::Mismatch {
                    resource: resource.clone(),
                    requested: lock_type,
                });
            }
        }
        drop(state);
        lock.released.notify_all();
        tracing::trace!(%resource, %lock_type, "resource unlocked");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_shared_read_locks() {
        let manager = ResourceLockManager::new();
        let r = Resource::new("t", 1);
        manager.lock(&r, LockType::Read).unwrap();
        assert!(manager.try_lock(&r, LockType::Read));
        assert!(!manager.try_lock(&r, LockType::Write));
        manager.unlock(&r, LockType::Read).unwrap();
        manager.unlock(&r, LockType::Read).unwrap();
        assert!(manager.try_lock(&r, LockType::Write));
    }

    #[test]
    fn test_write_lock_is_exclusive() {
        let manager = ResourceLockManager::new();
        let r = Resource::new("t", 1);
        manager.lock(&r, LockType::Write).unwrap();
        assert!(!manager.try_lock(&r, LockType::Read));
        assert!(!manager.try_lock(&r, LockType::Write));
        // Other resources are unaffected.
        assert!(manager.try_lock(&Resource::new("t", 2), LockType::Write));
    }

    #[test]
    fn test_unlock_errors() {
        let manager = ResourceLockManager::new();
        let r = Resource::new("t", 1);
        assert_eq!(
            manager.unlock(&r, LockType::Read),
            Err(LockError::NotLocked(r.clone()))
        );

        manager.lock(&r, LockType::Read).unwrap();
        assert_eq!(
            manager.unlock(&r, LockType::Write),
            Err(LockError::Mismatch {
                resource: r.clone(),
                requested: LockType::Write,
            })
        );
        manager.unlock(&r, LockType::Read).unwrap();
        assert_eq!(
            manager.unlock(&r, LockType::Read),
            Err(LockError::NotLocked(r))
        );
    }

    #[test]
    fn test_lock_blocks_until_unlock() {
        let manager = Arc::new(ResourceLockManager::new());
        let r = Resource::new("t", 1);
        manager.lock(&r, LockType::Write).unwrap();

        let (tx, rx) = mpsc::channel();
        let handle = {
            let manager = manager.clone();
            let r = r.clone();
            thread::spawn(move || {
                manager.lock(&r, LockType::Read).unwrap();
                tx.send(()).unwrap();
            })
        };

        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        manager.unlock(&r, LockType::Write).unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        handle.join().unwrap();
    }
}
