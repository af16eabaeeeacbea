//! Store-wide locks.
//!
//! Two independent primitives guard a store:
//!
//! - [`LockManager`]: shared read locks for scans, an exclusive write lock for
//!   the short commit/rollback/clear critical sections. Readers only wait
//!   while a write lock is actually held, so a thread may take several read
//!   locks at once (an open scan plus a `size()` call) without deadlocking
//!   against a queued writer.
//! - [`TransactionLock`]: serializes write transactions. Holding it does not
//!   block readers.
//!
//! Both hand out RAII guards; every exit path releases them.

use std::time::Duration;

use log::trace;
use parking_lot::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::errors::{Result, StoreError};

pub type ReadLock<'a> = RwLockReadGuard<'a, ()>;
pub type WriteLock<'a> = RwLockWriteGuard<'a, ()>;
pub type TransactionGuard<'a> = MutexGuard<'a, ()>;

#[derive(Debug, Default)]
pub struct LockManager {
    lock: RwLock<()>,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared lock; waits only while a write lock is held.
    pub fn read_lock(&self) -> ReadLock<'_> {
        self.lock.read_recursive()
    }

    /// Exclusive lock; waits for every outstanding read lock to be released.
    pub fn write_lock(&self) -> WriteLock<'_> {
        trace!("acquiring store write lock");
        self.lock.write()
    }

    pub fn try_write_lock(&self) -> Result<WriteLock<'_>> {
        self.lock
            .try_write()
            .ok_or(StoreError::LockAcquisition("store write lock"))
    }

    pub fn is_write_locked(&self) -> bool {
        self.lock.is_locked_exclusive()
    }

    /// True if any read or write lock is currently held.
    pub fn is_locked(&self) -> bool {
        self.lock.is_locked()
    }
}

#[derive(Debug, Default)]
pub struct TransactionLock {
    lock: Mutex<()>,
}

impl TransactionLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock(&self) -> TransactionGuard<'_> {
        self.lock.lock()
    }

    /// Fails immediately if another transaction is active.
    pub fn try_lock(&self) -> Result<TransactionGuard<'_>> {
        self.lock
            .try_lock()
            .ok_or(StoreError::LockAcquisition("transaction lock"))
    }

    /// Fails if no other transaction finished within `timeout`.
    pub fn lock_for(&self, timeout: Duration) -> Result<TransactionGuard<'_>> {
        self.lock
            .try_lock_for(timeout)
            .ok_or(StoreError::LockAcquisition("transaction lock"))
    }

    pub fn is_locked(&self) -> bool {
        self.lock.is_locked()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn readers_share_and_writer_excludes() {
        let locks = LockManager::new();
        let r1 = locks.read_lock();
        let r2 = locks.read_lock();
        assert!(matches!(
            locks.try_write_lock(),
            Err(StoreError::LockAcquisition(_))
        ));
        drop((r1, r2));
        let w = locks.try_write_lock().unwrap();
        assert!(locks.is_write_locked());
        drop(w);
        assert!(!locks.is_locked());
    }

    #[test]
    fn writer_waits_for_reader() {
        let locks = LockManager::new();
        let wrote = AtomicBool::new(false);
        std::thread::scope(|s| {
            let reader = locks.read_lock();
            let handle = s.spawn(|| {
                let _w = locks.write_lock();
                wrote.store(true, Ordering::SeqCst);
            });
            std::thread::sleep(Duration::from_millis(50));
            assert!(!wrote.load(Ordering::SeqCst));
            // a second read lock on the same thread still succeeds while the writer waits
            let again = locks.read_lock();
            drop(again);
            drop(reader);
            handle.join().unwrap();
        });
        assert!(wrote.load(Ordering::SeqCst));
    }

    #[test]
    fn transaction_lock_try_and_timeout() {
        let txn = TransactionLock::new();
        let held = txn.lock();
        assert!(txn.try_lock().is_err());
        assert!(matches!(
            txn.lock_for(Duration::from_millis(20)),
            Err(StoreError::LockAcquisition("transaction lock"))
        ));
        drop(held);
        assert!(txn.try_lock().is_ok());
    }
}
