//! Poison-tolerant guards for the process-local locks.
//!
//! A panic while holding one of these locks must not take the pipeline down
//! with it: the guarded state (filter bits, in-memory tiers) stays usable, at
//! worst slightly stale, so the poison flag is logged and cleared.

use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::warn;

pub(crate) fn read<'a, T>(lock: &'a RwLock<T>, op: &'static str) -> RwLockReadGuard<'a, T> {
    lock.read().unwrap_or_else(|poisoned| {
        warn!(op, lock_kind = "rwlock.read", "recovered poisoned lock");
        lock.clear_poison();
        poisoned.into_inner()
    })
}

pub(crate) fn write<'a, T>(lock: &'a RwLock<T>, op: &'static str) -> RwLockWriteGuard<'a, T> {
    lock.write().unwrap_or_else(|poisoned| {
        warn!(op, lock_kind = "rwlock.write", "recovered poisoned lock");
        lock.clear_poison();
        poisoned.into_inner()
    })
}

pub(crate) fn lock<'a, T>(mutex: &'a Mutex<T>, op: &'static str) -> MutexGuard<'a, T> {
    mutex.lock().unwrap_or_else(|poisoned| {
        warn!(op, lock_kind = "mutex.lock", "recovered poisoned lock");
        mutex.clear_poison();
        poisoned.into_inner()
    })
}
