//! Lock primitives.
//!
//! Two unrelated kinds of locking live here: poison-tolerant access to the
//! engine's own shared state, and the advisory per-key [`Lock`] capability
//! that guards recomputation.

use std::collections::HashSet;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use tracing::warn;

use super::options::LockFactory;

const SOURCE: &str = "cache::lock";

/// Slice of an unbounded wait; the loop re-checks the key after each one.
const UNBOUNDED_WAIT: Duration = Duration::from_secs(3600);

pub(crate) fn rw_read<'a, T>(
    lock: &'a RwLock<T>,
    target: &'static str,
    op: &'static str,
) -> RwLockReadGuard<'a, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!(
                op,
                target_module = target,
                lock_kind = "rwlock.read",
                result = "poisoned_recovered",
                hint = "state may be stale after panic in another thread",
                "Recovered from poisoned cache lock"
            );
            poisoned.into_inner()
        }
    }
}

pub(crate) fn rw_write<'a, T>(
    lock: &'a RwLock<T>,
    target: &'static str,
    op: &'static str,
) -> RwLockWriteGuard<'a, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!(
                op,
                target_module = target,
                lock_kind = "rwlock.write",
                result = "poisoned_recovered",
                hint = "state may be stale after panic in another thread",
                "Recovered from poisoned cache lock"
            );
            poisoned.into_inner()
        }
    }
}

pub(crate) fn mutex_lock<'a, T>(
    lock: &'a Mutex<T>,
    target: &'static str,
    op: &'static str,
) -> MutexGuard<'a, T> {
    match lock.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!(
                op,
                target_module = target,
                lock_kind = "mutex.lock",
                result = "poisoned_recovered",
                hint = "state may be stale after panic in another thread",
                "Recovered from poisoned cache lock"
            );
            poisoned.into_inner()
        }
    }
}

fn condvar_wait<'a, T>(
    condvar: &Condvar,
    guard: MutexGuard<'a, T>,
    timeout: Duration,
    op: &'static str,
) -> MutexGuard<'a, T> {
    match condvar.wait_timeout(guard, timeout) {
        Ok((guard, _)) => guard,
        Err(poisoned) => {
            warn!(
                op,
                target_module = SOURCE,
                lock_kind = "condvar.wait",
                result = "poisoned_recovered",
                hint = "state may be stale after panic in another thread",
                "Recovered from poisoned cache lock"
            );
            poisoned.into_inner().0
        }
    }
}

// ============================================================================
// Recompute locks
// ============================================================================

/// Advisory lock scoped to one cache key.
///
/// `acquire` must never leave the lock partially held: when it returns
/// `false`, `release` is a no-op.
pub trait Lock: Send {
    /// Wait up to `timeout` for the lock. Returns `true` once held.
    fn acquire(&mut self, timeout: Duration) -> bool;

    fn release(&mut self);
}

/// Holds an acquired [`Lock`] and releases it when dropped.
pub(crate) struct LockGuard {
    lock: Box<dyn Lock>,
}

impl LockGuard {
    /// Try to acquire `lock`; `None` means the wait timed out and the lock
    /// is dropped without being released.
    pub(crate) fn acquire(mut lock: Box<dyn Lock>, timeout: Duration) -> Option<Self> {
        if lock.acquire(timeout) {
            Some(Self { lock })
        } else {
            None
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.lock.release();
    }
}

/// In-process table of per-key locks.
///
/// Every [`KeyLock`] handed out by the same table excludes the others for the
/// same key, so callers sharing a table get single-flight recomputation.
#[derive(Debug, Default)]
pub struct KeyLocks {
    held: Mutex<HashSet<String>>,
    released: Condvar,
}

impl KeyLocks {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Lock handle for `key`, not yet acquired.
    pub fn lock(self: &Arc<Self>, key: &str) -> KeyLock {
        KeyLock {
            table: Arc::clone(self),
            key: key.to_string(),
            held: false,
        }
    }

    /// A [`LockFactory`] handing out locks from this table.
    pub fn factory(self: &Arc<Self>) -> LockFactory {
        let table = Arc::clone(self);
        Arc::new(move |key: &str| Box::new(table.lock(key)) as Box<dyn Lock>)
    }

    pub fn is_held(&self, key: &str) -> bool {
        mutex_lock(&self.held, SOURCE, "is_held").contains(key)
    }
}

/// One key's lock from a [`KeyLocks`] table.
#[derive(Debug)]
pub struct KeyLock {
    table: Arc<KeyLocks>,
    key: String,
    held: bool,
}

impl Lock for KeyLock {
    fn acquire(&mut self, timeout: Duration) -> bool {
        if self.held {
            return true;
        }

        // No representable deadline means wait until released.
        let deadline = Instant::now().checked_add(timeout);
        let mut held = mutex_lock(&self.table.held, SOURCE, "acquire");
        loop {
            if !held.contains(&self.key) {
                held.insert(self.key.clone());
                self.held = true;
                return true;
            }
            let wait = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    deadline - now
                }
                None => UNBOUNDED_WAIT,
            };
            held = condvar_wait(&self.table.released, held, wait, "acquire.wait");
        }
    }

    fn release(&mut self) {
        if !self.held {
            return;
        }
        mutex_lock(&self.table.held, SOURCE, "release").remove(&self.key);
        self.held = false;
        self.table.released.notify_all();
    }
}

impl Drop for KeyLock {
    fn drop(&mut self) {
        self.release();
    }
}
