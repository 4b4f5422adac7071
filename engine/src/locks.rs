//! One active run per thread.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use gatehouse_types::ThreadId;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Per-thread run locks. A guard is held for the duration of one `start` or
/// `resume` call and released at suspension.
#[derive(Debug, Default)]
pub struct ThreadLocks {
    locks: Mutex<HashMap<ThreadId, Arc<AsyncMutex<()>>>>,
}

#[derive(Debug)]
pub struct ThreadGuard {
    _guard: OwnedMutexGuard<()>,
}

impl ThreadLocks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `None` if another run holds the thread.
    pub fn try_acquire(&self, thread_id: &ThreadId) -> Option<ThreadGuard> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            // An owned guard keeps a clone of its Arc; unheld entries are dropped.
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            Arc::clone(locks.entry(thread_id.clone()).or_default())
        };
        lock.try_lock_owned().ok().map(|guard| ThreadGuard { _guard: guard })
    }
}
