//! A small free-list object pool.
//!
//! Backs the message pool, the path matcher scratch pool, and the
//! compressor stream pools. Objects are handed out by value and must be put
//! back explicitly; the pool never tracks outstanding objects.

use std::sync::{Mutex, PoisonError};

/// Default number of idle objects kept by a pool.
pub const DEFAULT_MAX_IDLE: usize = 1024;

/// A capacity-bounded free list.
///
/// `get_or_else` pops an idle object or builds a fresh one. `put` stores the
/// object for reuse unless the pool already holds `max_idle` objects, in
/// which case it is dropped. Callers reset an object before `put`.
pub struct Pool<T> {
    idle: Mutex<Vec<T>>,
    max_idle: usize,
}

impl<T> Pool<T> {
    /// Create a pool with the default idle bound.
    pub const fn new() -> Self {
        Self::with_max_idle(DEFAULT_MAX_IDLE)
    }

    /// Create a pool keeping at most `max_idle` idle objects.
    pub const fn with_max_idle(max_idle: usize) -> Self {
        Self {
            idle: Mutex::new(Vec::new()),
            max_idle,
        }
    }

    /// Take an idle object, if any.
    pub fn get(&self) -> Option<T> {
        self.idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()
    }

    /// Take an idle object, constructing one with `new` if the pool is empty.
    pub fn get_or_else(&self, new: impl FnOnce() -> T) -> T {
        self.get().unwrap_or_else(new)
    }

    /// Return an object to the pool.
    pub fn put(&self, value: T) {
        let mut idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner);
        if idle.len() < self.max_idle {
            idle.push(value);
        }
    }

    /// Number of idle objects currently held.
    pub fn idle_len(&self) -> usize {
        self.idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl<T> Default for Pool<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for Pool<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("idle", &self.idle_len())
            .field("max_idle", &self.max_idle)
            .finish()
    }
}
