//! Interpreter lock
//!
//! The runtime is single threaded. Threads share one interpreter by taking
//! turns holding [`InterpreterLock`]; a native operation that blocks can let
//! other threads in with [`InterpreterLock::allow_threads`], as long as it
//! does not touch the runtime until the lock is back.

use crate::runtime::Runtime;
use parking_lot::{Mutex, MutexGuard};

/// Serializes access to one [`Runtime`]
pub struct InterpreterLock {
    runtime: Mutex<Runtime>,
}

impl InterpreterLock {
    /// Wrap a runtime
    pub fn new(runtime: Runtime) -> Self {
        Self {
            runtime: Mutex::new(runtime),
        }
    }

    /// Take the lock, blocking until it is free
    pub fn enter(&self) -> MutexGuard<'_, Runtime> {
        self.runtime.lock()
    }

    /// Take the lock if it is free
    pub fn try_enter(&self) -> Option<MutexGuard<'_, Runtime>> {
        self.runtime.try_lock()
    }

    /// Release the lock while `f` runs, then take it back
    pub fn allow_threads<T, F>(guard: &mut MutexGuard<'_, Runtime>, f: F) -> T
    where
        F: FnOnce() -> T,
    {
        MutexGuard::unlocked(guard, f)
    }

    /// Unwrap the runtime
    pub fn into_inner(self) -> Runtime {
        self.runtime.into_inner()
    }
}
