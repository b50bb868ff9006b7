//! Idle callbacks
//!
//! The backend runs registered callbacks when the interpreter is idle. The
//! object runtime uses one to flush deferred destructions.

use crate::runtime::Runtime;
use rustc_hash::FxHashSet;

/// Identifier of a registered callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(u64);

type Callback = Box<dyn FnMut(&mut Runtime) + Send>;

/// List of idle callbacks
pub struct CallbackList {
    entries: Vec<(CallbackId, Callback)>,
    /// Ids removed while their batch was out running
    removed: FxHashSet<CallbackId>,
    next_id: u64,
}

impl CallbackList {
    /// Create an empty list
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            removed: FxHashSet::default(),
            next_id: 0,
        }
    }

    /// Register a callback
    pub fn add<F>(&mut self, callback: F) -> CallbackId
    where
        F: FnMut(&mut Runtime) + Send + 'static,
    {
        let id = CallbackId(self.next_id);
        self.next_id += 1;
        self.entries.push((id, Box::new(callback)));
        id
    }

    /// Unregister a callback
    pub fn remove(&mut self, id: CallbackId) {
        let before = self.entries.len();
        self.entries.retain(|(entry, _)| *entry != id);
        if self.entries.len() == before {
            self.removed.insert(id);
        }
    }

    /// Number of registered callbacks
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check whether no callbacks are registered
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn take_batch(&mut self) -> Vec<(CallbackId, Callback)> {
        self.removed.clear();
        std::mem::take(&mut self.entries)
    }

    fn is_removed(&self, id: CallbackId) -> bool {
        self.removed.contains(&id)
    }

    fn restore(&mut self, batch: Vec<(CallbackId, Callback)>) {
        let added = std::mem::take(&mut self.entries);
        let removed = std::mem::take(&mut self.removed);
        self.entries = batch
            .into_iter()
            .filter(|(id, _)| !removed.contains(id))
            .collect();
        self.entries.extend(added);
    }
}

impl Default for CallbackList {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime {
    /// Register an idle callback
    pub fn add_idle_callback<F>(&mut self, callback: F) -> CallbackId
    where
        F: FnMut(&mut Runtime) + Send + 'static,
    {
        self.callbacks.add(callback)
    }

    /// Unregister an idle callback
    pub fn remove_idle_callback(&mut self, id: CallbackId) {
        self.callbacks.remove(id);
    }

    /// Number of registered idle callbacks
    pub fn idle_callback_count(&self) -> usize {
        self.callbacks.len()
    }

    /// Run every registered idle callback once
    ///
    /// Callbacks may add or remove callbacks, including themselves.
    pub fn run_idle_callbacks(&mut self) {
        let mut batch = self.callbacks.take_batch();
        for (id, callback) in batch.iter_mut() {
            if self.callbacks.is_removed(*id) {
                continue;
            }
            callback(self);
        }
        self.callbacks.restore(batch);
    }
}
