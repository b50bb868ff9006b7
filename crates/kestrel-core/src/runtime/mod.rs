//! The object runtime
//!
//! [`Runtime`] owns every piece of interpreter state the object system
//! touches: the object registry, the interpreter stacks, the recovery stack,
//! the collector's side tables, idle callbacks and loaded native modules.
//!
//! Its operations are spread over several modules:
//! - `lifecycle`: instantiation, constructors, destruction, reference counts
//! - `access`: variable and index access, `indices`/`values`/`equal`
//! - `call`: function calls and frames
//! - [`crate::recovery`]: push/pop recovery, throw, catch
//! - [`crate::gc`]: the four collector passes

mod access;
mod call;
mod lifecycle;

use crate::callback::{CallbackId, CallbackList};
use crate::defaults::{
    DEFAULT_BACKLOG_SIZE, DEFAULT_GC_THRESHOLD, DEFAULT_MAX_FRAMES, DEFAULT_MAX_MARKS,
    DEFAULT_MAX_STACK_VALUES,
};
use crate::gc::GcState;
use crate::module::ModuleRegistry;
use crate::object::{ObjectHeader, ObjectId, ObjectRegistry, Storage};
use crate::program::Program;
use crate::recovery::{FatalHook, RecoveryStack, ThrownValue};
use crate::stack::{Frame, Stack, StackStats};
use crate::value::Value;
use crate::RuntimeResult;
use rustc_hash::FxHashMap;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

/// Runtime configuration
#[derive(Clone)]
pub struct RuntimeOptions {
    /// Maximum value stack size (in slots)
    pub max_stack_values: usize,

    /// Maximum call depth
    pub max_frames: usize,

    /// Maximum mark stack size
    pub max_marks: usize,

    /// Allocations between suggested collections
    pub gc_threshold: usize,

    /// Recent calls kept for fatal error dumps
    pub backlog_size: usize,

    /// Invoked with fatal errors before the process terminates
    pub fatal_hook: Option<FatalHook>,
}

impl RuntimeOptions {
    /// Set the fatal hook
    pub fn with_fatal_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&crate::FatalError) + Send + Sync + 'static,
    {
        self.fatal_hook = Some(Arc::new(hook));
        self
    }
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            max_stack_values: DEFAULT_MAX_STACK_VALUES,
            max_frames: DEFAULT_MAX_FRAMES,
            max_marks: DEFAULT_MAX_MARKS,
            gc_threshold: DEFAULT_GC_THRESHOLD,
            backlog_size: DEFAULT_BACKLOG_SIZE,
            fatal_hook: None,
        }
    }
}

impl fmt::Debug for RuntimeOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeOptions")
            .field("max_stack_values", &self.max_stack_values)
            .field("max_frames", &self.max_frames)
            .field("max_marks", &self.max_marks)
            .field("gc_threshold", &self.gc_threshold)
            .field("backlog_size", &self.backlog_size)
            .field("fatal_hook", &self.fatal_hook.is_some())
            .finish()
    }
}

/// Object runtime of one interpreter
pub struct Runtime {
    pub(crate) options: RuntimeOptions,
    pub(crate) registry: ObjectRegistry,
    pub(crate) stack: Stack,
    pub(crate) recovery: RecoveryStack,
    /// Payload of the throw in flight
    pub(crate) thrown: Option<ThrownValue>,
    /// Set while an error payload is being built
    pub(crate) in_error: bool,
    /// Programs of objects whose exit hooks are running
    pub(crate) being_destructed: FxHashMap<ObjectId, Arc<Program>>,
    pub(crate) gc: GcState,
    pub(crate) callbacks: CallbackList,
    /// Idle callback flushing deferred destructions, while registered
    pub(crate) flush_callback: Option<CallbackId>,
    pub(crate) modules: ModuleRegistry,
    pub(crate) backlog: VecDeque<String>,
}

impl Runtime {
    /// Create a runtime with default options
    pub fn new() -> Self {
        Self::with_options(RuntimeOptions::default())
    }

    /// Create a runtime with explicit options
    pub fn with_options(options: RuntimeOptions) -> Self {
        let stack = Stack::with_limits(
            options.max_stack_values,
            options.max_marks,
            options.max_frames,
        );
        let backlog = VecDeque::with_capacity(options.backlog_size);
        Self {
            gc: GcState::new(options.gc_threshold),
            options,
            registry: ObjectRegistry::new(),
            stack,
            recovery: RecoveryStack::new(),
            thrown: None,
            in_error: false,
            being_destructed: FxHashMap::default(),
            callbacks: CallbackList::new(),
            flush_callback: None,
            modules: ModuleRegistry::new(),
            backlog,
        }
    }

    /// Runtime options
    pub fn options(&self) -> &RuntimeOptions {
        &self.options
    }

    // ========================================================================
    // Object Inspection
    // ========================================================================

    /// The object registry
    pub fn registry(&self) -> &ObjectRegistry {
        &self.registry
    }

    /// Borrow an object header
    pub fn object(&self, id: ObjectId) -> Option<&ObjectHeader> {
        self.registry.get(id)
    }

    /// Check whether `id` still has a header
    pub fn exists(&self, id: ObjectId) -> bool {
        self.registry.contains(id)
    }

    /// Check whether an object is destructed (or already freed)
    pub fn is_destructed(&self, id: ObjectId) -> bool {
        self.registry.get(id).map_or(true, ObjectHeader::is_destructed)
    }

    /// Reference count of an object (0 once freed)
    pub fn refs(&self, id: ObjectId) -> u32 {
        self.registry.get(id).map_or(0, ObjectHeader::refs)
    }

    /// Program of a live object
    pub fn program_of(&self, id: ObjectId) -> Option<Arc<Program>> {
        self.registry.get(id)?.program.clone()
    }

    /// Storage of a live object
    pub fn storage(&self, id: ObjectId) -> Option<&Storage> {
        self.registry.get(id)?.storage.as_ref()
    }

    /// Mutable storage of a live object
    pub fn storage_mut(&mut self, id: ObjectId) -> Option<&mut Storage> {
        self.registry.get_mut(id)?.storage.as_mut()
    }

    // ========================================================================
    // Interpreter Stacks
    // ========================================================================

    /// Push a value, transferring the caller's reference to the stack
    ///
    /// # Errors
    ///
    /// Raises `StackOverflow` if the value stack is full.
    pub fn push_value(&mut self, value: Value) -> RuntimeResult<()> {
        if let Err(err) = self.stack.push(value.clone()) {
            self.release_value(&value);
            return Err(self.raise(err));
        }
        Ok(())
    }

    /// Pop a value, transferring the stack's reference to the caller
    pub fn pop_value(&mut self) -> Option<Value> {
        self.stack.pop().ok()
    }

    /// Current value-stack depth
    pub fn value_depth(&self) -> usize {
        self.stack.depth()
    }

    /// Record the current value-stack depth on the mark stack
    ///
    /// # Errors
    ///
    /// Raises `StackOverflow` if the mark stack is full.
    pub fn push_mark(&mut self) -> RuntimeResult<()> {
        match self.stack.push_mark() {
            Ok(()) => Ok(()),
            Err(err) => Err(self.raise(err)),
        }
    }

    /// Pop the most recent mark
    pub fn pop_mark(&mut self) -> Option<usize> {
        self.stack.pop_mark().ok()
    }

    /// Current mark-stack depth
    pub fn mark_depth(&self) -> usize {
        self.stack.mark_depth()
    }

    /// Number of active frames
    pub fn frame_count(&self) -> usize {
        self.stack.frame_count()
    }

    /// Active frames, outermost first
    pub fn frames(&self) -> &[Frame] {
        self.stack.frames()
    }

    /// Stack statistics
    pub fn stack_stats(&self) -> StackStats {
        self.stack.stats()
    }

    pub(crate) fn record_backlog(&mut self, entry: String) {
        if self.options.backlog_size == 0 {
            return;
        }
        if self.backlog.len() == self.options.backlog_size {
            self.backlog.pop_front();
        }
        self.backlog.push_back(entry);
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RuntimeError;

    #[test]
    fn test_runtime_starts_empty() {
        let rt = Runtime::new();
        assert_eq!(rt.registry().live_len(), 0);
        assert_eq!(rt.value_depth(), 0);
        assert_eq!(rt.recovery_depth(), 0);
        assert_eq!(rt.options().max_frames, DEFAULT_MAX_FRAMES);
    }

    #[test]
    fn test_push_value_overflow_raises() {
        let options = RuntimeOptions {
            max_stack_values: 1,
            ..RuntimeOptions::default()
        };
        let mut rt = Runtime::with_options(options);

        let caught = rt
            .catch(|rt| {
                rt.push_value(Value::Int(1))?;
                rt.push_value(Value::Int(2))
            })
            .unwrap();

        let thrown = caught.unwrap_err();
        assert_eq!(thrown.error(), Some(&RuntimeError::StackOverflow));
        assert_eq!(rt.value_depth(), 0);
    }

    #[test]
    fn test_backlog_is_bounded() {
        let options = RuntimeOptions {
            backlog_size: 2,
            ..RuntimeOptions::default()
        };
        let mut rt = Runtime::with_options(options);
        for i in 0..5 {
            rt.record_backlog(format!("call {}", i));
        }
        assert_eq!(rt.backlog.len(), 2);
        assert_eq!(rt.backlog.front().map(String::as_str), Some("call 3"));
    }

    #[test]
    fn test_runtime_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<Runtime>();
    }
}
