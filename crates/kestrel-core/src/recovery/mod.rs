//! Error recovery stack
//!
//! A recovery context is a checkpoint of the three interpreter stacks plus a
//! LIFO list of cleanup handlers. Throwing unwinds to the nearest context
//! whose severity is high enough.
//!
//! # Throw
//!
//! ```text
//! throw(payload, severity)
//!   1. while top.severity < severity: run top's handlers (LIFO), discard top
//!   2. no context left            → fatal, process exits
//!   3. pop frames above top.frames, releasing their references
//!   4. truncate values and marks to the recorded depths
//!   5. run top's remaining handlers (LIFO)
//!   6. store the thrown value, return Unwind { target: top }
//! ```
//!
//! The returned [`Unwind`] travels up the Rust call chain through `?` until
//! the [`Runtime::catch`] that pushed the target context turns it back into
//! a [`ThrownValue`]. By then the stacks are already exactly where that
//! context recorded them.

mod fatal;
mod thrown;

pub use fatal::{FatalError, FatalHook};
pub use thrown::{BacktraceEntry, ErrorValue, Severity, ThrownPayload, ThrownValue};

use crate::defaults::SPRINTF_DESCRIBE;
use crate::object::ObjectId;
use crate::program::Lfun;
use crate::runtime::Runtime;
use crate::value::Value;
use crate::{RuntimeError, RuntimeResult};

/// Handle of a pushed recovery context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecoveryHandle(u64);

/// Handle of a registered cleanup handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OnErrorHandle {
    recovery: Option<RecoveryHandle>,
    handler: u64,
}

/// Proof that a throw has unwound the runtime to a recovery context
///
/// Must be propagated to the catch that owns `target`.
#[must_use = "an Unwind must be propagated to its catch"]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unwind {
    target: RecoveryHandle,
}

impl Unwind {
    /// The recovery context the throw unwound to
    pub fn target(&self) -> RecoveryHandle {
        self.target
    }
}

type Handler = Box<dyn FnOnce(&mut Runtime) + Send>;

struct RecoveryContext {
    handle: RecoveryHandle,
    value_depth: usize,
    mark_depth: usize,
    frame_depth: usize,
    severity: Severity,
    handlers: Vec<(u64, Handler)>,
}

/// Stack of recovery contexts
pub(crate) struct RecoveryStack {
    contexts: Vec<RecoveryContext>,
    next_handle: u64,
    next_handler: u64,
}

impl RecoveryStack {
    pub(crate) fn new() -> Self {
        Self {
            contexts: Vec::new(),
            next_handle: 0,
            next_handler: 0,
        }
    }

    pub(crate) fn depth(&self) -> usize {
        self.contexts.len()
    }

    fn top_mut(&mut self) -> Option<&mut RecoveryContext> {
        self.contexts.last_mut()
    }
}

impl Runtime {
    // ========================================================================
    // Recovery Contexts
    // ========================================================================

    /// Push a recovery context catching ordinary errors
    pub fn push_recovery(&mut self) -> RecoveryHandle {
        self.push_recovery_with_severity(Severity::Error)
    }

    /// Push a recovery context catching throws up to `severity`
    pub fn push_recovery_with_severity(&mut self, severity: Severity) -> RecoveryHandle {
        let handle = RecoveryHandle(self.recovery.next_handle);
        self.recovery.next_handle += 1;
        self.recovery.contexts.push(RecoveryContext {
            handle,
            value_depth: self.stack.depth(),
            mark_depth: self.stack.mark_depth(),
            frame_depth: self.stack.frame_count(),
            severity,
            handlers: Vec::new(),
        });
        handle
    }

    /// Leave a protected region normally
    ///
    /// Discards the top context without running its handlers. `handle` must
    /// be the top context.
    pub fn pop_recovery(&mut self, handle: RecoveryHandle) {
        match self.recovery.contexts.last() {
            Some(top) if top.handle == handle => {
                self.recovery.contexts.pop();
            }
            _ => self.fatal(FatalError::RecoveryStackOutOfSync),
        }
    }

    /// Number of active recovery contexts
    pub fn recovery_depth(&self) -> usize {
        self.recovery.depth()
    }

    // ========================================================================
    // Cleanup Handlers
    // ========================================================================

    /// Register a cleanup handler on the top recovery context
    ///
    /// The handler runs only if a throw unwinds through or to that context.
    /// With no context the handler is dropped: such a throw is fatal anyway.
    pub fn on_error<F>(&mut self, handler: F) -> OnErrorHandle
    where
        F: FnOnce(&mut Runtime) + Send + 'static,
    {
        let id = self.recovery.next_handler;
        self.recovery.next_handler += 1;
        let recovery = match self.recovery.top_mut() {
            Some(top) => {
                top.handlers.push((id, Box::new(handler)));
                Some(top.handle)
            }
            None => None,
        };
        OnErrorHandle {
            recovery,
            handler: id,
        }
    }

    /// Remove a cleanup handler without running it
    pub fn unset_on_error(&mut self, handle: OnErrorHandle) {
        let _ = self.take_handler(handle);
    }

    /// Remove a cleanup handler and run it now
    pub fn call_and_unset_on_error(&mut self, handle: OnErrorHandle) {
        if let Some(handler) = self.take_handler(handle) {
            handler(self);
        }
    }

    fn take_handler(&mut self, handle: OnErrorHandle) -> Option<Handler> {
        let recovery = handle.recovery?;
        let context = self
            .recovery
            .contexts
            .iter_mut()
            .rev()
            .find(|context| context.handle == recovery)?;
        let position = context
            .handlers
            .iter()
            .rposition(|(id, _)| *id == handle.handler)?;
        Some(context.handlers.remove(position).1)
    }

    /// Run a context's handlers, most recent first
    fn run_handlers(&mut self, handlers: Vec<(u64, Handler)>) {
        for (_, handler) in handlers.into_iter().rev() {
            handler(self);
        }
    }

    // ========================================================================
    // Throw
    // ========================================================================

    /// Raise a runtime error with a backtrace
    ///
    /// Raising while a previous error is still being built is fatal.
    pub fn raise(&mut self, error: RuntimeError) -> Unwind {
        if self.in_error {
            self.fatal(FatalError::RecursiveError {
                message: error.to_string(),
            });
        }
        if self.recovery.contexts.is_empty() {
            self.fatal(FatalError::NoRecoveryContext {
                message: error.to_string(),
            });
        }
        self.in_error = true;
        log::debug!("raising: {}", error);
        let backtrace = self.build_backtrace();
        self.in_error = false;
        self.throw(
            ThrownPayload::Error(ErrorValue { error, backtrace }),
            Severity::Error,
        )
    }

    /// Throw an arbitrary value
    ///
    /// The thrown payload takes over the caller's reference, if any.
    pub fn throw_value(&mut self, value: Value, severity: Severity) -> Unwind {
        self.throw(ThrownPayload::Value(value), severity)
    }

    fn throw(&mut self, payload: ThrownPayload, severity: Severity) -> Unwind {
        // Discard contexts too weak to catch this severity.
        let target = loop {
            let Some(top) = self.recovery.contexts.last() else {
                let message = match &payload {
                    ThrownPayload::Error(value) => value.error.to_string(),
                    ThrownPayload::Value(value) => value.to_string(),
                };
                self.fatal(FatalError::NoRecoveryContext { message });
            };
            if severity <= top.severity {
                break (top.handle, top.value_depth, top.mark_depth, top.frame_depth);
            }
            if let Some(skipped) = self.recovery.contexts.pop() {
                self.run_handlers(skipped.handlers);
            }
        };
        let (handle, value_depth, mark_depth, frame_depth) = target;

        while self.stack.frame_count() > frame_depth {
            if let Some(frame) = self.stack.pop_frame() {
                self.release_frame(frame);
            }
        }

        if self.stack.depth() < value_depth {
            self.fatal(FatalError::StackUnderflow {
                stack: "value",
                expected: value_depth,
                found: self.stack.depth(),
            });
        }
        if self.stack.mark_depth() < mark_depth {
            self.fatal(FatalError::StackUnderflow {
                stack: "mark",
                expected: mark_depth,
                found: self.stack.mark_depth(),
            });
        }
        if self.stack.frame_count() < frame_depth {
            self.fatal(FatalError::StackUnderflow {
                stack: "frame",
                expected: frame_depth,
                found: self.stack.frame_count(),
            });
        }
        let dropped = self.stack.truncate(value_depth);
        for value in dropped.into_iter().rev() {
            self.release_value(&value);
        }
        self.stack.truncate_marks(mark_depth);

        let pending = match self.recovery.top_mut() {
            Some(top) if top.handle == handle => std::mem::take(&mut top.handlers),
            _ => self.fatal(FatalError::RecoveryStackOutOfSync),
        };
        self.run_handlers(pending);

        self.thrown = Some(ThrownValue { payload, severity });
        Unwind { target: handle }
    }

    /// The value of the throw in flight, if any
    pub fn thrown(&self) -> Option<&ThrownValue> {
        self.thrown.as_ref()
    }

    // ========================================================================
    // Catch
    // ========================================================================

    /// Run `f` inside a recovery context catching ordinary errors
    ///
    /// # Errors
    ///
    /// Returns the `Unwind` of a throw aimed at an outer context.
    pub fn catch<T, F>(&mut self, f: F) -> RuntimeResult<Result<T, ThrownValue>>
    where
        F: FnOnce(&mut Runtime) -> RuntimeResult<T>,
    {
        self.catch_with_severity(Severity::Error, f)
    }

    /// Run `f` inside a recovery context catching throws up to `severity`
    ///
    /// # Errors
    ///
    /// Returns the `Unwind` of a throw aimed at an outer context.
    pub fn catch_with_severity<T, F>(
        &mut self,
        severity: Severity,
        f: F,
    ) -> RuntimeResult<Result<T, ThrownValue>>
    where
        F: FnOnce(&mut Runtime) -> RuntimeResult<T>,
    {
        let handle = self.push_recovery_with_severity(severity);
        match f(self) {
            Ok(value) => {
                self.pop_recovery(handle);
                Ok(Ok(value))
            }
            Err(unwind) if unwind.target == handle => {
                self.pop_recovery(handle);
                match self.thrown.take() {
                    Some(thrown) => Ok(Err(thrown)),
                    None => self.fatal(FatalError::RecoveryStackOutOfSync),
                }
            }
            Err(unwind) => Err(unwind),
        }
    }

    // ========================================================================
    // Backtraces
    // ========================================================================

    fn build_backtrace(&mut self) -> Vec<BacktraceEntry> {
        let frames: Vec<_> = self
            .stack
            .frames()
            .iter()
            .map(|frame| (frame.object, frame.program.clone(), frame.function_name()))
            .collect();

        let mut backtrace = Vec::with_capacity(frames.len());
        for (object, program, function) in frames {
            let description = self.describe_object(object);
            backtrace.push(BacktraceEntry {
                program: program.name().clone(),
                function,
                object,
                description,
            });
        }
        backtrace
    }

    /// Describe an object through its `_sprintf`, if it has one
    ///
    /// Anything `_sprintf` throws, at any severity, stops here and leaves
    /// the object undescribed.
    fn describe_object(&mut self, object: ObjectId) -> Option<String> {
        let sprintf = self.program_of(object)?.find_lfun(Lfun::Sprintf)?;
        let describe = Value::Int(SPRINTF_DESCRIBE as i64);
        let described = self.catch_with_severity(Severity::Exit, |rt| {
            rt.call_function(object, sprintf, &[describe])
        });
        match described {
            Ok(Ok(Value::Str(s))) => Some(s.to_string()),
            _ => None,
        }
    }
}
