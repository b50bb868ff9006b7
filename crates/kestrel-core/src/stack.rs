//! Interpreter stacks
//!
//! This module provides the three stacks a recovery context checkpoints and
//! a throw restores together.
//!
//! # Architecture
//!
//! - **Value stack**: operands and call arguments. Object values on it own
//!   one reference each.
//! - **Mark stack**: saved value-stack depths (argument list starts).
//! - **Frame stack**: one [`Frame`] per active function call.
//!
//! # Memory Layout
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │ values                              │  ← depth()
//! │   arg₁                              │
//! │   arg₀                              │  ← frame N locals_base
//! │   ...                               │
//! ├─────────────────────────────────────┤
//! │ frames                              │
//! │   Frame N (current)                 │
//! │   Frame N-1                         │
//! └─────────────────────────────────────┘
//! ```
//!
//! The stack itself never touches reference counts; the runtime releases
//! what [`Stack::truncate`] and [`Stack::pop_frame`] hand back.

use crate::defaults::{DEFAULT_MAX_FRAMES, DEFAULT_MAX_MARKS, DEFAULT_MAX_STACK_VALUES};
use crate::object::ObjectId;
use crate::program::Program;
use crate::value::Value;
use crate::RuntimeError;
use std::sync::Arc;

/// Call frame
///
/// Owns one reference to `object` and, if present, one to `parent`.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Object the function is bound to
    pub object: ObjectId,

    /// Program the function was resolved in
    pub program: Arc<Program>,

    /// Inherit index that declared the function
    pub context: usize,

    /// Identifier index of the function
    pub identifier: usize,

    /// Parent of `object`, if any
    pub parent: Option<ObjectId>,

    /// Value-stack depth at frame entry (start of the arguments)
    pub locals_base: usize,
}

impl Frame {
    /// Name of the executing function
    pub fn function_name(&self) -> Option<Arc<str>> {
        self.program
            .identifier(self.identifier)
            .map(|resolved| resolved.identifier.name.clone())
    }
}

/// Stack statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackStats {
    /// Current value-stack depth
    pub value_depth: usize,

    /// Current mark-stack depth
    pub mark_depth: usize,

    /// Active frame count
    pub frame_count: usize,

    /// Deepest value stack seen
    pub max_value_depth: usize,

    /// Deepest frame stack seen
    pub max_frame_count: usize,
}

/// Value, mark and frame stacks of one interpreter
pub struct Stack {
    values: Vec<Value>,
    marks: Vec<usize>,
    frames: Vec<Frame>,
    max_values: usize,
    max_marks: usize,
    max_frames: usize,
    max_value_depth: usize,
    max_frame_count: usize,
}

impl Stack {
    /// Create a stack with default limits
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_MAX_STACK_VALUES, DEFAULT_MAX_MARKS, DEFAULT_MAX_FRAMES)
    }

    /// Create a stack with explicit limits
    pub fn with_limits(max_values: usize, max_marks: usize, max_frames: usize) -> Self {
        Self {
            values: Vec::with_capacity(max_values.min(1024)),
            marks: Vec::with_capacity(max_marks.min(256)),
            frames: Vec::with_capacity(max_frames.min(256)),
            max_values,
            max_marks,
            max_frames,
            max_value_depth: 0,
            max_frame_count: 0,
        }
    }

    // ========================================================================
    // Value Stack Operations
    // ========================================================================

    /// Push a value
    ///
    /// # Errors
    ///
    /// Returns `RuntimeError::StackOverflow` if the stack is full.
    #[inline]
    pub fn push(&mut self, value: Value) -> Result<(), RuntimeError> {
        if self.values.len() >= self.max_values {
            return Err(RuntimeError::StackOverflow);
        }
        self.values.push(value);
        self.max_value_depth = self.max_value_depth.max(self.values.len());
        Ok(())
    }

    /// Pop a value
    ///
    /// # Errors
    ///
    /// Returns `RuntimeError::StackUnderflow` if the stack is empty.
    #[inline]
    pub fn pop(&mut self) -> Result<Value, RuntimeError> {
        self.values.pop().ok_or(RuntimeError::StackUnderflow)
    }

    /// Peek at value N slots from top (0 = top)
    ///
    /// # Errors
    ///
    /// Returns `RuntimeError::StackUnderflow` if not enough values on stack.
    #[inline]
    pub fn peek_n(&self, n: usize) -> Result<&Value, RuntimeError> {
        let len = self.values.len();
        if len <= n {
            return Err(RuntimeError::StackUnderflow);
        }
        Ok(&self.values[len - 1 - n])
    }

    /// Peek at the top value
    ///
    /// # Errors
    ///
    /// Returns `RuntimeError::StackUnderflow` if the stack is empty.
    #[inline]
    pub fn peek(&self) -> Result<&Value, RuntimeError> {
        self.peek_n(0)
    }

    /// Current value-stack depth
    #[inline]
    pub fn depth(&self) -> usize {
        self.values.len()
    }

    /// Check if the value stack is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Cut the value stack down to `depth`, returning the removed values
    pub fn truncate(&mut self, depth: usize) -> Vec<Value> {
        if depth >= self.values.len() {
            return Vec::new();
        }
        self.values.split_off(depth)
    }

    /// Values currently on the stack, bottom first
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    // ========================================================================
    // Mark Stack Operations
    // ========================================================================

    /// Record the current value-stack depth
    ///
    /// # Errors
    ///
    /// Returns `RuntimeError::StackOverflow` if the mark stack is full.
    pub fn push_mark(&mut self) -> Result<(), RuntimeError> {
        if self.marks.len() >= self.max_marks {
            return Err(RuntimeError::StackOverflow);
        }
        self.marks.push(self.values.len());
        Ok(())
    }

    /// Pop the most recent mark
    ///
    /// # Errors
    ///
    /// Returns `RuntimeError::StackUnderflow` if no marks are set.
    pub fn pop_mark(&mut self) -> Result<usize, RuntimeError> {
        self.marks.pop().ok_or(RuntimeError::StackUnderflow)
    }

    /// Current mark-stack depth
    #[inline]
    pub fn mark_depth(&self) -> usize {
        self.marks.len()
    }

    /// Cut the mark stack down to `depth`
    pub fn truncate_marks(&mut self, depth: usize) {
        self.marks.truncate(depth);
    }

    // ========================================================================
    // Call Frame Management
    // ========================================================================

    /// Push a call frame
    ///
    /// # Errors
    ///
    /// Returns `RuntimeError::StackOverflow` if the call depth limit is hit.
    pub fn push_frame(&mut self, frame: Frame) -> Result<(), RuntimeError> {
        if self.frames.len() >= self.max_frames {
            return Err(RuntimeError::StackOverflow);
        }
        self.frames.push(frame);
        self.max_frame_count = self.max_frame_count.max(self.frames.len());
        Ok(())
    }

    /// Pop the current call frame
    pub fn pop_frame(&mut self) -> Option<Frame> {
        self.frames.pop()
    }

    /// Get the current call frame
    #[inline]
    pub fn current_frame(&self) -> Option<&Frame> {
        self.frames.last()
    }

    /// Get the number of active frames
    #[inline]
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Active frames, outermost first
    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    // ========================================================================
    // Statistics
    // ========================================================================

    /// Get stack statistics
    pub fn stats(&self) -> StackStats {
        StackStats {
            value_depth: self.values.len(),
            mark_depth: self.marks.len(),
            frame_count: self.frames.len(),
            max_value_depth: self.max_value_depth,
            max_frame_count: self.max_frame_count,
        }
    }
}

impl Default for Stack {
    fn default() -> Self {
        Self::new()
    }
}
