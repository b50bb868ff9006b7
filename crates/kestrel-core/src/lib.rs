//! Kestrel VM Object Runtime
//!
//! This crate provides the object runtime of the Kestrel VM:
//! - Program descriptors and inherited contexts
//! - Reference-counted object instances and the object registry
//! - Object lifecycle (instantiation, constructors, `destroy`, destruction)
//! - Deferred destruction flushed from the idle callback
//! - A four-pass cycle-collecting garbage collector
//! - The error recovery stack (checkpoints, cleanup handlers, throw/catch)
//! - Native module registry and the interpreter lock
//!
//! # Example
//!
//! ```no_run
//! use kestrel_core::{ProgramBuilder, Runtime, Value, VarType};
//!
//! let program = ProgramBuilder::new("point")
//!     .variable("x", VarType::Int)
//!     .finish()
//!     .unwrap();
//!
//! let mut rt = Runtime::new();
//! let caught = rt
//!     .catch(|rt| {
//!         let point = rt.clone_object(&program, &[])?;
//!         let x = program.find_identifier("x").unwrap();
//!         rt.set_variable(point, x, Value::Int(5))?;
//!         rt.get_variable(point, x)
//!     })
//!     .unwrap();
//! assert_eq!(caught.unwrap(), Value::Int(5));
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod callback;
pub mod defaults;
pub mod gc;
pub mod module;
pub mod object;
pub mod program;
pub mod recovery;
pub mod runtime;
pub mod stack;
pub mod sync;
pub mod value;

pub use callback::{CallbackId, CallbackList};
pub use gc::{GcError, GcPhase, GcStats};
pub use module::NativeModule;
pub use object::{Cell, ListMembership, ObjectId, ObjectRegistry, ShortValue, Storage};
pub use program::{
    ContextHooks, HookCx, Lfun, NativeMethod, Program, ProgramBuilder, ProgramError, VarType,
};
pub use recovery::{
    BacktraceEntry, ErrorValue, FatalError, FatalHook, OnErrorHandle, RecoveryHandle, Severity,
    ThrownPayload, ThrownValue, Unwind,
};
pub use runtime::{Runtime, RuntimeOptions};
pub use stack::{Frame, Stack, StackStats};
pub use sync::InterpreterLock;
pub use value::Value;

use std::fmt;
use std::sync::Arc;

/// Why a program refused to be instantiated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloneRefusal {
    /// The program has not completed compilation
    NotFinished,
    /// The program needs a parent object but none was supplied
    ParentLost,
    /// A parent object was supplied to a program that takes none
    UnexpectedParent,
}

impl fmt::Display for CloneRefusal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloneRefusal::NotFinished => write!(f, "program is not finished"),
            CloneRefusal::ParentLost => write!(f, "parent lost"),
            CloneRefusal::UnexpectedParent => write!(f, "program expects no parent"),
        }
    }
}

/// Recoverable runtime errors
///
/// These are raised through the recovery stack with [`Runtime::raise`] and
/// surface at the catching site inside a [`ThrownValue`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RuntimeError {
    /// Instantiation of an unfinished program, or a parent mismatch
    #[error("Cannot clone program {program}: {reason}")]
    UnfinishedProgram {
        /// Program name
        program: Arc<str>,
        /// Refusal reason
        reason: CloneRefusal,
    },

    /// Access to an object whose program is gone
    #[error("Lookup in destructed object")]
    DestructedObject,

    /// Assignment by name to an identifier that does not exist
    #[error("No such variable ({name}) in object")]
    NoSuchVariable {
        /// Name that failed to resolve
        name: Arc<str>,
    },

    /// Assignment to a function or constant
    #[error("Cannot assign functions or constants ({name})")]
    NonAssignableIdentifier {
        /// Identifier name
        name: Arc<str>,
    },

    /// Indexing with a key that is neither a name nor a slot reference
    #[error("Lookup on non-string value ({found})")]
    IllegalLookupType {
        /// Type name of the offending key
        found: &'static str,
    },

    /// Wrong value type stored into a short-typed slot
    #[error("Wrong type in assignment to {name}: expected {expected}, got {found}")]
    TypeMismatch {
        /// Variable name
        name: Arc<str>,
        /// Declared type
        expected: VarType,
        /// Type name of the assigned value
        found: &'static str,
    },

    /// Identifier index out of range for the object's program
    #[error("Unknown identifier index {0}")]
    UnknownIdentifier(usize),

    /// Call through an identifier that is not a function
    #[error("{0} is not a function")]
    NotAFunction(Arc<str>),

    /// Value or frame stack exhausted
    #[error("Stack overflow")]
    StackOverflow,

    /// Pop from an empty stack
    #[error("Stack underflow")]
    StackUnderflow,

    /// Error raised by native code
    #[error("{0}")]
    Custom(String),
}

/// Discriminant of a [`RuntimeError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// See [`RuntimeError::UnfinishedProgram`]
    UnfinishedProgram,
    /// See [`RuntimeError::DestructedObject`]
    DestructedObject,
    /// See [`RuntimeError::NoSuchVariable`]
    NoSuchVariable,
    /// See [`RuntimeError::NonAssignableIdentifier`]
    NonAssignableIdentifier,
    /// See [`RuntimeError::IllegalLookupType`]
    IllegalLookupType,
    /// See [`RuntimeError::TypeMismatch`]
    TypeMismatch,
    /// See [`RuntimeError::UnknownIdentifier`]
    UnknownIdentifier,
    /// See [`RuntimeError::NotAFunction`]
    NotAFunction,
    /// See [`RuntimeError::StackOverflow`]
    StackOverflow,
    /// See [`RuntimeError::StackUnderflow`]
    StackUnderflow,
    /// See [`RuntimeError::Custom`]
    Custom,
}

impl RuntimeError {
    /// Get the error kind
    pub fn kind(&self) -> ErrorKind {
        match self {
            RuntimeError::UnfinishedProgram { .. } => ErrorKind::UnfinishedProgram,
            RuntimeError::DestructedObject => ErrorKind::DestructedObject,
            RuntimeError::NoSuchVariable { .. } => ErrorKind::NoSuchVariable,
            RuntimeError::NonAssignableIdentifier { .. } => ErrorKind::NonAssignableIdentifier,
            RuntimeError::IllegalLookupType { .. } => ErrorKind::IllegalLookupType,
            RuntimeError::TypeMismatch { .. } => ErrorKind::TypeMismatch,
            RuntimeError::UnknownIdentifier(_) => ErrorKind::UnknownIdentifier,
            RuntimeError::NotAFunction(_) => ErrorKind::NotAFunction,
            RuntimeError::StackOverflow => ErrorKind::StackOverflow,
            RuntimeError::StackUnderflow => ErrorKind::StackUnderflow,
            RuntimeError::Custom(_) => ErrorKind::Custom,
        }
    }
}

/// Runtime operation result
///
/// The error side is an [`Unwind`] token: the throw has already restored the
/// interpreter stacks, and the token must be propagated to the matching catch.
pub type RuntimeResult<T> = Result<T, Unwind>;
