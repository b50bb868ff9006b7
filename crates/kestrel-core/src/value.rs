//! Runtime value handles
//!
//! A [`Value`] is what the evaluator moves around: small scalars, shared
//! strings and object handles. Object handles are plain ids; the reference
//! they may represent is tracked explicitly by the runtime (see
//! [`Runtime::add_ref`](crate::Runtime::add_ref) and
//! [`Runtime::release_reference`](crate::Runtime::release_reference)).
//!
//! # Ownership
//!
//! ```text
//! slot / value stack  ──owns──▶  one reference to the object
//! read result         ──────▶  non-owning handle (add_ref to retain)
//! ```

use crate::object::ObjectId;
use std::fmt;
use std::sync::Arc;

/// A runtime value
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// The "no value" sentinel
    ///
    /// Fresh type-tagged slots hold it, failed lookups return it, and weak
    /// slots whose target died read as it.
    #[default]
    Undefined,

    /// Integer
    Int(i64),

    /// Float
    Float(f64),

    /// Shared string
    Str(Arc<str>),

    /// Object handle
    Object(ObjectId),

    /// Function bound to an object
    Function {
        /// Object the function belongs to
        object: ObjectId,
        /// Identifier index within the object's program
        identifier: usize,
    },

    /// A resolved identifier, usable as an index key
    SlotRef(usize),
}

impl Value {
    /// Create a string value
    pub fn string(s: &str) -> Self {
        Value::Str(Arc::from(s))
    }

    /// Check for the "no value" sentinel
    #[inline]
    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    /// Get the integer payload
    #[inline]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Get the float payload
    #[inline]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Get the string payload
    #[inline]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Get the object handle of an `Object` value
    #[inline]
    pub fn as_object(&self) -> Option<ObjectId> {
        match self {
            Value::Object(id) => Some(*id),
            _ => None,
        }
    }

    /// Object this value holds a reference to, if any
    ///
    /// Bound functions keep their object alive just like object values.
    #[inline]
    pub fn object_ref(&self) -> Option<ObjectId> {
        match self {
            Value::Object(id) => Some(*id),
            Value::Function { object, .. } => Some(*object),
            _ => None,
        }
    }

    /// Type name, used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Object(_) => "object",
            Value::Function { .. } => "function",
            Value::SlotRef(_) => "identifier",
        }
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::string(s)
    }
}

impl From<ObjectId> for Value {
    fn from(id: ObjectId) -> Self {
        Value::Object(id)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "UNDEFINED"),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Object(id) => write!(f, "object{}", id),
            Value::Function { object, identifier } => {
                write!(f, "function#{}@object{}", identifier, object)
            }
            Value::SlotRef(i) => write!(f, "identifier#{}", i),
        }
    }
}
