//! Thrown values and severities

use crate::object::ObjectId;
use crate::value::Value;
use crate::{ErrorKind, RuntimeError};
use std::fmt;
use std::sync::Arc;

/// How serious a throw is
///
/// A recovery context with severity `S` catches throws of severity `<= S`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Severity {
    /// Ordinary error
    #[default]
    Error,
    /// Request to end the current thread
    ThreadExit,
    /// Request to end the process
    Exit,
}

/// One backtrace entry, outermost call first
#[derive(Debug, Clone, PartialEq)]
pub struct BacktraceEntry {
    /// Program of the executing function
    pub program: Arc<str>,
    /// Function name
    pub function: Option<Arc<str>>,
    /// Object the function was bound to
    pub object: ObjectId,
    /// Result of the object's `_sprintf`, if it has one
    pub description: Option<String>,
}

impl fmt::Display for BacktraceEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let function = self.function.as_deref().unwrap_or("<unknown>");
        match &self.description {
            Some(description) => write!(f, "{}->{}() in {}", description, function, self.program),
            None => write!(f, "{}{}->{}()", self.program, self.object, function),
        }
    }
}

/// Error payload built by `raise`
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorValue {
    /// The error
    pub error: RuntimeError,
    /// Call sites active when it was raised
    pub backtrace: Vec<BacktraceEntry>,
}

/// In-flight throw payload
#[derive(Debug, Clone, PartialEq)]
pub enum ThrownPayload {
    /// A raised runtime error
    Error(ErrorValue),
    /// An arbitrary thrown value (owns its reference, if any)
    Value(Value),
}

/// Payload plus severity, delivered to the catching context
#[derive(Debug, Clone, PartialEq)]
pub struct ThrownValue {
    /// The payload
    pub payload: ThrownPayload,
    /// Severity of the throw
    pub severity: Severity,
}

impl ThrownValue {
    /// The runtime error, if this is a raised error
    pub fn error(&self) -> Option<&RuntimeError> {
        match &self.payload {
            ThrownPayload::Error(value) => Some(&value.error),
            ThrownPayload::Value(_) => None,
        }
    }

    /// Kind of the runtime error, if this is a raised error
    pub fn kind(&self) -> Option<ErrorKind> {
        self.error().map(RuntimeError::kind)
    }

    /// Backtrace of a raised error (empty for thrown values)
    pub fn backtrace(&self) -> &[BacktraceEntry] {
        match &self.payload {
            ThrownPayload::Error(value) => &value.backtrace,
            ThrownPayload::Value(_) => &[],
        }
    }

    /// Human-readable message
    pub fn message(&self) -> String {
        match &self.payload {
            ThrownPayload::Error(value) => value.error.to_string(),
            ThrownPayload::Value(value) => value.to_string(),
        }
    }
}

impl fmt::Display for ThrownValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.message())?;
        for entry in self.backtrace().iter().rev() {
            writeln!(f, "  {}", entry)?;
        }
        Ok(())
    }
}
