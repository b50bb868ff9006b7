//! Fatal errors
//!
//! A fatal error means an invariant is broken and execution cannot continue
//! safely. It is never thrown through the recovery stack: the runtime logs a
//! diagnostic, dumps the backlog of recent calls, gives the configured fatal
//! hook a look, then terminates the process. The diagnostic also goes
//! straight to stderr, so it survives a missing logger.

use crate::defaults::NO_RECOVERY_EXIT_CODE;
use crate::gc::GcPhase;
use crate::object::ObjectId;
use crate::runtime::Runtime;
use std::io::{self, Write};
use std::sync::Arc;

/// Unrecoverable runtime failures
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FatalError {
    /// An error was raised while the previous one was still being built
    #[error("Recursive error: {message}")]
    RecursiveError {
        /// Message of the nested error
        message: String,
    },

    /// An error was thrown with no recovery context on the stack
    #[error("No error recovery context: {message}")]
    NoRecoveryContext {
        /// Message of the uncaught error
        message: String,
    },

    /// `destroy` was about to run while the collector analyzes the graph
    #[error("destroy called for {object} during GC {phase:?} pass")]
    ReentrantDestroyDuringGc {
        /// Object whose destruction was attempted
        object: ObjectId,
        /// Active collector phase
        phase: GcPhase,
    },

    /// Unwinding found the stacks shallower than the target context recorded
    #[error("Stack error in error: {stack} depth {found} below recorded {expected}")]
    StackUnderflow {
        /// Which stack
        stack: &'static str,
        /// Depth recorded by the recovery context
        expected: usize,
        /// Depth found
        found: usize,
    },

    /// A recovery context was popped out of order
    #[error("Recovery stack out of sync")]
    RecoveryStackOutOfSync,

    /// The collector's consistency check failed
    #[error("GC inconsistency: {0}")]
    GcInconsistency(String),
}

/// Callback invoked with a fatal error before the process terminates
///
/// A hook that panics keeps the process alive; tests rely on this.
pub type FatalHook = Arc<dyn Fn(&FatalError) + Send + Sync>;

impl Runtime {
    /// Report a fatal error and terminate
    pub(crate) fn fatal(&mut self, error: FatalError) -> ! {
        log::error!("Fatal error: {}", error);
        self.dump_backlog();
        let _ = self.write_fatal_report(&error, &mut io::stderr().lock());
        if let Some(hook) = self.options.fatal_hook.clone() {
            hook(&error);
        }
        match error {
            FatalError::NoRecoveryContext { .. } => std::process::exit(NO_RECOVERY_EXIT_CODE),
            _ => std::process::abort(),
        }
    }

    /// Write a fatal diagnostic followed by the backlog to `out`
    pub fn write_fatal_report(&self, error: &FatalError, out: &mut impl Write) -> io::Result<()> {
        writeln!(out, "Fatal error: {}", error)?;
        if !self.backlog.is_empty() {
            writeln!(out, "Backlog (oldest first):")?;
            for entry in &self.backlog {
                writeln!(out, "  {}", entry)?;
            }
        }
        out.flush()
    }

    /// Log the most recent calls, oldest first
    pub fn dump_backlog(&self) {
        if self.backlog.is_empty() {
            return;
        }
        log::error!("Backlog (oldest first):");
        for entry in &self.backlog {
            log::error!("  {}", entry);
        }
    }
}
