//! Default runtime tuning constants

/// Maximum value stack size (in slots)
pub const DEFAULT_MAX_STACK_VALUES: usize = 64 * 1024;

/// Maximum call depth
pub const DEFAULT_MAX_FRAMES: usize = 4 * 1024;

/// Maximum mark stack size
pub const DEFAULT_MAX_MARKS: usize = 16 * 1024;

/// Allocations between suggested collections
pub const DEFAULT_GC_THRESHOLD: usize = 10_000;

/// Number of recent calls kept for fatal error dumps
pub const DEFAULT_BACKLOG_SIZE: usize = 32;

/// Process exit code used when an error is raised with no recovery context
pub const NO_RECOVERY_EXIT_CODE: i32 = 99;

/// Format character passed to `_sprintf` when describing objects in backtraces
pub const SPRINTF_DESCRIBE: char = 'O';
