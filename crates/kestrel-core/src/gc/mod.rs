//! Cycle-collecting garbage collector
//!
//! Reference counting frees acyclic garbage on its own. The collector finds
//! groups of objects that only keep each other alive.
//!
//! # Passes
//!
//! ```text
//! Idle ─run_check_pass─▶ Check ─run_mark_pass─▶ Mark ─run_cycle_check_pass─▶ CycleCheck
//!   ▲                                                                           │
//!   └───────────────────────────── run_free_pass ◀──────────────────────────────┘
//! ```
//!
//! - **Check**: count, per live object, the references held by other live
//!   objects (its *internal* references) and verify registry invariants.
//! - **Mark**: an object with more references than internal ones is held
//!   from outside the graph and becomes a root; everything reachable from a
//!   root is marked referenced.
//! - **CycleCheck**: strongly connected components of the unmarked objects
//!   give the destruction order (referrers first) and the cycle count.
//! - **Free**: hold every candidate, run `destroy` on each, keep those a
//!   `destroy` re-referenced from outside, destruct the rest.
//!
//! No `destroy` runs before the free pass. Objects whose count drops to zero
//! during the first three passes are parked and go through the ordinary
//! zero-count path when the free pass starts.
//!
//! Weak slots never count as references; the free pass nulls those whose
//! target died.

mod collector;
mod marker;

pub(crate) use marker::GcMarker;

use crate::object::ObjectId;
use rustc_hash::FxHashMap;
use std::time::{Duration, Instant};

/// Collector phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum GcPhase {
    /// No collection in progress
    #[default]
    Idle,
    /// Consistency check and internal reference counting
    Check,
    /// Root marking
    Mark,
    /// Cycle detection
    CycleCheck,
    /// Destruction of unreferenced objects
    Free,
}

impl GcPhase {
    /// Check whether the object graph is being analyzed
    ///
    /// `destroy` must not run in these phases.
    #[inline]
    pub fn is_analyzing(self) -> bool {
        matches!(self, GcPhase::Check | GcPhase::Mark | GcPhase::CycleCheck)
    }
}

/// Collector driver errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum GcError {
    /// A pass was run out of order
    #[error("GC pass out of order: expected phase {expected:?}, found {found:?}")]
    OutOfOrder {
        /// Phase the pass requires
        expected: GcPhase,
        /// Current phase
        found: GcPhase,
    },
}

/// Garbage collector statistics
#[derive(Debug, Clone, Default)]
pub struct GcStats {
    /// Total number of collections
    pub collections: usize,

    /// Total objects freed by the collector
    pub objects_freed: usize,

    /// Total cycles found
    pub cycles_found: usize,

    /// Total candidates kept alive by their `destroy`
    pub survivors: usize,

    /// Objects marked referenced in the last collection
    pub marked: usize,

    /// Total pause time
    pub total_pause_time: Duration,

    /// Last collection duration
    pub last_pause_time: Duration,
}

/// Collector state owned by the runtime
pub(crate) struct GcState {
    pub(crate) phase: GcPhase,
    pub(crate) markers: FxHashMap<ObjectId, GcMarker>,
    /// Unreferenced objects, referrers first
    pub(crate) candidates: Vec<ObjectId>,
    /// Objects whose count hit zero during analysis
    pub(crate) zero_ref: Vec<ObjectId>,
    pub(crate) stats: GcStats,
    pub(crate) started: Option<Instant>,
    pub(crate) threshold: usize,
    pub(crate) allocations_since_gc: usize,
}

impl GcState {
    pub(crate) fn new(threshold: usize) -> Self {
        Self {
            phase: GcPhase::Idle,
            markers: FxHashMap::default(),
            candidates: Vec::new(),
            zero_ref: Vec::new(),
            stats: GcStats::default(),
            started: None,
            threshold,
            allocations_since_gc: 0,
        }
    }

    #[inline]
    pub(crate) fn phase(&self) -> GcPhase {
        self.phase
    }

    #[inline]
    pub(crate) fn note_allocation(&mut self) {
        self.allocations_since_gc += 1;
    }

    pub(crate) fn defer_zero_ref(&mut self, id: ObjectId) {
        if !self.zero_ref.contains(&id) {
            self.zero_ref.push(id);
        }
    }

    fn advance(&mut self, expected: GcPhase, next: GcPhase) -> Result<(), GcError> {
        if self.phase != expected {
            return Err(GcError::OutOfOrder {
                expected,
                found: self.phase,
            });
        }
        self.phase = next;
        Ok(())
    }
}
