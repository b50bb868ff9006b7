//! Collector passes
//!
//! Each pass is a method on [`Runtime`] so an outside orchestrator can
//! interleave them with collection of other container kinds. [`Runtime::collect`]
//! runs all four in order.

use super::{GcError, GcMarker, GcPhase, GcStats};
use crate::object::{Cell, ObjectId, ShortValue};
use crate::recovery::FatalError;
use crate::runtime::Runtime;
use rustc_hash::{FxHashMap, FxHashSet};
use std::time::{Duration, Instant};

const UNVISITED: usize = usize::MAX;

impl Runtime {
    /// Strong references held by `id`, including those reported by its hooks
    ///
    /// `recurse` selects `gc_recurse` over `gc_check` for native storage.
    fn gc_references(&self, id: ObjectId, recurse: bool, out: &mut Vec<ObjectId>) {
        let Some(header) = self.registry.get(id) else {
            return;
        };
        header.strong_refs(out);
        let (Some(program), Some(storage)) = (header.program(), header.storage()) else {
            return;
        };
        for (e, inherit) in program.inherits().iter().enumerate() {
            let Some(hooks) = inherit.context().hooks() else {
                continue;
            };
            let native = storage.native(e);
            let mut visit = |target: ObjectId| out.push(target);
            if recurse {
                hooks.gc_recurse(native, &mut visit);
            } else {
                hooks.gc_check(native, &mut visit);
            }
        }
    }

    // ========================================================================
    // Pass 1: Check
    // ========================================================================

    /// Count internal references and verify registry invariants
    ///
    /// An object with more internal references than its count is fatal.
    ///
    /// # Errors
    ///
    /// Returns `GcError::OutOfOrder` unless the collector is idle.
    pub fn run_check_pass(&mut self) -> Result<(), GcError> {
        self.gc.advance(GcPhase::Idle, GcPhase::Check)?;
        self.gc.started = Some(Instant::now());
        self.gc.markers.clear();
        self.gc.candidates.clear();

        if let Err(message) = self.registry.verify_links() {
            self.fatal(FatalError::GcInconsistency(message));
        }

        let ids = self.registry.live_ids();
        for &id in &ids {
            self.gc.markers.insert(id, GcMarker::default());
        }

        let mut refs = Vec::new();
        for &id in &ids {
            refs.clear();
            self.gc_references(id, false, &mut refs);
            for target in &refs {
                if let Some(marker) = self.gc.markers.get_mut(target) {
                    marker.internal += 1;
                }
            }
        }

        for &id in &ids {
            let internal = self.gc.markers.get(&id).map_or(0, |marker| marker.internal);
            let count = self.refs(id);
            if internal > count {
                self.fatal(FatalError::GcInconsistency(format!(
                    "{} has {} internal references but a count of {}",
                    id, internal, count
                )));
            }
        }

        log::debug!("gc check: {} live objects", ids.len());
        Ok(())
    }

    // ========================================================================
    // Pass 2: Mark
    // ========================================================================

    /// Mark everything reachable from objects held outside the graph
    ///
    /// Objects parked at zero references count as roots so that what they
    /// hold stays intact until their ordinary destruction.
    ///
    /// # Errors
    ///
    /// Returns `GcError::OutOfOrder` unless the check pass just ran.
    pub fn run_mark_pass(&mut self) -> Result<(), GcError> {
        self.gc.advance(GcPhase::Check, GcPhase::Mark)?;

        let parked: FxHashSet<ObjectId> = self.gc.zero_ref.iter().copied().collect();
        let mut work = Vec::new();
        for (id, marker) in self.gc.markers.iter_mut() {
            let count = self.registry.get(*id).map_or(0, |header| header.refs());
            if marker.is_root(count) || parked.contains(id) {
                marker.referenced = true;
                work.push(*id);
            }
        }

        let mut refs = Vec::new();
        while let Some(id) = work.pop() {
            refs.clear();
            self.gc_references(id, true, &mut refs);
            for target in refs.drain(..) {
                if let Some(marker) = self.gc.markers.get_mut(&target) {
                    if !marker.referenced {
                        marker.referenced = true;
                        work.push(target);
                    }
                }
            }
        }

        let marked = self.gc.markers.values().filter(|marker| marker.referenced).count();
        self.gc.stats.marked = marked;
        log::debug!("gc mark: {} of {} objects referenced", marked, self.gc.markers.len());
        Ok(())
    }

    // ========================================================================
    // Pass 3: Cycle Check
    // ========================================================================

    /// Order the unmarked objects and find the cycles among them
    ///
    /// # Errors
    ///
    /// Returns `GcError::OutOfOrder` unless the mark pass just ran.
    pub fn run_cycle_check_pass(&mut self) -> Result<(), GcError> {
        self.gc.advance(GcPhase::Mark, GcPhase::CycleCheck)?;

        let unmarked: Vec<ObjectId> = self
            .registry
            .live_ids()
            .into_iter()
            .filter(|id| self.gc.markers.get(id).map_or(false, |marker| !marker.referenced))
            .collect();
        let position: FxHashMap<ObjectId, usize> = unmarked
            .iter()
            .enumerate()
            .map(|(i, id)| (*id, i))
            .collect();

        let mut successors = Vec::with_capacity(unmarked.len());
        let mut refs = Vec::new();
        for &id in &unmarked {
            refs.clear();
            self.gc_references(id, true, &mut refs);
            let edges: Vec<usize> = refs
                .iter()
                .filter_map(|target| position.get(target).copied())
                .collect();
            successors.push(edges);
        }

        let mut cycles = 0;
        let mut order = Vec::with_capacity(unmarked.len());
        // Components come out referents first.
        for component in strongly_connected(&successors).into_iter().rev() {
            let cyclic = match component.as_slice() {
                [single] => successors[*single].contains(single),
                _ => true,
            };
            if cyclic {
                cycles += 1;
                for &member in &component {
                    if let Some(marker) = self.gc.markers.get_mut(&unmarked[member]) {
                        marker.in_cycle = true;
                    }
                }
            }
            order.extend(component.into_iter().map(|member| unmarked[member]));
        }

        self.gc.stats.cycles_found += cycles;
        log::debug!("gc cycle check: {} candidates in {} cycles", order.len(), cycles);
        self.gc.candidates = order;
        Ok(())
    }

    // ========================================================================
    // Pass 4: Free
    // ========================================================================

    /// Destruct every unreferenced object
    ///
    /// Every candidate is held and has its `destroy` run before anything is
    /// destructed. A candidate that a `destroy` re-referenced from outside
    /// the candidate set survives, along with everything it holds. Returns
    /// the number of objects destructed.
    ///
    /// # Errors
    ///
    /// Returns `GcError::OutOfOrder` unless the cycle check pass just ran.
    pub fn run_free_pass(&mut self) -> Result<usize, GcError> {
        self.gc.advance(GcPhase::CycleCheck, GcPhase::Free)?;

        for id in std::mem::take(&mut self.gc.zero_ref) {
            if self.exists(id) && self.refs(id) == 0 {
                self.schedule_really_free(id);
            }
        }

        let candidates: Vec<ObjectId> = std::mem::take(&mut self.gc.candidates)
            .into_iter()
            .filter(|&id| !self.is_destructed(id))
            .collect();
        for &id in &candidates {
            self.add_ref(id);
        }
        for &id in &candidates {
            self.call_destroy(id);
        }

        let survivors = self.find_survivors(&candidates);
        let mut freed = 0;
        for &id in &candidates {
            if !survivors.contains(&id) {
                self.destruct(id);
                freed += 1;
            }
        }
        for &id in &candidates {
            self.release_reference(id);
        }

        self.gc.markers.clear();
        self.gc.phase = GcPhase::Idle;
        self.flush_pending_destructions();
        self.clear_dead_weak_refs();

        let pause = self
            .gc
            .started
            .take()
            .map_or(Duration::ZERO, |started| started.elapsed());
        let stats = &mut self.gc.stats;
        stats.collections += 1;
        stats.objects_freed += freed;
        stats.survivors += survivors.len();
        stats.last_pause_time = pause;
        stats.total_pause_time += pause;
        self.gc.allocations_since_gc = 0;

        log::info!(
            "gc: freed {} objects, {} survived destroy, pause {:?}",
            freed,
            survivors.len(),
            pause
        );
        Ok(freed)
    }

    /// Candidates referenced from outside the candidate set after `destroy`
    fn find_survivors(&self, candidates: &[ObjectId]) -> FxHashSet<ObjectId> {
        let held: FxHashSet<ObjectId> = candidates
            .iter()
            .copied()
            .filter(|&id| !self.is_destructed(id))
            .collect();

        let mut internal: FxHashMap<ObjectId, u32> = FxHashMap::default();
        let mut refs = Vec::new();
        for &id in &held {
            refs.clear();
            self.gc_references(id, true, &mut refs);
            for target in &refs {
                if held.contains(target) {
                    *internal.entry(*target).or_default() += 1;
                }
            }
        }

        let mut survivors = FxHashSet::default();
        let mut work = Vec::new();
        for &id in candidates {
            if !held.contains(&id) {
                continue;
            }
            // One reference is the collector's hold.
            let count = self.refs(id).saturating_sub(1);
            if count > internal.get(&id).copied().unwrap_or(0) {
                survivors.insert(id);
                work.push(id);
            }
        }

        while let Some(id) = work.pop() {
            refs.clear();
            self.gc_references(id, true, &mut refs);
            for &target in &refs {
                if held.contains(&target) && survivors.insert(target) {
                    work.push(target);
                }
            }
        }

        if !survivors.is_empty() {
            log::debug!("gc: {} candidates resurrected", survivors.len());
        }
        survivors
    }

    /// Null weak slots whose target is gone
    fn clear_dead_weak_refs(&mut self) {
        let mut dead = Vec::new();
        let ids = self.registry.live_ids().into_iter().chain(self.registry.pending_ids());
        for id in ids {
            let Some(storage) = self.storage(id) else {
                continue;
            };
            for (index, cell) in storage.cells().iter().enumerate() {
                if let Some(target) = cell.weak_ref() {
                    if self.is_destructed(target) {
                        dead.push((id, index));
                    }
                }
            }
        }

        for (id, index) in dead {
            if let Some(storage) = self.storage_mut(id) {
                storage.replace(index, Cell::Short(ShortValue::WeakObject(None)));
            }
        }
    }

    // ========================================================================
    // Driver
    // ========================================================================

    /// Run all four passes
    ///
    /// Returns the number of objects destructed.
    ///
    /// # Errors
    ///
    /// Returns `GcError::OutOfOrder` if a collection is already in progress.
    pub fn collect(&mut self) -> Result<usize, GcError> {
        self.run_check_pass()?;
        self.run_mark_pass()?;
        self.run_cycle_check_pass()?;
        self.run_free_pass()
    }

    /// Check whether enough objects were allocated to warrant a collection
    pub fn should_collect(&self) -> bool {
        self.gc.allocations_since_gc >= self.gc.threshold
    }

    /// Collector statistics
    pub fn gc_stats(&self) -> &GcStats {
        &self.gc.stats
    }

    /// Current collector phase
    pub fn gc_phase(&self) -> GcPhase {
        self.gc.phase()
    }
}

/// Tarjan's strongly connected components over `successors`, iteratively
///
/// Each component is emitted after every component it reaches.
fn strongly_connected(successors: &[Vec<usize>]) -> Vec<Vec<usize>> {
    let n = successors.len();
    let mut index = vec![UNVISITED; n];
    let mut lowlink = vec![0; n];
    let mut on_stack = vec![false; n];
    let mut stack = Vec::new();
    let mut components = Vec::new();
    let mut next_index = 0;
    // (node, next successor to visit)
    let mut path: Vec<(usize, usize)> = Vec::new();

    for root in 0..n {
        if index[root] != UNVISITED {
            continue;
        }
        index[root] = next_index;
        lowlink[root] = next_index;
        next_index += 1;
        stack.push(root);
        on_stack[root] = true;
        path.push((root, 0));

        while let Some(&(node, position)) = path.last() {
            if let Some(&next) = successors[node].get(position) {
                if let Some(top) = path.last_mut() {
                    top.1 += 1;
                }
                if index[next] == UNVISITED {
                    index[next] = next_index;
                    lowlink[next] = next_index;
                    next_index += 1;
                    stack.push(next);
                    on_stack[next] = true;
                    path.push((next, 0));
                } else if on_stack[next] {
                    lowlink[node] = lowlink[node].min(index[next]);
                }
                continue;
            }

            path.pop();
            if let Some(&(parent, _)) = path.last() {
                lowlink[parent] = lowlink[parent].min(lowlink[node]);
            }
            if lowlink[node] == index[node] {
                let mut component = Vec::new();
                while let Some(member) = stack.pop() {
                    on_stack[member] = false;
                    component.push(member);
                    if member == node {
                        break;
                    }
                }
                components.push(component);
            }
        }
    }
    components
}
