//! Object lifecycle
//!
//! ```text
//! instantiate ─▶ storage zeroed, linked live, init hooks (last inherit first)
//!      │
//! run_constructors ─▶ __INIT of each context, then create(args)
//!      │
//! release_reference ──refs == 0──┬─ destruct_immediate ─▶ destruct now
//!      │                         ├─ GC analyzing ───────▶ left in place
//!      │                         └─ otherwise ──────────▶ pending list + idle flush
//!      ▼
//! destruct ─▶ destroy (once) ─▶ exit hooks + release cells (last inherit first)
//!           ─▶ release parent ─▶ free storage
//! ```

use super::Runtime;
use crate::gc::GcPhase;
use crate::object::{Cell, ObjectHeader, ObjectId, Storage};
use crate::program::{HookCx, Lfun, Program};
use crate::recovery::Severity;
use crate::stack::Frame;
use crate::value::Value;
use crate::{CloneRefusal, RuntimeError, RuntimeResult};
use std::sync::Arc;

impl Runtime {
    // ========================================================================
    // Instantiation
    // ========================================================================

    /// Instantiate a program with no parent
    ///
    /// Returns the instance with one reference, owned by the caller.
    ///
    /// # Errors
    ///
    /// Raises `UnfinishedProgram` if the program is not finished or needs a
    /// parent. Errors from init hooks propagate after the instance is
    /// destructed.
    pub fn instantiate(&mut self, program: &Arc<Program>) -> RuntimeResult<ObjectId> {
        if program.flags().uses_parent {
            return Err(self.refuse(program, CloneRefusal::ParentLost));
        }
        self.low_instantiate(program, None)
    }

    /// Instantiate a program created from `parent_identifier` in `parent`
    ///
    /// The instance owns a reference to `parent`.
    ///
    /// # Errors
    ///
    /// Raises `UnfinishedProgram` if the program is not finished or takes no
    /// parent, and `DestructedObject` if the parent is gone.
    pub fn instantiate_with_parent(
        &mut self,
        program: &Arc<Program>,
        parent: ObjectId,
        parent_identifier: usize,
    ) -> RuntimeResult<ObjectId> {
        if !program.flags().uses_parent {
            return Err(self.refuse(program, CloneRefusal::UnexpectedParent));
        }
        self.low_instantiate(program, Some((parent, parent_identifier)))
    }

    fn refuse(&mut self, program: &Arc<Program>, reason: CloneRefusal) -> crate::Unwind {
        self.raise(RuntimeError::UnfinishedProgram {
            program: program.name().clone(),
            reason,
        })
    }

    fn low_instantiate(
        &mut self,
        program: &Arc<Program>,
        parent: Option<(ObjectId, usize)>,
    ) -> RuntimeResult<ObjectId> {
        if !program.is_finished() {
            return Err(self.refuse(program, CloneRefusal::NotFinished));
        }
        if let Some((parent, _)) = parent {
            if self.is_destructed(parent) {
                return Err(self.raise(RuntimeError::DestructedObject));
            }
        }

        let storage = Storage::for_program(program);
        let header = ObjectHeader::new(
            program.clone(),
            storage,
            parent.map(|(parent, _)| parent),
            parent.map(|(_, identifier)| identifier),
        );
        let id = self.registry.insert(header);
        if let Some((parent, _)) = parent {
            self.add_ref(parent);
        }
        self.gc.note_allocation();
        log::debug!("instantiated {} as {}", program.name(), id);

        let guard = self.on_error(move |rt| {
            rt.destruct(id);
            rt.release_reference(id);
        });
        for e in (0..program.inherits().len()).rev() {
            if let Some(hooks) = program.inherits()[e].context().hooks().cloned() {
                hooks.init(&mut HookCx::new(self, id, e))?;
            }
        }
        self.unset_on_error(guard);
        Ok(id)
    }

    /// Run `__INIT` of every context (last inherit first), then `create(args)`
    ///
    /// # Errors
    ///
    /// Errors raised by the constructors propagate; the instance has been
    /// destructed by then but stays registered until its references go.
    pub fn run_constructors(&mut self, id: ObjectId, args: &[Value]) -> RuntimeResult<()> {
        let Some(program) = self.program_of(id) else {
            return Err(self.raise(RuntimeError::DestructedObject));
        };

        let guard = self.on_error(move |rt| rt.destruct(id));
        for e in (0..program.inherits().len()).rev() {
            if let Some(init) = program.context_initializer(e) {
                self.call_function(id, init, &[])?;
            }
        }
        if let Some(create) = program.find_lfun(Lfun::Create) {
            self.call_function(id, create, args)?;
        }
        self.unset_on_error(guard);
        Ok(())
    }

    /// Instantiate and construct
    ///
    /// # Errors
    ///
    /// See [`instantiate`](Self::instantiate) and
    /// [`run_constructors`](Self::run_constructors). On failure the instance
    /// is destructed and its reference released.
    pub fn clone_object(&mut self, program: &Arc<Program>, args: &[Value]) -> RuntimeResult<ObjectId> {
        let id = self.instantiate(program)?;
        self.construct(id, args)
    }

    /// Instantiate with a parent and construct
    ///
    /// # Errors
    ///
    /// See [`instantiate_with_parent`](Self::instantiate_with_parent) and
    /// [`run_constructors`](Self::run_constructors).
    pub fn clone_object_with_parent(
        &mut self,
        program: &Arc<Program>,
        parent: ObjectId,
        parent_identifier: usize,
        args: &[Value],
    ) -> RuntimeResult<ObjectId> {
        let id = self.instantiate_with_parent(program, parent, parent_identifier)?;
        self.construct(id, args)
    }

    fn construct(&mut self, id: ObjectId, args: &[Value]) -> RuntimeResult<ObjectId> {
        let guard = self.on_error(move |rt| rt.release_reference(id));
        self.run_constructors(id, args)?;
        self.unset_on_error(guard);
        Ok(id)
    }

    // ========================================================================
    // Destruction
    // ========================================================================

    /// Destruct an object
    ///
    /// Calls `destroy` (at most once per lifetime), runs exit hooks and
    /// releases every reference in storage, last inherit first, then
    /// releases the parent and frees the storage. The header stays until
    /// the reference count reaches zero. Destructing twice is a no-op.
    pub fn destruct(&mut self, id: ObjectId) {
        match self.registry.get(id) {
            Some(header) if !header.is_destructed() => {}
            _ => return,
        }

        self.add_ref(id);
        self.call_destroy(id);

        // destroy may have destructed the object itself.
        let program = match self.registry.get_mut(id).and_then(|h| h.program.take()) {
            Some(program) => program,
            None => {
                self.release_reference(id);
                return;
            }
        };
        log::debug!("destructing {} ({})", id, program.name());

        self.being_destructed.insert(id, program.clone());
        for e in (0..program.inherits().len()).rev() {
            let inherit = &program.inherits()[e];
            if let Some(hooks) = inherit.context().hooks().cloned() {
                hooks.exit(&mut HookCx::new(self, id, e));
            }
            let offset = inherit.storage_offset();
            for (slot, ty) in inherit.context().variable_types().iter().enumerate() {
                let old = self
                    .storage_mut(id)
                    .and_then(|storage| storage.replace(offset + slot, Cell::zero(*ty)));
                if let Some(target) = old.as_ref().and_then(Cell::strong_ref) {
                    self.release_reference(target);
                }
            }
        }
        self.being_destructed.remove(&id);

        let parent = self.registry.get_mut(id).and_then(|header| {
            header.storage = None;
            header.parent_identifier = None;
            header.parent.take()
        });
        if let Some(parent) = parent {
            self.release_reference(parent);
        }
        drop(program);

        self.release_reference(id);
    }

    /// Invoke `destroy` unless it already ran for this object
    ///
    /// Errors raised by `destroy` are logged and swallowed.
    pub(crate) fn call_destroy(&mut self, id: ObjectId) {
        let phase = self.gc.phase();
        if phase.is_analyzing() {
            self.fatal(crate::FatalError::ReentrantDestroyDuringGc { object: id, phase });
        }

        let program = match self.registry.get_mut(id) {
            Some(header) if !header.destroy_called && header.program.is_some() => {
                header.destroy_called = true;
                header.program.clone()
            }
            _ => None,
        };
        let Some(program) = program else {
            return;
        };
        let Some(destroy) = program.find_lfun(Lfun::Destroy) else {
            return;
        };

        log::debug!("calling destroy on {} ({})", id, program.name());
        let result = self.catch_with_severity(Severity::Exit, |rt| rt.call_function(id, destroy, &[]));
        match result {
            Ok(Ok(_)) => {}
            Ok(Err(thrown)) => log::warn!("error in destroy of {}: {}", id, thrown.message()),
            Err(_) => log::warn!("destroy of {} unwound past its recovery context", id),
        }
    }

    /// Program of an object whose exit hooks are running
    ///
    /// The object already reads as destructed at that point.
    pub fn program_of_object_being_destructed(&self, id: ObjectId) -> Option<Arc<Program>> {
        self.being_destructed.get(&id).cloned()
    }

    // ========================================================================
    // Reference Counting
    // ========================================================================

    /// Take a reference to an object
    pub fn add_ref(&mut self, id: ObjectId) {
        match self.registry.get_mut(id) {
            Some(header) => header.refs += 1,
            None => log::warn!("add_ref on freed object {}", id),
        }
    }

    /// Drop a reference to an object
    ///
    /// At zero the object is destructed immediately, deferred to the pending
    /// list, or left for the collector, depending on its program and the
    /// collector phase.
    pub fn release_reference(&mut self, id: ObjectId) {
        let Some(header) = self.registry.get_mut(id) else {
            log::warn!("release of freed object {}", id);
            return;
        };
        if header.refs == 0 {
            log::warn!("release of unreferenced object {}", id);
            return;
        }
        header.refs -= 1;
        if header.refs == 0 {
            self.schedule_really_free(id);
        }
    }

    pub(crate) fn retain_value(&mut self, value: &Value) {
        if let Some(id) = value.object_ref() {
            self.add_ref(id);
        }
    }

    pub(crate) fn release_value(&mut self, value: &Value) {
        if let Some(id) = value.object_ref() {
            self.release_reference(id);
        }
    }

    pub(crate) fn release_frame(&mut self, frame: Frame) {
        self.release_reference(frame.object);
        if let Some(parent) = frame.parent {
            self.release_reference(parent);
        }
    }

    pub(crate) fn schedule_really_free(&mut self, id: ObjectId) {
        if self.gc.phase().is_analyzing() {
            log::trace!("{} reached zero refs during GC, left in place", id);
            self.gc.defer_zero_ref(id);
            return;
        }

        let Some(header) = self.registry.get(id) else {
            return;
        };
        let destructed = header.is_destructed();
        let immediate = header
            .program
            .as_ref()
            .map_or(false, |program| program.flags().destruct_immediate);

        if immediate {
            self.add_ref(id);
            self.destruct(id);
            let Some(header) = self.registry.get_mut(id) else {
                return;
            };
            header.refs -= 1;
            if header.refs > 0 {
                // Resurrected by destroy.
                return;
            }
            self.free_header(id);
            return;
        }

        if destructed {
            self.free_header(id);
            return;
        }

        self.registry.unlink(id);
        self.registry.push_pending(id);
        log::trace!("{} queued for deferred destruction", id);
        if self.gc.phase() == GcPhase::Idle {
            self.schedule_flush();
        }
    }

    fn free_header(&mut self, id: ObjectId) {
        if let Some(header) = self.registry.remove(id) {
            log::trace!("freed {} ({})", id, header.program_name);
            if let Some(parent) = header.parent {
                self.release_reference(parent);
            }
        }
    }

    // ========================================================================
    // Deferred Destruction
    // ========================================================================

    fn schedule_flush(&mut self) {
        if self.flush_callback.is_none() {
            let id = self.callbacks.add(|rt| rt.flush_pending_destructions());
            self.flush_callback = Some(id);
        }
    }

    /// Destruct every object on the pending list
    ///
    /// The whole list is detached before it is walked, so objects queued by
    /// `destroy` hooks form the next batch. An object that regained a
    /// reference while pending goes back on the live list untouched.
    pub fn flush_pending_destructions(&mut self) {
        loop {
            let batch = self.registry.take_pending();
            if batch.is_empty() {
                break;
            }
            log::debug!("flushing {} pending destructions", batch.len());
            for id in batch {
                self.registry.link_live(id);
                if self.refs(id) > 0 {
                    log::debug!("{} referenced again while pending, kept", id);
                    continue;
                }
                self.add_ref(id);
                self.destruct(id);
                self.release_reference(id);
            }
        }
        if let Some(callback) = self.flush_callback.take() {
            self.callbacks.remove(callback);
        }
    }

    /// Number of objects waiting for deferred destruction
    pub fn pending_destructions(&self) -> usize {
        self.registry.pending_len()
    }

    // ========================================================================
    // Shutdown
    // ========================================================================

    /// Tear the runtime down
    ///
    /// Releases the interpreter stacks, calls `destroy` on every live
    /// object, destructs those whose program allows explicit destruction,
    /// flushes pending destructions and runs module exit hooks, most
    /// recently loaded first.
    pub fn shutdown(&mut self) {
        log::info!("shutting down ({} live objects)", self.registry.live_len());

        while let Some(frame) = self.stack.pop_frame() {
            self.release_frame(frame);
        }
        for value in self.stack.truncate(0).into_iter().rev() {
            self.release_value(&value);
        }
        self.stack.truncate_marks(0);

        for id in self.registry.live_ids() {
            if !self.is_destructed(id) {
                self.add_ref(id);
                self.call_destroy(id);
                self.release_reference(id);
            }
        }
        for id in self.registry.live_ids() {
            let explicit = self
                .program_of(id)
                .map_or(false, |program| !program.flags().no_explicit_destruct);
            if explicit {
                self.add_ref(id);
                self.destruct(id);
                self.release_reference(id);
            }
        }
        self.flush_pending_destructions();
        self.unload_modules();
    }
}
