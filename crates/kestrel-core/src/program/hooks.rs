//! Native context hooks
//!
//! A context may carry native code that runs at instantiation and
//! destruction, and that exposes references hidden in its native storage to
//! the garbage collector. Every hook defaults to a no-op.

use crate::object::ObjectId;
use crate::runtime::Runtime;
use crate::RuntimeResult;
use std::any::Any;

/// Native lifecycle and GC hooks of one inherited context
pub trait ContextHooks: Send + Sync {
    /// Called once per instance after the context's variables are zeroed
    ///
    /// # Errors
    ///
    /// A raised error aborts instantiation; the partially built instance is
    /// destructed.
    fn init(&self, cx: &mut HookCx<'_>) -> RuntimeResult<()> {
        let _ = cx;
        Ok(())
    }

    /// Called during destruction, before the context's variables are released
    ///
    /// Object references kept in native storage must be released here.
    fn exit(&self, cx: &mut HookCx<'_>) {
        let _ = cx;
    }

    /// Report strong references held in native storage to the marker
    fn gc_recurse(
        &self,
        native: Option<&(dyn Any + Send + 'static)>,
        visit: &mut dyn FnMut(ObjectId),
    ) {
        let _ = (native, visit);
    }

    /// Report strong references held in native storage to the consistency check
    ///
    /// Must report the same references as [`gc_recurse`](Self::gc_recurse).
    fn gc_check(
        &self,
        native: Option<&(dyn Any + Send + 'static)>,
        visit: &mut dyn FnMut(ObjectId),
    ) {
        let _ = (native, visit);
    }
}

/// Context handed to `init` and `exit` hooks
pub struct HookCx<'a> {
    runtime: &'a mut Runtime,
    object: ObjectId,
    context: usize,
}

impl<'a> HookCx<'a> {
    pub(crate) fn new(runtime: &'a mut Runtime, object: ObjectId, context: usize) -> Self {
        Self {
            runtime,
            object,
            context,
        }
    }

    /// The instance being initialized or destructed
    #[inline]
    pub fn object(&self) -> ObjectId {
        self.object
    }

    /// Index of the inherit the hook belongs to
    #[inline]
    pub fn context(&self) -> usize {
        self.context
    }

    /// The runtime
    pub fn runtime(&mut self) -> &mut Runtime {
        self.runtime
    }

    /// Store native data for this context, replacing any previous value
    pub fn set_native<T: Any + Send>(&mut self, value: T) {
        let context = self.context;
        if let Some(storage) = self.runtime.storage_mut(self.object) {
            storage.set_native(context, Box::new(value));
        }
    }

    /// Borrow this context's native data
    pub fn native<T: Any + Send>(&self) -> Option<&T> {
        self.runtime
            .storage(self.object)?
            .native(self.context)?
            .downcast_ref::<T>()
    }

    /// Mutably borrow this context's native data
    pub fn native_mut<T: Any + Send>(&mut self) -> Option<&mut T> {
        let context = self.context;
        self.runtime
            .storage_mut(self.object)?
            .native_mut(context)?
            .downcast_mut::<T>()
    }

    /// Remove this context's native data
    pub fn take_native<T: Any + Send>(&mut self) -> Option<T> {
        let context = self.context;
        let boxed = self.runtime.storage_mut(self.object)?.take_native(context)?;
        boxed.downcast::<T>().ok().map(|value| *value)
    }
}
