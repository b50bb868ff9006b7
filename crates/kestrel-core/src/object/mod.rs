//! Object instances
//!
//! An instance is a fixed header plus a storage blob laid out by its program.
//!
//! # Layout
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │ ObjectHeader                             │
//! │  - refs                                  │
//! │  - program (None once destructed)        │
//! │  - parent + parent identifier            │
//! │  - registry link (prev / next / list)    │
//! │  - destroy_called                        │
//! ├──────────────────────────────────────────┤
//! │ Storage (None once destructed)           │
//! │  - cells: one per declared variable      │
//! │  - native: one optional box per context  │
//! └──────────────────────────────────────────┘
//! ```

mod registry;
mod storage;

pub use registry::{ListMembership, ObjectRegistry};
pub use storage::{Cell, ShortValue, Storage};

pub(crate) use registry::Link;

use crate::program::Program;
use std::fmt;
use std::sync::Arc;

/// Handle to an object instance
///
/// The generation distinguishes a freed header from a later instance reusing
/// the same slot, so stale handles never alias a new object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId {
    index: u32,
    generation: u32,
}

impl ObjectId {
    pub(crate) fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Slot index within the registry
    #[inline]
    pub fn index(self) -> u32 {
        self.index
    }

    /// Slot generation
    #[inline]
    pub fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}.{}", self.index, self.generation)
    }
}

/// Per-instance header
pub struct ObjectHeader {
    /// Reference count
    pub(crate) refs: u32,
    /// Owning program; `None` once destructed
    pub(crate) program: Option<Arc<Program>>,
    /// Storage blob; `None` once destructed
    pub(crate) storage: Option<Storage>,
    /// Owned reference to the parent object
    pub(crate) parent: Option<ObjectId>,
    /// Identifier in the parent this instance was created from
    pub(crate) parent_identifier: Option<usize>,
    /// Program name, kept for diagnostics after destruction
    pub(crate) program_name: Arc<str>,
    /// Set once `destroy` has been invoked
    pub(crate) destroy_called: bool,
    pub(in crate::object) link: Link,
}

impl ObjectHeader {
    pub(crate) fn new(
        program: Arc<Program>,
        storage: Storage,
        parent: Option<ObjectId>,
        parent_identifier: Option<usize>,
    ) -> Self {
        Self {
            refs: 1,
            program_name: program.name().clone(),
            program: Some(program),
            storage: Some(storage),
            parent,
            parent_identifier,
            destroy_called: false,
            link: Link::detached(),
        }
    }

    /// Reference count
    #[inline]
    pub fn refs(&self) -> u32 {
        self.refs
    }

    /// Owning program, `None` once destructed
    pub fn program(&self) -> Option<&Arc<Program>> {
        self.program.as_ref()
    }

    /// Check whether the instance has been destructed
    #[inline]
    pub fn is_destructed(&self) -> bool {
        self.program.is_none()
    }

    /// Parent object
    #[inline]
    pub fn parent(&self) -> Option<ObjectId> {
        self.parent
    }

    /// Identifier in the parent this instance was created from
    #[inline]
    pub fn parent_identifier(&self) -> Option<usize> {
        self.parent_identifier
    }

    /// Storage blob
    pub fn storage(&self) -> Option<&Storage> {
        self.storage.as_ref()
    }

    /// Program name
    pub fn program_name(&self) -> &Arc<str> {
        &self.program_name
    }

    /// Check whether `destroy` has been invoked
    #[inline]
    pub fn destroy_called(&self) -> bool {
        self.destroy_called
    }

    /// Every strong reference this header owns: parent first, then cells
    pub(crate) fn strong_refs(&self, out: &mut Vec<ObjectId>) {
        if let Some(parent) = self.parent {
            out.push(parent);
        }
        if let Some(storage) = &self.storage {
            out.extend(storage.cells().iter().filter_map(Cell::strong_ref));
        }
    }
}

impl fmt::Debug for ObjectHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectHeader")
            .field("program", &self.program_name)
            .field("refs", &self.refs)
            .field("destructed", &self.is_destructed())
            .field("parent", &self.parent)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_id_display() {
        let id = ObjectId::new(4, 2);
        assert_eq!(id.to_string(), "#4.2");
        assert_eq!(id.index(), 4);
        assert_eq!(id.generation(), 2);
    }
}
