//! Program descriptors
//!
//! A [`Program`] is the immutable compiled description of a class. It is an
//! ordered list of inherited contexts, each contributing a run of storage
//! cells, a run of identifiers and optional native hooks.
//!
//! # Layout
//!
//! ```text
//! inherits[0]  own context        cells [0, n0)        identifiers [0, k0)
//! inherits[1]  first inherit      cells [n0, n0+n1)    identifiers [k0, k0+k1)
//! inherits[2]  its own inherit    ...                  ...
//! ```
//!
//! Storage offsets and identifier levels are fixed once the program is
//! finished. An instance's storage size is the sum of every context's size.

mod builder;
mod hooks;

pub use builder::{ProgramBuilder, ProgramError};
pub use hooks::{ContextHooks, HookCx};

use crate::object::ObjectId;
use crate::runtime::Runtime;
use crate::value::Value;
use crate::RuntimeResult;
use rustc_hash::FxHashMap;
use std::fmt;
use std::ops::Range;
use std::sync::Arc;

/// Native function implementation
///
/// Receives the runtime, the object the function is bound to and the call
/// arguments. The returned value is a non-owning handle.
pub type NativeMethod =
    Arc<dyn Fn(&mut Runtime, ObjectId, &[Value]) -> RuntimeResult<Value> + Send + Sync>;

/// Declared storage type of a variable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VarType {
    /// Any value, stored type-tagged
    Mixed,
    /// Short integer slot
    Int,
    /// Short float slot
    Float,
    /// Short string slot
    String,
    /// Short strong object slot
    Object,
    /// Short weak object slot (non-owning)
    WeakObject,
}

impl VarType {
    /// Check whether slots of this type are type-tagged
    #[inline]
    pub fn is_tagged(self) -> bool {
        matches!(self, VarType::Mixed)
    }
}

impl fmt::Display for VarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VarType::Mixed => "mixed",
            VarType::Int => "int",
            VarType::Float => "float",
            VarType::String => "string",
            VarType::Object => "object",
            VarType::WeakObject => "weak object",
        };
        f.write_str(name)
    }
}

/// Lifecycle and operator functions a program may define
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lfun {
    /// Implicit per-context initializer
    Init,
    /// Explicit constructor
    Create,
    /// User-level destructor
    Destroy,
    /// `obj[key]`
    Index,
    /// `obj->key`
    Arrow,
    /// `obj[key] = value`
    AssignIndex,
    /// `obj->key = value`
    AssignArrow,
    /// Object description used in backtraces
    Sprintf,
}

impl Lfun {
    /// Identifier name of this lfun
    pub fn name(self) -> &'static str {
        match self {
            Lfun::Init => "__INIT",
            Lfun::Create => "create",
            Lfun::Destroy => "destroy",
            Lfun::Index => "`[]",
            Lfun::Arrow => "`->",
            Lfun::AssignIndex => "`[]=",
            Lfun::AssignArrow => "`->=",
            Lfun::Sprintf => "_sprintf",
        }
    }
}

/// What an identifier denotes
#[derive(Clone)]
pub enum IdentifierKind {
    /// Variable stored at `slot` within its context's cells
    Variable {
        /// Cell index relative to the context's storage offset
        slot: usize,
        /// Declared storage type
        ty: VarType,
    },
    /// Native function
    Function(NativeMethod),
    /// Constant value
    Constant(Value),
}

impl fmt::Debug for IdentifierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentifierKind::Variable { slot, ty } => f
                .debug_struct("Variable")
                .field("slot", slot)
                .field("ty", ty)
                .finish(),
            IdentifierKind::Function(_) => f.write_str("Function"),
            IdentifierKind::Constant(v) => f.debug_tuple("Constant").field(v).finish(),
        }
    }
}

/// A named identifier within one context
#[derive(Debug, Clone)]
pub struct Identifier {
    /// Identifier name
    pub name: Arc<str>,
    /// What the identifier denotes
    pub kind: IdentifierKind,
}

/// One layer of storage and behavior, shared by every program inheriting it
pub struct ContextDescriptor {
    name: Arc<str>,
    identifiers: Vec<Identifier>,
    variable_types: Vec<VarType>,
    hooks: Option<Arc<dyn ContextHooks>>,
}

impl ContextDescriptor {
    /// Name of the program that declared this context
    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    /// Identifiers declared by this context
    pub fn identifiers(&self) -> &[Identifier] {
        &self.identifiers
    }

    /// Storage type of each declared variable, in slot order
    pub fn variable_types(&self) -> &[VarType] {
        &self.variable_types
    }

    /// Number of storage cells this context contributes
    #[inline]
    pub fn storage_size(&self) -> usize {
        self.variable_types.len()
    }

    /// Native hooks, if any
    pub fn hooks(&self) -> Option<&Arc<dyn ContextHooks>> {
        self.hooks.as_ref()
    }

    /// Local index of this context's `__INIT` function
    fn initializer(&self) -> Option<usize> {
        self.identifiers.iter().position(|ident| {
            &*ident.name == Lfun::Init.name()
                && matches!(ident.kind, IdentifierKind::Function(_))
        })
    }
}

impl fmt::Debug for ContextDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextDescriptor")
            .field("name", &self.name)
            .field("identifiers", &self.identifiers.len())
            .field("variables", &self.variable_types)
            .field("hooks", &self.hooks.is_some())
            .finish()
    }
}

/// An inherited context placed within a program
#[derive(Debug, Clone)]
pub struct Inherit {
    context: Arc<ContextDescriptor>,
    storage_offset: usize,
    identifier_level: usize,
    depth: usize,
}

impl Inherit {
    /// The context descriptor
    pub fn context(&self) -> &Arc<ContextDescriptor> {
        &self.context
    }

    /// First storage cell of this context
    #[inline]
    pub fn storage_offset(&self) -> usize {
        self.storage_offset
    }

    /// Storage cells owned by this context
    #[inline]
    pub fn storage_range(&self) -> Range<usize> {
        self.storage_offset..self.storage_offset + self.context.storage_size()
    }

    /// First identifier index of this context
    #[inline]
    pub fn identifier_level(&self) -> usize {
        self.identifier_level
    }

    /// Inheritance depth (0 for the program's own context)
    #[inline]
    pub fn depth(&self) -> usize {
        self.depth
    }
}

/// Program-level flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgramFlags {
    /// Instances must be created with a parent object
    pub uses_parent: bool,
    /// Destruct synchronously when the refcount reaches zero
    pub destruct_immediate: bool,
    /// Skip explicit destruction at shutdown
    pub no_explicit_destruct: bool,
}

/// Identifier resolved against a program's flattened table
#[derive(Debug, Clone, Copy)]
pub struct ResolvedIdentifier<'a> {
    /// Index of the inherit that declared it
    pub inherit: usize,
    /// The identifier
    pub identifier: &'a Identifier,
    /// Absolute storage cell for variables
    pub cell: Option<usize>,
}

/// Immutable compiled class description
pub struct Program {
    name: Arc<str>,
    flags: ProgramFlags,
    finished: bool,
    inherits: Vec<Inherit>,
    lookup: FxHashMap<Arc<str>, usize>,
    identifier_count: usize,
    storage_size: usize,
}

impl Program {
    /// Program name
    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    /// Program flags
    #[inline]
    pub fn flags(&self) -> ProgramFlags {
        self.flags
    }

    /// Check whether compilation has completed
    #[inline]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Inherited contexts in declaration order (own context first)
    pub fn inherits(&self) -> &[Inherit] {
        &self.inherits
    }

    /// Total number of storage cells of an instance
    #[inline]
    pub fn storage_size(&self) -> usize {
        self.storage_size
    }

    /// Total number of identifiers across all contexts
    #[inline]
    pub fn identifier_count(&self) -> usize {
        self.identifier_count
    }

    /// Resolve a name to its winning identifier index
    pub fn find_identifier(&self, name: &str) -> Option<usize> {
        self.lookup.get(name).copied()
    }

    /// Resolve an lfun, which must be a function identifier
    pub fn find_lfun(&self, lfun: Lfun) -> Option<usize> {
        let index = self.find_identifier(lfun.name())?;
        match self.identifier(index)?.identifier.kind {
            IdentifierKind::Function(_) => Some(index),
            _ => None,
        }
    }

    /// Identifier index of the `__INIT` function of inherit `e`
    pub fn context_initializer(&self, e: usize) -> Option<usize> {
        let inherit = self.inherits.get(e)?;
        inherit
            .context
            .initializer()
            .map(|local| inherit.identifier_level + local)
    }

    /// Resolve a flattened identifier index
    pub fn identifier(&self, index: usize) -> Option<ResolvedIdentifier<'_>> {
        if index >= self.identifier_count {
            return None;
        }
        // Inherits are laid out with increasing identifier levels.
        let e = self
            .inherits
            .partition_point(|inherit| inherit.identifier_level <= index)
            .checked_sub(1)?;
        let inherit = &self.inherits[e];
        let identifier = inherit
            .context
            .identifiers
            .get(index - inherit.identifier_level)?;
        let cell = match identifier.kind {
            IdentifierKind::Variable { slot, .. } => Some(inherit.storage_offset + slot),
            _ => None,
        };
        Some(ResolvedIdentifier {
            inherit: e,
            identifier,
            cell,
        })
    }

    /// Visible names with their identifier indices, ordered by index
    pub fn visible_identifiers(&self) -> Vec<(Arc<str>, usize)> {
        let mut names: Vec<(Arc<str>, usize)> = self
            .lookup
            .iter()
            .map(|(name, index)| (name.clone(), *index))
            .collect();
        names.sort_by_key(|(_, index)| *index);
        names
    }
}

impl fmt::Debug for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Program")
            .field("name", &self.name)
            .field("flags", &self.flags)
            .field("finished", &self.finished)
            .field("inherits", &self.inherits.len())
            .field("storage_size", &self.storage_size)
            .finish()
    }
}
