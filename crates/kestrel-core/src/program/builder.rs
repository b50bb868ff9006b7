//! Program construction
//!
//! [`ProgramBuilder`] stands in for the compiler: it collects a program's own
//! identifiers, flattens the contexts of inherited programs after them and
//! assigns storage offsets and identifier levels.

use super::{
    ContextDescriptor, ContextHooks, Identifier, IdentifierKind, Inherit, NativeMethod, Program,
    ProgramFlags, VarType,
};
use crate::object::ObjectId;
use crate::runtime::Runtime;
use crate::value::Value;
use crate::RuntimeResult;
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::Arc;

/// Program construction errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProgramError {
    /// Attempt to inherit a program that is still being compiled
    #[error("Cannot inherit unfinished program {0}")]
    InheritsUnfinished(Arc<str>),

    /// The same name declared twice in one context
    #[error("Identifier {name} declared twice in {program}")]
    DuplicateIdentifier {
        /// Program being built
        program: Arc<str>,
        /// Duplicated name
        name: Arc<str>,
    },
}

/// Builder for [`Program`] descriptors
pub struct ProgramBuilder {
    name: Arc<str>,
    flags: ProgramFlags,
    identifiers: Vec<Identifier>,
    variable_types: Vec<VarType>,
    hooks: Option<Arc<dyn ContextHooks>>,
    inherited: Vec<Arc<Program>>,
}

impl ProgramBuilder {
    /// Start a new program
    pub fn new(name: &str) -> Self {
        Self {
            name: Arc::from(name),
            flags: ProgramFlags::default(),
            identifiers: Vec::new(),
            variable_types: Vec::new(),
            hooks: None,
            inherited: Vec::new(),
        }
    }

    /// Inherit a finished program
    pub fn inherit(mut self, program: &Arc<Program>) -> Self {
        self.inherited.push(program.clone());
        self
    }

    /// Declare a variable
    pub fn variable(mut self, name: &str, ty: VarType) -> Self {
        let slot = self.variable_types.len();
        self.variable_types.push(ty);
        self.identifiers.push(Identifier {
            name: Arc::from(name),
            kind: IdentifierKind::Variable { slot, ty },
        });
        self
    }

    /// Declare a native function
    pub fn function<F>(mut self, name: &str, f: F) -> Self
    where
        F: Fn(&mut Runtime, ObjectId, &[Value]) -> RuntimeResult<Value> + Send + Sync + 'static,
    {
        let method: NativeMethod = Arc::new(f);
        self.identifiers.push(Identifier {
            name: Arc::from(name),
            kind: IdentifierKind::Function(method),
        });
        self
    }

    /// Declare a constant
    pub fn constant(mut self, name: &str, value: Value) -> Self {
        self.identifiers.push(Identifier {
            name: Arc::from(name),
            kind: IdentifierKind::Constant(value),
        });
        self
    }

    /// Attach native hooks to this program's own context
    pub fn hooks(mut self, hooks: Arc<dyn ContextHooks>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    /// Require a parent object at instantiation
    pub fn uses_parent(mut self) -> Self {
        self.flags.uses_parent = true;
        self
    }

    /// Destruct synchronously when the refcount reaches zero
    pub fn destruct_immediate(mut self) -> Self {
        self.flags.destruct_immediate = true;
        self
    }

    /// Skip explicit destruction at shutdown
    pub fn no_explicit_destruct(mut self) -> Self {
        self.flags.no_explicit_destruct = true;
        self
    }

    /// Seal the program
    ///
    /// # Errors
    ///
    /// Returns `ProgramError` if an inherited program is unfinished or a name
    /// is declared twice in the program's own context.
    pub fn finish(self) -> Result<Arc<Program>, ProgramError> {
        self.build(true)
    }

    /// Build a descriptor that is still under compilation
    ///
    /// Instantiating it fails with `UnfinishedProgram`.
    pub fn build_unfinished(self) -> Result<Arc<Program>, ProgramError> {
        self.build(false)
    }

    fn build(self, finished: bool) -> Result<Arc<Program>, ProgramError> {
        {
            let mut seen: FxHashSet<&str> = FxHashSet::default();
            for ident in &self.identifiers {
                if !seen.insert(&*ident.name) {
                    return Err(ProgramError::DuplicateIdentifier {
                        program: self.name.clone(),
                        name: ident.name.clone(),
                    });
                }
            }
        }
        if let Some(unfinished) = self.inherited.iter().find(|p| !p.is_finished()) {
            return Err(ProgramError::InheritsUnfinished(unfinished.name().clone()));
        }

        let own = Arc::new(ContextDescriptor {
            name: self.name.clone(),
            identifiers: self.identifiers,
            variable_types: self.variable_types,
            hooks: self.hooks,
        });

        let mut storage_offset = own.storage_size();
        let mut identifier_level = own.identifiers.len();
        let mut inherits = vec![Inherit {
            context: own.clone(),
            storage_offset: 0,
            identifier_level: 0,
            depth: 0,
        }];
        let mut lookup: FxHashMap<Arc<str>, usize> = FxHashMap::default();

        for program in &self.inherited {
            let storage_base = storage_offset;
            let level_base = identifier_level;
            for inherit in program.inherits() {
                inherits.push(Inherit {
                    context: inherit.context.clone(),
                    storage_offset: storage_base + inherit.storage_offset,
                    identifier_level: level_base + inherit.identifier_level,
                    depth: inherit.depth + 1,
                });
            }
            storage_offset += program.storage_size();
            identifier_level += program.identifier_count();

            // Later inherits shadow earlier ones.
            for (name, index) in &program.lookup {
                lookup.insert(name.clone(), level_base + index);
            }
        }

        for (local, ident) in own.identifiers.iter().enumerate() {
            lookup.insert(ident.name.clone(), local);
        }

        log::trace!(
            "built program {} ({} contexts, {} cells)",
            self.name,
            inherits.len(),
            storage_offset
        );

        Ok(Arc::new(Program {
            name: self.name,
            flags: self.flags,
            finished,
            inherits,
            lookup,
            identifier_count: identifier_level,
            storage_size: storage_offset,
        }))
    }
}
